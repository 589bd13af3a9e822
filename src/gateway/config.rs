use super::error::{json_response, ApiError};
use super::server::Server;
use crate::config::ConfigError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn get_config(State(server): State<Arc<Server>>) -> Response {
    let summary = server.env().summary();
    let body = serde_json::to_value(&summary).unwrap_or(Value::Null);
    json_response(StatusCode::OK, &body, server.settings().safe_json)
}

/// Scalars are stored as their text; objects, arrays and null are rejected.
pub fn parse_config_body(raw: &[u8]) -> Result<Vec<(String, String)>, ApiError> {
    let value = serde_json::from_slice::<Value>(raw)
        .map_err(|err| ApiError::validation("body", format!("body must be JSON: {err}")))?;
    let Value::Object(entries) = value else {
        return Err(ApiError::validation("body", "body must be an object of KEY: value"));
    };
    let mut updates = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let text = match value {
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            _ => {
                return Err(ApiError::validation(
                    format!("body.{key}"),
                    "config values must be strings, numbers or booleans",
                ))
            }
        };
        if text.chars().any(char::is_control) {
            return Err(ApiError::validation(
                format!("body.{key}"),
                "config values must not contain control characters",
            ));
        }
        updates.push((key, text));
    }
    Ok(updates)
}

pub async fn post_config(State(server): State<Arc<Server>>, body: Bytes) -> Response {
    let updates = match parse_config_body(&body) {
        Ok(updates) => updates,
        Err(err) => return err.into_response(),
    };
    match server.env().update(&updates) {
        Ok(keys) => {
            let summary = server.env().summary();
            let body = json!({
                "updated": !keys.is_empty(),
                "keys": keys,
                "env_file": summary.env_file.clone(),
                "summary": serde_json::to_value(&summary).unwrap_or(Value::Null),
            });
            json_response(StatusCode::OK, &body, server.settings().safe_json)
        }
        Err(ConfigError::InvalidKey { key, reason } | ConfigError::InvalidValue { key, reason }) => {
            ApiError::validation(format!("body.{key}"), reason).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "config update failed");
            ApiError::execution(server.redact(&err.to_string())).into_response()
        }
    }
}
