use super::error::{json_response, ApiError};
use super::server::Server;
use super::stream::sse_response;
use crate::config::parse_bool;
use crate::safe_json;
use crate::tools::{ToolError, ToolFailure, ToolOutput};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

const TOOL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-tool-count");

#[derive(Debug, Default, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub reload: Option<String>,
    #[serde(default)]
    pub list: Option<String>,
}

fn flag(raw: Option<&String>) -> bool {
    raw.is_some_and(|value| parse_bool("query", value).unwrap_or(false))
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(raw) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate == "*" || candidate.trim_matches('"') == etag
    })
}

fn catalog_headers(etag: &str, count: usize) -> [(HeaderName, String); 3] {
    [
        (ETAG, format!("\"{etag}\"")),
        (CACHE_CONTROL, "no-cache".to_string()),
        (TOOL_COUNT_HEADER, count.to_string()),
    ]
}

pub async fn head_tools(State(server): State<Arc<Server>>) -> Response {
    server.refresh_off_runtime(false).await;
    let registry = server.registry();
    (StatusCode::OK, catalog_headers(registry.etag(), registry.len())).into_response()
}

pub async fn list_tools(
    State(server): State<Arc<Server>>,
    Query(query): Query<ToolsQuery>,
    headers: HeaderMap,
) -> Response {
    let explicit = flag(query.reload.as_ref());
    server.refresh_off_runtime(explicit).await;
    let registry = server.registry();

    if explicit {
        let mut body = json!({
            "reloaded": true,
            "count": registry.len(),
            "errors": registry.load_errors(),
        });
        if flag(query.list.as_ref()) {
            body["tools"] = serde_json::to_value(registry.catalog()).unwrap_or(Value::Null);
        }
        let mut response = json_response(StatusCode::OK, &body, server.settings().safe_json);
        for (name, value) in catalog_headers(registry.etag(), registry.len()) {
            if let Ok(value) = value.parse() {
                response.headers_mut().insert(name, value);
            }
        }
        return response;
    }

    if etag_matches(&headers, registry.etag()) {
        return (
            StatusCode::NOT_MODIFIED,
            catalog_headers(registry.etag(), registry.len()),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        catalog_headers(registry.etag(), registry.len()),
        [(CONTENT_TYPE, "application/json")],
        registry.catalog_json().to_string(),
    )
        .into_response()
}

pub async fn health(State(server): State<Arc<Server>>) -> Response {
    let body = json!({ "status": "ok", "tools": server.registry().len() });
    json_response(StatusCode::OK, &body, server.settings().safe_json)
}

/// Echoes the parsed body. Parse failures are reported in-body with 200.
pub async fn debug(State(server): State<Arc<Server>>, body: Bytes) -> Response {
    let body = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => json!({ "received": value }),
        Err(err) => json!({ "received": Value::Null, "error": err.to_string() }),
    };
    json_response(StatusCode::OK, &body, server.settings().safe_json)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub tool: String,
    pub params: Map<String, Value>,
}

/// Checks the execute body shape; failures carry the offending path.
pub fn parse_execute_body(raw: &[u8]) -> Result<ExecuteRequest, ApiError> {
    let value = serde_json::from_slice::<Value>(raw)
        .map_err(|err| ApiError::validation("body", format!("body must be JSON: {err}")))?;
    let Value::Object(mut body) = value else {
        return Err(ApiError::validation("body", "body must be a JSON object"));
    };
    let tool = ["tool", "tool_reg"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::validation("body.tool", "`tool` or `tool_reg` must be a non-empty string"))?;
    let params = match body.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params,
        Some(_) => return Err(ApiError::validation("body.params", "`params` must be an object")),
    };
    Ok(ExecuteRequest { tool, params })
}

pub async fn execute(State(server): State<Arc<Server>>, body: Bytes) -> Response {
    let request = match parse_execute_body(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    server.refresh_off_runtime(false).await;
    let Some(entry) = server.registry().get(&request.tool) else {
        tracing::info!(tool = %request.tool, "execute for unknown tool");
        return ApiError::from(ToolError::not_found(&request.tool)).into_response();
    };

    let started = Instant::now();
    let options = server.settings().safe_json;
    let timeout = server.settings().execute_timeout;
    let tool = request.tool.clone();
    let params = request.params;
    let task = tokio::task::spawn_blocking(move || entry.invoke(&params));

    let failure = |err: ToolError| {
        tracing::info!(
            tool = %tool,
            outcome = err.kind().as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execute finished"
        );
        ApiError::from(err).into_response()
    };
    let output = match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            return failure(ToolError::Timeout {
                tool: tool.clone(),
                after: timeout,
            })
        }
        Ok(Err(join)) => {
            return failure(ToolError::Execution {
                tool: Some(tool.clone()),
                detail: server.redact(&join.to_string()),
            })
        }
        Ok(Ok(Err(ToolFailure::InvalidParameters(detail)))) => {
            return failure(ToolError::InvalidParameters {
                tool: tool.clone(),
                detail,
            })
        }
        Ok(Ok(Err(ToolFailure::Execution(detail)))) => {
            return failure(ToolError::Execution {
                tool: Some(tool.clone()),
                detail: server.redact(&detail),
            })
        }
        Ok(Ok(Ok(output))) => output,
    };

    match output {
        ToolOutput::Value(payload) => {
            let body = json!({ "result": safe_json::sanitize(&payload, options) });
            tracing::info!(
                tool = %tool,
                outcome = "ok",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "execute finished"
            );
            json_response(StatusCode::OK, &body, options)
        }
        ToolOutput::Stream(chunks) => {
            tracing::info!(tool = %tool, "execute streaming");
            let redactor = Arc::clone(&server);
            sse_response(tool.clone(), chunks, options, move |message| {
                redactor.redact(message)
            })
        }
    }
}
