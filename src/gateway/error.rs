use crate::safe_json::{self, SafeJsonOptions};
use crate::tools::{ToolError, ToolErrorKind};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server terminated: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// The error envelope `{ error, detail, tool?, path? }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ToolErrorKind,
    pub detail: String,
    pub tool: Option<String>,
    pub path: Option<String>,
}

impl ApiError {
    pub fn new(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            tool: None,
            path: None,
        }
    }

    pub fn validation(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::from(ToolError::validation(path, detail))
    }

    pub fn execution(detail: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, detail)
    }

    pub fn worker_not_found(name: &str) -> Self {
        Self::new(ToolErrorKind::NotFound, format!("Worker '{name}' not found"))
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::from(self.kind.as_str()));
        body.insert("detail".to_string(), Value::from(self.detail.as_str()));
        if let Some(tool) = &self.tool {
            body.insert("tool".to_string(), Value::from(tool.as_str()));
        }
        if let Some(path) = &self.path {
            body.insert("path".to_string(), Value::from(path.as_str()));
        }
        Value::Object(body)
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
            tool: err.tool().map(str::to_string),
            path: err.path().map(str::to_string),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_response(self.status(), &self.to_json(), SafeJsonOptions::default())
    }
}

/// Compact, sanitised JSON body with an explicit content type.
pub fn json_response(status: StatusCode, value: &Value, options: SafeJsonOptions) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        safe_json::encode_value(value, options),
    )
        .into_response()
}
