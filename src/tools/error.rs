use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    NotFound,
    InvalidParameters,
    Timeout,
    Validation,
    Execution,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InvalidParameters => "InvalidParameters",
            Self::Timeout => "Timeout",
            Self::Validation => "Validation",
            Self::Execution => "Execution",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidParameters => 400,
            Self::Timeout => 504,
            Self::Validation => 422,
            Self::Execution => 500,
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{tool}' not found")]
    NotFound { tool: String },
    #[error("{detail}")]
    InvalidParameters { tool: String, detail: String },
    #[error("Tool execution timed out")]
    Timeout { tool: String, after: Duration },
    #[error("{detail}")]
    Validation { path: String, detail: String },
    #[error("{detail}")]
    Execution { tool: Option<String>, detail: String },
}

impl ToolError {
    pub fn not_found(tool: impl Into<String>) -> Self {
        Self::NotFound { tool: tool.into() }
    }

    pub fn validation(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::NotFound { .. } => ToolErrorKind::NotFound,
            Self::InvalidParameters { .. } => ToolErrorKind::InvalidParameters,
            Self::Timeout { .. } => ToolErrorKind::Timeout,
            Self::Validation { .. } => ToolErrorKind::Validation,
            Self::Execution { .. } => ToolErrorKind::Execution,
        }
    }

    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::NotFound { tool }
            | Self::InvalidParameters { tool, .. }
            | Self::Timeout { tool, .. } => Some(tool),
            Self::Execution { tool, .. } => tool.as_deref(),
            Self::Validation { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Validation { path, .. } => Some(path),
            _ => None,
        }
    }
}
