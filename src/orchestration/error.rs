use crate::orchestration::transforms::TransformError;
use crate::state_store::StateStoreError;
use crate::tools::ToolError;

pub const ONE_EFFECT_MESSAGE: &str = "step must perform exactly one effect";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{message} (node `{node}`, effects {effects})")]
    Invariant {
        node: String,
        message: String,
        effects: u32,
    },
    #[error("missing required worker config `{key}`")]
    MissingConfig { key: String },
    #[error("step `{node}` timed out after {timeout_ms}ms")]
    StepTimeout { node: String, timeout_ms: u64 },
    #[error("run timed out after {run_timeout_seconds}s")]
    RunTimeout { run_timeout_seconds: u64 },
    #[error("run exceeded maximum node visits ({max_visits})")]
    MaxVisitsExceeded { max_visits: u32 },
    #[error("tool `{tool}` failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("routing failed at `{node}`: {reason}")]
    Routing { node: String, reason: String },
    #[error("invalid definition {path}: {reason}")]
    Definition { path: String, reason: String },
    #[error("step `{node}` failed: {reason}")]
    StepFailed { node: String, reason: String },
    #[error(transparent)]
    Store(#[from] StateStoreError),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("yaml error at {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl OrchestratorError {
    pub fn one_effect(node: &str, effects: u32) -> Self {
        Self::Invariant {
            node: node.to_string(),
            message: ONE_EFFECT_MESSAGE.to_string(),
            effects,
        }
    }

    pub fn definition(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Definition {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn routing(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Routing {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Category recorded in `details_json.error.kind` and tallied by metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invariant { .. } => "invariant",
            Self::MissingConfig { .. } => "config",
            Self::StepTimeout { .. } => "timeout",
            Self::RunTimeout { .. } => "run_timeout",
            Self::MaxVisitsExceeded { .. } => "guard",
            Self::Tool { .. } => "tool",
            Self::Transform(_) => "transform",
            Self::Routing { .. } => "routing",
            Self::Definition { .. } => "definition",
            Self::StepFailed { .. } => "step",
            Self::Store(_) => "store",
            Self::Io { .. } => "io",
            Self::Yaml { .. } => "yaml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_message_names_the_rule() {
        let err = OrchestratorError::one_effect("MAIN::A", 2);
        assert_eq!(err.kind(), "invariant");
        assert!(err.to_string().contains("exactly one effect"));
    }
}
