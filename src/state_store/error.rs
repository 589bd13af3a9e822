#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create state store parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid {field} `{value}` in database")]
    InvalidValue { field: &'static str, value: String },
    #[error("rejected query: {reason}")]
    RejectedQuery { reason: String },
}

impl From<rusqlite::Error> for StateStoreError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Sql { source }
    }
}
