pub mod env_file;
pub mod error;
pub mod runtime_env;
pub mod secrets;
pub mod settings;
pub mod summary;

pub use env_file::{validate_env_key, validate_env_value, EnvFile};
pub use error::ConfigError;
pub use runtime_env::RuntimeEnv;
pub use secrets::{display_value, is_secret_key, mask_value, redact_message, REDACTION};
pub use settings::{parse_bool, ServerSettings, ENV_FILE_NAME, RECOGNIZED_KEYS};
pub use summary::{summarize, ConfigSummary, VarSummary};
