use super::env_file::EnvFile;
use super::ConfigError;
use crate::safe_json::{SafeJsonOptions, DEFAULT_BIG_INT_DIGITS};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_FILE_NAME: &str = ".env";
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 180;

/// Keys `GET /config` always reports, whether or not they are set.
pub const RECOGNIZED_KEYS: [&str; 15] = [
    "TOOLHUB_BIND",
    "TOOLS_DIR",
    "TOOL_SPECS_DIR",
    "WORKERS_DIR",
    "EXECUTE_TIMEOUT_SEC",
    "TOOLS_AUTO_RELOAD",
    "TOOLS_FORCE_RELOAD",
    "SAFE_JSON_BIG_INT_DIGITS",
    "SAFE_JSON_BIG_AS_STRING",
    "LOG_LEVEL",
    "TOOLHUB_LOG_FILE",
    "API_BASE",
    "API_TOKEN",
    "MODEL",
    "OPENAI_API_KEY",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub project_root: PathBuf,
    pub env_file: PathBuf,
    pub bind: String,
    pub tools_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub workers_dir: PathBuf,
    pub execute_timeout: Duration,
    pub auto_reload: bool,
    pub force_reload: bool,
    pub safe_json: SafeJsonOptions,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

pub fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("`{raw}` is not a boolean"),
        }),
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let seconds = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("`{raw}` is not a positive number of seconds"),
        })?;
    Ok(Duration::from_secs_f64(seconds))
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw.trim());
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

impl ServerSettings {
    pub fn for_root(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let tools_dir = project_root.join("tools");
        Self {
            env_file: project_root.join(ENV_FILE_NAME),
            bind: DEFAULT_BIND.to_string(),
            specs_dir: tools_dir.join("specs"),
            tools_dir,
            workers_dir: project_root.join("workers"),
            execute_timeout: Duration::from_secs(DEFAULT_EXECUTE_TIMEOUT_SECS),
            auto_reload: true,
            force_reload: false,
            safe_json: SafeJsonOptions::default(),
            log_level: "info".to_string(),
            log_file: None,
            project_root,
        }
    }

    pub fn from_lookup<F>(project_root: impl Into<PathBuf>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::for_root(project_root);
        let root = settings.project_root.clone();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(bind) = get("TOOLHUB_BIND") {
            settings.bind = bind.trim().to_string();
        }
        if let Some(dir) = get("TOOLS_DIR") {
            settings.tools_dir = resolve_path(&root, &dir);
            settings.specs_dir = settings.tools_dir.join("specs");
        }
        if let Some(dir) = get("TOOL_SPECS_DIR") {
            settings.specs_dir = resolve_path(&root, &dir);
        }
        if let Some(dir) = get("WORKERS_DIR") {
            settings.workers_dir = resolve_path(&root, &dir);
        }
        if let Some(raw) = get("EXECUTE_TIMEOUT_SEC") {
            settings.execute_timeout = parse_seconds("EXECUTE_TIMEOUT_SEC", &raw)?;
        }
        if let Some(raw) = get("TOOLS_AUTO_RELOAD") {
            settings.auto_reload = parse_bool("TOOLS_AUTO_RELOAD", &raw)?;
        }
        if let Some(raw) = get("TOOLS_FORCE_RELOAD") {
            settings.force_reload = parse_bool("TOOLS_FORCE_RELOAD", &raw)?;
        }
        settings.safe_json = SafeJsonOptions {
            big_int_digits: match get("SAFE_JSON_BIG_INT_DIGITS") {
                Some(raw) => parse_usize("SAFE_JSON_BIG_INT_DIGITS", &raw)?,
                None => DEFAULT_BIG_INT_DIGITS,
            },
            big_as_string: match get("SAFE_JSON_BIG_AS_STRING") {
                Some(raw) => parse_bool("SAFE_JSON_BIG_AS_STRING", &raw)?,
                None => true,
            },
        };
        if let Some(level) = get("LOG_LEVEL") {
            settings.log_level = level.trim().to_string();
        }
        settings.log_file = get("TOOLHUB_LOG_FILE").map(|raw| resolve_path(&root, &raw));
        Ok(settings)
    }

    /// Process environment first, then `<root>/.env`.
    pub fn from_env(project_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let project_root = project_root.into();
        let env_file = EnvFile::load(&project_root.join(ENV_FILE_NAME))?;
        Self::from_lookup(project_root, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| env_file.get(key).map(str::to_string))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_hang_off_the_project_root() {
        let settings = ServerSettings::from_lookup("/srv/hub", lookup(&[])).expect("settings");
        assert_eq!(settings.tools_dir, PathBuf::from("/srv/hub/tools"));
        assert_eq!(settings.specs_dir, PathBuf::from("/srv/hub/tools/specs"));
        assert_eq!(settings.execute_timeout, Duration::from_secs(180));
        assert!(settings.auto_reload);
        assert_eq!(settings.safe_json, SafeJsonOptions::default());
    }

    #[test]
    fn overrides_are_parsed_and_relative_paths_resolved() {
        let settings = ServerSettings::from_lookup(
            "/srv/hub",
            lookup(&[
                ("TOOLS_DIR", "plugins"),
                ("EXECUTE_TIMEOUT_SEC", "0.5"),
                ("TOOLS_AUTO_RELOAD", "off"),
                ("SAFE_JSON_BIG_INT_DIGITS", "10"),
            ]),
        )
        .expect("settings");
        assert_eq!(settings.tools_dir, PathBuf::from("/srv/hub/plugins"));
        assert_eq!(settings.specs_dir, PathBuf::from("/srv/hub/plugins/specs"));
        assert_eq!(settings.execute_timeout, Duration::from_millis(500));
        assert!(!settings.auto_reload);
        assert_eq!(settings.safe_json.big_int_digits, 10);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = ServerSettings::from_lookup("/srv", lookup(&[("TOOLS_FORCE_RELOAD", "maybe")]))
            .expect_err("invalid bool");
        assert!(err.to_string().contains("TOOLS_FORCE_RELOAD"));
    }
}
