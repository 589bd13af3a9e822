use super::env_file::{validate_env_key, validate_env_value, EnvFile};
use super::secrets::is_secret_key;
use super::settings::{ENV_FILE_NAME, RECOGNIZED_KEYS};
use super::summary::{summarize, ConfigSummary};
use super::ConfigError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// The gateway's view of the environment: values written through
/// `POST /config` first, then the process environment, then `.env`.
#[derive(Debug)]
pub struct RuntimeEnv {
    project_root: PathBuf,
    env_path: PathBuf,
    overrides: RwLock<BTreeMap<String, String>>,
}

impl RuntimeEnv {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            env_path: project_root.join(ENV_FILE_NAME),
            project_root,
            overrides: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn env_path(&self) -> &Path {
        &self.env_path
    }

    fn env_file(&self) -> EnvFile {
        EnvFile::load(&self.env_path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring unreadable env file");
            EnvFile::parse(&self.env_path, "")
        })
    }

    fn overrides(&self) -> BTreeMap<String, String> {
        self.overrides
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides().get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .or_else(|| self.env_file().get(key).map(str::to_string))
    }

    pub fn summary(&self) -> ConfigSummary {
        let env_file = self.env_file();
        let overrides = self.overrides();
        let mut keys: BTreeSet<&str> = RECOGNIZED_KEYS.iter().copied().collect();
        keys.extend(env_file.keys());
        keys.extend(overrides.keys().map(String::as_str));
        summarize(
            keys,
            |key| {
                overrides
                    .get(key)
                    .cloned()
                    .or_else(|| std::env::var(key).ok())
                    .or_else(|| env_file.get(key).map(str::to_string))
            },
            &self.env_path,
            &self.project_root,
        )
    }

    /// Applies `updates` in memory and to `.env`, then makes sure `.env` is
    /// git-ignored. Returns the updated keys in order.
    pub fn update(&self, updates: &[(String, String)]) -> Result<Vec<String>, ConfigError> {
        for (key, value) in updates {
            validate_env_key(key)?;
            validate_env_value(key, value)?;
        }
        let mut env_file = self.env_file();
        for (key, value) in updates {
            env_file.set(key, value)?;
        }
        env_file.save()?;
        env_file.ensure_gitignored(&self.project_root)?;

        let mut overrides = self
            .overrides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (key, value) in updates {
            overrides.insert(key.clone(), value.clone());
        }
        let keys = updates.iter().map(|(key, _)| key.clone()).collect::<Vec<_>>();
        tracing::info!(keys = ?keys, env_file = %self.env_path.display(), "config updated");
        Ok(keys)
    }

    /// Every secret-looking key with a non-empty value, for message redaction.
    pub fn secret_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in self.env_file().entries() {
            pairs.insert(key.to_string(), value.to_string());
        }
        for (key, value) in std::env::vars() {
            pairs.insert(key, value);
        }
        pairs.extend(self.overrides());
        pairs
            .into_iter()
            .filter(|(key, value)| is_secret_key(key) && !value.is_empty())
            .collect()
    }
}
