use crate::config::{redact_message, RuntimeEnv, ServerSettings};
use crate::tools::reload::decide;
use crate::tools::{
    discover, HandlerTable, Registry, RegistryFingerprint, ReloadReason, ReloadRequest,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Process-wide gateway state. Tests build their own.
pub struct Server {
    settings: ServerSettings,
    env: RuntimeEnv,
    handlers: HandlerTable,
    registry: RwLock<Arc<Registry>>,
    /// Last fingerprint seen. Holding this lock also serialises rebuilds.
    fingerprint: Mutex<Option<RegistryFingerprint>>,
}

impl Server {
    pub fn new(settings: ServerSettings, handlers: HandlerTable) -> Self {
        let env = RuntimeEnv::new(settings.project_root.clone());
        let server = Self {
            settings,
            env,
            handlers,
            registry: RwLock::new(Arc::new(Registry::empty())),
            fingerprint: Mutex::new(None),
        };
        server.refresh(true);
        server
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuilds the registry when the reload rules say so. Returns the reason
    /// for a rebuild, `None` when the current snapshot was kept.
    pub fn refresh(&self, explicit: bool) -> Option<ReloadReason> {
        let mut last_seen = self
            .fingerprint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current =
            RegistryFingerprint::capture(&self.settings.tools_dir, &self.settings.specs_dir);
        let request = ReloadRequest {
            explicit,
            forced: self.settings.force_reload,
            auto_reload: self.settings.auto_reload,
            registry_len: self.registry().len(),
        };
        let reason = decide(&request, &current, last_seen.as_ref())?;

        let started = Instant::now();
        let discovery = discover(
            &self.settings.tools_dir,
            &self.settings.specs_dir,
            &self.handlers,
        );
        let registry = Registry::from_entries(
            discovery.entries,
            discovery.errors,
            self.settings.safe_json,
        );
        tracing::info!(
            reason = %reason,
            tools = registry.len(),
            load_errors = registry.load_errors().len(),
            etag = registry.etag(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool registry rebuilt"
        );
        *self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(registry);
        *last_seen = Some(current);
        Some(reason)
    }

    /// `refresh` on the blocking pool.
    pub async fn refresh_off_runtime(self: &Arc<Self>, explicit: bool) -> Option<ReloadReason> {
        let server = Arc::clone(self);
        match tokio::task::spawn_blocking(move || server.refresh(explicit)).await {
            Ok(reason) => reason,
            Err(err) => {
                tracing::warn!(error = %err, "registry refresh task failed");
                None
            }
        }
    }

    pub fn redact(&self, message: &str) -> String {
        let pairs = self.env.secret_pairs();
        redact_message(
            message,
            pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())),
        )
    }
}
