use super::cancel::{sleep_with_stop, CancelFlag};
use super::error::OrchestratorError;
use super::process::ProcessGraph;
use super::runner::{CycleRunner, ExecutionSafetyLimits, RunOutcome};
use crate::safe_json::SafeJsonOptions;
use crate::shared::ids::WorkerName;
use crate::state_store::{RunPhase, StateStore};
use crate::tools::Registry;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

const STOP_POLL: Duration = Duration::from_millis(200);

/// Environment variable names tried for a missing config key, in order.
pub fn env_candidates(key: &str) -> Vec<String> {
    let upper = key.to_ascii_uppercase();
    let mut candidates = vec![upper.clone()];
    if !upper.starts_with("API_") {
        candidates.push(format!("API_{upper}"));
    }
    candidates
}

/// One named worker: a process graph bound to its own state store.
pub struct Worker {
    name: WorkerName,
    store: StateStore,
    graph: Arc<ProcessGraph>,
    tools: Arc<Registry>,
    cancel: CancelFlag,
    limits: ExecutionSafetyLimits,
    safe_json: SafeJsonOptions,
    env: EnvLookup,
}

impl Worker {
    pub fn new(name: WorkerName, store: StateStore, graph: Arc<ProcessGraph>) -> Self {
        Self {
            name,
            store,
            graph,
            tools: Arc::new(Registry::empty()),
            cancel: CancelFlag::new(),
            limits: ExecutionSafetyLimits::default(),
            safe_json: SafeJsonOptions::default(),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
        }
    }

    pub fn with_tools(mut self, tools: Arc<Registry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionSafetyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_safe_json(mut self, options: SafeJsonOptions) -> Self {
        self.safe_json = options;
        self
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &WorkerName {
        &self.name
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn graph(&self) -> &ProcessGraph {
        &self.graph
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// `job_meta` first, environment second. A required key found nowhere
    /// refuses the run.
    pub fn resolve_config(&self) -> Result<Map<String, Value>, OrchestratorError> {
        let mut config = Map::new();
        for (key, value) in self.store.meta_all()? {
            config.insert(key, Value::String(value));
        }
        for key in self.graph.process.required_config() {
            let present = config
                .get(&key)
                .and_then(Value::as_str)
                .is_some_and(|value| !value.trim().is_empty());
            if present {
                continue;
            }
            let fallback = env_candidates(&key)
                .iter()
                .find_map(|candidate| (self.env)(candidate).filter(|v| !v.trim().is_empty()));
            match fallback {
                Some(value) => {
                    config.insert(key, Value::String(value));
                }
                None => return Err(OrchestratorError::MissingConfig { key }),
            }
        }
        config
            .entry("max_retries")
            .or_insert_with(|| Value::from(self.limits.max_retries));
        Ok(config)
    }

    pub fn run_cycle(&self) -> Result<RunOutcome, OrchestratorError> {
        let config = self.resolve_config()?;
        CycleRunner {
            worker: self.name.as_str(),
            store: &self.store,
            graph: &self.graph,
            tools: &self.tools,
            cancel: &self.cancel,
            limits: self.limits,
            safe_json: self.safe_json,
        }
        .run(config)
    }

    /// Repeats cycles until cancelled, sleeping `interval` between them.
    /// Returns the number of cycles started.
    pub fn run_forever(&self, interval: Duration) -> Result<u32, OrchestratorError> {
        let mut cycles = 0u32;
        loop {
            cycles += 1;
            let outcome = self.run_cycle()?;
            if outcome.status == RunPhase::Cancelled {
                self.store.clear_cancel()?;
                tracing::info!(worker = %self.name, cycles, "worker stopped by cancel");
                return Ok(cycles);
            }
            if !sleep_with_stop(self.cancel.as_atomic(), interval, STOP_POLL) {
                tracing::info!(worker = %self.name, cycles, "worker stopped during interval");
                return Ok(cycles);
            }
        }
    }
}
