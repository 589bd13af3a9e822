use super::cancel::CancelFlag;
use super::environment::Environment;
use super::error::OrchestratorError;
use super::metrics::preview;
use super::node::{qualify, split_qualified, Directive, Node, Step};
use super::process::{is_end_marker, ProcessGraph};
use super::state::CycleState;
use crate::safe_json::SafeJsonOptions;
use crate::shared::hash::sha1_hex;
use crate::shared::time::{now_iso, run_id_for};
use crate::state_store::{
    kv_keys, CrashRecord, RunPhase, RunSpan, StateStore, StepRecord, StepStatus,
};
use crate::tools::Registry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const RETRY_EXIT: &str = "retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSafetyLimits {
    pub max_node_visits: u32,
    pub run_timeout_seconds: u64,
    pub step_timeout_seconds: u64,
    /// Seeded into `config.max_retries` for userland retry loops.
    pub max_retries: u32,
}

impl Default for ExecutionSafetyLimits {
    fn default() -> Self {
        Self {
            max_node_visits: 10_000,
            run_timeout_seconds: 3600,
            step_timeout_seconds: 900,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunPhase,
    pub exit_label: Option<String>,
    pub steps: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    part: String,
    node: String,
}

impl Cursor {
    fn qualified(&self) -> String {
        qualify(&self.part, &self.node)
    }
}

enum Hop {
    Move(Cursor),
    Finish(String),
}

enum Finish {
    Completed(String),
    Cancelled,
}

struct Failure {
    node: String,
    error: OrchestratorError,
}

/// Walks one cycle of a process graph against one worker store.
pub struct CycleRunner<'a> {
    pub worker: &'a str,
    pub store: &'a StateStore,
    pub graph: &'a ProcessGraph,
    pub tools: &'a Registry,
    pub cancel: &'a CancelFlag,
    pub limits: ExecutionSafetyLimits,
    pub safe_json: SafeJsonOptions,
}

impl CycleRunner<'_> {
    /// Runs exactly one cycle. Store failures during setup are returned as
    /// errors; everything after `run_audit` is opened ends up in the outcome.
    pub fn run(&self, config: Map<String, Value>) -> Result<RunOutcome, OrchestratorError> {
        let pid = std::process::id();
        let started_at = now_iso();
        let run_id = run_id_for(pid, &started_at);
        let fingerprint = sha1_hex(
            serde_json::to_string(&self.store.meta_all()?)
                .unwrap_or_default()
                .as_bytes(),
        );

        self.store.state_set(kv_keys::PID, &pid.to_string())?;
        self.store
            .state_set(kv_keys::PHASE, RunPhase::Starting.as_str())?;
        self.store.state_set(kv_keys::WORKER_NAME, self.worker)?;
        self.store.state_set(kv_keys::RUN_ID, &run_id)?;
        self.store.state_set(kv_keys::UPDATED_AT, &started_at)?;
        self.store.begin_run(&RunSpan {
            run_id: run_id.clone(),
            worker: self.worker.to_string(),
            pid,
            started_at: started_at.clone(),
            config_fingerprint: fingerprint,
        })?;
        self.store
            .state_set(kv_keys::PHASE, RunPhase::Running.as_str())?;
        tracing::info!(
            worker = %self.worker,
            run_id = %run_id,
            process = %self.graph.process.name,
            "run started"
        );

        let mut state = CycleState::new();
        state.set("config", Value::Object(config));
        state.set("worker", Value::String(self.worker.to_string()));
        state.set("run_id", Value::String(run_id.clone()));

        let mut steps = 0u32;
        let walked = self.walk(&mut state, &run_id, &mut steps);
        let ended_at = now_iso();
        let outcome = match walked {
            Ok(Finish::Completed(label)) => {
                self.store
                    .end_run(&run_id, &ended_at, RunPhase::Completed, None)?;
                RunOutcome {
                    run_id,
                    status: RunPhase::Completed,
                    exit_label: Some(label),
                    steps,
                    error: None,
                }
            }
            Ok(Finish::Cancelled) => {
                self.store
                    .end_run(&run_id, &ended_at, RunPhase::Cancelled, None)?;
                RunOutcome {
                    run_id,
                    status: RunPhase::Cancelled,
                    exit_label: None,
                    steps,
                    error: None,
                }
            }
            Err(failure) => {
                let message = failure.error.to_string();
                tracing::warn!(
                    worker = %self.worker,
                    run_id = %run_id,
                    node = %failure.node,
                    kind = failure.error.kind(),
                    error = %message,
                    "run failed"
                );
                self.store.insert_crash(&CrashRecord {
                    worker: self.worker.to_string(),
                    ts: ended_at.clone(),
                    cycle_id: run_id.clone(),
                    node: failure.node,
                    message: message.clone(),
                })?;
                self.store
                    .end_run(&run_id, &ended_at, RunPhase::Failed, Some(&message))?;
                RunOutcome {
                    run_id,
                    status: RunPhase::Failed,
                    exit_label: None,
                    steps,
                    error: Some(message),
                }
            }
        };

        self.store.state_set(kv_keys::PHASE, outcome.status.as_str())?;
        self.store.state_set(kv_keys::UPDATED_AT, &ended_at)?;
        tracing::info!(
            worker = %self.worker,
            run_id = %outcome.run_id,
            status = %outcome.status,
            steps = outcome.steps,
            "run finished"
        );
        Ok(outcome)
    }

    fn cancelled(&self) -> Result<bool, OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        Ok(self.store.cancel_requested()?)
    }

    fn walk(
        &self,
        state: &mut CycleState,
        run_id: &str,
        steps: &mut u32,
    ) -> Result<Finish, Failure> {
        let clock = Instant::now();
        let run_timeout = Duration::from_secs(self.limits.run_timeout_seconds);
        let entry_part = self.graph.process.entry.clone();
        let entry_node = self
            .graph
            .subgraph(&entry_part)
            .map(|subgraph| subgraph.entry.clone())
            .ok_or_else(|| Failure {
                node: entry_part.clone(),
                error: OrchestratorError::routing(&entry_part, "entry part has no subgraph"),
            })?;
        let mut cursor = Cursor {
            part: entry_part,
            node: entry_node,
        };
        let mut visits = 0u32;

        loop {
            let qualified = cursor.qualified();
            let fail = |error: OrchestratorError| Failure {
                node: qualified.clone(),
                error,
            };

            match self.cancelled() {
                Ok(true) => {
                    tracing::info!(run_id, node = %qualified, "cancel observed before node");
                    return Ok(Finish::Cancelled);
                }
                Ok(false) => {}
                Err(error) => return Err(fail(error)),
            }
            visits += 1;
            if visits > self.limits.max_node_visits {
                return Err(fail(OrchestratorError::MaxVisitsExceeded {
                    max_visits: self.limits.max_node_visits,
                }));
            }
            let out_of_time = || OrchestratorError::RunTimeout {
                run_timeout_seconds: self.limits.run_timeout_seconds,
            };
            if clock.elapsed() > run_timeout {
                return Err(fail(out_of_time()));
            }

            let node = self
                .graph
                .subgraph(&cursor.part)
                .and_then(|subgraph| subgraph.nodes.get(&cursor.node))
                .cloned()
                .ok_or_else(|| {
                    fail(OrchestratorError::routing(&qualified, "node does not exist"))
                })?;
            state.set("current_node", Value::String(qualified.clone()));
            self.store
                .state_set(kv_keys::CURRENT_NODE, &qualified)
                .map_err(|err| fail(err.into()))?;

            let directive = match node {
                Node::Cond(cond) => cond.decide(state).map_err(fail)?,
                Node::Step(step) => {
                    *steps += 1;
                    let budget = run_timeout.saturating_sub(clock.elapsed());
                    let result = self.run_step(&qualified, &step, state, run_id, budget);
                    if clock.elapsed() >= run_timeout {
                        return Err(fail(out_of_time()));
                    }
                    match result {
                        Ok(directive) => directive,
                        Err(OrchestratorError::StepTimeout { .. }) if self.retry_mapped(&cursor) => {
                            tracing::info!(run_id, node = %qualified, "step timed out, taking retry exit");
                            Directive::exit(RETRY_EXIT)
                        }
                        Err(error) => return Err(fail(error)),
                    }
                }
            };
            if clock.elapsed() > run_timeout {
                return Err(fail(out_of_time()));
            }

            match self.route(&cursor, &directive).map_err(fail)? {
                Hop::Move(next) => cursor = next,
                Hop::Finish(label) => return Ok(Finish::Completed(label)),
            }
        }
    }

    fn retry_mapped(&self, cursor: &Cursor) -> bool {
        let declared = self
            .graph
            .subgraph(&cursor.part)
            .is_some_and(|subgraph| subgraph.declares_exit(RETRY_EXIT));
        let mapped = self
            .graph
            .part(&cursor.part)
            .is_some_and(|part| part.next_map.contains_key(RETRY_EXIT));
        declared && mapped
    }

    fn route(&self, cursor: &Cursor, directive: &Directive) -> Result<Hop, OrchestratorError> {
        let here = cursor.qualified();
        match directive {
            Directive::Next(target) => {
                let (part, node) = split_qualified(target)
                    .unwrap_or((cursor.part.as_str(), target.as_str()));
                let exists = self
                    .graph
                    .subgraph(part)
                    .is_some_and(|subgraph| subgraph.nodes.contains_key(node));
                if !exists {
                    return Err(OrchestratorError::routing(
                        here,
                        format!("next target `{target}` does not exist"),
                    ));
                }
                Ok(Hop::Move(Cursor {
                    part: part.to_string(),
                    node: node.to_string(),
                }))
            }
            Directive::Exit(label) => {
                let mapped = self
                    .graph
                    .part(&cursor.part)
                    .and_then(|part| part.next_map.get(label));
                match mapped {
                    Some(target) if is_end_marker(target) => Ok(Hop::Finish(label.clone())),
                    Some(target) => {
                        let target = target.trim();
                        let subgraph = self.graph.subgraph(target).ok_or_else(|| {
                            OrchestratorError::routing(
                                &here,
                                format!("exit `{label}` maps to unknown part `{target}`"),
                            )
                        })?;
                        Ok(Hop::Move(Cursor {
                            part: target.to_string(),
                            node: subgraph.entry.clone(),
                        }))
                    }
                    None => {
                        let declared = self
                            .graph
                            .subgraph(&cursor.part)
                            .is_some_and(|subgraph| subgraph.declares_exit(label));
                        if declared {
                            Ok(Hop::Finish(label.clone()))
                        } else {
                            Err(OrchestratorError::routing(
                                here,
                                format!("exit `{label}` is neither mapped nor declared"),
                            ))
                        }
                    }
                }
            }
        }
    }

    /// The step harness: one environment, exactly one effect, bounded time,
    /// one `job_steps` row whatever happens.
    fn run_step(
        &self,
        qualified: &str,
        step: &Arc<dyn Step>,
        state: &mut CycleState,
        run_id: &str,
        budget: Duration,
    ) -> Result<Directive, OrchestratorError> {
        let timeout = step
            .timeout()
            .unwrap_or(Duration::from_secs(self.limits.step_timeout_seconds))
            .min(budget);
        let started_at = now_iso();
        let clock = Instant::now();

        let mut env = Environment::new(qualified, self.tools, self.cancel)
            .with_timeout(Some(timeout))
            .with_safe_json(self.safe_json);
        let returned = step.run(&mut env, state);
        let effects = env.effect_count();
        let effect = env.into_effect();
        let elapsed = clock.elapsed();

        let outcome = match returned {
            Ok(_) if effects != 1 => Err(OrchestratorError::one_effect(qualified, effects)),
            Ok(_) if elapsed > timeout => Err(OrchestratorError::StepTimeout {
                node: qualified.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            other => other,
        };

        let result = effect.as_ref().and_then(|effect| effect.result.clone());
        if outcome.is_ok() {
            if let Some(result) = &result {
                state.set("last_result", result.clone());
                if let Some(path) = step.save_as() {
                    state.set(path, result.clone());
                }
            }
        }

        let status = match &outcome {
            Ok(_) => StepStatus::Ok,
            Err(OrchestratorError::StepTimeout { .. }) => StepStatus::Timeout,
            Err(_) => StepStatus::Error,
        };
        let details = json!({
            "call": effect.as_ref().map(|effect| effect.call_json()),
            "directive": outcome.as_ref().ok().map(Directive::to_json),
            "last_result_preview": result.as_ref().map(preview),
            "error": outcome.as_ref().err().map(|err| json!({
                "kind": err.kind(),
                "message": err.to_string(),
            })),
        });
        let duration_ms = elapsed.as_millis() as u64;
        self.store.insert_step(&StepRecord {
            worker: self.worker.to_string(),
            run_id: Some(run_id.to_string()),
            node: qualified.to_string(),
            status,
            duration_ms,
            details,
            started_at,
        })?;
        tracing::debug!(node = qualified, status = %status, duration_ms, "step audited");
        outcome
    }
}
