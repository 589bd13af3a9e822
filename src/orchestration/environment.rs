use super::cancel::CancelFlag;
use super::error::OrchestratorError;
use super::node::EffectKind;
use super::transforms::{self, TransformContext};
use crate::safe_json::{self, SafeJsonOptions};
use crate::tools::{Payload, Registry, ToolError, ToolFailure, ToolOutput};
use serde_json::{json, Map, Value};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// The one effect a step performed.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRecord {
    pub kind: EffectKind,
    pub name: String,
    pub params: Map<String, Value>,
    pub result: Option<Value>,
}

impl EffectRecord {
    pub fn call_json(&self) -> Value {
        json!({
            "kind": self.kind.as_str(),
            "name": self.name,
            "params": Value::Object(self.params.clone()),
        })
    }
}

/// Handed to a step for the duration of one run. Counts effects and refuses
/// every call after the first.
pub struct Environment<'a> {
    node: &'a str,
    tools: &'a Registry,
    safe_json: SafeJsonOptions,
    cancel: &'a CancelFlag,
    started: Instant,
    timeout: Option<Duration>,
    effect: Option<EffectRecord>,
    refused: u32,
}

impl<'a> Environment<'a> {
    pub fn new(node: &'a str, tools: &'a Registry, cancel: &'a CancelFlag) -> Self {
        Self {
            node,
            tools,
            safe_json: SafeJsonOptions::default(),
            cancel,
            started: Instant::now(),
            timeout: None,
            effect: None,
            refused: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_safe_json(mut self, options: SafeJsonOptions) -> Self {
        self.safe_json = options;
        self
    }

    pub fn node(&self) -> &str {
        self.node
    }

    pub fn effect_count(&self) -> u32 {
        u32::from(self.effect.is_some()) + self.refused
    }

    pub fn effect(&self) -> Option<&EffectRecord> {
        self.effect.as_ref()
    }

    pub fn into_effect(self) -> Option<EffectRecord> {
        self.effect
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.started + timeout)
    }

    fn timed_out(&self) -> OrchestratorError {
        OrchestratorError::StepTimeout {
            node: self.node.to_string(),
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        }
    }

    fn claim(
        &mut self,
        kind: EffectKind,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<(), OrchestratorError> {
        if self.effect.is_some() {
            self.refused += 1;
            return Err(OrchestratorError::one_effect(self.node, self.effect_count()));
        }
        self.effect = Some(EffectRecord {
            kind,
            name: name.to_string(),
            params: params.clone(),
            result: None,
        });
        Ok(())
    }

    fn record_result(&mut self, result: &Value) {
        if let Some(effect) = self.effect.as_mut() {
            effect.result = Some(result.clone());
        }
    }

    /// Invokes a registered tool. Streams are drained into an array; a step
    /// never sees a lazy sequence.
    pub fn tool(
        &mut self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, OrchestratorError> {
        self.claim(EffectKind::Tool, name, &params)?;
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| OrchestratorError::Tool {
                tool: name.to_string(),
                source: ToolError::not_found(name),
            })?;
        let options = self.safe_json;
        let tool_name = name.to_string();
        let call = move || collect_output(entry.invoke(&params), options);

        let outcome = match self.deadline() {
            None => call(),
            Some(deadline) => {
                let (tx, rx) = mpsc::channel();
                thread::spawn(move || {
                    let _ = tx.send(call());
                });
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(self.timed_out()),
                }
            }
        };
        let value = outcome.map_err(|failure| OrchestratorError::Tool {
            tool: tool_name.clone(),
            source: match failure {
                ToolFailure::InvalidParameters(detail) => ToolError::InvalidParameters {
                    tool: tool_name.clone(),
                    detail,
                },
                ToolFailure::Execution(detail) => ToolError::Execution {
                    tool: Some(tool_name.clone()),
                    detail,
                },
            },
        })?;
        self.record_result(&value);
        Ok(value)
    }

    pub fn transform(
        &mut self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, OrchestratorError> {
        self.claim(EffectKind::Transform, name, &params)?;
        let context = TransformContext::new(self.cancel.clone()).with_deadline(self.deadline());
        let value = transforms::run_transform(name, &params, &context)?;
        self.record_result(&value);
        Ok(value)
    }
}

fn collect_output(
    output: Result<ToolOutput, ToolFailure>,
    options: SafeJsonOptions,
) -> Result<Value, ToolFailure> {
    match output? {
        ToolOutput::Value(payload) => Ok(safe_json::sanitize(&payload, options)),
        ToolOutput::Stream(chunks) => {
            let collected = chunks.collect::<Result<Vec<Payload>, ToolFailure>>()?;
            Ok(safe_json::sanitize(&Payload::List(collected), options))
        }
    }
}
