use super::environment::Environment;
use super::error::OrchestratorError;
use super::state::CycleState;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const QUALIFIER: &str = "::";

/// What a node hands back to the runner. Routing is data, never unwinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// `NODE` in the current subgraph or `SG::NODE` elsewhere.
    Next(String),
    Exit(String),
}

impl Directive {
    pub fn next(target: impl Into<String>) -> Self {
        Self::Next(target.into())
    }

    pub fn exit(label: impl Into<String>) -> Self {
        Self::Exit(label.into())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Next(target) => json!({ "next": target }),
            Self::Exit(label) => json!({ "exit": label }),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(target) => write!(f, "next({target})"),
            Self::Exit(label) => write!(f, "exit({label})"),
        }
    }
}

pub fn split_qualified(target: &str) -> Option<(&str, &str)> {
    target.split_once(QUALIFIER)
}

pub fn qualify(subgraph: &str, node: &str) -> String {
    format!("{subgraph}{QUALIFIER}{node}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Tool,
    Transform,
    /// A Rust-coded step whose effect is only known at run time.
    Custom,
}

impl EffectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Transform => "transform",
            Self::Custom => "custom",
        }
    }
}

/// Side-effectful node: exactly one `env.tool(..)` or `env.transform(..)`
/// per run. The runner stores the effect's result; steps only read state.
pub trait Step: Send + Sync {
    fn run(
        &self,
        env: &mut Environment<'_>,
        state: &CycleState,
    ) -> Result<Directive, OrchestratorError>;

    fn effect_kind(&self) -> EffectKind {
        EffectKind::Custom
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// State path that also receives the effect result.
    fn save_as(&self) -> Option<&str> {
        None
    }

    /// Directives the node can return, when statically known.
    fn routes(&self) -> Vec<Directive> {
        Vec::new()
    }
}

/// Pure branching node. It never sees an [`Environment`], so it cannot
/// perform effects.
pub trait Cond: Send + Sync {
    fn decide(&self, state: &CycleState) -> Result<Directive, OrchestratorError>;

    fn routes(&self) -> Vec<Directive> {
        Vec::new()
    }
}

#[derive(Clone)]
pub enum Node {
    Step(Arc<dyn Step>),
    Cond(Arc<dyn Cond>),
}

impl Node {
    pub fn step(step: impl Step + 'static) -> Self {
        Self::Step(Arc::new(step))
    }

    pub fn cond(cond: impl Cond + 'static) -> Self {
        Self::Cond(Arc::new(cond))
    }

    pub fn routes(&self) -> Vec<Directive> {
        match self {
            Self::Step(step) => step.routes(),
            Self::Cond(cond) => cond.routes(),
        }
    }

    pub fn is_cond(&self) -> bool {
        matches!(self, Self::Cond(_))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => write!(f, "Step({})", step.effect_kind().as_str()),
            Self::Cond(_) => write!(f, "Cond"),
        }
    }
}

/// Adapts a closure into a [`Step`].
pub struct FnStep<F> {
    run: F,
    kind: EffectKind,
    save_as: Option<String>,
    timeout: Option<Duration>,
}

impl<F> FnStep<F>
where
    F: Fn(&mut Environment<'_>, &CycleState) -> Result<Directive, OrchestratorError>
        + Send
        + Sync,
{
    pub fn new(run: F) -> Self {
        Self {
            run,
            kind: EffectKind::Custom,
            save_as: None,
            timeout: None,
        }
    }

    pub fn with_kind(mut self, kind: EffectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_save_as(mut self, path: impl Into<String>) -> Self {
        self.save_as = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<F> Step for FnStep<F>
where
    F: Fn(&mut Environment<'_>, &CycleState) -> Result<Directive, OrchestratorError>
        + Send
        + Sync,
{
    fn run(
        &self,
        env: &mut Environment<'_>,
        state: &CycleState,
    ) -> Result<Directive, OrchestratorError> {
        (self.run)(env, state)
    }

    fn effect_kind(&self) -> EffectKind {
        self.kind
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn save_as(&self) -> Option<&str> {
        self.save_as.as_deref()
    }
}

/// Adapts a closure into a [`Cond`].
pub struct FnCond<F>(F);

impl<F> FnCond<F>
where
    F: Fn(&CycleState) -> Result<Directive, OrchestratorError> + Send + Sync,
{
    pub fn new(decide: F) -> Self {
        Self(decide)
    }
}

impl<F> Cond for FnCond<F>
where
    F: Fn(&CycleState) -> Result<Directive, OrchestratorError> + Send + Sync,
{
    fn decide(&self, state: &CycleState) -> Result<Directive, OrchestratorError> {
        (self.0)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_targets_split_once() {
        assert_eq!(split_qualified("SCORE::RUN"), Some(("SCORE", "RUN")));
        assert_eq!(split_qualified("RUN"), None);
        assert_eq!(qualify("A", "B"), "A::B");
        assert_eq!(Directive::exit("done").to_json(), json!({"exit": "done"}));
    }
}
