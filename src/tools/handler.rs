use super::payload::Payload;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Failure raised by a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolFailure {
    /// Argument shape mismatch detected at call time.
    #[error("{0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Execution(String),
}

impl ToolFailure {
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidParameters(message) | Self::Execution(message) => message,
        }
    }
}

pub type ChunkStream = Box<dyn Iterator<Item = Result<Payload, ToolFailure>> + Send>;

pub enum ToolOutput {
    Value(Payload),
    /// Lazily produced chunks; the gateway bridges these to SSE.
    Stream(ChunkStream),
}

impl ToolOutput {
    pub fn stream<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Payload, ToolFailure>>,
        I::IntoIter: Send + 'static,
    {
        Self::Stream(Box::new(chunks.into_iter()))
    }
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(payload) => f.debug_tuple("Value").field(payload).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Payload> for ToolOutput {
    fn from(value: Payload) -> Self {
        Self::Value(value)
    }
}

pub trait ToolHandler: Send + Sync {
    fn run(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolFailure>;
}

pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&Map<String, Value>) -> Result<ToolOutput, ToolFailure> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&Map<String, Value>) -> Result<ToolOutput, ToolFailure> + Send + Sync,
{
    fn run(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolFailure> {
        (self.0)(params)
    }
}

/// Compile-time dispatch map from handler name to implementation. Tool spec
/// files found on disk are paired with an entry here by the loader.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        Self::new().with_fn("echo", echo)
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.insert(name, handler);
        self
    }

    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<ToolOutput, ToolFailure> + Send + Sync + 'static,
    {
        self.with_handler(name, Arc::new(FnHandler::new(f)))
    }

    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Returns its parameters. With `stream: [..]` each element becomes one chunk.
fn echo(params: &Map<String, Value>) -> Result<ToolOutput, ToolFailure> {
    match params.get("stream") {
        Some(Value::Array(items)) => {
            let chunks = items
                .clone()
                .into_iter()
                .map(|item| Ok(Payload::from(item)))
                .collect::<Vec<_>>();
            Ok(ToolOutput::stream(chunks))
        }
        Some(_) => Err(ToolFailure::InvalidParameters(
            "echo() argument `stream` must be an array".to_string(),
        )),
        None => Ok(ToolOutput::Value(Payload::from(Value::Object(
            params.clone(),
        )))),
    }
}
