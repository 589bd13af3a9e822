pub mod error;
pub mod handler;
pub mod loader;
pub mod payload;
pub mod registry;
pub mod reload;
pub mod spec;

pub use error::{ToolError, ToolErrorKind};
pub use handler::{ChunkStream, FnHandler, HandlerTable, ToolFailure, ToolHandler, ToolOutput};
pub use loader::{discover, Discovery, LoadError};
pub use payload::Payload;
pub use registry::{CatalogEntry, Registry, ToolEntry};
pub use reload::{ReloadReason, ReloadRequest, RegistryFingerprint};
pub use spec::{ToolCategory, ToolSpec};
