use super::handler::{ToolFailure, ToolHandler, ToolOutput};
use super::loader::LoadError;
use super::spec::ToolSpec;
use crate::safe_json::{self, SafeJsonOptions};
use crate::shared::hash::sha1_hex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const FIRST_TOOL_ID: u32 = 10_000;

/// Runtime binding of a loaded spec to its handler.
#[derive(Clone)]
pub struct ToolEntry {
    pub id: u32,
    pub spec: ToolSpec,
    /// Compact JSON of the spec file as loaded.
    pub serialized_spec: String,
    invoker: Arc<dyn ToolHandler>,
}

impl ToolEntry {
    pub fn new(id: u32, spec: ToolSpec, serialized_spec: String, invoker: Arc<dyn ToolHandler>) -> Self {
        Self {
            id,
            spec,
            serialized_spec,
            invoker,
        }
    }

    pub fn name(&self) -> &str {
        self.spec.name.as_str()
    }

    pub fn display_name(&self) -> &str {
        self.spec.display_name()
    }

    pub fn description(&self) -> &str {
        &self.spec.description
    }

    pub fn invoke(&self, params: &Map<String, Value>) -> Result<ToolOutput, ToolFailure> {
        self.spec
            .check_params(params)
            .map_err(ToolFailure::InvalidParameters)?;
        self.invoker.run(params)
    }
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEntry")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// One element of the `GET /tools` array. The invoker never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: u32,
    pub name: String,
    pub reg_name: String,
    pub display_name: String,
    pub description: String,
    pub json: String,
}

impl From<&ToolEntry> for CatalogEntry {
    fn from(entry: &ToolEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name().to_string(),
            reg_name: entry.name().to_string(),
            display_name: entry.display_name().to_string(),
            description: entry.description().to_string(),
            json: entry.serialized_spec.clone(),
        }
    }
}

/// Immutable snapshot of the loaded tools. A rebuild produces a new snapshot;
/// the previous one is never mutated.
#[derive(Debug)]
pub struct Registry {
    entries: BTreeMap<String, Arc<ToolEntry>>,
    catalog_json: String,
    etag: String,
    load_errors: Vec<LoadError>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::from_entries(Vec::new(), Vec::new(), SafeJsonOptions::default())
    }

    pub fn from_entries(
        entries: Vec<ToolEntry>,
        load_errors: Vec<LoadError>,
        options: SafeJsonOptions,
    ) -> Self {
        let mut by_name = BTreeMap::new();
        for entry in entries {
            by_name
                .entry(entry.name().to_string())
                .or_insert_with(|| Arc::new(entry));
        }
        let catalog = by_name
            .values()
            .map(|entry| CatalogEntry::from(entry.as_ref()))
            .collect::<Vec<_>>();
        let catalog_value = serde_json::to_value(&catalog).unwrap_or(Value::Array(Vec::new()));
        let catalog_json = safe_json::encode_value(&catalog_value, options);
        let etag = catalog_etag(catalog_json.as_bytes());
        Self {
            entries: by_name,
            catalog_json,
            etag,
            load_errors,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.entries.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.entries
            .values()
            .map(|entry| CatalogEntry::from(entry.as_ref()))
            .collect()
    }

    /// Sorted catalog as compact, sanitised JSON; the ETag is computed over
    /// exactly these bytes.
    pub fn catalog_json(&self) -> &str {
        &self.catalog_json
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn load_errors(&self) -> &[LoadError] {
        &self.load_errors
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

pub fn catalog_etag(bytes: &[u8]) -> String {
    sha1_hex(bytes)
}
