use super::subgraph::SubGraph;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Builder = Arc<dyn Fn() -> SubGraph + Send + Sync>;

/// Rust-coded subgraphs addressable from a process file's `module` field.
/// Locators found here win over YAML files on disk.
#[derive(Clone, Default)]
pub struct SubGraphCatalog {
    builders: BTreeMap<String, Builder>,
}

impl SubGraphCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, locator: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> SubGraph + Send + Sync + 'static,
    {
        self.register(locator, build);
        self
    }

    pub fn register<F>(&mut self, locator: impl Into<String>, build: F)
    where
        F: Fn() -> SubGraph + Send + Sync + 'static,
    {
        self.builders.insert(locator.into(), Arc::new(build));
    }

    pub fn build(&self, locator: &str) -> Option<SubGraph> {
        self.builders.get(locator).map(|build| build())
    }

    pub fn locators(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for SubGraphCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubGraphCatalog")
            .field("locators", &self.locators())
            .finish()
    }
}
