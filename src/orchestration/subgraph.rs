use super::definition::SubGraphFile;
use super::error::OrchestratorError;
use super::node::{split_qualified, Directive, Node};
use super::nodes::node_from_file;
use std::collections::BTreeMap;

/// A connected set of nodes with labelled exits. `exits` maps each exit
/// label to the terminal marker reported when the cycle ends there.
#[derive(Debug, Clone)]
pub struct SubGraph {
    pub name: String,
    pub entry: String,
    pub nodes: BTreeMap<String, Node>,
    pub exits: BTreeMap<String, String>,
}

impl SubGraph {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            nodes: BTreeMap::new(),
            exits: BTreeMap::new(),
        }
    }

    pub fn with_node(mut self, name: impl Into<String>, node: Node) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    pub fn with_exit(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.exits.insert(label.clone(), label.to_ascii_uppercase());
        self
    }

    pub fn from_file(file: &SubGraphFile, origin: &str) -> Result<Self, OrchestratorError> {
        let mut nodes = BTreeMap::new();
        for (name, node) in &file.nodes {
            let node =
                node_from_file(name, node).map_err(|reason| OrchestratorError::definition(origin, reason))?;
            nodes.insert(name.clone(), node);
        }
        let subgraph = Self {
            name: file.name.trim().to_string(),
            entry: file.entry.trim().to_string(),
            nodes,
            exits: file.exits.clone(),
        };
        subgraph.validate(origin)?;
        Ok(subgraph)
    }

    pub fn declares_exit(&self, label: &str) -> bool {
        self.exits.contains_key(label)
    }

    /// Local consistency. Cross-subgraph `SG::NODE` targets are checked by the
    /// process graph, which knows the other parts.
    pub fn validate(&self, origin: &str) -> Result<(), OrchestratorError> {
        let fail = |reason: String| Err(OrchestratorError::definition(origin, reason));
        if self.name.is_empty() {
            return fail("subgraph name must be non-empty".to_string());
        }
        if !self.nodes.contains_key(&self.entry) {
            return fail(format!(
                "subgraph `{}` entry node `{}` does not exist",
                self.name, self.entry
            ));
        }
        for (node_name, node) in &self.nodes {
            for route in node.routes() {
                match route {
                    Directive::Next(target) if split_qualified(&target).is_none() => {
                        if !self.nodes.contains_key(&target) {
                            return fail(format!(
                                "node `{}::{node_name}` routes to unknown node `{target}`",
                                self.name
                            ));
                        }
                    }
                    Directive::Next(_) => {}
                    Directive::Exit(label) => {
                        if !self.declares_exit(&label) {
                            return fail(format!(
                                "node `{}::{node_name}` uses undeclared exit `{label}`",
                                self.name
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
