use super::catalog::SubGraphCatalog;
use super::definition::{read_yaml, ProcessFile, SubGraphFile};
use super::error::OrchestratorError;
use super::node::{split_qualified, Directive};
use super::subgraph::SubGraph;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const END_MARKER: &str = "END";

pub fn is_end_marker(target: &str) -> bool {
    target.trim().eq_ignore_ascii_case(END_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGraphRef {
    pub name: String,
    pub module: String,
    /// Exit label of this part to the next part's name, or `END`.
    pub next_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub name: String,
    pub entry: String,
    pub parts: Vec<SubGraphRef>,
    pub metadata: Map<String, Value>,
}

impl Process {
    pub fn from_file(file: ProcessFile) -> Self {
        Self {
            name: file.name.trim().to_string(),
            entry: file.entry.trim().to_string(),
            parts: file
                .parts
                .into_iter()
                .map(|part| SubGraphRef {
                    name: part.name.trim().to_string(),
                    module: part.module.trim().to_string(),
                    next_map: part.next_map,
                })
                .collect(),
            metadata: file.metadata,
        }
    }

    pub fn part(&self, name: &str) -> Option<&SubGraphRef> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Config keys a worker must resolve before a run starts; overridable
    /// with `metadata.required_config`.
    pub fn required_config(&self) -> Vec<String> {
        match self.metadata.get("required_config") {
            Some(Value::Array(keys)) => keys
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => vec![
                "api_base".to_string(),
                "token".to_string(),
                "model".to_string(),
            ],
        }
    }

    pub fn validate(&self, origin: &str) -> Result<(), OrchestratorError> {
        let fail = |reason: String| Err(OrchestratorError::definition(origin, reason));
        if self.name.is_empty() {
            return fail("process name must be non-empty".to_string());
        }
        let mut names = BTreeSet::new();
        for part in &self.parts {
            if part.name.is_empty() {
                return fail("part names must be non-empty".to_string());
            }
            if !names.insert(part.name.as_str()) {
                return fail(format!("duplicate part `{}`", part.name));
            }
        }
        if !names.contains(self.entry.as_str()) {
            return fail(format!("entry `{}` is not a declared part", self.entry));
        }
        for part in &self.parts {
            for (label, target) in &part.next_map {
                if !is_end_marker(target) && !names.contains(target.trim()) {
                    return fail(format!(
                        "part `{}` routes exit `{label}` to undeclared part `{target}`",
                        part.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A validated process with every part resolved to a subgraph.
#[derive(Debug, Clone)]
pub struct ProcessGraph {
    pub process: Process,
    /// Keyed by part name.
    pub subgraphs: BTreeMap<String, SubGraph>,
    pub source: Option<PathBuf>,
}

impl ProcessGraph {
    pub fn new(
        process: Process,
        subgraphs: BTreeMap<String, SubGraph>,
    ) -> Result<Self, OrchestratorError> {
        let graph = Self {
            process,
            subgraphs,
            source: None,
        };
        graph.validate("<process>")?;
        Ok(graph)
    }

    /// Loads a process file. Each part's `module` is looked up in `catalog`
    /// first, then read as YAML relative to the process file.
    pub fn load(path: &Path, catalog: &SubGraphCatalog) -> Result<Self, OrchestratorError> {
        let origin = path.display().to_string();
        let process = Process::from_file(read_yaml::<ProcessFile>(path)?);
        process.validate(&origin)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut subgraphs = BTreeMap::new();
        for part in &process.parts {
            let subgraph = match catalog.build(&part.module) {
                Some(subgraph) => {
                    subgraph.validate(&part.module)?;
                    subgraph
                }
                None => {
                    let module_path = resolve_module(base, &part.module).ok_or_else(|| {
                        OrchestratorError::definition(
                            &origin,
                            format!(
                                "part `{}` module `{}` is neither registered nor a file",
                                part.name, part.module
                            ),
                        )
                    })?;
                    let file = read_yaml::<SubGraphFile>(&module_path)?;
                    SubGraph::from_file(&file, &module_path.display().to_string())?
                }
            };
            subgraphs.insert(part.name.clone(), subgraph);
        }

        let graph = Self {
            process,
            subgraphs,
            source: Some(path.to_path_buf()),
        };
        graph.validate(&origin)?;
        tracing::debug!(
            process = %graph.process.name,
            parts = graph.subgraphs.len(),
            "process graph loaded"
        );
        Ok(graph)
    }

    pub fn subgraph(&self, part: &str) -> Option<&SubGraph> {
        self.subgraphs.get(part)
    }

    pub fn part(&self, name: &str) -> Option<&SubGraphRef> {
        self.process.part(name)
    }

    fn validate(&self, origin: &str) -> Result<(), OrchestratorError> {
        self.process.validate(origin)?;
        let fail = |reason: String| Err(OrchestratorError::definition(origin, reason));
        for part in &self.process.parts {
            let Some(subgraph) = self.subgraphs.get(&part.name) else {
                return fail(format!("part `{}` has no subgraph", part.name));
            };
            subgraph.validate(origin)?;
            for label in part.next_map.keys() {
                if !subgraph.declares_exit(label) {
                    return fail(format!(
                        "part `{}` maps exit `{label}` that its subgraph does not declare",
                        part.name
                    ));
                }
            }
            for (node_name, node) in &subgraph.nodes {
                for route in node.routes() {
                    let Directive::Next(target) = route else {
                        continue;
                    };
                    let Some((other, other_node)) = split_qualified(&target) else {
                        continue;
                    };
                    let reachable = self
                        .subgraphs
                        .get(other)
                        .is_some_and(|sg| sg.nodes.contains_key(other_node));
                    if !reachable {
                        return fail(format!(
                            "node `{}::{node_name}` routes to unknown `{target}`",
                            part.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn resolve_module(base: &Path, locator: &str) -> Option<PathBuf> {
    let direct = base.join(locator);
    if direct.is_file() {
        return Some(direct);
    }
    ["yaml", "yml"]
        .iter()
        .map(|ext| base.join(format!("{locator}.{ext}")))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::definition::PartFile;

    fn process(entry: &str, parts: Vec<(&str, &[(&str, &str)])>) -> Process {
        Process::from_file(ProcessFile {
            name: "p".to_string(),
            entry: entry.to_string(),
            metadata: Map::new(),
            parts: parts
                .into_iter()
                .map(|(name, next)| PartFile {
                    name: name.to_string(),
                    module: format!("{name}.yaml"),
                    next_map: next
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                })
                .collect(),
        })
    }

    #[test]
    fn process_validation_rules() {
        assert!(process("A", vec![("A", &[("done", "end")])]).validate("t").is_ok());
        assert!(process("B", vec![("A", &[])]).validate("t").is_err());
        assert!(process("A", vec![("A", &[]), ("A", &[])]).validate("t").is_err());
        let err = process("A", vec![("A", &[("done", "C")])])
            .validate("t")
            .expect_err("undeclared");
        assert!(err.to_string().contains("undeclared part `C`"));
    }

    #[test]
    fn default_required_config_is_api_triplet() {
        let mut p = process("A", vec![("A", &[])]);
        assert_eq!(p.required_config(), vec!["api_base", "token", "model"]);
        p.metadata
            .insert("required_config".to_string(), serde_json::json!([]));
        assert!(p.required_config().is_empty());
    }
}
