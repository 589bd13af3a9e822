//! YAML shapes of process and subgraph files.

use super::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessFile {
    pub name: String,
    pub entry: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub parts: Vec<PartFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartFile {
    pub name: String,
    pub module: String,
    #[serde(default, alias = "next")]
    pub next_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubGraphFile {
    pub name: String,
    pub entry: String,
    #[serde(default)]
    pub exits: BTreeMap<String, String>,
    pub nodes: BTreeMap<String, NodeFile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeFile {
    Step(StepFile),
    Cond(CondFile),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepFile {
    pub call: CallFile,
    #[serde(default)]
    pub save_as: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub exit: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CallFile {
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CondFile {
    #[serde(default)]
    pub rules: Vec<RuleFile>,
    pub default: RouteFile,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleFile {
    pub when: PredicateFile,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub exit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteFile {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub exit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredicateFile {
    pub path: String,
    pub op: PredicateOp,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Equals,
    NotEquals,
    Exists,
    Missing,
    Truthy,
    Falsy,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl PredicateOp {
    pub fn needs_value(self) -> bool {
        matches!(
            self,
            Self::Equals | Self::NotEquals | Self::Gt | Self::Gte | Self::Lt | Self::Lte
        )
    }
}

pub fn read_yaml<T>(path: &Path) -> Result<T, OrchestratorError>
where
    T: serde::de::DeserializeOwned,
{
    let raw = fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| OrchestratorError::Yaml {
        path: path.display().to_string(),
        source,
    })
}
