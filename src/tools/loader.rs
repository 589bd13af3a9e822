use super::handler::HandlerTable;
use super::registry::{ToolEntry, FIRST_TOOL_ID};
use super::spec::ToolSpec;
use crate::safe_json;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A candidate that could not be turned into a tool. Kept on the registry so
/// `GET /tools?reload=1` can report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadError {
    pub candidate: String,
    pub reason: String,
}

impl LoadError {
    fn new(candidate: &str, reason: impl Into<String>) -> Self {
        Self {
            candidate: candidate.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub entries: Vec<ToolEntry>,
    pub errors: Vec<LoadError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Top-level modules of the tool tree, sorted by name. Entries starting with
/// `_` or `.` and the spec directory itself are not modules.
pub fn enumerate_candidates(tools_dir: &Path, specs_dir: &Path) -> Vec<Candidate> {
    let Ok(read) = fs::read_dir(tools_dir) else {
        return Vec::new();
    };
    let specs_canonical = fs::canonicalize(specs_dir).ok();
    let mut candidates = Vec::new();
    for entry in read.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if file_name.starts_with('_') || file_name.starts_with('.') {
            continue;
        }
        let is_dir = path.is_dir();
        if is_dir && specs_canonical.is_some() && fs::canonicalize(&path).ok() == specs_canonical
        {
            continue;
        }
        let name = if is_dir {
            file_name.to_string()
        } else {
            match path.file_stem().and_then(|v| v.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            }
        };
        candidates.push(Candidate { name, path, is_dir });
    }
    candidates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    candidates
}

fn spec_path_for(candidate: &Candidate, specs_dir: &Path) -> Option<PathBuf> {
    let dedicated = specs_dir.join(format!("{}.json", candidate.name));
    if dedicated.is_file() {
        return Some(dedicated);
    }
    if !candidate.is_dir
        && candidate
            .path
            .extension()
            .and_then(|v| v.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        return Some(candidate.path.clone());
    }
    let nested = candidate.path.join("spec.json");
    if candidate.is_dir && nested.is_file() {
        return Some(nested);
    }
    None
}

fn load_spec(candidate: &Candidate, specs_dir: &Path) -> Result<(ToolSpec, Value), String> {
    let path = spec_path_for(candidate, specs_dir)
        .ok_or_else(|| "no spec() found: missing spec json".to_string())?;
    let raw = fs::read_to_string(&path)
        .map_err(|err| format!("failed to read spec {}: {err}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| format!("invalid spec json {}: {err}", path.display()))?;
    let spec: ToolSpec = serde_json::from_value(value.clone())
        .map_err(|err| format!("invalid spec {}: {err}", path.display()))?;
    if path.starts_with(specs_dir) && spec.name.as_str() != candidate.name {
        return Err(format!(
            "spec {} names `{}` but its file stem is `{}`",
            path.display(),
            spec.name,
            candidate.name
        ));
    }
    Ok((spec, value))
}

/// Turns the tool tree into tool entries. Never fails as a whole; every
/// skipped candidate is logged and recorded in `Discovery::errors`.
pub fn discover(tools_dir: &Path, specs_dir: &Path, handlers: &HandlerTable) -> Discovery {
    let mut discovery = Discovery::default();
    let mut seen_candidates = BTreeSet::new();
    let mut seen_names = BTreeSet::new();

    for candidate in enumerate_candidates(tools_dir, specs_dir) {
        if !seen_candidates.insert(candidate.name.clone()) {
            continue;
        }
        let (spec, raw) = match load_spec(&candidate, specs_dir) {
            Ok(loaded) => loaded,
            Err(reason) => {
                tracing::warn!(candidate = %candidate.name, %reason, "skipping tool module");
                discovery.errors.push(LoadError::new(&candidate.name, reason));
                continue;
            }
        };
        if let Err(reason) = spec.category() {
            tracing::warn!(tool = %spec.name, %reason, "skipping tool with unknown category");
            discovery.errors.push(LoadError::new(&candidate.name, reason));
            continue;
        }
        if seen_names.contains(spec.name.as_str()) {
            let reason = format!("duplicate tool name `{}`; first loaded wins", spec.name);
            tracing::warn!(candidate = %candidate.name, %reason, "skipping tool module");
            discovery.errors.push(LoadError::new(&candidate.name, reason));
            continue;
        }
        let Some(handler) = handlers.get(spec.handler_name()) else {
            let reason = format!("no run() handler registered as `{}`", spec.handler_name());
            tracing::warn!(candidate = %candidate.name, %reason, "skipping tool module");
            discovery.errors.push(LoadError::new(&candidate.name, reason));
            continue;
        };

        seen_names.insert(spec.name.to_string());
        let id = FIRST_TOOL_ID + discovery.entries.len() as u32;
        let serialized = safe_json::to_compact(&raw);
        discovery
            .entries
            .push(ToolEntry::new(id, spec, serialized, handler));
    }

    discovery
}
