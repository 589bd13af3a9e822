use super::secrets::{is_secret_key, mask_value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarSummary {
    pub value: String,
    pub is_secret: bool,
    pub present: bool,
    pub masked_value: String,
}

impl VarSummary {
    pub fn describe(key: &str, raw: Option<&str>) -> Self {
        let is_secret = is_secret_key(key);
        let raw = raw.unwrap_or_default();
        let shown = if is_secret {
            mask_value(raw)
        } else {
            raw.to_string()
        };
        Self {
            value: shown.clone(),
            is_secret,
            present: !raw.is_empty(),
            masked_value: shown,
        }
    }
}

/// The `GET /config` document. Secret values never appear in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub vars: BTreeMap<String, VarSummary>,
    pub env_file: String,
    pub project_root: String,
}

pub fn summarize<'a, F>(
    keys: impl IntoIterator<Item = &'a str>,
    lookup: F,
    env_file: &Path,
    project_root: &Path,
) -> ConfigSummary
where
    F: Fn(&str) -> Option<String>,
{
    let vars = keys
        .into_iter()
        .map(|key| {
            let raw = lookup(key);
            (key.to_string(), VarSummary::describe(key, raw.as_deref()))
        })
        .collect();
    ConfigSummary {
        vars,
        env_file: env_file.display().to_string(),
        project_root: project_root.display().to_string(),
    }
}
