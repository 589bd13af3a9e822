use crate::state_store::{RunRow, StateStore, StateStoreError, StepRow};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_RECENT_STEPS: usize = 10;
pub const PREVIEW_CHARS: usize = 200;

/// Compact text of `value`, cut at [`PREVIEW_CHARS`] characters with `…`.
pub fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    truncate(&text, PREVIEW_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut = text.chars().take(max_chars).collect::<String>();
    cut.push('…');
    cut
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentStep {
    pub id: i64,
    pub run_id: Option<String>,
    pub node: String,
    pub status: String,
    pub duration_ms: i64,
    pub started_at: String,
    pub error_message: Option<String>,
    pub call_kind: Option<String>,
    pub call_name: Option<String>,
    pub last_result_preview: Option<String>,
}

fn text_at(details: &Value, pointer: &str) -> Option<String> {
    details
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl From<&StepRow> for RecentStep {
    fn from(row: &StepRow) -> Self {
        Self {
            id: row.id,
            run_id: row.run_id.clone(),
            node: row.node.clone(),
            status: row.status.clone(),
            duration_ms: row.duration_ms,
            started_at: row.started_at.clone(),
            error_message: text_at(&row.details, "/error/message"),
            call_kind: text_at(&row.details, "/call/kind"),
            call_name: text_at(&row.details, "/call/name"),
            last_result_preview: row
                .details
                .get("last_result_preview")
                .filter(|value| !value.is_null())
                .map(preview),
        }
    }
}

pub fn recent_steps(store: &StateStore, limit: usize) -> Result<Vec<RecentStep>, StateStoreError> {
    Ok(store
        .recent_steps(limit)?
        .iter()
        .map(RecentStep::from)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub started_at: String,
    pub steps_executed: usize,
    pub avg_duration_ms: f64,
    pub errors_by_category: BTreeMap<String, u32>,
    /// Step rows whose node already ran earlier in the same run.
    pub retries: u32,
}

pub fn metrics_for(run: &RunRow, steps: &[StepRow]) -> RunMetrics {
    let mut errors_by_category = BTreeMap::new();
    let mut seen = BTreeSet::new();
    let mut retries = 0u32;
    let mut total_ms = 0i64;
    for step in steps {
        total_ms += step.duration_ms;
        if !seen.insert(step.node.as_str()) {
            retries += 1;
        }
        if step.status != "ok" {
            let category = text_at(&step.details, "/error/kind").unwrap_or_else(|| step.status.clone());
            *errors_by_category.entry(category).or_insert(0) += 1;
        }
    }
    RunMetrics {
        run_id: run.run_id.clone(),
        started_at: run.started_at.clone(),
        steps_executed: steps.len(),
        avg_duration_ms: if steps.is_empty() {
            0.0
        } else {
            total_ms as f64 / steps.len() as f64
        },
        errors_by_category,
        retries,
    }
}

/// Metrics for the latest run, derived from the steps started since it began.
pub fn current_run_metrics(store: &StateStore) -> Result<Option<RunMetrics>, StateStoreError> {
    let Some(run) = store.latest_run()? else {
        return Ok(None);
    };
    let steps = store.steps_since(&run.started_at)?;
    Ok(Some(metrics_for(&run, &steps)))
}
