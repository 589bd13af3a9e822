use chrono::{SecondsFormat, Utc};

/// UTC timestamp with millisecond precision, e.g. `2026-01-02T03:04:05.678Z`.
/// Fixed width, so `started_at` columns compare correctly as text.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn run_id_for(pid: u32, started_at: &str) -> String {
    format!("{pid}-{started_at}")
}
