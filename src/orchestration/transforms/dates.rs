use super::{as_number, number_value, required_str, TransformContext, TransformError};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt::Write;

fn parse_date(raw: &str) -> Result<DateTime<Utc>, TransformError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(parsed.and_utc());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(TransformError::InvalidParam {
        transform: "date_ops",
        param: "date",
        reason: format!("`{raw}` is not an ISO date"),
    })
}

fn iso(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn date_param(params: &Map<String, Value>, param: &'static str) -> Result<DateTime<Utc>, TransformError> {
    parse_date(required_str(params, "date_ops", param)?)
}

fn amount(params: &Map<String, Value>, param: &str) -> f64 {
    params.get(param).and_then(as_number).unwrap_or(0.0)
}

pub(super) fn date_ops(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let op = required_str(params, "date_ops", "op")?;
    match op {
        "now" => Ok(iso(Utc::now())),
        "parse" => Ok(iso(date_param(params, "date")?)),
        "add" => {
            let date = date_param(params, "date")?;
            let millis = amount(params, "days") * 86_400_000.0
                + amount(params, "hours") * 3_600_000.0
                + amount(params, "minutes") * 60_000.0
                + amount(params, "seconds") * 1_000.0;
            date.checked_add_signed(Duration::milliseconds(millis as i64))
                .map(iso)
                .ok_or(TransformError::Failed {
                    transform: "date_ops",
                    reason: "date out of range".to_string(),
                })
        }
        "diff" => {
            let date = date_param(params, "date")?;
            let other = date_param(params, "other")?;
            let seconds = (date - other).num_milliseconds() as f64 / 1000.0;
            let unit = params.get("unit").and_then(Value::as_str).unwrap_or("seconds");
            let scaled = match unit {
                "seconds" => seconds,
                "minutes" => seconds / 60.0,
                "hours" => seconds / 3600.0,
                "days" => seconds / 86_400.0,
                other => {
                    return Err(TransformError::InvalidParam {
                        transform: "date_ops",
                        param: "unit",
                        reason: format!("unsupported unit `{other}`"),
                    })
                }
            };
            Ok(number_value(scaled))
        }
        "format" => {
            let date = date_param(params, "date")?;
            let format = required_str(params, "date_ops", "format")?;
            let mut out = String::new();
            write!(out, "{}", date.format(format)).map_err(|_| TransformError::InvalidParam {
                transform: "date_ops",
                param: "format",
                reason: format!("`{format}` is not a valid strftime format"),
            })?;
            Ok(Value::String(out))
        }
        "weekday" => Ok(Value::String(date_param(params, "date")?.format("%a").to_string())),
        other => Err(TransformError::InvalidParam {
            transform: "date_ops",
            param: "op",
            reason: format!("unsupported op `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::cancel::CancelFlag;
    use serde_json::json;

    fn run(params: Value) -> Result<Value, TransformError> {
        let params = params.as_object().cloned().unwrap_or_default();
        date_ops(&params, &TransformContext::new(CancelFlag::new()))
    }

    #[test]
    fn add_and_diff_round_through_iso() {
        assert_eq!(
            run(json!({"op": "add", "date": "2024-02-28", "days": 1, "hours": 1})).expect("add"),
            json!("2024-02-29T01:00:00.000Z")
        );
        assert_eq!(
            run(json!({"op": "diff", "date": "2024-01-02T00:00:00Z", "other": "2024-01-01", "unit": "hours"}))
                .expect("diff"),
            json!(24)
        );
        assert_eq!(
            run(json!({"op": "format", "date": "2024-03-05 10:00:00", "format": "%d/%m"})).expect("format"),
            json!("05/03")
        );
        assert!(run(json!({"op": "parse", "date": "yesterday"})).is_err());
    }
}
