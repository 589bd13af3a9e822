use super::{as_number, number_value, required, required_str, TransformContext, TransformError};
use crate::orchestration::cancel::sleep_with_stop;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};

const SLEEP_POLL: Duration = Duration::from_millis(50);

pub(super) fn set_value(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    Ok(required(params, "set_value", "value")?.clone())
}

pub(super) fn coerce_number(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let value = params.get("value").unwrap_or(&Value::Null);
    let integer = params
        .get("integer")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let parsed = match value {
        Value::String(text) => {
            let cleaned = text.trim().replace([',', '_'], "");
            cleaned.parse::<f64>().ok()
        }
        Value::Null => None,
        other => as_number(other),
    };
    match parsed.filter(|number| number.is_finite()) {
        Some(number) if integer => Ok(number_value(number.trunc())),
        Some(number) => Ok(number_value(number)),
        None => params
            .get("default")
            .cloned()
            .ok_or_else(|| TransformError::InvalidParam {
                transform: "coerce_number",
                param: "value",
                reason: format!("`{value}` is not numeric and no default was given"),
            }),
    }
}

/// Sleeps `ms`, waking early on cancellation or the step deadline.
pub(super) fn sleep(
    params: &Map<String, Value>,
    ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let ms = required(params, "sleep", "ms")
        .map(as_number)?
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .ok_or(TransformError::InvalidParam {
            transform: "sleep",
            param: "ms",
            reason: "expected a non-negative number".to_string(),
        })?;
    let mut total = Duration::from_millis(ms as u64);
    if let Some(deadline) = ctx.deadline {
        total = total.min(deadline.saturating_duration_since(Instant::now()));
    }
    let started = Instant::now();
    let completed = sleep_with_stop(ctx.cancel.as_atomic(), total, SLEEP_POLL);
    Ok(json!({
        "slept_ms": started.elapsed().as_millis() as u64,
        "cancelled": !completed,
    }))
}

pub(super) fn arithmetic(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let op = required_str(params, "arithmetic", "op")?;
    let operand = |param: &'static str| {
        required(params, "arithmetic", param).and_then(|value| {
            as_number(value).ok_or_else(|| TransformError::InvalidParam {
                transform: "arithmetic",
                param,
                reason: format!("`{value}` is not numeric"),
            })
        })
    };
    let a = operand("a")?;
    let result = match op {
        "abs" => a.abs(),
        "round" => a.round(),
        "floor" => a.floor(),
        "ceil" => a.ceil(),
        "neg" => -a,
        _ => {
            let b = operand("b")?;
            match op {
                "add" => a + b,
                "sub" => a - b,
                "mul" => a * b,
                "div" | "mod" if b == 0.0 => {
                    return Err(TransformError::Failed {
                        transform: "arithmetic",
                        reason: "division by zero".to_string(),
                    })
                }
                "div" => a / b,
                "mod" => a % b,
                "min" => a.min(b),
                "max" => a.max(b),
                "pow" => a.powf(b),
                other => {
                    return Err(TransformError::InvalidParam {
                        transform: "arithmetic",
                        param: "op",
                        reason: format!("unsupported op `{other}`"),
                    })
                }
            }
        }
    };
    Ok(number_value(result))
}
