use super::{required, required_str, TransformContext, TransformError};
use crate::orchestration::state::{lookup_path, render_template};
use serde_json::{Map, Value};

/// `{{path}}` placeholders are filled from `values`, or from the remaining
/// params when `values` is absent.
pub(super) fn format_template(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let template = required_str(params, "format_template", "template")?;
    let values = match params.get("values") {
        Some(values) => values.clone(),
        None => Value::Object(params.clone()),
    };
    Ok(Value::String(render_template(template, |path| {
        lookup_path(&values, path).cloned()
    })))
}

/// Renders `template` once per element of `items`. Inside the template,
/// `{{item}}` is the element, `{{index}}` its position and `{{item.x}}` or
/// `{{x}}` reach into object elements.
pub(super) fn template_map(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let template = required_str(params, "template_map", "template")?;
    let items = match required(params, "template_map", "items")? {
        Value::Array(items) => items,
        other => {
            return Err(TransformError::InvalidParam {
                transform: "template_map",
                param: "items",
                reason: format!("expected an array, got `{other}`"),
            })
        }
    };
    let rendered = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Value::String(render_template(template, |path| match path {
                "item" => Some(item.clone()),
                "index" => Some(Value::from(index)),
                _ => path
                    .strip_prefix("item.")
                    .map_or_else(|| lookup_path(item, path), |rest| lookup_path(item, rest))
                    .cloned(),
            }))
        })
        .collect();
    let joined = params.get("join").and_then(Value::as_str);
    Ok(match (joined, rendered) {
        (Some(separator), Value::Array(parts)) => Value::String(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(separator),
        ),
        (_, rendered) => rendered,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn embedded_json(text: &str) -> Option<Value> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) else {
            continue;
        };
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Cleans a model reply: strips a surrounding code fence and, unless
/// `expect` is `text`, returns the first JSON object or array found in it.
/// Non-JSON replies come back as trimmed text.
pub(super) fn normalize_llm_output(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let raw = match required(params, "normalize_llm_output", "text")? {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => return Ok(other.clone()),
    };
    let cleaned = strip_code_fence(&raw);
    let expect = params.get("expect").and_then(Value::as_str).unwrap_or("auto");
    if expect == "text" {
        return Ok(Value::String(cleaned.to_string()));
    }
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }
    match embedded_json(cleaned) {
        Some(value) => Ok(value),
        None if expect == "json" => Err(TransformError::Failed {
            transform: "normalize_llm_output",
            reason: "no JSON object or array in model output".to_string(),
        }),
        None => Ok(Value::String(cleaned.to_string())),
    }
}
