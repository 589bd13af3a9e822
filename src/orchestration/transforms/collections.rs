use super::{as_number, optional_str, required, required_str, TransformContext, TransformError};
use crate::orchestration::state::lookup_path;
use serde_json::{json, Map, Value};

fn array_param<'a>(
    params: &'a Map<String, Value>,
    transform: &'static str,
    param: &'static str,
) -> Result<&'a Vec<Value>, TransformError> {
    match params.get(param) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(TransformError::MissingParam { transform, param }),
        Some(other) => Err(TransformError::InvalidParam {
            transform,
            param,
            reason: format!("expected an array, got `{other}`"),
        }),
    }
}

fn index_param(params: &Map<String, Value>, param: &str, len: usize) -> Option<usize> {
    let raw = params.get(param).and_then(as_number)? as i64;
    let len = len as i64;
    let index = if raw < 0 { len + raw } else { raw };
    Some(index.clamp(0, len) as usize)
}

fn sort_key(value: &Value) -> (u8, f64, String) {
    match value {
        Value::Null => (0, 0.0, String::new()),
        Value::Bool(flag) => (1, f64::from(u8::from(*flag)), String::new()),
        Value::Number(number) => (2, number.as_f64().unwrap_or(0.0), String::new()),
        Value::String(text) => (3, 0.0, text.clone()),
        other => (4, 0.0, other.to_string()),
    }
}

pub(super) fn array_ops(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let op = required_str(params, "array_ops", "op")?;
    let items = match params.get("array") {
        Some(Value::Null) | None => Vec::new(),
        Some(_) => array_param(params, "array_ops", "array")?.clone(),
    };
    let value = || required(params, "array_ops", "value").cloned();
    let result = match op {
        "append" => {
            let mut out = items;
            out.push(value()?);
            Value::Array(out)
        }
        "prepend" => {
            let mut out = vec![value()?];
            out.extend(items);
            Value::Array(out)
        }
        "remove" => {
            let target = value()?;
            Value::Array(items.into_iter().filter(|item| *item != target).collect())
        }
        "contains" => Value::Bool(items.contains(&value()?)),
        "index_of" => {
            let target = value()?;
            let index = items.iter().position(|item| *item == target);
            index.map(Value::from).unwrap_or(json!(-1))
        }
        "length" => Value::from(items.len()),
        "first" => items.first().cloned().unwrap_or(Value::Null),
        "last" => items.last().cloned().unwrap_or(Value::Null),
        "reverse" => Value::Array(items.into_iter().rev().collect()),
        "unique" => {
            let mut out: Vec<Value> = Vec::new();
            for item in items {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::Array(out)
        }
        "sort" => {
            let mut out = items;
            match optional_str(params, "key") {
                Some(key) => out.sort_by(|a, b| {
                    let left = sort_key(lookup_path(a, key).unwrap_or(&Value::Null));
                    let right = sort_key(lookup_path(b, key).unwrap_or(&Value::Null));
                    left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
                }),
                None => out.sort_by(|a, b| {
                    sort_key(a)
                        .partial_cmp(&sort_key(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                }),
            }
            if params.get("descending").and_then(Value::as_bool) == Some(true) {
                out.reverse();
            }
            Value::Array(out)
        }
        "slice" => {
            let len = items.len();
            let start = index_param(params, "start", len).unwrap_or(0);
            let end = index_param(params, "end", len).unwrap_or(len).max(start);
            Value::Array(items[start..end].to_vec())
        }
        "pluck" => {
            let key = required_str(params, "array_ops", "key")?;
            Value::Array(
                items
                    .iter()
                    .map(|item| lookup_path(item, key).cloned().unwrap_or(Value::Null))
                    .collect(),
            )
        }
        other => {
            return Err(TransformError::InvalidParam {
                transform: "array_ops",
                param: "op",
                reason: format!("unsupported op `{other}`"),
            })
        }
    };
    Ok(result)
}

/// Flattens `arrays` by one level; non-array members are kept as elements.
pub(super) fn array_concat(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let arrays = array_param(params, "array_concat", "arrays")?;
    let mut out = Vec::new();
    for member in arrays {
        match member {
            Value::Array(items) => out.extend(items.iter().cloned()),
            Value::Null => {}
            other => out.push(other.clone()),
        }
    }
    Ok(Value::Array(out))
}

fn set_at(target: &mut Value, path: &str, value: Value) {
    let parts = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    let Some((last, parents)) = parts.split_last() else {
        *target = value;
        return;
    };
    let mut current = target;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_into(existing, value)
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

pub(super) fn json_ops(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let op = required_str(params, "json_ops", "op")?;
    let data = params.get("data").cloned().unwrap_or(Value::Null);
    let result = match op {
        "get" => {
            let path = required_str(params, "json_ops", "path")?;
            lookup_path(&data, path)
                .cloned()
                .or_else(|| params.get("default").cloned())
                .unwrap_or(Value::Null)
        }
        "set" => {
            let path = required_str(params, "json_ops", "path")?;
            let mut out = data;
            set_at(&mut out, path, required(params, "json_ops", "value")?.clone());
            out
        }
        "delete" => {
            let key = required_str(params, "json_ops", "path")?;
            let mut out = data;
            if let Value::Object(map) = &mut out {
                map.remove(key);
            }
            out
        }
        "merge" => {
            let mut out = data;
            merge_into(&mut out, required(params, "json_ops", "value")?);
            out
        }
        "keys" => match &data {
            Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
            _ => json!([]),
        },
        "values" => match data {
            Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
            _ => json!([]),
        },
        "parse" => {
            let raw = required_str(params, "json_ops", "data")?;
            serde_json::from_str(raw).map_err(|err| TransformError::Failed {
                transform: "json_ops",
                reason: format!("invalid json: {err}"),
            })?
        }
        "stringify" => Value::String(data.to_string()),
        other => {
            return Err(TransformError::InvalidParam {
                transform: "json_ops",
                param: "op",
                reason: format!("unsupported op `{other}`"),
            })
        }
    };
    Ok(result)
}
