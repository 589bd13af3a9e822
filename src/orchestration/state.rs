use serde_json::{Map, Value};

/// Per-run accumulator. Paths are dot-separated; numeric segments index
/// into arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleState {
    root: Map<String, Value>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').map(str::trim).filter(|segment| !segment.is_empty())
}

pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(root: Map<String, Value>) -> Self {
        Self { root }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = segments(path);
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for segment in parts {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes `value` at `path`, replacing non-object intermediates with
    /// objects.
    pub fn set(&mut self, path: &str, value: Value) {
        let parts = segments(path).collect::<Vec<_>>();
        let Some((last, parents)) = parts.split_last() else {
            return;
        };
        let mut current = &mut self.root;
        for segment in parents {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.root.remove(key)
    }
}

/// Text form used when a value is spliced into a template.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Replaces every `{{path}}` with the looked-up value; unknown paths render
/// empty and unterminated braces are kept verbatim.
pub fn render_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<Value>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        if let Some(value) = lookup(path) {
            out.push_str(&render_scalar(&value));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Resolves `"$.path"` strings and `{{path}}` placeholders against `state`,
/// recursively.
pub fn resolve_value(value: &Value, state: &CycleState) -> Value {
    match value {
        Value::String(text) => {
            if text == "$" {
                return state.to_value();
            }
            if let Some(path) = text.strip_prefix("$.") {
                return state.get(path).cloned().unwrap_or(Value::Null);
            }
            if text.contains("{{") {
                return Value::String(render_template(text, |path| state.get(path).cloned()));
            }
            value.clone()
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, state)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn resolve_params(params: &Map<String, Value>, state: &CycleState) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, state)))
        .collect()
}
