use crate::shared::ids::ToolName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Ai,
    Data,
    Documents,
    Games,
    Media,
    System,
    Utilities,
    Web,
    Dev,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 9] = [
        Self::Ai,
        Self::Data,
        Self::Documents,
        Self::Games,
        Self::Media,
        Self::System,
        Self::Utilities,
        Self::Web,
        Self::Dev,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Data => "data",
            Self::Documents => "documents",
            Self::Games => "games",
            Self::Media => "media",
            Self::System => "system",
            Self::Utilities => "utilities",
            Self::Web => "web",
            Self::Dev => "dev",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| {
                let names = Self::ALL.map(|category| category.as_str()).join(", ");
                format!("category `{raw}` must be one of: {names}")
            })
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}, "required": []})
}

/// Descriptor loaded from a tool's JSON spec file.
///
/// `category` is kept as text so an unknown category skips the tool with a
/// load error instead of failing the whole parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: ToolName,
    #[serde(default)]
    pub display_name: Option<String>,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl ToolSpec {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(self.name.as_str())
    }

    pub fn category(&self) -> Result<ToolCategory, String> {
        ToolCategory::parse(&self.category)
    }

    pub fn handler_name(&self) -> &str {
        self.handler.as_deref().unwrap_or(self.name.as_str())
    }

    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn operation_enum(&self) -> Option<Vec<&str>> {
        self.parameters
            .get("properties")?
            .get("operation")?
            .get("enum")?
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
    }

    /// Call-time shape check: required parameters present, `operation` within
    /// its declared enum.
    pub fn check_params(&self, params: &Map<String, Value>) -> Result<(), String> {
        let missing = self
            .required_params()
            .into_iter()
            .filter(|name| !params.contains_key(*name))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(format!(
                "{}() missing required argument(s): {}",
                self.name,
                missing.join(", ")
            ));
        }
        if let Some(allowed) = self.operation_enum() {
            if let Some(operation) = params.get("operation") {
                let accepted = operation
                    .as_str()
                    .is_some_and(|value| allowed.contains(&value));
                if !accepted {
                    return Err(format!(
                        "{}() operation {} is not one of: {}",
                        self.name,
                        operation,
                        allowed.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(parameters: Value) -> ToolSpec {
        serde_json::from_value(json!({
            "name": "chess",
            "category": "games",
            "parameters": parameters,
        }))
        .expect("spec")
    }

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!(ToolCategory::parse(" Media "), Ok(ToolCategory::Media));
        let err = ToolCategory::parse("weather").expect_err("closed set");
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn display_name_falls_back_to_name() {
        let spec = spec(json!({}));
        assert_eq!(spec.display_name(), "chess");
        assert_eq!(spec.handler_name(), "chess");
    }

    #[test]
    fn check_params_reports_missing_required_and_bad_operation() {
        let spec = spec(json!({
            "properties": {"operation": {"enum": ["move", "board"]}},
            "required": ["operation", "fen"],
        }));
        let mut params = Map::new();
        params.insert("operation".to_string(), json!("move"));
        let err = spec.check_params(&params).expect_err("missing fen");
        assert!(err.contains("fen"));

        params.insert("fen".to_string(), json!("startpos"));
        assert!(spec.check_params(&params).is_ok());

        params.insert("operation".to_string(), json!("resign"));
        let err = spec.check_params(&params).expect_err("bad operation");
        assert!(err.contains("not one of"));
    }
}
