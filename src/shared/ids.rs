use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_identifier_value(kind: &str, value: &str, extra: &[char]) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || extra.contains(&ch))
    {
        return Ok(());
    }
    let extras = extra
        .iter()
        .map(|ch| format!(", '{ch}'"))
        .collect::<String>();
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-', '_'{extras}"
    ))
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal, [$($extra:literal),*]) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                validate_identifier_value($kind, raw, &[$($extra),*])?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(|err| {
                    D::Error::custom(format!("invalid {} `{}`: {}", $kind, raw, err))
                })
            }
        }
    };
}

define_id_type!(ToolName, "tool name", ['.']);
define_id_type!(WorkerName, "worker name", []);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_allow_dots_but_worker_names_do_not() {
        assert!(ToolName::parse("pdf.extract").is_ok());
        assert!(WorkerName::parse("pdf.extract").is_err());
        assert!(WorkerName::parse("curator_1").is_ok());
    }

    #[test]
    fn path_separators_are_rejected() {
        let err = WorkerName::parse("../etc").expect_err("traversal");
        assert!(err.contains("worker name"));
        assert!(ToolName::parse("").is_err());
    }
}
