use super::ConfigError;
use crate::shared::fs_atomic::{atomic_write_file, ensure_line_present};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvLine {
    Entry { key: String, value: String },
    Verbatim(String),
}

/// `.env` file contents, kept line by line so a rewrite preserves comments
/// and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<EnvLine>,
}

pub fn validate_env_key(key: &str) -> Result<(), ConfigError> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
    if valid_start && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Ok(());
    }
    Err(ConfigError::InvalidKey {
        key: key.to_string(),
        reason: "keys must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
    })
}

/// Values are single-line; control characters cannot survive a rewrite.
pub fn validate_env_value(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.chars().any(char::is_control) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "values must not contain control characters".to_string(),
        });
    }
    Ok(())
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || ch == '#' || ch == '"' || ch == '\'');
    if needs_quotes && !value.contains('"') {
        format!("\"{value}\"")
    } else if needs_quotes {
        format!("'{value}'")
    } else {
        value.to_string()
    }
}

fn parse_line(line: &str) -> EnvLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return EnvLine::Verbatim(line.to_string());
    }
    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    match body.split_once('=') {
        Some((key, value)) if validate_env_key(key.trim()).is_ok() => EnvLine::Entry {
            key: key.trim().to_string(),
            value: unquote(value),
        },
        _ => EnvLine::Verbatim(line.to_string()),
    }
}

impl EnvFile {
    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Self {
        Self {
            path: path.into(),
            lines: raw.lines().map(parse_line).collect(),
        }
    }

    /// Loads `path`; a missing file is an empty env file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Self::parse(path, &raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::parse(path, "")),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            EnvLine::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = Vec::new();
        for line in &self.lines {
            if let EnvLine::Entry { key, value } = line {
                match entries.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = value,
                    None => entries.push((key, value)),
                }
            }
        }
        entries
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        validate_env_key(key)?;
        validate_env_value(key, value)?;
        let mut replaced = false;
        for line in self.lines.iter_mut() {
            if let EnvLine::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    replaced = true;
                }
            }
        }
        if !replaced {
            self.lines.push(EnvLine::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                EnvLine::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote_if_needed(value));
                }
                EnvLine::Verbatim(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        atomic_write_file(&self.path, self.render().as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: self.path.display().to_string(),
                source,
            }
        })
    }

    /// Adds `.env` (the file name of this env file) to `<root>/.gitignore`.
    pub fn ensure_gitignored(&self, project_root: &Path) -> Result<bool, ConfigError> {
        let name = self
            .path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(".env");
        let gitignore = project_root.join(".gitignore");
        ensure_line_present(&gitignore, name).map_err(|source| ConfigError::Write {
            path: gitignore.display().to_string(),
            source,
        })
    }
}
