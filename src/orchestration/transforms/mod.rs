//! Built-in pure transforms reachable through `env.transform(name, params)`.

mod chess;
mod collections;
mod dates;
mod numeric;
mod text;

use super::cancel::CancelFlag;
use serde_json::{Map, Value};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("unknown transform `{name}`")]
    Unknown { name: String },
    #[error("transform `{transform}` is missing parameter `{param}`")]
    MissingParam {
        transform: &'static str,
        param: &'static str,
    },
    #[error("transform `{transform}` parameter `{param}` is invalid: {reason}")]
    InvalidParam {
        transform: &'static str,
        param: &'static str,
        reason: String,
    },
    #[error("transform `{transform}` failed: {reason}")]
    Failed {
        transform: &'static str,
        reason: String,
    },
}

/// What a transform may observe besides its parameters.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub cancel: CancelFlag,
    pub deadline: Option<Instant>,
}

impl TransformContext {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

pub type TransformFn = fn(&Map<String, Value>, &TransformContext) -> Result<Value, TransformError>;

pub const TRANSFORMS: &[(&str, TransformFn)] = &[
    ("set_value", numeric::set_value),
    ("array_ops", collections::array_ops),
    ("json_ops", collections::json_ops),
    ("format_template", text::format_template),
    ("template_map", text::template_map),
    ("array_concat", collections::array_concat),
    ("normalize_llm_output", text::normalize_llm_output),
    ("coerce_number", numeric::coerce_number),
    ("sleep", numeric::sleep),
    ("arithmetic", numeric::arithmetic),
    ("date_ops", dates::date_ops),
    ("uci_parse", chess::uci_parse),
    ("uci_build", chess::uci_build),
    ("pos_to_square", chess::pos_to_square),
    ("compare_positions", chess::compare_positions),
];

pub fn lookup(name: &str) -> Option<TransformFn> {
    TRANSFORMS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, transform)| *transform)
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

pub fn run_transform(
    name: &str,
    params: &Map<String, Value>,
    context: &TransformContext,
) -> Result<Value, TransformError> {
    let transform = lookup(name).ok_or_else(|| TransformError::Unknown {
        name: name.to_string(),
    })?;
    transform(params, context)
}

pub(crate) fn required<'a>(
    params: &'a Map<String, Value>,
    transform: &'static str,
    param: &'static str,
) -> Result<&'a Value, TransformError> {
    params
        .get(param)
        .ok_or(TransformError::MissingParam { transform, param })
}

pub(crate) fn required_str<'a>(
    params: &'a Map<String, Value>,
    transform: &'static str,
    param: &'static str,
) -> Result<&'a str, TransformError> {
    required(params, transform, param)?
        .as_str()
        .ok_or_else(|| TransformError::InvalidParam {
            transform,
            param,
            reason: "expected a string".to_string(),
        })
}

pub(crate) fn optional_str<'a>(params: &'a Map<String, Value>, param: &str) -> Option<&'a str> {
    params.get(param).and_then(Value::as_str)
}

/// Numbers and numeric strings as `f64`.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Whole numbers stay integers in the output.
pub(crate) fn number_value(number: f64) -> Value {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 9.007_199_254_740_992e15 {
        Value::from(number as i64)
    } else {
        serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
