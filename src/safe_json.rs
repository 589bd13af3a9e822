//! Response sanitiser.
//!
//! Everything the gateway writes goes through [`encode`] or [`encode_value`]:
//! non-finite floats become the strings `"NaN"`, `"Infinity"` and
//! `"-Infinity"`, integers longer than the configured digit threshold become
//! strings when big-as-string mode is on, lone UTF-16 surrogates become
//! U+FFFD and map keys are coerced to strings. The result is compact JSON
//! produced by `serde_json`, which never emits NaN or infinities itself.

use crate::tools::payload::{is_integer_literal, Payload};
use serde_json::{Map, Number, Value};

pub const DEFAULT_BIG_INT_DIGITS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeJsonOptions {
    pub big_int_digits: usize,
    pub big_as_string: bool,
}

impl Default for SafeJsonOptions {
    fn default() -> Self {
        Self {
            big_int_digits: DEFAULT_BIG_INT_DIGITS,
            big_as_string: true,
        }
    }
}

pub fn sanitize(payload: &Payload, options: SafeJsonOptions) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(flag) => Value::Bool(*flag),
        Payload::Int(int) => integer(&int.to_string(), options),
        Payload::BigInt(digits) => integer(digits.trim(), options),
        Payload::Float(float) => float_value(*float),
        Payload::Text(text) => Value::String(text.clone()),
        Payload::Wide(units) => Value::String(decode_utf16_lossy(units)),
        Payload::List(items) => Value::Array(items.iter().map(|v| sanitize(v, options)).collect()),
        Payload::Map(entries) => {
            let mut object = Map::new();
            for (key, value) in entries {
                object.insert(key_string(key), sanitize(value, options));
            }
            Value::Object(object)
        }
    }
}

/// Applies the integer-length rule to an already-valid JSON value. Strings and
/// floats need no work here: `serde_json` cannot hold non-finite numbers and
/// Rust strings cannot hold surrogates.
pub fn sanitize_value(value: &Value, options: SafeJsonOptions) -> Value {
    match value {
        Value::Number(number) => {
            let literal = number.to_string();
            if is_integer_literal(&literal) {
                integer(&literal, options)
            } else {
                Value::Number(number.clone())
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(item, options))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), sanitize_value(item, options)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn to_compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub fn encode(payload: &Payload, options: SafeJsonOptions) -> String {
    to_compact(&sanitize(payload, options))
}

pub fn encode_value(value: &Value, options: SafeJsonOptions) -> String {
    to_compact(&sanitize_value(value, options))
}

pub fn decode_utf16_lossy(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn integer(literal: &str, options: SafeJsonOptions) -> Value {
    if !is_integer_literal(literal) {
        return Value::String(literal.to_string());
    }
    let digits = literal.trim_start_matches('-').len();
    if options.big_as_string && digits > options.big_int_digits {
        return Value::String(literal.to_string());
    }
    match literal.parse::<Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(literal.to_string()),
    }
}

fn float_value(float: f64) -> Value {
    if float.is_nan() {
        return Value::String("NaN".to_string());
    }
    if float.is_infinite() {
        let label = if float.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        };
        return Value::String(label.to_string());
    }
    Number::from_f64(float)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn key_string(key: &Payload) -> String {
    match key {
        Payload::Null => "null".to_string(),
        Payload::Bool(flag) => flag.to_string(),
        Payload::Int(int) => int.to_string(),
        Payload::BigInt(digits) => digits.clone(),
        Payload::Float(float) => match float_value(*float) {
            Value::String(label) => label,
            other => other.to_string(),
        },
        Payload::Text(text) => text.clone(),
        Payload::Wide(units) => decode_utf16_lossy(units),
        Payload::List(_) | Payload::Map(_) => {
            to_compact(&sanitize(key, SafeJsonOptions::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(threshold: usize, big_as_string: bool) -> SafeJsonOptions {
        SafeJsonOptions {
            big_int_digits: threshold,
            big_as_string,
        }
    }

    #[test]
    fn non_finite_floats_become_labels() {
        let payload = Payload::map([
            ("a", Payload::Float(f64::NAN)),
            ("b", Payload::Float(f64::INFINITY)),
            ("c", Payload::Float(f64::NEG_INFINITY)),
            ("d", Payload::Int(123)),
        ]);
        assert_eq!(
            encode(&payload, SafeJsonOptions::default()),
            r#"{"a":"NaN","b":"Infinity","c":"-Infinity","d":123}"#
        );
    }

    #[test]
    fn big_integers_follow_threshold_and_mode() {
        let value = Payload::big_int("100000000000000000000");
        assert_eq!(encode(&value, big(10, true)), r#""100000000000000000000""#);
        assert_eq!(encode(&value, big(30, true)), "100000000000000000000");
        assert_eq!(encode(&value, big(10, false)), "100000000000000000000");
        assert_eq!(encode(&Payload::Int(-12345), big(4, true)), r#""-12345""#);
    }

    #[test]
    fn lone_surrogates_are_replaced() {
        let units = vec![0x0068, 0xD800, 0x0069, 0xDC00];
        assert_eq!(
            encode(&Payload::Wide(units), SafeJsonOptions::default()),
            "\"h\u{FFFD}i\u{FFFD}\""
        );
    }

    #[test]
    fn map_keys_are_coerced_to_strings() {
        let payload = Payload::Map(vec![
            (Payload::Int(1), Payload::Bool(true)),
            (Payload::Wide(vec![0xDBFF]), Payload::Null),
        ]);
        let value = sanitize(&payload, SafeJsonOptions::default());
        assert_eq!(value["1"], Value::Bool(true));
        assert!(value.get("\u{FFFD}").is_some());
    }

    #[test]
    fn sanitize_value_applies_integer_rule_to_json_numbers() {
        let value: Value = serde_json::from_str(r#"{"n":[12345678901,1.5]}"#).expect("parse");
        assert_eq!(
            encode_value(&value, big(5, true)),
            r#"{"n":["12345678901",1.5]}"#
        );
    }
}
