use serde_json::Value;

/// Value returned by a tool before it reaches the wire.
///
/// Unlike `serde_json::Value` it can hold the things a tool may legitimately
/// produce but JSON cannot carry: non-finite floats, integers of arbitrary
/// length, UTF-16 text with unpaired surrogates and non-string map keys. The
/// safe JSON encoder turns every variant into valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    /// Decimal digits with an optional leading `-`.
    BigInt(String),
    Float(f64),
    Text(String),
    /// Raw UTF-16 code units, possibly containing lone surrogates.
    Wide(Vec<u16>),
    List(Vec<Payload>),
    /// Insertion-ordered entries; keys are coerced to strings on encode.
    Map(Vec<(Payload, Payload)>),
}

impl Payload {
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Payload>,
        V: Into<Payload>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn list<T: Into<Payload>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn big_int(digits: impl Into<String>) -> Self {
        Self::BigInt(digits.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(flag),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    return Self::Int(int);
                }
                let literal = number.to_string();
                if is_integer_literal(&literal) {
                    return Self::BigInt(literal);
                }
                match number.as_f64() {
                    Some(float) => Self::Float(float),
                    None => Self::Text(literal),
                }
            }
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (Self::Text(key), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Payload {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(value: Vec<Payload>) -> Self {
        Self::List(value)
    }
}

pub(crate) fn is_integer_literal(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
