use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Timelike, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

/// A single row moving through the pipeline, keyed by column name in source order.
pub type Record = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Time(NaiveTime),
    StringList(Vec<String>),
    Null,
}

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// Appended when the value carries a sub-second part: always six digits.
pub const MICROS_FORMAT: &str = "%.6f";

fn has_micros<T: Timelike>(value: &T) -> bool {
    value.nanosecond() / 1_000 != 0
}

fn with_micros<T: Timelike>(value: &T, base: &str) -> String {
    if has_micros(value) {
        format!("{base}{MICROS_FORMAT}")
    } else {
        base.to_string()
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeUtc(_) | Value::Time(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the text form of a temporal value, `None` for every other variant.
    pub fn temporal_text(&self) -> Option<String> {
        match self {
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => {
                Some(dt.format(&with_micros(dt, DATETIME_FORMAT)).to_string())
            }
            Value::DateTimeUtc(dt) => {
                let precision = if has_micros(dt) {
                    SecondsFormat::Micros
                } else {
                    SecondsFormat::Secs
                };
                Some(dt.to_rfc3339_opts(precision, false))
            }
            Value::Time(t) => Some(t.format(&with_micros(t, TIME_FORMAT)).to_string()),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::StringList(items) => items.join(","),
            Value::Null => String::new(),
            temporal => temporal.temporal_text().unwrap_or_default(),
        }
    }

    /// Wire form of the value. Decimal and temporal variants are converted the
    /// same way the normalizer converts them.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => float_to_json(*f),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Decimal(d) => d.to_f64().map(float_to_json).unwrap_or(JsonValue::Null),
            Value::StringList(items) => JsonValue::Array(
                items.iter().cloned().map(JsonValue::String).collect(),
            ),
            Value::Null => JsonValue::Null,
            temporal => temporal
                .temporal_text()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    /// Converts a value returned by the destination. Nested objects and mixed
    /// arrays are carried as their JSON text.
    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                let strings = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>();
                match strings {
                    Some(list) => Value::StringList(list),
                    None => Value::String(value.to_string()),
                }
            }
            JsonValue::Object(_) => Value::String(value.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

fn float_to_json(value: f64) -> JsonValue {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

pub fn record_to_json(record: &Record) -> JsonValue {
    let map = record
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect::<JsonMap<String, JsonValue>>();
    JsonValue::Object(map)
}

pub fn record_from_json(value: &JsonValue) -> Option<Record> {
    value.as_object().map(|object| {
        object
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_json(value)))
            .collect()
    })
}

/// Builds a record from `(column, value)` pairs, preserving their order.
pub fn record_of<K, V, I>(pairs: I) -> Record
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Parses a loosely formatted number, falling back to `default` for blanks and garbage.
pub fn parse_float_or(value: Option<&str>, default: f64) -> f64 {
    match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.parse::<f64>().unwrap_or(default),
        _ => default,
    }
}

/// Like [`parse_float_or`] but truncates toward zero, so `"12.9"` becomes `12`.
pub fn parse_integer_or(value: Option<&str>, default: i64) -> i64 {
    match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite())
            .map(|parsed| parsed.trunc() as i64)
            .unwrap_or(default),
        _ => default,
    }
}
