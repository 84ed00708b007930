//! Converts source-native values into forms the record API accepts.
//!
//! Temporal values become ISO-8601 text and arbitrary-precision decimals become
//! the nearest `f64`. Every other variant passes through untouched.

use rust_decimal::prelude::ToPrimitive;

use crate::data::{Record, Value};

pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Decimal(d) => d.to_f64().map(Value::Float).unwrap_or(Value::Null),
        temporal if temporal.is_temporal() => temporal
            .temporal_text()
            .map(Value::String)
            .unwrap_or(Value::Null),
        other => other,
    }
}

pub fn normalize_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(column, value)| (column, normalize_value(value)))
        .collect()
}
