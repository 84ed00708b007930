//! Source collaborators: where migrated rows come from.
//!
//! Columns whose binary form the pipeline decodes natively are read as typed
//! values. Every other column (enums, arrays of non-text types, `inet`,
//! `interval`, ...) is selected through a `::text` cast. A value that fails to
//! decode makes its record a [`RecordError`], so the migrator drops that record
//! and keeps the rest of the table.

use std::{collections::HashMap, fmt};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use itertools::Itertools;
use log::info;
use postgres::{
    Client, Column, NoTls, Row,
    types::{FromSql, Type},
};
use rust_decimal::Decimal;

use crate::{
    data::{Record, Value},
    error::RecordError,
};

/// One fetched row, or the reason it could not be read.
pub type FetchedRecord = std::result::Result<Record, RecordError>;

pub trait RecordSource {
    /// Reads every row of `table`. A failure only affects that table; a row
    /// that cannot be decoded only affects that row.
    fn fetch_all(&mut self, table: &str) -> Result<Vec<FetchedRecord>>;
}

pub struct PostgresSource {
    client: Client,
    schema: String,
}

impl PostgresSource {
    pub fn connect(dsn: &str) -> Result<Self> {
        let client = Client::connect(dsn, NoTls)
            .with_context(|| format!("Connecting to source database {}", redact_dsn(dsn)))?;
        info!("Connected to source database {}", redact_dsn(dsn));
        Ok(Self {
            client,
            schema: "public".to_string(),
        })
    }
}

impl RecordSource for PostgresSource {
    fn fetch_all(&mut self, table: &str) -> Result<Vec<FetchedRecord>> {
        let from = format!("{}.{}", quote_ident(&self.schema), quote_ident(table));
        let described = self
            .client
            .prepare(&format!("SELECT * FROM {from}"))
            .with_context(|| format!("Describing columns of '{table}'"))?;
        let columns = described
            .columns()
            .iter()
            .map(|c| (c.name(), c.type_()))
            .collect::<Vec<_>>();
        let sql = format!("SELECT {} FROM {from}", select_list(&columns));
        let rows = self
            .client
            .query(sql.as_str(), &[])
            .with_context(|| format!("Fetching rows from '{table}'"))?;
        Ok(rows.iter().map(row_to_record).collect())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn redact_dsn(dsn: &str) -> String {
    match (dsn.find("://"), dsn.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &dsn[..scheme_end], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}

/// Types [`convert_column`] decodes from their binary form.
fn is_native(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::UUID
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::TIME
            | Type::JSON
            | Type::JSONB
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::TEXT_ARRAY
            | Type::VARCHAR_ARRAY
            | Type::BPCHAR_ARRAY
            | Type::NAME_ARRAY
    )
}

fn select_list(columns: &[(&str, &Type)]) -> String {
    columns
        .iter()
        .map(|(name, ty)| {
            let quoted = quote_ident(name);
            if is_native(ty) {
                quoted
            } else {
                format!("{quoted}::text AS {quoted}")
            }
        })
        .join(", ")
}

fn row_to_record(row: &Row) -> FetchedRecord {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = convert_column(row, idx, column)?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn decoded<T, E>(
    column: &str,
    ty: &Type,
    result: Result<Option<T>, E>,
) -> Result<Option<T>, RecordError>
where
    E: fmt::Display,
{
    result.map_err(|err| RecordError::Undecodable {
        column: column.to_string(),
        type_name: ty.name().to_string(),
        message: err.to_string(),
    })
}

fn get<'a, T>(row: &'a Row, idx: usize, column: &Column) -> Result<Option<T>, RecordError>
where
    T: FromSql<'a>,
{
    decoded(column.name(), column.type_(), row.try_get::<_, Option<T>>(idx))
}

fn convert_column(row: &Row, idx: usize, column: &Column) -> Result<Value, RecordError> {
    let value = match *column.type_() {
        Type::BOOL => get::<bool>(row, idx, column)?.into(),
        Type::INT2 => get::<i16>(row, idx, column)?.map(i64::from).into(),
        Type::INT4 => get::<i32>(row, idx, column)?.map(i64::from).into(),
        Type::INT8 => get::<i64>(row, idx, column)?.into(),
        Type::FLOAT4 => get::<f32>(row, idx, column)?.map(f64::from).into(),
        Type::FLOAT8 => get::<f64>(row, idx, column)?.into(),
        Type::NUMERIC => get::<Decimal>(row, idx, column)?
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        Type::UUID => get::<uuid::Uuid>(row, idx, column)?
            .map(|u| u.to_string())
            .into(),
        Type::DATE => get::<NaiveDate>(row, idx, column)?
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx, column)?
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx, column)?
            .map(Value::DateTimeUtc)
            .unwrap_or(Value::Null),
        Type::TIME => get::<NaiveTime>(row, idx, column)?
            .map(Value::Time)
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx, column)?
            .map(|v| Value::from_json(&v))
            .unwrap_or(Value::Null),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<Option<String>>>(row, idx, column)?
                .map(|items| Value::StringList(items.into_iter().flatten().collect()))
                .unwrap_or(Value::Null)
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx, column)?.into()
        }
        _ => {
            return Err(RecordError::UnsupportedType {
                column: column.name().to_string(),
                type_name: column.type_().name().to_string(),
            });
        }
    };
    Ok(value)
}

/// Source backed by records held in memory. Tables registered as failing
/// return an error from [`RecordSource::fetch_all`].
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<FetchedRecord>>,
    failing: HashMap<String, String>,
    fetched: Vec<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, records: Vec<Record>) -> Self {
        self.tables
            .insert(table.to_string(), records.into_iter().map(Ok).collect());
        self
    }

    /// Appends a row of `table` that fails to decode with `error`.
    pub fn with_malformed_record(mut self, table: &str, error: RecordError) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(Err(error));
        self
    }

    pub fn with_failing_table(mut self, table: &str, message: &str) -> Self {
        self.failing.insert(table.to_string(), message.to_string());
        self
    }

    /// Tables in the order they were requested.
    pub fn fetched(&self) -> &[String] {
        &self.fetched
    }
}

impl RecordSource for MemorySource {
    fn fetch_all(&mut self, table: &str) -> Result<Vec<FetchedRecord>> {
        self.fetched.push(table.to_string());
        if let Some(message) = self.failing.get(table) {
            return Err(anyhow!("{message}"));
        }
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }
}
