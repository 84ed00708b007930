//! Destination collaborators: the record API rows are written to.
//!
//! The destination only offers batched insert, upsert on one conflict column and
//! column selection. [`RestSink`] speaks that contract to a PostgREST endpoint;
//! [`MemorySink`] keeps everything in memory and backs `--dry-run` and tests.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use anyhow::Context;
use log::debug;
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder},
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    data::{Record, Value, record_from_json, record_to_json},
    error::SinkError,
};

pub type SinkResult<T> = std::result::Result<T, SinkError>;

pub trait RecordSink {
    /// Inserts `records`, returning the rows the destination accepted.
    fn insert(&mut self, table: &str, records: &[Record]) -> SinkResult<Vec<Record>>;

    /// Inserts `records`, merging into existing rows that share `conflict_key`.
    fn upsert(
        &mut self,
        table: &str,
        records: &[Record],
        conflict_key: &str,
    ) -> SinkResult<Vec<Record>>;

    fn select(&mut self, table: &str, columns: &[&str]) -> SinkResult<Vec<Record>>;
}

pub struct RestSink {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestSink {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Confirms the endpoint is reachable and accepts the credential.
    pub fn check_connection(&self) -> SinkResult<()> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .map_err(|source| SinkError::Transport {
                table: "/".to_string(),
                source,
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                table: "/".to_string(),
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            })
        }
    }

    fn execute(&self, table: &str, request: RequestBuilder) -> SinkResult<Vec<Record>> {
        let response = request.send().map_err(|source| SinkError::Transport {
            table: table.to_string(),
            source,
        })?;
        let status = response.status();
        let body = response.text().map_err(|source| SinkError::Transport {
            table: table.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                table: table.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return Ok(Vec::new());
        }
        decode_rows(table, &body)
    }

    fn write(
        &self,
        table: &str,
        records: &[Record],
        conflict_key: Option<&str>,
    ) -> SinkResult<Vec<Record>> {
        let payload = JsonValue::Array(records.iter().map(record_to_json).collect());
        let mut request = self.authorized(self.client.post(self.endpoint(table)));
        request = match conflict_key {
            Some(key) => request
                .query(&[("on_conflict", key)])
                .header("Prefer", "resolution=merge-duplicates,return=representation"),
            None => request.header("Prefer", "return=representation"),
        };
        debug!(
            "POST {} ({} record(s), conflict key {:?})",
            table,
            records.len(),
            conflict_key
        );
        self.execute(table, request.json(&payload))
    }
}

impl RecordSink for RestSink {
    fn insert(&mut self, table: &str, records: &[Record]) -> SinkResult<Vec<Record>> {
        self.write(table, records, None)
    }

    fn upsert(
        &mut self,
        table: &str,
        records: &[Record],
        conflict_key: &str,
    ) -> SinkResult<Vec<Record>> {
        self.write(table, records, Some(conflict_key))
    }

    fn select(&mut self, table: &str, columns: &[&str]) -> SinkResult<Vec<Record>> {
        let request = self
            .authorized(self.client.get(self.endpoint(table)))
            .query(&[("select", columns.join(","))]);
        self.execute(table, request)
    }
}

fn decode_rows(table: &str, body: &str) -> SinkResult<Vec<Record>> {
    let parsed: JsonValue = serde_json::from_str(body).map_err(|err| SinkError::Decode {
        table: table.to_string(),
        message: err.to_string(),
    })?;
    let rows = match &parsed {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::Object(_) => std::slice::from_ref(&parsed),
        other => {
            return Err(SinkError::Decode {
                table: table.to_string(),
                message: format!("expected rows, got {other}"),
            });
        }
    };
    rows.iter()
        .map(|row| {
            record_from_json(row).ok_or_else(|| SinkError::Decode {
                table: table.to_string(),
                message: format!("expected an object, got {row}"),
            })
        })
        .collect()
}

/// Pulls the `message` field out of a PostgREST error body when there is one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails as if the destination rejected it.
    Reject,
    /// The call succeeds but reports no accepted rows.
    AcceptNothing,
}

/// Call recorded by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub table: String,
    pub conflict_key: Option<String>,
    pub records: Vec<Record>,
}

/// In-memory destination. Rows without an `id` get a fresh UUID, as the
/// destination's column default would assign one. Upserts follow
/// `merge-duplicates`: every sent column, `id` included, overwrites the
/// matching row, and a request carrying the same conflict value twice is
/// rejected.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, Vec<Record>>,
    calls: Vec<SinkCall>,
    faults: HashMap<(String, usize), Fault>,
    writes_per_table: HashMap<String, usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `fault` into the `nth` (1-based) write to `table`.
    pub fn with_fault(mut self, table: &str, nth: usize, fault: Fault) -> Self {
        self.faults.insert((table.to_string(), nth), fault);
        self
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<Record>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn rows(&self, table: &str) -> &[Record] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn calls(&self) -> &[SinkCall] {
        &self.calls
    }

    pub fn calls_for(&self, table: &str) -> Vec<&SinkCall> {
        self.calls.iter().filter(|c| c.table == table).collect()
    }

    fn write(
        &mut self,
        table: &str,
        records: &[Record],
        conflict_key: Option<&str>,
    ) -> SinkResult<Vec<Record>> {
        self.calls.push(SinkCall {
            table: table.to_string(),
            conflict_key: conflict_key.map(str::to_string),
            records: records.to_vec(),
        });
        let count = self.writes_per_table.entry(table.to_string()).or_insert(0);
        *count += 1;
        match self.faults.get(&(table.to_string(), *count)) {
            Some(Fault::Reject) => {
                return Err(SinkError::Rejected {
                    table: table.to_string(),
                    status: 409,
                    message: "injected rejection".to_string(),
                });
            }
            Some(Fault::AcceptNothing) => return Ok(Vec::new()),
            None => {}
        }
        if let Some(key) = conflict_key {
            if let Some(repeated) = repeated_value(records, key) {
                return Err(SinkError::Rejected {
                    table: table.to_string(),
                    status: 500,
                    message: format!(
                        "ON CONFLICT DO UPDATE command cannot affect row a second time ({key} = {repeated})"
                    ),
                });
            }
        }

        let stored = self.tables.entry(table.to_string()).or_default();
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            let mut row = record.clone();
            let existing = conflict_key.and_then(|key| {
                let wanted = row.get(key).filter(|v| !v.is_null())?;
                stored.iter().position(|r| r.get(key) == Some(wanted))
            });
            match existing {
                Some(idx) => {
                    let target = &mut stored[idx];
                    for (column, value) in row {
                        target.insert(column, value);
                    }
                    accepted.push(target.clone());
                }
                None => {
                    if row.get("id").is_none_or(Value::is_null) {
                        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
                    }
                    stored.push(row.clone());
                    accepted.push(row);
                }
            }
        }
        Ok(accepted)
    }
}

/// First non-null value of `key` that appears more than once in `records`.
fn repeated_value(records: &[Record], key: &str) -> Option<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(key).filter(|value| !value.is_null()))
        .map(|value| value.to_json().to_string())
        .find(|value| !seen.insert(value.clone()))
}

impl RecordSink for MemorySink {
    fn insert(&mut self, table: &str, records: &[Record]) -> SinkResult<Vec<Record>> {
        self.write(table, records, None)
    }

    fn upsert(
        &mut self,
        table: &str,
        records: &[Record],
        conflict_key: &str,
    ) -> SinkResult<Vec<Record>> {
        self.write(table, records, Some(conflict_key))
    }

    fn select(&mut self, table: &str, columns: &[&str]) -> SinkResult<Vec<Record>> {
        Ok(self
            .rows(table)
            .iter()
            .map(|row| {
                row.iter()
                    .filter(|(column, _)| columns.contains(&column.as_str()))
                    .map(|(column, value)| (column.clone(), value.clone()))
                    .collect()
            })
            .collect())
    }
}
