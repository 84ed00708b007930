//! Table-by-table migration driven by a [`MigrationPlan`].
//!
//! Each table passes through `Fetching -> Transforming -> Sending` and ends in
//! one of `Done`, `Skipped` (the fetch failed) or `Aborted` (a batch failed).
//! Failures never cross a table boundary: the next table is always attempted.
//!
//! Within a table every record is transformed in a fixed order:
//!
//! 1. values are normalized ([`crate::normalize`]),
//! 2. the primary key is regenerated when the table is remapped,
//! 3. declared foreign keys are rewritten through the [`IdentityMap`],
//! 4. a missing slug is derived from the slug policy's source column,
//! 5. the record is projected onto the table's column list,
//! 6. records whose required references did not resolve are dropped.
//!
//! Upsert tables fold records sharing the natural key into one before sending,
//! since the destination rejects a request that touches the same row twice.
//! The first record's primary key survives; later values win for every other
//! column.
//!
//! Batches are sent in order, one attempt each. A rejected batch, or one that
//! reports no accepted rows, stops the remaining batches of that table.

use std::{collections::HashMap, fmt};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    data::{Record, Value},
    destination::RecordSink,
    error::{RecordError, SinkError},
    normalize::normalize_record,
    plan::{MigrationPlan, TableSpec},
    projection::project,
    remap::IdentityMap,
    slug::slugify,
    source::RecordSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Fetching,
    Transforming,
    Sending,
    Done,
    Skipped,
    Aborted,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableState::Fetching => "fetching",
            TableState::Transforming => "transforming",
            TableState::Sending => "sending",
            TableState::Done => "done",
            TableState::Skipped => "skipped",
            TableState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub table: String,
    pub state: TableState,
    pub fetched: usize,
    pub prepared: usize,
    pub dropped: usize,
    pub merged: usize,
    pub batches_total: usize,
    pub batches_sent: usize,
    pub accepted: usize,
    pub error: Option<String>,
}

impl TableOutcome {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: TableState::Fetching,
            fetched: 0,
            prepared: 0,
            dropped: 0,
            merged: 0,
            batches_total: 0,
            batches_sent: 0,
            accepted: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub tables: Vec<TableOutcome>,
}

impl MigrationReport {
    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn count(&self, state: TableState) -> usize {
        self.tables.iter().filter(|t| t.state == state).count()
    }

    pub fn is_clean(&self) -> bool {
        self.tables.iter().all(|t| t.state == TableState::Done)
    }

    pub fn accepted(&self) -> usize {
        self.tables.iter().map(|t| t.accepted).sum()
    }
}

/// Migrates every table of `plan` in order. `identities` carries the old -> new
/// identifier maps for the whole session.
pub fn run(
    plan: &MigrationPlan,
    source: &mut dyn RecordSource,
    sink: &mut dyn RecordSink,
    identities: &mut IdentityMap,
) -> MigrationReport {
    let mut report = MigrationReport::default();
    for spec in &plan.tables {
        info!("--- Migrating table: {} ---", spec.name);
        let outcome = migrate_table(spec, plan.batch_size, source, sink, identities);
        match outcome.state {
            TableState::Done => info!(
                "Finished '{}': {} of {} record(s) accepted",
                spec.name, outcome.accepted, outcome.fetched
            ),
            TableState::Skipped => warn!(
                "Skipped '{}': {}",
                spec.name,
                outcome.error.as_deref().unwrap_or("fetch failed")
            ),
            TableState::Aborted => error!(
                "Aborted '{}' after {} of {} batch(es): {}",
                spec.name,
                outcome.batches_sent,
                outcome.batches_total,
                outcome.error.as_deref().unwrap_or("batch failed")
            ),
            _ => {}
        }
        report.tables.push(outcome);
    }
    info!(
        "Data migration completed: {} done, {} skipped, {} aborted",
        report.count(TableState::Done),
        report.count(TableState::Skipped),
        report.count(TableState::Aborted)
    );
    report
}

pub fn migrate_table(
    spec: &TableSpec,
    batch_size: usize,
    source: &mut dyn RecordSource,
    sink: &mut dyn RecordSink,
    identities: &mut IdentityMap,
) -> TableOutcome {
    let mut outcome = TableOutcome::new(&spec.name);

    let records = match source.fetch_all(&spec.name) {
        Ok(records) => records,
        Err(err) => {
            outcome.state = TableState::Skipped;
            outcome.error = Some(format!("{err:#}"));
            return outcome;
        }
    };
    outcome.fetched = records.len();
    info!("Found {} record(s) in '{}'", records.len(), spec.name);
    if records.is_empty() {
        outcome.state = TableState::Done;
        return outcome;
    }

    outcome.state = TableState::Transforming;
    let mut prepared = Vec::with_capacity(records.len());
    for (idx, fetched) in records.into_iter().enumerate() {
        match fetched.and_then(|record| transform_record(spec, record, identities)) {
            Ok(record) => prepared.push(record),
            Err(err) => {
                outcome.dropped += 1;
                warn!("Dropping record {} of '{}': {}", idx + 1, spec.name, err);
            }
        }
    }
    outcome.prepared = prepared.len();

    if let Some(key) = &spec.upsert_on {
        let (collapsed, merged) = collapse_on_key(prepared, key, &spec.primary_key);
        if merged > 0 {
            warn!(
                "Merged {} record(s) of '{}' sharing a '{}' value",
                merged, spec.name, key
            );
        }
        outcome.merged = merged;
        prepared = collapsed;
    }

    outcome.state = TableState::Sending;
    match send_batches(spec, &prepared, batch_size.max(1), sink, &mut outcome) {
        Ok(()) => outcome.state = TableState::Done,
        Err(err) => {
            outcome.state = TableState::Aborted;
            outcome.error = Some(err.to_string());
        }
    }
    outcome
}

/// Applies the per-record pipeline for `spec`. Remapped tables record their new
/// primary key in `identities` even when the record is later dropped.
pub fn transform_record(
    spec: &TableSpec,
    record: Record,
    identities: &mut IdentityMap,
) -> Result<Record, RecordError> {
    let mut record = normalize_record(record);

    if spec.remap_key {
        let old = record
            .get(&spec.primary_key)
            .cloned()
            .unwrap_or(Value::Null);
        let new_id = identities.assign_for_value(&spec.name, &spec.primary_key, &old)?;
        record.insert(spec.primary_key.clone(), Value::String(new_id));
    }

    for column in spec.foreign_keys.keys() {
        if let Some(old) = record.get(column) {
            let remapped = identities.remap_foreign_key(spec, column, old);
            record.insert(column.clone(), remapped);
        }
    }

    if let Some(policy) = &spec.slug {
        let has_slug = record
            .get(&policy.into)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_slug {
            let derived = slugify(record.get(&policy.from).and_then(Value::as_str));
            record.insert(policy.into.clone(), derived.into());
        }
    }

    let record = project(record, spec.allow_list());

    for column in &spec.required {
        let resolved = record
            .get(column)
            .and_then(Value::as_str)
            .is_some_and(|id| Uuid::parse_str(id).is_ok());
        if !resolved {
            return Err(RecordError::UnresolvedReference(column.clone()));
        }
    }

    Ok(record)
}

/// Folds records with the same non-null `key` into the first of them. Later
/// values overwrite earlier ones, except `primary_key`.
pub fn collapse_on_key(
    records: Vec<Record>,
    key: &str,
    primary_key: &str,
) -> (Vec<Record>, usize) {
    let mut collapsed: Vec<Record> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut merged = 0;
    for record in records {
        // JSON text keeps 1 and "1" apart.
        let Some(natural) = record
            .get(key)
            .filter(|value| !value.is_null())
            .map(|value| value.to_json().to_string())
        else {
            collapsed.push(record);
            continue;
        };
        match positions.get(&natural) {
            Some(&idx) => {
                merged += 1;
                let target = &mut collapsed[idx];
                for (column, value) in record {
                    if column != primary_key {
                        target.insert(column, value);
                    }
                }
            }
            None => {
                positions.insert(natural, collapsed.len());
                collapsed.push(record);
            }
        }
    }
    (collapsed, merged)
}

fn send_batches(
    spec: &TableSpec,
    records: &[Record],
    batch_size: usize,
    sink: &mut dyn RecordSink,
    outcome: &mut TableOutcome,
) -> Result<(), SinkError> {
    outcome.batches_total = records.len().div_ceil(batch_size);
    for (idx, batch) in records.chunks(batch_size).enumerate() {
        let response = match &spec.upsert_on {
            Some(key) => sink.upsert(&spec.name, batch, key),
            None => sink.insert(&spec.name, batch),
        };
        outcome.batches_sent += 1;
        let accepted = response?;
        if accepted.is_empty() {
            return Err(SinkError::NothingAccepted {
                table: spec.name.clone(),
                sent: batch.len(),
            });
        }
        outcome.accepted += accepted.len();
        debug!(
            "Batch {}/{} of '{}': {} accepted",
            idx + 1,
            outcome.batches_total,
            spec.name,
            accepted.len()
        );
    }
    Ok(())
}
