use thiserror::Error;

/// Failures reported by a destination sink for a single call.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to '{table}' failed: {source}")]
    Transport {
        table: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("'{table}' rejected the request with status {status}: {message}")]
    Rejected {
        table: String,
        status: u16,
        message: String,
    },
    #[error("could not decode the response from '{table}': {message}")]
    Decode { table: String, message: String },
    #[error("'{table}' accepted no records out of {sent}")]
    NothingAccepted { table: String, sent: usize },
}

/// Structural problems in a migration plan, detected before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("the plan does not list any tables")]
    Empty,
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("table '{0}' is listed more than once")]
    DuplicateTable(String),
    #[error("'{table}.{column}' references '{target}', which is not in the plan")]
    UnknownReference {
        table: String,
        column: String,
        target: String,
    },
    #[error("'{table}.{column}' references '{target}', which is migrated after it")]
    OutOfOrder {
        table: String,
        column: String,
        target: String,
    },
    #[error("'{table}.{column}' references '{target}', which does not regenerate its keys")]
    NotRemapped {
        table: String,
        column: String,
        target: String,
    },
    #[error("'{table}' requires '{column}', which is not a declared foreign key")]
    RequiredNotForeignKey { table: String, column: String },
    #[error("'{table}' {role} column '{column}' is outside its column list")]
    OutsideColumns {
        table: String,
        role: &'static str,
        column: String,
    },
}

/// Per-record anomalies; the record is dropped and the table continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("primary key column '{0}' is missing or null")]
    MissingPrimaryKey(String),
    #[error("primary key column '{column}' holds an unsupported value '{value}'")]
    UnsupportedPrimaryKey { column: String, value: String },
    #[error("required reference '{0}' did not resolve")]
    UnresolvedReference(String),
    #[error("column '{column}' ({type_name}) could not be decoded: {message}")]
    Undecodable {
        column: String,
        type_name: String,
        message: String,
    },
    #[error("column '{column}' has type {type_name}, which cannot be read")]
    UnsupportedType { column: String, type_name: String },
}
