use crate::data::Record;

/// Restricts `record` to the columns in `allow_list`, keeping the record's own
/// column order. With no allow-list the record is returned as is.
pub fn project(record: Record, allow_list: Option<&[String]>) -> Record {
    match allow_list {
        None => record,
        Some(allowed) => record
            .into_iter()
            .filter(|(column, _)| allowed.iter().any(|a| a == column))
            .collect(),
    }
}
