//! Session-scoped identity remapping.
//!
//! Each remapped table owns its own old -> new map so tables whose native key
//! spaces overlap never collide. Maps are filled as records are transformed and
//! consulted when later tables rewrite their foreign keys.

use std::collections::HashMap;

use log::warn;
use uuid::Uuid;

use crate::{
    data::Value,
    error::RecordError,
    plan::TableSpec,
};

/// Hashable form of a source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OldKey {
    Integer(i64),
    Text(String),
}

impl OldKey {
    /// Integer and text identifiers are supported; `Null` has no key.
    pub fn from_value(value: &Value) -> Option<OldKey> {
        match value {
            Value::Integer(i) => Some(OldKey::Integer(*i)),
            Value::String(s) => Some(OldKey::Text(s.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentityMap {
    tables: HashMap<String, HashMap<OldKey, String>>,
    duplicates: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh identifier for `old_id` in `table` and records it.
    /// A repeated `old_id` is logged and overwritten.
    pub fn assign_new_id(&mut self, table: &str, old_id: OldKey) -> String {
        let new_id = Uuid::new_v4().to_string();
        let map = self.tables.entry(table.to_string()).or_default();
        if let Some(previous) = map.insert(old_id.clone(), new_id.clone()) {
            self.duplicates += 1;
            warn!(
                "Duplicate source key {:?} in '{}'; replacing {} with {}",
                old_id, table, previous, new_id
            );
        }
        new_id
    }

    /// Regenerates the primary key of a record belonging to a remapped table.
    pub fn assign_for_value(
        &mut self,
        table: &str,
        column: &str,
        old_value: &Value,
    ) -> Result<String, RecordError> {
        if old_value.is_null() {
            return Err(RecordError::MissingPrimaryKey(column.to_string()));
        }
        let key =
            OldKey::from_value(old_value).ok_or_else(|| RecordError::UnsupportedPrimaryKey {
                column: column.to_string(),
                value: old_value.as_display(),
            })?;
        Ok(self.assign_new_id(table, key))
    }

    pub fn lookup(&self, table: &str, old_id: &OldKey) -> Option<&str> {
        self.tables
            .get(table)
            .and_then(|map| map.get(old_id))
            .map(String::as_str)
    }

    /// Rewrites `old_value` of `table.column` through the map of the table the
    /// column references. Unresolved or unmappable values become `Null`.
    pub fn remap_foreign_key(&self, table: &TableSpec, column: &str, old_value: &Value) -> Value {
        let Some(target) = table.references(column) else {
            return old_value.clone();
        };
        OldKey::from_value(old_value)
            .and_then(|key| self.lookup(target, &key))
            .map(|new_id| Value::String(new_id.to_string()))
            .unwrap_or(Value::Null)
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn new_ids_are_unique_and_stable() {
        let mut map = IdentityMap::new();
        let ids = (0..500)
            .map(|i| map.assign_new_id("brands", OldKey::Integer(i)))
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 500);
        let first = map.lookup("brands", &OldKey::Integer(0)).unwrap().to_string();
        assert_eq!(map.lookup("brands", &OldKey::Integer(0)), Some(first.as_str()));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn tables_do_not_share_key_spaces() {
        let mut map = IdentityMap::new();
        let brand = map.assign_new_id("brands", OldKey::Integer(1));
        let category = map.assign_new_id("categories", OldKey::Integer(1));
        assert_ne!(brand, category);
        assert_eq!(map.lookup("brands", &OldKey::Integer(1)), Some(brand.as_str()));
        assert_eq!(map.len("brands"), 1);
        assert_eq!(map.len("categories"), 1);
    }

    #[test]
    fn duplicate_keys_keep_the_last_assignment() {
        let mut map = IdentityMap::new();
        let _first = map.assign_new_id("brands", OldKey::Text("a".into()));
        let second = map.assign_new_id("brands", OldKey::Text("a".into()));
        assert_eq!(map.lookup("brands", &OldKey::Text("a".into())), Some(second.as_str()));
        assert_eq!(map.duplicate_count(), 1);
    }

    #[test]
    fn foreign_keys_resolve_or_become_null() {
        let mut map = IdentityMap::new();
        let brand = map.assign_new_id("brands", OldKey::Integer(1));
        let products = TableSpec::new("products").foreign_key("brand_id", "brands");

        assert_eq!(
            map.remap_foreign_key(&products, "brand_id", &Value::Integer(1)),
            Value::String(brand)
        );
        assert_eq!(
            map.remap_foreign_key(&products, "brand_id", &Value::Integer(99)),
            Value::Null
        );
        assert_eq!(
            map.remap_foreign_key(&products, "brand_id", &Value::Null),
            Value::Null
        );
        assert_eq!(
            map.remap_foreign_key(&products, "name", &Value::from("kept")),
            Value::from("kept")
        );
    }

    #[test]
    fn unsupported_primary_keys_are_record_errors() {
        let mut map = IdentityMap::new();
        assert_eq!(
            map.assign_for_value("brands", "id", &Value::Null),
            Err(RecordError::MissingPrimaryKey("id".into()))
        );
        assert!(matches!(
            map.assign_for_value("brands", "id", &Value::Float(1.5)),
            Err(RecordError::UnsupportedPrimaryKey { .. })
        ));
        assert!(map.is_empty());
    }
}
