//! Migration plan: which tables move, in what order, and how each is shaped.
//!
//! A plan is either the built-in storefront plan ([`MigrationPlan::storefront`])
//! or a YAML document loaded with [`MigrationPlan::load`]:
//!
//! ```yaml
//! batch_size: 100
//! tables:
//!   - name: brands
//!     remap_key: true
//!     columns: [id, name, description, slug]
//!     slug: { from: name, into: slug }
//!     upsert_on: name
//!   - name: product_images
//!     columns: [id, product_id, image_url]
//!     foreign_keys: { product_id: products }
//!     required: [product_id]
//! ```
//!
//! Every plan is validated before use. Foreign keys may only point at tables
//! that regenerate their keys and appear earlier in the list, since the
//! identity map of the referenced table must be complete before the
//! referencing table is transformed.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PRIMARY_KEY: &str = "id";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlugPolicy {
    pub from: String,
    pub into: String,
}

impl Default for SlugPolicy {
    fn default() -> Self {
        Self {
            from: "name".to_string(),
            into: "slug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Regenerate the primary key and record the old -> new mapping.
    #[serde(default)]
    pub remap_key: bool,
    /// Columns the destination table accepts; everything else is dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Foreign-key column -> referenced table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub foreign_keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<SlugPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert_on: Option<String>,
    /// Foreign-key columns that must resolve; records failing to do so are dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            remap_key: false,
            columns: None,
            foreign_keys: BTreeMap::new(),
            slug: None,
            upsert_on: None,
            required: Vec::new(),
        }
    }

    pub fn remapped(mut self) -> Self {
        self.remap_key = true;
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn foreign_key(mut self, column: &str, target: &str) -> Self {
        self.foreign_keys
            .insert(column.to_string(), target.to_string());
        self
    }

    pub fn slug_from_name(mut self) -> Self {
        self.slug = Some(SlugPolicy::default());
        self
    }

    pub fn upsert_on(mut self, column: &str) -> Self {
        self.upsert_on = Some(column.to_string());
        self
    }

    pub fn require(mut self, column: &str) -> Self {
        self.required.push(column.to_string());
        self
    }

    pub fn allow_list(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn references(&self, column: &str) -> Option<&str> {
        self.foreign_keys.get(column).map(String::as_str)
    }

    fn accepts(&self, column: &str) -> bool {
        self.columns
            .as_ref()
            .is_none_or(|cols| cols.iter().any(|c| c == column))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationPlan {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub tables: Vec<TableSpec>,
}

impl MigrationPlan {
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tables,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening plan file {path:?}"))?;
        let reader = BufReader::new(file);
        let plan: MigrationPlan =
            serde_yaml::from_reader(reader).context("Parsing migration plan YAML")?;
        plan.validate()
            .with_context(|| format!("Validating plan {path:?}"))?;
        Ok(plan)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing migration plan to YAML")
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn remapped_tables(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|t| t.remap_key)
            .map(|t| t.name.as_str())
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.tables.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.batch_size == 0 {
            return Err(PlanError::ZeroBatchSize);
        }
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, table) in self.tables.iter().enumerate() {
            if positions.insert(table.name.as_str(), idx).is_some() {
                return Err(PlanError::DuplicateTable(table.name.clone()));
            }
        }
        for (idx, table) in self.tables.iter().enumerate() {
            for (column, target) in &table.foreign_keys {
                let position = positions.get(target.as_str()).copied().ok_or_else(|| {
                    PlanError::UnknownReference {
                        table: table.name.clone(),
                        column: column.clone(),
                        target: target.clone(),
                    }
                })?;
                if position >= idx {
                    return Err(PlanError::OutOfOrder {
                        table: table.name.clone(),
                        column: column.clone(),
                        target: target.clone(),
                    });
                }
                if !self.tables[position].remap_key {
                    return Err(PlanError::NotRemapped {
                        table: table.name.clone(),
                        column: column.clone(),
                        target: target.clone(),
                    });
                }
            }
            for column in &table.required {
                if !table.foreign_keys.contains_key(column) {
                    return Err(PlanError::RequiredNotForeignKey {
                        table: table.name.clone(),
                        column: column.clone(),
                    });
                }
                if !table.accepts(column) {
                    return Err(PlanError::OutsideColumns {
                        table: table.name.clone(),
                        role: "required",
                        column: column.clone(),
                    });
                }
            }
            if let Some(key) = &table.upsert_on {
                if !table.accepts(key) {
                    return Err(PlanError::OutsideColumns {
                        table: table.name.clone(),
                        role: "upsert",
                        column: key.clone(),
                    });
                }
            }
            if let Some(policy) = &table.slug {
                if !table.accepts(&policy.into) {
                    return Err(PlanError::OutsideColumns {
                        table: table.name.clone(),
                        role: "slug",
                        column: policy.into.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The storefront schema: catalogue entities first, then orders, purchasing,
    /// stock and user tables.
    pub fn storefront() -> Self {
        let tables = vec![
            TableSpec::new("roles"),
            TableSpec::new("brands")
                .remapped()
                .columns(&["id", "name", "description", "slug"])
                .slug_from_name()
                .upsert_on("name"),
            TableSpec::new("categories")
                .remapped()
                .columns(&["id", "name", "description", "slug"])
                .slug_from_name(),
            TableSpec::new("suppliers")
                .remapped()
                .columns(&["id", "name", "email", "phone", "address"]),
            TableSpec::new("customers"),
            TableSpec::new("products")
                .remapped()
                .columns(&[
                    "id",
                    "sku",
                    "name",
                    "description",
                    "short_description",
                    "slug",
                    "cost_price",
                    "selling_price",
                    "regular_price",
                    "category_id",
                    "brand_id",
                    "supplier_id",
                    "status",
                    "tags",
                    "reorder_level",
                    "stock_status",
                ])
                .foreign_key("brand_id", "brands")
                .foreign_key("category_id", "categories")
                .foreign_key("supplier_id", "suppliers"),
            TableSpec::new("product_variants"),
            TableSpec::new("product_images")
                .columns(&[
                    "id",
                    "product_id",
                    "variant_id",
                    "image_url",
                    "alt_text",
                    "display_order",
                ])
                .foreign_key("product_id", "products")
                .require("product_id"),
            TableSpec::new("orders"),
            TableSpec::new("order_items"),
            TableSpec::new("purchase_orders"),
            TableSpec::new("purchase_order_items"),
            TableSpec::new("stock_adjustments"),
            TableSpec::new("user_profiles"),
            TableSpec::new("user_roles"),
        ];
        Self::new(tables)
    }
}

impl Default for MigrationPlan {
    fn default() -> Self {
        Self::storefront()
    }
}
