//! CSV product ingestion with lookup-or-create of reference entities.
//!
//! Brands, suppliers and categories are resolved by exact name against a
//! [`ReferenceCache`] seeded from the destination once per run. Misses are
//! created through the sink and remembered, so later rows reuse the same
//! identifier. Each row then yields one product and zero or more images.
//!
//! Rows are independent: a row that cannot be completed is logged and skipped,
//! and ingestion continues with the next one.

use std::{collections::HashMap, fmt, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::{info, warn};

use crate::{
    data::{Record, Value, parse_float_or, parse_integer_or, record_of},
    destination::RecordSink,
    error::SinkError,
    io_utils,
    slug::slugify,
};

/// Column names of the storefront export this ingestor reads.
pub mod columns {
    pub const SKU: &str = "SKU";
    pub const NAME: &str = "Name";
    pub const DESCRIPTION: &str = "Description";
    pub const SHORT_DESCRIPTION: &str = "Short description";
    pub const REGULAR_PRICE: &str = "Regular price";
    pub const SALE_PRICE: &str = "Sale price";
    pub const COST: &str = "Meta: _wc_cog_cost";
    pub const STOCK: &str = "Stock";
    pub const BRAND: &str = "Attribute 1 value(s)";
    pub const CATEGORIES: &str = "Categories";
    pub const TAGS: &str = "Tags";
    pub const IMAGES: &str = "Images";
    pub const PUBLISHED: &str = "Published";
    pub const IN_STOCK: &str = "In stock?";
    pub const FEATURED: &str = "Is featured?";
    pub const VISIBILITY: &str = "Visibility in catalog";
}

pub const CATEGORY_PATH_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Brand,
    Supplier,
    Category,
}

impl EntityKind {
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Brand => "brands",
            EntityKind::Supplier => "suppliers",
            EntityKind::Category => "categories",
        }
    }

    fn new_record(self, name: &str) -> Record {
        match self {
            EntityKind::Category => record_of([("name", name), ("description", name)]),
            EntityKind::Brand | EntityKind::Supplier => record_of([("name", name)]),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Brand => "brand",
            EntityKind::Supplier => "supplier",
            EntityKind::Category => "category",
        };
        f.write_str(label)
    }
}

/// Natural name -> destination id, one map per reference entity.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    maps: HashMap<EntityKind, HashMap<String, String>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every existing brand, supplier and category from the destination.
    pub fn seed(sink: &mut dyn RecordSink) -> Result<Self> {
        let mut cache = Self::new();
        for kind in [EntityKind::Brand, EntityKind::Supplier, EntityKind::Category] {
            let rows = sink
                .select(kind.table(), &["id", "name"])
                .with_context(|| format!("Loading existing {}", kind.table()))?;
            for row in &rows {
                if let (Some(name), Some(id)) = (
                    row.get("name").and_then(Value::as_str),
                    row.get("id").and_then(identifier),
                ) {
                    cache.insert(kind, name, &id);
                }
            }
            info!("Loaded {} existing {}", cache.len(kind), kind.table());
        }
        Ok(cache)
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&str> {
        self.maps
            .get(&kind)
            .and_then(|map| map.get(name))
            .map(String::as_str)
    }

    pub fn insert(&mut self, kind: EntityKind, name: &str, id: &str) {
        self.maps
            .entry(kind)
            .or_default()
            .insert(name.to_string(), id.to_string());
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.maps.get(&kind).map_or(0, HashMap::len)
    }

    /// Returns the cached id for `name`, creating the entity on a miss.
    pub fn resolve(
        &mut self,
        kind: EntityKind,
        name: &str,
        sink: &mut dyn RecordSink,
        report: &mut IngestReport,
    ) -> Result<String, SinkError> {
        if let Some(id) = self.get(kind, name) {
            return Ok(id.to_string());
        }
        let accepted = sink.insert(kind.table(), &[kind.new_record(name)])?;
        let id = first_id(kind.table(), &accepted)?;
        self.insert(kind, name, &id);
        *report.created.entry(kind).or_insert(0) += 1;
        info!("Created {} '{}' ({})", kind, name, id);
        Ok(id)
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

fn first_id(table: &str, accepted: &[Record]) -> Result<String, SinkError> {
    match accepted.first() {
        None => Err(SinkError::NothingAccepted {
            table: table.to_string(),
            sent: 1,
        }),
        Some(row) => row.get("id").and_then(identifier).ok_or_else(|| SinkError::Decode {
            table: table.to_string(),
            message: "accepted row carries no id".to_string(),
        }),
    }
}

/// One input row keyed by header.
#[derive(Debug, Clone, Default)]
pub struct CsvRow {
    values: HashMap<String, String>,
}

impl CsvRow {
    pub fn new(headers: &[String], fields: Vec<String>) -> Self {
        let values = headers.iter().cloned().zip(fields).collect();
        Self { values }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Like [`CsvRow::get`] but treats an empty cell as absent.
    pub fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.is_empty())
    }

    fn flag(&self, column: &str) -> bool {
        self.get(column) == Some("1")
    }

    fn list(&self, column: &str) -> Vec<String> {
        self.get(column)
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn sku(&self) -> &str {
        self.get(columns::SKU).unwrap_or("")
    }
}

/// First segment of a hierarchical category path such as `"Shoes > Running"`.
pub fn main_category(path: &str) -> Option<&str> {
    path.split(CATEGORY_PATH_SEPARATOR)
        .next()
        .filter(|segment| !segment.is_empty())
}

pub fn image_urls(row: &CsvRow) -> Vec<String> {
    row.list(columns::IMAGES)
}

pub fn build_product(
    row: &CsvRow,
    brand_id: &str,
    supplier_id: Option<&str>,
    category_id: Option<&str>,
) -> Record {
    let regular_price = parse_float_or(row.get(columns::REGULAR_PRICE), 0.0);
    let sale_price = parse_float_or(row.get(columns::SALE_PRICE), 0.0);
    let selling_price = if sale_price > 0.0 {
        sale_price
    } else {
        regular_price
    };
    let name = row.get(columns::NAME);
    let status = if row.flag(columns::PUBLISHED) {
        "active"
    } else {
        "draft"
    };
    let stock_status = if row.flag(columns::IN_STOCK) {
        "in_stock"
    } else {
        "out_of_stock"
    };

    let mut product = Record::new();
    product.insert("sku".into(), row.get(columns::SKU).into());
    product.insert("name".into(), name.into());
    product.insert("description".into(), row.get(columns::DESCRIPTION).into());
    product.insert(
        "short_description".into(),
        row.get(columns::SHORT_DESCRIPTION).into(),
    );
    product.insert("slug".into(), slugify(name).into());
    product.insert(
        "cost_price".into(),
        parse_float_or(row.get(columns::COST), 0.0).into(),
    );
    product.insert("selling_price".into(), selling_price.into());
    product.insert("regular_price".into(), regular_price.into());
    product.insert(
        "quantity_on_hand".into(),
        parse_integer_or(row.get(columns::STOCK), 0).into(),
    );
    product.insert("category_id".into(), category_id.into());
    product.insert("brand_id".into(), brand_id.into());
    product.insert("model_name".into(), name.into());
    product.insert("supplier_id".into(), supplier_id.into());
    product.insert("status".into(), status.into());
    product.insert("tags".into(), Value::StringList(row.list(columns::TAGS)));
    product.insert("stock_status".into(), stock_status.into());
    product.insert("featured".into(), row.flag(columns::FEATURED).into());
    product.insert(
        "catalog_visibility".into(),
        (row.get(columns::VISIBILITY) == Some("visible")).into(),
    );
    product
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Created { product_id: String, images: usize },
    Skipped(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: usize,
    pub products: usize,
    pub skipped: usize,
    pub images: usize,
    pub image_failures: usize,
    pub created: HashMap<EntityKind, usize>,
}

impl IngestReport {
    pub fn created(&self, kind: EntityKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }
}

/// Resolves references for one row and writes its product and images.
///
/// Only brand and product failures skip the row; a supplier or category that
/// cannot be created leaves the corresponding reference null.
pub fn ingest_row(
    row: &CsvRow,
    cache: &mut ReferenceCache,
    sink: &mut dyn RecordSink,
    report: &mut IngestReport,
) -> RowOutcome {
    let Some(brand_name) = row.non_empty(columns::BRAND) else {
        return RowOutcome::Skipped("no brand".to_string());
    };

    let brand_id = match cache.resolve(EntityKind::Brand, brand_name, sink, report) {
        Ok(id) => id,
        Err(err) => {
            return RowOutcome::Skipped(format!(
                "failed to create brand '{brand_name}': {err}"
            ));
        }
    };

    // Suppliers share the brand's name.
    let supplier_id = cache
        .resolve(EntityKind::Supplier, brand_name, sink, report)
        .map_err(|err| warn!("Failed to create supplier '{brand_name}': {err}"))
        .ok();

    let category_id = row
        .non_empty(columns::CATEGORIES)
        .and_then(main_category)
        .and_then(|category| {
            cache
                .resolve(EntityKind::Category, category, sink, report)
                .map_err(|err| warn!("Failed to create category '{category}': {err}"))
                .ok()
        });

    let product = build_product(
        row,
        &brand_id,
        supplier_id.as_deref(),
        category_id.as_deref(),
    );
    let product_id = match sink
        .insert("products", &[product])
        .and_then(|accepted| first_id("products", &accepted))
    {
        Ok(id) => id,
        Err(err) => {
            return RowOutcome::Skipped(format!("failed to insert product: {err}"));
        }
    };
    report.products += 1;

    let urls = image_urls(row);
    let mut images = 0;
    if !urls.is_empty() {
        let records = urls
            .iter()
            .map(|url| record_of([("product_id", product_id.as_str()), ("image_url", url.as_str())]))
            .collect::<Vec<_>>();
        match sink.insert("product_images", &records) {
            Ok(accepted) => images = accepted.len(),
            Err(err) => {
                report.image_failures += 1;
                warn!("Failed to insert images for SKU '{}': {}", row.sku(), err);
            }
        }
    }
    report.images += images;

    RowOutcome::Created { product_id, images }
}

/// Ingests every row, logging and skipping any that fail.
pub fn ingest_rows<I>(
    rows: I,
    cache: &mut ReferenceCache,
    sink: &mut dyn RecordSink,
) -> IngestReport
where
    I: IntoIterator<Item = Result<CsvRow>>,
{
    let mut report = IngestReport::default();
    for (idx, row) in rows.into_iter().enumerate() {
        report.rows += 1;
        let line = idx + 2;
        let outcome = row.map(|row| ingest_row(&row, cache, sink, &mut report));
        match outcome {
            Ok(RowOutcome::Created { product_id, images }) => {
                info!("Row {line}: created product {product_id} with {images} image(s)");
            }
            Ok(RowOutcome::Skipped(reason)) => {
                report.skipped += 1;
                warn!("Row {line}: skipped ({reason})");
            }
            Err(err) => {
                report.skipped += 1;
                warn!("Row {line}: {err:#}");
            }
        }
    }
    report
}

/// Reads `path` as CSV and ingests it.
pub fn ingest_path(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
    sink: &mut dyn RecordSink,
) -> Result<IngestReport> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers of {path:?}"))?;
    if !headers.iter().any(|h| h == columns::BRAND) {
        warn!(
            "{:?} has no '{}' column; every row will be skipped",
            path,
            columns::BRAND
        );
    }

    info!("Fetching existing brands, suppliers and categories");
    let mut cache = ReferenceCache::seed(sink)?;

    let rows = reader.byte_records().map(|record| -> Result<CsvRow> {
        let record = record.map_err(|err| anyhow!("Malformed CSV record: {err}"))?;
        let fields = io_utils::decode_record(&record, encoding)?;
        Ok(CsvRow::new(&headers, fields))
    });
    let report = ingest_rows(rows, &mut cache, sink);
    info!(
        "Ingested {} row(s): {} product(s), {} image(s), {} skipped",
        report.rows, report.products, report.images, report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Fault, MemorySink};

    fn row(pairs: &[(&str, &str)]) -> CsvRow {
        CsvRow::from_pairs(pairs)
    }

    #[test]
    fn main_category_takes_first_segment() {
        assert_eq!(main_category("Shoes > Running > Trail"), Some("Shoes"));
        assert_eq!(main_category("Bags"), Some("Bags"));
        assert_eq!(main_category(""), None);
    }

    #[test]
    fn build_product_maps_storefront_columns() {
        let row = row(&[
            (columns::SKU, "SKU-1"),
            (columns::NAME, "Trail Runner 2"),
            (columns::REGULAR_PRICE, "120"),
            (columns::SALE_PRICE, "99.5"),
            (columns::COST, ""),
            (columns::STOCK, "7.0"),
            (columns::TAGS, "running, trail,,"),
            (columns::PUBLISHED, "1"),
            (columns::IN_STOCK, "0"),
            (columns::FEATURED, "1"),
            (columns::VISIBILITY, "visible"),
        ]);
        let product = build_product(&row, "b1", None, Some("c1"));
        assert_eq!(product["slug"], Value::from("trail-runner-2"));
        assert_eq!(product["selling_price"], Value::Float(99.5));
        assert_eq!(product["regular_price"], Value::Float(120.0));
        assert_eq!(product["cost_price"], Value::Float(0.0));
        assert_eq!(product["quantity_on_hand"], Value::Integer(7));
        assert_eq!(product["supplier_id"], Value::Null);
        assert_eq!(product["category_id"], Value::from("c1"));
        assert_eq!(product["model_name"], Value::from("Trail Runner 2"));
        assert_eq!(product["status"], Value::from("active"));
        assert_eq!(product["stock_status"], Value::from("out_of_stock"));
        assert_eq!(product["featured"], Value::Boolean(true));
        assert_eq!(product["catalog_visibility"], Value::Boolean(true));
        assert_eq!(
            product["tags"],
            Value::StringList(vec!["running".into(), "trail".into()])
        );
    }

    #[test]
    fn selling_price_falls_back_to_regular_price() {
        let row = row(&[(columns::REGULAR_PRICE, "10"), (columns::SALE_PRICE, "0")]);
        let product = build_product(&row, "b1", Some("s1"), None);
        assert_eq!(product["selling_price"], Value::Float(10.0));
        assert_eq!(product["status"], Value::from("draft"));
    }

    #[test]
    fn row_without_brand_is_skipped() {
        let mut sink = MemorySink::new();
        let mut cache = ReferenceCache::new();
        let mut report = IngestReport::default();
        let outcome = ingest_row(
            &row(&[(columns::SKU, "A"), (columns::BRAND, "")]),
            &mut cache,
            &mut sink,
            &mut report,
        );
        assert!(matches!(outcome, RowOutcome::Skipped(_)));
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn supplier_failure_leaves_null_supplier() {
        let mut sink = MemorySink::new().with_fault("suppliers", 1, Fault::Reject);
        let mut cache = ReferenceCache::new();
        let mut report = IngestReport::default();
        let outcome = ingest_row(
            &row(&[(columns::BRAND, "Acme"), (columns::NAME, "Widget")]),
            &mut cache,
            &mut sink,
            &mut report,
        );
        assert!(matches!(outcome, RowOutcome::Created { images: 0, .. }));
        assert_eq!(sink.rows("products")[0]["supplier_id"], Value::Null);
        assert_eq!(report.created(EntityKind::Brand), 1);
        assert_eq!(report.created(EntityKind::Supplier), 0);
    }
}
