#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use record_migrate::data::{Record, Value, record_of};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn brand(id: i64, name: &str) -> Record {
    record_of([
        ("id", Value::Integer(id)),
        ("name", Value::from(name)),
        ("description", Value::Null),
        ("created_at", Value::from("legacy")),
    ])
}

pub fn product(id: i64, sku: &str, brand_id: Option<i64>) -> Record {
    record_of([
        ("id", Value::Integer(id)),
        ("sku", Value::from(sku)),
        ("name", Value::from(format!("Product {sku}"))),
        ("brand_id", Value::from(brand_id)),
        ("category_id", Value::Null),
        ("supplier_id", Value::Null),
        ("internal_notes", Value::from("not exported")),
    ])
}

pub fn image(id: i64, product_id: i64, url: &str) -> Record {
    record_of([
        ("id", Value::Integer(id)),
        ("product_id", Value::Integer(product_id)),
        ("image_url", Value::from(url)),
    ])
}

/// `count` records carrying only an integer `id`.
pub fn numbered(count: i64) -> Vec<Record> {
    (1..=count)
        .map(|id| record_of([("id", Value::Integer(id))]))
        .collect()
}

/// Header plus rows of a storefront export, comma separated.
pub fn storefront_csv(rows: &[&str]) -> String {
    let mut csv = String::from(
        "SKU,Name,Description,Regular price,Sale price,Stock,Attribute 1 value(s),Categories,Tags,Images,Published,In stock?\n",
    );
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}
