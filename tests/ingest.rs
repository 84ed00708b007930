mod common;

use anyhow::anyhow;
use common::{TestWorkspace, storefront_csv};
use encoding_rs::{UTF_8, WINDOWS_1252};
use record_migrate::{
    data::{Value, record_of},
    destination::{Fault, MemorySink},
    ingest::{self, CsvRow, EntityKind, ReferenceCache, columns},
};

const TRAIL: &str = "A-1,Trail Runner,Light shoe,100,80,12.7,Acme,Shoes > Running,\"fast, light\",\"https://cdn.example.com/a.jpg, https://cdn.example.com/b.jpg\",1,1";
const HIKER: &str = "A-2,Hiker,,60,,3,Acme,Shoes > Trail,,,0,0";
const NO_BRAND: &str = "A-3,Orphan,,10,,1,,Misc,,,1,1";

#[test]
fn ingest_path_creates_products_with_shared_references() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("products.csv", &storefront_csv(&[TRAIL, HIKER, NO_BRAND]));
    let mut sink = MemorySink::new();

    let report = ingest::ingest_path(&input, b',', UTF_8, &mut sink).expect("ingest");

    assert_eq!(report.rows, 3);
    assert_eq!(report.products, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.images, 2);
    assert_eq!(report.created(EntityKind::Brand), 1);
    assert_eq!(report.created(EntityKind::Supplier), 1);
    assert_eq!(report.created(EntityKind::Category), 1);

    let categories = sink.rows("categories");
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].get("name"), Some(&Value::from("Shoes")));
    assert_eq!(categories[0].get("description"), Some(&Value::from("Shoes")));
    assert_eq!(sink.rows("suppliers")[0].get("name"), Some(&Value::from("Acme")));

    let products = sink.rows("products");
    assert_eq!(products.len(), 2);
    let trail = &products[0];
    assert_eq!(trail.get("slug"), Some(&Value::from("trail-runner")));
    assert_eq!(trail.get("selling_price"), Some(&Value::Float(80.0)));
    assert_eq!(trail.get("regular_price"), Some(&Value::Float(100.0)));
    assert_eq!(trail.get("quantity_on_hand"), Some(&Value::Integer(12)));
    assert_eq!(trail.get("status"), Some(&Value::from("active")));
    assert_eq!(
        trail.get("tags"),
        Some(&Value::StringList(vec!["fast".into(), "light".into()]))
    );
    let hiker = &products[1];
    assert_eq!(hiker.get("selling_price"), Some(&Value::Float(60.0)));
    assert_eq!(hiker.get("stock_status"), Some(&Value::from("out_of_stock")));
    assert_eq!(hiker.get("brand_id"), trail.get("brand_id"));
    assert_eq!(hiker.get("category_id"), trail.get("category_id"));

    let images = sink.rows("product_images");
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|image| image.get("product_id") == trail.get("id")));
    assert_eq!(
        images[1].get("image_url"),
        Some(&Value::from("https://cdn.example.com/b.jpg"))
    );
}

#[test]
fn existing_references_are_reused() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("products.csv", &storefront_csv(&[HIKER]));
    let mut sink = MemorySink::new()
        .with_rows("brands", vec![record_of([("id", "brand-1"), ("name", "Acme")])])
        .with_rows(
            "categories",
            vec![record_of([("id", "cat-1"), ("name", "Shoes")])],
        );

    let report = ingest::ingest_path(&input, b',', UTF_8, &mut sink).expect("ingest");

    assert_eq!(report.created(EntityKind::Brand), 0);
    assert_eq!(report.created(EntityKind::Category), 0);
    assert_eq!(report.created(EntityKind::Supplier), 1);
    let product = &sink.rows("products")[0];
    assert_eq!(product.get("brand_id"), Some(&Value::from("brand-1")));
    assert_eq!(product.get("category_id"), Some(&Value::from("cat-1")));
}

#[test]
fn failed_brand_creation_skips_only_that_row() {
    let mut sink = MemorySink::new().with_fault("brands", 1, Fault::Reject);
    let mut cache = ReferenceCache::new();
    let row = CsvRow::from_pairs(&[(columns::SKU, "A-1"), (columns::BRAND, "Acme")]);

    let report = ingest::ingest_rows(
        vec![Ok(row.clone()), Ok(row)],
        &mut cache,
        &mut sink,
    );

    assert_eq!(report.rows, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.products, 1);
    assert_eq!(sink.calls_for("brands").len(), 2);
    assert!(cache.get(EntityKind::Brand, "Acme").is_some());
}

#[test]
fn supplier_and_image_failures_do_not_skip_the_row() {
    let mut sink = MemorySink::new()
        .with_fault("suppliers", 1, Fault::Reject)
        .with_fault("product_images", 1, Fault::Reject);
    let mut cache = ReferenceCache::new();
    let row = CsvRow::from_pairs(&[
        (columns::SKU, "A-1"),
        (columns::BRAND, "Acme"),
        (columns::IMAGES, "https://cdn.example.com/a.jpg"),
    ]);

    let report = ingest::ingest_rows(vec![Ok(row)], &mut cache, &mut sink);

    assert_eq!(report.products, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.images, 0);
    assert_eq!(report.image_failures, 1);
    assert_eq!(report.created(EntityKind::Supplier), 0);
    let product = &sink.rows("products")[0];
    assert_eq!(product.get("supplier_id"), Some(&Value::Null));
    assert_eq!(product.get("category_id"), Some(&Value::Null));
}

#[test]
fn unreadable_rows_are_counted_as_skipped() {
    let mut sink = MemorySink::new();
    let mut cache = ReferenceCache::new();
    let rows = vec![
        Err(anyhow!("Malformed CSV record")),
        Ok(CsvRow::from_pairs(&[(columns::BRAND, "Acme")])),
    ];

    let report = ingest::ingest_rows(rows, &mut cache, &mut sink);

    assert_eq!(report.rows, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.products, 1);
}

#[test]
fn legacy_encoded_input_is_decoded() {
    let workspace = TestWorkspace::new();
    let input = workspace.path().join("legacy.csv");
    let csv_text = storefront_csv(&["C-1,Café Crème,,5,,1,Acme,,,,1,1"]);
    let (bytes, _, _) = WINDOWS_1252.encode(&csv_text);
    std::fs::write(&input, bytes).expect("write legacy csv");
    let mut sink = MemorySink::new();

    let report = ingest::ingest_path(&input, b',', WINDOWS_1252, &mut sink).expect("ingest");

    assert_eq!(report.products, 1);
    let product = &sink.rows("products")[0];
    assert_eq!(product.get("name"), Some(&Value::from("Café Crème")));
    assert_eq!(product.get("slug"), Some(&Value::from("caf-crme")));
}
