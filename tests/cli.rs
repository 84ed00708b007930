mod common;

use assert_cmd::Command;
use common::{TestWorkspace, storefront_csv};
use predicates::{prelude::PredicateBooleanExt, str::contains};

const CONNECTION_VARS: &[&str] = &[
    "NEXT_PUBLIC_SUPABASE_URL",
    "SUPABASE_URL",
    "SUPABASE_SERVICE_ROLE_KEY",
    "SUPABASE_ANON_KEY",
    "LOCAL_DATABASE_URL",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

fn record_migrate(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("record-migrate").expect("binary exists");
    cmd.current_dir(workspace.path());
    for var in CONNECTION_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn plan_prints_storefront_tables_in_order() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .arg("plan")
        .assert()
        .success()
        .stdout(contains("roles"))
        .stdout(contains("product_images"))
        .stdout(contains("brand_id->brands"))
        .stdout(contains("slug<-name"));
}

#[test]
fn plan_file_round_trips_as_yaml() {
    let workspace = TestWorkspace::new();
    let plan = workspace.write(
        "plan.yaml",
        "batch_size: 25\ntables:\n  - name: brands\n    remap_key: true\n    slug:\n      from: name\n      into: slug\n  - name: products\n    foreign_keys:\n      brand_id: brands\n",
    );
    record_migrate(&workspace)
        .args(["plan", "--yaml", "--plan", plan.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("batch_size: 25"))
        .stdout(contains("remap_key: true"))
        .stdout(contains("brand_id: brands"));
}

#[test]
fn plan_with_forward_reference_is_rejected() {
    let workspace = TestWorkspace::new();
    let plan = workspace.write(
        "plan.yaml",
        "tables:\n  - name: products\n    foreign_keys:\n      brand_id: brands\n  - name: brands\n    remap_key: true\n",
    );
    record_migrate(&workspace)
        .args(["plan", "--plan", plan.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("migrated after it"));
}

#[test]
fn dry_run_ingest_reports_counts() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "export.csv",
        &storefront_csv(&[
            "A-1,Trail Runner,,100,80,12,Acme,Shoes > Running,,https://cdn.example.com/a.jpg,1,1",
            "A-2,Orphan,,10,,1,,Misc,,,1,1",
        ]),
    );
    record_migrate(&workspace)
        .args(["ingest", "--dry-run", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("products created"))
        .stdout(contains("rows skipped"))
        .stdout(contains("images inserted"));
}

#[test]
fn ingest_of_missing_file_fails() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .args(["ingest", "--dry-run", "-i", "absent.csv"])
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn migrate_without_destination_config_fails() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .arg("migrate")
        .assert()
        .failure()
        .stderr(contains("error:"))
        .stderr(contains("Destination URL not configured"));
}

#[test]
fn migrate_rejects_zero_batch_size_before_connecting() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .args(["migrate", "--dry-run", "--batch-size", "0"])
        .assert()
        .failure()
        .stderr(contains("batch size must be at least 1"));
}

#[test]
fn migrate_fails_when_source_is_unreachable() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .args([
            "migrate",
            "--dry-run",
            "--source-url",
            "postgresql://u@127.0.0.1:1/x",
        ])
        .assert()
        .failure()
        .stderr(contains("Connecting to source database postgresql://***@127.0.0.1:1/x"))
        .stderr(contains("Migrating table").not());
}

#[test]
fn migrate_fails_when_destination_is_unreachable() {
    let workspace = TestWorkspace::new();
    record_migrate(&workspace)
        .args([
            "migrate",
            "--destination-url",
            "http://127.0.0.1:1",
            "--api-key",
            "k",
            "--timeout-secs",
            "5",
        ])
        .assert()
        .failure()
        .stderr(contains("Reaching destination http://127.0.0.1:1"))
        .stderr(contains("source database").not());
}
