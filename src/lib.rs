pub mod cli;
pub mod config;
pub mod data;
pub mod destination;
pub mod error;
pub mod ingest;
pub mod io_utils;
pub mod migrate;
pub mod normalize;
pub mod plan;
pub mod projection;
pub mod remap;
pub mod report;
pub mod slug;
pub mod source;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    cli::{Cli, Commands, DestinationArgs},
    config::{DestinationSettings, Overrides},
    destination::{MemorySink, RecordSink, RestSink},
    plan::MigrationPlan,
    remap::IdentityMap,
    source::PostgresSource,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("record_migrate", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate(args) => handle_migrate(&args),
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Plan(args) => handle_plan(&args),
    }
}

fn load_plan(path: Option<&Path>) -> Result<MigrationPlan> {
    match path {
        Some(path) => {
            MigrationPlan::load(path).with_context(|| format!("Loading plan from {path:?}"))
        }
        None => Ok(MigrationPlan::storefront()),
    }
}

fn connection_overrides(args: &DestinationArgs, source_url: Option<&str>) -> Overrides {
    Overrides {
        destination_url: args.destination_url.clone(),
        api_key: args.api_key.clone(),
        source_url: source_url.map(str::to_string),
        timeout_secs: args.timeout_secs,
    }
}

/// Builds the destination sink, failing fast when it cannot be reached.
fn open_sink(args: &DestinationArgs, overrides: &Overrides) -> Result<Box<dyn RecordSink>> {
    if args.dry_run {
        warn!("Dry run: nothing will be written to the destination");
        return Ok(Box::new(MemorySink::new()));
    }
    let settings = DestinationSettings::resolve(overrides)?;
    let sink = RestSink::new(&settings.url, &settings.api_key, settings.timeout)?;
    sink.check_connection()
        .with_context(|| format!("Reaching destination {}", settings.url))?;
    info!("Connected to destination {}", settings.url);
    Ok(Box::new(sink))
}

fn handle_migrate(args: &cli::MigrateArgs) -> Result<()> {
    let mut plan = load_plan(args.plan.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        plan = plan.with_batch_size(batch_size);
    }
    plan.validate().context("Validating migration plan")?;

    let overrides = connection_overrides(&args.destination, args.source_url.as_deref());
    let mut sink = open_sink(&args.destination, &overrides)?;
    let mut source = PostgresSource::connect(&config::source_url(&overrides))?;

    let mut identities = IdentityMap::new();
    let report = migrate::run(&plan, &mut source, sink.as_mut(), &mut identities);
    if identities.duplicate_count() > 0 {
        warn!(
            "{} duplicate source key(s) were remapped more than once",
            identities.duplicate_count()
        );
    }
    print!("{}", report::migration_table(&report));
    Ok(())
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    if !io_utils::is_dash(&args.input) && !args.input.exists() {
        anyhow::bail!("Input file {:?} does not exist", args.input);
    }
    info!(
        "Ingesting '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );

    let overrides = connection_overrides(&args.destination, None);
    let mut sink = open_sink(&args.destination, &overrides)?;
    let report = ingest::ingest_path(&args.input, delimiter, encoding, sink.as_mut())
        .with_context(|| format!("Ingesting {:?}", args.input))?;
    print!("{}", report::ingest_table(&report));
    Ok(())
}

fn handle_plan(args: &cli::PlanArgs) -> Result<()> {
    let plan = load_plan(args.plan.as_deref())?;
    plan.validate().context("Validating migration plan")?;
    if args.yaml {
        print!("{}", plan.to_yaml_string()?);
    } else {
        print!("{}", report::plan_table(&plan));
    }
    info!(
        "Plan lists {} table(s), {} with regenerated keys",
        plan.tables.len(),
        plan.remapped_tables().count()
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
