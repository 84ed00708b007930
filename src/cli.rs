use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Move relational records into a REST record store",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Migrate source tables into the destination in dependency order
    Migrate(MigrateArgs),
    /// Ingest products from a storefront CSV export
    Ingest(IngestArgs),
    /// Validate a migration plan and print it in migration order
    Plan(PlanArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct DestinationArgs {
    /// Destination base URL (overrides NEXT_PUBLIC_SUPABASE_URL / SUPABASE_URL)
    #[arg(long = "destination-url")]
    pub destination_url: Option<String>,
    /// Destination API key (overrides SUPABASE_SERVICE_ROLE_KEY / SUPABASE_ANON_KEY)
    #[arg(long = "api-key")]
    pub api_key: Option<String>,
    /// HTTP timeout in seconds for destination requests
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Send nothing; batches are accepted by an in-memory destination
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// YAML migration plan (defaults to the built-in storefront plan)
    #[arg(short, long)]
    pub plan: Option<PathBuf>,
    /// Source database connection string (overrides LOCAL_DATABASE_URL)
    #[arg(long = "source-url")]
    pub source_url: Option<String>,
    /// Records per destination request
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    #[command(flatten)]
    pub destination: DestinationArgs,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// CSV export to ingest ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    #[command(flatten)]
    pub destination: DestinationArgs,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// YAML migration plan (defaults to the built-in storefront plan)
    #[arg(short, long)]
    pub plan: Option<PathBuf>,
    /// Print the plan as YAML instead of a table
    #[arg(long)]
    pub yaml: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
