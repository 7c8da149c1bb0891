//! GA4Q CLI
//!
//! Command-line surface over `ga4q-core`:
//! - `validate`: normalize, validate and (optionally) LLM-repair a report query
//! - `aliases`: print the effective alias table
//!
//! Logs go to stderr (filtered by `RUST_LOG`); stdout carries only results.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use ga4q_core::aliases::AliasFile;
use ga4q_core::llm::providers::UnifiedClient;
use ga4q_core::{
    AliasTable, Cancellation, ConfigError, Ga4HttpConfig, Ga4HttpMetadataProvider, GuardConfig,
    GuardError, LlmRepairOracle, MetadataProvider, NoRepairOracle, QueryValidator, RepairOracle,
    SnapshotFileProvider, ValidatedQuery, ValidationRequest,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const EXIT_INFRASTRUCTURE: u8 = 1;
const EXIT_INVALID_QUERY: u8 = 2;

#[derive(Parser)]
#[command(name = "ga4q")]
#[command(
    author,
    version,
    about = "Validate and auto-repair analytics report queries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a query against a property's metadata, repairing it if needed.
    ///
    /// Exit code 2 means the query was rejected; 1 means metadata or the
    /// repair oracle could not be reached.
    Validate(ValidateArgs),

    /// Print the effective alias table.
    Aliases {
        /// Alias table JSON (default: built-in table)
        #[arg(long)]
        aliases: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ValidateArgs {
    /// Analytics property id
    #[arg(long)]
    property: String,
    /// Metric (repeatable; display names and aliases are accepted)
    #[arg(short, long = "metric")]
    metrics: Vec<String>,
    /// Dimension (repeatable)
    #[arg(short, long = "dimension")]
    dimensions: Vec<String>,
    /// Repair budget (default: GA4Q_RETRY_BUDGET or 1)
    #[arg(long)]
    retries: Option<u32>,
    /// Alias table JSON (default: built-in table)
    #[arg(long)]
    aliases: Option<PathBuf>,
    /// Read metadata from a snapshot file instead of the live API
    #[arg(long)]
    metadata_file: Option<PathBuf>,
    /// Validate only; never call the repair oracle
    #[arg(long)]
    no_repair: bool,
    /// The property is linked to an ads account (used with GA4Q_ADS_GATING)
    #[arg(long)]
    ads_linked: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate(args) => cmd_validate(args).await,
        Commands::Aliases { aliases, json } => cmd_aliases(aliases.as_deref(), json),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(EXIT_INFRASTRUCTURE)
        }
    }
}

fn load_aliases(path: Option<&Path>) -> Result<AliasTable> {
    Ok(match path {
        Some(path) => AliasTable::from_json_file(path)?,
        None => AliasTable::builtin(),
    })
}

/// The LLM oracle when one is configured, otherwise `None`.
fn repair_oracle(disabled: bool) -> Result<Option<Arc<dyn RepairOracle>>> {
    if disabled {
        return Ok(None);
    }
    match UnifiedClient::from_env() {
        Ok(client) => Ok(Some(Arc::new(LlmRepairOracle::new(client)))),
        Err(ConfigError::NoProviderConfigured) => {
            tracing::warn!("no LLM provider configured; repair disabled");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_validate(args: ValidateArgs) -> Result<ExitCode> {
    let config = GuardConfig::from_env()?;
    let aliases = Arc::new(load_aliases(args.aliases.as_deref())?);

    let metadata: Arc<dyn MetadataProvider> = match &args.metadata_file {
        Some(path) => Arc::new(SnapshotFileProvider::new(path.clone())),
        None => Arc::new(Ga4HttpMetadataProvider::new(Ga4HttpConfig::from_env()?)),
    };

    let (oracle, budget): (Arc<dyn RepairOracle>, u32) = match repair_oracle(args.no_repair)? {
        Some(oracle) => (oracle, args.retries.unwrap_or(config.retry_budget)),
        None => (Arc::new(NoRepairOracle), 0),
    };

    let request = ValidationRequest::new(&args.property, args.metrics, args.dimensions)
        .with_retry_budget(budget)
        .with_ads_link(args.ads_linked);
    let validator = QueryValidator::new(config, aliases, metadata, oracle);

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match validator
        .validate_with_repair_cancellable(&request, &cancel)
        .await
    {
        Ok(query) => {
            print_validated(&query, args.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(GuardError::Validation(err)) => {
            if args.json {
                let out = serde_json::json!({ "valid": false, "error": err });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!("{} {}", "Invalid query:".red().bold(), err.reason);
                eprintln!("  metrics:    {}", err.metrics.join(", "));
                eprintln!("  dimensions: {}", err.dimensions.join(", "));
            }
            Ok(ExitCode::from(EXIT_INVALID_QUERY))
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            Ok(ExitCode::from(EXIT_INFRASTRUCTURE))
        }
    }
}

fn print_validated(query: &ValidatedQuery, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({ "valid": true, "query": query });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Valid.".green().bold());
    println!("  metrics:    {}", query.metrics.join(", "));
    println!("  dimensions: {}", query.dimensions.join(", "));
    if query.repairs > 0 {
        println!(
            "  {} after {} repair(s), {} pass(es)",
            "repaired".yellow(),
            query.repairs,
            query.attempts
        );
    }
    Ok(())
}

fn cmd_aliases(path: Option<&Path>, json: bool) -> Result<ExitCode> {
    let file: AliasFile = load_aliases(path)?.to_alias_file();
    if json {
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Metrics".green().bold());
    for (surface, canonical) in &file.metrics {
        println!("  {surface:<24} {canonical}");
    }
    println!("{}", "Dimensions".green().bold());
    for (surface, canonical) in &file.dimensions {
        println!("  {surface:<24} {canonical}");
    }
    Ok(ExitCode::SUCCESS)
}
