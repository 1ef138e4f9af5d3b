use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use recap_core::RuleMatcher;
use recap_ingest::{DirectorySource, DocumentSource, parse_document};
use recap_ledger::{Action, BatchReport, Pipeline, PipelineSettings, ReconcilePolicy, YnabClient};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod paths;
mod run_log;

use run_log::{RunLog, failure_block, noop_block, now_local_iso, outcome_block};

const EXIT_FAILURE: u8 = 1;
const EXIT_UNMAPPED: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "recap",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("RECAP_BUILD_SHA"), ")"),
    about = "Split subscription receipts into ledger transactions"
)]
struct Cli {
    /// Config file (default: ./config.yaml, then ~/.recap/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse receipts, split tax, and reconcile against the ledger
    Process {
        /// Receipt files or directories (.eml, .html, .txt, .pdf)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Parse and compute splits, but do not call the ledger API
        #[arg(long)]
        dry_run: bool,

        /// Post exact duplicates again under a suffixed receipt id
        #[arg(long)]
        reimport: bool,

        /// Override app.policy from the config
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// Print the fields extracted from receipts; needs no config
    Parse {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Validate the config file and exit
    CheckConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    ExactKey,
    Uncleared,
}

impl From<PolicyArg> for ReconcilePolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::ExactKey => ReconcilePolicy::ExactKey,
            PolicyArg::Uncleared => ReconcilePolicy::Uncleared,
        }
    }
}

fn init_tracing(verbose: bool) {
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Process {
            paths,
            dry_run,
            reimport,
            policy,
        } => process(cli.config, paths, dry_run, reimport, policy).await,
        Command::Parse { paths, currency } => parse(paths, &currency),
        Command::CheckConfig => check_config(cli.config),
    }
}

async fn process(
    config_arg: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    dry_run: bool,
    reimport: bool,
    policy: Option<PolicyArg>,
) -> Result<ExitCode> {
    let config_path = paths::config_path(config_arg)?;
    let config = config::load_config(&config_path)?;
    debug!(config = %config_path.display(), "loaded config");
    let log = RunLog::new(config.app.log_path.clone(), dry_run);

    let token = if dry_run {
        config.api_token().unwrap_or_default()
    } else {
        config.api_token()?
    };
    let client = YnabClient::new(config.ynab_settings(token)).context("create ledger client")?;
    let matcher = RuleMatcher::new(&config.mappings).context("compile mapping rules")?;
    let settings = PipelineSettings {
        policy: policy.map(Into::into).unwrap_or(config.app.policy),
        dry_run,
        reimport: reimport || config.app.reimport,
        lookback_days: config.ynab.lookback_days,
    };
    info!(policy = settings.policy.as_str(), dry_run, reimport = settings.reimport, "starting run");

    let fetched = DirectorySource::new(inputs).fetch();
    if fetched.is_empty() {
        log.append(&noop_block("(no documents)", dry_run, &now_local_iso()))?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut pipeline = Pipeline::new(client, matcher, settings);
    let report = pipeline
        .run_fetched(fetched, chrono::Local::now().date_naive())
        .await;
    write_report(&report, &log, &config.ynab.budget_id, dry_run)?;

    if report.has_unmapped() {
        return Ok(ExitCode::from(EXIT_UNMAPPED));
    }
    if report.failed() > 0 || report.partial() > 0 {
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}

fn write_report(report: &BatchReport, log: &RunLog, budget_id: &str, dry_run: bool) -> Result<()> {
    for doc in &report.documents {
        let timestamp = now_local_iso();
        match &doc.result {
            Ok(outcome) => {
                log.append(&outcome_block(outcome, budget_id, dry_run, &timestamp))?;
                if outcome.action != Action::DryRun {
                    let event = serde_json::json!({
                        "event_name": "cli_process_result",
                        "status": outcome.action.as_str(),
                        "receipt_id": outcome.receipt_id,
                        "parent_amount_milliunits": outcome.candidate.amount,
                        "message": outcome.message(),
                        "transaction_id": outcome.transaction_id,
                    });
                    println!("{}", event);
                }
            }
            Err(err) => {
                log.append(&failure_block(&doc.document, err, dry_run, &timestamp))?;
                if err.is_unmapped() {
                    eprintln!("Error (exit code {}): {}", EXIT_UNMAPPED, err);
                } else {
                    eprintln!("Error: {}", err);
                }
            }
        }
    }
    if report.processed() > 1 {
        println!("{}", report.summary());
    }
    Ok(())
}

fn parse(inputs: Vec<PathBuf>, currency: &str) -> Result<ExitCode> {
    let mut failed = false;
    for fetched in DirectorySource::new(inputs).fetch() {
        match fetched.and_then(|doc| parse_document(&doc, currency)) {
            Ok(receipt) => {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            }
            Err(err) => {
                failed = true;
                eprintln!("Error: {}", err);
            }
        }
    }
    Ok(if failed {
        ExitCode::from(EXIT_FAILURE)
    } else {
        ExitCode::SUCCESS
    })
}

fn check_config(config_arg: Option<PathBuf>) -> Result<ExitCode> {
    let config_path = paths::config_path(config_arg)?;
    let config = config::load_config(&config_path)?;
    let mappings = &config.mappings;
    let enabled = mappings.rules.iter().filter(|r| r.enabled).count();
    let fallback = match &mappings.fallback {
        Some(f) if f.enabled => "enabled",
        Some(_) => "disabled",
        None => "none",
    };

    println!("Config OK: {}", config_path.display());
    println!("Rules: {} ({} enabled), fallback: {}", mappings.rules.len(), enabled, fallback);
    println!("Policy: {}, lookback: {} days", config.app.policy.as_str(), config.ynab.lookback_days);
    println!(
        "API token: {}",
        if config.api_token().is_ok() { "set" } else { "missing" }
    );
    Ok(ExitCode::SUCCESS)
}
