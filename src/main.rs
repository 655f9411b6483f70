//! vulnfeed-sync command-line entry point

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vulnfeed_sync::credentials::{EnvCredentials, persist_api_key, resolve_api_key};
use vulnfeed_sync::logging::{LogConfig, LogFormat, init_logging_with_config};
use vulnfeed_sync::summary::{StoreSummary, summarize, write_manifest};
use vulnfeed_sync::{
    Config, Error, FeedFamily, Result, RunReport, Selector, SyncOrchestrator, cancel_on_signal,
};

/// Synchronize vulnerability feeds into a local store
#[derive(Parser, Debug)]
#[command(name = "vulnfeed-sync")]
#[command(version)]
#[command(about = "Incrementally download NVD and Vulners vulnerability feeds", long_about = None)]
struct Args {
    /// Feed to synchronize (nvd, vulners)
    #[arg(long)]
    feed: Option<FeedFamily>,

    /// Only sync the feed for this year
    #[arg(short, long, conflicts_with = "collection")]
    year: Option<u16>,

    /// Only sync this Vulners collection
    #[arg(short, long)]
    collection: Option<String>,

    /// API key (falls back to VULNERS_API_KEY and .env)
    #[arg(short = 'a', long)]
    api_key: Option<String>,

    /// Append the API key given with --api-key to the .env file
    #[arg(long, requires = "api_key")]
    save_api_key: bool,

    /// .env file consulted for the API key
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Store directory (default: nvd or vulners)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Subdirectory of the store for expanded members
    #[arg(long)]
    extract_subdir: Option<PathBuf>,

    /// Write a tab-separated hash manifest here after the run
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Number of artifacts processed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run report and summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (pretty, json, compact)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a RunReport,
    summary: &'a StoreSummary,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut log_config = LogConfig::new()
        .level(&args.log_level)
        .format(args.log_format);
    if let Some(path) = &args.log_file {
        log_config = log_config.file(path);
    }
    if let Err(e) = init_logging_with_config(log_config) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sync aborted");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;
    let family = config.feed.family;
    let selector = selector(&args);

    let api_key = if family.requires_api_key() {
        let provider = EnvCredentials::default().with_env_file(&args.env_file);
        resolve_api_key(args.api_key.clone(), &provider)
    } else {
        None
    };
    if args.save_api_key
        && let Some(key) = &args.api_key
    {
        persist_api_key(&args.env_file, key)?;
    }

    let orchestrator = SyncOrchestrator::new(config, api_key)?;
    info!(family = %family, version = env!("CARGO_PKG_VERSION"), "vulnfeed-sync starting");

    let cancel = CancellationToken::new();
    let signal_task = cancel_on_signal(cancel.clone());
    let result = orchestrator.run(selector.as_ref(), cancel).await;
    signal_task.abort();
    let report = result?;

    let store_dir = orchestrator.config().store_dir();
    let summary = tokio::task::spawn_blocking(move || summarize(&store_dir))
        .await
        .map_err(|e| Error::Other(format!("summary task failed: {}", e)))??;

    if let Some(path) = &orchestrator.config().store.manifest_path {
        write_manifest(path, &summary)?;
        info!(path = %path.display(), "hash manifest written");
    }

    if args.json {
        let output = JsonOutput {
            report: &report,
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report);
        println!("{}", summary);
    }

    Ok(())
}

/// Layer defaults, the config file, `VULNFEED_*` variables and flags
fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .merge_env();

    if let Some(family) = args.feed {
        config.feed.family = family;
    }
    if let Some(dir) = &args.store_dir {
        config.store.store_dir = Some(dir.clone());
    }
    if let Some(sub) = &args.extract_subdir {
        config.store.extract_subdir = Some(sub.clone());
    }
    if let Some(path) = &args.manifest {
        config.store.manifest_path = Some(path.clone());
    }
    if let Some(n) = args.concurrency {
        config.max_concurrent_fetches = n;
    }
    Ok(config)
}

fn selector(args: &Args) -> Option<Selector> {
    match (args.year, &args.collection) {
        (Some(year), _) => Some(Selector::Year(year)),
        (None, Some(tag)) => Some(Selector::Collection(tag.clone())),
        (None, None) => None,
    }
}

fn print_report(report: &RunReport) {
    for entry in &report.entries {
        println!("{:<20} {}", entry.locator.identifier, entry.outcome);
    }
    println!(
        "{} downloaded, {} skipped, {} failed",
        report.downloaded(),
        report.skipped(),
        report.failed()
    );
}
