//! job-board-sync binary entrypoint.
//! Loads config and credentials, wires adapters, caches and the CMS store,
//! then runs the pipeline once, on a schedule, or one of the maintenance
//! commands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use job_board_sync::cache::TtlCache;
use job_board_sync::enrich::{DefaultEnricher, DisabledDirectory, DisabledGenerator, EnrichCaches};
use job_board_sync::history::{reporting_stats, RunHistory, RunRecord};
use job_board_sync::ingest::detect::{BoardDetector, DetectionReport};
use job_board_sync::ingest::providers::{
    adzuna, greenhouse, http_client, lever, AdzunaProvider, GreenhouseProvider, LeverProvider,
};
use job_board_sync::ingest::registry::{load_registry_default, load_registry_from, Company};
use job_board_sync::ingest::scheduler::{spawn_scheduler, SchedulerCfg};
use job_board_sync::ingest::types::SourceProvider;
use job_board_sync::pipeline::{build_plans, Pipeline, RunOptions};
use job_board_sync::sync::{RemoteStore, WebflowStore};

#[derive(Debug, Parser)]
#[command(name = "job-board-sync", version, about = "Aggregate job postings and sync them to the CMS")]
struct Cli {
    /// Company registry (JSON or TOML); defaults to $JOB_REGISTRY_PATH, then config/companies.*
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Directory for cache files and run history
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Debug-level logs (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Clone, clap::Args)]
struct RunArgs {
    /// Ingest, dedup and enrich, but make no CMS writes
    #[arg(long)]
    dry_run: bool,

    /// Cap on listings carried through the run
    #[arg(long)]
    limit: Option<usize>,

    /// Keep running, once every N seconds
    #[arg(long, value_name = "SECS")]
    every: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline (the default)
    Run(RunArgs),
    /// Probe Greenhouse/Lever for every registry company and refresh the cache
    Detect {
        /// Re-probe even when a cached result is still valid
        #[arg(long)]
        force: bool,
    },
    /// Print aggregate statistics from the run history
    Report,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "job_board_sync=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_registry(path: Option<&Path>) -> Result<Vec<Company>> {
    match path {
        Some(p) => load_registry_from(p),
        None => load_registry_default(),
    }
}

struct Adapters {
    adzuna: Option<Arc<dyn SourceProvider>>,
    greenhouse: Arc<dyn SourceProvider>,
    lever: Arc<dyn SourceProvider>,
}

fn adapters(client: &reqwest::Client) -> Adapters {
    Adapters {
        adzuna: AdzunaProvider::from_env(client.clone())
            .map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
        greenhouse: Arc::new(GreenhouseProvider::new(
            client.clone(),
            greenhouse::DEFAULT_BASE_URL,
        )),
        lever: Arc::new(LeverProvider::new(client.clone(), lever::DEFAULT_BASE_URL)),
    }
}

async fn detect(
    adapters: &Adapters,
    companies: &[Company],
    data_dir: &Path,
    force: bool,
) -> Result<DetectionReport> {
    let cache = TtlCache::open_file(
        "board_detection",
        data_dir,
        "ats-cache.json",
        BoardDetector::cache_policy(),
    )
    .await;
    let detector = BoardDetector::new(
        Arc::clone(&adapters.greenhouse),
        Arc::clone(&adapters.lever),
        cache,
    );
    detector.detect_all(companies, force).await
}

async fn resolve_sources(cli: &Cli, adapters: &Adapters) -> Result<DetectionReport> {
    let companies = load_registry(cli.registry.as_deref()).context("loading company registry")?;
    tracing::info!(
        companies = companies.len(),
        keyword_search = adapters.adzuna.is_some(),
        queries = adzuna::SEARCH_QUERIES.len(),
        "sources configured"
    );
    detect(adapters, &companies, &cli.data_dir, false).await
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<bool> {
    let client = http_client();
    let adapters = adapters(&client);
    let timestamp = chrono::Utc::now();
    let started = Instant::now();

    let detections = match resolve_sources(cli, &adapters).await {
        Ok(d) => d,
        Err(e) => {
            let record = RunRecord::failed(
                timestamp,
                started.elapsed().as_millis() as u64,
                args.dry_run,
            );
            if let Err(he) = RunHistory::in_dir(&cli.data_dir).append(record).await {
                tracing::warn!(error = ?he, "could not write run history");
            }
            return Err(e);
        }
    };
    let plans = build_plans(
        adapters.adzuna.clone(),
        Arc::clone(&adapters.greenhouse),
        Arc::clone(&adapters.lever),
        &detections,
    );

    let enricher = DefaultEnricher::new(
        Arc::new(DisabledGenerator),
        Arc::new(DisabledDirectory),
        EnrichCaches::open(&cli.data_dir).await,
    );
    let store = if args.dry_run {
        None
    } else {
        WebflowStore::from_env(client.clone()).map(|s| Arc::new(s) as Arc<dyn RemoteStore>)
    };

    let pipeline = Pipeline::new(plans, Arc::new(enricher))
        .with_store(store)
        .with_history(RunHistory::in_dir(&cli.data_dir));
    let options = RunOptions {
        dry_run: args.dry_run,
        limit: args.limit,
    };

    if let Some(every) = args.every {
        let handle = spawn_scheduler(
            SchedulerCfg {
                interval_secs: every,
                options,
            },
            Arc::new(pipeline),
        );
        handle.await.context("scheduler task ended")?;
        return Ok(true);
    }

    Ok(!pipeline.run(options).await.failed)
}

async fn report(data_dir: &Path) -> Result<()> {
    let history = RunHistory::in_dir(data_dir).load().await;
    let stats = reporting_stats(&history, chrono::Utc::now());
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let result = match &cli.command {
        None => run(&cli, &cli.run).await,
        Some(Command::Run(args)) => run(&cli, args).await,
        Some(Command::Detect { force }) => {
            let client = http_client();
            let adapters = adapters(&client);
            match load_registry(cli.registry.as_deref()) {
                Ok(companies) => detect(&adapters, &companies, &cli.data_dir, *force)
                    .await
                    .map(|_| true),
                Err(e) => Err(e),
            }
        }
        Some(Command::Report) => report(&cli.data_dir).await.map(|()| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = ?e, "fatal error");
            ExitCode::FAILURE
        }
    }
}
