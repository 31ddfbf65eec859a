//! Finfeed — financial document ingestion.
//! Entry point for the collection runner: one pass over the configured sources.

mod config;

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use finfeed_common::SandboxClient;
use finfeed_ingestion::fetcher::ReqwestTransport;
use finfeed_ingestion::health::JsonFileHealthStore;
use finfeed_ingestion::pg_ledger::PgJobLedger;
use finfeed_ingestion::pipeline::IngestionProgress;
use finfeed_ingestion::store::FsBackend;
use finfeed_ingestion::{
    run_ingestion, ContentStore, FeedHealthTracker, Fetcher, IngestionContext, JobLedger, MemoryLedger,
};

async fn build_ledger(config: &config::Config) -> anyhow::Result<Arc<dyn JobLedger>> {
    match &config.ledger.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL ledger...");
            let ledger = PgJobLedger::connect(url, config.ledger.max_connections).await?;
            ledger.migrate().await?;
            info!("Ledger ready (PostgreSQL).");
            Ok(Arc::new(ledger))
        }
        None => {
            warn!("No database_url configured; job ledger is in-memory for this run");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("finfeed=debug,info")),
        )
        .init();

    info!("Finfeed starting up...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match config::Config::load() {
        Ok(c) => {
            info!(
                feeds = c.sources.feeds.len(),
                ir_pages = c.sources.ir_pages.len(),
                tickers = c.sources.tickers.len(),
                "Configuration loaded"
            );
            c
        }
        Err(e) => {
            warn!("Could not load finfeed.toml: {e}");
            warn!("Copy finfeed.example.toml to finfeed.toml and edit it.");
            return Ok(());
        }
    };

    let client = SandboxClient::new(&config.sandbox_config()).context("building HTTP client")?;
    let fetcher = Fetcher::new(Arc::new(ReqwestTransport::new(client)), config.fetch_config());

    let backend = FsBackend::new(&config.storage.root);
    backend
        .health_check()
        .await
        .with_context(|| format!("content store at {} is not writable", config.storage.root))?;
    let store = ContentStore::new(Arc::new(backend));
    info!(root = %config.storage.root, "Content store ready");

    let ledger = build_ledger(&config).await?;

    let health_store = Arc::new(JsonFileHealthStore::new(&config.health.state_file));
    let health = FeedHealthTracker::open(health_store, config.health.disable_threshold)
        .await
        .with_context(|| format!("loading feed health from {}", config.health.state_file))?;
    info!(
        state_file = %config.health.state_file,
        disable_threshold = health.threshold(),
        "Feed health loaded"
    );

    let ctx = IngestionContext::new(fetcher, store, ledger, Arc::new(health))
        .with_dedup(config.dedup_config())
        .with_run_config(config.run_config());

    let (progress_tx, mut progress_rx) = broadcast::channel::<IngestionProgress>(64);
    let progress_log = tokio::spawn(async move {
        loop {
            match progress_rx.recv().await {
                Ok(p) => info!(run_id = %p.run_id, stage = %p.stage, jobs = p.jobs_completed, "{}", p.message),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Progress log lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    for job in config.ingestion_jobs() {
        let report = run_ingestion(&ctx, job, Some(progress_tx.clone())).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    drop(progress_tx);
    let _ = progress_log.await;
    info!("Finfeed run finished.");
    Ok(())
}
