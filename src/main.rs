//! CS2 Esports Data Pipeline
//!
//! Fetches teams, players, matches, player stats and betting odds from
//! PandaScore, Abios and OddsPapi, reconciles provider-local identifiers
//! into canonical entities, and persists them idempotently in Postgres.
//!
//! Runs once by default (cron-friendly); `--interval-secs` keeps it polling
//! with a health endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info};

mod cache;
mod config;
mod engine;
mod fetch;
mod models;
mod resolver;
mod store;
mod sync;

use crate::cache::SystemClock;
use crate::config::Config;
use crate::engine::UpsertEngine;
use crate::resolver::IdentityResolver;
use crate::store::{CanonicalStore, MemStore, PgStore};
use crate::sync::{run_pipeline, SourceFilter};

#[derive(Debug, Parser)]
#[command(name = "cs2-pipeline", about = "CS2 esports data ingestion pipeline")]
struct Cli {
    /// Walk provider match history in addition to the regular windows.
    #[arg(long)]
    full_sync: bool,

    /// Restrict the run to one source.
    #[arg(long, value_enum, default_value_t = SourceArg::All)]
    source: SourceArg,

    /// Apply pending database migrations before syncing.
    #[arg(long)]
    migrate: bool,

    /// Route the run through the in-memory store; nothing is persisted.
    #[arg(long)]
    dry_run: bool,

    /// Keep syncing at this interval instead of running once.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    All,
    Pandascore,
    Abios,
    Odds,
}

impl From<SourceArg> for SourceFilter {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::All => SourceFilter::All,
            SourceArg::Pandascore => SourceFilter::Pandascore,
            SourceArg::Abios => SourceFilter::Abios,
            SourceArg::Odds => SourceFilter::Odds,
        }
    }
}

/// Service health state, exposed on `/health` in polling mode.
#[derive(Clone)]
struct HealthState {
    last_run_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_run_records: Arc<RwLock<u64>>,
    error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    fn new() -> Self {
        Self {
            last_run_time: Arc::new(RwLock::new(None)),
            last_run_records: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
        }
    }

    async fn record_success(&self, records: u64) {
        *self.last_run_time.write().await = Some(Utc::now());
        *self.last_run_records.write().await = records;
        *self.error_count.write().await = 0;
    }

    async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

async fn health_handler(
    axum::extract::State(health): axum::extract::State<HealthState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let last_run = health.last_run_time.read().await;
    let last_records = health.last_run_records.read().await;
    let errors = health.error_count.read().await;

    let status = if *errors > 3 { "degraded" } else { "ok" };
    let http_status = if *errors > 6 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "cs2-pipeline",
            "status": status,
            "last_run": last_run.map(|t| t.to_rfc3339()),
            "last_run_records": *last_records,
            "consecutive_errors": *errors,
        })),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cs2_pipeline=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!(
        "Starting CS2 data pipeline (mode: {})",
        if cli.full_sync { "full sync" } else { "regular" }
    );

    if cli.dry_run {
        let engine = UpsertEngine::new(MemStore::new(), new_resolver(&config));
        run_once(&engine, &config, &cli).await;
        info!("Dry run complete; nothing persisted");
        return Ok(());
    }

    let store = PgStore::connect(&config.database_url).await?;
    if cli.migrate {
        store.run_migrations().await?;
    }
    let engine = UpsertEngine::new(store, new_resolver(&config));

    match cli.interval_secs {
        Some(secs) => run_loop(engine, config, cli, secs).await,
        None => {
            run_once(&engine, &config, &cli).await;
            Ok(())
        }
    }
}

fn new_resolver(config: &Config) -> IdentityResolver {
    IdentityResolver::new(config.resolver_cache_ttl, Arc::new(SystemClock))
}

/// Run every selected provider once; returns total fetched records and
/// whether any provider run failed.
async fn run_once<S: CanonicalStore>(
    engine: &UpsertEngine<S>,
    config: &Config,
    cli: &Cli,
) -> (u64, bool) {
    let runs = run_pipeline(engine, config, cli.source.into(), cli.full_sync).await;

    let mut total_fetched = 0;
    let mut any_error = false;
    for (source, stats) in &runs {
        info!(
            "{}: status={} fetched={} inserted={} updated={}",
            source, stats.status, stats.records_fetched, stats.records_inserted, stats.records_updated
        );
        total_fetched += stats.records_fetched;
        any_error |= stats.is_error();
    }

    (total_fetched, any_error)
}

async fn run_loop(
    engine: UpsertEngine<PgStore>,
    config: Config,
    cli: Cli,
    interval_secs: u64,
) -> Result<()> {
    let health = HealthState::new();

    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(health.clone());
    let health_addr = format!("0.0.0.0:{}", config.health_port);
    let listener = tokio::net::TcpListener::bind(&health_addr).await?;
    info!("Health endpoint listening on {}", health_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server error: {:#}", e);
        }
    });

    info!("Polling every {}s", interval_secs);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutting down...");
                return Ok(());
            }
            _ = async {
                let (records, any_error) = run_once(&engine, &config, &cli).await;
                if any_error {
                    health.record_error().await;
                } else {
                    health.record_success(records).await;
                }
                tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            } => {}
        }
    }
}
