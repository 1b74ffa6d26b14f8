//! Leaderboard Service - Main entry point
//!
//! Computes the multi-dimensional leaderboards over the collected entity
//! corpus and keeps exactly one live snapshot per entity type.
//!
//! # Modes
//! - `schedule` (default): rank every entity type on its interval until shutdown
//! - `rank`: rank every entity type once and exit
//! - `annotate`: resolve entity locations into `parsed_location` / `parsed_city` and exit

use anyhow::Result;
use leaderboard_service::{
    run_scheduler, Config, DimensionRegistry, EntityType, LocationAnnotator, PgRankStore,
    RankCycle, RankCycleConfig, RankStore,
};
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// Service run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Default: rank every entity type on its interval until shutdown
    Schedule,
    /// Rank every entity type once and exit
    Rank,
    /// Resolve entity locations into parsed_location / parsed_city and exit
    Annotate,
}

impl RunMode {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();

        for i in 0..args.len() {
            if args[i] == "--mode" && i + 1 < args.len() {
                return match args[i + 1].as_str() {
                    "schedule" => RunMode::Schedule,
                    "rank" => RunMode::Rank,
                    "annotate" => RunMode::Annotate,
                    _ => {
                        warn!("Unknown mode '{}', using default 'schedule'", args[i + 1]);
                        RunMode::Schedule
                    }
                };
            }
        }

        RunMode::Schedule
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leaderboard_service=debug,sqlx=warn,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = RunMode::from_args();
    info!("Starting Leaderboard Service in {:?} mode", mode);

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    // Ranks cannot be computed without dimensions
    let registry = Arc::new(DimensionRegistry::load(&config.dimension_source()).map_err(|e| {
        error!("Failed to load dimension registry: {}", e);
        anyhow::anyhow!("Dimension registry error: {}", e)
    })?);

    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }
    let store = PgRankStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;
    info!(
        max_connections = config.db_max_connections,
        "Database connection established"
    );
    let store: Arc<dyn RankStore> = Arc::new(store);

    match mode {
        RunMode::Annotate => run_annotate_mode(&config, store, registry).await,
        RunMode::Rank => run_rank_mode(&config, store, registry).await,
        RunMode::Schedule => run_schedule_mode(&config, store, registry).await,
    }
}

/// Annotate every collection once
async fn run_annotate_mode(
    config: &Config,
    store: Arc<dyn RankStore>,
    registry: Arc<DimensionRegistry>,
) -> Result<()> {
    let annotator = LocationAnnotator::new(store, registry, config.annotate_batch_size);

    for entity_type in EntityType::ALL {
        let stats = annotator.annotate(entity_type).await?;
        info!(
            entity_type = %entity_type,
            scanned = stats.scanned,
            resolved = stats.resolved,
            "Annotation pass finished"
        );
    }

    Ok(())
}

/// Rank every entity type once, one after another
async fn run_rank_mode(
    config: &Config,
    store: Arc<dyn RankStore>,
    registry: Arc<DimensionRegistry>,
) -> Result<()> {
    let cycle = RankCycle::new(store, registry, RankCycleConfig::from(config));

    let mut failed = Vec::new();
    for entity_type in EntityType::ALL {
        if let Err(e) = cycle.run(entity_type).await {
            error!(entity_type = %entity_type, error = %e, "Rank cycle failed");
            failed.push(entity_type);
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Rank cycle failed for {:?}", failed);
    }
    Ok(())
}

async fn run_schedule_mode(
    config: &Config,
    store: Arc<dyn RankStore>,
    registry: Arc<DimensionRegistry>,
) -> Result<()> {
    let cycle = Arc::new(RankCycle::new(
        store,
        registry,
        RankCycleConfig::from(config),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = signal_tx.send(());
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    run_scheduler(cycle, shutdown_tx).await;

    info!("Leaderboard Service stopped");
    Ok(())
}
