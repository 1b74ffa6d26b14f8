//! Background rank scheduling.
//!
//! Each entity type gets its own timer loop, so runs for different types
//! proceed concurrently while runs of one type never overlap. A failed
//! cycle is logged and retried at the next tick; a broadcast shutdown
//! signal stops every loop.

pub mod rank_cycle;

pub use rank_cycle::{CycleStats, RankCycle, RankCycleConfig};

use crate::models::EntityType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Run the rank loops of every entity type until shutdown (or once each,
/// when the cycle is configured with `run_once`)
pub async fn run_scheduler(cycle: Arc<RankCycle>, shutdown: broadcast::Sender<()>) {
    let mut handles = Vec::with_capacity(EntityType::ALL.len());

    for entity_type in EntityType::ALL {
        let cycle = cycle.clone();
        let shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            run_rank_loop(cycle, entity_type, shutdown_rx).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Rank loop panicked");
        }
    }
}

/// Timer loop for one entity type
pub async fn run_rank_loop(
    cycle: Arc<RankCycle>,
    entity_type: EntityType,
    mut shutdown: broadcast::Receiver<()>,
) {
    if cycle.config().run_once {
        run_logged(&cycle, entity_type, &mut 0).await;
        return;
    }

    let interval_secs = cycle.config().interval_secs.max(1);
    let mut timer = interval(Duration::from_secs(interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    info!(entity_type = %entity_type, interval_secs, "Starting rank loop");

    loop {
        tokio::select! {
            _ = timer.tick() => {
                run_logged(&cycle, entity_type, &mut consecutive_failures).await;
            }
            _ = shutdown.recv() => {
                info!(entity_type = %entity_type, "Received shutdown signal, stopping rank loop");
                break;
            }
        }
    }

    info!(entity_type = %entity_type, "Rank loop stopped");
}

async fn run_logged(cycle: &RankCycle, entity_type: EntityType, consecutive_failures: &mut u32) {
    match cycle.run(entity_type).await {
        Ok(_) => {
            if *consecutive_failures > 0 {
                info!(
                    entity_type = %entity_type,
                    recovered_after = *consecutive_failures,
                    "Rank cycle recovered after failures"
                );
                *consecutive_failures = 0;
            }
        }
        Err(e) => {
            *consecutive_failures += 1;
            error!(
                entity_type = %entity_type,
                error = %e,
                consecutive_failures = *consecutive_failures,
                "Rank cycle failed, will retry on next interval"
            );
        }
    }
}
