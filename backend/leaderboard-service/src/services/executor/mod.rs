// ============================================
// Rank Executor (排名執行器)
// ============================================
//
// Runs every job of one ranking run against the store:
// 1. Count the entity type's subjects once (the `last` of every record)
// 2. Execute jobs on a semaphore-bounded worker set
// 3. Stream each job's sorted output, numbering records 1..N
// 4. Bulk insert in store-sized batches, plus a final partial batch
//
// The first failing job aborts the run; the remaining workers are cancelled
// and drained before the error is returned.

use super::{EngineError, RankJob, Result};
use crate::models::{EntityType, RankRecord, RankRow, TagSet};
use crate::store::RankStore;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub jobs: usize,
    pub records: u64,
    pub subjects: u64,
    pub elapsed_ms: u64,
}

/// Proof that every job of a run succeeded. Only the executor creates one,
/// and the snapshot janitor only sweeps for one.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub entity_type: EntityType,
    pub run_at: DateTime<Utc>,
    pub stats: RunStats,
}

pub struct RankExecutor {
    store: Arc<dyn RankStore>,
    concurrency: usize,
}

impl RankExecutor {
    pub fn new(store: Arc<dyn RankStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute all jobs of one run, stamping every record with `run_at`
    pub async fn execute(
        &self,
        entity_type: EntityType,
        jobs: Vec<RankJob>,
        run_at: DateTime<Utc>,
    ) -> Result<CompletedRun> {
        let start = Instant::now();
        let subjects = self.store.count_entities(entity_type).await?;
        let last = i64::try_from(subjects).unwrap_or(i64::MAX);
        let job_count = jobs.len();

        info!(
            entity_type = %entity_type,
            jobs = job_count,
            subjects,
            concurrency = self.concurrency,
            run_at = %run_at,
            "Starting rank run"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for job in jobs {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::Worker(e.to_string()))?;
                run_job(store.as_ref(), job, run_at, last).await
            });
        }

        let mut records = 0u64;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(EngineError::Worker(e.to_string())));
            match outcome {
                Ok(written) => records += written,
                Err(e) => {
                    error!(entity_type = %entity_type, error = %e, "Rank run aborted");
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }

        let stats = RunStats {
            jobs: job_count,
            records,
            subjects,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            entity_type = %entity_type,
            jobs = stats.jobs,
            records = stats.records,
            elapsed_ms = stats.elapsed_ms,
            "Rank run completed"
        );

        Ok(CompletedRun {
            entity_type,
            run_at,
            stats,
        })
    }
}

/// Execute one job and persist its records. Returns the number written.
async fn run_job(
    store: &dyn RankStore,
    job: RankJob,
    run_at: DateTime<Utc>,
    last: i64,
) -> Result<u64> {
    let mut cursor = store
        .aggregate(job.entity_type, &job.stages)
        .await
        .map_err(|source| EngineError::Query {
            tags: job.tags.clone(),
            source,
        })?;

    let batch_size = store.batch_size().max(1);
    let mut buffer: Vec<RankRecord> = Vec::with_capacity(batch_size.min(1024));
    let mut rank = 0i64;
    let mut written = 0u64;

    while let Some(item) = cursor.next().await {
        let doc = item.map_err(|source| EngineError::Query {
            tags: job.tags.clone(),
            source,
        })?;
        let row: RankRow = serde_json::from_value(doc).map_err(|source| EngineError::Decode {
            tags: job.tags.clone(),
            source,
        })?;

        rank += 1;
        buffer.push(RankRecord {
            subject_id: row.subject_id,
            image_url: row.image_url,
            rank,
            total_count: row.total_count,
            last,
            tags: job.tags.clone(),
            created_at: run_at,
        });

        if buffer.len() >= batch_size {
            written += flush(store, &job.tags, &mut buffer).await?;
        }
    }
    written += flush(store, &job.tags, &mut buffer).await?;

    debug!(tags = %job.tags, records = written, "Rank job completed");
    Ok(written)
}

async fn flush(store: &dyn RankStore, tags: &TagSet, buffer: &mut Vec<RankRecord>) -> Result<u64> {
    if buffer.is_empty() {
        return Ok(0);
    }

    let batch = std::mem::take(buffer);
    let count = batch.len() as u64;
    store
        .insert_ranks(batch)
        .await
        .map_err(|source| EngineError::Persist {
            tags: tags.clone(),
            source,
        })?;
    Ok(count)
}
