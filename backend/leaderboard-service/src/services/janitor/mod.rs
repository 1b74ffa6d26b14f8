//! Snapshot cutover.
//!
//! Once a run has completed, every older rank record of the same entity
//! type is removed with a single timestamp-range delete. A run that failed
//! never produces a [`CompletedRun`], so the previous snapshot stays live.

use super::CompletedRun;
use crate::models::EntityType;
use crate::store::{RankStore, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SnapshotJanitor {
    store: Arc<dyn RankStore>,
}

impl SnapshotJanitor {
    pub fn new(store: Arc<dyn RankStore>) -> Self {
        Self { store }
    }

    /// Delete records of the run's entity type created before the run
    pub async fn sweep(&self, run: &CompletedRun) -> Result<u64> {
        let deleted = self
            .store
            .delete_ranks_before(run.entity_type, run.run_at)
            .await?;

        info!(
            entity_type = %run.entity_type,
            run_at = %run.run_at,
            deleted,
            "Stale rank records removed"
        );
        Ok(deleted)
    }

    /// Remove what a failed run managed to write before it aborted
    pub async fn discard(&self, entity_type: EntityType, run_at: DateTime<Utc>) -> Result<u64> {
        let deleted = self.store.delete_ranks_at(entity_type, run_at).await?;
        if deleted > 0 {
            warn!(
                entity_type = %entity_type,
                run_at = %run_at,
                deleted,
                "Discarded records of failed rank run"
            );
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{tags, RankRecord, TagSet};
    use crate::services::RunStats;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn record(entity_type: EntityType, created_at: DateTime<Utc>) -> RankRecord {
        RankRecord {
            subject_id: "octocat".to_string(),
            image_url: None,
            rank: 1,
            total_count: 10,
            last: 1,
            tags: TagSet::new().with(tags::entity_type(entity_type)),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_sweep_keeps_current_run_and_other_types() {
        let store = Arc::new(MemoryStore::new());
        let run_at = Utc::now();
        let previous = run_at - Duration::days(1);

        store
            .insert_ranks(vec![
                record(EntityType::User, previous),
                record(EntityType::User, run_at),
                record(EntityType::Organization, previous),
            ])
            .await
            .unwrap();

        let janitor = SnapshotJanitor::new(store.clone());
        let run = CompletedRun {
            entity_type: EntityType::User,
            run_at,
            stats: RunStats::default(),
        };

        assert_eq!(janitor.sweep(&run).await.unwrap(), 1);
        let remaining = store.rank_records().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining
            .iter()
            .all(|r| r.created_at == run_at || r.tags.contains("type:organization")));
    }

    #[tokio::test]
    async fn test_discard_removes_only_failed_run() {
        let store = Arc::new(MemoryStore::new());
        let failed_at = Utc::now();
        let previous = failed_at - Duration::days(1);

        store
            .insert_ranks(vec![
                record(EntityType::User, previous),
                record(EntityType::User, failed_at),
            ])
            .await
            .unwrap();

        let janitor = SnapshotJanitor::new(store.clone());
        assert_eq!(janitor.discard(EntityType::User, failed_at).await.unwrap(), 1);

        let remaining = store.rank_records().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].created_at, previous);
    }
}
