// ============================================
// Rank Cycle (排名週期)
// ============================================
//
// One ranking cycle for one entity type:
// 1. Fix the run timestamp shared by every record of the run
// 2. Build the rank jobs from the dimension registry
// 3. Execute them on the entity type's bounded worker pool
// 4. Sweep older snapshots, only after every job succeeded
//
// A failed cycle leaves the previous snapshot in place and discards the
// partial records it wrote under its own timestamp.

use crate::config::Config;
use crate::dimensions::DimensionRegistry;
use crate::models::EntityType;
use crate::services::{PipelineBuilder, RankExecutor, Result, SnapshotJanitor};
use crate::store::RankStore;
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RankCycleConfig {
    pub user_concurrency: usize,
    pub organization_concurrency: usize,
    pub repository_concurrency: usize,
    /// Interval between cycles of one entity type
    pub interval_secs: u64,
    /// Run each entity type once, then stop
    pub run_once: bool,
}

impl Default for RankCycleConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RankCycleConfig {
    fn from(config: &Config) -> Self {
        Self {
            user_concurrency: config.rank_concurrency(EntityType::User),
            organization_concurrency: config.rank_concurrency(EntityType::Organization),
            repository_concurrency: config.rank_concurrency(EntityType::Repository),
            interval_secs: config.rank_interval_secs,
            run_once: config.rank_run_once,
        }
    }
}

impl RankCycleConfig {
    pub fn concurrency(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::User => self.user_concurrency,
            EntityType::Organization => self.organization_concurrency,
            EntityType::Repository => self.repository_concurrency,
        }
    }
}

/// Outcome of one successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub entity_type: EntityType,
    pub run_at: DateTime<Utc>,
    pub jobs: usize,
    pub records: u64,
    pub deleted: u64,
    pub elapsed_ms: u64,
}

pub struct RankCycle {
    store: Arc<dyn RankStore>,
    registry: Arc<DimensionRegistry>,
    config: RankCycleConfig,
}

impl RankCycle {
    pub fn new(
        store: Arc<dyn RankStore>,
        registry: Arc<DimensionRegistry>,
        config: RankCycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RankCycleConfig {
        &self.config
    }

    /// Rank one entity type and cut over to the new snapshot
    pub async fn run(&self, entity_type: EntityType) -> Result<CycleStats> {
        // Microsecond precision survives a round trip through TIMESTAMPTZ
        let run_at = Utc::now().trunc_subsecs(6);
        self.run_at(entity_type, run_at).await
    }

    /// Same as [`RankCycle::run`] with a caller-chosen run timestamp
    pub async fn run_at(&self, entity_type: EntityType, run_at: DateTime<Utc>) -> Result<CycleStats> {
        let start = Instant::now();
        let jobs = PipelineBuilder::new(&self.registry).build(entity_type);
        let job_count = jobs.len();

        let executor = RankExecutor::new(self.store.clone(), self.config.concurrency(entity_type));
        let janitor = SnapshotJanitor::new(self.store.clone());

        let completed = match executor.execute(entity_type, jobs, run_at).await {
            Ok(completed) => completed,
            Err(e) => {
                error!(
                    entity_type = %entity_type,
                    run_at = %run_at,
                    error = %e,
                    "Rank cycle failed, previous snapshot kept"
                );
                if let Err(discard_err) = janitor.discard(entity_type, run_at).await {
                    warn!(
                        entity_type = %entity_type,
                        error = %discard_err,
                        "Failed to discard partial records of failed run"
                    );
                }
                return Err(e);
            }
        };

        let deleted = janitor.sweep(&completed).await?;

        let stats = CycleStats {
            entity_type,
            run_at,
            jobs: job_count,
            records: completed.stats.records,
            deleted,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            entity_type = %entity_type,
            jobs = stats.jobs,
            records = stats.records,
            deleted = stats.deleted,
            elapsed_ms = stats.elapsed_ms,
            "Rank cycle completed"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{Language, Location};
    use crate::models::{EntityLocation, RankRecord, Resolution};
    use crate::services::{EngineError, Stage};
    use crate::store::{self, Cursor, MemoryStore, RankQuery, StoreError};
    use async_trait::async_trait;
    use chrono::Duration;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Store {}

        #[async_trait]
        impl RankStore for Store {
            async fn count_entities(&self, entity_type: EntityType) -> store::Result<u64>;
            async fn aggregate(&self, entity_type: EntityType, stages: &[Stage]) -> store::Result<Cursor>;
            async fn insert_ranks(&self, records: Vec<RankRecord>) -> store::Result<()>;
            async fn delete_ranks_before(
                &self,
                entity_type: EntityType,
                before: DateTime<Utc>,
            ) -> store::Result<u64>;
            async fn delete_ranks_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> store::Result<u64>;
            async fn find_ranks(&self, query: &RankQuery) -> store::Result<Vec<RankRecord>>;
            async fn fetch_entity_locations(
                &self,
                entity_type: EntityType,
                after_id: Option<String>,
                limit: usize,
            ) -> store::Result<Vec<EntityLocation>>;
            async fn update_resolution(
                &self,
                entity_type: EntityType,
                id: &str,
                resolution: &Resolution,
            ) -> store::Result<()>;
            fn batch_size(&self) -> usize;
        }
    }

    fn small_registry() -> Arc<DimensionRegistry> {
        let taiwan = Location::new("Taiwan").with_city(Location::new("Taipei"));
        Arc::new(DimensionRegistry::new(vec![taiwan], vec![Language::new("Rust")]).unwrap())
    }

    #[tokio::test]
    async fn test_failed_run_never_sweeps() {
        let mut mock = MockStore::new();
        mock.expect_count_entities().returning(|_| Ok(3));
        mock.expect_batch_size().return_const(1000usize);
        mock.expect_aggregate()
            .returning(|_, _| Err(StoreError::Cursor("connection reset".to_string())));
        mock.expect_insert_ranks().never();
        mock.expect_delete_ranks_before().never();
        mock.expect_delete_ranks_at().times(1).returning(|_, _| Ok(0));

        let cycle = RankCycle::new(Arc::new(mock), small_registry(), RankCycleConfig::default());
        let result = cycle.run(EntityType::Repository).await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, EngineError::Query { .. }));
    }

    #[tokio::test]
    async fn test_successful_run_sweeps_older_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_entities(
                EntityType::Repository,
                vec![
                    json!({"_id": "a", "stargazers": 5, "forks": 1, "parsed_location": "Taiwan"}),
                    json!({"_id": "b", "stargazers": 9, "forks": 2}),
                ],
            )
            .await;

        let cycle = RankCycle::new(store.clone(), small_registry(), RankCycleConfig::default());
        let first_at = Utc::now().trunc_subsecs(6) - Duration::hours(1);

        let first = tokio_test::assert_ok!(cycle.run_at(EntityType::Repository, first_at).await);
        assert_eq!(first.deleted, 0);
        // 2 fields x (global + Taiwan + Taipei)
        assert_eq!(first.jobs, 6);
        assert_eq!(first.records, 2 * (2 + 1));

        let second = tokio_test::assert_ok!(cycle.run(EntityType::Repository).await);
        assert_eq!(second.deleted, first.records);
        assert!(store
            .rank_records()
            .await
            .iter()
            .all(|r| r.created_at == second.run_at));
    }

    #[test]
    fn test_run_timestamp_has_microsecond_precision() {
        let run_at = Utc::now().trunc_subsecs(6);
        assert_eq!(run_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_config_from_service_config() {
        let config = Config {
            organization_rank_concurrency: 7,
            rank_run_once: true,
            ..Config::default()
        };
        let cycle_config = RankCycleConfig::from(&config);

        assert_eq!(cycle_config.concurrency(EntityType::Organization), 7);
        assert_eq!(cycle_config.concurrency(EntityType::User), 3);
        assert!(cycle_config.run_once);
    }
}
