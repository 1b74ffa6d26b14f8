// ============================================
// Rank Store (文檔存儲抽象)
// ============================================
//
// The ranking engine reads the entity corpus and writes rank records only
// through this trait. Two implementations:
// - MemoryStore: in-process documents, evaluates stages directly
// - PgRankStore: JSONB documents in PostgreSQL, stages compiled to SQL

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgRankStore;

use crate::models::{EntityLocation, EntityType, RankRecord, Resolution, TagSet};
use crate::services::Stage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Unsupported pipeline: {0}")]
    UnsupportedPipeline(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cursor error: {0}")]
    Cursor(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw aggregation output document
pub type Document = serde_json::Value;

/// Streamed aggregation results, in store order
pub type Cursor = BoxStream<'static, Result<Document>>;

/// Lookup of one leaderboard page
#[derive(Debug, Clone)]
pub struct RankQuery {
    pub entity_type: EntityType,
    /// Exact tag set of the originating job
    pub tags: TagSet,
    /// Restrict to one run; all runs when `None`
    pub created_at: Option<DateTime<Utc>>,
    pub skip: i64,
    pub limit: i64,
}

impl RankQuery {
    pub fn new(entity_type: EntityType, tags: TagSet) -> Self {
        Self {
            entity_type,
            tags,
            created_at: None,
            skip: 0,
            limit: 100,
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn page(mut self, skip: i64, limit: i64) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

#[async_trait]
pub trait RankStore: Send + Sync {
    /// Number of entities of this type in the corpus
    async fn count_entities(&self, entity_type: EntityType) -> Result<u64>;

    /// Run an aggregation pipeline over the entity collection
    async fn aggregate(&self, entity_type: EntityType, stages: &[Stage]) -> Result<Cursor>;

    /// Unordered bulk insert
    async fn insert_ranks(&self, records: Vec<RankRecord>) -> Result<()>;

    /// Delete this type's rank records created strictly before `before`
    async fn delete_ranks_before(
        &self,
        entity_type: EntityType,
        before: DateTime<Utc>,
    ) -> Result<u64>;

    /// Delete this type's rank records created exactly at `at`
    async fn delete_ranks_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> Result<u64>;

    /// Page of rank records ordered by rank
    async fn find_ranks(&self, query: &RankQuery) -> Result<Vec<RankRecord>>;

    /// Page of entity locations ordered by id, starting after `after_id`
    async fn fetch_entity_locations(
        &self,
        entity_type: EntityType,
        after_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<EntityLocation>>;

    /// Store the resolver's output on the entity
    async fn update_resolution(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: &Resolution,
    ) -> Result<()>;

    /// Records per bulk insert
    fn batch_size(&self) -> usize;
}
