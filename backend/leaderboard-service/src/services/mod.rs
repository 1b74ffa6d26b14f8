pub mod annotator;
pub mod executor;
pub mod janitor;
pub mod location_resolver;
pub mod pipeline;

pub use annotator::{AnnotationStats, LocationAnnotator};
pub use executor::{CompletedRun, RankExecutor, RunStats};
pub use janitor::SnapshotJanitor;
pub use location_resolver::{LocationResolver, FUZZY_CITY_MIN_LEN};
pub use pipeline::{FieldEq, PipelineBuilder, RankJob, SortOrder, Stage, SumOf};

use crate::models::TagSet;
use crate::store::StoreError;
use thiserror::Error;

/// Failures that abort a ranking run. None of them are retried: the corpus
/// is already collected, so they point at schema or programming errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Query failed for job {tags}: {source}")]
    Query {
        tags: TagSet,
        #[source]
        source: StoreError,
    },

    #[error("Failed to decode result of job {tags}: {source}")]
    Decode {
        tags: TagSet,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist ranks of job {tags}: {source}")]
    Persist {
        tags: TagSet,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Rank worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
