pub mod config;
pub mod dimensions;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use dimensions::{DimensionRegistry, DimensionSource};
pub use jobs::{run_scheduler, CycleStats, RankCycle, RankCycleConfig};
pub use models::{EntityType, RankRecord, Resolution, TagSet};
pub use services::{
    EngineError, LocationAnnotator, LocationResolver, PipelineBuilder, RankExecutor, RankJob,
    SnapshotJanitor, Stage,
};
pub use store::{MemoryStore, PgRankStore, RankQuery, RankStore, StoreError};
