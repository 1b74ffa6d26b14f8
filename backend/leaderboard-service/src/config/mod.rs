use crate::dimensions::DimensionSource;
use crate::models::EntityType;
use serde::Deserialize;

/// Service configuration, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// PostgreSQL connection URL for the entity corpus and rank records
    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Directory with locations.json / languages.json; embedded catalog if unset
    #[serde(default)]
    pub dimensions_dir: Option<String>,

    #[serde(default = "default_user_rank_concurrency")]
    pub user_rank_concurrency: usize,

    #[serde(default = "default_organization_rank_concurrency")]
    pub organization_rank_concurrency: usize,

    #[serde(default = "default_repository_rank_concurrency")]
    pub repository_rank_concurrency: usize,

    /// Interval between ranking cycles of one entity type
    #[serde(default = "default_rank_interval_secs")]
    pub rank_interval_secs: u64,

    /// Run each entity type once and exit (for CronJob mode)
    #[serde(default)]
    pub rank_run_once: bool,

    /// Entities resolved per page during location annotation
    #[serde(default = "default_annotate_batch_size")]
    pub annotate_batch_size: usize,
}

fn default_db_max_connections() -> u32 {
    8
}

fn default_user_rank_concurrency() -> usize {
    3
}

fn default_organization_rank_concurrency() -> usize {
    2
}

fn default_repository_rank_concurrency() -> usize {
    4
}

fn default_rank_interval_secs() -> u64 {
    86400 // 24 hours
}

fn default_annotate_batch_size() -> usize {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: default_db_max_connections(),
            dimensions_dir: None,
            user_rank_concurrency: default_user_rank_concurrency(),
            organization_rank_concurrency: default_organization_rank_concurrency(),
            repository_rank_concurrency: default_repository_rank_concurrency(),
            rank_interval_secs: default_rank_interval_secs(),
            rank_run_once: false,
            annotate_batch_size: default_annotate_batch_size(),
        }
    }
}

impl Config {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn dimension_source(&self) -> DimensionSource {
        DimensionSource::from_dir(self.dimensions_dir.as_deref())
    }

    /// Worker pool size for one entity type's rank run
    pub fn rank_concurrency(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::User => self.user_rank_concurrency,
            EntityType::Organization => self.organization_rank_concurrency,
            EntityType::Repository => self.repository_rank_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_environment() {
        let config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(config.rank_concurrency(EntityType::User), 3);
        assert_eq!(config.rank_concurrency(EntityType::Organization), 2);
        assert_eq!(config.rank_concurrency(EntityType::Repository), 4);
        assert_eq!(config.rank_interval_secs, 86400);
        assert!(!config.rank_run_once);
        assert!(matches!(config.dimension_source(), DimensionSource::Embedded));
    }

    #[test]
    fn test_overrides() {
        let config: Config = envy::from_iter(vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/ranks".to_string()),
            ("REPOSITORY_RANK_CONCURRENCY".to_string(), "2".to_string()),
            ("RANK_RUN_ONCE".to_string(), "true".to_string()),
            ("DIMENSIONS_DIR".to_string(), "/etc/leaderboard".to_string()),
        ])
        .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/ranks");
        assert_eq!(config.rank_concurrency(EntityType::Repository), 2);
        assert!(config.rank_run_once);
        assert_eq!(config.dimensions_dir.as_deref(), Some("/etc/leaderboard"));
    }
}
