use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Document field names shared by the pipeline builder and the stores.
pub mod fields {
    pub const ID: &str = "_id";
    pub const IMAGE_URL: &str = "image_url";
    pub const PARSED_LOCATION: &str = "parsed_location";
    pub const PARSED_CITY: &str = "parsed_city";
    pub const REPOSITORIES: &str = "repositories";
    pub const LANGUAGE: &str = "language";
    pub const TOTAL_COUNT: &str = "total_count";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Organization,
    Repository,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::User,
        EntityType::Organization,
        EntityType::Repository,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Organization => "organization",
            EntityType::Repository => "repository",
        }
    }

    /// Collection holding this entity type's documents
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::User => "users",
            EntityType::Organization => "organizations",
            EntityType::Repository => "repositories",
        }
    }

    /// Owners carry a nested repository list and get per-language ranks
    pub fn has_repositories(&self) -> bool {
        matches!(self, EntityType::User | EntityType::Organization)
    }

    /// Metric fields ranked on every cycle
    pub fn metric_fields(&self) -> &'static [&'static str] {
        match self {
            EntityType::User | EntityType::Organization => {
                &["repositories.stargazers", "repositories.forks"]
            }
            EntityType::Repository => &["stargazers", "forks"],
        }
    }

    /// Dotted path of the free-text profile location
    pub fn location_source(&self) -> &'static str {
        match self {
            EntityType::User | EntityType::Organization => "location",
            EntityType::Repository => "owner.location",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(EntityType::User),
            "organization" | "organizations" | "org" => Ok(EntityType::Organization),
            "repository" | "repositories" | "repo" => Ok(EntityType::Repository),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// Tag constructors. Every tag is a `facet:value` string.
pub mod tags {
    use super::EntityType;

    pub fn entity_type(entity_type: EntityType) -> String {
        format!("type:{}", entity_type.as_str())
    }

    pub fn field(path: &str) -> String {
        format!("field:{}", path)
    }

    pub fn location(name: &str) -> String {
        format!("location:{}", name)
    }

    pub fn city(name: &str) -> String {
        format!("city:{}", name)
    }

    pub fn language(name: &str) -> String {
        format!("language:{}", name)
    }
}

/// Sorted tag set; iteration and serialization order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: impl Into<String>) -> Self {
        self.0.insert(tag.into());
        self
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", joined.join(","))
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// One ranked subject, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRecord {
    pub subject_id: String,
    pub image_url: Option<String>,
    /// 1-based position in the job's sorted output
    pub rank: i64,
    pub total_count: i64,
    /// Number of subjects of this entity type in the run
    pub last: i64,
    pub tags: TagSet,
    pub created_at: DateTime<Utc>,
}

/// Shape of a single aggregation output document
#[derive(Debug, Clone, Deserialize)]
pub struct RankRow {
    #[serde(rename = "_id")]
    pub subject_id: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub total_count: i64,
}

/// Canonical location/city assigned to an entity by the location resolver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub location: Option<String>,
    pub city: Option<String>,
}

impl Resolution {
    pub fn location(name: impl Into<String>) -> Self {
        Self {
            location: Some(name.into()),
            city: None,
        }
    }

    pub fn city(location: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            city: Some(city.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.city.is_none()
    }
}

/// Free-text location of one entity, as read during corpus annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLocation {
    pub id: String,
    pub location: Option<String>,
}
