// ============================================
// Dimension Registry (維度註冊表)
// ============================================
//
// Canonical locations (with aliases and nested cities) and languages used to
// partition leaderboards. Loaded once at startup and shared read-only; the
// location resolver and pipeline builder borrow it at call time.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const EMBEDDED_LOCATIONS: &str = include_str!("../../assets/locations.json");
const EMBEDDED_LANGUAGES: &str = include_str!("../../assets/languages.json");

#[derive(Debug, Error)]
pub enum DimensionError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {what} catalog: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} catalog is empty")]
    Empty(&'static str),

    #[error("Duplicate location name: {0}")]
    DuplicateLocation(String),

    #[error("Duplicate city '{city}' in location '{location}'")]
    DuplicateCity { location: String, city: String },

    #[error("Blank {0} name")]
    BlankName(&'static str),
}

pub type Result<T> = std::result::Result<T, DimensionError>;

/// Alternative spelling of a location or city
#[derive(Debug, Clone, Deserialize)]
pub struct Alias {
    pub name: String,
    /// Unique aliases identify their owner on their own (e.g. "ROC")
    #[serde(default)]
    pub unique: bool,
    #[serde(skip)]
    key: String,
}

impl Alias {
    pub fn new(name: impl Into<String>, unique: bool) -> Self {
        let name = name.into();
        let key = name.to_lowercase();
        Self { name, unique, key }
    }

    /// Lowercased name used for matching
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Canonical location. Cities share the same shape and never nest further.
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub cities: Vec<Location>,
    #[serde(skip)]
    key: String,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = name.to_lowercase();
        Self {
            name,
            aliases: Vec::new(),
            cities: Vec::new(),
            key,
        }
    }

    pub fn with_alias(mut self, name: impl Into<String>, unique: bool) -> Self {
        self.aliases.push(Alias::new(name, unique));
        self
    }

    pub fn with_city(mut self, city: Location) -> Self {
        self.cities.push(city);
        self
    }

    /// Lowercased name used for matching
    pub fn key(&self) -> &str {
        &self.key
    }

    fn index(&mut self) {
        self.key = self.name.to_lowercase();
        for alias in &mut self.aliases {
            alias.key = alias.name.to_lowercase();
        }
        for city in &mut self.cities {
            city.index();
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Language {
    pub name: String,
}

impl Language {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Where the catalogs come from
#[derive(Debug, Clone, Default)]
pub enum DimensionSource {
    /// Catalog compiled into the binary
    #[default]
    Embedded,
    /// Directory holding `locations.json` and `languages.json`
    Directory(PathBuf),
}

impl DimensionSource {
    pub fn from_dir(dir: Option<&str>) -> Self {
        match dir {
            Some(dir) if !dir.trim().is_empty() => DimensionSource::Directory(PathBuf::from(dir)),
            _ => DimensionSource::Embedded,
        }
    }
}

/// Immutable catalog of locations and languages, in definition order
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    locations: Vec<Location>,
    languages: Vec<Language>,
}

impl DimensionRegistry {
    /// Load and validate the catalogs. Any failure here is fatal for the
    /// process: ranks cannot be computed without dimensions.
    pub fn load(source: &DimensionSource) -> Result<Self> {
        let (locations_json, languages_json) = match source {
            DimensionSource::Embedded => (
                EMBEDDED_LOCATIONS.to_string(),
                EMBEDDED_LANGUAGES.to_string(),
            ),
            DimensionSource::Directory(dir) => (
                read_catalog(&dir.join("locations.json"))?,
                read_catalog(&dir.join("languages.json"))?,
            ),
        };

        let registry = Self::from_json(&locations_json, &languages_json)?;

        info!(
            locations = registry.locations.len(),
            cities = registry.city_count(),
            languages = registry.languages.len(),
            "Dimension registry loaded"
        );

        Ok(registry)
    }

    pub fn from_json(locations_json: &str, languages_json: &str) -> Result<Self> {
        let locations: Vec<Location> =
            serde_json::from_str(locations_json).map_err(|source| DimensionError::Parse {
                what: "location",
                source,
            })?;
        let languages: Vec<Language> =
            serde_json::from_str(languages_json).map_err(|source| DimensionError::Parse {
                what: "language",
                source,
            })?;

        if locations.is_empty() {
            return Err(DimensionError::Empty("Location"));
        }
        if languages.is_empty() {
            return Err(DimensionError::Empty("Language"));
        }

        Self::new(locations, languages)
    }

    /// Build a registry from already-constructed entries
    pub fn new(mut locations: Vec<Location>, languages: Vec<Language>) -> Result<Self> {
        let mut seen_locations = HashSet::new();
        for location in &mut locations {
            location.index();
            if location.name.trim().is_empty() {
                return Err(DimensionError::BlankName("location"));
            }
            if !seen_locations.insert(location.key.clone()) {
                return Err(DimensionError::DuplicateLocation(location.name.clone()));
            }

            let mut seen_cities = HashSet::new();
            for city in &location.cities {
                if city.name.trim().is_empty() {
                    return Err(DimensionError::BlankName("city"));
                }
                if !seen_cities.insert(city.key.as_str()) {
                    return Err(DimensionError::DuplicateCity {
                        location: location.name.clone(),
                        city: city.name.clone(),
                    });
                }
            }
        }

        if languages.iter().any(|l| l.name.trim().is_empty()) {
            return Err(DimensionError::BlankName("language"));
        }

        Ok(Self {
            locations,
            languages,
        })
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn city_count(&self) -> usize {
        self.locations.iter().map(|l| l.cities.len()).sum()
    }
}

fn read_catalog(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| DimensionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog_loads() {
        let registry = DimensionRegistry::load(&DimensionSource::Embedded).unwrap();

        let taiwan = registry
            .locations()
            .iter()
            .find(|l| l.name == "Taiwan")
            .expect("Taiwan is in the embedded catalog");
        assert!(taiwan.cities.iter().any(|c| c.name == "Taipei"));
        assert!(registry.languages().iter().any(|l| l.name == "Rust"));
    }

    #[test]
    fn test_keys_are_lowercased() {
        let registry = DimensionRegistry::from_json(
            r#"[{"name": "Taiwan", "aliases": [{"name": "ROC", "unique": true}],
                 "cities": [{"name": "Taipei"}]}]"#,
            r#"[{"name": "Go"}]"#,
        )
        .unwrap();

        let taiwan = &registry.locations()[0];
        assert_eq!(taiwan.key(), "taiwan");
        assert_eq!(taiwan.aliases[0].key(), "roc");
        assert!(taiwan.aliases[0].unique);
        assert_eq!(taiwan.cities[0].key(), "taipei");
    }

    #[test]
    fn test_rejects_duplicate_city() {
        let err = DimensionRegistry::from_json(
            r#"[{"name": "Japan", "cities": [{"name": "Tokyo"}, {"name": "tokyo"}]}]"#,
            r#"[{"name": "Go"}]"#,
        )
        .unwrap_err();

        assert!(matches!(err, DimensionError::DuplicateCity { .. }));
    }

    #[test]
    fn test_rejects_duplicate_location() {
        let err = DimensionRegistry::from_json(
            r#"[{"name": "Japan"}, {"name": "Japan"}]"#,
            r#"[{"name": "Go"}]"#,
        )
        .unwrap_err();

        assert!(matches!(err, DimensionError::DuplicateLocation(_)));
    }

    #[test]
    fn test_rejects_malformed_and_empty() {
        assert!(matches!(
            DimensionRegistry::from_json("{not json", "[]"),
            Err(DimensionError::Parse { .. })
        ));
        assert!(matches!(
            DimensionRegistry::from_json("[]", r#"[{"name": "Go"}]"#),
            Err(DimensionError::Empty("Location"))
        ));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let source = DimensionSource::Directory(PathBuf::from("/nonexistent/dimensions"));
        assert!(matches!(
            DimensionRegistry::load(&source),
            Err(DimensionError::Io { .. })
        ));
    }
}
