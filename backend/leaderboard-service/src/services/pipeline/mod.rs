//! Rank job generation.
//!
//! Expands the configured metric fields of one entity type into the full set
//! of rank jobs for a run: a global job, one job per location and per
//! location/city pair, and (for repository owners) one job per language.
//! Stages are plain data so any store can translate them.

use crate::dimensions::DimensionRegistry;
use crate::models::{fields, tags, EntityType, TagSet};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Equality predicate on a dotted path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEq {
    pub path: String,
    pub value: String,
}

impl FieldEq {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Sum of every numeric value reachable through `path`, written to `output`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SumOf {
    pub output: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum Stage {
    /// Keep documents matching every predicate
    Match(Vec<FieldEq>),
    /// One output document per element of the array at `path`
    Unwind { path: String },
    /// Group by `key`, summing per group; `carry` fields keep their first value
    Group {
        key: String,
        total: SumOf,
        carry: Vec<String>,
    },
    /// Reshape to `keep` fields plus a per-document sum
    Project { keep: Vec<String>, total: SumOf },
    Sort { field: String, order: SortOrder },
}

#[derive(Debug, Clone, Serialize)]
pub struct RankJob {
    pub entity_type: EntityType,
    pub metric_field: String,
    pub tags: TagSet,
    pub stages: Vec<Stage>,
}

pub struct PipelineBuilder<'a> {
    registry: &'a DimensionRegistry,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(registry: &'a DimensionRegistry) -> Self {
        Self { registry }
    }

    /// Jobs for the entity type's default metric fields
    pub fn build(&self, entity_type: EntityType) -> Vec<RankJob> {
        self.build_fields(entity_type, entity_type.metric_fields())
    }

    pub fn build_fields(&self, entity_type: EntityType, metric_fields: &[&str]) -> Vec<RankJob> {
        metric_fields
            .iter()
            .flat_map(|field| self.build_field(entity_type, field))
            .collect()
    }

    /// Number of jobs `build_fields` emits per metric field
    pub fn jobs_per_field(&self, entity_type: EntityType) -> usize {
        let languages = if entity_type.has_repositories() {
            self.registry.languages().len()
        } else {
            0
        };
        1 + self.registry.locations().len() + self.registry.city_count() + languages
    }

    fn build_field(&self, entity_type: EntityType, field: &str) -> Vec<RankJob> {
        let base_tags = TagSet::new()
            .with(tags::entity_type(entity_type))
            .with(tags::field(field));

        let mut jobs = Vec::with_capacity(self.jobs_per_field(entity_type));

        jobs.push(RankJob {
            entity_type,
            metric_field: field.to_string(),
            tags: base_tags.clone(),
            stages: summed_per_entity(Vec::new(), field),
        });

        for location in self.registry.locations() {
            jobs.push(RankJob {
                entity_type,
                metric_field: field.to_string(),
                tags: base_tags.clone().with(tags::location(&location.name)),
                stages: summed_per_entity(
                    vec![FieldEq::new(fields::PARSED_LOCATION, &location.name)],
                    field,
                ),
            });

            for city in &location.cities {
                jobs.push(RankJob {
                    entity_type,
                    metric_field: field.to_string(),
                    tags: base_tags
                        .clone()
                        .with(tags::location(&location.name))
                        .with(tags::city(&city.name)),
                    stages: summed_per_entity(
                        vec![
                            FieldEq::new(fields::PARSED_LOCATION, &location.name),
                            FieldEq::new(fields::PARSED_CITY, &city.name),
                        ],
                        field,
                    ),
                });
            }
        }

        if entity_type.has_repositories() {
            for language in self.registry.languages() {
                jobs.push(RankJob {
                    entity_type,
                    metric_field: field.to_string(),
                    tags: base_tags.clone().with(tags::language(&language.name)),
                    stages: summed_per_language(&language.name, field),
                });
            }
        }

        jobs
    }
}

fn total_count(path: &str) -> SumOf {
    SumOf {
        output: fields::TOTAL_COUNT.to_string(),
        path: path.to_string(),
    }
}

fn sort_by_total() -> Stage {
    Stage::Sort {
        field: fields::TOTAL_COUNT.to_string(),
        order: SortOrder::Descending,
    }
}

fn summed_per_entity(filters: Vec<FieldEq>, field: &str) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(3);
    if !filters.is_empty() {
        stages.push(Stage::Match(filters));
    }
    stages.push(Stage::Project {
        keep: vec![fields::ID.to_string(), fields::IMAGE_URL.to_string()],
        total: total_count(field),
    });
    stages.push(sort_by_total());
    stages
}

/// Unwind the owner's repositories, keep the ones written in `language`,
/// and sum `field` per owner over what is left
fn summed_per_language(language: &str, field: &str) -> Vec<Stage> {
    let language_path = format!("{}.{}", fields::REPOSITORIES, fields::LANGUAGE);
    vec![
        Stage::Unwind {
            path: fields::REPOSITORIES.to_string(),
        },
        Stage::Match(vec![FieldEq::new(language_path, language)]),
        Stage::Group {
            key: fields::ID.to_string(),
            total: total_count(field),
            carry: vec![fields::IMAGE_URL.to_string()],
        },
        sort_by_total(),
    ]
}
