//! In-process document store.
//!
//! Holds entity documents per collection and evaluates aggregation stages
//! with document-store semantics: dotted paths traverse arrays, unwind drops
//! documents whose array is missing or empty, group keeps first-seen order
//! and sort is stable.

use super::{Cursor, Document, RankQuery, RankStore, Result};
use crate::models::{fields, tags, EntityLocation, EntityType, RankRecord, Resolution};
use crate::services::{SortOrder, Stage};
use crate::utils::{set_path, sum_numeric, value_at, values_at};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct MemoryStore {
    collections: RwLock<HashMap<EntityType, Vec<Document>>>,
    ranks: RwLock<Vec<RankRecord>>,
    batch_size: usize,
    insert_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            ranks: RwLock::new(Vec::new()),
            batch_size: batch_size.max(1),
            insert_calls: AtomicUsize::new(0),
        }
    }

    pub async fn insert_entities(&self, entity_type: EntityType, docs: Vec<Document>) {
        self.collections
            .write()
            .await
            .entry(entity_type)
            .or_default()
            .extend(docs);
    }

    pub async fn entities(&self, entity_type: EntityType) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(&entity_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored rank record, in insertion order
    pub async fn rank_records(&self) -> Vec<RankRecord> {
        self.ranks.read().await.clone()
    }

    /// Number of bulk inserts received so far
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl RankStore for MemoryStore {
    async fn count_entities(&self, entity_type: EntityType) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .await
            .get(&entity_type)
            .map_or(0, |docs| docs.len() as u64))
    }

    async fn aggregate(&self, entity_type: EntityType, stages: &[Stage]) -> Result<Cursor> {
        let docs = self.entities(entity_type).await;
        let results = evaluate(docs, stages);
        Ok(Box::pin(futures::stream::iter(results.into_iter().map(Ok))))
    }

    async fn insert_ranks(&self, records: Vec<RankRecord>) -> Result<()> {
        self.insert_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.ranks.write().await.extend(records);
        Ok(())
    }

    async fn delete_ranks_before(
        &self,
        entity_type: EntityType,
        before: DateTime<Utc>,
    ) -> Result<u64> {
        let type_tag = tags::entity_type(entity_type);
        Ok(self
            .delete_where(|r| r.tags.contains(&type_tag) && r.created_at < before)
            .await)
    }

    async fn delete_ranks_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> Result<u64> {
        let type_tag = tags::entity_type(entity_type);
        Ok(self
            .delete_where(|r| r.tags.contains(&type_tag) && r.created_at == at)
            .await)
    }

    async fn find_ranks(&self, query: &RankQuery) -> Result<Vec<RankRecord>> {
        let type_tag = tags::entity_type(query.entity_type);
        let mut found: Vec<RankRecord> = self
            .ranks
            .read()
            .await
            .iter()
            .filter(|r| r.tags.contains(&type_tag) && r.tags == query.tags)
            .filter(|r| query.created_at.map_or(true, |at| r.created_at == at))
            .cloned()
            .collect();

        found.sort_by_key(|r| r.rank);
        Ok(found
            .into_iter()
            .skip(query.skip.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn fetch_entity_locations(
        &self,
        entity_type: EntityType,
        after_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<EntityLocation>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&entity_type) else {
            return Ok(Vec::new());
        };

        let mut page: Vec<EntityLocation> = docs
            .iter()
            .filter_map(|doc| {
                let id = value_at(doc, fields::ID)?.as_str()?;
                Some(EntityLocation {
                    id: id.to_string(),
                    location: value_at(doc, entity_type.location_source())
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .filter(|entity| {
                after_id
                    .as_deref()
                    .map_or(true, |after| entity.id.as_str() > after)
            })
            .collect();

        page.sort_by(|a, b| a.id.cmp(&b.id));
        page.truncate(limit);
        Ok(page)
    }

    async fn update_resolution(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: &Resolution,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&entity_type) else {
            return Ok(());
        };

        for doc in docs
            .iter_mut()
            .filter(|doc| value_at(doc, fields::ID).and_then(Value::as_str) == Some(id))
        {
            set_path(doc, fields::PARSED_LOCATION, optional(&resolution.location));
            set_path(doc, fields::PARSED_CITY, optional(&resolution.city));
        }
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl MemoryStore {
    async fn delete_where(&self, predicate: impl Fn(&RankRecord) -> bool) -> u64 {
        let mut ranks = self.ranks.write().await;
        let before = ranks.len();
        ranks.retain(|r| !predicate(r));
        (before - ranks.len()) as u64
    }
}

fn optional(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::String)
}

/// Apply stages in order to an owned document set
pub fn evaluate(mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(predicates) => docs
                .into_iter()
                .filter(|doc| {
                    predicates.iter().all(|p| {
                        values_at(doc, &p.path)
                            .into_iter()
                            .any(|v| v.as_str() == Some(p.value.as_str()))
                    })
                })
                .collect(),
            Stage::Unwind { path } => docs
                .into_iter()
                .flat_map(|doc| unwind(doc, path))
                .collect(),
            Stage::Group { key, total, carry } => group(docs, key, &total.output, &total.path, carry),
            Stage::Project { keep, total } => docs
                .iter()
                .map(|doc| {
                    let mut out = Value::Object(Map::new());
                    for path in keep {
                        if let Some(value) = value_at(doc, path) {
                            set_path(&mut out, path, value.clone());
                        }
                    }
                    set_path(&mut out, &total.output, Value::from(sum_numeric(doc, &total.path)));
                    out
                })
                .collect(),
            Stage::Sort { field, order } => {
                let mut sorted = docs;
                sorted.sort_by(|a, b| {
                    let ordering = compare_numeric(value_at(a, field), value_at(b, field));
                    match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    }
                });
                sorted
            }
        };
    }
    docs
}

fn unwind(doc: Document, path: &str) -> Vec<Document> {
    let items = match value_at(&doc, path) {
        Some(Value::Array(items)) => items.clone(),
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            let mut copy = doc.clone();
            set_path(&mut copy, path, item);
            copy
        })
        .collect()
}

fn group(docs: Vec<Document>, key: &str, output: &str, path: &str, carry: &[String]) -> Vec<Document> {
    let mut groups: Vec<Document> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in &docs {
        let key_value = value_at(doc, key).cloned().unwrap_or(Value::Null);
        let slot = *index.entry(key_value.to_string()).or_insert_with(|| {
            let mut out = Value::Object(Map::new());
            set_path(&mut out, fields::ID, key_value.clone());
            for field in carry {
                if let Some(value) = value_at(doc, field) {
                    set_path(&mut out, field, value.clone());
                }
            }
            set_path(&mut out, output, Value::from(0i64));
            groups.push(out);
            groups.len() - 1
        });

        let running = value_at(&groups[slot], output)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        set_path(
            &mut groups[slot],
            output,
            Value::from(running + sum_numeric(doc, path)),
        );
    }

    groups
}

/// Missing and non-numeric values sort lowest
fn compare_numeric(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.and_then(Value::as_f64);
    let b = b.and_then(Value::as_f64);
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FieldEq, SumOf};
    use crate::TagSet;
    use chrono::Duration;
    use futures::StreamExt;
    use serde_json::json;

    fn total(path: &str) -> SumOf {
        SumOf {
            output: "total_count".to_string(),
            path: path.to_string(),
        }
    }

    fn sort_desc() -> Stage {
        Stage::Sort {
            field: "total_count".to_string(),
            order: SortOrder::Descending,
        }
    }

    fn owners() -> Vec<Document> {
        vec![
            json!({"_id": "alice", "image_url": "a.png", "parsed_location": "Taiwan",
                   "repositories": [
                       {"language": "Rust", "stargazers": 5},
                       {"language": "Go", "stargazers": 50}
                   ]}),
            json!({"_id": "bob", "image_url": "b.png", "parsed_location": "Japan",
                   "repositories": [
                       {"language": "Rust", "stargazers": 7},
                       {"language": "Rust", "stargazers": 1}
                   ]}),
            json!({"_id": "carol", "image_url": "c.png", "repositories": []}),
        ]
    }

    #[test]
    fn test_project_sums_nested_metric() {
        let out = evaluate(
            owners(),
            &[
                Stage::Project {
                    keep: vec!["_id".to_string(), "image_url".to_string()],
                    total: total("repositories.stargazers"),
                },
                sort_desc(),
            ],
        );

        let ids: Vec<&str> = out.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
        assert_eq!(out[0]["total_count"], 55);
        assert_eq!(out[2]["total_count"], 0);
        assert!(out[0].get("repositories").is_none());
    }

    #[test]
    fn test_match_filters_on_equality() {
        let out = evaluate(
            owners(),
            &[Stage::Match(vec![FieldEq::new("parsed_location", "Japan")])],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["_id"], "bob");
    }

    #[test]
    fn test_unwind_match_group_per_language() {
        let out = evaluate(
            owners(),
            &[
                Stage::Unwind {
                    path: "repositories".to_string(),
                },
                Stage::Match(vec![FieldEq::new("repositories.language", "Rust")]),
                Stage::Group {
                    key: "_id".to_string(),
                    total: total("repositories.stargazers"),
                    carry: vec!["image_url".to_string()],
                },
                sort_desc(),
            ],
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], json!({"_id": "bob", "image_url": "b.png", "total_count": 8}));
        assert_eq!(out[1], json!({"_id": "alice", "image_url": "a.png", "total_count": 5}));
    }

    #[test]
    fn test_unwind_drops_empty_arrays() {
        let out = evaluate(
            owners(),
            &[Stage::Unwind {
                path: "repositories".to_string(),
            }],
        );
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|d| d["_id"] != "carol"));
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let docs = vec![
            json!({"_id": "x", "total_count": 1}),
            json!({"_id": "y", "total_count": 2}),
            json!({"_id": "z", "total_count": 1}),
        ];
        let out = evaluate(docs, &[sort_desc()]);
        let ids: Vec<&str> = out.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["y", "x", "z"]);
    }

    #[tokio::test]
    async fn test_aggregate_streams_results() {
        let store = MemoryStore::new();
        store.insert_entities(EntityType::User, owners()).await;

        let mut cursor = store
            .aggregate(
                EntityType::User,
                &[Stage::Match(vec![FieldEq::new("parsed_location", "Taiwan")])],
            )
            .await
            .unwrap();

        let first = cursor.next().await.unwrap().unwrap();
        assert_eq!(first["_id"], "alice");
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_before_is_scoped_to_entity_type() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = now - Duration::hours(1);

        let record = |entity_type: EntityType, created_at| RankRecord {
            subject_id: "s".to_string(),
            image_url: None,
            rank: 1,
            total_count: 1,
            last: 1,
            tags: TagSet::new().with(tags::entity_type(entity_type)),
            created_at,
        };

        store
            .insert_ranks(vec![
                record(EntityType::User, old),
                record(EntityType::User, now),
                record(EntityType::Repository, old),
            ])
            .await
            .unwrap();

        let deleted = store
            .delete_ranks_before(EntityType::User, now)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.rank_records().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining
            .iter()
            .any(|r| r.tags.contains("type:repository") && r.created_at == old));
    }

    #[tokio::test]
    async fn test_entity_locations_page_and_update() {
        let store = MemoryStore::new();
        store
            .insert_entities(
                EntityType::Repository,
                vec![
                    json!({"_id": "b/two", "owner": {"location": "Tokyo"}}),
                    json!({"_id": "a/one", "owner": {"location": "Taipei"}}),
                    json!({"_id": "c/three"}),
                ],
            )
            .await;

        let page = store
            .fetch_entity_locations(EntityType::Repository, None, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "a/one");
        assert_eq!(page[0].location.as_deref(), Some("Taipei"));

        let rest = store
            .fetch_entity_locations(EntityType::Repository, Some("b/two".to_string()), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].location, None);

        store
            .update_resolution(
                EntityType::Repository,
                "a/one",
                &Resolution::city("Taiwan", "Taipei"),
            )
            .await
            .unwrap();
        let docs = store.entities(EntityType::Repository).await;
        let updated = docs.iter().find(|d| d["_id"] == "a/one").unwrap();
        assert_eq!(updated["parsed_location"], "Taiwan");
        assert_eq!(updated["parsed_city"], "Taipei");
    }
}
