// ============================================
// PostgreSQL Rank Store
// ============================================
//
// Entities are JSONB documents in `entity_documents(collection, id, doc)`.
// Aggregation stages compile to a chain of CTEs:
//   Match   -> jsonb_path_exists (lax mode walks arrays)
//   Unwind  -> jsonb_array_elements + jsonb_set
//   Project -> jsonb_build_object with a jsonb_path_query sum
//   Group   -> GROUP BY over the key path
//   Sort    -> final ORDER BY (must be the last stage)
// Rows are streamed from a spawned task through a bounded channel.

use super::{Cursor, Document, RankQuery, RankStore, Result, StoreError};
use crate::models::{fields, tags, EntityLocation, EntityType, RankRecord, Resolution, TagSet};
use crate::services::{FieldEq, SortOrder, Stage, SumOf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// 7 bound columns per record, kept well under the 65535 parameter limit
const PG_BATCH_SIZE: usize = 5000;

/// Rows buffered between the query task and the cursor consumer
const CURSOR_BUFFER: usize = 256;

pub struct PgRankStore {
    pool: PgPool,
}

impl PgRankStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to PostgreSQL");
                StoreError::Database(e)
            })?;

        info!(max_connections, "PgRankStore connected");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct RankRecordRow {
    subject_id: String,
    image_url: Option<String>,
    rank: i64,
    total_count: i64,
    last: i64,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
}

impl From<RankRecordRow> for RankRecord {
    fn from(row: RankRecordRow) -> Self {
        Self {
            subject_id: row.subject_id,
            image_url: row.image_url,
            rank: row.rank,
            total_count: row.total_count,
            last: row.last,
            tags: row.tags.into_iter().collect::<TagSet>(),
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl RankStore for PgRankStore {
    async fn count_entities(&self, entity_type: EntityType) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entity_documents WHERE collection = $1")
                .bind(entity_type.collection())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn aggregate(&self, entity_type: EntityType, stages: &[Stage]) -> Result<Cursor> {
        let mut query = compile_pipeline(entity_type.collection(), stages)?;
        debug!(entity_type = %entity_type, sql = query.sql(), "Compiled aggregation");

        let pool = self.pool.clone();
        let (tx, rx) = mpsc::channel::<Result<Document>>(CURSOR_BUFFER);

        tokio::spawn(async move {
            let mut rows = query.build().fetch(&pool);
            while let Some(row) = rows.next().await {
                let item = row
                    .and_then(|row| row.try_get::<Document, _>("doc"))
                    .map_err(StoreError::from);
                let failed = item.is_err();
                // Receiver dropped: the consumer gave up on this cursor
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn insert_ranks(&self, records: Vec<RankRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO rank_records (subject_id, image_url, rank, total_count, "last", tags, created_at) "#,
        );
        qb.push_values(records, |mut row, record| {
            row.push_bind(record.subject_id)
                .push_bind(record.image_url)
                .push_bind(record.rank)
                .push_bind(record.total_count)
                .push_bind(record.last)
                .push_bind(record.tags.to_vec())
                .push_bind(record.created_at);
        });

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_ranks_before(
        &self,
        entity_type: EntityType,
        before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM rank_records WHERE tags @> ARRAY[$1::text] AND created_at < $2",
        )
        .bind(tags::entity_type(entity_type))
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_ranks_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM rank_records WHERE tags @> ARRAY[$1::text] AND created_at = $2",
        )
        .bind(tags::entity_type(entity_type))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_ranks(&self, query: &RankQuery) -> Result<Vec<RankRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"SELECT subject_id, image_url, rank, total_count, "last", tags, created_at
               FROM rank_records WHERE tags = "#,
        );
        qb.push_bind(query.tags.to_vec());
        qb.push(" AND tags @> ARRAY[");
        qb.push_bind(tags::entity_type(query.entity_type));
        qb.push("::text]");
        if let Some(created_at) = query.created_at {
            qb.push(" AND created_at = ");
            qb.push_bind(created_at);
        }
        qb.push(" ORDER BY rank ASC OFFSET ");
        qb.push_bind(query.skip.max(0));
        qb.push(" LIMIT ");
        qb.push_bind(query.limit.max(0));

        let rows = qb
            .build_query_as::<RankRecordRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RankRecord::from).collect())
    }

    async fn fetch_entity_locations(
        &self,
        entity_type: EntityType,
        after_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<EntityLocation>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, doc #>> $2::text[] AS location
            FROM entity_documents
            WHERE collection = $1
              AND ($3::text IS NULL OR id > $3)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(entity_type.collection())
        .bind(path_array(entity_type.location_source()))
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, location)| EntityLocation { id, location })
            .collect())
    }

    async fn update_resolution(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: &Resolution,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE entity_documents
            SET doc = doc || jsonb_build_object($3::text, $4::text, $5::text, $6::text)
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(entity_type.collection())
        .bind(id)
        .bind(fields::PARSED_LOCATION)
        .bind(resolution.location.as_deref())
        .bind(fields::PARSED_CITY)
        .bind(resolution.city.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn batch_size(&self) -> usize {
        PG_BATCH_SIZE
    }
}

/// Compile a stage list into one SQL statement over `collection`
pub(crate) fn compile_pipeline(
    collection: &str,
    stages: &[Stage],
) -> Result<QueryBuilder<'static, Postgres>> {
    let (body, sort) = match stages.split_last() {
        Some((Stage::Sort { field, order }, rest)) => (rest, Some((field.clone(), *order))),
        _ => (stages, None),
    };
    let mut qb = QueryBuilder::<Postgres>::new(
        "WITH s0 AS (SELECT doc FROM entity_documents WHERE collection = ",
    );
    qb.push_bind(collection.to_string());
    qb.push(")");

    for (i, stage) in body.iter().enumerate() {
        let prev = format!("s{}", i);
        qb.push(format!(", s{} AS (", i + 1));
        match stage {
            Stage::Match(predicates) => push_match(&mut qb, &prev, predicates),
            Stage::Unwind { path } => push_unwind(&mut qb, &prev, path),
            Stage::Project { keep, total } => push_project(&mut qb, &prev, keep, total),
            Stage::Group { key, total, carry } => push_group(&mut qb, &prev, key, total, carry),
            Stage::Sort { .. } => {
                return Err(StoreError::UnsupportedPipeline(
                    "sort is only supported as the final stage".to_string(),
                ))
            }
        }
        qb.push(")");
    }

    qb.push(format!(" SELECT doc FROM s{}", body.len()));

    if let Some((field, order)) = sort {
        qb.push(" ORDER BY (doc #>> ");
        qb.push_bind(path_array(&field));
        qb.push("::text[])::numeric ");
        qb.push(match order {
            SortOrder::Descending => "DESC NULLS LAST",
            SortOrder::Ascending => "ASC NULLS FIRST",
        });
    }

    Ok(qb)
}

fn push_match(qb: &mut QueryBuilder<'static, Postgres>, prev: &str, predicates: &[FieldEq]) {
    qb.push(format!("SELECT doc FROM {} WHERE TRUE", prev));
    for predicate in predicates {
        qb.push(" AND jsonb_path_exists(doc, ");
        qb.push_bind(format!("{} ? (@ == $v)", json_path(&predicate.path)));
        qb.push("::jsonpath, ");
        qb.push_bind(json!({ "v": predicate.value }));
        qb.push(")");
    }
}

fn push_unwind(qb: &mut QueryBuilder<'static, Postgres>, prev: &str, path: &str) {
    qb.push("SELECT jsonb_set(doc, ");
    qb.push_bind(path_array(path));
    qb.push(format!(
        "::text[], elem) AS doc FROM {} CROSS JOIN LATERAL jsonb_array_elements(\
         CASE WHEN jsonb_typeof(doc #> ",
        prev
    ));
    qb.push_bind(path_array(path));
    qb.push("::text[]) = 'array' THEN doc #> ");
    qb.push_bind(path_array(path));
    qb.push("::text[] ELSE '[]'::jsonb END) AS elem");
}

fn push_project(
    qb: &mut QueryBuilder<'static, Postgres>,
    prev: &str,
    keep: &[String],
    total: &SumOf,
) {
    qb.push("SELECT jsonb_build_object(");
    for path in keep {
        qb.push_bind(path.clone());
        qb.push("::text, doc #> ");
        qb.push_bind(path_array(path));
        qb.push("::text[], ");
    }
    qb.push_bind(total.output.clone());
    qb.push("::text, ");
    push_sum(qb, "doc", &total.path);
    qb.push(format!(") AS doc FROM {}", prev));
}

fn push_group(
    qb: &mut QueryBuilder<'static, Postgres>,
    prev: &str,
    key: &str,
    total: &SumOf,
    carry: &[String],
) {
    qb.push("SELECT jsonb_build_object(");
    qb.push_bind(fields::ID.to_string());
    qb.push("::text, g.key, ");
    qb.push_bind(total.output.clone());
    qb.push("::text, SUM(g.total)::bigint");
    for path in carry {
        qb.push(", ");
        qb.push_bind(path.clone());
        qb.push("::text, (array_agg(g.doc #> ");
        qb.push_bind(path_array(path));
        qb.push("::text[]))[1]");
    }
    qb.push(") AS doc FROM (SELECT doc #> ");
    qb.push_bind(path_array(key));
    qb.push("::text[] AS key, doc, ");
    push_sum(qb, &format!("{}.doc", prev), &total.path);
    qb.push(format!(" AS total FROM {}) AS g GROUP BY g.key", prev));
}

/// Scalar subquery summing every number reachable through `path`
fn push_sum(qb: &mut QueryBuilder<'static, Postgres>, doc: &str, path: &str) {
    qb.push(format!(
        "(SELECT COALESCE(SUM((v #>> '{{}}')::numeric), 0)::bigint FROM jsonb_path_query({}, ",
        doc
    ));
    qb.push_bind(json_path(path));
    qb.push("::jsonpath) AS v WHERE jsonb_typeof(v) = 'number')");
}

/// `a.b` -> `{a,b}` as a text[] bind value
fn path_array(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// `a.b` -> `$."a"."b"`
fn json_path(path: &str) -> String {
    path.split('.').fold(String::from("$"), |mut acc, segment| {
        let escaped = segment.replace('\\', "\\\\").replace('"', "\\\"");
        acc.push_str(&format!(".\"{}\"", escaped));
        acc
    })
}
