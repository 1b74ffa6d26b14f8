// ============================================
// Location Annotator (地點標註)
// ============================================
//
// Corpus-update step that runs before ranking: pages through a collection
// by id, resolves each entity's free-text location and stores the canonical
// `parsed_location` / `parsed_city` pair the rank pipelines filter on.

use super::LocationResolver;
use crate::dimensions::DimensionRegistry;
use crate::models::EntityType;
use crate::store::{RankStore, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub scanned: u64,
    pub resolved: u64,
    pub unresolved: u64,
    pub elapsed_ms: u64,
}

pub struct LocationAnnotator {
    store: Arc<dyn RankStore>,
    registry: Arc<DimensionRegistry>,
    batch_size: usize,
}

impl LocationAnnotator {
    pub fn new(store: Arc<dyn RankStore>, registry: Arc<DimensionRegistry>, batch_size: usize) -> Self {
        Self {
            store,
            registry,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn annotate(&self, entity_type: EntityType) -> Result<AnnotationStats> {
        let start = Instant::now();
        let resolver = LocationResolver::new(&self.registry);
        let mut stats = AnnotationStats::default();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .store
                .fetch_entity_locations(entity_type, after.take(), self.batch_size)
                .await?;
            if page.is_empty() {
                break;
            }

            for entity in &page {
                let resolution = entity
                    .location
                    .as_deref()
                    .map(|text| resolver.resolve(text))
                    .unwrap_or_default();

                stats.scanned += 1;
                if resolution.location.is_some() {
                    stats.resolved += 1;
                } else {
                    stats.unresolved += 1;
                }

                self.store
                    .update_resolution(entity_type, &entity.id, &resolution)
                    .await?;
            }

            if page.len() < self.batch_size {
                break;
            }
            after = page.last().map(|entity| entity.id.clone());
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            entity_type = %entity_type,
            scanned = stats.scanned,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            elapsed_ms = stats.elapsed_ms,
            "Location annotation completed"
        );

        Ok(stats)
    }
}
