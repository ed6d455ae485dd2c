//! Common test utilities

use chrono::{Duration, Utc};
use std::sync::Arc;

use feedmix::catalog::MemoryCatalog;
use feedmix::models::{Item, Source};

/// Create `count` items for `source_id`, newest first, one minute apart
pub fn create_items(source_id: &str, count: usize) -> Vec<Item> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            Item::new(
                source_id,
                format!("{source_id}-{i}"),
                format!("{source_id} story {i}"),
                format!("https://{source_id}.example/stories/{i}"),
            )
            .published(now - Duration::minutes(i as i64))
        })
        .collect()
}

/// Create a catalog with the given sources and item counts
#[allow(dead_code)]
pub async fn create_catalog(sources: &[(&str, usize)]) -> Arc<MemoryCatalog> {
    let catalog = Arc::new(MemoryCatalog::new());
    for (id, count) in sources {
        catalog
            .add_source(
                Source::new(*id, format!("Source {id}"), format!("https://{id}.example")),
                create_items(id, *count),
            )
            .await;
    }
    catalog
}

/// Flatten per-source item counts into one batch
#[allow(dead_code)]
pub fn create_batch(counts: &[(&str, usize)]) -> Vec<Item> {
    counts
        .iter()
        .flat_map(|(id, count)| create_items(id, *count))
        .collect()
}
