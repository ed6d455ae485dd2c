//! In-memory catalog and store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ItemStore, SourceCatalog, SourceError};
use crate::models::{sort_by_recency, Item, Source};

/// Scripted behaviour of one in-memory source
#[derive(Debug, Clone, Default)]
struct SourceEntry {
    source: Option<Source>,
    items: Vec<Item>,
    failure: Option<SourceError>,
    delay: Option<Duration>,
    fetch_count: u64,
}

/// Catalog holding sources and their items in memory.
///
/// Failures and latency can be scripted per source, which makes it the
/// backbone of the simulation command and the integration tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<String, SourceEntry>>,
    /// Registration order, so `list` is deterministic
    order: RwLock<Vec<String>>,
    list_delay: RwLock<Option<Duration>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source with the items it will serve
    pub async fn add_source(&self, source: Source, items: Vec<Item>) {
        let id = source.id.clone();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&id) {
            self.order.write().await.push(id.clone());
        }
        let entry = entries.entry(id).or_default();
        entry.source = Some(source);
        entry.items = items;
    }

    /// Make every fetch of `source_id` fail with `error` (or succeed again with `None`)
    pub async fn set_failure(&self, source_id: &str, error: Option<SourceError>) {
        if let Some(entry) = self.entries.write().await.get_mut(source_id) {
            entry.failure = error;
        }
    }

    /// Delay every fetch of `source_id`
    pub async fn set_delay(&self, source_id: &str, delay: Option<Duration>) {
        if let Some(entry) = self.entries.write().await.get_mut(source_id) {
            entry.delay = delay;
        }
    }

    /// Delay every `list` call
    pub async fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.write().await = delay;
    }

    /// Deactivate a source; it stays cataloged
    pub async fn deactivate(&self, source_id: &str) {
        if let Some(source) = self
            .entries
            .write()
            .await
            .get_mut(source_id)
            .and_then(|e| e.source.as_mut())
        {
            source.active = false;
        }
    }

    /// Number of fetch calls made against `source_id`
    pub async fn fetch_count(&self, source_id: &str) -> u64 {
        self.entries
            .read()
            .await
            .get(source_id)
            .map(|e| e.fetch_count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceCatalog for MemoryCatalog {
    async fn list(&self) -> Result<Vec<Source>, SourceError> {
        let delay = *self.list_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let entries = self.entries.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| entries.get(id).and_then(|e| e.source.clone()))
            .collect())
    }

    async fn fetch(&self, source_id: &str, limit: usize) -> Result<Vec<Item>, SourceError> {
        let (delay, failure, mut items) = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(source_id)
                .ok_or_else(|| SourceError::UnknownSource(source_id.to_string()))?;
            entry.fetch_count += 1;
            (entry.delay, entry.failure.clone(), entry.items.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        sort_by_recency(&mut items);
        items.truncate(limit);
        let now = Utc::now();
        for item in &mut items {
            item.source_id = source_id.to_string();
            item.retrieved_at = now;
        }
        Ok(items)
    }
}

/// Item store keyed by dedup key
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert(&self, item: Item) -> anyhow::Result<bool> {
        let key = item.dedup_key();
        let mut items = self.items.write().await;
        if items.contains_key(&key) {
            return Ok(false);
        }
        items.insert(key, item);
        Ok(true)
    }

    async fn recent_items(&self, limit: usize) -> anyhow::Result<Vec<Item>> {
        let mut items: Vec<Item> = self.items.read().await.values().cloned().collect();
        sort_by_recency(&mut items);
        items.truncate(limit);
        Ok(items)
    }
}
