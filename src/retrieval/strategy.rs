//! Retrieval strategies
//!
//! A strategy is one way of assembling a candidate batch from the catalog.
//! Strategies never fail on a single source: per-source errors are recorded
//! with the health tracker and collected on the result.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::{RetrievalError, RetrievalResult};
use crate::catalog::{ItemStore, SourceCatalog, SourceError};
use crate::health::SourceHealthTracker;
use crate::models::{sort_by_recency, Item, Source};

// ============================================================================
// Context and Result
// ============================================================================

/// Shared collaborators handed to every strategy
#[derive(Clone)]
pub struct StrategyContext {
    pub catalog: Arc<dyn SourceCatalog>,
    pub store: Option<Arc<dyn ItemStore>>,
    pub health: Arc<SourceHealthTracker>,
    /// Items requested for the whole batch
    pub limit: usize,
    /// Catalog calls still pending at this instant fail as timed out
    pub deadline: Option<Instant>,
}

impl StrategyContext {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        health: Arc<SourceHealthTracker>,
        limit: usize,
    ) -> Self {
        Self {
            catalog,
            store: None,
            health,
            limit,
            deadline: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bound every catalog call by `deadline`, keeping an earlier one
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .unwrap_or_else(|_| Err(SourceError::transient("timed out at run deadline"))),
            None => call.await,
        }
    }

    /// Active sources the health tracker allows fetching right now
    pub async fn eligible_sources(&self) -> RetrievalResult<Vec<Source>> {
        let sources = self
            .bounded(self.catalog.list())
            .await
            .map_err(|e| RetrievalError::transient_source("catalog", e.to_string()))?;

        let mut eligible = Vec::with_capacity(sources.len());
        for source in sources.into_iter().filter(|s| s.active) {
            if self.health.should_retry(&source.id).await {
                eligible.push(source);
            } else {
                tracing::debug!(source_id = %source.id, "Skipping source held by health tracker");
            }
        }
        Ok(eligible)
    }

    /// Fetch one source, recording the outcome with the health tracker and
    /// persisting what was retrieved
    pub async fn fetch_source(
        &self,
        source_id: &str,
        limit: usize,
        strategy: &str,
    ) -> RetrievalResult<Vec<Item>> {
        match self.bounded(self.catalog.fetch(source_id, limit)).await {
            Ok(mut items) => {
                self.health.record_success(source_id).await;
                for item in &mut items {
                    item.source_id = source_id.to_string();
                    item.strategy = Some(strategy.to_string());
                }
                self.persist(&items).await;
                Ok(items)
            }
            Err(e) => {
                tracing::warn!(source_id = %source_id, strategy = %strategy, error = %e, "Source fetch failed");
                self.health.record_error(source_id, &e).await;
                Err(RetrievalError::transient_source(source_id, e.to_string()))
            }
        }
    }

    /// Upsert items into the store. Returns how many were new.
    pub async fn persist(&self, items: &[Item]) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let mut new_items = 0;
        for item in items {
            match store.upsert(item.clone()).await {
                Ok(true) => new_items += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "Failed to store item");
                }
            }
        }
        new_items
    }

    /// Fetch several sources concurrently, `per_source` items each
    async fn fetch_all(
        &self,
        sources: &[Source],
        per_source: usize,
        strategy: &str,
    ) -> (Vec<Item>, Vec<RetrievalError>) {
        let fetches = sources
            .iter()
            .map(|source| self.fetch_source(&source.id, per_source, strategy));

        let mut items = Vec::new();
        let mut errors = Vec::new();
        for result in futures::future::join_all(fetches).await {
            match result {
                Ok(batch) => items.extend(batch),
                Err(e) => errors.push(e),
            }
        }
        sort_by_recency(&mut items);
        (items, errors)
    }
}

/// Outcome of one strategy run
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyResult {
    pub strategy: String,
    pub items: Vec<Item>,
    pub success: bool,
    pub distinct_sources: usize,
    pub total: usize,
    pub error: Option<RetrievalError>,
    /// Per-source failures absorbed while building the result
    pub source_errors: Vec<RetrievalError>,
}

impl StrategyResult {
    pub fn from_items(strategy: &str, items: Vec<Item>) -> Self {
        let distinct_sources = items
            .iter()
            .map(|i| i.source_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        Self {
            strategy: strategy.to_string(),
            total: items.len(),
            success: !items.is_empty(),
            distinct_sources,
            items,
            error: None,
            source_errors: Vec::new(),
        }
    }

    fn with_source_errors(mut self, errors: Vec<RetrievalError>) -> Self {
        if self.items.is_empty() && !errors.is_empty() {
            self.error = Some(RetrievalError::strategy_failed(
                &self.strategy,
                format!("all {} sources failed", errors.len()),
            ));
        }
        self.source_errors = errors;
        self
    }
}

// ============================================================================
// Strategy Trait
// ============================================================================

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs earlier
    fn priority(&self) -> i32;

    /// Own timeout, `None` to use the executor default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, ctx: &StrategyContext) -> RetrievalResult<StrategyResult>;

    /// A result is accepted only if it covers at least one source and item
    fn is_valid(&self, result: &StrategyResult) -> bool {
        result.distinct_sources >= 1 && result.total >= 1
    }
}

fn per_source_quota(limit: usize, sources: usize) -> usize {
    limit.div_ceil(sources.max(1)).max(1)
}

// ============================================================================
// Built-in Strategies
// ============================================================================

/// Fetch every eligible source concurrently
pub struct PerSourceStrategy {
    priority: i32,
    timeout: Option<Duration>,
}

impl PerSourceStrategy {
    pub const NAME: &'static str = "per-source";

    pub fn new() -> Self {
        Self {
            priority: 100,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for PerSourceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalStrategy for PerSourceStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, ctx: &StrategyContext) -> RetrievalResult<StrategyResult> {
        let sources = ctx.eligible_sources().await?;
        if sources.is_empty() {
            return Err(RetrievalError::strategy_failed(Self::NAME, "no eligible sources"));
        }

        let quota = per_source_quota(ctx.limit, sources.len());
        let (items, errors) = ctx.fetch_all(&sources, quota, Self::NAME).await;
        tracing::debug!(
            strategy = Self::NAME,
            sources = sources.len(),
            per_source = quota,
            items = items.len(),
            failed = errors.len(),
            "Strategy fetched"
        );
        Ok(StrategyResult::from_items(Self::NAME, items).with_source_errors(errors))
    }
}

/// Fetch only the highest-priority eligible sources
pub struct PrioritySourceStrategy {
    top_n: usize,
    priority: i32,
}

impl PrioritySourceStrategy {
    pub const NAME: &'static str = "priority-sources";

    pub fn new(top_n: usize) -> Self {
        Self {
            top_n: top_n.max(1),
            priority: 50,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for PrioritySourceStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, ctx: &StrategyContext) -> RetrievalResult<StrategyResult> {
        let mut sources = ctx.eligible_sources().await?;
        if sources.is_empty() {
            return Err(RetrievalError::strategy_failed(Self::NAME, "no eligible sources"));
        }
        sources.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        sources.truncate(self.top_n);

        let quota = per_source_quota(ctx.limit, sources.len());
        let (items, errors) = ctx.fetch_all(&sources, quota, Self::NAME).await;
        Ok(StrategyResult::from_items(Self::NAME, items).with_source_errors(errors))
    }
}

/// Serve recently stored items without touching the sources
pub struct RecentStoreStrategy {
    window: ChronoDuration,
    priority: i32,
}

impl RecentStoreStrategy {
    pub const NAME: &'static str = "recent-store";

    pub fn new(window_hours: i64) -> Self {
        Self {
            window: ChronoDuration::hours(window_hours),
            priority: 10,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for RecentStoreStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, ctx: &StrategyContext) -> RetrievalResult<StrategyResult> {
        let store = ctx
            .store
            .as_ref()
            .ok_or_else(|| RetrievalError::strategy_failed(Self::NAME, "no item store"))?;

        // Backing-off sources stay servable from the store
        let sources = ctx
            .catalog
            .list()
            .await
            .map_err(|e| RetrievalError::transient_source("catalog", e.to_string()))?;
        let mut eligible = HashSet::new();
        for source in sources.into_iter().filter(|s| s.active) {
            if !ctx.health.is_quarantined(&source.id).await {
                eligible.insert(source.id);
            }
        }

        let cutoff = Utc::now() - self.window;
        let items: Vec<Item> = store
            .recent_items(ctx.limit.saturating_mul(2))
            .await
            .map_err(|e| RetrievalError::strategy_failed(Self::NAME, e.to_string()))?
            .into_iter()
            .filter(|item| item.recency() >= cutoff && eligible.contains(&item.source_id))
            .map(|mut item| {
                item.strategy = Some(Self::NAME.to_string());
                item
            })
            .collect();

        Ok(StrategyResult::from_items(Self::NAME, items))
    }
}
