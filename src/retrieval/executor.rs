//! Strategy executor
//!
//! Strategies run in priority order, in concurrent batches of at most
//! `max_concurrent_strategies`. Every strategy in a batch gets
//! `min(own timeout, remaining global budget)` and runs in its own task, so a
//! panicking strategy fails alone. Source fetches inside a strategy stop at
//! the same budget; a strategy that ignores it is aborted after
//! [`ABANDON_GRACE`]. The first batch producing an accepted result ends
//! execution; its best-scoring result wins. When nothing is accepted the last
//! balanced snapshot is served from the cache.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::RetrievalError;
use super::strategy::{RetrievalStrategy, StrategyContext, StrategyResult};
use crate::cache::TtlCache;
use crate::config::ScoringWeights;
use crate::models::Item;

/// Cache of balanced batches used as the fallback
pub type SnapshotCache = TtlCache<String, Vec<Item>>;

/// Key of the most recent balanced snapshot, regardless of query options
pub const LATEST_SNAPSHOT_KEY: &str = "balanced:latest";

/// Extra time a strategy gets past its budget before its task is aborted
pub const ABANDON_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub max_concurrent_strategies: usize,
    pub strategy_timeout: Duration,
    pub global_timeout: Duration,
    /// Absolute end of the caller's budget; `global_timeout` from the start of
    /// `execute` when unset
    pub deadline: Option<Instant>,
    pub fallback_enabled: bool,
    /// Snapshot key tried before [`LATEST_SNAPSHOT_KEY`]
    pub fallback_key: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_strategies: 2,
            strategy_timeout: Duration::from_secs(5),
            global_timeout: Duration::from_secs(15),
            deadline: None,
            fallback_enabled: true,
            fallback_key: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub items: Vec<Item>,
    pub strategy_used: Option<String>,
    pub elapsed: Duration,
    pub errors: Vec<RetrievalError>,
    pub used_fallback: bool,
    /// Strategies started, in execution order
    pub attempted: Vec<String>,
}

pub struct StrategyExecutor {
    weights: ScoringWeights,
    snapshots: Option<Arc<SnapshotCache>>,
}

impl StrategyExecutor {
    pub fn new(weights: ScoringWeights) -> Self {
        Self {
            weights,
            snapshots: None,
        }
    }

    pub fn with_snapshot_cache(mut self, cache: Arc<SnapshotCache>) -> Self {
        self.snapshots = Some(cache);
        self
    }

    pub async fn execute(
        &self,
        strategies: &[Arc<dyn RetrievalStrategy>],
        ctx: &StrategyContext,
        options: &ExecutionOptions,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline = options
            .deadline
            .unwrap_or(started + options.global_timeout);
        let mut outcome = ExecutionOutcome::default();

        let mut ordered: Vec<&Arc<dyn RetrievalStrategy>> = strategies.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.priority()));

        for (batch_no, batch) in ordered
            .chunks(options.max_concurrent_strategies.max(1))
            .enumerate()
        {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcome.errors.push(global_timeout(started, options.global_timeout));
                break;
            }

            tracing::debug!(
                batch = batch_no,
                strategies = ?batch.iter().map(|s| s.name()).collect::<Vec<_>>(),
                remaining_ms = remaining.as_millis() as u64,
                "Running strategy batch"
            );

            outcome
                .attempted
                .extend(batch.iter().map(|s| s.name().to_string()));
            let runs = batch.iter().map(|strategy| {
                let budget = strategy
                    .timeout()
                    .unwrap_or(options.strategy_timeout)
                    .min(remaining);
                let strategy = Arc::clone(strategy);
                let task_strategy = Arc::clone(&strategy);
                let task_ctx = ctx.clone().with_deadline(Instant::now() + budget);
                async move {
                    let mut handle =
                        tokio::spawn(async move { task_strategy.execute(&task_ctx).await });
                    let result = tokio::time::timeout(budget + ABANDON_GRACE, &mut handle).await;
                    if result.is_err() {
                        handle.abort();
                    }
                    (strategy, budget, result)
                }
            });
            let results = futures::future::join_all(runs).await;

            let mut accepted: Vec<(i32, StrategyResult)> = Vec::new();
            for (strategy, budget, result) in results {
                let name = strategy.name();
                match result {
                    Ok(Ok(Ok(result))) if strategy.is_valid(&result) => {
                        crate::metrics::record_strategy_execution(name, "accepted");
                        outcome.errors.extend(result.source_errors.iter().cloned());
                        accepted.push((strategy.priority(), result));
                    }
                    Ok(Ok(Ok(result))) => {
                        crate::metrics::record_strategy_execution(name, "rejected");
                        outcome.errors.extend(result.source_errors.iter().cloned());
                        let reason = match &result.error {
                            Some(e) => e.to_string(),
                            None => format!(
                                "{} items from {} sources",
                                result.total, result.distinct_sources
                            ),
                        };
                        tracing::warn!(strategy = %name, reason = %reason, "Strategy result rejected");
                        outcome.errors.push(RetrievalError::validation(name, reason));
                    }
                    Ok(Ok(Err(e))) => {
                        crate::metrics::record_strategy_execution(name, "failed");
                        tracing::warn!(strategy = %name, error = %e, "Strategy failed");
                        outcome.errors.push(e);
                    }
                    Ok(Err(join_error)) => {
                        crate::metrics::record_strategy_execution(name, "failed");
                        let message = if join_error.is_panic() {
                            "strategy task panicked"
                        } else {
                            "strategy task cancelled"
                        };
                        tracing::error!(strategy = %name, error = %join_error, "Strategy task failed");
                        outcome
                            .errors
                            .push(RetrievalError::strategy_failed(name, message));
                    }
                    Err(_) => {
                        crate::metrics::record_strategy_execution(name, "timeout");
                        tracing::warn!(
                            strategy = %name,
                            timeout_ms = budget.as_millis() as u64,
                            "Strategy timed out"
                        );
                        outcome.errors.push(RetrievalError::StrategyTimeout {
                            strategy: name.to_string(),
                            timeout_ms: budget.as_millis() as u64,
                        });
                    }
                }
            }

            if let Some(best) = self.select_best(accepted) {
                tracing::info!(
                    strategy = %best.strategy,
                    items = best.total,
                    distinct_sources = best.distinct_sources,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Strategy selected"
                );
                outcome.success = true;
                outcome.strategy_used = Some(best.strategy);
                outcome.items = best.items;
                outcome.elapsed = started.elapsed();
                return outcome;
            }
        }

        if Instant::now() >= deadline
            && !outcome
                .errors
                .iter()
                .any(|e| matches!(e, RetrievalError::GlobalTimeoutExceeded { .. }))
        {
            outcome.errors.push(global_timeout(started, options.global_timeout));
        }

        if options.fallback_enabled {
            if let Some(items) = self.fallback_snapshot(options.fallback_key.as_deref()) {
                tracing::warn!(
                    items = items.len(),
                    errors = outcome.errors.len(),
                    "All strategies failed, serving cached snapshot"
                );
                crate::metrics::record_fallback_used();
                outcome.success = true;
                outcome.used_fallback = true;
                outcome.items = items;
            }
        }

        if !outcome.success {
            tracing::warn!(errors = outcome.errors.len(), "Retrieval exhausted all strategies");
        }
        outcome.elapsed = started.elapsed();
        outcome
    }

    fn fallback_snapshot(&self, key: Option<&str>) -> Option<Vec<Item>> {
        let cache = self.snapshots.as_ref()?;
        key.and_then(|k| cache.get(&k.to_string()))
            .or_else(|| cache.get(&LATEST_SNAPSHOT_KEY.to_string()))
            .filter(|items| !items.is_empty())
    }

    /// Pick the highest-scoring result; ties go to the higher priority
    fn select_best(&self, mut accepted: Vec<(i32, StrategyResult)>) -> Option<StrategyResult> {
        let max_sources = accepted.iter().map(|(_, r)| r.distinct_sources).max()?;
        let max_items = accepted.iter().map(|(_, r)| r.total).max()?;

        accepted.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        let mut best: Option<(f64, StrategyResult)> = None;
        for (_, result) in accepted {
            let score = self.score(&result, max_sources, max_items);
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, result));
            }
        }
        best.map(|(_, result)| result)
    }

    /// Weighted score of a result relative to the rest of its batch
    pub fn score(&self, result: &StrategyResult, max_sources: usize, max_items: usize) -> f64 {
        let w = &self.weights;
        let norm = |v: usize, max: usize| if max == 0 { 0.0 } else { v as f64 / max as f64 };
        let success_bonus = match (result.success, result.source_errors.is_empty()) {
            (false, _) => 0.0,
            (true, true) => 1.0,
            (true, false) => 0.5,
        };
        w.distinct_sources * norm(result.distinct_sources, max_sources)
            + w.item_count * norm(result.total, max_items)
            + w.success * success_bonus
    }
}

fn global_timeout(started: Instant, budget: Duration) -> RetrievalError {
    RetrievalError::GlobalTimeoutExceeded {
        elapsed_ms: started.elapsed().as_millis() as u64,
        budget_ms: budget.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::health::SourceHealthTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted strategy returning fixed items after an optional delay
    struct Scripted {
        name: &'static str,
        priority: i32,
        delay: Duration,
        sources: usize,
        per_source: usize,
        fail: bool,
        panics: bool,
        ran: AtomicBool,
    }

    impl Scripted {
        fn new(name: &'static str, priority: i32, sources: usize, per_source: usize) -> Self {
            Self {
                name,
                priority,
                delay: Duration::ZERO,
                sources,
                per_source,
                fail: false,
                panics: false,
                ran: AtomicBool::new(false),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn panicking(mut self) -> Self {
            self.panics = true;
            self
        }
    }

    #[async_trait]
    impl RetrievalStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn execute(&self, _ctx: &StrategyContext) -> crate::retrieval::RetrievalResult<StrategyResult> {
            self.ran.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.panics {
                panic!("{} hit a bug", self.name);
            }
            if self.fail {
                return Err(RetrievalError::strategy_failed(self.name, "boom"));
            }
            let items = (0..self.sources)
                .flat_map(|s| {
                    (0..self.per_source).map(move |i| {
                        Item::new(format!("s{s}"), format!("{s}-{i}"), "t", format!("https://s{s}.example/{i}"))
                    })
                })
                .collect();
            Ok(StrategyResult::from_items(self.name, items))
        }
    }

    fn ctx() -> StrategyContext {
        StrategyContext::new(
            Arc::new(MemoryCatalog::new()),
            Arc::new(SourceHealthTracker::with_defaults()),
            10,
        )
    }

    #[tokio::test]
    async fn test_best_result_in_batch_wins() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("narrow", 10, 1, 8)),
            Arc::new(Scripted::new("wide", 5, 4, 2)),
        ];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy_used.as_deref(), Some("wide"));
        assert!(!outcome.used_fallback);
    }

    #[tokio::test]
    async fn test_tie_goes_to_higher_priority() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("low", 1, 2, 2)),
            Arc::new(Scripted::new("high", 9, 2, 2)),
        ];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert_eq!(outcome.strategy_used.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_first_accepted_batch_stops_execution() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let late = Arc::new(Scripted::new("late", 1, 5, 5));
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("first", 10, 1, 1)),
            late.clone(),
        ];
        let options = ExecutionOptions {
            max_concurrent_strategies: 1,
            ..Default::default()
        };

        let outcome = executor.execute(&strategies, &ctx(), &options).await;
        assert_eq!(outcome.strategy_used.as_deref(), Some("first"));
        assert!(!late.ran.load(Ordering::SeqCst));
        assert_eq!(outcome.attempted, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_failures_move_to_next_batch() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("broken", 10, 0, 0).failing()),
            Arc::new(Scripted::new("empty", 9, 0, 0)),
            Arc::new(Scripted::new("backup", 1, 2, 1)),
        ];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert_eq!(outcome.strategy_used.as_deref(), Some("backup"));
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, RetrievalError::StrategyValidation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_timeout_is_bounded_by_global_budget() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("slow", 10, 3, 3).delayed(Duration::from_secs(60))),
            Arc::new(Scripted::new("never", 1, 3, 3)),
        ];
        let options = ExecutionOptions {
            max_concurrent_strategies: 1,
            strategy_timeout: Duration::from_secs(30),
            global_timeout: Duration::from_secs(2),
            deadline: None,
            fallback_enabled: false,
            fallback_key: None,
        };

        let started = Instant::now();
        let outcome = executor.execute(&strategies, &ctx(), &options).await;
        assert!(!outcome.success);
        assert!(started.elapsed() <= Duration::from_secs(2) + ABANDON_GRACE);
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, RetrievalError::StrategyTimeout { timeout_ms: 2000, .. })));
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, RetrievalError::GlobalTimeoutExceeded { .. })));
    }

    #[tokio::test]
    async fn test_panicking_strategy_fails_alone() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("buggy", 10, 4, 4).panicking()),
            Arc::new(Scripted::new("steady", 5, 2, 2)),
        ];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy_used.as_deref(), Some("steady"));
        assert!(outcome.errors.iter().any(|e| matches!(
            e,
            RetrievalError::StrategyFailed { strategy, message }
                if strategy == "buggy" && message.contains("panicked")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_is_honoured() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(Scripted::new("slow", 10, 3, 3).delayed(Duration::from_secs(60))),
        ];
        // Most of the caller's budget is already spent
        let options = ExecutionOptions {
            deadline: Some(Instant::now() + Duration::from_secs(1)),
            fallback_enabled: false,
            ..Default::default()
        };

        let started = Instant::now();
        let outcome = executor.execute(&strategies, &ctx(), &options).await;
        assert!(!outcome.success);
        assert!(started.elapsed() <= Duration::from_secs(1) + ABANDON_GRACE);
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, RetrievalError::StrategyTimeout { timeout_ms: 1000, .. })));
    }

    #[tokio::test]
    async fn test_fallback_serves_snapshot() {
        let cache = Arc::new(SnapshotCache::new(8, Duration::from_secs(60)));
        let cached: Vec<Item> = (0..5)
            .map(|i| Item::new("cached", i.to_string(), "t", format!("https://c.example/{i}")))
            .collect();
        cache.insert(LATEST_SNAPSHOT_KEY.to_string(), cached.clone());

        let executor = StrategyExecutor::new(ScoringWeights::default()).with_snapshot_cache(cache);
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![Arc::new(Scripted::new("broken", 1, 0, 0).failing())];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert!(outcome.success);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.items, cached);
        assert!(outcome.strategy_used.is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_without_cache() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![Arc::new(Scripted::new("broken", 1, 0, 0).failing())];

        let outcome = executor
            .execute(&strategies, &ctx(), &ExecutionOptions::default())
            .await;
        assert!(!outcome.success);
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_score_weights() {
        let executor = StrategyExecutor::new(ScoringWeights::default());
        let full = StrategyResult::from_items(
            "x",
            vec![Item::new("a", "1", "t", ""), Item::new("b", "2", "t", "")],
        );
        assert!((executor.score(&full, 2, 2) - 1.0).abs() < 1e-9);
        assert!((executor.score(&full, 4, 4) - 0.6).abs() < 1e-9);
    }
}
