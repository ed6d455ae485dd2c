//! Balanced retrieval orchestration
//!
//! One `get_balanced_items` call walks a fixed sequence of phases under a
//! single deadline:
//!
//! ```text
//! HealthCheck -> Retrieve -> Balance -> Validate -> [TopUp] -> Truncate
//! ```
//!
//! Top-up only runs when validation fails because too few sources are
//! represented. Total retrieval failure yields an empty batch, never an
//! error; callers read that as "temporarily unavailable".

mod report;

pub use report::{
    FailedSource, RefreshReport, RunDiagnostics, RunPhase, SourceHealthReport, TopUpResult,
};

use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::balance::{BalanceOptions, BalancePolicy, DistributionBalancer};
use crate::cache::hash_key;
use crate::catalog::{ItemStore, SourceCatalog, SourceError};
use crate::config::Config;
use crate::diversity::{DiversityReport, DiversityRequirements, DiversityTrend, DiversityValidator};
use crate::error::FeedErrorTrait;
use crate::health::{RecoveryAction, SourceHealthTracker};
use crate::models::{sort_by_recency, Item, Source, SourceState};
use crate::retrieval::{
    ExecutionOptions, PerSourceStrategy, PrioritySourceStrategy, RecentStoreStrategy,
    RetrievalError, RetrievalStrategy, SnapshotCache, StrategyContext, StrategyExecutor,
    LATEST_SNAPSHOT_KEY,
};
use crate::utils::retry::with_retry_if;

/// Diversity reports kept for trend analysis
const HISTORY_LEN: usize = 20;

/// Strategy name recorded on top-up items
pub const TOPUP_STRATEGY: &str = "topup";

/// Per-call overrides; unset fields take the configured values
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub limit: Option<usize>,
    pub max_per_source: Option<usize>,
    pub min_sources: Option<usize>,
    /// Restrict retrieval to these strategy names
    pub strategies: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub policy: BalancePolicy,
    pub priority_sources: Vec<String>,
}

impl GetOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Resolved options for one run
struct RunSettings {
    limit: usize,
    max_per_source: usize,
    min_sources: usize,
    global_timeout: Duration,
}

pub struct Orchestrator {
    config: Config,
    catalog: Arc<dyn SourceCatalog>,
    store: Option<Arc<dyn ItemStore>>,
    health: Arc<SourceHealthTracker>,
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    executor: StrategyExecutor,
    snapshots: Arc<SnapshotCache>,
    balancer: DistributionBalancer,
    validator: DiversityValidator,
    last_run: RwLock<Option<RunDiagnostics>>,
    last_items: RwLock<Vec<Item>>,
    history: RwLock<VecDeque<DiversityReport>>,
}

impl Orchestrator {
    /// Build an orchestrator with the default strategies. The configuration
    /// is validated here and rejected if invalid.
    pub fn new(config: Config, catalog: Arc<dyn SourceCatalog>) -> Result<Self, RetrievalError> {
        config.validate()?;

        let snapshots = Arc::new(SnapshotCache::new(config.cache.capacity, config.cache_ttl()));
        let executor = StrategyExecutor::new(config.retrieval.scoring.clone())
            .with_snapshot_cache(Arc::clone(&snapshots));
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = vec![
            Arc::new(PerSourceStrategy::new().with_timeout(config.strategy_timeout())),
            Arc::new(PrioritySourceStrategy::new(
                config.retrieval.min_sources.saturating_mul(2),
            )),
        ];

        Ok(Self {
            health: Arc::new(SourceHealthTracker::new(config.health.clone())),
            config,
            catalog,
            store: None,
            strategies,
            executor,
            snapshots,
            balancer: DistributionBalancer::new(),
            validator: DiversityValidator::new(),
            last_run: RwLock::new(None),
            last_items: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
        })
    }

    /// Attach an item store; enables the recent-store strategy
    pub fn with_store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.store = Some(store);
        if !self.strategies.iter().any(|s| s.name() == RecentStoreStrategy::NAME) {
            self.strategies.push(Arc::new(RecentStoreStrategy::new(
                self.config.retrieval.recent_window_hours,
            )));
        }
        self
    }

    /// Replace the strategy set
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn RetrievalStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Share a health tracker with other components
    pub fn with_health_tracker(mut self, health: Arc<SourceHealthTracker>) -> Self {
        self.health = health;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    pub fn snapshot_cache(&self) -> &Arc<SnapshotCache> {
        &self.snapshots
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn settings(&self, options: &GetOptions) -> RunSettings {
        let r = &self.config.retrieval;
        RunSettings {
            limit: options.limit.unwrap_or(r.article_limit),
            max_per_source: options.max_per_source.unwrap_or(r.max_per_source).max(1),
            min_sources: options.min_sources.unwrap_or(r.min_sources),
            global_timeout: options.timeout.unwrap_or_else(|| self.config.global_timeout()),
        }
    }

    fn context(&self, limit: usize) -> StrategyContext {
        let ctx = StrategyContext::new(Arc::clone(&self.catalog), Arc::clone(&self.health), limit);
        match &self.store {
            Some(store) => ctx.with_store(Arc::clone(store)),
            None => ctx,
        }
    }

    fn snapshot_key(settings: &RunSettings, options: &GetOptions) -> String {
        hash_key(&[
            "balanced",
            &settings.limit.to_string(),
            &settings.max_per_source.to_string(),
            &settings.min_sources.to_string(),
            &format!("{:?}", options.policy),
        ])
    }

    // ========================================================================
    // Balanced retrieval
    // ========================================================================

    /// Retrieve a balanced, diversity-checked batch, newest first
    pub async fn get_balanced_items(&self, options: &GetOptions) -> Vec<Item> {
        let _timer = crate::metrics::start_request_timer();
        let started = Instant::now();
        let settings = self.settings(options);
        let deadline = started + settings.global_timeout;
        let mut diag = RunDiagnostics::start();

        if settings.limit == 0 {
            self.finish(diag, started, Vec::new(), None).await;
            return Vec::new();
        }

        // Health check
        diag.phases.push(RunPhase::HealthCheck);
        let eligible = self.health_check(deadline, &mut diag).await;

        // Retrieve
        diag.phases.push(RunPhase::Retrieve);
        let strategies: Vec<Arc<dyn RetrievalStrategy>> = match &options.strategies {
            Some(names) => self
                .strategies
                .iter()
                .filter(|s| names.iter().any(|n| n == s.name()))
                .cloned()
                .collect(),
            None => self.strategies.clone(),
        };
        let snapshot_key = Self::snapshot_key(&settings, options);
        let exec_options = ExecutionOptions {
            max_concurrent_strategies: self.config.retrieval.max_concurrent_strategies,
            strategy_timeout: self.config.strategy_timeout(),
            global_timeout: settings.global_timeout,
            deadline: Some(deadline),
            fallback_enabled: self.config.retrieval.fallback_enabled,
            fallback_key: Some(snapshot_key.clone()),
        };
        let ctx = self.context(settings.limit).with_deadline(deadline);
        let outcome = self.executor.execute(&strategies, &ctx, &exec_options).await;

        diag.strategies_attempted = outcome.attempted;
        diag.strategy_used = outcome.strategy_used;
        diag.used_fallback = outcome.used_fallback;
        diag.errors.extend(outcome.errors.iter().map(ToString::to_string));

        if !outcome.success {
            tracing::warn!(
                errors = outcome.errors.len(),
                "No strategy or cached snapshot available, returning empty batch"
            );
            self.finish(diag, started, Vec::new(), None).await;
            return Vec::new();
        }

        let requirements = DiversityRequirements {
            min_sources: settings.min_sources,
            max_per_source: settings.max_per_source,
            ..DiversityRequirements::from_config(&self.config)
        };

        // Balance
        let mut items = if outcome.used_fallback {
            outcome.items
        } else {
            diag.phases.push(RunPhase::Balance);
            self.balancer.balance(
                outcome.items,
                &BalanceOptions {
                    max_per_source: settings.max_per_source,
                    priority_sources: options.priority_sources.clone(),
                    policy: options.policy,
                },
            )
        };

        // Validate
        diag.phases.push(RunPhase::Validate);
        let mut report = self.validator.validate(&items, &requirements);

        // Top-up
        if !outcome.used_fallback
            && !report.is_valid
            && report.distinct_source_count < settings.min_sources
        {
            diag.phases.push(RunPhase::TopUp);
            let budget = self
                .config
                .topup_timeout()
                .min(deadline.saturating_duration_since(Instant::now()));
            let added = self
                .top_up(&ctx, &eligible, &items, &settings, budget, &mut diag)
                .await;
            if !added.is_empty() {
                items.extend(added);
                sort_by_recency(&mut items);
                report = self.validator.validate(&items, &requirements);
            }
        }

        if !report.is_valid {
            tracing::info!(
                issues = ?report.issues,
                score = report.score,
                "Batch returned below diversity thresholds"
            );
        }

        // Truncate
        diag.phases.push(RunPhase::Truncate);
        items.truncate(settings.limit);

        if !outcome.used_fallback && !items.is_empty() {
            self.snapshots.insert(snapshot_key, items.clone());
            self.snapshots
                .insert(LATEST_SNAPSHOT_KEY.to_string(), items.clone());
        }

        let final_report = self.validator.validate(&items, &requirements);
        crate::metrics::update_diversity_score(final_report.score);
        self.finish(diag, started, items.clone(), Some(final_report)).await;
        items
    }

    /// Annotate cataloged sources with health and return the eligible ones
    async fn health_check(&self, deadline: Instant, diag: &mut RunDiagnostics) -> Vec<Source> {
        let sources = match tokio::time::timeout_at(deadline, self.catalog.list()).await {
            Ok(Ok(sources)) => sources,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to list sources");
                diag.errors.push(e.to_string());
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!("Source listing ran past the deadline");
                diag.errors
                    .push("source listing timed out at run deadline".to_string());
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut eligible = Vec::new();
        for mut source in sources {
            self.health.annotate_at(&mut source, now).await;
            match source.state_at(now) {
                SourceState::Eligible => {
                    if self.health.should_retry_at(&source.id, now).await {
                        eligible.push(source);
                    }
                }
                SourceState::Quarantined => diag.quarantined_sources.push(source.id),
                SourceState::Inactive => {}
            }
        }
        diag.eligible_sources = eligible.len();

        tracing::debug!(
            eligible = eligible.len(),
            quarantined = diag.quarantined_sources.len(),
            "Health check complete"
        );
        eligible
    }

    /// Fetch directly from sources missing in `items`, bounded by `budget`
    async fn top_up(
        &self,
        ctx: &StrategyContext,
        eligible: &[Source],
        items: &[Item],
        settings: &RunSettings,
        budget: Duration,
        diag: &mut RunDiagnostics,
    ) -> Vec<Item> {
        let present: HashSet<&str> = items.iter().map(|i| i.source_id.as_str()).collect();
        let needed = settings.min_sources.saturating_sub(present.len());

        let mut missing: Vec<&Source> = eligible
            .iter()
            .filter(|s| !present.contains(s.id.as_str()))
            .collect();
        missing.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.health_score.total_cmp(&a.health_score))
                .then_with(|| a.id.cmp(&b.id))
        });
        missing.truncate(needed);

        if missing.is_empty() || budget.is_zero() {
            tracing::debug!(needed, budget_ms = budget.as_millis() as u64, "Top-up skipped");
            return Vec::new();
        }

        let remaining_slots = settings.limit.saturating_sub(items.len());
        let per_source = remaining_slots
            .div_ceil(missing.len())
            .clamp(1, settings.max_per_source);

        tracing::info!(
            sources = missing.len(),
            per_source,
            budget_ms = budget.as_millis() as u64,
            "Starting top-up recovery"
        );

        // Fetches expire one by one; expired sources are recorded as failed
        let topup_ctx = ctx.clone().with_deadline(Instant::now() + budget);
        let results = futures::future::join_all(
            missing
                .iter()
                .map(|source| topup_ctx.fetch_source(&source.id, per_source, TOPUP_STRATEGY)),
        )
        .await;

        let mut added = Vec::new();
        for (source, result) in missing.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    crate::metrics::record_topup_fetch(true);
                    diag.topup.push(TopUpResult {
                        source_id: source.id.clone(),
                        fetched: fetched.len(),
                        error: None,
                    });
                    added.extend(fetched);
                }
                Err(e) => {
                    crate::metrics::record_topup_fetch(false);
                    diag.errors.push(e.to_string());
                    diag.topup.push(TopUpResult {
                        source_id: source.id.clone(),
                        fetched: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        added
    }

    async fn finish(
        &self,
        mut diag: RunDiagnostics,
        started: Instant,
        items: Vec<Item>,
        report: Option<DiversityReport>,
    ) {
        diag.returned = items.len();
        diag.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(report) = &report {
            let mut history = self.history.write().await;
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(report.clone());
        }
        diag.diversity = report;

        tracing::info!(
            run_id = %diag.run_id,
            returned = diag.returned,
            strategy = diag.strategy_used.as_deref().unwrap_or("none"),
            used_fallback = diag.used_fallback,
            elapsed_ms = diag.elapsed_ms,
            "Balanced retrieval finished"
        );

        *self.last_items.write().await = items;
        *self.last_run.write().await = Some(diag);
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Diagnostics of the most recent `get_balanced_items` call
    pub async fn last_run(&self) -> Option<RunDiagnostics> {
        self.last_run.read().await.clone()
    }

    /// Validate `items`, or the last returned batch when `None`
    pub async fn get_diversity_report(&self, items: Option<&[Item]>) -> DiversityReport {
        let requirements = DiversityRequirements::from_config(&self.config);
        match items {
            Some(items) => self.validator.validate(items, &requirements),
            None => {
                let last = self.last_items.read().await;
                self.validator.validate(&last, &requirements)
            }
        }
    }

    /// Direction of diversity across recent runs
    pub async fn diversity_trend(&self) -> DiversityTrend {
        let history = self.history.read().await;
        let reports: Vec<DiversityReport> = history.iter().cloned().collect();
        DiversityValidator::trend(&reports)
    }

    pub async fn get_source_health_report(&self) -> crate::error::Result<SourceHealthReport> {
        let sources = self.catalog.list().await?;
        let now = Utc::now();

        let mut active = 0;
        let mut quarantined = 0;
        let mut inactive = 0;
        let mut failed_sources = Vec::new();

        for mut source in sources.iter().cloned() {
            self.health.annotate_at(&mut source, now).await;
            let state = source.state_at(now);
            match state {
                SourceState::Inactive => inactive += 1,
                SourceState::Quarantined => {
                    active += 1;
                    quarantined += 1;
                }
                SourceState::Eligible => active += 1,
            }

            let plan = self.health.recovery_plan_at(&source.id, now).await;
            let held = matches!(plan.action, RecoveryAction::Manual | RecoveryAction::Disabled);
            if state == SourceState::Quarantined || held || source.consecutive_failures > 0 {
                let stats = self.health.get_stats_at(&source.id, now).await;
                failed_sources.push(FailedSource {
                    source_id: source.id.clone(),
                    name: source.name.clone(),
                    state,
                    consecutive_failures: source.consecutive_failures,
                    health_score: source.health_score,
                    last_error: stats.last_error.map(|e| e.message),
                    recovery: plan,
                });
            }
        }

        let last = self.get_diversity_report(None).await;
        let mut recommendations = last.recommendations.clone();
        for failed in &failed_sources {
            let advice = match failed.recovery.action {
                RecoveryAction::Manual => {
                    format!("Source '{}' needs a manual release", failed.source_id)
                }
                RecoveryAction::Disabled => format!(
                    "Source '{}' is disabled: {}",
                    failed.source_id, failed.recovery.reason
                ),
                _ => format!(
                    "Check source '{}' ({} consecutive failures)",
                    failed.source_id, failed.consecutive_failures
                ),
            };
            recommendations.push(advice);
        }
        let healthy = active - quarantined;
        if healthy < self.config.retrieval.min_sources {
            recommendations.push(format!(
                "Only {} healthy sources, {} required; add or repair sources",
                healthy, self.config.retrieval.min_sources
            ));
        }

        Ok(SourceHealthReport {
            generated_at: now,
            total_sources: sources.len(),
            active_sources: active,
            quarantined_sources: quarantined,
            inactive_sources: inactive,
            failed_sources,
            per_source_counts: last.source_counts,
            diversity_score: last.score,
            recommendations,
        })
    }

    /// Explicitly release a quarantined or held source
    pub async fn release_source(&self, source_id: &str) -> bool {
        self.health.release(source_id).await
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Fetch the given sources now, retrying transient failures. Held sources
    /// are still attempted; a successful refresh releases every hold, including
    /// a disabled window left by a permanent error.
    pub async fn refresh_sources(&self, source_ids: &[String]) -> RefreshReport {
        let retry = self.config.retry_config();
        let limit = self.config.retrieval.article_limit;
        let ctx = self.context(limit);

        let refreshes = source_ids.iter().map(|id| {
            let retry = &retry;
            let ctx = &ctx;
            async move {
                let result = with_retry_if(
                    retry,
                    || self.catalog.fetch(id, limit),
                    |e: &SourceError| e.is_recoverable(),
                )
                .await;

                match result {
                    Ok(mut items) => {
                        self.health.record_success(id).await;
                        // A good explicit refresh lifts quarantine, manual and disabled holds
                        if self.health.recovery_plan(id).await.action != RecoveryAction::Immediate {
                            self.health.release(id).await;
                        }
                        for item in &mut items {
                            item.source_id = id.clone();
                        }
                        let new_items = ctx.persist(&items).await;
                        Ok((items.len(), new_items))
                    }
                    Err(e) => {
                        self.health.record_error(id, &e).await;
                        Err(format!("{id}: {e}"))
                    }
                }
            }
        });

        let mut report = RefreshReport::default();
        for result in futures::future::join_all(refreshes).await {
            match result {
                Ok((found, new_items)) => {
                    report.refreshed += 1;
                    report.items_found += found;
                    report.new_items += new_items;
                }
                Err(e) => report.errors.push(e),
            }
        }

        tracing::info!(
            requested = source_ids.len(),
            refreshed = report.refreshed,
            items_found = report.items_found,
            failed = report.errors.len(),
            "Source refresh complete"
        );
        report
    }
}
