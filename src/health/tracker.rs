//! Per-source health tracking and quarantine
//!
//! Every method has a `*_at` variant taking the current time explicitly so
//! that quarantine expiry and rolling windows can be driven by tests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

use super::recovery::{RecoveryAction, RecoveryPlan};
use crate::catalog::SourceError;
use crate::config::HealthConfig;
use crate::models::Source;
use crate::utils::retry::RetryConfig;

// ============================================================================
// Records
// ============================================================================

/// One logged source error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub message: String,
    pub permanent: bool,
}

/// Derived health statistics for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub source_id: String,
    pub total_errors: u64,
    pub total_successes: u64,
    /// Errors inside the rolling window
    pub recent_errors: u32,
    /// Successes inside the rolling window
    pub recent_successes: u32,
    /// Failures since the last recorded success
    pub consecutive_failures: u32,
    /// recent errors / recent attempts
    pub error_rate: f64,
    pub health_score: f64,
    pub last_error: Option<ErrorRecord>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// An active quarantine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub source_id: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub release_at: DateTime<Utc>,
    /// Whether the source may be retried once released automatically
    pub retry_eligible: bool,
}

impl QuarantineEntry {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.release_at
    }
}

#[derive(Debug, Default)]
struct SourceRecord {
    errors: VecDeque<ErrorRecord>,
    successes: VecDeque<DateTime<Utc>>,
    total_errors: u64,
    total_successes: u64,
    consecutive_failures: u32,
    last_error: Option<ErrorRecord>,
    last_success_at: Option<DateTime<Utc>>,
    disabled_until: Option<DateTime<Utc>>,
}

impl SourceRecord {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.errors.front().is_some_and(|e| e.at < cutoff) {
            self.errors.pop_front();
        }
        while self.successes.front().is_some_and(|at| *at < cutoff) {
            self.successes.pop_front();
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Tracks failures per source, quarantines unhealthy sources and plans recovery
pub struct SourceHealthTracker {
    config: HealthConfig,
    backoff: RetryConfig,
    records: RwLock<HashMap<String, SourceRecord>>,
    quarantined: RwLock<HashMap<String, QuarantineEntry>>,
}

impl SourceHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        let backoff = RetryConfig {
            max_retries: config.max_consecutive_failures,
            base_delay_ms: config.base_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
        };
        Self {
            config,
            backoff,
            records: RwLock::new(HashMap::new()),
            quarantined: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HealthConfig::default())
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::hours(self.config.error_window_hours)
    }

    fn quarantine_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.config.quarantine_duration_secs as i64)
    }

    fn compute_stats(&self, source_id: &str, record: &SourceRecord) -> HealthStats {
        let recent_errors = record.errors.len() as u32;
        let recent_successes = record.successes.len() as u32;
        let attempts = recent_errors + recent_successes;
        let error_rate = if attempts == 0 {
            0.0
        } else {
            recent_errors as f64 / attempts as f64
        };

        let failure_ratio = (record.consecutive_failures as f64
            / self.config.max_consecutive_failures as f64)
            .min(1.0);
        let recent_ratio =
            (recent_errors as f64 / self.config.max_recent_errors.max(1) as f64).min(1.0);
        let health_score = (1.0 - 0.5 * error_rate - 0.3 * failure_ratio - 0.2 * recent_ratio)
            .clamp(0.0, 1.0);

        HealthStats {
            source_id: source_id.to_string(),
            total_errors: record.total_errors,
            total_successes: record.total_successes,
            recent_errors,
            recent_successes,
            consecutive_failures: record.consecutive_failures,
            error_rate,
            health_score,
            last_error: record.last_error.clone(),
            last_success_at: record.last_success_at,
        }
    }

    /// Reason to quarantine, if any threshold is crossed
    fn quarantine_reason(&self, stats: &HealthStats) -> Option<String> {
        let c = &self.config;
        if stats.consecutive_failures >= c.max_consecutive_failures {
            Some(format!(
                "{} consecutive failures (max {})",
                stats.consecutive_failures, c.max_consecutive_failures
            ))
        } else if stats.recent_errors + stats.recent_successes >= c.min_samples_for_rate
            && stats.error_rate > c.error_rate_threshold
        {
            Some(format!(
                "error rate {:.2} above threshold {:.2}",
                stats.error_rate, c.error_rate_threshold
            ))
        } else if stats.recent_errors > c.max_recent_errors {
            Some(format!(
                "{} errors in the last {}h (max {})",
                stats.recent_errors, c.error_window_hours, c.max_recent_errors
            ))
        } else {
            None
        }
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Record a failed fetch. Returns the quarantine entry if this error triggered one.
    pub async fn record_error(&self, source_id: &str, error: &SourceError) -> Option<QuarantineEntry> {
        self.record_error_at(source_id, error, Utc::now()).await
    }

    pub async fn record_error_at(
        &self,
        source_id: &str,
        error: &SourceError,
        now: DateTime<Utc>,
    ) -> Option<QuarantineEntry> {
        let (stats, disabled) = {
            let mut records = self.records.write().await;
            let record = records.entry(source_id.to_string()).or_default();
            let entry = ErrorRecord {
                at: now,
                message: error.to_string(),
                permanent: error.is_permanent(),
            };
            record.errors.push_back(entry.clone());
            record.total_errors += 1;
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_error = Some(entry);
            record.prune(now - self.window());

            let stats = self.compute_stats(source_id, record);
            let disable = error.is_permanent()
                || stats.recent_errors >= self.config.max_recent_errors.saturating_mul(3);
            if disable {
                record.disabled_until =
                    Some(now + ChronoDuration::seconds(self.config.disable_duration_secs as i64));
            }
            (stats, disable)
        };

        tracing::debug!(
            source_id = %source_id,
            consecutive_failures = stats.consecutive_failures,
            error_rate = stats.error_rate,
            health_score = stats.health_score,
            error = %error,
            "Recorded source error"
        );

        let reason = if disabled {
            Some(format!("disabled after: {error}"))
        } else {
            self.quarantine_reason(&stats)
        };

        match reason {
            Some(reason) => Some(self.quarantine_at(source_id, &reason, now).await),
            None => None,
        }
    }

    /// Record a successful fetch; resets the consecutive failure count
    pub async fn record_success(&self, source_id: &str) {
        self.record_success_at(source_id, Utc::now()).await;
    }

    pub async fn record_success_at(&self, source_id: &str, now: DateTime<Utc>) {
        let mut records = self.records.write().await;
        let record = records.entry(source_id.to_string()).or_default();
        record.successes.push_back(now);
        record.total_successes += 1;
        record.consecutive_failures = 0;
        record.last_success_at = Some(now);
        record.prune(now - self.window());
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Health statistics, or a pristine record for an unseen source
    pub async fn get_stats(&self, source_id: &str) -> HealthStats {
        self.get_stats_at(source_id, Utc::now()).await
    }

    pub async fn get_stats_at(&self, source_id: &str, now: DateTime<Utc>) -> HealthStats {
        let mut records = self.records.write().await;
        match records.get_mut(source_id) {
            Some(record) => {
                record.prune(now - self.window());
                self.compute_stats(source_id, record)
            }
            None => self.compute_stats(source_id, &SourceRecord::default()),
        }
    }

    /// Logged errors inside the rolling window, oldest first
    pub async fn error_log(&self, source_id: &str) -> Vec<ErrorRecord> {
        self.records
            .read()
            .await
            .get(source_id)
            .map(|r| r.errors.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the source is quarantined. Expired entries are released here.
    pub async fn is_quarantined(&self, source_id: &str) -> bool {
        self.is_quarantined_at(source_id, Utc::now()).await
    }

    pub async fn is_quarantined_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        {
            let quarantined = self.quarantined.read().await;
            match quarantined.get(source_id) {
                None => return false,
                Some(entry) if entry.is_active_at(now) => return true,
                Some(_) => {}
            }
        }

        let mut quarantined = self.quarantined.write().await;
        if quarantined
            .get(source_id)
            .is_some_and(|e| !e.is_active_at(now))
        {
            quarantined.remove(source_id);
            tracing::info!(source_id = %source_id, "Quarantine expired, source released");
        }
        false
    }

    /// Active quarantine entry, if any
    pub async fn quarantine_entry_at(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> Option<QuarantineEntry> {
        if self.is_quarantined_at(source_id, now).await {
            self.quarantined.read().await.get(source_id).cloned()
        } else {
            None
        }
    }

    /// Quarantine a source. Repeated calls replace the single active entry.
    pub async fn quarantine(&self, source_id: &str, reason: &str) -> QuarantineEntry {
        self.quarantine_at(source_id, reason, Utc::now()).await
    }

    pub async fn quarantine_at(
        &self,
        source_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QuarantineEntry {
        let retry_eligible = {
            let records = self.records.read().await;
            records.get(source_id).map_or(true, |r| {
                r.disabled_until.map_or(true, |until| until <= now)
                    && r.consecutive_failures < self.manual_threshold()
            })
        };

        let entry = QuarantineEntry {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
            started_at: now,
            release_at: now + self.quarantine_duration(),
            retry_eligible,
        };

        let previous = self
            .quarantined
            .write()
            .await
            .insert(source_id.to_string(), entry.clone());

        if previous.is_none() {
            tracing::warn!(
                source_id = %source_id,
                reason = %reason,
                release_at = %entry.release_at,
                "Source quarantined"
            );
            crate::metrics::record_quarantine(source_id);
        } else {
            tracing::debug!(source_id = %source_id, reason = %reason, "Quarantine refreshed");
        }

        entry
    }

    /// Explicitly release a source, clearing its failure streak and any manual hold.
    /// Returns whether a quarantine entry was removed.
    pub async fn release(&self, source_id: &str) -> bool {
        let removed = self.quarantined.write().await.remove(source_id).is_some();
        if let Some(record) = self.records.write().await.get_mut(source_id) {
            record.consecutive_failures = 0;
            record.disabled_until = None;
        }
        tracing::info!(source_id = %source_id, was_quarantined = removed, "Source released");
        removed
    }

    /// Consecutive failures at which automatic recovery stops
    fn manual_threshold(&self) -> u32 {
        self.config.max_consecutive_failures.saturating_mul(2)
    }

    /// Backoff delay for the next attempt
    pub async fn retry_delay(&self, source_id: &str) -> Duration {
        let failures = self
            .records
            .read()
            .await
            .get(source_id)
            .map_or(0, |r| r.consecutive_failures);
        self.backoff.delay_for(failures)
    }

    /// Whether the source may be fetched now
    pub async fn should_retry(&self, source_id: &str) -> bool {
        self.should_retry_at(source_id, Utc::now()).await
    }

    pub async fn should_retry_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        matches!(
            self.recovery_plan_at(source_id, now).await.action,
            RecoveryAction::Immediate
        )
    }

    /// Classify how and when the source can come back
    pub async fn recovery_plan(&self, source_id: &str) -> RecoveryPlan {
        self.recovery_plan_at(source_id, Utc::now()).await
    }

    pub async fn recovery_plan_at(&self, source_id: &str, now: DateTime<Utc>) -> RecoveryPlan {
        let quarantine = self.quarantine_entry_at(source_id, now).await;
        let delay = self.retry_delay(source_id).await;

        let records = self.records.read().await;
        let Some(record) = records.get(source_id) else {
            return RecoveryPlan::immediate(source_id);
        };

        if let Some(until) = record.disabled_until.filter(|until| *until > now) {
            return RecoveryPlan {
                source_id: source_id.to_string(),
                action: RecoveryAction::Disabled,
                retry_after: Some(until),
                reason: record
                    .last_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "disabled".to_string()),
            };
        }

        if record.consecutive_failures >= self.manual_threshold() {
            return RecoveryPlan {
                source_id: source_id.to_string(),
                action: RecoveryAction::Manual,
                retry_after: None,
                reason: format!(
                    "{} consecutive failures, explicit release required",
                    record.consecutive_failures
                ),
            };
        }

        if let Some(entry) = quarantine {
            return RecoveryPlan {
                source_id: source_id.to_string(),
                action: RecoveryAction::Delayed,
                retry_after: Some(entry.release_at),
                reason: entry.reason,
            };
        }

        if record.consecutive_failures > 0 {
            if let Some(last) = &record.last_error {
                let retry_after = last.at
                    + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
                if retry_after > now {
                    return RecoveryPlan {
                        source_id: source_id.to_string(),
                        action: RecoveryAction::Delayed,
                        retry_after: Some(retry_after),
                        reason: format!(
                            "backing off after {} failures",
                            record.consecutive_failures
                        ),
                    };
                }
            }
        }

        RecoveryPlan::immediate(source_id)
    }

    /// Sources with an active quarantine
    pub async fn quarantined_sources_at(&self, now: DateTime<Utc>) -> Vec<QuarantineEntry> {
        let ids: Vec<String> = self.quarantined.read().await.keys().cloned().collect();
        let mut active = Vec::new();
        for id in ids {
            if let Some(entry) = self.quarantine_entry_at(&id, now).await {
                active.push(entry);
            }
        }
        active.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        active
    }

    /// Overlay tracked health onto a cataloged source
    pub async fn annotate_at(&self, source: &mut Source, now: DateTime<Utc>) {
        let stats = self.get_stats_at(&source.id, now).await;
        source.health_score = stats.health_score;
        source.consecutive_failures = stats.consecutive_failures;
        source.quarantined_until = self
            .quarantine_entry_at(&source.id, now)
            .await
            .map(|e| e.release_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> SourceError {
        SourceError::transient("503 Service Unavailable")
    }

    #[tokio::test]
    async fn test_unseen_source_is_healthy() {
        let tracker = SourceHealthTracker::with_defaults();
        let stats = tracker.get_stats("fresh").await;
        assert_eq!(stats.health_score, 1.0);
        assert_eq!(stats.error_rate, 0.0);
        assert!(!tracker.is_quarantined("fresh").await);
        assert!(tracker.should_retry("fresh").await);
    }

    #[tokio::test]
    async fn test_health_score_formula() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        tracker.record_success_at("a", now).await;
        tracker.record_error_at("a", &transient(), now).await;

        // rate 0.5, 1/5 consecutive, 1/10 recent
        let stats = tracker.get_stats_at("a", now).await;
        let expected = 1.0 - 0.5 * 0.5 - 0.3 * 0.2 - 0.2 * 0.1;
        assert!((stats.health_score - expected).abs() < 1e-9);
        assert_eq!(stats.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        for _ in 0..3 {
            tracker.record_error_at("a", &transient(), now).await;
        }
        tracker.record_success_at("a", now).await;

        let stats = tracker.get_stats_at("a", now).await;
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.total_successes, 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_trigger_quarantine() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();

        for i in 0..4 {
            let triggered = tracker.record_error_at("a", &transient(), now).await;
            assert!(triggered.is_none(), "quarantined too early at error {i}");
        }
        let entry = tracker
            .record_error_at("a", &transient(), now)
            .await
            .expect("fifth failure quarantines");

        assert!(entry.reason.contains("consecutive"));
        assert_eq!(entry.release_at, now + ChronoDuration::minutes(30));
        assert!(tracker.is_quarantined_at("a", now).await);
    }

    #[tokio::test]
    async fn test_quarantine_expires_lazily() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        tracker.quarantine_at("a", "manual check", now).await;

        assert!(tracker
            .is_quarantined_at("a", now + ChronoDuration::minutes(29))
            .await);
        assert!(!tracker
            .is_quarantined_at("a", now + ChronoDuration::minutes(30))
            .await);
        assert!(tracker
            .quarantined_sources_at(now + ChronoDuration::minutes(31))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_quarantine_is_idempotent() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        tracker.quarantine_at("a", "first", now).await;
        let later = now + ChronoDuration::minutes(1);
        tracker.quarantine_at("a", "second", later).await;

        let active = tracker.quarantined_sources_at(later).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].reason, "second");
        assert_eq!(active[0].started_at, later);
    }

    #[tokio::test]
    async fn test_error_rate_needs_samples() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();

        // One error out of one attempt is a 100% rate but too few samples
        assert!(tracker.record_error_at("a", &transient(), now).await.is_none());

        // 1 success + 4 failures: rate 0.8 is not above 0.8
        let tracker = SourceHealthTracker::with_defaults();
        tracker.record_success_at("b", now).await;
        for _ in 0..4 {
            assert!(tracker.record_error_at("b", &transient(), now).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_error_rate_triggers_quarantine() {
        let config = HealthConfig {
            max_consecutive_failures: 100,
            ..Default::default()
        };
        let tracker = SourceHealthTracker::new(config);
        let now = Utc::now();

        tracker.record_success_at("a", now).await;
        let mut triggered = None;
        for _ in 0..5 {
            triggered = tracker.record_error_at("a", &transient(), now).await;
        }
        // 5 errors / 6 attempts = 0.83
        let entry = triggered.expect("error rate above threshold");
        assert!(entry.reason.contains("error rate"));
    }

    #[tokio::test]
    async fn test_rolling_window_prunes_old_errors() {
        let tracker = SourceHealthTracker::with_defaults();
        let old = Utc::now() - ChronoDuration::hours(30);
        tracker.record_error_at("a", &transient(), old).await;
        tracker.record_success_at("a", old).await;

        let stats = tracker.get_stats("a").await;
        assert_eq!(stats.recent_errors, 0);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_retry_delay_backoff() {
        let config = HealthConfig {
            base_retry_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: 1_000,
            ..Default::default()
        };
        let tracker = SourceHealthTracker::new(config);
        let now = Utc::now();

        assert_eq!(tracker.retry_delay("a").await, Duration::from_millis(100));
        tracker.record_error_at("a", &transient(), now).await;
        tracker.record_error_at("a", &transient(), now).await;
        assert_eq!(tracker.retry_delay("a").await, Duration::from_millis(400));
        for _ in 0..3 {
            tracker.record_error_at("a", &transient(), now).await;
        }
        assert_eq!(tracker.retry_delay("a").await, Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_recovery_plan_delayed_then_immediate() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        tracker.record_error_at("a", &transient(), now).await;

        let plan = tracker.recovery_plan_at("a", now).await;
        assert_eq!(plan.action, RecoveryAction::Delayed);
        assert!(!tracker.should_retry_at("a", now).await);

        // 1s * 2^1 backoff has passed
        let later = now + ChronoDuration::seconds(3);
        assert_eq!(
            tracker.recovery_plan_at("a", later).await.action,
            RecoveryAction::Immediate
        );
    }

    #[tokio::test]
    async fn test_permanent_error_disables_source() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        let entry = tracker
            .record_error_at("a", &SourceError::permanent("410 Gone"), now)
            .await
            .expect("permanent error quarantines");
        assert!(!entry.retry_eligible);

        let plan = tracker.recovery_plan_at("a", now + ChronoDuration::hours(1)).await;
        assert_eq!(plan.action, RecoveryAction::Disabled);
        assert_eq!(plan.retry_after, Some(now + ChronoDuration::hours(24)));
        assert!(!tracker.should_retry_at("a", now + ChronoDuration::hours(23)).await);
        assert!(tracker.should_retry_at("a", now + ChronoDuration::hours(25)).await);
    }

    #[tokio::test]
    async fn test_manual_hold_requires_release() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        for _ in 0..10 {
            tracker.record_error_at("a", &transient(), now).await;
        }

        let much_later = now + ChronoDuration::hours(2);
        assert!(!tracker.is_quarantined_at("a", much_later).await);
        assert_eq!(
            tracker.recovery_plan_at("a", much_later).await.action,
            RecoveryAction::Manual
        );
        assert!(!tracker.should_retry_at("a", much_later).await);

        tracker.release("a").await;
        assert!(tracker.should_retry_at("a", much_later).await);
    }

    #[tokio::test]
    async fn test_annotate_source() {
        let tracker = SourceHealthTracker::with_defaults();
        let now = Utc::now();
        tracker.quarantine_at("a", "test", now).await;

        let mut source = Source::new("a", "A", "https://a.example");
        tracker.annotate_at(&mut source, now).await;
        assert_eq!(source.quarantined_until, Some(now + ChronoDuration::minutes(30)));
        assert_eq!(source.state_at(now), crate::models::SourceState::Quarantined);
    }
}
