//! Prometheus metrics for the retrieval core
//!
//! This module provides metrics tracking for:
//! - Strategy execution outcomes and cache fallback
//! - Source quarantines and top-up recovery fetches
//! - Snapshot cache hit/miss counts
//! - End-to-end `get_balanced_items` latency and the last diversity score
//!
//! Recording is a no-op until `init_metrics()` has registered the metrics.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, HistogramTimer, TextEncoder,
};
use std::sync::OnceLock;

struct RetrievalMetrics {
    strategy_executions: CounterVec,
    fallback_used: Counter,
    quarantines: CounterVec,
    cache_lookups: CounterVec,
    topup_fetches: CounterVec,
    request_duration: Histogram,
    diversity_score: Gauge,
}

static RETRIEVAL_METRICS: OnceLock<RetrievalMetrics> = OnceLock::new();

/// Register all metrics with the default registry. Later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if RETRIEVAL_METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = RetrievalMetrics {
        strategy_executions: register_counter_vec!(
            "feedmix_strategy_executions_total",
            "Strategy executions by strategy and outcome",
            &["strategy", "outcome"]
        )?,
        fallback_used: register_counter!(
            "feedmix_fallback_used_total",
            "Times the cached snapshot was served after all strategies failed"
        )?,
        quarantines: register_counter_vec!(
            "feedmix_source_quarantines_total",
            "Quarantines applied per source",
            &["source"]
        )?,
        cache_lookups: register_counter_vec!(
            "feedmix_cache_lookups_total",
            "Cache lookups by result",
            &["result"]
        )?,
        topup_fetches: register_counter_vec!(
            "feedmix_topup_fetches_total",
            "Top-up recovery fetches by outcome",
            &["outcome"]
        )?,
        request_duration: register_histogram!(
            "feedmix_balanced_items_duration_seconds",
            "Duration of get_balanced_items calls in seconds",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        diversity_score: register_gauge!(
            "feedmix_last_diversity_score",
            "Balance index of the most recent validated batch"
        )?,
    };

    if RETRIEVAL_METRICS.set(metrics).is_ok() {
        tracing::info!("Prometheus metrics initialized");
    }
    Ok(())
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one strategy execution (`outcome`: accepted, rejected, failed, timeout)
pub fn record_strategy_execution(strategy: &str, outcome: &str) {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.strategy_executions
            .with_label_values(&[strategy, outcome])
            .inc();
    }
}

pub fn record_fallback_used() {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.fallback_used.inc();
    }
}

pub fn record_quarantine(source_id: &str) {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.quarantines.with_label_values(&[source_id]).inc();
    }
}

pub fn record_cache_lookup(hit: bool) {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.cache_lookups
            .with_label_values(&[if hit { "hit" } else { "miss" }])
            .inc();
    }
}

pub fn record_topup_fetch(success: bool) {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.topup_fetches
            .with_label_values(&[if success { "success" } else { "failure" }])
            .inc();
    }
}

pub fn update_diversity_score(score: f64) {
    if let Some(m) = RETRIEVAL_METRICS.get() {
        m.diversity_score.set(score);
    }
}

/// Time one `get_balanced_items` call; the duration is observed on drop
pub fn start_request_timer() -> Option<HistogramTimer> {
    RETRIEVAL_METRICS
        .get()
        .map(|m| m.request_duration.start_timer())
}

// ============================================================================
// Tests
// ============================================================================
