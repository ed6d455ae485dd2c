//! Configuration management for feedmix
//!
//! Configuration is loaded once at startup from a TOML file or `FEEDMIX_*`
//! environment variables and validated before the orchestrator is built.
//! Absent keys take the documented defaults; malformed or out-of-range
//! values are a fatal [`RetrievalError::Configuration`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retrieval::error::RetrievalError;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    pub health: HealthConfig,
    pub diversity: DiversityConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Retrieval and orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of items returned by `get_balanced_items`
    pub article_limit: usize,

    /// Maximum items any single source may contribute
    pub max_per_source: usize,

    /// Minimum number of distinct sources a batch should cover
    pub min_sources: usize,

    /// Per-strategy timeout in milliseconds
    pub strategy_timeout_ms: u64,

    /// Budget for a whole `get_balanced_items` call in milliseconds
    pub global_timeout_ms: u64,

    /// Strategies run concurrently within one batch
    pub max_concurrent_strategies: usize,

    /// Serve the last cached snapshot when every strategy fails
    pub fallback_enabled: bool,

    /// Sub-budget for top-up recovery in milliseconds
    pub topup_timeout_ms: u64,

    /// Retries per source during an explicit refresh
    pub refresh_retries: u32,

    /// Look-back window of the recent-store strategy in hours
    pub recent_window_hours: i64,

    pub scoring: ScoringWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            article_limit: 50,
            max_per_source: 5,
            min_sources: 3,
            strategy_timeout_ms: 5_000,
            global_timeout_ms: 15_000,
            max_concurrent_strategies: 2,
            fallback_enabled: true,
            topup_timeout_ms: 3_000,
            refresh_retries: 1,
            recent_window_hours: 24,
            scoring: ScoringWeights::default(),
        }
    }
}

/// Weights of the strategy result score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub distinct_sources: f64,
    pub item_count: f64,
    pub success: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distinct_sources: 0.5,
            item_count: 0.3,
            success: 0.2,
        }
    }
}

/// Source health and quarantine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that trigger quarantine
    pub max_consecutive_failures: u32,

    /// Error rate above which a source is quarantined
    pub error_rate_threshold: f64,

    /// Errors within the rolling window above which a source is quarantined
    pub max_recent_errors: u32,

    /// Attempts within the window before the error rate can trigger quarantine
    pub min_samples_for_rate: u32,

    /// Rolling window for error accounting in hours
    pub error_window_hours: i64,

    pub quarantine_duration_secs: u64,

    /// How long a disabled source is blocked from retries
    pub disable_duration_secs: u64,

    pub base_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            error_rate_threshold: 0.8,
            max_recent_errors: 10,
            min_samples_for_rate: 5,
            error_window_hours: 24,
            quarantine_duration_secs: 30 * 60,
            disable_duration_secs: 24 * 60 * 60,
            base_retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: 5 * 60 * 1_000,
        }
    }
}

/// Diversity thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub min_diversity_score: f64,
    pub max_imbalance_ratio: f64,
    pub max_coefficient_of_variation: f64,
    pub max_gini: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            min_diversity_score: 0.4,
            max_imbalance_ratio: 5.0,
            max_coefficient_of_variation: 0.8,
            max_gini: 0.6,
        }
    }
}

/// Snapshot cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            capacity: 256,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Parse an environment variable, keeping `default` when it is unset
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            Error::from(RetrievalError::configuration(
                name,
                format!("cannot parse '{raw}'"),
            ))
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from `FEEDMIX_*` environment variables
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let config = Self {
            retrieval: RetrievalConfig {
                article_limit: env_or("FEEDMIX_ARTICLE_LIMIT", d.retrieval.article_limit)?,
                max_per_source: env_or("FEEDMIX_MAX_PER_SOURCE", d.retrieval.max_per_source)?,
                min_sources: env_or("FEEDMIX_MIN_SOURCES", d.retrieval.min_sources)?,
                strategy_timeout_ms: env_or(
                    "FEEDMIX_STRATEGY_TIMEOUT_MS",
                    d.retrieval.strategy_timeout_ms,
                )?,
                global_timeout_ms: env_or(
                    "FEEDMIX_GLOBAL_TIMEOUT_MS",
                    d.retrieval.global_timeout_ms,
                )?,
                max_concurrent_strategies: env_or(
                    "FEEDMIX_MAX_CONCURRENT_STRATEGIES",
                    d.retrieval.max_concurrent_strategies,
                )?,
                fallback_enabled: env_or("FEEDMIX_FALLBACK_ENABLED", d.retrieval.fallback_enabled)?,
                topup_timeout_ms: env_or("FEEDMIX_TOPUP_TIMEOUT_MS", d.retrieval.topup_timeout_ms)?,
                refresh_retries: env_or("FEEDMIX_REFRESH_RETRIES", d.retrieval.refresh_retries)?,
                recent_window_hours: env_or(
                    "FEEDMIX_RECENT_WINDOW_HOURS",
                    d.retrieval.recent_window_hours,
                )?,
                scoring: d.retrieval.scoring.clone(),
            },
            health: HealthConfig {
                max_consecutive_failures: env_or(
                    "FEEDMIX_MAX_CONSECUTIVE_FAILURES",
                    d.health.max_consecutive_failures,
                )?,
                error_rate_threshold: env_or(
                    "FEEDMIX_ERROR_RATE_THRESHOLD",
                    d.health.error_rate_threshold,
                )?,
                quarantine_duration_secs: env_or(
                    "FEEDMIX_QUARANTINE_SECS",
                    d.health.quarantine_duration_secs,
                )?,
                base_retry_delay_ms: env_or(
                    "FEEDMIX_BASE_RETRY_DELAY_MS",
                    d.health.base_retry_delay_ms,
                )?,
                backoff_multiplier: env_or(
                    "FEEDMIX_BACKOFF_MULTIPLIER",
                    d.health.backoff_multiplier,
                )?,
                max_retry_delay_ms: env_or(
                    "FEEDMIX_MAX_RETRY_DELAY_MS",
                    d.health.max_retry_delay_ms,
                )?,
                ..d.health.clone()
            },
            diversity: DiversityConfig {
                min_diversity_score: env_or(
                    "FEEDMIX_MIN_DIVERSITY_SCORE",
                    d.diversity.min_diversity_score,
                )?,
                max_imbalance_ratio: env_or(
                    "FEEDMIX_MAX_IMBALANCE_RATIO",
                    d.diversity.max_imbalance_ratio,
                )?,
                ..d.diversity.clone()
            },
            cache: CacheConfig {
                ttl_secs: env_or("FEEDMIX_CACHE_TTL_SECS", d.cache.ttl_secs)?,
                capacity: env_or("FEEDMIX_CACHE_CAPACITY", d.cache.capacity)?,
            },
            logging: LoggingConfig {
                level: env_or("FEEDMIX_LOG_LEVEL", d.logging.level.clone())?,
                format: env_or("FEEDMIX_LOG_FORMAT", d.logging.format.clone())?,
            },
        };

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), RetrievalError> {
        let r = &self.retrieval;
        let h = &self.health;
        let d = &self.diversity;
        let invalid = |field: &str, reason: &str| -> std::result::Result<(), RetrievalError> {
            Err(RetrievalError::configuration(field, reason))
        };

        if r.article_limit == 0 {
            return invalid("retrieval.article_limit", "must be greater than 0");
        }
        if r.max_per_source == 0 {
            return invalid("retrieval.max_per_source", "must be greater than 0");
        }
        if r.min_sources == 0 {
            return invalid("retrieval.min_sources", "must be greater than 0");
        }
        if r.max_concurrent_strategies == 0 {
            return invalid("retrieval.max_concurrent_strategies", "must be greater than 0");
        }
        if r.strategy_timeout_ms == 0 || r.global_timeout_ms == 0 || r.topup_timeout_ms == 0 {
            return invalid("retrieval.*_timeout_ms", "timeouts must be greater than 0");
        }
        if r.strategy_timeout_ms > r.global_timeout_ms {
            return invalid(
                "retrieval.strategy_timeout_ms",
                "must not exceed global_timeout_ms",
            );
        }
        if r.recent_window_hours <= 0 {
            return invalid("retrieval.recent_window_hours", "must be positive");
        }
        let w = &r.scoring;
        if [w.distinct_sources, w.item_count, w.success]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return invalid("retrieval.scoring", "weights must be finite and non-negative");
        }

        if h.max_consecutive_failures == 0 {
            return invalid("health.max_consecutive_failures", "must be greater than 0");
        }
        if !(0.0..=1.0).contains(&h.error_rate_threshold) {
            return invalid("health.error_rate_threshold", "must be within [0, 1]");
        }
        if h.error_window_hours <= 0 {
            return invalid("health.error_window_hours", "must be positive");
        }
        if h.quarantine_duration_secs == 0 {
            return invalid("health.quarantine_duration_secs", "must be greater than 0");
        }
        if !h.backoff_multiplier.is_finite() || h.backoff_multiplier < 1.0 {
            return invalid("health.backoff_multiplier", "must be at least 1.0");
        }
        if h.base_retry_delay_ms > h.max_retry_delay_ms {
            return invalid(
                "health.base_retry_delay_ms",
                "must not exceed max_retry_delay_ms",
            );
        }

        if !(0.0..=1.0).contains(&d.min_diversity_score) {
            return invalid("diversity.min_diversity_score", "must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&d.max_gini) {
            return invalid("diversity.max_gini", "must be within [0, 1]");
        }
        if !d.max_imbalance_ratio.is_finite() || d.max_imbalance_ratio < 1.0 {
            return invalid("diversity.max_imbalance_ratio", "must be at least 1.0");
        }
        if !d.max_coefficient_of_variation.is_finite() || d.max_coefficient_of_variation < 0.0 {
            return invalid("diversity.max_coefficient_of_variation", "must be non-negative");
        }

        if self.cache.capacity == 0 || self.cache.ttl_secs == 0 {
            return invalid("cache", "capacity and ttl_secs must be greater than 0");
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return invalid("logging.format", "must be 'text' or 'json'");
        }

        Ok(())
    }

    #[must_use]
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.strategy_timeout_ms)
    }

    #[must_use]
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.global_timeout_ms)
    }

    #[must_use]
    pub fn topup_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.topup_timeout_ms)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Backoff parameters as a retry configuration
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retrieval.refresh_retries,
            base_delay_ms: self.health.base_retry_delay_ms,
            max_delay_ms: self.health.max_retry_delay_ms,
            backoff_multiplier: self.health.backoff_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_concurrent_strategies() {
        let mut config = Config::default();
        config.retrieval.max_concurrent_strategies = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_strategies"));
    }

    #[test]
    fn test_strategy_timeout_exceeds_global() {
        let mut config = Config::default();
        config.retrieval.strategy_timeout_ms = config.retrieval.global_timeout_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_ranges() {
        let mut config = Config::default();
        config.diversity.min_diversity_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversion() {
        let config = Config::default();
        assert_eq!(config.global_timeout(), Duration::from_secs(15));
        assert_eq!(config.strategy_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            article_limit = 20

            [health]
            quarantine_duration_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.article_limit, 20);
        assert_eq!(config.retrieval.max_per_source, 5);
        assert_eq!(config.health.quarantine_duration_secs, 60);
        assert_eq!(config.diversity, DiversityConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        let parsed: std::result::Result<Config, _> = toml::from_str(
            r#"
            [retrieval]
            article_limit = "many"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_retry_config_from_health() {
        let config = Config::default();
        let retry = config.retry_config();
        assert_eq!(retry.base_delay_ms, 1_000);
        assert_eq!(retry.max_delay_ms, 300_000);
        assert_eq!(retry.max_retries, 1);
    }
}
