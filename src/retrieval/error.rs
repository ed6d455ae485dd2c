//! Error types for the retrieval pipeline

use thiserror::Error;

use crate::error::{ErrorCategory, FeedErrorTrait};

/// Result type for retrieval operations
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Closed set of failures the retrieval pipeline can observe.
///
/// None of these abort a `get_balanced_items` call; they are collected for
/// diagnostics while the pipeline degrades to the next strategy or cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// A source failed in a way that may succeed later
    #[error("Source '{source_id}' failed: {message}")]
    TransientSource { source_id: String, message: String },

    /// A strategy returned output that failed its validity check
    #[error("Strategy '{strategy}' rejected: {reason}")]
    StrategyValidation { strategy: String, reason: String },

    /// A strategy returned an error
    #[error("Strategy '{strategy}' failed: {message}")]
    StrategyFailed { strategy: String, message: String },

    /// A strategy did not finish within its own timeout
    #[error("Strategy '{strategy}' timed out after {timeout_ms}ms")]
    StrategyTimeout { strategy: String, timeout_ms: u64 },

    /// The global retrieval budget ran out
    #[error("Global timeout exceeded after {elapsed_ms}ms (budget {budget_ms}ms)")]
    GlobalTimeoutExceeded { elapsed_ms: u64, budget_ms: u64 },

    /// Invalid configuration, fatal at startup
    #[error("Invalid configuration '{field}': {reason}")]
    Configuration { field: String, reason: String },
}

impl RetrievalError {
    pub fn transient_source(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientSource {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub fn validation(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StrategyValidation {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }

    pub fn strategy_failed(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StrategyFailed {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl FeedErrorTrait for RetrievalError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration { .. })
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::TransientSource { .. } => ErrorCategory::Source,
            Self::StrategyValidation { .. } | Self::StrategyFailed { .. } => {
                ErrorCategory::Strategy
            }
            Self::StrategyTimeout { .. } | Self::GlobalTimeoutExceeded { .. } => {
                ErrorCategory::Timeout
            }
            Self::Configuration { .. } => ErrorCategory::Config,
        }
    }
}
