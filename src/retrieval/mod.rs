//! Multi-strategy retrieval
//!
//! - [`strategy`] - the [`RetrievalStrategy`] trait and built-in strategies
//! - [`executor`] - batched, deadline-bounded execution with cache fallback
//! - [`error`] - the closed [`RetrievalError`] taxonomy

pub mod error;
pub mod executor;
pub mod strategy;

pub use error::{RetrievalError, RetrievalResult};
pub use executor::{
    ExecutionOptions, ExecutionOutcome, SnapshotCache, StrategyExecutor, ABANDON_GRACE,
    LATEST_SNAPSHOT_KEY,
};
pub use strategy::{
    PerSourceStrategy, PrioritySourceStrategy, RecentStoreStrategy, RetrievalStrategy,
    StrategyContext, StrategyResult,
};
