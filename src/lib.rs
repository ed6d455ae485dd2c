//! feedmix - fault-tolerant, source-balanced feed aggregation
//!
//! Aggregates items from many unreliable sources into a single batch while
//! tolerating partial source failure and keeping any one source from
//! dominating the result.
//!
//! # Architecture
//!
//! - [`cache`] - generic TTL/LRU cache backing the fallback snapshot
//! - [`health`] - per-source failure tracking, quarantine and recovery plans
//! - [`retrieval`] - prioritized strategies run in bounded, deadline-driven batches
//! - [`balance`] - per-source caps and allocation policies
//! - [`diversity`] - Gini, entropy and balance-index validation
//! - [`orchestrator`] - sequences the phases and exposes the reports
//! - [`catalog`] - collaborator traits for source listing, fetching and storage
//! - [`config`] - configuration loading and validation
//! - [`metrics`] - Prometheus metrics, no-ops until initialized
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedmix::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let catalog = Arc::new(MemoryCatalog::new());
//!     let orchestrator = Orchestrator::new(config, catalog)?;
//!
//!     let items = orchestrator.get_balanced_items(&GetOptions::default()).await;
//!     println!("{} items", items.len());
//!     Ok(())
//! }
//! ```

pub mod balance;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod diversity;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::balance::{BalancePolicy, DistributionBalancer};
    pub use crate::catalog::{ItemStore, MemoryCatalog, MemoryStore, SourceCatalog, SourceError};
    pub use crate::config::Config;
    pub use crate::diversity::{DiversityReport, DiversityValidator};
    pub use crate::error::{Error, ErrorCategory, FeedErrorTrait, Result};
    pub use crate::health::SourceHealthTracker;
    pub use crate::models::{Item, Source, SourceState};
    pub use crate::orchestrator::{GetOptions, Orchestrator};
    pub use crate::retrieval::{RetrievalError, RetrievalStrategy};
}

// Direct re-exports for convenience
pub use models::{Item, Source, SourceState};
pub use orchestrator::{GetOptions, Orchestrator};
