//! Collaborator interfaces consumed by the retrieval core
//!
//! The core never speaks a wire protocol itself. It consumes:
//!
//! - [`SourceCatalog`] - lists sources and fetches items from one source
//! - [`ItemStore`] - persists items keyed by their dedup key
//!
//! In-memory implementations ([`MemoryCatalog`], [`MemoryStore`]) back the
//! CLI simulation and the test suite. [`TransportChain`] adapts an ordered
//! list of fetch transports into a single catalog.

pub mod memory;
pub mod transport;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCategory, FeedErrorTrait};
use crate::models::{Item, Source};

pub use memory::{MemoryCatalog, MemoryStore};
pub use transport::{FetchTransport, TransportChain};

/// Errors reported by a source fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network hiccup, upstream 5xx, rate limit; worth retrying later
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Gone, malformed beyond repair, or rejected; retrying will not help
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The catalog does not know this source
    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

impl SourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl FeedErrorTrait for SourceError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Source
    }
}

/// Catalog of sources plus the per-source fetch primitive
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// All cataloged sources, active or not
    async fn list(&self) -> Result<Vec<Source>, SourceError>;

    /// Fetch up to `limit` items from one source
    async fn fetch(&self, source_id: &str, limit: usize) -> Result<Vec<Item>, SourceError>;
}

/// Item persistence
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an item. Returns `true` if its dedup key was unseen.
    async fn upsert(&self, item: Item) -> anyhow::Result<bool>;

    /// Most recent items, newest first
    async fn recent_items(&self, limit: usize) -> anyhow::Result<Vec<Item>>;
}
