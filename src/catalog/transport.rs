//! Ordered transport fallback
//!
//! A [`TransportChain`] exposes a fixed source list as a [`SourceCatalog`] and
//! fetches each source by trying its transports in order until one delivers.

use async_trait::async_trait;
use std::sync::Arc;

use super::{SourceCatalog, SourceError};
use crate::models::{Item, Source};

/// One way of reaching a source (direct HTTP, proxy, mirror, ...)
#[async_trait]
pub trait FetchTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Item>, SourceError>;
}

/// Catalog that fetches through an ordered list of transports
pub struct TransportChain {
    sources: Vec<Source>,
    transports: Vec<Arc<dyn FetchTransport>>,
}

impl TransportChain {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            transports: Vec::new(),
        }
    }

    /// Append a transport; earlier transports are tried first
    pub fn with_transport(mut self, transport: Arc<dyn FetchTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn transport_names(&self) -> Vec<&str> {
        self.transports.iter().map(|t| t.name()).collect()
    }
}

#[async_trait]
impl SourceCatalog for TransportChain {
    async fn list(&self) -> Result<Vec<Source>, SourceError> {
        Ok(self.sources.clone())
    }

    async fn fetch(&self, source_id: &str, limit: usize) -> Result<Vec<Item>, SourceError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| SourceError::UnknownSource(source_id.to_string()))?;

        let mut last_error = SourceError::permanent("no transports configured");
        for transport in &self.transports {
            match transport.fetch(source, limit).await {
                Ok(items) => {
                    tracing::debug!(
                        source_id = %source_id,
                        transport = transport.name(),
                        count = items.len(),
                        "Transport delivered"
                    );
                    return Ok(items);
                }
                Err(e) => {
                    tracing::debug!(
                        source_id = %source_id,
                        transport = transport.name(),
                        error = %e,
                        "Transport failed, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
