//! Content-enrichment collaborator.
//!
//! An enricher may inject extra context text ahead of the user's message
//! before the envelope is built. It is not part of the reconciliation
//! protocol; the default does nothing.

use async_trait::async_trait;

#[async_trait]
pub trait ContextEnricher: Send + Sync {
    /// Extra context to prepend for this user's message, if any.
    async fn enrich(&self, email: &str, message: &str) -> Option<String>;
}

pub struct NoopEnricher;

#[async_trait]
impl ContextEnricher for NoopEnricher {
    async fn enrich(&self, _email: &str, _message: &str) -> Option<String> {
        None
    }
}
