//! Authoritative snapshot fetcher port.

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConversationId, StructuredSnapshot};

/// Issues the expensive "fetch the authoritative conversation" request.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, conversation_id: &ConversationId) -> DomainResult<StructuredSnapshot>;
}

/// Fetcher used when no authoritative source is configured; every fetch fails,
/// so stabilization runs out and the gate falls back to degraded data.
#[derive(Debug, Clone, Default)]
pub struct NullSnapshotFetcher;

#[async_trait]
impl SnapshotFetcher for NullSnapshotFetcher {
    async fn fetch(&self, conversation_id: &ConversationId) -> DomainResult<StructuredSnapshot> {
        Err(DomainError::fetch_failed(
            conversation_id.as_str(),
            "no authoritative fetcher configured",
        ))
    }
}
