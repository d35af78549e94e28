//! Shared lease store port.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AttemptId, ClaimOutcome, ConversationId, ProbeLease};

/// Storage shared by every tab watching a conversation.
///
/// Implementations must make `claim` a single compare-and-write against the
/// underlying medium: never read, decide, then write in separate steps.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Install a lease for `owner` if none exists, the existing one is
    /// expired at `now`, or `owner` already holds it (renewal). Otherwise
    /// report the current holder.
    async fn claim(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<ClaimOutcome>;

    /// Clear the lease only if `owner` is still the recorded holder.
    /// Returns whether a lease was removed.
    async fn release(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
    ) -> DomainResult<bool>;

    /// Current non-expired lease, if any.
    async fn current(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<ProbeLease>>;
}
