//! Cross-tab probe lease coordination.
//!
//! Wraps a [`LeaseStore`] with the engine's lease policy: a fixed TTL, and a
//! retry time just past a contended lease's expiry instead of polling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AttemptId, ClaimOutcome, ConversationId, LeaseConfig, ProbeLease};
use crate::domain::ports::LeaseStore;

/// Claims and releases probe leases on behalf of one engine.
#[derive(Clone)]
pub struct ProbeLeaseCoordinator {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
    retry_grace: Duration,
}

impl std::fmt::Debug for ProbeLeaseCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeLeaseCoordinator")
            .field("ttl", &self.ttl)
            .field("retry_grace", &self.retry_grace)
            .finish_non_exhaustive()
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl ProbeLeaseCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>, config: &LeaseConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            retry_grace: config.retry_grace(),
        }
    }

    pub async fn claim(
        &self,
        conversation_id: &ConversationId,
        attempt_id: &AttemptId,
    ) -> DomainResult<ClaimOutcome> {
        let outcome = self
            .store
            .claim(conversation_id, attempt_id, chrono_duration(self.ttl), Utc::now())
            .await?;
        debug!(
            conversation_id = %conversation_id,
            attempt_id = %attempt_id,
            acquired = outcome.acquired,
            owner = ?outcome.owner_attempt_id,
            "Probe lease claim"
        );
        Ok(outcome)
    }

    /// Release the lease if still held by `attempt_id`. Store failures are
    /// logged; the lease then simply expires.
    pub async fn release(&self, conversation_id: &ConversationId, attempt_id: &AttemptId) -> bool {
        match self.store.release(conversation_id, attempt_id).await {
            Ok(released) => released,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    attempt_id = %attempt_id,
                    error = %e,
                    "Failed to release probe lease; leaving it to expire"
                );
                false
            }
        }
    }

    pub async fn current(
        &self,
        conversation_id: &ConversationId,
    ) -> DomainResult<Option<ProbeLease>> {
        self.store.current(conversation_id, Utc::now()).await
    }

    /// How long a losing claimant waits before trying again: until the
    /// reported expiry plus the grace period.
    pub fn retry_delay(&self, outcome: &ClaimOutcome) -> Duration {
        let until_expiry = outcome
            .expires_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        until_expiry + self.retry_grace
    }
}
