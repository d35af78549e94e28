//! Process-local lease store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AttemptId, ClaimOutcome, ConversationId, ProbeLease};
use crate::domain::ports::LeaseStore;

/// Lease store shared by every engine holding a clone of it.
///
/// The map lock makes each claim a single compare-and-write.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    leases: Arc<Mutex<HashMap<ConversationId, ProbeLease>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn claim(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<ClaimOutcome> {
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(conversation_id) {
            if !existing.is_expired(now) && !existing.is_owned_by(owner) {
                return Ok(ClaimOutcome::contended(existing));
            }
        }
        let lease = ProbeLease::new(conversation_id.clone(), owner.clone(), now, ttl);
        let outcome = ClaimOutcome::acquired(&lease);
        leases.insert(conversation_id.clone(), lease);
        Ok(outcome)
    }

    async fn release(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
    ) -> DomainResult<bool> {
        let mut leases = self.leases.lock().await;
        if leases
            .get(conversation_id)
            .is_some_and(|l| l.is_owned_by(owner))
        {
            leases.remove(conversation_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn current(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<ProbeLease>> {
        let leases = self.leases.lock().await;
        Ok(leases
            .get(conversation_id)
            .filter(|l| !l.is_expired(now))
            .cloned())
    }
}
