//! Probe lease model.
//!
//! A lease grants one attempt the right to run the authoritative fetch for a
//! conversation until `expires_at`. Expiry is advisory and clock-based.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptId, ConversationId};

/// Lease record as stored in the shared medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeLease {
    pub conversation_id: ConversationId,
    pub owner_attempt_id: AttemptId,
    pub expires_at: DateTime<Utc>,
}

impl ProbeLease {
    pub fn new(
        conversation_id: ConversationId,
        owner_attempt_id: AttemptId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            conversation_id,
            owner_attempt_id,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_owned_by(&self, attempt_id: &AttemptId) -> bool {
        &self.owner_attempt_id == attempt_id
    }
}

/// Result of a claim call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub acquired: bool,
    pub owner_attempt_id: Option<AttemptId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClaimOutcome {
    pub fn acquired(lease: &ProbeLease) -> Self {
        Self {
            acquired: true,
            owner_attempt_id: Some(lease.owner_attempt_id.clone()),
            expires_at: Some(lease.expires_at),
        }
    }

    pub fn contended(existing: &ProbeLease) -> Self {
        Self {
            acquired: false,
            owner_attempt_id: Some(existing.owner_attempt_id.clone()),
            expires_at: Some(existing.expires_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry_boundary() {
        let now = Utc::now();
        let lease = ProbeLease::new("c1".into(), "a1".into(), now, Duration::milliseconds(500));
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::milliseconds(500)));
        assert!(lease.is_owned_by(&"a1".into()));
        assert!(!lease.is_owned_by(&"a2".into()));
    }

    #[test]
    fn test_claim_outcome_constructors() {
        let lease = ProbeLease::new("c1".into(), "a1".into(), Utc::now(), Duration::seconds(5));
        let won = ClaimOutcome::acquired(&lease);
        let lost = ClaimOutcome::contended(&lease);
        assert!(won.acquired);
        assert!(!lost.acquired);
        assert_eq!(lost.owner_attempt_id, Some(AttemptId::new("a1")));
        assert_eq!(lost.expires_at, Some(lease.expires_at));
    }
}
