//! Attempt domain model.
//!
//! An attempt is one prompt→response generation cycle on a conversation.
//! Its phase only moves forward; `Disposed` and `Superseded` are terminal.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::readiness::ReadinessDecision;

/// Opaque identifier for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for an ad-hoc lease owner.
    pub fn generate() -> Self {
        Self(format!("attempt-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttemptId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable identifier of a chat thread.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Phase of an attempt in the readiness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    /// Created, no generation activity seen yet
    Pending,
    /// Prompt sent or response streaming
    Active,
    /// Generation reported complete, waiting for an authoritative snapshot
    AwaitingCanonical,
    /// Backed by an accepted high-fidelity snapshot
    CanonicalReady,
    /// Stabilization timed out; only a lower-fidelity snapshot is available
    DegradedReady,
    /// Torn down (navigation, tab close, explicit disposal)
    Disposed,
    /// Replaced by a newer attempt on the same conversation
    Superseded,
}

impl Default for AttemptPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl AttemptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::AwaitingCanonical => "awaiting_canonical",
            Self::CanonicalReady => "canonical_ready",
            Self::DegradedReady => "degraded_ready",
            Self::Disposed => "disposed",
            Self::Superseded => "superseded",
        }
    }

    /// Terminal phases accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed | Self::Superseded)
    }

    /// Live attempts are those not yet retired.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the attempt has produced an exportable decision.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::CanonicalReady | Self::DegradedReady)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(&self) -> Vec<AttemptPhase> {
        match self {
            Self::Pending => vec![Self::Active, Self::Disposed, Self::Superseded],
            Self::Active => vec![Self::AwaitingCanonical, Self::Disposed, Self::Superseded],
            Self::AwaitingCanonical => vec![
                Self::CanonicalReady,
                Self::DegradedReady,
                Self::Disposed,
                Self::Superseded,
            ],
            Self::DegradedReady => vec![Self::CanonicalReady, Self::Disposed, Self::Superseded],
            Self::CanonicalReady => vec![Self::Disposed, Self::Superseded],
            Self::Disposed | Self::Superseded => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason codes that currently keep an attempt from being canonically ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingCondition {
    /// Prompt sent or stream still running
    GenerationInProgress,
    /// No conversation id resolved yet
    ConversationUnknown,
    /// No high-fidelity snapshot held
    CanonicalMissing,
    /// Held snapshot failed the readiness predicate
    PredicateRejected,
    /// Another tab holds the probe lease
    LeaseContended,
    /// Stabilization gave up; only degraded data is available
    StabilizationExhausted,
}

impl BlockingCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerationInProgress => "generation_in_progress",
            Self::ConversationUnknown => "conversation_unknown",
            Self::CanonicalMissing => "canonical_missing",
            Self::PredicateRejected => "predicate_rejected",
            Self::LeaseContended => "lease_contended",
            Self::StabilizationExhausted => "stabilization_exhausted",
        }
    }
}

/// Why an attempt was retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// Explicit disposal with a collaborator-supplied reason
    Disposed(String),
    /// A newer attempt took over the conversation
    SupersededBy(AttemptId),
    /// Dropped from the registry under capacity pressure
    Evicted,
}

/// One generation attempt tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Attempt identifier
    pub id: AttemptId,
    /// Conversation, once known
    pub conversation_id: Option<ConversationId>,
    /// Source service the attempt was observed on
    pub platform: Option<String>,
    /// Current phase
    pub phase: AttemptPhase,
    /// Reasons currently blocking canonical readiness
    pub blocking_conditions: BTreeSet<BlockingCondition>,
    /// Forwarding pointer, set when superseded
    pub alias_target: Option<AttemptId>,
    /// Registry creation order; larger is newer
    pub sequence: u64,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When the phase last changed
    pub updated_at: DateTime<Utc>,
    /// Decision cached on entry into a ready phase
    pub cached_decision: Option<ReadinessDecision>,
    /// Whether the readiness gate reported a timeout
    pub stabilization_timed_out: bool,
    /// Why the attempt was retired, if it was
    pub retire_reason: Option<RetireReason>,
}

impl Attempt {
    /// Create a new pending attempt.
    pub fn new(id: AttemptId, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            conversation_id: None,
            platform: None,
            phase: AttemptPhase::Pending,
            blocking_conditions: BTreeSet::from([BlockingCondition::ConversationUnknown]),
            alias_target: None,
            sequence,
            created_at: now,
            updated_at: now,
            cached_decision: None,
            stabilization_timed_out: false,
            retire_reason: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn is_live(&self) -> bool {
        self.phase.is_live()
    }

    pub fn can_transition_to(&self, next: AttemptPhase) -> bool {
        self.phase.can_transition_to(next)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition_to(&mut self, next: AttemptPhase) -> Result<(), String> {
        if !self.can_transition_to(next) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.phase.as_str(),
                next.as_str()
            ));
        }

        self.phase = next;
        self.updated_at = Utc::now();

        match next {
            AttemptPhase::Active => {
                self.blocking_conditions.insert(BlockingCondition::GenerationInProgress);
            }
            AttemptPhase::AwaitingCanonical => {
                self.blocking_conditions.remove(&BlockingCondition::GenerationInProgress);
                self.blocking_conditions.insert(BlockingCondition::CanonicalMissing);
            }
            AttemptPhase::CanonicalReady => {
                self.blocking_conditions.clear();
            }
            AttemptPhase::DegradedReady => {
                self.blocking_conditions.remove(&BlockingCondition::LeaseContended);
                self.blocking_conditions.insert(BlockingCondition::StabilizationExhausted);
            }
            AttemptPhase::Pending | AttemptPhase::Disposed | AttemptPhase::Superseded => {}
        }

        Ok(())
    }

    /// Retire the attempt. Idempotent: a retired attempt keeps its first reason.
    pub fn retire(&mut self, reason: RetireReason) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        let next = match &reason {
            RetireReason::SupersededBy(target) => {
                self.alias_target = Some(target.clone());
                AttemptPhase::Superseded
            }
            RetireReason::Disposed(_) | RetireReason::Evicted => AttemptPhase::Disposed,
        };
        self.phase = next;
        self.updated_at = Utc::now();
        self.retire_reason = Some(reason);
        true
    }

    /// Record the conversation this attempt belongs to.
    pub fn bind_conversation(&mut self, conversation_id: ConversationId) {
        self.conversation_id = Some(conversation_id);
        self.blocking_conditions.remove(&BlockingCondition::ConversationUnknown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_strings_match_wire_form() {
        for phase in [
            AttemptPhase::Pending,
            AttemptPhase::Active,
            AttemptPhase::AwaitingCanonical,
            AttemptPhase::CanonicalReady,
            AttemptPhase::DegradedReady,
            AttemptPhase::Disposed,
            AttemptPhase::Superseded,
        ] {
            assert_eq!(serde_json::to_value(phase).unwrap(), phase.as_str());
        }
    }

    #[test]
    fn test_terminal_phases_have_no_transitions() {
        assert!(AttemptPhase::Disposed.valid_transitions().is_empty());
        assert!(AttemptPhase::Superseded.valid_transitions().is_empty());
    }

    #[test]
    fn test_canonical_ready_never_downgrades() {
        assert!(!AttemptPhase::CanonicalReady.can_transition_to(AttemptPhase::DegradedReady));
        assert!(AttemptPhase::DegradedReady.can_transition_to(AttemptPhase::CanonicalReady));
    }

    #[test]
    fn test_transition_updates_blocking_conditions() {
        let mut attempt = Attempt::new(AttemptId::new("a1"), 1);
        attempt.transition_to(AttemptPhase::Active).unwrap();
        assert!(attempt
            .blocking_conditions
            .contains(&BlockingCondition::GenerationInProgress));

        attempt.transition_to(AttemptPhase::AwaitingCanonical).unwrap();
        assert!(!attempt
            .blocking_conditions
            .contains(&BlockingCondition::GenerationInProgress));
        assert!(attempt
            .blocking_conditions
            .contains(&BlockingCondition::CanonicalMissing));

        attempt.transition_to(AttemptPhase::CanonicalReady).unwrap();
        assert!(attempt.blocking_conditions.is_empty());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut attempt = Attempt::new(AttemptId::new("a1"), 1);
        let err = attempt
            .transition_to(AttemptPhase::CanonicalReady)
            .unwrap_err();
        assert!(err.contains("pending"));
        assert_eq!(attempt.phase, AttemptPhase::Pending);
    }

    #[test]
    fn test_retire_is_idempotent() {
        let mut attempt = Attempt::new(AttemptId::new("a1"), 1);
        assert!(attempt.retire(RetireReason::SupersededBy(AttemptId::new("a2"))));
        assert!(!attempt.retire(RetireReason::Disposed("navigation".into())));
        assert_eq!(attempt.phase, AttemptPhase::Superseded);
        assert_eq!(attempt.alias_target, Some(AttemptId::new("a2")));
    }

    #[test]
    fn test_bind_conversation_clears_unknown() {
        let mut attempt = Attempt::new(AttemptId::new("a1"), 1);
        assert!(attempt
            .blocking_conditions
            .contains(&BlockingCondition::ConversationUnknown));
        attempt.bind_conversation(ConversationId::new("c1"));
        assert!(!attempt
            .blocking_conditions
            .contains(&BlockingCondition::ConversationUnknown));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(AttemptId::generate(), AttemptId::generate());
    }
}
