//! Readiness decisions and predicate verdicts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::BlockingCondition;

/// Why a readiness predicate accepted or rejected a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateReason {
    /// Last assistant message is finished and non-empty
    Ready,
    /// Snapshot has no messages at all
    EmptySnapshot,
    /// Snapshot does not end with an assistant message
    NoAssistantMessage,
    /// Assistant message is still being generated
    AssistantIncomplete,
    /// Assistant message finished with no content
    ContentEmpty,
    /// Assistant message ended in an error state
    AssistantFailed,
    /// Snapshot shape is not understood by the predicate
    Unrecognized,
}

impl PredicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::EmptySnapshot => "empty_snapshot",
            Self::NoAssistantMessage => "no_assistant_message",
            Self::AssistantIncomplete => "assistant_incomplete",
            Self::ContentEmpty => "content_empty",
            Self::AssistantFailed => "assistant_failed",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Result of evaluating a snapshot with a readiness predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateVerdict {
    pub ready: bool,
    pub terminal: bool,
    pub reason: PredicateReason,
    pub content_hash: Option<String>,
    pub latest_length: usize,
}

impl PredicateVerdict {
    pub fn rejected(reason: PredicateReason) -> Self {
        Self {
            ready: false,
            terminal: false,
            reason,
            content_hash: None,
            latest_length: 0,
        }
    }
}

/// Overall readiness mode exposed to export collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// Safe to export automatically
    CanonicalReady,
    /// Only a degraded capture exists; export requires a manual action
    DegradedManualOnly,
    /// Still waiting on generation or stabilization
    Awaiting,
    /// Nothing known about the conversation
    Unknown,
}

impl ReadinessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CanonicalReady => "canonical_ready",
            Self::DegradedManualOnly => "degraded_manual_only",
            Self::Awaiting => "awaiting",
            Self::Unknown => "unknown",
        }
    }
}

/// Diagnostic reason attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessReason {
    CanonicalAccepted,
    StabilizationTimeout,
    GenerationInProgress,
    AwaitingCanonical,
    PredicateRejected,
    NoAttempt,
    AttemptDisposed,
    NoSnapshot,
}

impl ReadinessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CanonicalAccepted => "canonical_accepted",
            Self::StabilizationTimeout => "stabilization_timeout",
            Self::GenerationInProgress => "generation_in_progress",
            Self::AwaitingCanonical => "awaiting_canonical",
            Self::PredicateRejected => "predicate_rejected",
            Self::NoAttempt => "no_attempt",
            Self::AttemptDisposed => "attempt_disposed",
            Self::NoSnapshot => "no_snapshot",
        }
    }
}

/// Readiness of the response on a conversation, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessDecision {
    pub mode: ReadinessMode,
    pub reason: ReadinessReason,
    pub blocking_conditions: BTreeSet<BlockingCondition>,
    pub decided_at: DateTime<Utc>,
}

impl ReadinessDecision {
    pub fn new(mode: ReadinessMode, reason: ReadinessReason) -> Self {
        Self {
            mode,
            reason,
            blocking_conditions: BTreeSet::new(),
            decided_at: Utc::now(),
        }
    }

    pub fn with_blocking(
        mut self,
        conditions: impl IntoIterator<Item = BlockingCondition>,
    ) -> Self {
        self.blocking_conditions.extend(conditions);
        self
    }

    pub fn unknown() -> Self {
        Self::new(ReadinessMode::Unknown, ReadinessReason::NoAttempt)
    }

    pub fn is_exportable(&self) -> bool {
        self.mode == ReadinessMode::CanonicalReady
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_builder() {
        let decision =
            ReadinessDecision::new(ReadinessMode::Awaiting, ReadinessReason::AwaitingCanonical)
                .with_blocking([BlockingCondition::CanonicalMissing]);
        assert!(!decision.is_exportable());
        assert!(decision
            .blocking_conditions
            .contains(&BlockingCondition::CanonicalMissing));
    }

    #[test]
    fn test_mode_serializes_snake_case() {
        let json = serde_json::to_string(&ReadinessMode::DegradedManualOnly).unwrap();
        assert_eq!(json, "\"degraded_manual_only\"");
        let json = serde_json::to_string(&ReadinessReason::StabilizationTimeout).unwrap();
        assert_eq!(json, "\"stabilization_timeout\"");
    }

    #[test]
    fn test_rejected_verdict() {
        let verdict = PredicateVerdict::rejected(PredicateReason::EmptySnapshot);
        assert!(!verdict.ready);
        assert_eq!(verdict.reason.as_str(), "empty_snapshot");
    }
}
