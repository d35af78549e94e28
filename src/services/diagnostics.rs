//! Rate-limited diagnostic events.
//!
//! Phase transitions, timeouts, lease contention and discarded signals are
//! reported through `tracing` and, optionally, to an external sink. Each event
//! has a key; at most one event per key is emitted per window.

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::attempt_registry::RetiredAttempt;
use crate::domain::models::{AttemptId, AttemptPhase, ConversationId, DiagnosticsConfig};

/// Kind of diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    PhaseTransition,
    StabilizationTimeout,
    LeaseContention,
    StaleSignal,
    MalformedSignal,
    ProbeFailed,
    AttemptRetired,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhaseTransition => "phase_transition",
            Self::StabilizationTimeout => "stabilization_timeout",
            Self::LeaseContention => "lease_contention",
            Self::StaleSignal => "stale_signal",
            Self::MalformedSignal => "malformed_signal",
            Self::ProbeFailed => "probe_failed",
            Self::AttemptRetired => "attempt_retired",
        }
    }
}

/// One diagnostic event, as handed to the external logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<AttemptId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub detail: String,
    pub at: DateTime<Utc>,
    /// Rate-limit key
    #[serde(skip)]
    pub key: String,
}

impl DiagnosticEvent {
    fn new(
        kind: DiagnosticKind,
        attempt_id: Option<AttemptId>,
        conversation_id: Option<ConversationId>,
        detail: String,
        key_suffix: &str,
    ) -> Self {
        let subject = attempt_id
            .as_ref()
            .map(AttemptId::as_str)
            .or(conversation_id.as_ref().map(ConversationId::as_str))
            .unwrap_or("-");
        Self {
            key: format!("{}:{subject}:{key_suffix}", kind.as_str()),
            kind,
            attempt_id,
            conversation_id,
            detail,
            at: Utc::now(),
        }
    }

    pub fn phase_transition(
        attempt_id: &AttemptId,
        conversation_id: Option<&ConversationId>,
        from: AttemptPhase,
        to: AttemptPhase,
    ) -> Self {
        Self::new(
            DiagnosticKind::PhaseTransition,
            Some(attempt_id.clone()),
            conversation_id.cloned(),
            format!("{from} -> {to}"),
            to.as_str(),
        )
    }

    pub fn stabilization_timeout(
        attempt_id: &AttemptId,
        conversation_id: Option<&ConversationId>,
        fetches: u32,
        cause: &str,
    ) -> Self {
        Self::new(
            DiagnosticKind::StabilizationTimeout,
            Some(attempt_id.clone()),
            conversation_id.cloned(),
            format!("no canonical snapshot after {fetches} fetches ({cause})"),
            "",
        )
    }

    pub fn lease_contention(
        attempt_id: &AttemptId,
        conversation_id: &ConversationId,
        owner: Option<&AttemptId>,
    ) -> Self {
        Self::new(
            DiagnosticKind::LeaseContention,
            Some(attempt_id.clone()),
            Some(conversation_id.clone()),
            format!(
                "probe lease held by {}",
                owner.map_or("unknown owner", AttemptId::as_str)
            ),
            "",
        )
    }

    pub fn stale_signal(attempt_id: Option<&AttemptId>, reason: impl Into<String>) -> Self {
        Self::new(
            DiagnosticKind::StaleSignal,
            attempt_id.cloned(),
            None,
            reason.into(),
            "",
        )
    }

    pub fn malformed_signal(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let suffix = reason.chars().take(48).collect::<String>();
        Self::new(DiagnosticKind::MalformedSignal, None, None, reason, &suffix)
    }

    pub fn probe_failed(
        attempt_id: &AttemptId,
        conversation_id: &ConversationId,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            DiagnosticKind::ProbeFailed,
            Some(attempt_id.clone()),
            Some(conversation_id.clone()),
            reason.into(),
            "",
        )
    }

    pub fn attempt_retired(retired: &RetiredAttempt) -> Self {
        Self::new(
            DiagnosticKind::AttemptRetired,
            Some(retired.attempt_id.clone()),
            retired.conversation_id.clone(),
            format!("{} retired: {:?}", retired.previous_phase, retired.reason),
            "",
        )
    }
}

/// Emits diagnostic events, at most one per key per window.
pub struct DiagnosticEmitter {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
    sink: Option<mpsc::Sender<DiagnosticEvent>>,
    emitted: u64,
    suppressed: u64,
}

impl std::fmt::Debug for DiagnosticEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticEmitter")
            .field("limited", &self.limiter.is_some())
            .field("emitted", &self.emitted)
            .field("suppressed", &self.suppressed)
            .finish_non_exhaustive()
    }
}

impl DiagnosticEmitter {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        let limiter = Quota::with_period(Duration::from_millis(config.window_ms))
            .map(|q| RateLimiter::keyed(q.allow_burst(NonZeroU32::MIN)));
        Self {
            limiter,
            sink: None,
            emitted: 0,
            suppressed: 0,
        }
    }

    pub fn with_sink(mut self, sink: mpsc::Sender<DiagnosticEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Emit `event` unless its key fired within the window. Returns whether it
    /// was emitted.
    pub fn emit(&mut self, event: DiagnosticEvent) -> bool {
        if let Some(limiter) = &self.limiter {
            if limiter.check_key(&event.key).is_err() {
                self.suppressed += 1;
                return false;
            }
            if self.emitted % 256 == 255 {
                limiter.retain_recent();
            }
        }
        self.emitted += 1;

        let attempt_id = event.attempt_id.as_ref().map(AttemptId::as_str);
        let conversation_id = event.conversation_id.as_ref().map(ConversationId::as_str);
        match event.kind {
            DiagnosticKind::StabilizationTimeout => info!(
                kind = event.kind.as_str(),
                attempt_id,
                conversation_id,
                "{}",
                event.detail
            ),
            DiagnosticKind::MalformedSignal => {
                warn!(kind = event.kind.as_str(), "{}", event.detail);
            }
            _ => debug!(
                kind = event.kind.as_str(),
                attempt_id,
                conversation_id,
                "{}",
                event.detail
            ),
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.try_send(event) {
                debug!(error = %e, "Diagnostic sink unavailable; event dropped");
            }
        }
        true
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_ms: u64) -> DiagnosticsConfig {
        DiagnosticsConfig { window_ms }
    }

    #[test]
    fn test_same_key_suppressed_within_window() {
        let mut emitter = DiagnosticEmitter::new(&config(15_000));
        let event =
            DiagnosticEvent::stale_signal(Some(&AttemptId::new("a1")), "attempt is superseded");

        assert!(emitter.emit(event.clone()));
        assert!(!emitter.emit(event));
        assert_eq!(emitter.emitted(), 1);
        assert_eq!(emitter.suppressed(), 1);
    }

    #[test]
    fn test_distinct_keys_pass() {
        let mut emitter = DiagnosticEmitter::new(&config(15_000));
        let a1 = AttemptId::new("a1");
        assert!(emitter.emit(DiagnosticEvent::phase_transition(
            &a1,
            None,
            AttemptPhase::Pending,
            AttemptPhase::Active
        )));
        assert!(emitter.emit(DiagnosticEvent::phase_transition(
            &a1,
            None,
            AttemptPhase::Active,
            AttemptPhase::AwaitingCanonical
        )));
        assert!(emitter.emit(DiagnosticEvent::stale_signal(Some(&a1), "x")));
    }

    #[test]
    fn test_zero_window_disables_limiting() {
        let mut emitter = DiagnosticEmitter::new(&config(0));
        let event = DiagnosticEvent::malformed_signal("missing attempt_id");
        assert!(emitter.emit(event.clone()));
        assert!(emitter.emit(event));
        assert_eq!(emitter.suppressed(), 0);
    }

    #[tokio::test]
    async fn test_events_forwarded_to_sink() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut emitter = DiagnosticEmitter::new(&config(15_000)).with_sink(tx);
        emitter.emit(DiagnosticEvent::lease_contention(
            &AttemptId::new("a2"),
            &ConversationId::new("c1"),
            Some(&AttemptId::new("a1")),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, DiagnosticKind::LeaseContention);
        assert_eq!(event.detail, "probe lease held by a1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "lease_contention");
        assert!(json.get("key").is_none());
    }
}
