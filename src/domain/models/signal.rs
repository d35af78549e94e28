//! Inbound signals.
//!
//! `InboundSignal` is the loosely-typed wire form collaborators emit;
//! `Signal` is the validated form the fusion engine consumes.

use serde::{Deserialize, Serialize};

use super::attempt::{AttemptId, ConversationId};
use super::capture::{CaptureSource, Fidelity, StructuredSnapshot};
use crate::domain::errors::{DomainError, DomainResult};

/// Page-lifecycle hint for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecyclePhase {
    PromptSent,
    Streaming,
    Completed,
    Terminated,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptSent => "prompt-sent",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "prompt-sent" => Some(Self::PromptSent),
            "streaming" => Some(Self::Streaming),
            "completed" => Some(Self::Completed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Generation is underway.
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::PromptSent | Self::Streaming)
    }

    /// Generation has stopped, normally or not.
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

/// A validated signal, consumed exactly once by the fusion engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Lifecycle {
        attempt_id: AttemptId,
        phase: LifecyclePhase,
        conversation_id: Option<ConversationId>,
        platform: String,
    },
    CanonicalSample {
        conversation_id: ConversationId,
        snapshot: StructuredSnapshot,
        attempt_id: Option<AttemptId>,
        fidelity: Fidelity,
        source: CaptureSource,
    },
    ConversationResolved {
        attempt_id: AttemptId,
        conversation_id: ConversationId,
    },
    Disposed {
        attempt_id: AttemptId,
        reason: String,
    },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lifecycle { .. } => "lifecycle",
            Self::CanonicalSample { .. } => "canonical_sample",
            Self::ConversationResolved { .. } => "conversation_resolved",
            Self::Disposed { .. } => "disposed",
        }
    }

    /// Attempt the signal names directly, if any.
    pub fn attempt_id(&self) -> Option<&AttemptId> {
        match self {
            Self::Lifecycle { attempt_id, .. }
            | Self::ConversationResolved { attempt_id, .. }
            | Self::Disposed { attempt_id, .. } => Some(attempt_id),
            Self::CanonicalSample { attempt_id, .. } => attempt_id.as_ref(),
        }
    }

    pub fn lifecycle(
        attempt_id: impl Into<String>,
        phase: LifecyclePhase,
        conversation_id: Option<&str>,
        platform: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            attempt_id: AttemptId::new(attempt_id),
            phase,
            conversation_id: conversation_id.map(ConversationId::new),
            platform: platform.into(),
        }
    }

    /// High-fidelity authoritative sample.
    pub fn canonical(
        conversation_id: impl Into<String>,
        snapshot: serde_json::Value,
        attempt_id: Option<&str>,
    ) -> Self {
        Self::CanonicalSample {
            conversation_id: ConversationId::new(conversation_id),
            snapshot: StructuredSnapshot::new(snapshot),
            attempt_id: attempt_id.map(AttemptId::new),
            fidelity: Fidelity::High,
            source: CaptureSource::AuthoritativeApi,
        }
    }

    /// Lower-fidelity sample read from the page or stream.
    pub fn degraded(conversation_id: impl Into<String>, snapshot: serde_json::Value) -> Self {
        Self::CanonicalSample {
            conversation_id: ConversationId::new(conversation_id),
            snapshot: StructuredSnapshot::new(snapshot),
            attempt_id: None,
            fidelity: Fidelity::Degraded,
            source: CaptureSource::PassiveRead,
        }
    }

    pub fn resolved(attempt_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::ConversationResolved {
            attempt_id: AttemptId::new(attempt_id),
            conversation_id: ConversationId::new(conversation_id),
        }
    }

    pub fn disposed(attempt_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Disposed {
            attempt_id: AttemptId::new(attempt_id),
            reason: reason.into(),
        }
    }
}

/// Wire form of a signal as delivered by interception collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundSignal {
    Lifecycle {
        attempt_id: Option<String>,
        phase: Option<String>,
        conversation_id: Option<String>,
        platform: Option<String>,
    },
    CanonicalSample {
        conversation_id: Option<String>,
        snapshot: Option<serde_json::Value>,
        attempt_id: Option<String>,
        fidelity: Option<String>,
        source: Option<String>,
    },
    ConversationResolved {
        attempt_id: Option<String>,
        conversation_id: Option<String>,
    },
    Disposed {
        attempt_id: Option<String>,
        reason: Option<String>,
    },
}

fn required(field: &str, kind: &str, value: Option<String>) -> DomainResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DomainError::MalformedSignal(format!(
            "{kind} signal missing required field '{field}'"
        ))),
    }
}

fn optional_nonempty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<InboundSignal> for Signal {
    type Error = DomainError;

    fn try_from(raw: InboundSignal) -> DomainResult<Self> {
        match raw {
            InboundSignal::Lifecycle {
                attempt_id,
                phase,
                conversation_id,
                platform,
            } => {
                let attempt_id = required("attempt_id", "lifecycle", attempt_id)?;
                let phase_str = required("phase", "lifecycle", phase)?;
                let phase = LifecyclePhase::from_str(&phase_str).ok_or_else(|| {
                    DomainError::MalformedSignal(format!("unknown lifecycle phase '{phase_str}'"))
                })?;
                let platform = required("platform", "lifecycle", platform)?;
                Ok(Self::Lifecycle {
                    attempt_id: AttemptId::new(attempt_id),
                    phase,
                    conversation_id: optional_nonempty(conversation_id).map(ConversationId::new),
                    platform,
                })
            }
            InboundSignal::CanonicalSample {
                conversation_id,
                snapshot,
                attempt_id,
                fidelity,
                source,
            } => {
                let conversation_id =
                    required("conversation_id", "canonical_sample", conversation_id)?;
                let snapshot = snapshot.filter(|v| !v.is_null()).ok_or_else(|| {
                    DomainError::MalformedSignal(
                        "canonical_sample signal missing required field 'snapshot'".to_string(),
                    )
                })?;
                let source = match optional_nonempty(source) {
                    Some(s) => CaptureSource::from_str(&s).ok_or_else(|| {
                        DomainError::MalformedSignal(format!("unknown capture source '{s}'"))
                    })?,
                    None => CaptureSource::AuthoritativeApi,
                };
                let fidelity = match optional_nonempty(fidelity) {
                    Some(f) => Fidelity::from_str(&f).ok_or_else(|| {
                        DomainError::MalformedSignal(format!("unknown fidelity '{f}'"))
                    })?,
                    None => source.default_fidelity(),
                };
                Ok(Self::CanonicalSample {
                    conversation_id: ConversationId::new(conversation_id),
                    snapshot: StructuredSnapshot::new(snapshot),
                    attempt_id: optional_nonempty(attempt_id).map(AttemptId::new),
                    fidelity,
                    source,
                })
            }
            InboundSignal::ConversationResolved {
                attempt_id,
                conversation_id,
            } => Ok(Self::ConversationResolved {
                attempt_id: AttemptId::new(required(
                    "attempt_id",
                    "conversation_resolved",
                    attempt_id,
                )?),
                conversation_id: ConversationId::new(required(
                    "conversation_id",
                    "conversation_resolved",
                    conversation_id,
                )?),
            }),
            InboundSignal::Disposed { attempt_id, reason } => Ok(Self::Disposed {
                attempt_id: AttemptId::new(required("attempt_id", "disposed", attempt_id)?),
                reason: optional_nonempty(reason).unwrap_or_else(|| "unspecified".to_string()),
            }),
        }
    }
}

impl InboundSignal {
    /// Parse one JSON-encoded signal.
    pub fn from_json(line: &str) -> DomainResult<Self> {
        serde_json::from_str(line).map_err(|e| DomainError::MalformedSignal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_phase_parsing() {
        assert_eq!(LifecyclePhase::from_str("prompt-sent"), Some(LifecyclePhase::PromptSent));
        assert_eq!(LifecyclePhase::from_str("PROMPT_SENT"), Some(LifecyclePhase::PromptSent));
        assert_eq!(LifecyclePhase::from_str("done"), None);
        assert!(LifecyclePhase::Streaming.is_activity());
        assert!(LifecyclePhase::Terminated.is_finish());
    }

    #[test]
    fn test_valid_lifecycle_wire_signal() {
        let raw = InboundSignal::from_json(
            r#"{"kind":"lifecycle","attempt_id":"a1","phase":"prompt-sent",
                "conversation_id":"c1","platform":"chatgpt"}"#,
        )
        .unwrap();
        let signal = Signal::try_from(raw).unwrap();
        assert_eq!(
            signal,
            Signal::lifecycle("a1", LifecyclePhase::PromptSent, Some("c1"), "chatgpt")
        );
    }

    #[test]
    fn test_missing_attempt_id_is_malformed() {
        let raw =
            InboundSignal::from_json(r#"{"kind":"lifecycle","phase":"streaming","platform":"x"}"#)
                .unwrap();
        let err = Signal::try_from(raw).unwrap_err();
        assert!(matches!(err, DomainError::MalformedSignal(_)));
        assert!(err.to_string().contains("attempt_id"));
    }

    #[test]
    fn test_unknown_phase_is_malformed() {
        let raw = InboundSignal::from_json(
            r#"{"kind":"lifecycle","attempt_id":"a1","phase":"paused","platform":"x"}"#,
        )
        .unwrap();
        assert!(matches!(
            Signal::try_from(raw),
            Err(DomainError::MalformedSignal(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = InboundSignal::from_json(r#"{"kind":"heartbeat"}"#).unwrap_err();
        assert!(matches!(err, DomainError::MalformedSignal(_)));
    }

    #[test]
    fn test_sample_fidelity_defaults_from_source() {
        let raw = InboundSignal::from_json(
            r#"{"kind":"canonical_sample","conversation_id":"c1",
                "snapshot":{"messages":[]},"source":"passive_read"}"#,
        )
        .unwrap();
        match Signal::try_from(raw).unwrap() {
            Signal::CanonicalSample { fidelity, source, .. } => {
                assert_eq!(fidelity, Fidelity::Degraded);
                assert_eq!(source, CaptureSource::PassiveRead);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn test_sample_without_snapshot_is_malformed() {
        let raw = InboundSignal::from_json(r#"{"kind":"canonical_sample","conversation_id":"c1"}"#)
            .unwrap();
        assert!(Signal::try_from(raw).is_err());
    }

    #[test]
    fn test_disposed_reason_defaults() {
        let raw = InboundSignal::from_json(r#"{"kind":"disposed","attempt_id":"a1"}"#).unwrap();
        assert_eq!(Signal::try_from(raw).unwrap(), Signal::disposed("a1", "unspecified"));
    }
}
