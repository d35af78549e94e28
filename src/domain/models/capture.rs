//! Captured snapshot model and its provenance metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::AttemptId;
use super::readiness::PredicateVerdict;

/// Structured snapshot of a conversation as produced by a parsing collaborator.
///
/// The core treats the payload as opaque; only a readiness predicate looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredSnapshot(serde_json::Value);

impl StructuredSnapshot {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for StructuredSnapshot {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Quality tier of a captured snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    Degraded,
    High,
}

impl Default for Fidelity {
    fn default() -> Self {
        Self::High
    }
}

impl Fidelity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Degraded => "degraded",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "high" => Some(Self::High),
            "degraded" | "low" => Some(Self::Degraded),
            _ => None,
        }
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Fetched from the service's authoritative conversation endpoint
    AuthoritativeApi,
    /// Reassembled from intercepted stream frames
    StreamReassembly,
    /// Read passively from the rendered page
    PassiveRead,
}

impl CaptureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthoritativeApi => "authoritative_api",
            Self::StreamReassembly => "stream_reassembly",
            Self::PassiveRead => "passive_read",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "authoritative_api" | "api" => Some(Self::AuthoritativeApi),
            "stream_reassembly" | "stream" => Some(Self::StreamReassembly),
            "passive_read" | "dom" => Some(Self::PassiveRead),
            _ => None,
        }
    }

    /// Fidelity implied by the source when a collaborator does not state one.
    pub fn default_fidelity(&self) -> Fidelity {
        match self {
            Self::AuthoritativeApi => Fidelity::High,
            Self::StreamReassembly | Self::PassiveRead => Fidelity::Degraded,
        }
    }
}

/// Whether the held snapshot passed the readiness predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Partial,
}

/// Provenance and quality of the snapshot currently cached for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub capture_source: Option<CaptureSource>,
    pub fidelity: Option<Fidelity>,
    pub completeness: Completeness,
    pub content_hash: Option<String>,
    pub latest_length: usize,
    pub captured_at: Option<DateTime<Utc>>,
}

impl CaptureMeta {
    /// Meta for a conversation with nothing captured.
    pub fn empty() -> Self {
        Self {
            capture_source: None,
            fidelity: None,
            completeness: Completeness::Partial,
            content_hash: None,
            latest_length: 0,
            captured_at: None,
        }
    }

    pub fn is_high_fidelity(&self) -> bool {
        self.fidelity == Some(Fidelity::High)
    }
}

/// A snapshot together with the predicate verdict it was given on ingest.
#[derive(Debug, Clone)]
pub struct CapturedSample {
    pub snapshot: StructuredSnapshot,
    pub fidelity: Fidelity,
    pub source: CaptureSource,
    pub verdict: PredicateVerdict,
    pub attempt_id: Option<AttemptId>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedSample {
    /// High fidelity and accepted by the predicate.
    pub fn is_canonical(&self) -> bool {
        self.fidelity == Fidelity::High && self.verdict.ready
    }

    pub fn to_meta(&self) -> CaptureMeta {
        CaptureMeta {
            capture_source: Some(self.source),
            fidelity: Some(self.fidelity),
            completeness: if self.verdict.ready {
                Completeness::Complete
            } else {
                Completeness::Partial
            },
            content_hash: self.verdict.content_hash.clone(),
            latest_length: self.verdict.latest_length,
            captured_at: Some(self.captured_at),
        }
    }
}
