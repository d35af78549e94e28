//! Domain models for the capture reconciliation core.

pub mod attempt;
pub mod capture;
pub mod config;
pub mod lease;
pub mod readiness;
pub mod signal;

pub use attempt::{
    Attempt, AttemptId, AttemptPhase, BlockingCondition, ConversationId, RetireReason,
};
pub use capture::{
    CaptureMeta, CaptureSource, CapturedSample, Completeness, Fidelity, StructuredSnapshot,
};
pub use config::{
    Config, DatabaseConfig, DiagnosticsConfig, EngineConfig, FetcherConfig, GateConfig,
    LeaseBackend, LeaseConfig, LoggingConfig, StabilizationConfig,
};
pub use lease::{ClaimOutcome, ProbeLease};
pub use readiness::{
    PredicateReason, PredicateVerdict, ReadinessDecision, ReadinessMode, ReadinessReason,
};
pub use signal::{InboundSignal, LifecyclePhase, Signal};
