//! Service layer: attempt identity, signal fusion, stabilization and the
//! engine loop that drives them.

pub mod attempt_registry;
pub mod bounded_map;
pub mod diagnostics;
pub mod engine;
pub mod predicate_registry;
pub mod probe_lease;
pub mod readiness_gate;
pub mod signal_fusion;
pub mod stabilization;

pub use attempt_registry::{AttemptLookup, AttemptRegistry, BindOutcome, RetiredAttempt};
pub use bounded_map::BoundedMap;
pub use diagnostics::{DiagnosticEmitter, DiagnosticEvent, DiagnosticKind};
pub use engine::{AttemptView, CaptureEngine, EngineHandle};
pub use predicate_registry::PredicateRegistry;
pub use probe_lease::ProbeLeaseCoordinator;
pub use readiness_gate::ReadinessGate;
pub use signal_fusion::{FusionEffect, SignalFusionEngine};
pub use stabilization::{StabilizationScheduler, TickAction};
