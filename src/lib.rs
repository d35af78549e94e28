//! capture-sentinel - readiness reconciliation for intercepted chat responses
//!
//! Several independent observers report on the same generation: page
//! lifecycle hints, streamed fragments and authoritative snapshot fetches.
//! This crate fuses them into one readiness decision per conversation.
//!
//! # Architecture
//!
//! The crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): attempts, signals, captures, leases and the ports
//! - **Service Layer** (`services`): attempt registry, signal fusion, stabilization,
//!   readiness gate, probe leases and the engine loop
//! - **Adapters** (`adapters`): SQLite and in-memory lease stores, HTTP and scripted
//!   snapshot fetchers, readiness predicates
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use capture_sentinel::adapters::memory::InMemoryLeaseStore;
//! use capture_sentinel::domain::models::{Config, ConversationId, LifecyclePhase, Signal};
//! use capture_sentinel::domain::ports::NullSnapshotFetcher;
//! use capture_sentinel::services::CaptureEngine;
//!
//! let (engine, _task) = CaptureEngine::new(
//!     Config::default(),
//!     Arc::new(InMemoryLeaseStore::new()),
//!     Arc::new(NullSnapshotFetcher),
//! )
//! .spawn();
//! engine
//!     .submit(Signal::lifecycle("a1", LifecyclePhase::PromptSent, Some("c1"), "chatgpt"))
//!     .await?;
//! let decision = engine
//!     .resolve_readiness_decision(&ConversationId::new("c1"))
//!     .await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AttemptId, AttemptPhase, CaptureMeta, Config, ConversationId, InboundSignal, LifecyclePhase,
    ReadinessDecision, ReadinessMode, ReadinessReason, Signal,
};
pub use domain::ports::{LeaseStore, ReadinessPredicate, SnapshotFetcher};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CaptureEngine, EngineHandle};
