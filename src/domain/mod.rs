//! Domain layer for the capture reconciliation core
//!
//! This module contains the attempt, signal, capture and lease models and the
//! ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
