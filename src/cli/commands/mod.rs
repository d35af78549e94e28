//! CLI command implementations.

pub mod config;
pub mod lease;
pub mod replay;
