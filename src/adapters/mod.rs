//! Adapters implementing the domain ports.

pub mod http;
pub mod memory;
pub mod predicates;
pub mod sqlite;
