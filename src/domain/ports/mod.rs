//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces adapters implement:
//! - LeaseStore: the store shared across tabs for probe leases
//! - SnapshotFetcher: the authoritative conversation fetch
//! - ReadinessPredicate: per-service "is this response finished" check

pub mod lease_store;
pub mod readiness_predicate;
pub mod snapshot_fetcher;

pub use lease_store::LeaseStore;
pub use readiness_predicate::ReadinessPredicate;
pub use snapshot_fetcher::{NullSnapshotFetcher, SnapshotFetcher};
