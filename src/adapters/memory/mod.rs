//! In-process adapters: a shared lease map and a scripted fetcher.

pub mod lease_store;
pub mod scripted_fetcher;

pub use lease_store::InMemoryLeaseStore;
pub use scripted_fetcher::{ScriptedResponse, ScriptedSnapshotFetcher};
