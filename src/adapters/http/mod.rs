//! HTTP adapters.

pub mod snapshot_fetcher;

pub use snapshot_fetcher::HttpSnapshotFetcher;
