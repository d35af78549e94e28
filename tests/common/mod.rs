//! Common test utilities for integration tests
//!
//! Shared engine fixtures and snapshot builders.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capture_sentinel::adapters::memory::{InMemoryLeaseStore, ScriptedSnapshotFetcher};
use capture_sentinel::domain::models::Config;
use capture_sentinel::domain::ports::LeaseStore;
use capture_sentinel::services::{CaptureEngine, DiagnosticEvent, EngineHandle};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A running engine plus the collaborators tests steer it with.
pub struct TestEngine {
    pub engine: EngineHandle,
    pub fetcher: ScriptedSnapshotFetcher,
    pub diagnostics: mpsc::Receiver<DiagnosticEvent>,
}

impl TestEngine {
    /// Drain every diagnostic emitted so far.
    pub fn drain_diagnostics(&mut self) -> Vec<DiagnosticEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.diagnostics.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Config with short, round timings: first probe at 1s, then every 2s,
/// at most 3 fetches, and a 60s gate.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.stabilization.initial_delay_ms = 1_000;
    config.stabilization.retry_interval_ms = 2_000;
    config.stabilization.max_retries = 3;
    config.gate.max_wait_ms = 60_000;
    config.lease.ttl_ms = 5_000;
    config.lease.retry_grace_ms = 100;
    config.diagnostics.window_ms = 0;
    config
}

pub fn spawn_engine(config: Config, lease_store: Arc<dyn LeaseStore>) -> TestEngine {
    let fetcher = ScriptedSnapshotFetcher::new();
    let (tx, diagnostics) = mpsc::channel(1024);
    let (engine, _task) = CaptureEngine::new(config, lease_store, Arc::new(fetcher.clone()))
        .with_diagnostics(tx)
        .spawn();
    TestEngine {
        engine,
        fetcher,
        diagnostics,
    }
}

pub fn spawn_default() -> TestEngine {
    spawn_engine(fast_config(), Arc::new(InMemoryLeaseStore::new()))
}

/// Let virtual time run forward by `ms` milliseconds.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A finished assistant reply.
pub fn finished(content: &str) -> Value {
    json!({"messages": [
        {"role": "user", "content": "question"},
        {"role": "assistant", "content": content, "status": "finished"}
    ]})
}

/// An assistant reply still being written.
pub fn in_progress(content: &str) -> Value {
    json!({"messages": [
        {"role": "user", "content": "question"},
        {"role": "assistant", "content": content, "status": "in_progress"}
    ]})
}

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Path to a SQLite database file inside a fresh temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let db_path = dir.path().join("leases.db");
    (dir, db_path)
}
