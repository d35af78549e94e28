//! Readiness gate.
//!
//! Bounds how long an attempt may sit in `awaiting_canonical`. The gate owns
//! a wall-clock deadline per attempt and guarantees the timeout is reported
//! at most once, whether it comes from the deadline or from the
//! stabilization scheduler running out of retries.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::engine::EngineMessage;
use crate::domain::models::{AttemptId, GateConfig};

#[derive(Debug)]
struct Deadline {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Per-attempt wait bound for canonical snapshots.
#[derive(Debug)]
pub struct ReadinessGate {
    max_wait: Duration,
    deadlines: HashMap<AttemptId, Deadline>,
    reported: HashSet<AttemptId>,
    next_generation: u64,
    tx: mpsc::WeakSender<EngineMessage>,
}

impl ReadinessGate {
    /// A zero `max_wait` leaves only retry exhaustion as the timeout source.
    pub fn new(config: &GateConfig, tx: mpsc::WeakSender<EngineMessage>) -> Self {
        Self {
            max_wait: config.max_wait(),
            deadlines: HashMap::new(),
            reported: HashSet::new(),
            next_generation: 0,
            tx,
        }
    }

    /// Start the deadline for `attempt_id`. Idempotent.
    pub fn arm(&mut self, attempt_id: &AttemptId) {
        if self.max_wait.is_zero()
            || self.deadlines.contains_key(attempt_id)
            || self.reported.contains(attempt_id)
        {
            return;
        }
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.max_wait;
        let id = attempt_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(EngineMessage::GateDeadline {
                    attempt_id: id,
                    generation,
                })
                .await;
        });
        debug!(
            attempt_id = %attempt_id,
            max_wait_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Readiness gate armed"
        );
        self.deadlines
            .insert(attempt_id.clone(), Deadline { generation, timer });
    }

    #[cfg(test)]
    fn is_armed(&self, attempt_id: &AttemptId) -> bool {
        self.deadlines.contains_key(attempt_id)
    }

    pub fn is_current(&self, attempt_id: &AttemptId, generation: u64) -> bool {
        self.deadlines
            .get(attempt_id)
            .is_some_and(|d| d.generation == generation)
    }

    pub fn disarm(&mut self, attempt_id: &AttemptId) {
        if let Some(deadline) = self.deadlines.remove(attempt_id) {
            deadline.timer.abort();
        }
    }

    /// Record the timeout for `attempt_id`. True only the first time.
    pub fn report_timeout(&mut self, attempt_id: &AttemptId) -> bool {
        self.disarm(attempt_id);
        self.reported.insert(attempt_id.clone())
    }

    #[cfg(test)]
    fn has_timed_out(&self, attempt_id: &AttemptId) -> bool {
        self.reported.contains(attempt_id)
    }

    /// Drop all state for a retired attempt.
    pub fn forget(&mut self, attempt_id: &AttemptId) {
        self.disarm(attempt_id);
        self.reported.remove(attempt_id);
    }
}
