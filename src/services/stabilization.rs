//! Canonical stabilization scheduler.
//!
//! Retries the authoritative fetch for an attempt on a fixed interval until a
//! snapshot is accepted or `max_retries` fetches have been made. Lease
//! contention reschedules without spending a retry.
//!
//! The scheduler only tracks retry bookkeeping and timers; the engine loop
//! decides what a tick does.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::bounded_map::BoundedMap;
use super::engine::EngineMessage;
use crate::domain::models::{AttemptId, ConversationId, StabilizationConfig};

const HISTORY_CAPACITY: usize = 256;

/// What a due tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// The tick is outdated or the attempt is no longer scheduled
    Skip,
    /// Every retry has been spent
    Exhausted,
    /// Claim the lease and fetch
    Probe,
}

#[derive(Debug, Default)]
struct RetryState {
    fetches: u32,
    contentions: u32,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
    lease: Option<ConversationId>,
}

impl RetryState {
    fn abort_tasks(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

/// Retry bookkeeping and timers for every attempt being stabilized.
#[derive(Debug)]
pub struct StabilizationScheduler {
    config: StabilizationConfig,
    states: HashMap<AttemptId, RetryState>,
    /// (fetches, contentions) for attempts no longer scheduled
    history: BoundedMap<AttemptId, (u32, u32)>,
    next_generation: u64,
    tx: mpsc::WeakSender<EngineMessage>,
}

impl StabilizationScheduler {
    pub fn new(config: StabilizationConfig, tx: mpsc::WeakSender<EngineMessage>) -> Self {
        Self {
            config,
            states: HashMap::new(),
            history: BoundedMap::new(HISTORY_CAPACITY),
            next_generation: 0,
            tx,
        }
    }

    /// Begin stabilizing `attempt_id` after the initial delay. Returns false
    /// when it is already scheduled.
    pub fn schedule(&mut self, attempt_id: &AttemptId) -> bool {
        if self.states.contains_key(attempt_id) || self.history.contains_key(attempt_id) {
            return false;
        }
        self.states.insert(attempt_id.clone(), RetryState::default());
        self.arm(attempt_id, self.config.initial_delay());
        true
    }

    fn arm(&mut self, attempt_id: &AttemptId, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(state) = self.states.get_mut(attempt_id) else {
            return;
        };
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation = generation;

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let id = attempt_id.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(EngineMessage::StabilizationDue {
                    attempt_id: id,
                    generation,
                })
                .await;
        }));
    }

    pub fn is_current(&self, attempt_id: &AttemptId, generation: u64) -> bool {
        self.states
            .get(attempt_id)
            .is_some_and(|s| s.generation == generation)
    }

    /// Classify a due tick.
    pub fn begin_tick(&mut self, attempt_id: &AttemptId, generation: u64) -> TickAction {
        let max = self.config.max_retries;
        match self.states.get_mut(attempt_id) {
            Some(state) if state.generation == generation => {
                state.timer = None;
                if state.fetches >= max {
                    TickAction::Exhausted
                } else {
                    TickAction::Probe
                }
            }
            _ => TickAction::Skip,
        }
    }

    /// Count a fetch against the retry budget.
    pub fn record_fetch(&mut self, attempt_id: &AttemptId) {
        if let Some(state) = self.states.get_mut(attempt_id) {
            state.fetches += 1;
        }
    }

    pub fn attach_probe(&mut self, attempt_id: &AttemptId, probe: JoinHandle<()>) {
        match self.states.get_mut(attempt_id) {
            Some(state) => state.probe = Some(probe),
            None => probe.abort(),
        }
    }

    pub fn probe_finished(&mut self, attempt_id: &AttemptId) {
        if let Some(state) = self.states.get_mut(attempt_id) {
            state.probe = None;
        }
    }

    pub fn hold_lease(&mut self, attempt_id: &AttemptId, conversation_id: ConversationId) {
        if let Some(state) = self.states.get_mut(attempt_id) {
            state.lease = Some(conversation_id);
        }
    }

    /// Forget the lease held for `attempt_id`, returning its conversation.
    pub fn take_lease(&mut self, attempt_id: &AttemptId) -> Option<ConversationId> {
        self.states.get_mut(attempt_id)?.lease.take()
    }

    /// A probe failed or was rejected. Returns true when no retries remain;
    /// otherwise the next tick is armed after the retry interval.
    pub fn after_failure(&mut self, attempt_id: &AttemptId) -> bool {
        let Some(state) = self.states.get(attempt_id) else {
            return false;
        };
        if state.fetches >= self.config.max_retries {
            return true;
        }
        self.arm(attempt_id, self.config.retry_interval());
        false
    }

    /// The lease was held elsewhere; try again after `delay` without
    /// spending a retry.
    pub fn after_contention(&mut self, attempt_id: &AttemptId, delay: Duration) {
        if let Some(state) = self.states.get_mut(attempt_id) {
            state.contentions += 1;
        }
        self.arm(attempt_id, delay);
    }

    fn counters(&self, attempt_id: &AttemptId) -> (u32, u32) {
        self.states
            .get(attempt_id)
            .map(|s| (s.fetches, s.contentions))
            .or_else(|| self.history.get(attempt_id).copied())
            .unwrap_or((0, 0))
    }

    /// Fetches made for `attempt_id`, including after it stopped.
    pub fn fetches(&self, attempt_id: &AttemptId) -> u32 {
        self.counters(attempt_id).0
    }

    pub fn contentions(&self, attempt_id: &AttemptId) -> u32 {
        self.counters(attempt_id).1
    }

    /// Stop stabilizing `attempt_id`: abort its timer and in-flight probe.
    /// Returns the conversation whose lease the caller must release, if any.
    pub fn cancel(&mut self, attempt_id: &AttemptId) -> Option<ConversationId> {
        let mut state = self.states.remove(attempt_id)?;
        state.abort_tasks();
        self.history
            .insert(attempt_id.clone(), (state.fetches, state.contentions));
        self.history.evict_oldest_if_over_capacity();
        state.lease
    }

    /// Cancel everything; returns the leases still held.
    pub fn cancel_all(&mut self) -> Vec<(AttemptId, ConversationId)> {
        let ids: Vec<AttemptId> = self.states.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.cancel(&id).map(|conv| (id, conv)))
            .collect()
    }
}

impl Drop for StabilizationScheduler {
    fn drop(&mut self) {
        for state in self.states.values_mut() {
            state.abort_tasks();
        }
    }
}
