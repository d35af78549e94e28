//! Capture engine.
//!
//! One engine instance per tab. A single task owns the attempt registry, the
//! fusion state, the stabilization scheduler and the readiness gate, and
//! processes [`EngineMessage`]s one at a time. Lease claims and snapshot
//! fetches run in spawned tasks that post their results back as messages, so
//! signals keep flowing while a probe is outstanding.
//!
//! A failure while handling one message is logged and never stops the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::diagnostics::{DiagnosticEmitter, DiagnosticEvent};
use super::predicate_registry::PredicateRegistry;
use super::probe_lease::ProbeLeaseCoordinator;
use super::readiness_gate::ReadinessGate;
use super::signal_fusion::{FusionEffect, SignalFusionEngine};
use super::stabilization::{StabilizationScheduler, TickAction};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttemptId, AttemptPhase, BlockingCondition, CaptureMeta, CaptureSource, ClaimOutcome, Config,
    ConversationId, Fidelity, InboundSignal, ReadinessDecision, Signal, StructuredSnapshot,
};
use crate::domain::ports::{LeaseStore, SnapshotFetcher};

const ENGINE_QUEUE_CAPACITY: usize = 1024;

/// Messages processed by the engine loop.
pub enum EngineMessage {
    /// A validated signal from a collaborator
    Signal(Signal),
    /// A wire-form signal still to be validated
    Inbound(InboundSignal),
    StabilizationDue {
        attempt_id: AttemptId,
        generation: u64,
    },
    GateDeadline {
        attempt_id: AttemptId,
        generation: u64,
    },
    LeaseClaimed {
        attempt_id: AttemptId,
        conversation_id: ConversationId,
        generation: u64,
        outcome: DomainResult<ClaimOutcome>,
    },
    ProbeFinished {
        attempt_id: AttemptId,
        conversation_id: ConversationId,
        generation: u64,
        result: DomainResult<StructuredSnapshot>,
    },
    Query(EngineQuery),
    Shutdown(oneshot::Sender<()>),
}

/// Read-only requests answered from the engine loop.
pub enum EngineQuery {
    Readiness {
        conversation_id: ConversationId,
        reply: oneshot::Sender<ReadinessDecision>,
    },
    CaptureMeta {
        conversation_id: ConversationId,
        reply: oneshot::Sender<CaptureMeta>,
    },
    Attempt {
        attempt_id: AttemptId,
        reply: oneshot::Sender<Option<AttemptView>>,
    },
    Resolve {
        attempt_id: AttemptId,
        reply: oneshot::Sender<AttemptId>,
    },
    Conversations {
        reply: oneshot::Sender<Vec<ConversationId>>,
    },
}

/// Point-in-time view of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptView {
    pub id: AttemptId,
    pub conversation_id: Option<ConversationId>,
    pub platform: Option<String>,
    pub phase: AttemptPhase,
    pub blocking_conditions: Vec<BlockingCondition>,
    pub alias_target: Option<AttemptId>,
    pub fetches: u32,
    pub lease_contentions: u32,
    pub stabilization_timed_out: bool,
    pub created_at: DateTime<Utc>,
}

/// Cloneable handle for submitting signals and querying readiness.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    pub async fn submit(&self, signal: Signal) -> DomainResult<()> {
        self.send(EngineMessage::Signal(signal)).await
    }

    /// Submit a wire-form signal; validation happens in the engine loop.
    pub async fn submit_inbound(&self, signal: InboundSignal) -> DomainResult<()> {
        self.send(EngineMessage::Inbound(signal)).await
    }

    async fn send(&self, message: EngineMessage) -> DomainResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| DomainError::EngineStopped)
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineQuery,
    ) -> DomainResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineMessage::Query(build(reply))).await?;
        rx.await.map_err(|_| DomainError::EngineStopped)
    }

    pub async fn resolve_readiness_decision(
        &self,
        conversation_id: &ConversationId,
    ) -> DomainResult<ReadinessDecision> {
        let conversation_id = conversation_id.clone();
        self.query(|reply| EngineQuery::Readiness {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn capture_meta(
        &self,
        conversation_id: &ConversationId,
    ) -> DomainResult<CaptureMeta> {
        let conversation_id = conversation_id.clone();
        self.query(|reply| EngineQuery::CaptureMeta {
            conversation_id,
            reply,
        })
        .await
    }

    /// The attempt exactly as named; follow [`Self::resolve`] for its successor.
    pub async fn attempt(&self, attempt_id: &AttemptId) -> DomainResult<Option<AttemptView>> {
        let attempt_id = attempt_id.clone();
        self.query(|reply| EngineQuery::Attempt { attempt_id, reply })
            .await
    }

    pub async fn resolve(&self, attempt_id: &AttemptId) -> DomainResult<AttemptId> {
        let attempt_id = attempt_id.clone();
        self.query(|reply| EngineQuery::Resolve { attempt_id, reply })
            .await
    }

    pub async fn conversations(&self) -> DomainResult<Vec<ConversationId>> {
        self.query(|reply| EngineQuery::Conversations { reply }).await
    }

    /// Stop the engine, cancelling timers and probes and releasing leases.
    pub async fn shutdown(&self) -> DomainResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineMessage::Shutdown(reply)).await?;
        rx.await.map_err(|_| DomainError::EngineStopped)
    }
}

/// Builder for an engine instance.
pub struct CaptureEngine {
    config: Config,
    lease_store: Arc<dyn LeaseStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    predicates: PredicateRegistry,
    diagnostics_sink: Option<mpsc::Sender<DiagnosticEvent>>,
}

impl CaptureEngine {
    pub fn new(
        config: Config,
        lease_store: Arc<dyn LeaseStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Self {
        Self {
            config,
            lease_store,
            fetcher,
            predicates: PredicateRegistry::default(),
            diagnostics_sink: None,
        }
    }

    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    /// Forward emitted diagnostic events to `sink`.
    pub fn with_diagnostics(mut self, sink: mpsc::Sender<DiagnosticEvent>) -> Self {
        self.diagnostics_sink = Some(sink);
        self
    }

    /// Start the engine loop on the current runtime.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(ENGINE_QUEUE_CAPACITY);
        let weak = tx.downgrade();

        let mut diagnostics = DiagnosticEmitter::new(&self.config.diagnostics);
        if let Some(sink) = self.diagnostics_sink {
            diagnostics = diagnostics.with_sink(sink);
        }

        let actor = EngineActor {
            fusion: SignalFusionEngine::new(&self.config.engine, self.predicates),
            scheduler: StabilizationScheduler::new(self.config.stabilization.clone(), weak.clone()),
            gate: ReadinessGate::new(&self.config.gate, weak.clone()),
            leases: ProbeLeaseCoordinator::new(self.lease_store, &self.config.lease),
            fetcher: self.fetcher,
            diagnostics,
            tx: weak,
        };
        let task = tokio::spawn(actor.run(rx));
        (EngineHandle { tx }, task)
    }
}

struct EngineActor {
    fusion: SignalFusionEngine,
    scheduler: StabilizationScheduler,
    gate: ReadinessGate,
    leases: ProbeLeaseCoordinator,
    fetcher: Arc<dyn SnapshotFetcher>,
    diagnostics: DiagnosticEmitter,
    tx: mpsc::WeakSender<EngineMessage>,
}

impl EngineActor {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineMessage>) {
        info!("Capture engine started");
        let mut shutdown_reply = None;
        while let Some(message) = rx.recv().await {
            if let EngineMessage::Shutdown(reply) = message {
                shutdown_reply = Some(reply);
                break;
            }
            if let Err(e) = self.handle(message) {
                self.report_error(e);
            }
        }
        rx.close();
        self.stop().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn stop(&mut self) {
        for (attempt_id, conversation_id) in self.scheduler.cancel_all() {
            self.leases.release(&conversation_id, &attempt_id).await;
        }
        info!(
            diagnostics_emitted = self.diagnostics.emitted(),
            diagnostics_suppressed = self.diagnostics.suppressed(),
            "Capture engine stopped"
        );
    }

    fn handle(&mut self, message: EngineMessage) -> DomainResult<()> {
        match message {
            EngineMessage::Signal(signal) => self.on_signal(signal),
            EngineMessage::Inbound(raw) => self.on_signal(Signal::try_from(raw)?),
            EngineMessage::StabilizationDue {
                attempt_id,
                generation,
            } => {
                self.on_stabilization_due(&attempt_id, generation);
                Ok(())
            }
            EngineMessage::GateDeadline {
                attempt_id,
                generation,
            } => {
                if self.gate.is_current(&attempt_id, generation)
                    && self.fusion.needs_stabilization(&attempt_id)
                {
                    self.report_timeout(&attempt_id, "max wait elapsed");
                }
                Ok(())
            }
            EngineMessage::LeaseClaimed {
                attempt_id,
                conversation_id,
                generation,
                outcome,
            } => {
                self.on_lease_claimed(attempt_id, conversation_id, generation, outcome);
                Ok(())
            }
            EngineMessage::ProbeFinished {
                attempt_id,
                conversation_id,
                generation,
                result,
            } => {
                self.on_probe_finished(attempt_id, conversation_id, generation, result);
                Ok(())
            }
            EngineMessage::Query(query) => {
                self.answer(query);
                Ok(())
            }
            EngineMessage::Shutdown(reply) => {
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    fn report_error(&mut self, err: DomainError) {
        match err {
            DomainError::StaleSignal { attempt_id, reason } => {
                self.diagnostics.emit(DiagnosticEvent::stale_signal(
                    Some(&AttemptId::new(attempt_id)),
                    reason,
                ));
            }
            DomainError::MalformedSignal(reason) => {
                self.diagnostics
                    .emit(DiagnosticEvent::malformed_signal(reason));
            }
            other => error!(error = %other, "Failed to process engine message"),
        }
    }

    fn on_signal(&mut self, signal: Signal) -> DomainResult<()> {
        debug!(kind = signal.kind(), attempt_id = ?signal.attempt_id(), "Signal received");
        let effects = self.fusion.ingest(signal)?;
        self.apply(effects);
        Ok(())
    }

    fn apply(&mut self, effects: Vec<FusionEffect>) {
        for effect in effects {
            match effect {
                FusionEffect::PhaseChanged {
                    attempt_id,
                    conversation_id,
                    from,
                    to,
                } => {
                    self.diagnostics.emit(DiagnosticEvent::phase_transition(
                        &attempt_id,
                        conversation_id.as_ref(),
                        from,
                        to,
                    ));
                }
                FusionEffect::ScheduleStabilization { attempt_id } => {
                    if self.scheduler.schedule(&attempt_id) {
                        self.gate.arm(&attempt_id);
                    }
                }
                FusionEffect::CancelStabilization { attempt_id } => {
                    self.stop_stabilization(&attempt_id);
                    self.gate.disarm(&attempt_id);
                }
                FusionEffect::AttemptRetired(retired) => {
                    self.diagnostics
                        .emit(DiagnosticEvent::attempt_retired(&retired));
                    self.stop_stabilization(&retired.attempt_id);
                    self.gate.forget(&retired.attempt_id);
                }
                FusionEffect::SignalDropped { attempt_id, reason } => {
                    self.diagnostics
                        .emit(DiagnosticEvent::stale_signal(attempt_id.as_ref(), reason));
                }
            }
        }
    }

    fn stop_stabilization(&mut self, attempt_id: &AttemptId) {
        if let Some(conversation_id) = self.scheduler.cancel(attempt_id) {
            self.spawn_release(conversation_id, attempt_id.clone());
        }
    }

    fn spawn_release(&self, conversation_id: ConversationId, attempt_id: AttemptId) {
        let leases = self.leases.clone();
        tokio::spawn(async move {
            leases.release(&conversation_id, &attempt_id).await;
        });
    }

    fn report_timeout(&mut self, attempt_id: &AttemptId, cause: &str) {
        if !self.gate.report_timeout(attempt_id) {
            return;
        }
        let conversation_id = self
            .fusion
            .attempt(attempt_id)
            .and_then(|a| a.conversation_id.clone());
        self.stop_stabilization(attempt_id);
        self.diagnostics.emit(DiagnosticEvent::stabilization_timeout(
            attempt_id,
            conversation_id.as_ref(),
            self.scheduler.fetches(attempt_id),
            cause,
        ));
        let effects = self.fusion.on_stabilization_timeout(attempt_id);
        self.apply(effects);
    }

    fn fail_probe(&mut self, attempt_id: &AttemptId) {
        if self.scheduler.after_failure(attempt_id) {
            self.report_timeout(attempt_id, "retries exhausted");
        }
    }

    fn on_stabilization_due(&mut self, attempt_id: &AttemptId, generation: u64) {
        match self.scheduler.begin_tick(attempt_id, generation) {
            TickAction::Skip => return,
            TickAction::Exhausted => {
                self.report_timeout(attempt_id, "retries exhausted");
                return;
            }
            TickAction::Probe => {}
        }
        if !self.fusion.needs_stabilization(attempt_id) {
            debug!(attempt_id = %attempt_id, "Stabilization no longer needed");
            self.stop_stabilization(attempt_id);
            self.gate.disarm(attempt_id);
            return;
        }

        let Some(conversation_id) = self
            .fusion
            .attempt(attempt_id)
            .and_then(|a| a.conversation_id.clone())
        else {
            debug!(attempt_id = %attempt_id, "Conversation unknown; fetch skipped");
            self.scheduler.record_fetch(attempt_id);
            self.fail_probe(attempt_id);
            return;
        };

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let leases = self.leases.clone();
        let id = attempt_id.clone();
        let claim = tokio::spawn(async move {
            let outcome = leases.claim(&conversation_id, &id).await;
            let _ = tx
                .send(EngineMessage::LeaseClaimed {
                    attempt_id: id,
                    conversation_id,
                    generation,
                    outcome,
                })
                .await;
        });
        self.scheduler.attach_probe(attempt_id, claim);
    }

    fn on_lease_claimed(
        &mut self,
        attempt_id: AttemptId,
        conversation_id: ConversationId,
        generation: u64,
        outcome: DomainResult<ClaimOutcome>,
    ) {
        self.scheduler.probe_finished(&attempt_id);
        let current = self.scheduler.is_current(&attempt_id, generation)
            && self.fusion.needs_stabilization(&attempt_id);
        if !current {
            if matches!(&outcome, Ok(o) if o.acquired) {
                self.spawn_release(conversation_id, attempt_id);
            }
            return;
        }

        match outcome {
            Ok(o) if !o.acquired => {
                self.fusion.set_lease_contended(&attempt_id, true);
                self.diagnostics.emit(DiagnosticEvent::lease_contention(
                    &attempt_id,
                    &conversation_id,
                    o.owner_attempt_id.as_ref(),
                ));
                let delay = self.leases.retry_delay(&o);
                self.scheduler.after_contention(&attempt_id, delay);
                return;
            }
            Ok(_) => {
                self.fusion.set_lease_contended(&attempt_id, false);
                self.scheduler
                    .hold_lease(&attempt_id, conversation_id.clone());
            }
            Err(e) => {
                warn!(
                    attempt_id = %attempt_id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "Lease store unavailable; probing without a lease"
                );
            }
        }

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.scheduler.record_fetch(&attempt_id);
        let fetcher = Arc::clone(&self.fetcher);
        let id = attempt_id.clone();
        let probe = tokio::spawn(async move {
            let result = fetcher.fetch(&conversation_id).await;
            let _ = tx
                .send(EngineMessage::ProbeFinished {
                    attempt_id: id,
                    conversation_id,
                    generation,
                    result,
                })
                .await;
        });
        self.scheduler.attach_probe(&attempt_id, probe);
    }

    fn on_probe_finished(
        &mut self,
        attempt_id: AttemptId,
        conversation_id: ConversationId,
        generation: u64,
        result: DomainResult<StructuredSnapshot>,
    ) {
        self.scheduler.probe_finished(&attempt_id);
        if let Some(leased) = self.scheduler.take_lease(&attempt_id) {
            self.spawn_release(leased, attempt_id.clone());
        }
        if !self.scheduler.is_current(&attempt_id, generation)
            || !self.fusion.needs_stabilization(&attempt_id)
        {
            debug!(attempt_id = %attempt_id, "Probe result no longer needed");
            return;
        }

        match result {
            Ok(snapshot) => {
                let sample = Signal::CanonicalSample {
                    conversation_id,
                    snapshot,
                    attempt_id: Some(attempt_id.clone()),
                    fidelity: Fidelity::High,
                    source: CaptureSource::AuthoritativeApi,
                };
                match self.fusion.ingest(sample) {
                    Ok(effects) => self.apply(effects),
                    Err(e) => self.report_error(e),
                }
                if !self.fusion.needs_stabilization(&attempt_id) {
                    return;
                }
                debug!(attempt_id = %attempt_id, "Fetched snapshot not ready yet");
            }
            Err(e) => {
                self.diagnostics.emit(DiagnosticEvent::probe_failed(
                    &attempt_id,
                    &conversation_id,
                    e.to_string(),
                ));
            }
        }
        self.fail_probe(&attempt_id);
    }

    fn view(&self, attempt_id: &AttemptId) -> Option<AttemptView> {
        let attempt = self.fusion.attempt(attempt_id)?;
        Some(AttemptView {
            id: attempt.id.clone(),
            conversation_id: attempt.conversation_id.clone(),
            platform: attempt.platform.clone(),
            phase: attempt.phase,
            blocking_conditions: attempt.blocking_conditions.iter().copied().collect(),
            alias_target: attempt.alias_target.clone(),
            fetches: self.scheduler.fetches(attempt_id),
            lease_contentions: self.scheduler.contentions(attempt_id),
            stabilization_timed_out: attempt.stabilization_timed_out,
            created_at: attempt.created_at,
        })
    }

    fn answer(&mut self, query: EngineQuery) {
        match query {
            EngineQuery::Readiness {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.fusion.decide(&conversation_id));
            }
            EngineQuery::CaptureMeta {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.fusion.capture_meta(&conversation_id));
            }
            EngineQuery::Attempt { attempt_id, reply } => {
                let _ = reply.send(self.view(&attempt_id));
            }
            EngineQuery::Resolve { attempt_id, reply } => {
                let _ = reply.send(self.fusion.resolve(&attempt_id));
            }
            EngineQuery::Conversations { reply } => {
                let _ = reply.send(self.fusion.conversations());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryLeaseStore, ScriptedSnapshotFetcher};
    use crate::domain::models::{LifecyclePhase, ReadinessMode};

    fn spawn_engine() -> (EngineHandle, ScriptedSnapshotFetcher) {
        let fetcher = ScriptedSnapshotFetcher::new();
        let (handle, _task) = CaptureEngine::new(
            Config::default(),
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(fetcher.clone()),
        )
        .spawn();
        (handle, fetcher)
    }

    #[tokio::test]
    async fn test_malformed_signal_does_not_stop_engine() {
        let (engine, _) = spawn_engine();
        let bad = InboundSignal::from_json(r#"{"kind":"lifecycle","phase":"streaming"}"#).unwrap();
        engine.submit_inbound(bad).await.unwrap();
        engine
            .submit(Signal::lifecycle("a1", LifecyclePhase::PromptSent, Some("c1"), "chatgpt"))
            .await
            .unwrap();

        let view = engine.attempt(&AttemptId::new("a1")).await.unwrap().unwrap();
        assert_eq!(view.phase, AttemptPhase::Active);
        let decision = engine
            .resolve_readiness_decision(&ConversationId::new("c1"))
            .await
            .unwrap();
        assert_eq!(decision.mode, ReadinessMode::Awaiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_accepts_fetched_snapshot() {
        let (engine, fetcher) = spawn_engine();
        let conv = ConversationId::new("c1");
        fetcher
            .push_snapshot(
                &conv,
                serde_json::json!({
                    "messages": [{"role": "assistant", "content": "ok", "status": "finished"}]
                }),
            )
            .await;

        engine
            .submit(Signal::lifecycle("a1", LifecyclePhase::Completed, Some("c1"), "chatgpt"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        let decision = engine.resolve_readiness_decision(&conv).await.unwrap();
        assert_eq!(decision.mode, ReadinessMode::CanonicalReady);
        let view = engine.attempt(&AttemptId::new("a1")).await.unwrap().unwrap();
        assert_eq!(view.fetches, 1);
        assert_eq!(fetcher.calls(&conv).await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let (engine, _) = spawn_engine();
        engine.shutdown().await.unwrap();
        assert!(matches!(
            engine.conversations().await,
            Err(DomainError::EngineStopped)
        ));
    }
}
