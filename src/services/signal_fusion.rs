//! Signal fusion engine.
//!
//! Folds lifecycle hints, captured snapshots, conversation resolution and
//! disposal into one phase per attempt, and derives the readiness decision
//! for a conversation from that phase plus the samples held for it.
//!
//! Everything here is synchronous. Work that has to outlive a single signal
//! (stabilization retries, lease cleanup) is returned as [`FusionEffect`]s for
//! the engine loop to carry out.

use tracing::debug;

use super::attempt_registry::{AttemptLookup, AttemptRegistry, BindOutcome, RetiredAttempt};
use super::bounded_map::BoundedMap;
use super::predicate_registry::PredicateRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Attempt, AttemptId, AttemptPhase, BlockingCondition, CaptureMeta, CaptureSource,
    CapturedSample, ConversationId, EngineConfig, Fidelity, LifecyclePhase, ReadinessDecision,
    ReadinessMode, ReadinessReason, RetireReason, Signal, StructuredSnapshot,
};

/// Follow-up work produced while ingesting a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionEffect {
    /// An attempt moved between live phases
    PhaseChanged {
        attempt_id: AttemptId,
        conversation_id: Option<ConversationId>,
        from: AttemptPhase,
        to: AttemptPhase,
    },
    /// Attempt entered `awaiting_canonical` without an accepted snapshot
    ScheduleStabilization { attempt_id: AttemptId },
    /// Attempt no longer needs stabilization
    CancelStabilization { attempt_id: AttemptId },
    /// Attempt was disposed, superseded or evicted
    AttemptRetired(RetiredAttempt),
    /// Signal was discarded after partial processing
    SignalDropped {
        attempt_id: Option<AttemptId>,
        reason: String,
    },
}

/// Samples held for one conversation, one slot per fidelity tier.
#[derive(Debug, Default, Clone)]
struct CaptureSlot {
    high: Option<CapturedSample>,
    degraded: Option<CapturedSample>,
}

fn supersedes(incoming: &CapturedSample, held: &CapturedSample) -> bool {
    match (incoming.verdict.ready, held.verdict.ready) {
        (true, false) => true,
        (false, true) => false,
        _ => incoming.verdict.latest_length >= held.verdict.latest_length,
    }
}

impl CaptureSlot {
    /// Hold `sample` unless it is older or less complete than what is held.
    fn hold(&mut self, sample: CapturedSample) -> bool {
        let slot = match sample.fidelity {
            Fidelity::High => &mut self.high,
            Fidelity::Degraded => &mut self.degraded,
        };
        if slot.as_ref().is_some_and(|held| !supersedes(&sample, held)) {
            return false;
        }
        *slot = Some(sample);
        true
    }

    fn accepted_high(&self) -> Option<&CapturedSample> {
        self.high.as_ref().filter(|s| s.is_canonical())
    }

    fn rejected_high(&self) -> bool {
        self.high.as_ref().is_some_and(|s| !s.verdict.ready)
    }

    /// Drop samples not attributed to `attempt_id`.
    fn retain_for(&mut self, attempt_id: &AttemptId) {
        for slot in [&mut self.high, &mut self.degraded] {
            if slot
                .as_ref()
                .is_some_and(|s| s.attempt_id.as_ref() != Some(attempt_id))
            {
                *slot = None;
            }
        }
    }

    fn meta(&self) -> CaptureMeta {
        self.high
            .as_ref()
            .or(self.degraded.as_ref())
            .map_or_else(CaptureMeta::empty, CapturedSample::to_meta)
    }
}

/// Synchronous fusion core. Owned by exactly one engine loop.
#[derive(Debug)]
pub struct SignalFusionEngine {
    registry: AttemptRegistry,
    captures: BoundedMap<ConversationId, CaptureSlot>,
    predicates: PredicateRegistry,
}

impl SignalFusionEngine {
    pub fn new(config: &EngineConfig, predicates: PredicateRegistry) -> Self {
        Self {
            registry: AttemptRegistry::new(config),
            captures: BoundedMap::new(config.conversation_capacity),
            predicates,
        }
    }

    pub fn registry(&self) -> &AttemptRegistry {
        &self.registry
    }

    pub fn attempt(&self, attempt_id: &AttemptId) -> Option<&Attempt> {
        self.registry.get(attempt_id)
    }

    pub fn resolve(&mut self, attempt_id: &AttemptId) -> AttemptId {
        self.registry.resolve(attempt_id)
    }

    /// Apply one signal. Stale and malformed signals leave state untouched.
    pub fn ingest(&mut self, signal: Signal) -> DomainResult<Vec<FusionEffect>> {
        match signal {
            Signal::Lifecycle {
                attempt_id,
                phase,
                conversation_id,
                platform,
            } => self.on_lifecycle(&attempt_id, phase, conversation_id.as_ref(), &platform),
            Signal::CanonicalSample {
                conversation_id,
                snapshot,
                attempt_id,
                fidelity,
                source,
            } => self.on_sample(&conversation_id, snapshot, attempt_id, fidelity, source),
            Signal::ConversationResolved {
                attempt_id,
                conversation_id,
            } => self.on_resolved(&attempt_id, &conversation_id),
            Signal::Disposed { attempt_id, reason } => self.on_disposed(&attempt_id, reason),
        }
    }

    fn ensure_attempt(
        &mut self,
        attempt_id: &AttemptId,
        platform: Option<&str>,
    ) -> DomainResult<Vec<FusionEffect>> {
        match self.registry.lookup(attempt_id) {
            AttemptLookup::Live => {
                if let (Some(p), Some(attempt)) = (platform, self.registry.get_mut(attempt_id)) {
                    if attempt.platform.is_none() {
                        attempt.platform = Some(p.to_string());
                    }
                }
                Ok(Vec::new())
            }
            AttemptLookup::Retired(phase) => Err(DomainError::stale(
                attempt_id.as_str(),
                format!("attempt is {phase}"),
            )),
            AttemptLookup::Unknown => {
                debug!(attempt_id = %attempt_id, platform = ?platform, "Tracking new attempt");
                Ok(self
                    .registry
                    .create(attempt_id.clone(), platform)
                    .into_iter()
                    .map(FusionEffect::AttemptRetired)
                    .collect())
            }
        }
    }

    /// Bind and report whether `attempt_id` is still live afterwards.
    fn bind(
        &mut self,
        conversation_id: &ConversationId,
        attempt_id: &AttemptId,
        effects: &mut Vec<FusionEffect>,
    ) -> DomainResult<bool> {
        let mut retired = Vec::new();
        let outcome = self
            .registry
            .bind(conversation_id, attempt_id, &mut retired)
            .ok_or_else(|| DomainError::stale(attempt_id.as_str(), "attempt is not live"))?;
        effects.extend(retired.into_iter().map(FusionEffect::AttemptRetired));

        match outcome {
            BindOutcome::AlreadyBound => Ok(true),
            BindOutcome::Bound | BindOutcome::Superseded { .. } => {
                if let Some(slot) = self.captures.get_mut(conversation_id) {
                    slot.retain_for(attempt_id);
                }
                Ok(true)
            }
            BindOutcome::Stale { winner } => {
                effects.push(FusionEffect::SignalDropped {
                    attempt_id: Some(attempt_id.clone()),
                    reason: format!(
                        "conversation {conversation_id} already owned by newer attempt {winner}"
                    ),
                });
                Ok(false)
            }
        }
    }

    fn advance(
        &mut self,
        attempt_id: &AttemptId,
        next: AttemptPhase,
        effects: &mut Vec<FusionEffect>,
    ) -> bool {
        let Some(attempt) = self.registry.get_mut(attempt_id) else {
            return false;
        };
        let from = attempt.phase;
        if from == next || attempt.transition_to(next).is_err() {
            return false;
        }
        effects.push(FusionEffect::PhaseChanged {
            attempt_id: attempt_id.clone(),
            conversation_id: attempt.conversation_id.clone(),
            from,
            to: next,
        });
        true
    }

    fn slot_for(&self, attempt_id: &AttemptId) -> Option<&CaptureSlot> {
        let conversation_id = self.registry.get(attempt_id)?.conversation_id.as_ref()?;
        self.captures.get(conversation_id)
    }

    fn promote_canonical(&mut self, attempt_id: &AttemptId, effects: &mut Vec<FusionEffect>) {
        if !self.advance(attempt_id, AttemptPhase::CanonicalReady, effects) {
            return;
        }
        if let Some(attempt) = self.registry.get_mut(attempt_id) {
            attempt.cached_decision = Some(ReadinessDecision::new(
                ReadinessMode::CanonicalReady,
                ReadinessReason::CanonicalAccepted,
            ));
        }
        effects.push(FusionEffect::CancelStabilization {
            attempt_id: attempt_id.clone(),
        });
    }

    fn degrade(&mut self, attempt_id: &AttemptId, effects: &mut Vec<FusionEffect>) {
        if !self.advance(attempt_id, AttemptPhase::DegradedReady, effects) {
            return;
        }
        if let Some(attempt) = self.registry.get_mut(attempt_id) {
            attempt.cached_decision = Some(
                ReadinessDecision::new(
                    ReadinessMode::DegradedManualOnly,
                    ReadinessReason::StabilizationTimeout,
                )
                .with_blocking(attempt.blocking_conditions.iter().copied()),
            );
        }
    }

    /// Re-examine held samples after the attempt's phase or binding changed.
    fn reconcile_held(&mut self, attempt_id: &AttemptId, effects: &mut Vec<FusionEffect>) {
        let Some(phase) = self.registry.get(attempt_id).map(|a| a.phase) else {
            return;
        };
        if !matches!(phase, AttemptPhase::AwaitingCanonical | AttemptPhase::DegradedReady) {
            return;
        }
        let (accepted, rejected) = self
            .slot_for(attempt_id)
            .map_or((false, false), |s| (s.accepted_high().is_some(), s.rejected_high()));
        if accepted {
            self.promote_canonical(attempt_id, effects);
        } else if rejected {
            if let Some(attempt) = self.registry.get_mut(attempt_id) {
                attempt
                    .blocking_conditions
                    .insert(BlockingCondition::PredicateRejected);
            }
        }
    }

    fn on_lifecycle(
        &mut self,
        attempt_id: &AttemptId,
        phase: LifecyclePhase,
        conversation_id: Option<&ConversationId>,
        platform: &str,
    ) -> DomainResult<Vec<FusionEffect>> {
        // Only prompt-sent and streaming may open a generation over a live one.
        if !phase.is_activity() && self.registry.lookup(attempt_id) == AttemptLookup::Unknown {
            if let Some(owner) = conversation_id.and_then(|c| self.registry.live_attempt(c)) {
                return Err(DomainError::stale(
                    attempt_id.as_str(),
                    format!("unknown attempt; conversation owned by {}", owner.id),
                ));
            }
        }

        let mut effects = self.ensure_attempt(attempt_id, Some(platform))?;
        if let Some(conversation_id) = conversation_id {
            if !self.bind(conversation_id, attempt_id, &mut effects)? {
                return Ok(effects);
            }
        }

        self.advance(attempt_id, AttemptPhase::Active, &mut effects);
        if phase.is_finish()
            && self.advance(attempt_id, AttemptPhase::AwaitingCanonical, &mut effects)
        {
            self.reconcile_held(attempt_id, &mut effects);
            let promoted = self
                .registry
                .get(attempt_id)
                .is_some_and(|a| a.phase == AttemptPhase::CanonicalReady);
            if !promoted {
                effects.push(FusionEffect::ScheduleStabilization {
                    attempt_id: attempt_id.clone(),
                });
            }
        }
        Ok(effects)
    }

    fn on_sample(
        &mut self,
        conversation_id: &ConversationId,
        snapshot: StructuredSnapshot,
        attempt_id: Option<AttemptId>,
        fidelity: Fidelity,
        source: CaptureSource,
    ) -> DomainResult<Vec<FusionEffect>> {
        let mut effects = Vec::new();

        if let Some(named) = &attempt_id {
            match self.registry.lookup(named) {
                AttemptLookup::Retired(phase) => {
                    return Err(DomainError::stale(named.as_str(), format!("attempt is {phase}")));
                }
                AttemptLookup::Live => {
                    let bound_to = self
                        .registry
                        .get(named)
                        .and_then(|a| a.conversation_id.clone());
                    match bound_to {
                        Some(c) if &c != conversation_id => {
                            return Err(DomainError::stale(
                                named.as_str(),
                                format!("attempt is bound to conversation {c}"),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            if !self.bind(conversation_id, named, &mut effects)? {
                                return Ok(effects);
                            }
                        }
                    }
                }
                AttemptLookup::Unknown => {}
            }
        }

        let target = self.registry.live_attempt(conversation_id).map(|a| a.id.clone());
        let platform = target
            .as_ref()
            .and_then(|id| self.registry.get(id))
            .and_then(|a| a.platform.clone());
        let verdict = self.predicates.evaluate(platform.as_deref(), &snapshot);

        let sample = CapturedSample {
            snapshot,
            fidelity,
            source,
            verdict,
            attempt_id: attempt_id.or_else(|| target.clone()),
            captured_at: chrono::Utc::now(),
        };
        let accepted = sample.is_canonical();

        if !self.captures.contains_key(conversation_id) {
            self.captures
                .insert(conversation_id.clone(), CaptureSlot::default());
            self.captures.evict_oldest_if_over_capacity();
        }
        let held = self
            .captures
            .get_mut(conversation_id)
            .is_some_and(|slot| slot.hold(sample));
        debug!(
            conversation_id = %conversation_id,
            fidelity = fidelity.as_str(),
            accepted,
            held,
            "Ingested capture sample"
        );

        let Some(target) = target else {
            return Ok(effects);
        };
        let (phase, timed_out) = match self.registry.get(&target) {
            Some(a) => (a.phase, a.stabilization_timed_out),
            None => return Ok(effects),
        };

        match fidelity {
            Fidelity::High => self.reconcile_held(&target, &mut effects),
            Fidelity::Degraded if phase == AttemptPhase::AwaitingCanonical && timed_out => {
                self.degrade(&target, &mut effects);
            }
            Fidelity::Degraded => {}
        }
        Ok(effects)
    }

    fn on_resolved(
        &mut self,
        attempt_id: &AttemptId,
        conversation_id: &ConversationId,
    ) -> DomainResult<Vec<FusionEffect>> {
        if self.registry.lookup(attempt_id) == AttemptLookup::Unknown {
            return Err(DomainError::stale(attempt_id.as_str(), "unknown attempt"));
        }
        let mut effects = self.ensure_attempt(attempt_id, None)?;
        if self.bind(conversation_id, attempt_id, &mut effects)? {
            self.reconcile_held(attempt_id, &mut effects);
        }
        Ok(effects)
    }

    fn on_disposed(
        &mut self,
        attempt_id: &AttemptId,
        reason: String,
    ) -> DomainResult<Vec<FusionEffect>> {
        match self.registry.lookup(attempt_id) {
            AttemptLookup::Live => Ok(self
                .registry
                .retire(attempt_id, RetireReason::Disposed(reason))
                .map(FusionEffect::AttemptRetired)
                .into_iter()
                .collect()),
            AttemptLookup::Retired(_) => {
                debug!(attempt_id = %attempt_id, "Attempt already retired; disposal ignored");
                Ok(Vec::new())
            }
            AttemptLookup::Unknown => {
                Err(DomainError::stale(attempt_id.as_str(), "unknown attempt"))
            }
        }
    }

    /// The readiness gate gave up waiting for a canonical snapshot.
    pub fn on_stabilization_timeout(&mut self, attempt_id: &AttemptId) -> Vec<FusionEffect> {
        let mut effects = Vec::new();
        let Some(attempt) = self.registry.get_mut(attempt_id) else {
            return effects;
        };
        if attempt.phase != AttemptPhase::AwaitingCanonical || attempt.stabilization_timed_out {
            return effects;
        }
        attempt.stabilization_timed_out = true;
        attempt
            .blocking_conditions
            .insert(BlockingCondition::StabilizationExhausted);
        attempt
            .blocking_conditions
            .remove(&BlockingCondition::LeaseContended);

        let has_degraded = self
            .slot_for(attempt_id)
            .is_some_and(|s| s.degraded.is_some());
        if has_degraded {
            self.degrade(attempt_id, &mut effects);
        }
        effects
    }

    pub fn set_lease_contended(&mut self, attempt_id: &AttemptId, contended: bool) {
        if let Some(attempt) = self.registry.get_mut(attempt_id).filter(|a| a.is_live()) {
            if contended {
                attempt
                    .blocking_conditions
                    .insert(BlockingCondition::LeaseContended);
            } else {
                attempt
                    .blocking_conditions
                    .remove(&BlockingCondition::LeaseContended);
            }
        }
    }

    /// Whether stabilization for `attempt_id` still has anything to do.
    pub fn needs_stabilization(&self, attempt_id: &AttemptId) -> bool {
        self.registry.get(attempt_id).is_some_and(|a| {
            a.phase == AttemptPhase::AwaitingCanonical && !a.stabilization_timed_out
        })
    }

    /// Recompute the readiness decision for a conversation.
    pub fn decide(&self, conversation_id: &ConversationId) -> ReadinessDecision {
        let slot = self.captures.get(conversation_id);
        let Some(attempt) = self.registry.bound_attempt(conversation_id) else {
            return match slot {
                None => ReadinessDecision::unknown(),
                Some(s) if s.accepted_high().is_some() => ReadinessDecision::new(
                    ReadinessMode::CanonicalReady,
                    ReadinessReason::CanonicalAccepted,
                ),
                Some(s) if s.degraded.is_some() => ReadinessDecision::new(
                    ReadinessMode::DegradedManualOnly,
                    ReadinessReason::NoAttempt,
                ),
                Some(_) => {
                    ReadinessDecision::new(ReadinessMode::Unknown, ReadinessReason::NoSnapshot)
                }
            };
        };

        let blocking = attempt.blocking_conditions.iter().copied();
        match attempt.phase {
            AttemptPhase::Disposed | AttemptPhase::Superseded => {
                ReadinessDecision::new(ReadinessMode::Unknown, ReadinessReason::AttemptDisposed)
            }
            AttemptPhase::Pending | AttemptPhase::Active => {
                ReadinessDecision::new(
                    ReadinessMode::Awaiting,
                    ReadinessReason::GenerationInProgress,
                )
                .with_blocking(blocking)
            }
            AttemptPhase::AwaitingCanonical if attempt.stabilization_timed_out => {
                ReadinessDecision::new(
                    ReadinessMode::DegradedManualOnly,
                    ReadinessReason::StabilizationTimeout,
                )
                .with_blocking(blocking)
            }
            AttemptPhase::AwaitingCanonical => {
                let reason = if attempt
                    .blocking_conditions
                    .contains(&BlockingCondition::PredicateRejected)
                {
                    ReadinessReason::PredicateRejected
                } else {
                    ReadinessReason::AwaitingCanonical
                };
                ReadinessDecision::new(ReadinessMode::Awaiting, reason).with_blocking(blocking)
            }
            AttemptPhase::CanonicalReady => attempt.cached_decision.clone().unwrap_or_else(|| {
                ReadinessDecision::new(
                    ReadinessMode::CanonicalReady,
                    ReadinessReason::CanonicalAccepted,
                )
            }),
            AttemptPhase::DegradedReady => attempt.cached_decision.clone().unwrap_or_else(|| {
                ReadinessDecision::new(
                    ReadinessMode::DegradedManualOnly,
                    ReadinessReason::StabilizationTimeout,
                )
                .with_blocking(blocking)
            }),
        }
    }

    pub fn capture_meta(&self, conversation_id: &ConversationId) -> CaptureMeta {
        self.captures
            .get(conversation_id)
            .map_or_else(CaptureMeta::empty, CaptureSlot::meta)
    }

    /// Conversations with a bound attempt or a held sample.
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut seen = self.registry.conversations();
        for conversation_id in self.captures.keys() {
            if !seen.contains(conversation_id) {
                seen.push(conversation_id.clone());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> SignalFusionEngine {
        SignalFusionEngine::new(&EngineConfig::default(), PredicateRegistry::default())
    }

    fn finished(text: &str) -> serde_json::Value {
        json!({"messages": [{"role": "assistant", "content": text, "status": "finished"}]})
    }

    fn streaming(text: &str) -> serde_json::Value {
        json!({"messages": [{"role": "assistant", "content": text, "status": "in_progress"}]})
    }

    fn phase(engine: &SignalFusionEngine, id: &str) -> AttemptPhase {
        engine.attempt(&AttemptId::new(id)).unwrap().phase
    }

    fn start(engine: &mut SignalFusionEngine, id: &str, conv: &str) {
        engine
            .ingest(Signal::lifecycle(id, LifecyclePhase::PromptSent, Some(conv), "chatgpt"))
            .unwrap();
    }

    fn complete(engine: &mut SignalFusionEngine, id: &str) -> Vec<FusionEffect> {
        engine
            .ingest(Signal::lifecycle(id, LifecyclePhase::Completed, None, "chatgpt"))
            .unwrap()
    }

    #[test]
    fn test_completed_schedules_stabilization() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        assert_eq!(phase(&e, "a1"), AttemptPhase::Active);

        let effects = complete(&mut e, "a1");
        assert_eq!(phase(&e, "a1"), AttemptPhase::AwaitingCanonical);
        assert!(effects.contains(&FusionEffect::ScheduleStabilization {
            attempt_id: AttemptId::new("a1")
        }));
        let decision = e.decide(&ConversationId::new("c1"));
        assert_eq!(decision.mode, ReadinessMode::Awaiting);
        assert_eq!(decision.reason, ReadinessReason::AwaitingCanonical);
    }

    #[test]
    fn test_accepted_high_sample_promotes() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        let effects = e.ingest(Signal::canonical("c1", finished("done"), None)).unwrap();

        assert_eq!(phase(&e, "a1"), AttemptPhase::CanonicalReady);
        assert!(effects.contains(&FusionEffect::CancelStabilization {
            attempt_id: AttemptId::new("a1")
        }));
        let decision = e.decide(&ConversationId::new("c1"));
        assert!(decision.is_exportable());
        assert!(e.capture_meta(&ConversationId::new("c1")).is_high_fidelity());
    }

    #[test]
    fn test_sample_before_completion_promotes_on_completion() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        e.ingest(Signal::canonical("c1", finished("done"), Some("a1")))
            .unwrap();
        assert_eq!(phase(&e, "a1"), AttemptPhase::Active);

        let effects = complete(&mut e, "a1");
        assert_eq!(phase(&e, "a1"), AttemptPhase::CanonicalReady);
        assert!(!effects
            .iter()
            .any(|f| matches!(f, FusionEffect::ScheduleStabilization { .. })));
    }

    #[test]
    fn test_rejected_sample_keeps_phase() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        let effects = e.ingest(Signal::canonical("c1", streaming("par"), None)).unwrap();

        assert_eq!(phase(&e, "a1"), AttemptPhase::AwaitingCanonical);
        assert!(!effects
            .iter()
            .any(|f| matches!(f, FusionEffect::CancelStabilization { .. })));
        let decision = e.decide(&ConversationId::new("c1"));
        assert_eq!(decision.reason, ReadinessReason::PredicateRejected);
        assert!(decision
            .blocking_conditions
            .contains(&BlockingCondition::PredicateRejected));
    }

    #[test]
    fn test_timeout_without_sample_is_degraded_manual() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        e.on_stabilization_timeout(&AttemptId::new("a1"));

        assert_eq!(phase(&e, "a1"), AttemptPhase::AwaitingCanonical);
        let decision = e.decide(&ConversationId::new("c1"));
        assert_eq!(decision.mode, ReadinessMode::DegradedManualOnly);
        assert_eq!(decision.reason, ReadinessReason::StabilizationTimeout);
    }

    #[test]
    fn test_timeout_with_degraded_then_late_upgrade() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        e.ingest(Signal::degraded("c1", finished("dom text"))).unwrap();
        e.on_stabilization_timeout(&AttemptId::new("a1"));
        assert_eq!(phase(&e, "a1"), AttemptPhase::DegradedReady);

        e.ingest(Signal::canonical("c1", finished("api text"), None)).unwrap();
        assert_eq!(phase(&e, "a1"), AttemptPhase::CanonicalReady);

        e.ingest(Signal::degraded("c1", finished("dom text again"))).unwrap();
        let decision = e.decide(&ConversationId::new("c1"));
        assert_eq!(decision.mode, ReadinessMode::CanonicalReady);
        assert!(e.capture_meta(&ConversationId::new("c1")).is_high_fidelity());
    }

    #[test]
    fn test_degraded_after_timeout_degrades() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        e.on_stabilization_timeout(&AttemptId::new("a1"));
        e.ingest(Signal::degraded("c1", finished("dom"))).unwrap();
        assert_eq!(phase(&e, "a1"), AttemptPhase::DegradedReady);
    }

    #[test]
    fn test_supersede_and_stale_signals() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        start(&mut e, "a2", "c1");
        assert_eq!(phase(&e, "a1"), AttemptPhase::Superseded);
        assert_eq!(e.resolve(&AttemptId::new("a1")), AttemptId::new("a2"));

        let err = e
            .ingest(Signal::lifecycle("a1", LifecyclePhase::Completed, None, "chatgpt"))
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(phase(&e, "a1"), AttemptPhase::Superseded);
        assert_eq!(phase(&e, "a2"), AttemptPhase::Active);

        let err = e
            .ingest(Signal::canonical("c1", finished("old"), Some("a1")))
            .unwrap_err();
        assert!(err.is_stale());
    }

    #[test]
    fn test_new_generation_clears_held_samples() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");
        e.ingest(Signal::canonical("c1", finished("first answer"), None))
            .unwrap();
        start(&mut e, "a2", "c1");

        assert_eq!(e.capture_meta(&ConversationId::new("c1")), CaptureMeta::empty());
        assert_eq!(
            e.decide(&ConversationId::new("c1")).reason,
            ReadinessReason::GenerationInProgress
        );
    }

    #[test]
    fn test_shorter_high_sample_does_not_replace_longer() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        e.ingest(Signal::canonical("c1", streaming("longer partial"), None))
            .unwrap();
        e.ingest(Signal::canonical("c1", streaming("short"), None))
            .unwrap();
        assert_eq!(e.capture_meta(&ConversationId::new("c1")).latest_length, 14);
    }

    #[test]
    fn test_unbound_sample_updates_cache_only() {
        let mut e = engine();
        let effects = e.ingest(Signal::canonical("c9", finished("bg"), None)).unwrap();
        assert!(effects.is_empty());
        assert!(e.registry().is_empty());
        let decision = e.decide(&ConversationId::new("c9"));
        assert_eq!(decision.mode, ReadinessMode::CanonicalReady);
    }

    #[test]
    fn test_dispose_is_idempotent_and_final() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        let effects = e.ingest(Signal::disposed("a1", "navigation")).unwrap();
        assert!(matches!(effects.as_slice(), [FusionEffect::AttemptRetired(_)]));
        assert!(e.ingest(Signal::disposed("a1", "again")).unwrap().is_empty());
        assert!(e
            .ingest(Signal::lifecycle("a1", LifecyclePhase::Streaming, None, "chatgpt"))
            .unwrap_err()
            .is_stale());
        assert_eq!(phase(&e, "a1"), AttemptPhase::Disposed);
        assert_eq!(
            e.decide(&ConversationId::new("c1")).reason,
            ReadinessReason::AttemptDisposed
        );
    }

    #[test]
    fn test_terminated_behaves_like_completed() {
        let mut e = engine();
        e.ingest(Signal::lifecycle("a1", LifecyclePhase::Terminated, Some("c1"), "claude"))
            .unwrap();
        assert_eq!(phase(&e, "a1"), AttemptPhase::AwaitingCanonical);
    }

    #[test]
    fn test_resolution_for_unknown_attempt_is_stale() {
        let mut e = engine();
        start(&mut e, "a1", "c1");

        let err = e.ingest(Signal::resolved("ghost", "c1")).unwrap_err();
        assert!(err.is_stale());
        assert!(e.attempt(&AttemptId::new("ghost")).is_none());
        assert_eq!(phase(&e, "a1"), AttemptPhase::Active);

        let effects = complete(&mut e, "a1");
        assert!(effects.contains(&FusionEffect::ScheduleStabilization {
            attempt_id: AttemptId::new("a1")
        }));
        e.ingest(Signal::canonical("c1", finished("done"), None)).unwrap();
        assert_eq!(
            e.decide(&ConversationId::new("c1")).mode,
            ReadinessMode::CanonicalReady
        );
    }

    #[test]
    fn test_finish_for_unknown_attempt_cannot_take_over() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        complete(&mut e, "a1");

        for finish in [LifecyclePhase::Completed, LifecyclePhase::Terminated] {
            let err = e
                .ingest(Signal::lifecycle("ghost", finish, Some("c1"), "chatgpt"))
                .unwrap_err();
            assert!(err.is_stale());
        }
        assert!(e.attempt(&AttemptId::new("ghost")).is_none());
        assert_eq!(phase(&e, "a1"), AttemptPhase::AwaitingCanonical);
        assert!(e.needs_stabilization(&AttemptId::new("a1")));
        assert_eq!(e.registry().live_count(&ConversationId::new("c1")), 1);
    }

    #[test]
    fn test_streaming_for_unknown_attempt_starts_new_generation() {
        let mut e = engine();
        start(&mut e, "a1", "c1");
        e.ingest(Signal::lifecycle("a2", LifecyclePhase::Streaming, Some("c1"), "chatgpt"))
            .unwrap();
        assert_eq!(phase(&e, "a1"), AttemptPhase::Superseded);
        assert_eq!(phase(&e, "a2"), AttemptPhase::Active);
    }

    #[test]
    fn test_unknown_conversation_decision() {
        let e = engine();
        let decision = e.decide(&ConversationId::new("nope"));
        assert_eq!(decision.mode, ReadinessMode::Unknown);
        assert_eq!(decision.reason, ReadinessReason::NoAttempt);
        assert_eq!(e.capture_meta(&ConversationId::new("nope")), CaptureMeta::empty());
    }
}
