//! Attempt registry and alias resolution.
//!
//! Owns every attempt the engine knows about, the forwarding aliases left
//! behind when an attempt is superseded, and the conversation → attempt
//! bindings. All of it is bounded; the oldest entries are evicted first.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::bounded_map::BoundedMap;
use crate::domain::models::{
    Attempt, AttemptId, AttemptPhase, ConversationId, EngineConfig, RetireReason,
};

/// What the registry knows about an id named by a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptLookup {
    /// Tracked and not retired
    Live,
    /// Tracked, or remembered, as disposed or superseded
    Retired(AttemptPhase),
    /// Never seen, or forgotten entirely
    Unknown,
}

/// Result of binding an attempt to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// Conversation had no live attempt; this one now owns it
    Bound,
    /// The attempt was already bound to this conversation
    AlreadyBound,
    /// A live older attempt was superseded by this one
    Superseded { previous: AttemptId },
    /// A newer attempt already owns the conversation; this one was superseded
    Stale { winner: AttemptId },
}

/// Attempt retired as a side effect of a registry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredAttempt {
    pub attempt_id: AttemptId,
    pub conversation_id: Option<ConversationId>,
    pub previous_phase: AttemptPhase,
    pub reason: RetireReason,
}

/// Bounded store of attempts, aliases and conversation bindings.
#[derive(Debug)]
pub struct AttemptRegistry {
    attempts: BoundedMap<AttemptId, Attempt>,
    aliases: BoundedMap<AttemptId, AttemptId>,
    /// Retired attempts that fell out of `attempts`
    tombstones: BoundedMap<AttemptId, AttemptPhase>,
    bindings: HashMap<ConversationId, AttemptId>,
    next_sequence: u64,
}

impl AttemptRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            attempts: BoundedMap::new(config.attempt_capacity),
            aliases: BoundedMap::new(config.alias_capacity),
            tombstones: BoundedMap::new(config.alias_capacity),
            bindings: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn get(&self, attempt_id: &AttemptId) -> Option<&Attempt> {
        self.attempts.get(attempt_id)
    }

    pub fn get_mut(&mut self, attempt_id: &AttemptId) -> Option<&mut Attempt> {
        self.attempts.get_mut(attempt_id)
    }

    pub fn lookup(&self, attempt_id: &AttemptId) -> AttemptLookup {
        if let Some(attempt) = self.attempts.get(attempt_id) {
            return if attempt.is_live() {
                AttemptLookup::Live
            } else {
                AttemptLookup::Retired(attempt.phase)
            };
        }
        if let Some(phase) = self.tombstones.get(attempt_id) {
            return AttemptLookup::Retired(*phase);
        }
        if self.aliases.contains_key(attempt_id) {
            return AttemptLookup::Retired(AttemptPhase::Superseded);
        }
        AttemptLookup::Unknown
    }

    /// Track a new pending attempt. Returns attempts evicted to make room.
    pub fn create(&mut self, attempt_id: AttemptId, platform: Option<&str>) -> Vec<RetiredAttempt> {
        if self.attempts.contains_key(&attempt_id) {
            return Vec::new();
        }
        self.next_sequence += 1;
        let mut attempt = Attempt::new(attempt_id.clone(), self.next_sequence);
        if let Some(platform) = platform {
            attempt = attempt.with_platform(platform);
        }
        self.attempts.insert(attempt_id, attempt);
        self.evict_attempts()
    }

    fn evict_attempts(&mut self) -> Vec<RetiredAttempt> {
        let mut retired = Vec::new();
        for (id, mut attempt) in self.attempts.evict_oldest_if_over_capacity() {
            let previous_phase = attempt.phase;
            if attempt.retire(RetireReason::Evicted) {
                debug!(attempt_id = %id, "Evicted live attempt under capacity pressure");
                retired.push(RetiredAttempt {
                    attempt_id: id.clone(),
                    conversation_id: attempt.conversation_id.clone(),
                    previous_phase,
                    reason: RetireReason::Evicted,
                });
            }
            if let Some(conversation_id) = &attempt.conversation_id {
                self.unbind_if_owner(conversation_id, &id);
            }
            self.tombstones.insert(id, attempt.phase);
            self.tombstones.evict_oldest_if_over_capacity();
        }
        retired
    }

    fn unbind_if_owner(&mut self, conversation_id: &ConversationId, attempt_id: &AttemptId) {
        if self.bindings.get(conversation_id) == Some(attempt_id) {
            self.bindings.remove(conversation_id);
        }
    }

    /// Follow the alias chain from `attempt_id` to the newest id, compressing
    /// the path behind it.
    pub fn resolve(&mut self, attempt_id: &AttemptId) -> AttemptId {
        let path = self.resolve_path(attempt_id);
        let Some(target) = path.last().cloned() else {
            return attempt_id.clone();
        };
        for hop in &path[..path.len().saturating_sub(2)] {
            self.aliases.insert(hop.clone(), target.clone());
            if let Some(attempt) = self.attempts.get_mut(hop) {
                attempt.alias_target = Some(target.clone());
            }
        }
        target
    }

    /// The alias chain from `attempt_id` (inclusive) to its newest id, without
    /// mutating anything. A cycle ends the chain before the repeated id.
    pub fn resolve_path(&self, attempt_id: &AttemptId) -> Vec<AttemptId> {
        let mut path = vec![attempt_id.clone()];
        let mut visited: HashSet<&AttemptId> = HashSet::from([attempt_id]);
        let mut current = attempt_id;
        while let Some(next) = self.aliases.get(current) {
            if !visited.insert(next) {
                debug!(attempt_id = %attempt_id, at = %next, "Alias cycle detected");
                break;
            }
            path.push(next.clone());
            current = next;
        }
        path
    }

    /// Install `from → to`. Refused when it would close a cycle.
    pub fn install_alias(&mut self, from: AttemptId, to: AttemptId) -> bool {
        if from == to || self.resolve_path(&to).contains(&from) {
            return false;
        }
        if let Some(attempt) = self.attempts.get_mut(&from) {
            attempt.alias_target = Some(to.clone());
        }
        self.aliases.insert(from, to);
        self.aliases.evict_oldest_if_over_capacity();
        true
    }

    /// The attempt currently bound to `conversation_id`, live or not.
    pub fn bound_attempt(&self, conversation_id: &ConversationId) -> Option<&Attempt> {
        self.bindings
            .get(conversation_id)
            .and_then(|id| self.attempts.get(id))
    }

    /// The live attempt bound to `conversation_id`, if any.
    pub fn live_attempt(&self, conversation_id: &ConversationId) -> Option<&Attempt> {
        self.bound_attempt(conversation_id).filter(|a| a.is_live())
    }

    /// Number of live attempts claiming `conversation_id`.
    pub fn live_count(&self, conversation_id: &ConversationId) -> usize {
        self.attempts
            .values()
            .filter(|a| a.is_live() && a.conversation_id.as_ref() == Some(conversation_id))
            .count()
    }

    /// Bind `attempt_id` to `conversation_id`.
    ///
    /// When another live attempt already owns the conversation the newer of
    /// the two (by creation order) keeps it and the other is superseded with
    /// an alias to the winner. The retired attempt, if any, is pushed onto
    /// `retired`.
    pub fn bind(
        &mut self,
        conversation_id: &ConversationId,
        attempt_id: &AttemptId,
        retired: &mut Vec<RetiredAttempt>,
    ) -> Option<BindOutcome> {
        let incoming = self.attempts.get(attempt_id)?;
        if !incoming.is_live() {
            return None;
        }
        let incoming_sequence = incoming.sequence;
        let moved_from = incoming
            .conversation_id
            .clone()
            .filter(|c| c != conversation_id);

        let current = self
            .bindings
            .get(conversation_id)
            .and_then(|id| self.attempts.get(id))
            .filter(|a| a.is_live())
            .map(|a| (a.id.clone(), a.sequence));

        let outcome = match current {
            Some((current_id, _)) if &current_id == attempt_id => {
                return Some(BindOutcome::AlreadyBound)
            }
            Some((current_id, current_sequence)) if current_sequence > incoming_sequence => {
                if let Some(r) = self.supersede(attempt_id, &current_id) {
                    retired.push(r);
                }
                return Some(BindOutcome::Stale { winner: current_id });
            }
            Some((current_id, _)) => {
                if let Some(r) = self.supersede(&current_id, attempt_id) {
                    retired.push(r);
                }
                BindOutcome::Superseded {
                    previous: current_id,
                }
            }
            None => BindOutcome::Bound,
        };

        if let Some(previous_conversation) = moved_from {
            self.unbind_if_owner(&previous_conversation, attempt_id);
        }
        if let Some(attempt) = self.attempts.get_mut(attempt_id) {
            attempt.bind_conversation(conversation_id.clone());
        }
        self.bindings
            .insert(conversation_id.clone(), attempt_id.clone());
        Some(outcome)
    }

    fn supersede(&mut self, old: &AttemptId, new: &AttemptId) -> Option<RetiredAttempt> {
        let attempt = self.attempts.get_mut(old)?;
        let previous_phase = attempt.phase;
        let reason = RetireReason::SupersededBy(new.clone());
        if !attempt.retire(reason.clone()) {
            return None;
        }
        let conversation_id = attempt.conversation_id.clone();
        self.install_alias(old.clone(), new.clone());
        debug!(attempt_id = %old, superseded_by = %new, "Attempt superseded");
        Some(RetiredAttempt {
            attempt_id: old.clone(),
            conversation_id,
            previous_phase,
            reason,
        })
    }

    /// Retire a live attempt. Disposal keeps the conversation binding so the
    /// disposed state stays visible until a new attempt takes over.
    pub fn retire(
        &mut self,
        attempt_id: &AttemptId,
        reason: RetireReason,
    ) -> Option<RetiredAttempt> {
        if let RetireReason::SupersededBy(new) = &reason {
            return self.supersede(attempt_id, new);
        }
        let attempt = self.attempts.get_mut(attempt_id)?;
        let previous_phase = attempt.phase;
        if !attempt.retire(reason.clone()) {
            return None;
        }
        Some(RetiredAttempt {
            attempt_id: attempt_id.clone(),
            conversation_id: attempt.conversation_id.clone(),
            previous_phase,
            reason,
        })
    }

    pub fn attempts(&self) -> impl Iterator<Item = &Attempt> {
        self.attempts.values()
    }

    /// Conversations with a binding, oldest attempt first.
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut bound: Vec<(&ConversationId, u64)> = self
            .bindings
            .iter()
            .filter_map(|(c, id)| self.attempts.get(id).map(|a| (c, a.sequence)))
            .collect();
        bound.sort_by_key(|(_, seq)| *seq);
        bound.into_iter().map(|(c, _)| c.clone()).collect()
    }
}
