//! Snapshot fetcher that replays queued responses.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConversationId, StructuredSnapshot};
use crate::domain::ports::SnapshotFetcher;

/// One canned fetch result.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Snapshot(StructuredSnapshot),
    Failure(String),
}

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<ConversationId, VecDeque<ScriptedResponse>>,
    calls: HashMap<ConversationId, u32>,
}

/// Fetcher whose responses are queued per conversation ahead of time.
///
/// Each fetch pops the next queued response; an empty queue fails.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSnapshotFetcher {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSnapshotFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, conversation_id: &ConversationId, response: ScriptedResponse) {
        self.script
            .lock()
            .await
            .queues
            .entry(conversation_id.clone())
            .or_default()
            .push_back(response);
    }

    pub async fn push_snapshot(
        &self,
        conversation_id: &ConversationId,
        snapshot: serde_json::Value,
    ) {
        self.push(conversation_id, ScriptedResponse::Snapshot(snapshot.into()))
            .await;
    }

    /// Fetches issued so far for `conversation_id`.
    pub async fn calls(&self, conversation_id: &ConversationId) -> u32 {
        self.script
            .lock()
            .await
            .calls
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedSnapshotFetcher {
    async fn fetch(&self, conversation_id: &ConversationId) -> DomainResult<StructuredSnapshot> {
        let mut script = self.script.lock().await;
        *script.calls.entry(conversation_id.clone()).or_default() += 1;
        match script
            .queues
            .get_mut(conversation_id)
            .and_then(VecDeque::pop_front)
        {
            Some(ScriptedResponse::Snapshot(snapshot)) => Ok(snapshot),
            Some(ScriptedResponse::Failure(reason)) => {
                Err(DomainError::fetch_failed(conversation_id.as_str(), reason))
            }
            None => Err(DomainError::fetch_failed(
                conversation_id.as_str(),
                "no scripted response",
            )),
        }
    }
}
