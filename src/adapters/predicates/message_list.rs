//! Readiness predicate for message-list snapshots.
//!
//! Understands snapshots shaped `{"messages":[{"role","content","status"}]}`,
//! the normalized form parsing collaborators produce for chat services.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::domain::models::{PredicateReason, PredicateVerdict, StructuredSnapshot};
use crate::domain::ports::ReadinessPredicate;

const FINISHED_STATUSES: &[&str] =
    &["finished", "finished_successfully", "complete", "completed", "done"];
const FAILED_STATUSES: &[&str] = &["failed", "error", "cancelled", "canceled"];

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: MessageContent,
    #[serde(default)]
    status: Option<String>,
}

/// Content is either a plain string or a list of text parts.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    #[default]
    Missing,
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl MessageContent {
    fn text(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    serde_json::Value::String(s) => Some(s.as_str()),
                    serde_json::Value::Object(o) => o.get("text").and_then(|t| t.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Accepts a snapshot when its last message is a finished, non-empty
/// assistant message.
#[derive(Debug, Clone, Default)]
pub struct MessageListPredicate;

impl MessageListPredicate {
    pub fn new() -> Self {
        Self
    }
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl ReadinessPredicate for MessageListPredicate {
    fn evaluate(&self, snapshot: &StructuredSnapshot) -> PredicateVerdict {
        let Ok(list) = serde_json::from_value::<MessageList>(snapshot.as_value().clone()) else {
            return PredicateVerdict::rejected(PredicateReason::Unrecognized);
        };
        let Some(last) = list.messages.last() else {
            return PredicateVerdict::rejected(PredicateReason::EmptySnapshot);
        };
        if !last.role.eq_ignore_ascii_case("assistant") {
            return PredicateVerdict::rejected(PredicateReason::NoAssistantMessage);
        }

        let text = last.content.text();
        let status = last.status.as_deref().unwrap_or("").to_ascii_lowercase();
        let finished = FINISHED_STATUSES.contains(&status.as_str());
        let failed = FAILED_STATUSES.contains(&status.as_str());

        let reason = if failed {
            PredicateReason::AssistantFailed
        } else if !finished {
            PredicateReason::AssistantIncomplete
        } else if text.trim().is_empty() {
            PredicateReason::ContentEmpty
        } else {
            PredicateReason::Ready
        };

        PredicateVerdict {
            ready: reason == PredicateReason::Ready,
            terminal: finished || failed,
            reason,
            content_hash: (!text.is_empty()).then(|| content_hash(&text)),
            latest_length: text.chars().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(value: serde_json::Value) -> PredicateVerdict {
        MessageListPredicate::new().evaluate(&StructuredSnapshot::new(value))
    }

    #[test]
    fn test_finished_assistant_is_ready() {
        let verdict = eval(json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "héllo", "status": "finished_successfully"}
        ]}));
        assert!(verdict.ready);
        assert!(verdict.terminal);
        assert_eq!(verdict.reason, PredicateReason::Ready);
        assert_eq!(verdict.latest_length, 5);
        assert_eq!(verdict.content_hash.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_streaming_assistant_is_incomplete() {
        let verdict = eval(json!({"messages": [
            {"role": "assistant", "content": "partial", "status": "in_progress"}
        ]}));
        assert!(!verdict.ready);
        assert!(!verdict.terminal);
        assert_eq!(verdict.reason, PredicateReason::AssistantIncomplete);
        assert_eq!(verdict.latest_length, 7);
    }

    #[test]
    fn test_user_last_is_rejected() {
        let verdict = eval(json!({"messages": [{"role": "user", "content": "hi"}]}));
        assert_eq!(verdict.reason, PredicateReason::NoAssistantMessage);
    }

    #[test]
    fn test_empty_and_unrecognized() {
        assert_eq!(eval(json!({"messages": []})).reason, PredicateReason::EmptySnapshot);
        assert_eq!(eval(json!({})).reason, PredicateReason::EmptySnapshot);
        assert_eq!(eval(json!([1, 2])).reason, PredicateReason::Unrecognized);
    }

    #[test]
    fn test_failed_and_empty_content() {
        let failed =
            eval(json!({"messages": [{"role": "assistant", "content": "x", "status": "error"}]}));
        assert_eq!(failed.reason, PredicateReason::AssistantFailed);
        assert!(failed.terminal);
        assert!(!failed.ready);

        let empty =
            eval(json!({"messages": [{"role": "assistant", "content": "  ", "status": "done"}]}));
        assert_eq!(empty.reason, PredicateReason::ContentEmpty);
    }

    #[test]
    fn test_content_parts_are_joined() {
        let verdict = eval(json!({"messages": [{
            "role": "assistant",
            "content": ["one", {"text": "two"}],
            "status": "complete"
        }]}));
        assert!(verdict.ready);
        assert_eq!(verdict.latest_length, "one\ntwo".len());
    }

    #[test]
    fn test_hash_is_stable() {
        let snapshot =
            json!({"messages": [{"role": "assistant", "content": "same", "status": "done"}]});
        let a = eval(snapshot.clone());
        let b = eval(snapshot);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
