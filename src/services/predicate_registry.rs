//! Per-platform readiness predicates.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::predicates::MessageListPredicate;
use crate::domain::models::{PredicateVerdict, StructuredSnapshot};
use crate::domain::ports::ReadinessPredicate;

/// Predicates keyed by source platform, with a fallback.
#[derive(Clone)]
pub struct PredicateRegistry {
    default: Arc<dyn ReadinessPredicate>,
    by_platform: HashMap<String, Arc<dyn ReadinessPredicate>>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new(Arc::new(MessageListPredicate::new()))
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("platforms", &self.by_platform.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PredicateRegistry {
    pub fn new(default: Arc<dyn ReadinessPredicate>) -> Self {
        Self {
            default,
            by_platform: HashMap::new(),
        }
    }

    /// Register a predicate for `platform`. Platform names are case-insensitive.
    pub fn register(mut self, platform: &str, predicate: Arc<dyn ReadinessPredicate>) -> Self {
        self.by_platform.insert(platform.to_lowercase(), predicate);
        self
    }

    pub fn for_platform(&self, platform: Option<&str>) -> &dyn ReadinessPredicate {
        platform
            .and_then(|p| self.by_platform.get(&p.to_lowercase()))
            .unwrap_or(&self.default)
            .as_ref()
    }

    pub fn evaluate(
        &self,
        platform: Option<&str>,
        snapshot: &StructuredSnapshot,
    ) -> PredicateVerdict {
        self.for_platform(platform).evaluate(snapshot)
    }
}
