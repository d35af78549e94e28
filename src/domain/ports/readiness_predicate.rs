//! Readiness predicate port.

use crate::domain::models::{PredicateVerdict, StructuredSnapshot};

/// Per-service judgement of whether a snapshot holds a finished response.
///
/// This is the only code that looks inside a snapshot.
pub trait ReadinessPredicate: Send + Sync {
    fn evaluate(&self, snapshot: &StructuredSnapshot) -> PredicateVerdict;
}

impl<F> ReadinessPredicate for F
where
    F: Fn(&StructuredSnapshot) -> PredicateVerdict + Send + Sync,
{
    fn evaluate(&self, snapshot: &StructuredSnapshot) -> PredicateVerdict {
        self(snapshot)
    }
}
