//! Rule Evaluator Port (Driven Port)
//!
//! Matches one market event against the externally configured rule set.
//! Implementations must be deterministic for a given rule set and must not
//! have side effects visible to the pipeline. An empty result is valid.

use crate::domain::event::MarketEvent;
use crate::domain::notification::NotificationCandidate;

/// Rule evaluation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluationError {
    /// A rule failed while matching the event.
    #[error("rule {rule} failed: {reason}")]
    RuleFailed {
        /// Rule identifier.
        rule: String,
        /// Failure description.
        reason: String,
    },

    /// The evaluator panicked.
    #[error("rule evaluator panicked: {0}")]
    Panicked(String),
}

/// Rule evaluator port.
#[cfg_attr(test, mockall::automock)]
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate `event`, returning candidates in rule order.
    fn evaluate(&self, event: &MarketEvent) -> Result<Vec<NotificationCandidate>, EvaluationError>;
}
