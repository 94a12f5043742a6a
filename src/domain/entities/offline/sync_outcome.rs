use super::PendingMutation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one drain pass over the pending queue. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub succeeded_count: u32,
    pub failed_count: u32,
    /// Mutations retained for another attempt, in enqueue order.
    pub failed_mutations: Vec<PendingMutation>,
    /// Mutations that stopped being retried during this pass.
    pub terminal_mutations: Vec<PendingMutation>,
    /// The pass did not run because another drain owned the queue.
    pub skipped: bool,
    /// The pass stopped before reaching every mutation because the drain lease was lost.
    #[serde(default)]
    pub interrupted: bool,
}

impl SyncOutcome {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Every mutation the pass set out to apply was applied.
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && !self.interrupted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying on a later drain.
    Transient,
    /// Can never succeed; surface to the user instead of retrying.
    Permanent,
}

/// Failure reported by a drain's apply function for a single mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl MutationFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

impl fmt::Display for MutationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient: {}", self.message),
            FailureKind::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}
