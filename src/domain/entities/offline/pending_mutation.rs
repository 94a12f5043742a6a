use crate::domain::value_objects::{MutationId, OperationKind, SyncPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A write accepted locally and not yet confirmed by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingMutation {
    pub id: MutationId,
    pub operation_kind: OperationKind,
    pub payload: SyncPayload,
    pub enqueued_at: DateTime<Utc>,
    /// Failed drain attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingMutation {
    pub fn new(operation_kind: OperationKind, payload: SyncPayload, at: DateTime<Utc>) -> Self {
        Self {
            id: MutationId::generate(at),
            operation_kind,
            payload,
            enqueued_at: at,
            attempts: 0,
            last_error: None,
        }
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(message);
    }

    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}
