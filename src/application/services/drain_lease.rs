use crate::application::ports::key_value_store::KeyValueStore;
use crate::shared::clock::Clock;
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const LEASE_KEY: &str = "pending_mutations.lease";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct LeaseRecord {
    owner_id: String,
    expires_at: DateTime<Utc>,
}

/// Advisory lock letting only one process drain a shared pending queue at a time.
///
/// The lease is a record in the key/value store, taken and renewed with compare-and-swap.
/// An expired or unreadable lease may be taken over by anyone.
pub struct DrainLease {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    owner_id: String,
    ttl: Duration,
}

impl DrainLease {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::with_owner(store, clock, ttl, Uuid::new_v4().to_string())
    }

    pub fn with_owner(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        owner_id: String,
    ) -> Self {
        Self {
            store,
            clock,
            owner_id,
            ttl,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Takes or renews the lease. Returns false while another owner holds a live lease.
    pub async fn try_acquire(&self) -> Result<bool, AppError> {
        let now = self.clock.now();
        let current = self.store.get(LEASE_KEY).await?;

        if let Some(raw) = &current {
            if let Ok(record) = serde_json::from_str::<LeaseRecord>(raw) {
                if record.owner_id != self.owner_id && record.expires_at > now {
                    tracing::debug!(
                        target: "offline::queue",
                        holder = %record.owner_id,
                        expires_at = %record.expires_at,
                        "drain lease held elsewhere"
                    );
                    return Ok(false);
                }
            }
        }

        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|err| AppError::ConfigurationError(format!("invalid lease ttl: {err}")))?;
        let next = serde_json::to_string(&LeaseRecord {
            owner_id: self.owner_id.clone(),
            expires_at: now + ttl,
        })?;

        self.store
            .compare_and_swap(LEASE_KEY, current.as_deref(), Some(&next))
            .await
    }

    /// Drops the lease if this owner still holds it.
    pub async fn release(&self) -> Result<(), AppError> {
        let Some(raw) = self.store.get(LEASE_KEY).await? else {
            return Ok(());
        };
        let held_by_us = serde_json::from_str::<LeaseRecord>(&raw)
            .map(|record| record.owner_id == self.owner_id)
            .unwrap_or(false);
        if held_by_us {
            self.store
                .compare_and_swap(LEASE_KEY, Some(&raw), None)
                .await?;
        }
        Ok(())
    }
}
