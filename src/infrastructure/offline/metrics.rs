use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcomeStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub total_drains: u64,
    pub clean_drains: u64,
    pub failed_drains: u64,
    pub consecutive_failed_drains: u64,
    pub mutations_applied: u64,
    pub mutations_failed: u64,
    pub mutations_terminal: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_outcome: Option<DrainOutcomeStatus>,
    pub last_trigger: Option<String>,
    pub last_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainMetadata {
    pub trigger: Option<String>,
    pub succeeded: u32,
    pub failed: u32,
    pub terminal: u32,
    pub duration_ms: Option<u64>,
}

#[derive(Default, Clone)]
struct LastDrainMetadata {
    last_outcome: Option<DrainOutcomeStatus>,
    trigger: Option<String>,
    duration_ms: Option<u64>,
}

/// Counters describing queue drains for one gateway.
pub struct SyncMetrics {
    clean: AtomicU64,
    failed: AtomicU64,
    consecutive_failed: AtomicU64,
    applied: AtomicU64,
    mutation_failures: AtomicU64,
    terminal: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    metadata: Mutex<LastDrainMetadata>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            clean: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            consecutive_failed: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            mutation_failures: AtomicU64::new(0),
            terminal: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            metadata: Mutex::new(LastDrainMetadata::default()),
        }
    }

    pub fn record(&self, meta: &DrainMetadata) -> SyncMetricsSnapshot {
        let status = if meta.failed == 0 {
            DrainOutcomeStatus::Success
        } else {
            DrainOutcomeStatus::Failure
        };

        self.applied
            .fetch_add(u64::from(meta.succeeded), Ordering::Relaxed);
        self.mutation_failures
            .fetch_add(u64::from(meta.failed), Ordering::Relaxed);
        self.terminal
            .fetch_add(u64::from(meta.terminal), Ordering::Relaxed);

        match status {
            DrainOutcomeStatus::Success => {
                self.clean.fetch_add(1, Ordering::Relaxed);
                self.last_success_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failed.store(0, Ordering::Relaxed);
            }
            DrainOutcomeStatus::Failure => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.last_failure_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut guard) = self.metadata.lock() {
            guard.last_outcome = Some(status);
            guard.trigger = meta.trigger.clone();
            guard.duration_ms = meta.duration_ms;
        }

        self.snapshot()
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let metadata = self
            .metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| LastDrainMetadata::default());
        let clean = self.clean.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        SyncMetricsSnapshot {
            total_drains: clean + failed,
            clean_drains: clean,
            failed_drains: failed,
            consecutive_failed_drains: self.consecutive_failed.load(Ordering::Relaxed),
            mutations_applied: self.applied.load(Ordering::Relaxed),
            mutations_failed: self.mutation_failures.load(Ordering::Relaxed),
            mutations_terminal: self.terminal.load(Ordering::Relaxed),
            last_success_ms: to_option(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: to_option(self.last_failure_ms.load(Ordering::Relaxed)),
            last_outcome: metadata.last_outcome,
            last_trigger: metadata.trigger,
            last_duration_ms: metadata.duration_ms,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_clean_and_failed_drains() {
        let metrics = SyncMetrics::new();

        let snapshot = metrics.record(&DrainMetadata {
            trigger: Some("reconnect".into()),
            succeeded: 3,
            failed: 0,
            terminal: 0,
            duration_ms: Some(12),
        });
        assert_eq!(snapshot.clean_drains, 1);
        assert_eq!(snapshot.mutations_applied, 3);
        assert_eq!(snapshot.last_outcome, Some(DrainOutcomeStatus::Success));
        assert_eq!(snapshot.last_trigger.as_deref(), Some("reconnect"));

        metrics.record(&DrainMetadata {
            failed: 2,
            terminal: 1,
            ..DrainMetadata::default()
        });
        let snapshot = metrics.record(&DrainMetadata {
            failed: 1,
            ..DrainMetadata::default()
        });
        assert_eq!(snapshot.total_drains, 3);
        assert_eq!(snapshot.failed_drains, 2);
        assert_eq!(snapshot.consecutive_failed_drains, 2);
        assert_eq!(snapshot.mutations_failed, 3);
        assert_eq!(snapshot.mutations_terminal, 1);
        assert_eq!(snapshot.last_outcome, Some(DrainOutcomeStatus::Failure));
        assert!(snapshot.last_success_ms.is_some());
    }
}
