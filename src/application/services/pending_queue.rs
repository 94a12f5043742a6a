use crate::application::ports::key_value_store::KeyValueStore;
use crate::application::services::drain_lease::DrainLease;
use crate::domain::entities::{MutationFailure, PendingMutation, SyncOutcome};
use crate::domain::value_objects::{MutationId, OperationKind, SyncPayload};
use crate::shared::clock::Clock;
use crate::shared::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const QUEUE_KEY: &str = "pending_mutations";

const DOCUMENT_VERSION: u32 = 1;
const MAX_COMMIT_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default = "document_version")]
    version: u32,
    #[serde(default)]
    pending: Vec<PendingMutation>,
    #[serde(default)]
    terminal: Vec<PendingMutation>,
}

fn document_version() -> u32 {
    DOCUMENT_VERSION
}

/// Resets the drain flag when the pass ends, including on early return.
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable FIFO of writes made while the remote service was unreachable.
///
/// The queue lives in a single key/value document. Each change re-reads the document and commits
/// with compare-and-swap, so the persisted queue is always whole and concurrent writers are
/// merged rather than overwritten.
pub struct PendingMutationQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    lease: Option<DrainLease>,
    write_lock: Mutex<()>,
    draining: AtomicBool,
}

impl PendingMutationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts,
            lease: None,
            write_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    /// Drains only while holding `lease`, so several processes can share one queue document.
    pub fn with_lease(mut self, lease: DrainLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub async fn enqueue(
        &self,
        operation_kind: OperationKind,
        payload: SyncPayload,
    ) -> Result<MutationId, AppError> {
        let mutation = PendingMutation::new(operation_kind, payload, self.clock.now());
        let id = mutation.id.clone();

        self.commit(|doc| doc.pending.push(mutation.clone())).await?;

        tracing::debug!(
            target: "offline::queue",
            mutation_id = %id,
            operation = %mutation.operation_kind,
            "mutation enqueued"
        );
        Ok(id)
    }

    /// Applies every pending mutation in enqueue order.
    ///
    /// Successes leave the queue; failures stay in their original relative order, ahead of
    /// anything enqueued while the pass ran. A failure never stops the pass. A concurrent call,
    /// or one made while another process holds the drain lease, returns a skipped outcome.
    pub async fn drain<F, Fut>(&self, mut apply: F) -> Result<SyncOutcome, AppError>
    where
        F: FnMut(PendingMutation) -> Fut,
        Fut: Future<Output = Result<(), MutationFailure>>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(target: "offline::queue", "drain already in progress; skipping");
            return Ok(SyncOutcome::skipped());
        }
        let _guard = DrainingGuard(&self.draining);

        if let Some(lease) = &self.lease {
            if !lease.try_acquire().await? {
                return Ok(SyncOutcome::skipped());
            }
        }

        let result = self.drain_pass(&mut apply).await;

        if let Some(lease) = &self.lease {
            if let Err(err) = lease.release().await {
                tracing::warn!(
                    target: "offline::queue",
                    error = %err,
                    "failed to release drain lease"
                );
            }
        }

        result
    }

    async fn drain_pass<F, Fut>(&self, apply: &mut F) -> Result<SyncOutcome, AppError>
    where
        F: FnMut(PendingMutation) -> Fut,
        Fut: Future<Output = Result<(), MutationFailure>>,
    {
        let snapshot = self.load().await?.pending;
        if snapshot.is_empty() {
            return Ok(SyncOutcome::default());
        }

        tracing::info!(
            target: "offline::queue",
            count = snapshot.len(),
            "draining pending mutations"
        );

        let mut results: HashMap<MutationId, Result<(), MutationFailure>> =
            HashMap::with_capacity(snapshot.len());
        let mut interrupted = false;
        for mutation in snapshot {
            let id = mutation.id.clone();
            let result = apply(mutation).await;
            if let Err(failure) = &result {
                tracing::warn!(
                    target: "offline::queue",
                    mutation_id = %id,
                    failure = %failure,
                    "mutation failed to apply"
                );
            }
            results.insert(id, result);

            if let Some(lease) = &self.lease {
                // a lease lost mid-pass means another process may already be draining
                if !lease.try_acquire().await? {
                    tracing::warn!(
                        target: "offline::queue",
                        "drain lease lost; stopping pass early"
                    );
                    interrupted = true;
                    break;
                }
            }
        }

        let max_attempts = self.max_attempts;
        let mut outcome = self
            .commit(|doc| merge_results(doc, &results, max_attempts))
            .await?;
        outcome.interrupted = interrupted;

        tracing::info!(
            target: "offline::queue",
            succeeded = outcome.succeeded_count,
            failed = outcome.failed_count,
            terminal = outcome.terminal_mutations.len(),
            "drain finished"
        );
        Ok(outcome)
    }

    /// Removes a pending or terminal mutation.
    pub async fn remove(&self, id: &MutationId) -> Result<bool, AppError> {
        self.commit(|doc| {
            let before = doc.pending.len() + doc.terminal.len();
            doc.pending.retain(|m| &m.id != id);
            doc.terminal.retain(|m| &m.id != id);
            before != doc.pending.len() + doc.terminal.len()
        })
        .await
    }

    /// Drops every pending and terminal mutation, returning how many were removed.
    pub async fn clear(&self) -> Result<usize, AppError> {
        let removed = self
            .commit(|doc| {
                let count = doc.pending.len() + doc.terminal.len();
                doc.pending.clear();
                doc.terminal.clear();
                count
            })
            .await?;
        tracing::info!(target: "offline::queue", removed, "pending queue cleared");
        Ok(removed)
    }

    pub async fn size(&self) -> Result<usize, AppError> {
        Ok(self.load().await?.pending.len())
    }

    pub async fn list(&self) -> Result<Vec<PendingMutation>, AppError> {
        Ok(self.load().await?.pending)
    }

    pub async fn terminal_failures(&self) -> Result<Vec<PendingMutation>, AppError> {
        Ok(self.load().await?.terminal)
    }

    /// Moves a terminal mutation back to the tail of the pending queue with a clean slate.
    pub async fn requeue_terminal(&self, id: &MutationId) -> Result<bool, AppError> {
        self.commit(|doc| {
            let Some(position) = doc.terminal.iter().position(|m| &m.id == id) else {
                return false;
            };
            let mut mutation = doc.terminal.remove(position);
            mutation.reset_attempts();
            doc.pending.push(mutation);
            true
        })
        .await
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    async fn load(&self) -> Result<QueueDocument, AppError> {
        let raw = self.store.get(QUEUE_KEY).await?;
        decode(raw.as_deref())
    }

    async fn commit<R>(
        &self,
        mut change: impl FnMut(&mut QueueDocument) -> R,
    ) -> Result<R, AppError> {
        let _lock = self.write_lock.lock().await;

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let raw = self.store.get(QUEUE_KEY).await?;
            let mut doc = decode(raw.as_deref())?;
            let result = change(&mut doc);
            doc.version = DOCUMENT_VERSION;
            let next = serde_json::to_string(&doc)?;

            if self
                .store
                .compare_and_swap(QUEUE_KEY, raw.as_deref(), Some(&next))
                .await?
            {
                return Ok(result);
            }
            tracing::debug!(
                target: "offline::queue",
                "queue document changed concurrently; retrying"
            );
        }

        Err(AppError::Internal(
            "pending queue document kept changing during commit".to_string(),
        ))
    }
}

fn decode(raw: Option<&str>) -> Result<QueueDocument, AppError> {
    match raw {
        None => Ok(QueueDocument {
            version: DOCUMENT_VERSION,
            ..QueueDocument::default()
        }),
        Some(raw) => serde_json::from_str(raw).map_err(|err| {
            AppError::Serialization(format!("corrupt pending queue document: {err}"))
        }),
    }
}

fn merge_results(
    doc: &mut QueueDocument,
    results: &HashMap<MutationId, Result<(), MutationFailure>>,
    max_attempts: u32,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    let mut retained = Vec::with_capacity(doc.pending.len());
    let mut matched = HashSet::with_capacity(results.len());

    for mut mutation in doc.pending.drain(..) {
        let Some(result) = results.get(&mutation.id) else {
            retained.push(mutation);
            continue;
        };
        matched.insert(mutation.id.clone());
        match result {
            Ok(()) => outcome.succeeded_count += 1,
            Err(failure) => {
                outcome.failed_count += 1;
                mutation.record_failure(failure.message.clone());
                let exhausted = max_attempts > 0 && mutation.attempts >= max_attempts;
                if failure.is_permanent() || exhausted {
                    outcome.terminal_mutations.push(mutation.clone());
                    doc.terminal.push(mutation);
                } else {
                    outcome.failed_mutations.push(mutation.clone());
                    retained.push(mutation);
                }
            }
        }
    }

    // applied mutations removed by hand mid-pass still count as applied
    outcome.succeeded_count += results
        .iter()
        .filter(|(id, result)| result.is_ok() && !matched.contains(*id))
        .count() as u32;

    doc.pending = retained;
    outcome
}
