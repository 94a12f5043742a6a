use crate::application::ports::key_value_store::KeyValueStore;
use crate::application::ports::local_store::LocalStructuredStore;
use crate::application::ports::remote_transport::{RawResponse, RemoteTransport, TransportError};
use crate::application::services::connectivity_monitor::{ConnectivityMonitor, ConnectivityState};
use crate::application::services::eviction::EvictionPolicy;
use crate::application::services::operation_registry::{records_from_value, OperationRegistry};
use crate::application::services::pending_queue::PendingMutationQueue;
use crate::domain::entities::{
    BucketSchema, CacheStatusSnapshot, MutationFailure, PendingMutation, SyncOutcome,
    WriteOperation,
};
use crate::domain::value_objects::{BucketName, MutationId, OperationKind, RecordKey, SyncPayload};
use crate::infrastructure::offline::{DrainMetadata, SyncMetrics, SyncMetricsSnapshot};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const LAST_SYNC_KEY: &str = "sync.last_successful_at";
pub const STALE_DATA_WARNING: &str = "stale data due to request failure";

const SYNC_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_FRESHNESS_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuery {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Point lookup by primary key.
    pub key: Option<RecordKey>,
    /// Lookup through a secondary index.
    pub index: Option<IndexQuery>,
    /// Extra arguments for the remote fetch.
    pub params: Option<Map<String, Value>>,
    /// Serve from cache without a remote call while the bucket is at most this old.
    pub max_age_minutes: Option<u32>,
}

impl ReadOptions {
    pub fn collection() -> Self {
        Self::default()
    }

    pub fn by_key(key: RecordKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn by_index(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: Some(IndexQuery {
                name: name.into(),
                value: value.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_max_age(mut self, minutes: u32) -> Self {
        self.max_age_minutes = Some(minutes);
        self
    }

    fn is_filtered(&self) -> bool {
        self.key.is_some() || self.index.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    pub data: Value,
    pub offline: bool,
    pub cached: bool,
    pub warning: Option<String>,
}

impl ReadResult {
    fn live(data: Value) -> Self {
        Self {
            data,
            offline: false,
            cached: false,
            warning: None,
        }
    }

    fn cached(data: Value, offline: bool, warning: Option<String>) -> Self {
        Self {
            data,
            offline,
            cached: true,
            warning,
        }
    }
}

/// A confirmed remote write, or one accepted locally that will sync later.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    Confirmed { data: Value },
    Queued { mutation_id: MutationId },
}

impl WriteOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WriteOutcome::Confirmed { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Reconnect,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Startup => write!(f, "startup"),
            SyncTrigger::Reconnect => write!(f, "reconnect"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Published to subscribers after every reconciliation that drained the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub outcome: SyncOutcome,
    pub remaining: usize,
    pub completed_at: DateTime<Utc>,
}

/// Single entry point for application reads and writes.
///
/// Reads are cache-aside: live from the remote service while reachable, refreshing the local
/// store, and served from the store when offline or when the live read fails. Writes are
/// write-behind: sent directly while reachable, queued otherwise, and replayed on reconnect.
pub struct RequestGateway {
    store: Arc<dyn LocalStructuredStore>,
    queue: Arc<PendingMutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    transport: Arc<dyn RemoteTransport>,
    settings: Arc<dyn KeyValueStore>,
    registry: Arc<OperationRegistry>,
    clock: Arc<dyn Clock>,
    freshness_minutes: u32,
    eviction: EvictionPolicy,
    metrics: SyncMetrics,
    sync_events: broadcast::Sender<SyncReport>,
}

impl RequestGateway {
    pub fn new(
        store: Arc<dyn LocalStructuredStore>,
        queue: Arc<PendingMutationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        transport: Arc<dyn RemoteTransport>,
        settings: Arc<dyn KeyValueStore>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        let (sync_events, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        Self {
            store,
            queue,
            monitor,
            transport,
            settings,
            registry,
            clock: Arc::new(SystemClock),
            freshness_minutes: DEFAULT_FRESHNESS_MINUTES,
            eviction: EvictionPolicy::new(),
            metrics: SyncMetrics::new(),
            sync_events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Window `cache_status` judges staleness against when the caller gives none.
    pub fn with_freshness_window(mut self, minutes: u32) -> Self {
        self.freshness_minutes = minutes;
        self
    }

    pub fn queue(&self) -> &Arc<PendingMutationQueue> {
        &self.queue
    }

    pub async fn read(
        &self,
        bucket: &BucketName,
        options: ReadOptions,
    ) -> Result<ReadResult, AppError> {
        let schema = self.registry.require_bucket(bucket)?;

        if !self.monitor.is_reachable() {
            return match self.read_cached(bucket, &options).await? {
                Some(data) => Ok(ReadResult::cached(data, true, None)),
                None => Err(AppError::NoCachedData(format!(
                    "nothing cached for bucket '{bucket}'"
                ))),
            };
        }

        if let Some(max_age) = options.max_age_minutes {
            if self.store.is_fresh(bucket, max_age).await? {
                if let Some(data) = self.read_cached(bucket, &options).await? {
                    tracing::debug!(
                        target: "offline::gateway",
                        %bucket,
                        max_age,
                        "serving fresh cache"
                    );
                    return Ok(ReadResult::cached(data, false, None));
                }
            }
        }

        let args = fetch_args(schema, &options);
        match self.call_remote(&schema.fetch_operation, &args).await {
            Ok(data) => {
                self.cache_response(schema, &options, &data).await?;
                self.touch(bucket).await;
                Ok(ReadResult::live(data))
            }
            Err(err) if err.allows_cache_fallback() => {
                tracing::warn!(
                    target: "offline::gateway",
                    %bucket,
                    error = %err,
                    "remote read failed; trying cache"
                );
                match self.read_cached(bucket, &options).await? {
                    Some(data) => Ok(ReadResult::cached(
                        data,
                        false,
                        Some(STALE_DATA_WARNING.to_string()),
                    )),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    pub async fn write(
        &self,
        operation_kind: OperationKind,
        payload: SyncPayload,
    ) -> Result<WriteOutcome, AppError> {
        let operation = self
            .registry
            .write_operation(&operation_kind)
            .ok_or_else(|| {
                AppError::ValidationError(format!("unknown operation kind '{operation_kind}'"))
            })?;

        if !self.monitor.is_reachable() {
            return self.enqueue(operation_kind, payload).await;
        }

        match self
            .call_remote(&operation.remote_operation, payload.as_json())
            .await
        {
            Ok(data) => {
                // the server has applied the write at this point
                if let Err(err) = self.refresh_target(operation, &data).await {
                    tracing::warn!(
                        target: "offline::gateway",
                        operation = %operation_kind,
                        error = %err,
                        "failed to cache confirmed write"
                    );
                }
                Ok(WriteOutcome::Confirmed { data })
            }
            Err(AppError::TransportUnavailable(reason)) => {
                tracing::warn!(
                    target: "offline::gateway",
                    operation = %operation_kind,
                    %reason,
                    "remote write unavailable; queueing"
                );
                self.enqueue(operation_kind, payload).await
            }
            Err(err) => Err(err),
        }
    }

    /// Drains the pending queue against the remote service now.
    pub async fn reconcile(&self) -> Result<SyncReport, AppError> {
        self.reconcile_with(SyncTrigger::Manual).await
    }

    /// Follows the monitor and reconciles on every transition to reachable. Also reconciles
    /// once right away when already reachable.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut transitions = self.monitor.subscribe();

        tokio::spawn(async move {
            if gateway.monitor.is_reachable() {
                gateway.reconcile_logged(SyncTrigger::Startup).await;
            }

            loop {
                match transitions.recv().await {
                    Ok(ConnectivityState::Reachable) => {
                        gateway.reconcile_logged(SyncTrigger::Reconnect).await;
                    }
                    Ok(ConnectivityState::Unreachable) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            target: "offline::gateway",
                            skipped,
                            "missed connectivity events"
                        );
                        if gateway.monitor.is_reachable() {
                            gateway.reconcile_logged(SyncTrigger::Reconnect).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncReport> {
        self.sync_events.subscribe()
    }

    pub async fn pending_count(&self) -> Result<usize, AppError> {
        self.queue.size().await
    }

    pub async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let Some(raw) = self.settings.get(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|err| AppError::Serialization(format!("invalid {LAST_SYNC_KEY}: {err}")))
    }

    pub fn sync_metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn cache_status(
        &self,
        max_age_minutes: Option<u32>,
    ) -> Result<CacheStatusSnapshot, AppError> {
        self.store
            .cache_status(max_age_minutes.unwrap_or(self.freshness_minutes))
            .await
    }

    async fn reconcile_logged(&self, trigger: SyncTrigger) {
        if let Err(err) = self.reconcile_with(trigger).await {
            tracing::error!(
                target: "offline::gateway",
                %trigger,
                error = %err,
                "reconciliation failed"
            );
        }
    }

    async fn reconcile_with(&self, trigger: SyncTrigger) -> Result<SyncReport, AppError> {
        if self.queue.size().await? == 0 {
            return Ok(SyncReport {
                trigger,
                outcome: SyncOutcome::default(),
                remaining: 0,
                completed_at: self.clock.now(),
            });
        }

        let started = Instant::now();
        let outcome = self
            .queue
            .drain(|mutation| self.remote_apply(mutation))
            .await?;
        let remaining = self.queue.size().await?;
        let completed_at = self.clock.now();
        let report = SyncReport {
            trigger,
            outcome,
            remaining,
            completed_at,
        };

        if report.outcome.skipped {
            tracing::debug!(
                target: "offline::gateway",
                %trigger,
                "reconciliation skipped; drain already running"
            );
            return Ok(report);
        }

        self.metrics.record(&DrainMetadata {
            trigger: Some(trigger.to_string()),
            succeeded: report.outcome.succeeded_count,
            failed: report.outcome.failed_count,
            terminal: report.outcome.terminal_mutations.len() as u32,
            duration_ms: Some(started.elapsed().as_millis() as u64),
        });

        if report.outcome.is_clean() {
            self.settings
                .set(LAST_SYNC_KEY, &completed_at.to_rfc3339())
                .await?;
        }

        tracing::info!(
            target: "offline::gateway",
            %trigger,
            succeeded = report.outcome.succeeded_count,
            failed = report.outcome.failed_count,
            remaining,
            "reconciliation finished"
        );
        // no subscribers is fine
        let _ = self.sync_events.send(report.clone());
        Ok(report)
    }

    async fn remote_apply(&self, mutation: PendingMutation) -> Result<(), MutationFailure> {
        let Some(operation) = self.registry.write_operation(&mutation.operation_kind) else {
            return Err(MutationFailure::permanent(format!(
                "unknown operation kind '{}'",
                mutation.operation_kind
            )));
        };

        match self
            .call_remote(&operation.remote_operation, mutation.payload.as_json())
            .await
        {
            Ok(data) => {
                if let Err(err) = self.refresh_target(operation, &data).await {
                    tracing::warn!(
                        target: "offline::gateway",
                        mutation_id = %mutation.id,
                        error = %err,
                        "applied mutation but could not cache the response"
                    );
                }
                Ok(())
            }
            // the service processed and rejected it; replaying cannot help
            Err(AppError::RemoteApi(message)) => Err(MutationFailure::permanent(message)),
            Err(err) => Err(MutationFailure::transient(err.to_string())),
        }
    }

    async fn enqueue(
        &self,
        operation_kind: OperationKind,
        payload: SyncPayload,
    ) -> Result<WriteOutcome, AppError> {
        let mutation_id = self.queue.enqueue(operation_kind, payload).await?;
        Ok(WriteOutcome::Queued { mutation_id })
    }

    async fn call_remote(&self, operation: &str, args: &Value) -> Result<Value, AppError> {
        let response = self
            .transport
            .call(operation, args)
            .await
            .map_err(transport_error_to_app)?;
        validate_response(response)
    }

    async fn read_cached(
        &self,
        bucket: &BucketName,
        options: &ReadOptions,
    ) -> Result<Option<Value>, AppError> {
        let data = if let Some(key) = &options.key {
            self.store
                .get(bucket, key)
                .await?
                .map(|record| record.payload.into_inner())
        } else if let Some(index) = &options.index {
            let records = self
                .store
                .get_by_index(bucket, &index.name, &index.value)
                .await?;
            if records.is_empty() {
                None
            } else {
                Some(payload_array(records.into_iter().map(|r| r.payload)))
            }
        } else if self.store.has_cached(bucket).await? {
            let records = self.store.get_all(bucket).await?;
            Some(payload_array(records.into_iter().map(|r| r.payload)))
        } else {
            None
        };

        if data.is_some() {
            self.touch(bucket).await;
        }
        Ok(data)
    }

    async fn cache_response(
        &self,
        schema: &BucketSchema,
        options: &ReadOptions,
        data: &Value,
    ) -> Result<(), AppError> {
        let records = records_from_value(schema, data);
        match data {
            Value::Array(_) => {
                self.store_with_eviction(&schema.bucket, || {
                    self.store.put_bulk(&schema.bucket, &records)
                })
                .await?;
                // a filtered result is not the whole bucket
                if !options.is_filtered() {
                    self.store.mark_fresh(&schema.bucket).await?;
                }
            }
            Value::Object(_) => {
                if let Some(record) = records.first() {
                    self.store_with_eviction(&schema.bucket, || self.store.put(record))
                        .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn refresh_target(
        &self,
        operation: &WriteOperation,
        data: &Value,
    ) -> Result<(), AppError> {
        let Some(schema) = operation
            .target_bucket
            .as_ref()
            .and_then(|bucket| self.registry.bucket(bucket))
        else {
            return Ok(());
        };
        let records = records_from_value(schema, data);
        if records.is_empty() {
            return Ok(());
        }
        self.store_with_eviction(&schema.bucket, || {
            self.store.put_bulk(&schema.bucket, &records)
        })
        .await
    }

    /// Runs a store write; on storage exhaustion evicts other buckets and retries exactly once.
    async fn store_with_eviction<F, Fut>(
        &self,
        bucket: &BucketName,
        mut write: F,
    ) -> Result<(), AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        match write().await {
            Err(err) if err.is_storage_exhausted() => {
                tracing::warn!(
                    target: "offline::gateway",
                    %bucket,
                    error = %err,
                    "local storage exhausted; evicting"
                );
                self.evict_for(bucket).await?;
                write().await
            }
            other => other,
        }
    }

    async fn evict_for(&self, bucket: &BucketName) -> Result<(), AppError> {
        let usage = self.store.bucket_usage().await?;
        let victims = self.eviction.select_victims(&usage, bucket, &self.registry);
        if victims.is_empty() {
            tracing::warn!(target: "offline::gateway", %bucket, "no evictable buckets");
        }
        let removed = try_join_all(victims.iter().map(|victim| self.store.clear(victim))).await?;
        for (victim, removed) in victims.iter().zip(removed) {
            tracing::info!(target: "offline::gateway", bucket = %victim, removed, "evicted bucket");
        }
        Ok(())
    }

    async fn touch(&self, bucket: &BucketName) {
        if let Err(err) = self.store.touch(bucket).await {
            tracing::debug!(
                target: "offline::gateway",
                %bucket,
                error = %err,
                "failed to record bucket access"
            );
        }
    }
}

fn fetch_args(schema: &BucketSchema, options: &ReadOptions) -> Value {
    let mut args = options.params.clone().unwrap_or_default();
    if let Some(key) = &options.key {
        args.insert(
            schema.primary_key_field.clone(),
            Value::String(key.as_str().to_string()),
        );
    }
    if let Some(index) = &options.index {
        args.insert("index".to_string(), Value::String(index.name.clone()));
        args.insert("indexValue".to_string(), Value::String(index.value.clone()));
    }
    Value::Object(args)
}

fn payload_array(payloads: impl Iterator<Item = SyncPayload>) -> Value {
    Value::Array(payloads.map(SyncPayload::into_inner).collect())
}

fn transport_error_to_app(err: TransportError) -> AppError {
    match err {
        TransportError::Unavailable(reason)
        | TransportError::Timeout(reason)
        | TransportError::Failed(reason) => AppError::TransportUnavailable(reason),
    }
}

/// Checks a raw remote reply and unwraps its `data`.
///
/// Markup bodies mean the transport reached something other than the API and fail with
/// [`AppError::TransportMisconfigured`]. An explicit error envelope becomes
/// [`AppError::RemoteApi`]; any other shape is [`AppError::MalformedResponse`].
pub fn validate_response(response: RawResponse) -> Result<Value, AppError> {
    let is_markup_type = response
        .content_type
        .as_deref()
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("html") || ct.contains("xml")
        })
        .unwrap_or(false);
    if is_markup_type || response.body.trim_start().starts_with('<') {
        return Err(AppError::TransportMisconfigured(format!(
            "expected JSON but received markup (content type {})",
            response.content_type.as_deref().unwrap_or("unknown")
        )));
    }

    let mut envelope: Value = serde_json::from_str(&response.body)
        .map_err(|err| AppError::MalformedResponse(format!("body is not JSON: {err}")))?;
    let Some(fields) = envelope.as_object_mut() else {
        return Err(AppError::MalformedResponse(
            "response is not an object".to_string(),
        ));
    };

    match fields.get("status").and_then(Value::as_str) {
        Some("success") => fields.remove("data").ok_or_else(|| {
            AppError::MalformedResponse("success response without data".to_string())
        }),
        Some("error") => match fields.get("message").and_then(Value::as_str) {
            Some(message) => Err(AppError::RemoteApi(message.to_string())),
            None => Err(AppError::MalformedResponse(
                "error response without message".to_string(),
            )),
        },
        _ => Err(AppError::MalformedResponse(
            "missing or unknown status".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_yields_data() {
        let data = validate_response(RawResponse::json(r#"{"status":"success","data":[1,2]}"#));
        assert_eq!(data.unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_error_envelope_is_remote_api_error() {
        let err = validate_response(RawResponse::json(
            r#"{"status":"error","message":"class not found"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, AppError::RemoteApi(ref m) if m == "class not found"));
    }

    #[test]
    fn test_markup_is_misconfigured() {
        let html = RawResponse {
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: "<!DOCTYPE html><html></html>".to_string(),
        };
        assert!(matches!(
            validate_response(html),
            Err(AppError::TransportMisconfigured(_))
        ));

        let untyped = RawResponse {
            content_type: None,
            body: "  <html>login</html>".to_string(),
        };
        assert!(matches!(
            validate_response(untyped),
            Err(AppError::TransportMisconfigured(_))
        ));
    }

    #[test]
    fn test_unexpected_shapes_are_malformed() {
        for body in [
            r#"{"ok":true}"#,
            r#"{"status":"success"}"#,
            r#"{"status":"error"}"#,
            r#"[1,2,3]"#,
            "not json",
        ] {
            let err = validate_response(RawResponse::json(body)).unwrap_err();
            assert!(matches!(err, AppError::MalformedResponse(_)), "{body}");
            assert!(err.allows_cache_fallback());
        }
    }

    #[test]
    fn test_fetch_args_include_key_and_params() {
        let registry = OperationRegistry::with_defaults().unwrap();
        let schema = registry
            .bucket(&BucketName::parse("students").unwrap())
            .unwrap();
        let mut params = Map::new();
        params.insert("term".to_string(), json!("2026-1"));
        let options = ReadOptions::by_key(RecordKey::parse("s1").unwrap()).with_params(params);

        assert_eq!(
            fetch_args(schema, &options),
            json!({ "term": "2026-1", "studentId": "s1" })
        );
    }
}
