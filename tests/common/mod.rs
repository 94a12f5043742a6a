#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use classroom_sync::application::ports::{
    KeyValueStore, LocalStructuredStore, RawResponse, RemoteTransport, TransportError,
};
use classroom_sync::application::services::{
    ConnectivityMonitor, OperationRegistry, PendingMutationQueue, RequestGateway,
};
use classroom_sync::domain::value_objects::{BucketName, OperationKind, SyncPayload};
use classroom_sync::infrastructure::database::ConnectionPool;
use classroom_sync::infrastructure::offline::SqliteLocalStore;
use classroom_sync::infrastructure::storage::SqliteKeyValueStore;
use classroom_sync::shared::clock::{Clock, ManualClock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Transport answering from per-operation scripts. One-shot replies are used first, then the
/// sticky reply; an operation with neither is unreachable.
#[derive(Default)]
pub struct ScriptedTransport {
    once: Mutex<HashMap<String, VecDeque<Result<RawResponse, TransportError>>>>,
    sticky: Mutex<HashMap<String, Result<RawResponse, TransportError>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_once(&self, operation: &str, reply: Result<RawResponse, TransportError>) {
        self.once
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn respond_always(&self, operation: &str, reply: Result<RawResponse, TransportError>) {
        self.sticky
            .lock()
            .unwrap()
            .insert(operation.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn call(&self, operation: &str, args: &Value) -> Result<RawResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), args.clone()));

        if let Some(reply) = self
            .once
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.sticky
            .lock()
            .unwrap()
            .get(operation)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Unavailable(format!(
                    "no route for {operation}"
                )))
            })
    }
}

pub fn success(data: Value) -> Result<RawResponse, TransportError> {
    Ok(RawResponse::json(
        json!({ "status": "success", "data": data }).to_string(),
    ))
}

pub fn api_error(message: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse::json(
        json!({ "status": "error", "message": message }).to_string(),
    ))
}

pub fn html_page() -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        content_type: Some("text/html".to_string()),
        body: "<!DOCTYPE html><html><body>Sign in</body></html>".to_string(),
    })
}

pub fn unreachable() -> Result<RawResponse, TransportError> {
    Err(TransportError::Unavailable("connection refused".to_string()))
}

pub fn bucket(name: &str) -> BucketName {
    BucketName::parse(name).expect("bucket name")
}

pub fn kind(name: &str) -> OperationKind {
    OperationKind::parse(name).expect("operation kind")
}

pub fn payload(value: Value) -> SyncPayload {
    SyncPayload::new(value).expect("payload")
}

pub fn students() -> Value {
    json!([
        { "studentId": "s1", "name": "Ada", "classId": "c1" },
        { "studentId": "s2", "name": "Grace", "classId": "c1" },
        { "studentId": "s3", "name": "Linus", "classId": "c2" }
    ])
}

pub async fn memory_pool() -> ConnectionPool {
    let pool = ConnectionPool::from_memory().await.expect("in-memory sqlite");
    pool.migrate().await.expect("migrations");
    pool
}

pub struct GatewayTestContext {
    pub pool: ConnectionPool,
    pub store: Arc<SqliteLocalStore>,
    pub settings: Arc<SqliteKeyValueStore>,
    pub queue: Arc<PendingMutationQueue>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<RequestGateway>,
}

pub async fn setup_gateway(online: bool) -> GatewayTestContext {
    setup_gateway_with(online, None, 5).await
}

pub async fn setup_gateway_with(
    online: bool,
    quota_bytes: Option<u64>,
    max_attempts: u32,
) -> GatewayTestContext {
    build_gateway(online, quota_bytes, max_attempts, None).await
}

pub async fn setup_gateway_with_freshness(online: bool, minutes: u32) -> GatewayTestContext {
    build_gateway(online, None, 5, Some(minutes)).await
}

async fn build_gateway(
    online: bool,
    quota_bytes: Option<u64>,
    max_attempts: u32,
    freshness_minutes: Option<u32>,
) -> GatewayTestContext {
    let pool = memory_pool().await;
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
    ));
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let store = Arc::new(
        SqliteLocalStore::with_clock(pool.get_pool().clone(), dyn_clock.clone())
            .with_quota(quota_bytes),
    );
    let settings = Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));
    let queue = Arc::new(PendingMutationQueue::new(
        settings.clone() as Arc<dyn KeyValueStore>,
        dyn_clock.clone(),
        max_attempts,
    ));
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    let transport = Arc::new(ScriptedTransport::new());

    let mut gateway = RequestGateway::new(
        store.clone() as Arc<dyn LocalStructuredStore>,
        queue.clone(),
        monitor.clone(),
        transport.clone() as Arc<dyn RemoteTransport>,
        settings.clone() as Arc<dyn KeyValueStore>,
        Arc::new(OperationRegistry::with_defaults().expect("registry")),
    )
    .with_clock(dyn_clock);
    if let Some(minutes) = freshness_minutes {
        gateway = gateway.with_freshness_window(minutes);
    }
    let gateway = Arc::new(gateway);

    GatewayTestContext {
        pool,
        store,
        settings,
        queue,
        monitor,
        transport,
        clock,
        gateway,
    }
}
