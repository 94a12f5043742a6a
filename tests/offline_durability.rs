mod common;

use classroom_sync::application::ports::{KeyValueStore, LocalStructuredStore, RemoteTransport};
use classroom_sync::application::services::{DrainLease, PendingMutationQueue};
use classroom_sync::domain::entities::CachedRecord;
use classroom_sync::domain::value_objects::RecordKey;
use classroom_sync::infrastructure::database::ConnectionPool;
use classroom_sync::infrastructure::network::ManualConnectivitySignal;
use classroom_sync::infrastructure::offline::SqliteLocalStore;
use classroom_sync::infrastructure::storage::SqliteKeyValueStore;
use classroom_sync::shared::clock::{Clock, SystemClock};
use classroom_sync::{AppConfig, SyncState};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cache_and_queue_survive_restart() {
    let dir = tempfile::tempdir().expect("temp dir");

    {
        let pool = ConnectionPool::open_in_dir(dir.path()).await.expect("open");
        pool.migrate().await.expect("migrate");
        let store = SqliteLocalStore::new(pool.get_pool().clone());
        let record = CachedRecord::new(
            bucket("students"),
            RecordKey::parse("s1").unwrap(),
            payload(json!({ "studentId": "s1", "name": "Ada" })),
        )
        .with_index("classId", "c1");
        store.put(&record).await.expect("put");
        store.mark_fresh(&bucket("students")).await.expect("mark fresh");

        let settings: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));
        let queue = PendingMutationQueue::new(settings, Arc::new(SystemClock), 5);
        queue
            .enqueue(kind("update-scores"), payload(json!({ "scoreId": "sc1" })))
            .await
            .expect("enqueue");
        pool.close().await;
    }

    let pool = ConnectionPool::open_in_dir(dir.path()).await.expect("reopen");
    pool.migrate().await.expect("migrate again");
    let store = SqliteLocalStore::new(pool.get_pool().clone());
    let record = store
        .get(&bucket("students"), &RecordKey::parse("s1").unwrap())
        .await
        .unwrap()
        .expect("record survives");
    assert_eq!(record.index_value("classId"), Some("c1"));
    assert!(store.is_fresh(&bucket("students"), 60).await.unwrap());

    let settings: Arc<dyn KeyValueStore> =
        Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));
    let queue = PendingMutationQueue::new(settings, Arc::new(SystemClock), 5);
    assert_eq!(queue.size().await.unwrap(), 1);
}

#[tokio::test]
async fn queues_sharing_a_database_never_drain_together() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = ConnectionPool::open_in_dir(dir.path()).await.expect("open");
    pool.migrate().await.expect("migrate");
    let settings: Arc<dyn KeyValueStore> =
        Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ttl = Duration::from_secs(30);

    let first = Arc::new(
        PendingMutationQueue::new(settings.clone(), clock.clone(), 5)
            .with_lease(DrainLease::new(settings.clone(), clock.clone(), ttl)),
    );
    let second = Arc::new(
        PendingMutationQueue::new(settings.clone(), clock.clone(), 5)
            .with_lease(DrainLease::new(settings.clone(), clock.clone(), ttl)),
    );
    first
        .enqueue(kind("update-scores"), payload(json!({ "scoreId": "sc1" })))
        .await
        .expect("enqueue");
    // writes from either handle land in the same document
    second
        .enqueue(kind("update-scores"), payload(json!({ "scoreId": "sc2" })))
        .await
        .expect("enqueue");

    let other = second.clone();
    let outcome = first
        .drain(move |_| {
            let other = other.clone();
            async move {
                let nested = other.drain(|_| async { Ok(()) }).await.expect("nested drain");
                assert!(nested.skipped);
                Ok(())
            }
        })
        .await
        .expect("drain");

    assert_eq!(outcome.succeeded_count, 2);
    assert_eq!(second.size().await.unwrap(), 0);
}

#[tokio::test]
async fn sync_state_wires_offline_session_from_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().display().to_string();
    config.database.url = format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("nested").join("offline.db").display()
    );
    config.sync.auto_reconcile = false;

    let signal = ManualConnectivitySignal::new(false);
    let transport = Arc::new(ScriptedTransport::new());
    let state = SyncState::with_transport(
        config.clone(),
        &signal,
        transport.clone() as Arc<dyn RemoteTransport>,
    )
    .await
    .expect("initialize");

    assert!(!state.monitor.is_reachable());
    let outcome = state
        .gateway
        .write(kind("update-remarks"), payload(json!({ "remarkId": "r1" })))
        .await
        .expect("write");
    assert!(outcome.is_queued());
    state.shutdown().await;

    let state = SyncState::with_transport(config, &signal, transport as Arc<dyn RemoteTransport>)
        .await
        .expect("reinitialize");
    assert_eq!(state.gateway.pending_count().await.unwrap(), 1);
    state.shutdown().await;
}
