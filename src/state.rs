use crate::application::ports::{
    ConnectivitySignal, KeyValueStore, LocalStructuredStore, RemoteTransport,
};
use crate::application::services::{
    ConnectivityMonitor, DrainLease, OperationRegistry, PendingMutationQueue, RequestGateway,
};
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::offline::SqliteLocalStore;
use crate::infrastructure::remote::HttpRemoteTransport;
use crate::infrastructure::storage::SqliteKeyValueStore;
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::AppConfig;
use crate::shared::logging::init_logging;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything one client session needs, wired from configuration.
pub struct SyncState {
    pub config: AppConfig,
    pub pool: ConnectionPool,
    pub store: Arc<dyn LocalStructuredStore>,
    pub queue: Arc<PendingMutationQueue>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub gateway: Arc<RequestGateway>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncState {
    /// Opens the configured database with the HTTP transport from `config.remote`.
    pub async fn initialize(
        config: AppConfig,
        signal: &dyn ConnectivitySignal,
    ) -> anyhow::Result<Self> {
        init_logging();
        let transport = HttpRemoteTransport::from_config(&config.remote)
            .context("failed to build remote transport")?;
        Self::with_transport(config, signal, Arc::new(transport)).await
    }

    pub async fn with_transport(
        config: AppConfig,
        signal: &dyn ConnectivitySignal,
        transport: Arc<dyn RemoteTransport>,
    ) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid configuration: {reason}"))?;

        if let Some(path) = sqlite_file_dir(&config.database.url) {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create data dir {}", path.display()))?;
        }
        let pool = ConnectionPool::from_config(&config.database)
            .await
            .with_context(|| format!("failed to open {}", config.database.url))?;
        pool.migrate().await.context("failed to run migrations")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn LocalStructuredStore> = Arc::new(
            SqliteLocalStore::with_clock(pool.get_pool().clone(), clock.clone())
                .with_quota(config.storage.quota_bytes),
        );
        let settings: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(pool.get_pool().clone()));

        let lease = DrainLease::new(
            settings.clone(),
            clock.clone(),
            Duration::from_secs(config.sync.lease_ttl_secs),
        );
        let queue = Arc::new(
            PendingMutationQueue::new(settings.clone(), clock.clone(), config.sync.max_attempts)
                .with_lease(lease),
        );

        let monitor = Arc::new(ConnectivityMonitor::from_signal(signal));
        let registry = Arc::new(OperationRegistry::with_defaults()?);
        let gateway = Arc::new(
            RequestGateway::new(
                store.clone(),
                queue.clone(),
                monitor.clone(),
                transport,
                settings,
                registry,
            )
            .with_clock(clock)
            .with_freshness_window(config.storage.freshness_minutes),
        );

        let mut tasks = vec![monitor.attach(signal)];
        if config.sync.auto_reconcile {
            tasks.push(gateway.start());
        }

        tracing::info!(
            target: "offline::gateway",
            database = %config.database.url,
            reachable = monitor.is_reachable(),
            "sync state initialized"
        );

        Ok(Self {
            config,
            pool,
            store,
            queue,
            monitor,
            gateway,
            tasks,
        })
    }

    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pool.close().await;
    }
}

/// Directory holding a file-backed `sqlite:` URL, if any.
fn sqlite_file_dir(url: &str) -> Option<std::path::PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_dir() {
        assert_eq!(
            sqlite_file_dir("sqlite:/tmp/sync/offline.db?mode=rwc"),
            Some(std::path::PathBuf::from("/tmp/sync"))
        );
        assert_eq!(sqlite_file_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_file_dir("sqlite:offline.db"), None);
    }
}
