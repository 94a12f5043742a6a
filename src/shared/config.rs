use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reconcile the pending queue automatically on every reachable transition.
    pub auto_reconcile: bool,
    /// Failed drain attempts before a mutation becomes terminal. 0 retries forever.
    pub max_attempts: u32,
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Upper bound on cached payload bytes; `None` leaves capacity to the filesystem.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    pub freshness_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("classroom-sync"))
            .unwrap_or_else(|| PathBuf::from("./data"));

        Self {
            database: DatabaseConfig {
                url: database_url_in(&data_dir),
                max_connections: 5,
            },
            sync: SyncConfig {
                auto_reconcile: true,
                max_attempts: 5,
                lease_ttl_secs: 60,
            },
            storage: StorageConfig {
                data_dir: data_dir.display().to_string(),
                quota_bytes: None,
                freshness_minutes: 60,
            },
            remote: RemoteConfig {
                endpoint: "http://localhost:8080/api".to_string(),
                timeout_secs: 30,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(value) = env_parsed::<u32>("CLASSROOM_SYNC_DATABASE_MAX_CONNECTIONS") {
            cfg.database.max_connections = value.max(1);
        }
        if let Ok(v) = std::env::var("CLASSROOM_SYNC_AUTO_RECONCILE") {
            cfg.sync.auto_reconcile = parse_bool(&v, cfg.sync.auto_reconcile);
        }
        if let Some(value) = env_parsed::<u32>("CLASSROOM_SYNC_MAX_ATTEMPTS") {
            cfg.sync.max_attempts = value;
        }
        if let Some(value) = env_parsed::<u64>("CLASSROOM_SYNC_LEASE_TTL_SECS") {
            cfg.sync.lease_ttl_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("CLASSROOM_SYNC_DATA_DIR") {
            if !v.trim().is_empty() {
                cfg.storage.data_dir = v.trim().to_string();
                cfg.database.url = database_url_in(Path::new(&cfg.storage.data_dir));
            }
        }
        if let Ok(v) = std::env::var("CLASSROOM_SYNC_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v.trim().to_string();
            }
        }
        if let Some(value) = env_parsed::<u64>("CLASSROOM_SYNC_QUOTA_BYTES") {
            cfg.storage.quota_bytes = if value == 0 { None } else { Some(value) };
        }
        if let Some(value) = env_parsed::<u32>("CLASSROOM_SYNC_FRESHNESS_MINUTES") {
            cfg.storage.freshness_minutes = value;
        }
        if let Ok(v) = std::env::var("CLASSROOM_SYNC_REMOTE_ENDPOINT") {
            if !v.trim().is_empty() {
                cfg.remote.endpoint = v.trim().to_string();
            }
        }
        if let Some(value) = env_parsed::<u64>("CLASSROOM_SYNC_REMOTE_TIMEOUT_SECS") {
            cfg.remote.timeout_secs = value.max(1);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.trim().is_empty() {
            return Err("Database url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.lease_ttl_secs == 0 {
            return Err("Sync lease_ttl_secs must be greater than 0".to_string());
        }
        if let Some(0) = self.storage.quota_bytes {
            return Err("Storage quota_bytes must be greater than 0".to_string());
        }
        if !(self.remote.endpoint.starts_with("http://")
            || self.remote.endpoint.starts_with("https://"))
        {
            return Err("Remote endpoint must be an http(s) URL".to_string());
        }
        if self.remote.timeout_secs == 0 {
            return Err("Remote timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn database_url_in(data_dir: &Path) -> String {
    format!("sqlite:{}?mode=rwc", data_dir.join("offline.db").display())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
