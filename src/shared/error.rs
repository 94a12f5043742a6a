use thiserror::Error;

/// SQLite primary result code for `SQLITE_FULL`.
const SQLITE_FULL: &str = "13";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Transport misconfigured: {0}")]
    TransportMisconfigured(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Remote API error: {0}")]
    RemoteApi(String),

    #[error("No cached data: {0}")]
    NoCachedData(String),

    #[error("Storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors after which a read may still be served from the local cache.
    pub fn allows_cache_fallback(&self) -> bool {
        matches!(
            self,
            AppError::TransportUnavailable(_)
                | AppError::MalformedResponse(_)
                | AppError::RemoteApi(_)
        )
    }

    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, AppError::StorageExhausted(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                return AppError::StorageExhausted(db_err.message().to_string());
            }
        }
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
