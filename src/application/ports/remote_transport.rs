use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Raw reply of the remote service before shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub content_type: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("remote service unreachable: {0}")]
    Unavailable(String),

    #[error("remote call timed out: {0}")]
    Timeout(String),

    #[error("remote call failed: {0}")]
    Failed(String),
}

/// Request/response channel to the remote service, keyed by operation name.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn call(&self, operation: &str, args: &Value) -> Result<RawResponse, TransportError>;
}
