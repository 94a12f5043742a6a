use crate::application::ports::remote_transport::{RawResponse, RemoteTransport, TransportError};
use crate::shared::config::RemoteConfig;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use std::time::Duration;

/// Posts `{"action": operation, "payload": args}` to a single API endpoint.
pub struct HttpRemoteTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Failed(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, TransportError> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl RemoteTransport for HttpRemoteTransport {
    async fn call(&self, operation: &str, args: &Value) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "action": operation, "payload": args }))
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(classify_error)?;

        if !status.is_success() {
            tracing::debug!(
                target: "offline::gateway",
                %operation,
                %status,
                "remote returned non-success status"
            );
        }

        Ok(RawResponse { content_type, body })
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Failed(err.to_string())
    }
}
