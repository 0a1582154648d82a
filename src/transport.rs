//! Batch transport to the ingestion endpoint.
//!
//! One batch becomes one `POST {api_url}/user-events/batch` request. The
//! retry policy is deliberately coarse: every failure, network-level or
//! HTTP-level, is retryable up to the collector's `max_retries` — there is no
//! status-code-based retry/no-retry distinction. A secondary fire-and-forget
//! path exists solely for the unload drain, where nothing may block teardown.

use crate::config::CollectorConfig;
use crate::event::UserEvent;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Transport delivery errors. All variants are retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned status {status}")]
    Http { status: u16 },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivery seam between the collector and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one batch; the whole batch succeeds or fails together.
    async fn send_batch(&self, events: &[UserEvent]) -> Result<(), TransportError>;

    /// Best-effort delivery for the unload path: never blocks, never retries,
    /// outcome is ignored.
    fn send_fire_and_forget(&self, events: Vec<UserEvent>);
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    events: &'a [UserEvent],
}

/// HTTP transport for the batch ingestion endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpTransport {
    /// Builds a transport from the collector configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &CollectorConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| TransportError::Network(error.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "Skipping invalid header name");
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                warn!(header = %name, "Skipping invalid header value");
                continue;
            };
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            endpoint: format!(
                "{}/user-events/batch",
                config.api_url.trim_end_matches('/')
            ),
            headers,
            timeout: config.request_timeout,
        })
    }

    async fn post_batch(
        client: &reqwest::Client,
        endpoint: &str,
        headers: &HeaderMap,
        timeout: Duration,
        events: &[UserEvent],
    ) -> Result<(), TransportError> {
        let response = client
            .post(endpoint)
            .headers(headers.clone())
            .json(&BatchPayload { events })
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Network(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, events: &[UserEvent]) -> Result<(), TransportError> {
        Self::post_batch(
            &self.client,
            &self.endpoint,
            &self.headers,
            self.timeout,
            events,
        )
        .await
    }

    fn send_fire_and_forget(&self, events: Vec<UserEvent>) {
        if events.is_empty() {
            return;
        }

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let headers = self.headers.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            if let Err(error) =
                Self::post_batch(&client, &endpoint, &headers, timeout, &events).await
            {
                debug!(%error, count = events.len(), "Unload-path delivery failed");
            }
        });
    }
}
