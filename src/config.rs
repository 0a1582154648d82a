//! Configuration for the client-side collector.
//!
//! Plain data with defaults, builder-style setters, validation, and
//! environment-variable overrides (`EVENT_TELEMETRY_*`). Server-side
//! scheduler settings live next to their components (`DrainConfig`,
//! `RetentionConfig`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-instrumentation-kind auto-track toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoTrackConfig {
    /// Emit page-view events
    pub page_views: bool,

    /// Emit click / link-click / form-submit events
    pub clicks: bool,

    /// Emit error, unhandled-rejection, and resource-error events
    pub errors: bool,

    /// Emit api-request events from the request wrapper
    pub api_requests: bool,

    /// Emit page-leave events (including the unload path)
    pub page_leave: bool,
}

impl Default for AutoTrackConfig {
    fn default() -> Self {
        Self {
            page_views: true,
            clicks: true,
            errors: true,
            api_requests: true,
            page_leave: true,
        }
    }
}

/// Configuration for the client collector.
///
/// # Examples
///
/// ```rust
/// use event_telemetry::CollectorConfig;
/// use std::time::Duration;
///
/// let config = CollectorConfig::default()
///     .with_api_url("https://telemetry.example.com/api")
///     .with_batch_size(20)
///     .with_batch_interval(Duration::from_secs(15));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    /// Base URL of the ingestion API; batches go to `{api_url}/user-events/batch`
    pub api_url: String,

    /// Number of queued events that triggers an immediate flush, and the
    /// maximum number of events per transport call
    pub batch_size: usize,

    /// Interval of the periodic flush timer
    pub batch_interval: Duration,

    /// Maximum delivery retries per item before it is dropped
    pub max_retries: u32,

    /// Base retry delay; doubles per retry
    pub retry_delay: Duration,

    /// Client-side bound on each transport call
    pub request_timeout: Duration,

    /// Persist the pending queue to durable storage between reloads
    pub persist_queue: bool,

    /// Persist session state for the session's lifetime
    pub persist_session: bool,

    /// Extra headers attached to every transport request
    pub headers: HashMap<String, String>,

    /// Auto-instrumentation toggles
    pub auto_track: AutoTrackConfig,

    /// Enable detailed logging of queue activity
    pub debug_logging: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_string(),
            batch_size: 10,
            batch_interval: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            persist_queue: true,
            persist_session: true,
            headers: HashMap::new(),
            auto_track: AutoTrackConfig::default(),
            debug_logging: false,
        }
    }
}

impl CollectorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value would make the collector inoperable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_url.trim().is_empty() {
            anyhow::bail!("api_url cannot be empty");
        }

        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.batch_interval.is_zero() {
            anyhow::bail!("batch_interval must be greater than 0");
        }

        if self.retry_delay.is_zero() {
            anyhow::bail!("retry_delay must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.batch_size > 1000 {
            tracing::warn!(
                batch_size = self.batch_size,
                "batch_size is very large, single transport calls may be slow"
            );
        }

        Ok(())
    }

    /// Sets the ingestion API base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the flush batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the periodic flush interval.
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Sets the maximum retries per item.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the transport timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables queue persistence.
    pub fn with_persist_queue(mut self, enabled: bool) -> Self {
        self.persist_queue = enabled;
        self
    }

    /// Enables or disables session persistence.
    pub fn with_persist_session(mut self, enabled: bool) -> Self {
        self.persist_session = enabled;
        self
    }

    /// Adds a header sent with every transport request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the auto-track toggles.
    pub fn with_auto_track(mut self, auto_track: AutoTrackConfig) -> Self {
        self.auto_track = auto_track;
        self
    }

    /// Enables or disables debug logging.
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Applies `EVENT_TELEMETRY_*` environment variable overrides.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("EVENT_TELEMETRY_API_URL") {
            if !val.trim().is_empty() {
                self.api_url = val;
            }
        }

        if let Ok(val) = std::env::var("EVENT_TELEMETRY_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                self.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("EVENT_TELEMETRY_BATCH_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.batch_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("EVENT_TELEMETRY_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.max_retries = retries;
            }
        }

        if let Ok(val) = std::env::var("EVENT_TELEMETRY_RETRY_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                self.retry_delay = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("EVENT_TELEMETRY_DEBUG_LOGGING") {
            if let Ok(enabled) = val.parse() {
                self.debug_logging = enabled;
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(config.persist_queue);
        assert!(config.auto_track.page_views);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let config = CollectorConfig {
            api_url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            batch_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            retry_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = CollectorConfig::new()
            .with_api_url("https://telemetry.example.com")
            .with_batch_size(50)
            .with_max_retries(5)
            .with_header("x-api-key", "secret")
            .with_persist_queue(false);

        assert_eq!(config.api_url, "https://telemetry.example.com");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.headers.get("x-api-key").map(String::as_str), Some("secret"));
        assert!(!config.persist_queue);
    }

    #[test]
    fn test_config_serialization() {
        let config = CollectorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CollectorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
