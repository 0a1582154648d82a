//! # Event Telemetry Pipeline
//!
//! A client/server pipeline for user-interaction telemetry: capture events on
//! the client, batch and durably buffer them against network failure, absorb
//! ingestion bursts on the server, and asynchronously drain them into a
//! persistent store with scheduled retention.
//!
//! ## Overview
//!
//! Client side:
//! - [`EventCollector`] — ordered pending queue with batching, durable
//!   snapshots, and exponential-backoff retry
//! - [`Instrumentation`] — opt-in hooks for navigation, clicks, errors, and
//!   request tracing
//! - [`Transport`] / [`HttpTransport`] — one batch, one HTTP request, plus a
//!   fire-and-forget unload path
//!
//! Server side:
//! - [`IngestService`] — accepts batches, acknowledges once buffered, falls
//!   back to direct store writes when the buffer is down
//! - [`IngestBuffer`] / [`RedbBuffer`] — durable FIFO decoupling ingestion
//!   acknowledgment from persistence
//! - [`DrainScheduler`] — interval- and backpressure-triggered batch moves
//!   from buffer to store
//! - [`EventStore`] / [`RedbEventStore`] — persistent storage with query,
//!   stats, and retention operations
//! - [`RetentionScheduler`] — daily/weekly age-based cleanup with dry-run
//!   support
//!
//! ## Architecture
//!
//! ```text
//! host code ──► Instrumentation ──► EventCollector ──► HttpTransport
//!                                        │                   │
//!                                  SnapshotStore          network
//!                                                            │
//!                                                            ▼
//!               RetentionScheduler ◄── EventStore ◄── DrainScheduler ◄── IngestBuffer ◄── IngestService
//! ```
//!
//! Delivery is at-least-once and best-effort-ordered: events within one batch
//! preserve submission order, but a retried batch may arrive after a newer
//! one, and the store collapses duplicate event ids.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use event_telemetry::{CollectorConfig, EventCollector, EventKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::default()
//!         .with_api_url("https://telemetry.example.com/api")
//!         .apply_env_overrides();
//!     let collector = EventCollector::with_http_transport(
//!         config,
//!         std::path::Path::new("/var/lib/myapp/telemetry"),
//!     )?;
//!     collector.init();
//!
//!     collector.set_actor("user-42", "Ada");
//!     let event = collector
//!         .new_event(EventKind::Custom)
//!         .with_custom(serde_json::json!({ "plan": "pro" }));
//!     collector.submit(event).await;
//!
//!     collector.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod collector;
pub mod config;
pub mod device;
pub mod drain;
pub mod event;
pub mod ingest;
pub mod instrument;
pub mod retention;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use buffer::{BufferError, IngestBuffer, MemoryBuffer, RedbBuffer};
pub use collector::{CollectorStats, EventCollector};
pub use config::{AutoTrackConfig, CollectorConfig};
pub use device::DeviceSnapshot;
pub use drain::{DrainConfig, DrainScheduler, DrainState, DrainStats};
pub use event::{
    ErrorContext, EventKind, InteractionContext, NetworkContext, PageContext, QueueItem,
    UserEvent,
};
pub use ingest::{IngestReceipt, IngestService};
pub use instrument::Instrumentation;
pub use retention::{RetentionConfig, RetentionScheduler};
pub use retry::RetryPolicy;
pub use session::{
    FileSessionStore, MemorySessionStore, SessionInfo, SessionStore, SessionTracker,
};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotError, SnapshotStore};
pub use store::{
    EventPage, EventQuery, EventStats, EventStore, MemoryEventStore, PagePerformance, PurgeMode,
    PurgeOutcome, RedbEventStore, RetentionStats, SessionSummary, StoreError,
};
pub use transport::{HttpTransport, Transport, TransportError};
