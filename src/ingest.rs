//! Ingestion service: the server-side entry point for event batches.
//!
//! Accepts single events and batches, appends them to the durable buffer,
//! and acknowledges as soon as the append commits. When the buffer backend
//! is unavailable the batch is written straight into the persistent store
//! instead; the degraded path is logged but the caller still gets a success.
//! Read-side operations (query, stats, session analysis, page performance)
//! and the age-based cleanup delegate to the store.
//!
//! HTTP routing sits above this service and is out of scope here; each
//! public method corresponds to one endpoint of that surface.

use crate::buffer::IngestBuffer;
use crate::drain::DrainScheduler;
use crate::event::UserEvent;
use crate::store::{
    EventPage, EventQuery, EventStats, EventStore, PagePerformance, PurgeMode, PurgeOutcome,
    SessionSummary,
};
use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, instrument, warn};

/// Acknowledgment returned to the ingestion caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Events accepted in this call
    pub accepted: usize,
    /// True when the batch bypassed the buffer and was written directly to
    /// the store
    pub degraded: bool,
}

/// Server-side ingestion service.
pub struct IngestService {
    buffer: Arc<dyn IngestBuffer>,
    store: Arc<dyn EventStore>,
    drain: Option<DrainScheduler>,
    accepted: AtomicU64,
    degraded_writes: AtomicU64,
}

impl IngestService {
    pub fn new(buffer: Arc<dyn IngestBuffer>, store: Arc<dyn EventStore>) -> Self {
        Self {
            buffer,
            store,
            drain: None,
            accepted: AtomicU64::new(0),
            degraded_writes: AtomicU64::new(0),
        }
    }

    /// Attaches a drain scheduler so ingestion can trigger backpressure
    /// drains as the buffer fills.
    pub fn with_drain_scheduler(mut self, drain: DrainScheduler) -> Self {
        self.drain = Some(drain);
        self
    }

    /// Accepts a single event.
    ///
    /// # Errors
    ///
    /// Returns an error only when both the buffer and the degraded
    /// direct-write path fail.
    pub async fn submit(&self, event: UserEvent) -> anyhow::Result<IngestReceipt> {
        self.submit_batch(vec![event]).await
    }

    /// Accepts a batch of events.
    ///
    /// Success means the batch is durably buffered (or, on the degraded
    /// path, already persisted). Duplicate event ids are accepted; the
    /// drain collapses them at insert time.
    ///
    /// # Errors
    ///
    /// Returns an error only when both the buffer and the degraded
    /// direct-write path fail.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn submit_batch(&self, events: Vec<UserEvent>) -> anyhow::Result<IngestReceipt> {
        if events.is_empty() {
            return Ok(IngestReceipt {
                accepted: 0,
                degraded: false,
            });
        }

        let count = events.len();
        let degraded = match self.buffer.enqueue(&events) {
            Ok(()) => {
                debug!(count, "Batch buffered");
                false
            }
            Err(error) => {
                warn!(%error, count, "Ingestion buffer unavailable, writing directly to store");
                self.store
                    .insert_batch(&events)
                    .context("degraded direct write failed")?;
                self.degraded_writes.fetch_add(1, Ordering::Relaxed);
                true
            }
        };
        self.accepted.fetch_add(count as u64, Ordering::Relaxed);

        if !degraded {
            if let Some(drain) = &self.drain {
                drain.drain_if_backlogged().await;
            }
        }

        Ok(IngestReceipt {
            accepted: count,
            degraded,
        })
    }

    /// Paged event query.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn query(&self, query: &EventQuery) -> anyhow::Result<EventPage> {
        self.store.query(query).context("event query failed")
    }

    /// Aggregate event statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn stats(&self) -> anyhow::Result<EventStats> {
        self.store.stats().context("event stats failed")
    }

    /// Per-session rollups for one actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn session_analysis(&self, actor_id: &str) -> anyhow::Result<Vec<SessionSummary>> {
        self.store
            .session_analysis(actor_id)
            .context("session analysis failed")
    }

    /// Per-path performance report.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn page_performance(&self) -> anyhow::Result<Vec<PagePerformance>> {
        self.store
            .page_performance()
            .context("page performance report failed")
    }

    /// Deletes all events older than the given number of days.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan or delete fails.
    pub fn cleanup(&self, days: u32) -> anyhow::Result<PurgeOutcome> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        self.store
            .purge(cutoff, PurgeMode::All, false)
            .context("cleanup failed")
    }

    /// Total events accepted since construction.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Batches written via the degraded direct-write path.
    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferError, MemoryBuffer};
    use crate::drain::DrainConfig;
    use crate::event::EventKind;
    use crate::store::MemoryEventStore;

    fn events(n: usize) -> Vec<UserEvent> {
        (0..n)
            .map(|i| UserEvent::new(EventKind::Click, format!("u{i}"), "", "s1"))
            .collect()
    }

    struct DownBuffer;

    impl IngestBuffer for DownBuffer {
        fn enqueue(&self, _: &[UserEvent]) -> Result<(), BufferError> {
            Err(BufferError::Unavailable("connection refused".to_string()))
        }
        fn pop_batch(&self, _: usize) -> Result<Vec<UserEvent>, BufferError> {
            Err(BufferError::Unavailable("connection refused".to_string()))
        }
        fn len(&self) -> Result<u64, BufferError> {
            Err(BufferError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_submit_batch_buffers_events() {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryEventStore::new());
        let service = IngestService::new(buffer.clone(), store.clone());

        let receipt = service.submit_batch(events(3)).await.unwrap();
        assert_eq!(receipt.accepted, 3);
        assert!(!receipt.degraded);
        assert_eq!(buffer.len().unwrap(), 3);
        // Nothing persisted until a drain runs.
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_unavailable_buffer_falls_back_to_store() {
        let store = Arc::new(MemoryEventStore::new());
        let service = IngestService::new(Arc::new(DownBuffer), store.clone());

        let receipt = service.submit_batch(events(4)).await.unwrap();
        assert_eq!(receipt.accepted, 4);
        assert!(receipt.degraded);
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(service.degraded_writes(), 1);
        assert!(logs_contain("Ingestion buffer unavailable"));
    }

    #[tokio::test]
    async fn test_backpressure_triggers_attached_drain() {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryEventStore::new());
        let drain = DrainScheduler::new(
            buffer.clone(),
            store.clone(),
            DrainConfig {
                batch_size: 100,
                ..DrainConfig::default()
            },
        )
        .unwrap();
        let service = IngestService::new(buffer.clone(), store.clone()).with_drain_scheduler(drain);

        service.submit_batch(events(150)).await.unwrap();
        assert_eq!(store.count().unwrap(), 100);
        assert_eq!(buffer.len().unwrap(), 50);
    }

    #[tokio::test]
    async fn test_empty_batch_is_accepted() {
        let service = IngestService::new(
            Arc::new(MemoryBuffer::new()),
            Arc::new(MemoryEventStore::new()),
        );
        let receipt = service.submit_batch(Vec::new()).await.unwrap();
        assert_eq!(receipt.accepted, 0);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_old_events() {
        let store = Arc::new(MemoryEventStore::new());
        let mut old = UserEvent::new(EventKind::Click, "u1", "", "s1");
        old.created_at = Utc::now() - ChronoDuration::days(30);
        store
            .insert_batch(&[old, UserEvent::new(EventKind::Click, "u2", "", "s2")])
            .unwrap();

        let service = IngestService::new(Arc::new(MemoryBuffer::new()), store.clone());
        let outcome = service.cleanup(7).unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(store.count().unwrap(), 1);
    }
}
