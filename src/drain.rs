//! Batch drain scheduler: moves events from the ingestion buffer to the
//! persistent store.
//!
//! The scheduler alternates between `Idle` and `Draining`. A drain cycle is
//! triggered by the fixed interval timer or by backpressure (buffer length
//! reaching the batch size, checked after each ingestion append). Overlapping
//! triggers coalesce: while one cycle runs, every other trigger is a no-op,
//! and the cycle's mutual exclusion also covers the final forced drain at
//! shutdown.
//!
//! A batch whose bulk insert fails is dropped by default (logged and
//! counted, not re-queued) to avoid a poison batch stalling the whole
//! buffer. Setting `requeue_failed` keeps the failed batch aside and retries
//! it on subsequent cycles up to that many attempts before dropping.

use crate::buffer::IngestBuffer;
use crate::store::EventStore;
use crate::event::UserEvent;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Drain scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainConfig {
    /// Entries popped per drain cycle, and the backpressure threshold
    pub batch_size: usize,

    /// Interval of the periodic drain timer
    pub interval: Duration,

    /// When set, a batch whose insert fails is retried on later cycles up
    /// to this many attempts before being dropped. When unset, failed
    /// batches are dropped immediately.
    pub requeue_failed: Option<u32>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(5),
            requeue_failed: None,
        }
    }
}

impl DrainConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size or interval is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }
        if self.interval.is_zero() {
            anyhow::bail!("interval must be greater than 0");
        }
        Ok(())
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// Point-in-time drain counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainStats {
    /// Completed drain cycles that processed at least one entry
    pub cycles: u64,
    /// Events inserted into the store
    pub drained: u64,
    /// Events skipped as duplicate ids during insert
    pub deduplicated: u64,
    /// Events lost to insert failure (after re-queue exhaustion, if enabled)
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    drained: AtomicU64,
    deduplicated: AtomicU64,
    dropped: AtomicU64,
}

struct DrainInner {
    buffer: Arc<dyn IngestBuffer>,
    store: Arc<dyn EventStore>,
    config: DrainConfig,
    /// Held for the duration of one cycle; `try_lock` coalesces triggers.
    drain_lock: tokio::sync::Mutex<()>,
    draining: AtomicBool,
    shutdown: AtomicBool,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    /// A failed batch waiting for another insert attempt, with its attempt
    /// count. Only populated when `requeue_failed` is set.
    retry_slot: Mutex<Option<(Vec<UserEvent>, u32)>>,
    counters: Counters,
}

/// Moves buffered events into the persistent store in batches.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct DrainScheduler {
    inner: Arc<DrainInner>,
}

impl DrainScheduler {
    /// Creates a scheduler over the given buffer and store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(
        buffer: Arc<dyn IngestBuffer>,
        store: Arc<dyn EventStore>,
        config: DrainConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(DrainInner {
                buffer,
                store,
                config,
                drain_lock: tokio::sync::Mutex::new(()),
                draining: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                timer_task: Mutex::new(None),
                retry_slot: Mutex::new(None),
                counters: Counters::default(),
            }),
        })
    }

    /// Starts the periodic drain timer. Idempotent.
    pub fn start(&self) {
        let mut slot = match self.inner.timer_task.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if slot.is_some() {
            return;
        }

        let this = self.clone();
        let interval_duration = self.inner.config.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval_duration);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                this.drain_cycle().await;
            }
        });
        *slot = Some(handle);

        info!(
            batch_size = self.inner.config.batch_size,
            interval_ms = self.inner.config.interval.as_millis() as u64,
            "Drain scheduler started"
        );
    }

    /// Backpressure trigger: runs one drain cycle if the buffer has reached
    /// the batch size. Ingestion calls this after each append.
    pub async fn drain_if_backlogged(&self) {
        let backlog = match self.inner.buffer.len() {
            Ok(len) => len,
            Err(error) => {
                debug!(%error, "Backpressure check failed");
                return;
            }
        };
        if backlog as usize >= self.inner.config.batch_size {
            debug!(backlog, "Backpressure drain");
            self.drain_cycle().await;
        }
    }

    /// Runs one drain cycle: pops up to `batch_size` entries and bulk-inserts
    /// them. Returns the number of entries processed (zero when the buffer
    /// was empty or another cycle was already in progress).
    #[instrument(skip(self))]
    pub async fn drain_cycle(&self) -> usize {
        let Ok(_guard) = self.inner.drain_lock.try_lock() else {
            debug!("Drain already in progress, coalescing");
            return 0;
        };
        self.inner.draining.store(true, Ordering::SeqCst);
        let processed = self.drain_locked();
        self.inner.draining.store(false, Ordering::SeqCst);
        processed
    }

    fn drain_locked(&self) -> usize {
        // A re-queued failed batch drains before fresh entries.
        let pending = self
            .inner
            .retry_slot
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let (batch, attempt) = match pending {
            Some((batch, attempt)) => (batch, attempt),
            None => {
                let batch = match self.inner.buffer.pop_batch(self.inner.config.batch_size) {
                    Ok(batch) => batch,
                    Err(error) => {
                        warn!(%error, "Failed to pop from ingestion buffer");
                        return 0;
                    }
                };
                (batch, 0)
            }
        };
        if batch.is_empty() {
            return 0;
        }

        let popped = batch.len();
        match self.inner.store.insert_batch(&batch) {
            Ok(inserted) => {
                let duplicates = popped - inserted;
                self.inner
                    .counters
                    .drained
                    .fetch_add(inserted as u64, Ordering::Relaxed);
                self.inner
                    .counters
                    .deduplicated
                    .fetch_add(duplicates as u64, Ordering::Relaxed);
                self.inner.counters.cycles.fetch_add(1, Ordering::Relaxed);
                info!(processed = popped, inserted, duplicates, "Drain cycle completed");
            }
            Err(error) => {
                let next_attempt = attempt + 1;
                match self.inner.config.requeue_failed {
                    Some(max_attempts) if next_attempt <= max_attempts => {
                        warn!(
                            %error,
                            count = popped,
                            attempt = next_attempt,
                            max_attempts,
                            "Bulk insert failed, holding batch for retry"
                        );
                        if let Ok(mut slot) = self.inner.retry_slot.lock() {
                            *slot = Some((batch, next_attempt));
                        }
                    }
                    _ => {
                        self.inner
                            .counters
                            .dropped
                            .fetch_add(popped as u64, Ordering::Relaxed);
                        warn!(%error, count = popped, "Bulk insert failed, dropping batch");
                    }
                }
            }
        }
        popped
    }

    /// Stops the timer and performs one final forced drain, looping until
    /// the buffer is empty or a batch is held back for retry.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.inner.timer_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        loop {
            if self.drain_cycle().await == 0 {
                break;
            }
            let retry_pending = self
                .inner
                .retry_slot
                .lock()
                .map(|slot| slot.is_some())
                .unwrap_or(false);
            if retry_pending {
                break;
            }
        }
        info!(stats = ?self.stats(), "Drain scheduler stopped");
    }

    /// Current scheduler state.
    pub fn state(&self) -> DrainState {
        if self.inner.draining.load(Ordering::SeqCst) {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// Current drain counters.
    pub fn stats(&self) -> DrainStats {
        DrainStats {
            cycles: self.inner.counters.cycles.load(Ordering::Relaxed),
            drained: self.inner.counters.drained.load(Ordering::Relaxed),
            deduplicated: self.inner.counters.deduplicated.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryBuffer;
    use crate::event::EventKind;
    use crate::store::{MemoryEventStore, StoreError};

    fn events(n: usize) -> Vec<UserEvent> {
        (0..n)
            .map(|i| UserEvent::new(EventKind::Click, format!("u{i}"), "", "s1"))
            .collect()
    }

    fn scheduler(config: DrainConfig) -> (DrainScheduler, Arc<MemoryBuffer>, Arc<MemoryEventStore>) {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(MemoryEventStore::new());
        let scheduler = DrainScheduler::new(buffer.clone(), store.clone(), config).unwrap();
        (scheduler, buffer, store)
    }

    #[tokio::test]
    async fn test_drain_moves_batch_to_store() {
        let (scheduler, buffer, store) = scheduler(DrainConfig::default());
        buffer.enqueue(&events(7)).unwrap();

        assert_eq!(scheduler.drain_cycle().await, 7);
        assert_eq!(store.count().unwrap(), 7);
        assert!(buffer.is_empty().unwrap());
        assert_eq!(scheduler.stats().drained, 7);
    }

    #[tokio::test]
    async fn test_backpressure_drains_one_batch_only() {
        let config = DrainConfig {
            batch_size: 100,
            ..DrainConfig::default()
        };
        let (scheduler, buffer, store) = scheduler(config);
        buffer.enqueue(&events(150)).unwrap();

        scheduler.drain_if_backlogged().await;
        assert_eq!(store.count().unwrap(), 100);
        assert_eq!(buffer.len().unwrap(), 50);
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_drain() {
        let config = DrainConfig {
            batch_size: 100,
            ..DrainConfig::default()
        };
        let (scheduler, buffer, store) = scheduler(config);
        buffer.enqueue(&events(99)).unwrap();

        scheduler.drain_if_backlogged().await;
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(buffer.len().unwrap(), 99);
    }

    #[tokio::test]
    async fn test_duplicate_ids_collapse_on_drain() {
        let (scheduler, buffer, store) = scheduler(DrainConfig::default());
        let batch = events(2);
        buffer.enqueue(&batch).unwrap();
        buffer.enqueue(&batch).unwrap();

        scheduler.drain_cycle().await;
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(scheduler.stats().deduplicated, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_remaining_entries() {
        let config = DrainConfig {
            batch_size: 10,
            ..DrainConfig::default()
        };
        let (scheduler, buffer, store) = scheduler(config);
        buffer.enqueue(&events(25)).unwrap();

        scheduler.shutdown().await;
        assert_eq!(store.count().unwrap(), 25);
        assert!(buffer.is_empty().unwrap());
    }

    struct FailingStore {
        fail_first: std::sync::atomic::AtomicUsize,
        delegate: MemoryEventStore,
    }

    impl EventStore for FailingStore {
        fn insert_batch(&self, batch: &[UserEvent]) -> Result<usize, StoreError> {
            if self.fail_first.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(StoreError::Serialization(
                    serde_json::from_str::<UserEvent>("{bad").unwrap_err(),
                ));
            }
            self.delegate.insert_batch(batch)
        }
        fn fetch_all(&self) -> Result<Vec<UserEvent>, StoreError> {
            self.delegate.fetch_all()
        }
        fn delete_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
            self.delegate.delete_ids(ids)
        }
    }

    #[tokio::test]
    async fn test_insert_failure_drops_batch_by_default() {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(FailingStore {
            fail_first: std::sync::atomic::AtomicUsize::new(usize::MAX),
            delegate: MemoryEventStore::new(),
        });
        let scheduler =
            DrainScheduler::new(buffer.clone(), store, DrainConfig::default()).unwrap();

        buffer.enqueue(&events(5)).unwrap();
        scheduler.drain_cycle().await;

        assert!(buffer.is_empty().unwrap());
        assert_eq!(scheduler.stats().dropped, 5);
        assert_eq!(scheduler.stats().drained, 0);
    }

    #[tokio::test]
    async fn test_requeue_retries_failed_batch() {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(FailingStore {
            fail_first: std::sync::atomic::AtomicUsize::new(1),
            delegate: MemoryEventStore::new(),
        });
        let config = DrainConfig {
            requeue_failed: Some(2),
            ..DrainConfig::default()
        };
        let scheduler = DrainScheduler::new(buffer.clone(), store.clone(), config).unwrap();

        buffer.enqueue(&events(3)).unwrap();

        // First cycle fails and holds the batch; second cycle retries it.
        scheduler.drain_cycle().await;
        assert_eq!(scheduler.stats().dropped, 0);
        assert_eq!(store.delegate.count().unwrap(), 0);

        scheduler.drain_cycle().await;
        assert_eq!(store.delegate.count().unwrap(), 3);
        assert_eq!(scheduler.stats().drained, 3);
    }

    #[tokio::test]
    async fn test_requeue_exhaustion_drops_batch() {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(FailingStore {
            fail_first: std::sync::atomic::AtomicUsize::new(usize::MAX),
            delegate: MemoryEventStore::new(),
        });
        let config = DrainConfig {
            requeue_failed: Some(2),
            ..DrainConfig::default()
        };
        let scheduler = DrainScheduler::new(buffer.clone(), store, config).unwrap();

        buffer.enqueue(&events(4)).unwrap();
        scheduler.drain_cycle().await; // attempt 1: held
        scheduler.drain_cycle().await; // attempt 2: held
        scheduler.drain_cycle().await; // attempt 3: exceeds max, dropped

        assert_eq!(scheduler.stats().dropped, 4);
    }

    #[tokio::test]
    async fn test_state_is_idle_between_cycles() {
        let (scheduler, _, _) = scheduler(DrainConfig::default());
        assert_eq!(scheduler.state(), DrainState::Idle);
        scheduler.drain_cycle().await;
        assert_eq!(scheduler.state(), DrainState::Idle);
    }
}
