//! Client-side event collection, batching, and delivery.
//!
//! The [`EventCollector`] accepts event submissions, batches them, persists
//! the pending queue so reloads lose nothing, and delivers batches with
//! bounded exponential-backoff retry. It is an explicitly constructed object
//! with an `init`/`destroy` lifecycle; hosts pass a cloned handle to whatever
//! code needs to emit events.
//!
//! Delivery guarantee: at-least-once, best-effort-ordered. Events within one
//! batch preserve submission order, but a retried older batch may arrive
//! after a newer one; consumers needing strict order must sort on
//! `created_at`.
//!
//! Telemetry must never degrade the host application: every failure on this
//! path is caught, logged at debug level, and resolved via retry or drop.

use crate::{
    config::CollectorConfig,
    device::DeviceSnapshot,
    event::{EventKind, QueueItem, UserEvent},
    retry::RetryPolicy,
    session::{
        FileSessionStore, MemorySessionStore, SessionInfo, SessionStore, SessionTracker,
    },
    snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore},
    transport::{HttpTransport, Transport},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    future::Future,
    path::Path,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, instrument, warn};

/// Point-in-time view of collector delivery counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectorStats {
    /// Events accepted by `submit`
    pub submitted: u64,
    /// Events confirmed delivered by the transport
    pub delivered: u64,
    /// Events re-enqueued after a failed delivery
    pub retried: u64,
    /// Events dropped after retry exhaustion
    pub dropped: u64,
    /// Completed flush cycles that delivered a batch
    pub flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
}

#[derive(Debug, Clone)]
struct Actor {
    id: String,
    name: String,
}

struct CollectorInner {
    config: CollectorConfig,
    transport: Arc<dyn Transport>,
    snapshot: Arc<dyn SnapshotStore>,
    session: SessionTracker,
    device: DeviceSnapshot,
    actor: Mutex<Actor>,
    queue: Mutex<VecDeque<QueueItem>>,
    /// Held for the duration of one transport call; `try_lock` coalesces
    /// overlapping flush triggers so only one batch is ever in flight.
    flush_lock: tokio::sync::Mutex<()>,
    retry_policy: RetryPolicy,
    shutdown: AtomicBool,
    hooks_installed: AtomicBool,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Client-side collector: ordered pending queue with batching, durable
/// snapshots, and retry.
///
/// Cheap to clone; all clones share the same queue and lifecycle.
///
/// # Examples
///
/// ```rust,no_run
/// use event_telemetry::{CollectorConfig, EventCollector, EventKind};
///
/// # async fn run() -> anyhow::Result<()> {
/// let collector = EventCollector::with_http_transport(
///     CollectorConfig::default(),
///     std::path::Path::new("/var/lib/myapp/telemetry"),
/// )?;
/// collector.init();
///
/// let event = collector.new_event(EventKind::Custom);
/// collector.submit(event).await;
///
/// collector.destroy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventCollector {
    inner: Arc<CollectorInner>,
}

impl EventCollector {
    /// Creates a collector from explicit parts.
    ///
    /// The pending queue is recovered from the snapshot store; a corrupt
    /// snapshot is discarded with a warning and the queue starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(
        config: CollectorConfig,
        transport: Arc<dyn Transport>,
        snapshot: Arc<dyn SnapshotStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let recovered = match snapshot.load() {
            Ok(items) => items,
            Err(error) => {
                warn!(%error, "Discarding corrupt queue snapshot, starting empty");
                let _ = snapshot.clear();
                Vec::new()
            }
        };
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered pending events from snapshot");
        }

        let retry_policy = RetryPolicy::new(config.max_retries, config.retry_delay);
        let session = SessionTracker::new(session_store);

        Ok(Self {
            inner: Arc::new(CollectorInner {
                config,
                transport,
                snapshot,
                session,
                device: DeviceSnapshot::capture(),
                actor: Mutex::new(Actor {
                    id: "anonymous".to_string(),
                    name: String::new(),
                }),
                queue: Mutex::new(recovered.into()),
                flush_lock: tokio::sync::Mutex::new(()),
                retry_policy,
                shutdown: AtomicBool::new(false),
                hooks_installed: AtomicBool::new(false),
                timer_task: Mutex::new(None),
                counters: Counters::default(),
            }),
        })
    }

    /// Creates a collector with the HTTP transport and file-backed
    /// persistence rooted at `data_dir` (memory-backed when the respective
    /// persistence flag is disabled).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn with_http_transport(
        config: CollectorConfig,
        data_dir: &Path,
    ) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);

        let snapshot: Arc<dyn SnapshotStore> = if config.persist_queue {
            std::fs::create_dir_all(data_dir)?;
            Arc::new(FileSnapshotStore::new(data_dir.join("pending-queue.json")))
        } else {
            Arc::new(MemorySnapshotStore::new())
        };

        let session_store: Arc<dyn SessionStore> = if config.persist_session {
            std::fs::create_dir_all(data_dir)?;
            Arc::new(FileSessionStore::new(data_dir.join("session.json")))
        } else {
            Arc::new(MemorySessionStore::new())
        };

        Self::new(config, transport, snapshot, session_store)
    }

    /// Starts the periodic flush timer. Idempotent.
    pub fn init(&self) {
        let mut slot = match self.inner.timer_task.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if slot.is_some() {
            return;
        }

        let this = self.clone();
        let interval_duration = self.inner.config.batch_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval_duration);
            // The first tick completes immediately; skip it so the timer
            // fires one full interval after init.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                this.flush().await;
            }
        });
        *slot = Some(handle);

        info!(
            batch_size = self.inner.config.batch_size,
            batch_interval_ms = self.inner.config.batch_interval.as_millis() as u64,
            "Collector initialized"
        );
    }

    /// Sets the actor identity stamped onto subsequently created events.
    pub fn set_actor(&self, id: impl Into<String>, name: impl Into<String>) {
        if let Ok(mut actor) = self.inner.actor.lock() {
            actor.id = id.into();
            actor.name = name.into();
        }
    }

    /// Creates an event pre-filled with actor, session, and device context.
    pub fn new_event(&self, kind: EventKind) -> UserEvent {
        let actor = self
            .inner
            .actor
            .lock()
            .map(|a| a.clone())
            .unwrap_or_else(|_| Actor {
                id: "anonymous".to_string(),
                name: String::new(),
            });
        UserEvent::new(kind, actor.id, actor.name, self.inner.session.session_id())
            .with_device(self.inner.device.clone())
    }

    /// Accepts an event into the pending queue.
    ///
    /// Persists the queue snapshot, bumps session counters, and triggers an
    /// immediate flush once the queue reaches the configured batch size
    /// (without waiting for the periodic timer).
    pub async fn submit(&self, event: UserEvent) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            debug!(kind = %event.kind, "Ignoring submission after destroy");
            return;
        }

        self.inner.session.record(event.kind);

        let queue_len = {
            let Ok(mut queue) = self.inner.queue.lock() else {
                return;
            };
            queue.push_back(QueueItem::new(event));
            queue.len()
        };
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.persist_snapshot();

        if self.inner.config.debug_logging {
            debug!(queue_len, "Event submitted");
        }

        if queue_len >= self.inner.config.batch_size {
            self.flush().await;
        }
    }

    /// Delivers up to one batch from the head of the queue.
    ///
    /// No-op on an empty queue. Overlapping calls coalesce: while a batch is
    /// in flight every other flush trigger returns immediately, and events
    /// submitted meanwhile ride the next flush. On delivery failure the
    /// batch is re-enqueued at the head with bumped retry counts, items past
    /// the retry limit are silently dropped, and a backoff retry is
    /// scheduled.
    ///
    /// Returns a boxed future: the scheduled retry task awaits another
    /// `flush`, which would otherwise make the future type recursive.
    pub fn flush(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let this = self.clone();
        Box::pin(async move { this.flush_inner().await })
    }

    #[instrument(name = "flush", skip(self))]
    async fn flush_inner(&self) {
        if self.queue_len() == 0 {
            return;
        }

        let Ok(_guard) = self.inner.flush_lock.try_lock() else {
            debug!("Flush already in flight, coalescing");
            return;
        };

        let batch: Vec<QueueItem> = {
            let Ok(mut queue) = self.inner.queue.lock() else {
                return;
            };
            let take = self.inner.config.batch_size.min(queue.len());
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return;
        }

        let events: Vec<UserEvent> = batch.iter().map(|item| item.event.clone()).collect();
        match self.inner.transport.send_batch(&events).await {
            Ok(()) => {
                self.inner
                    .counters
                    .delivered
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                self.inner.counters.flushes.fetch_add(1, Ordering::Relaxed);
                self.persist_snapshot();
                debug!(count = events.len(), "Batch delivered");
            }
            Err(error) => {
                debug!(%error, count = events.len(), "Batch delivery failed");
                let delay_attempt = batch.iter().map(|item| item.retry_count).max().unwrap_or(0);

                let mut requeued = 0u64;
                let mut dropped = 0u64;
                {
                    let Ok(mut queue) = self.inner.queue.lock() else {
                        return;
                    };
                    for mut item in batch.into_iter().rev() {
                        item.retry_count += 1;
                        if self.inner.retry_policy.exhausted(item.retry_count) {
                            dropped += 1;
                        } else {
                            queue.push_front(item);
                            requeued += 1;
                        }
                    }
                }
                self.inner.counters.retried.fetch_add(requeued, Ordering::Relaxed);
                self.inner.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
                if dropped > 0 {
                    debug!(dropped, "Dropped events after retry exhaustion");
                }
                self.persist_snapshot();

                if requeued > 0 && !self.inner.shutdown.load(Ordering::SeqCst) {
                    let delay = self.inner.retry_policy.delay_for(delay_attempt);
                    let this = self.clone();
                    tokio::spawn(async move {
                        sleep(delay).await;
                        if !this.inner.shutdown.load(Ordering::SeqCst) {
                            this.flush().await;
                        }
                    });
                }
            }
        }
    }

    /// Best-effort drain for page unload or host teardown.
    ///
    /// All remaining queued events are handed to the fire-and-forget
    /// transport exactly once (no retry, no backoff) and the durable
    /// snapshot is cleared regardless of delivery outcome.
    pub fn drain_for_unload(&self) {
        let events: Vec<UserEvent> = {
            let Ok(mut queue) = self.inner.queue.lock() else {
                return;
            };
            queue.drain(..).map(|item| item.event).collect()
        };

        if !events.is_empty() {
            debug!(count = events.len(), "Unload drain");
            self.inner.transport.send_fire_and_forget(events);
        }
        if let Err(error) = self.inner.snapshot.clear() {
            debug!(%error, "Failed to clear queue snapshot on unload");
        }
    }

    /// Stops the flush timer, performs one final best-effort flush, and
    /// uninstalls instrumentation hooks. Does not cancel an already
    /// in-flight transport call. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut slot) = self.inner.timer_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        self.flush().await;
        self.inner.hooks_installed.store(false, Ordering::SeqCst);
        info!("Collector destroyed");
    }

    /// Number of events currently pending.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Current session state.
    pub fn session_info(&self) -> SessionInfo {
        self.inner.session.snapshot()
    }

    /// Current delivery counters.
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            submitted: self.inner.counters.submitted.load(Ordering::Relaxed),
            delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
            retried: self.inner.counters.retried.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
            flushes: self.inner.counters.flushes.load(Ordering::Relaxed),
        }
    }

    /// Auto-track toggles from the configuration.
    pub(crate) fn auto_track(&self) -> &crate::config::AutoTrackConfig {
        &self.inner.config.auto_track
    }

    /// Marks instrumentation hooks installed. Returns `false` when hooks
    /// were already installed (second install must be a no-op).
    pub(crate) fn try_install_hooks(&self) -> bool {
        self.inner
            .hooks_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn persist_snapshot(&self) {
        if !self.inner.config.persist_queue {
            return;
        }
        let items: Vec<QueueItem> = {
            let Ok(queue) = self.inner.queue.lock() else {
                return;
            };
            queue.iter().cloned().collect()
        };
        if let Err(error) = self.inner.snapshot.save(&items) {
            debug!(%error, "Failed to persist queue snapshot");
        }
    }
}
