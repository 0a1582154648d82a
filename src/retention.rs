//! Retention scheduler: reclaims aged-out events from the persistent store.
//!
//! Two independent periodic jobs run over the store:
//!
//! - the daily job deletes events older than a short threshold whose session
//!   has been quiet since that threshold (active sessions are spared);
//! - the weekly job deletes everything older than a long threshold,
//!   activity notwithstanding.
//!
//! Both are also callable on demand with an explicit threshold and a
//! dry-run flag, and a read-only statistics call reports what a run would
//! find without deleting anything. Runs serialize against each other; a
//! manual run never overlaps a scheduled one.

use crate::store::{EventStore, PurgeMode, PurgeOutcome, RetentionStats};
use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

/// Retention scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    /// How often the daily job runs
    pub daily_interval: Duration,

    /// Age threshold for the daily job (inactive sessions only)
    pub daily_max_age: Duration,

    /// How often the weekly job runs
    pub weekly_interval: Duration,

    /// Age threshold for the weekly job (all records)
    pub weekly_max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_interval: Duration::from_secs(24 * 60 * 60),
            daily_max_age: Duration::from_secs(48 * 60 * 60),
            weekly_interval: Duration::from_secs(7 * 24 * 60 * 60),
            weekly_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl RetentionConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any interval or threshold is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.daily_interval.is_zero() || self.weekly_interval.is_zero() {
            anyhow::bail!("retention intervals must be greater than 0");
        }
        if self.daily_max_age.is_zero() || self.weekly_max_age.is_zero() {
            anyhow::bail!("retention age thresholds must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    daily_runs: AtomicU64,
    weekly_runs: AtomicU64,
    deleted: AtomicU64,
}

struct RetentionInner {
    store: Arc<dyn EventStore>,
    config: RetentionConfig,
    /// Serializes retention runs, scheduled and manual alike.
    run_lock: tokio::sync::Mutex<()>,
    shutdown: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

/// Periodic age-based cleanup over the event store.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct RetentionScheduler {
    inner: Arc<RetentionInner>,
}

impl RetentionScheduler {
    /// Creates a scheduler over the given store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(store: Arc<dyn EventStore>, config: RetentionConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RetentionInner {
                store,
                config,
                run_lock: tokio::sync::Mutex::new(()),
                shutdown: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                counters: Counters::default(),
            }),
        })
    }

    /// Starts the daily and weekly jobs. Idempotent.
    pub fn start(&self) {
        let mut tasks = match self.inner.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        if !tasks.is_empty() {
            return;
        }

        let daily = self.clone();
        let daily_interval = self.inner.config.daily_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(daily_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if daily.inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = daily.run_daily().await {
                    error!(%err, "Daily retention run failed");
                }
            }
        }));

        let weekly = self.clone();
        let weekly_interval = self.inner.config.weekly_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(weekly_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if weekly.inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = weekly.run_weekly().await {
                    error!(%err, "Weekly retention run failed");
                }
            }
        }));

        info!(
            daily_max_age_hours = self.inner.config.daily_max_age.as_secs() / 3600,
            weekly_max_age_hours = self.inner.config.weekly_max_age.as_secs() / 3600,
            "Retention scheduler started"
        );
    }

    /// Runs the daily job once: deletes events past the daily threshold
    /// whose session has been quiet since that threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan or delete fails.
    #[instrument(skip(self))]
    pub async fn run_daily(&self) -> anyhow::Result<PurgeOutcome> {
        let _guard = self.inner.run_lock.lock().await;
        let cutoff = cutoff(self.inner.config.daily_max_age);
        let outcome = self
            .inner
            .store
            .purge(cutoff, PurgeMode::InactiveOnly, false)
            .context("daily retention purge failed")?;
        self.inner.counters.daily_runs.fetch_add(1, Ordering::Relaxed);
        self.inner
            .counters
            .deleted
            .fetch_add(outcome.affected, Ordering::Relaxed);
        info!(deleted = outcome.affected, %cutoff, "Daily retention run completed");
        Ok(outcome)
    }

    /// Runs the weekly job once: deletes all events past the weekly
    /// threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan or delete fails.
    #[instrument(skip(self))]
    pub async fn run_weekly(&self) -> anyhow::Result<PurgeOutcome> {
        let _guard = self.inner.run_lock.lock().await;
        let cutoff = cutoff(self.inner.config.weekly_max_age);
        let outcome = self
            .inner
            .store
            .purge(cutoff, PurgeMode::All, false)
            .context("weekly retention purge failed")?;
        self.inner.counters.weekly_runs.fetch_add(1, Ordering::Relaxed);
        self.inner
            .counters
            .deleted
            .fetch_add(outcome.affected, Ordering::Relaxed);
        info!(deleted = outcome.affected, %cutoff, "Weekly retention run completed");
        Ok(outcome)
    }

    /// Manual on-demand run with an explicit age threshold. With `dry_run`,
    /// nothing is deleted and the outcome reports the affected count and a
    /// sample of record ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan or delete fails.
    #[instrument(skip(self))]
    pub async fn run_manual(
        &self,
        max_age: Duration,
        dry_run: bool,
    ) -> anyhow::Result<PurgeOutcome> {
        let _guard = self.inner.run_lock.lock().await;
        let cutoff = cutoff(max_age);
        let outcome = self
            .inner
            .store
            .purge(cutoff, PurgeMode::All, dry_run)
            .context("manual retention purge failed")?;
        if !dry_run {
            self.inner
                .counters
                .deleted
                .fetch_add(outcome.affected, Ordering::Relaxed);
        }
        info!(
            affected = outcome.affected,
            dry_run,
            %cutoff,
            "Manual retention run completed"
        );
        Ok(outcome)
    }

    /// Read-only retention counters for the given age threshold. Deletes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn stats(&self, max_age: Duration) -> anyhow::Result<RetentionStats> {
        self.inner
            .store
            .retention_stats(cutoff(max_age))
            .context("retention stats failed")
    }

    /// Total events deleted by this scheduler since construction.
    pub fn total_deleted(&self) -> u64 {
        self.inner.counters.deleted.load(Ordering::Relaxed)
    }

    /// Stops the periodic jobs. In-flight runs complete normally.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
        info!(deleted = self.total_deleted(), "Retention scheduler stopped");
    }
}

fn cutoff(max_age: Duration) -> DateTime<Utc> {
    // An unrepresentable age yields a cutoff in the distant past, which
    // deletes nothing.
    ChronoDuration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
