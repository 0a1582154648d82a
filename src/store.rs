//! Persistent event store.
//!
//! The store is the pipeline's terminal stage: drained events land here and
//! stay until retention reclaims them. The [`EventStore`] trait keeps the
//! backend surface minimal (insert, scan, delete); querying, statistics,
//! session analysis, page performance, and retention arithmetic are provided
//! as default methods over a full scan, so every backend answers them
//! identically.
//!
//! The redb backend keys events by id, which makes duplicate-id tolerance a
//! plain key-exists check. Scans deserialize the whole table; this is
//! adequate for the store's telemetry volumes and keeps the backend honest
//! about not owning query semantics.

use crate::event::{EventKind, UserEvent};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

const EVENTS_TABLE: TableDefinition<'static, &str, Vec<u8>> = TableDefinition::new("user_events");

/// How many record ids a dry-run purge reports as a sample.
const PURGE_SAMPLE_LIMIT: usize = 10;

/// Event store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filter and paging parameters for event queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub kind: Option<EventKind>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// 1-based page number; 0 is treated as 1
    pub page: usize,
    /// Page size; 0 falls back to 50
    pub page_size: usize,
}

/// One page of query results, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<UserEvent>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
}

/// Aggregate counters over the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub unique_actors: u64,
    pub unique_sessions: u64,
}

/// Per-session rollup for one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub event_count: u64,
    pub page_view_count: u64,
    /// Distinct page paths in first-visit order
    pub pages: Vec<String>,
}

/// Per-path view counts and dwell time derived from page-view and
/// page-leave events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePerformance {
    pub path: String,
    pub views: u64,
    pub avg_dwell_ms: Option<u64>,
}

/// Which records an age-based purge targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    /// Every record older than the cutoff
    All,
    /// Only records older than the cutoff whose session has been quiet
    /// since the cutoff
    InactiveOnly,
}

/// Result of a purge (or dry-run purge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeOutcome {
    /// Records deleted, or that would be deleted under dry-run
    pub affected: u64,
    /// Up to a handful of affected record ids, for log inspection
    pub sample: Vec<String>,
    /// True when nothing was actually deleted
    pub dry_run: bool,
}

/// Read-only retention counters for a given cutoff.
///
/// A record is *active* when its session produced at least one event at or
/// after the cutoff; *expired* counts records older than the cutoff
/// regardless of activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionStats {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub expired: u64,
}

/// Persistent event storage backend.
///
/// Backends implement the three primitive operations; analytics and
/// retention are derived from them.
pub trait EventStore: Send + Sync {
    /// Inserts a batch, skipping events whose id already exists. Returns the
    /// number of events actually inserted.
    fn insert_batch(&self, events: &[UserEvent]) -> Result<usize, StoreError>;

    /// Returns every stored event. Order is unspecified.
    fn fetch_all(&self) -> Result<Vec<UserEvent>, StoreError>;

    /// Deletes the given ids; unknown ids are ignored. Returns the number
    /// deleted.
    fn delete_ids(&self, ids: &[String]) -> Result<u64, StoreError>;

    /// Number of stored events.
    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.fetch_all()?.len() as u64)
    }

    /// Runs a filtered, paged query, newest first.
    fn query(&self, query: &EventQuery) -> Result<EventPage, StoreError> {
        let mut events: Vec<UserEvent> = self
            .fetch_all()?
            .into_iter()
            .filter(|event| matches_query(event, query))
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = events.len() as u64;
        let page = query.page.max(1);
        let page_size = if query.page_size == 0 { 50 } else { query.page_size };
        let start = (page - 1).saturating_mul(page_size).min(events.len());
        let end = start.saturating_add(page_size).min(events.len());

        Ok(EventPage {
            events: events[start..end].to_vec(),
            total,
            page,
            page_size,
        })
    }

    /// Aggregate counters over the whole store.
    fn stats(&self) -> Result<EventStats, StoreError> {
        let events = self.fetch_all()?;
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut actors = HashSet::new();
        let mut sessions = HashSet::new();
        for event in &events {
            *by_kind.entry(event.kind.as_str().to_string()).or_insert(0) += 1;
            actors.insert(event.actor_id.clone());
            sessions.insert(event.session_id.clone());
        }
        Ok(EventStats {
            total: events.len() as u64,
            by_kind,
            unique_actors: actors.len() as u64,
            unique_sessions: sessions.len() as u64,
        })
    }

    /// Per-session rollups for one actor, newest session first.
    fn session_analysis(&self, actor_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let mut sessions: HashMap<String, SessionSummary> = HashMap::new();
        for event in self.fetch_all()? {
            if event.actor_id != actor_id {
                continue;
            }
            let summary = sessions
                .entry(event.session_id.clone())
                .or_insert_with(|| SessionSummary {
                    session_id: event.session_id.clone(),
                    started_at: event.created_at,
                    ended_at: event.created_at,
                    event_count: 0,
                    page_view_count: 0,
                    pages: Vec::new(),
                });
            summary.started_at = summary.started_at.min(event.created_at);
            summary.ended_at = summary.ended_at.max(event.created_at);
            summary.event_count += 1;
            if event.kind == EventKind::PageView {
                summary.page_view_count += 1;
                if let Some(path) = event.page_path() {
                    if !summary.pages.iter().any(|p| p == path) {
                        summary.pages.push(path.to_string());
                    }
                }
            }
        }
        let mut summaries: Vec<SessionSummary> = sessions.into_values().collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Per-path view counts and average dwell time, most viewed first.
    fn page_performance(&self) -> Result<Vec<PagePerformance>, StoreError> {
        let mut views: HashMap<String, u64> = HashMap::new();
        let mut dwell: HashMap<String, (u64, u64)> = HashMap::new();
        for event in self.fetch_all()? {
            let Some(path) = event.page_path().map(str::to_string) else {
                continue;
            };
            match event.kind {
                EventKind::PageView => {
                    *views.entry(path).or_insert(0) += 1;
                }
                EventKind::PageLeave => {
                    if let Some(ms) = event.page.as_ref().and_then(|p| p.duration_ms) {
                        let slot = dwell.entry(path).or_insert((0, 0));
                        slot.0 += ms;
                        slot.1 += 1;
                    }
                }
                _ => {}
            }
        }
        let mut report: Vec<PagePerformance> = views
            .into_iter()
            .map(|(path, views)| {
                let avg_dwell_ms = dwell
                    .get(&path)
                    .filter(|(_, n)| *n > 0)
                    .map(|(sum, n)| sum / n);
                PagePerformance {
                    path,
                    views,
                    avg_dwell_ms,
                }
            })
            .collect();
        report.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.path.cmp(&b.path)));
        Ok(report)
    }

    /// Deletes records older than the cutoff according to `mode`. With
    /// `dry_run`, nothing is deleted and the outcome reports what a real run
    /// would have removed.
    fn purge(
        &self,
        cutoff: DateTime<Utc>,
        mode: PurgeMode,
        dry_run: bool,
    ) -> Result<PurgeOutcome, StoreError> {
        let events = self.fetch_all()?;
        let active_sessions = active_sessions(&events, cutoff);

        let victims: Vec<String> = events
            .iter()
            .filter(|event| event.created_at < cutoff)
            .filter(|event| match mode {
                PurgeMode::All => true,
                PurgeMode::InactiveOnly => !active_sessions.contains(&event.session_id),
            })
            .map(|event| event.id.clone())
            .collect();

        let sample: Vec<String> = victims.iter().take(PURGE_SAMPLE_LIMIT).cloned().collect();
        let affected = if dry_run {
            victims.len() as u64
        } else {
            self.delete_ids(&victims)?
        };
        debug!(affected, dry_run, ?mode, "Purge completed");

        Ok(PurgeOutcome {
            affected,
            sample,
            dry_run,
        })
    }

    /// Read-only retention counters for the given cutoff. Deletes nothing.
    fn retention_stats(&self, cutoff: DateTime<Utc>) -> Result<RetentionStats, StoreError> {
        let events = self.fetch_all()?;
        let active_sessions = active_sessions(&events, cutoff);

        let mut stats = RetentionStats {
            total: events.len() as u64,
            ..RetentionStats::default()
        };
        for event in &events {
            if active_sessions.contains(&event.session_id) {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
            if event.created_at < cutoff {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }
}

fn matches_query(event: &UserEvent, query: &EventQuery) -> bool {
    if let Some(actor_id) = &query.actor_id {
        if &event.actor_id != actor_id {
            return false;
        }
    }
    if let Some(session_id) = &query.session_id {
        if &event.session_id != session_id {
            return false;
        }
    }
    if let Some(kind) = query.kind {
        if event.kind != kind {
            return false;
        }
    }
    if let Some(from) = query.from {
        if event.created_at < from {
            return false;
        }
    }
    if let Some(until) = query.until {
        if event.created_at >= until {
            return false;
        }
    }
    true
}

/// Sessions with at least one event at or after the cutoff.
fn active_sessions(events: &[UserEvent], cutoff: DateTime<Utc>) -> HashSet<String> {
    events
        .iter()
        .filter(|event| event.created_at >= cutoff)
        .map(|event| event.session_id.clone())
        .collect()
}

/// redb-backed event store.
pub struct RedbEventStore {
    db: Database,
}

impl RedbEventStore {
    /// Opens (or creates) the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the events table
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        // Create the table up front so reads never see a missing table.
        let txn = db.begin_write()?;
        {
            txn.open_table(EVENTS_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }
}

impl EventStore for RedbEventStore {
    fn insert_batch(&self, events: &[UserEvent]) -> Result<usize, StoreError> {
        let txn = self.db.begin_write()?;
        let mut inserted = 0;
        {
            let mut table = txn.open_table(EVENTS_TABLE)?;
            for event in events {
                if table.get(event.id.as_str())?.is_some() {
                    continue;
                }
                let raw = serde_json::to_vec(event)?;
                table.insert(event.id.as_str(), raw)?;
                inserted += 1;
            }
        }
        txn.commit()?;
        Ok(inserted)
    }

    fn fetch_all(&self) -> Result<Vec<UserEvent>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EVENTS_TABLE)?;
        let mut events = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            events.push(serde_json::from_slice(&value.value())?);
        }
        Ok(events)
    }

    fn delete_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        let txn = self.db.begin_write()?;
        let mut deleted = 0;
        {
            let mut table = txn.open_table(EVENTS_TABLE)?;
            for id in ids {
                if table.remove(id.as_str())?.is_some() {
                    deleted += 1;
                }
            }
        }
        txn.commit()?;
        Ok(deleted)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EVENTS_TABLE)?;
        Ok(table.len()?)
    }
}

/// In-memory event store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<UserEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn insert_batch(&self, events: &[UserEvent]) -> Result<usize, StoreError> {
        let Ok(mut stored) = self.events.lock() else {
            return Ok(0);
        };
        let existing: HashSet<String> = stored.iter().map(|e| e.id.clone()).collect();
        let mut inserted = 0;
        let mut seen = existing;
        for event in events {
            if seen.insert(event.id.clone()) {
                stored.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn fetch_all(&self) -> Result<Vec<UserEvent>, StoreError> {
        Ok(self.events.lock().map(|e| e.clone()).unwrap_or_default())
    }

    fn delete_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        let Ok(mut stored) = self.events.lock() else {
            return Ok(0);
        };
        let victims: HashSet<&String> = ids.iter().collect();
        let before = stored.len();
        stored.retain(|event| !victims.contains(&event.id));
        Ok((before - stored.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PageContext;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    fn event(kind: EventKind, actor: &str, session: &str) -> UserEvent {
        UserEvent::new(kind, actor, "", session)
    }

    fn aged(kind: EventKind, actor: &str, session: &str, hours_ago: i64) -> UserEvent {
        let mut e = event(kind, actor, session);
        e.created_at = Utc::now() - ChronoDuration::hours(hours_ago);
        e
    }

    #[test]
    fn test_redb_insert_skips_duplicate_ids() {
        let dir = tempdir().unwrap();
        let store = RedbEventStore::open(dir.path().join("events.redb")).unwrap();

        let a = event(EventKind::Click, "u1", "s1");
        let batch = vec![a.clone(), a.clone(), event(EventKind::Click, "u2", "s2")];
        let inserted = store.insert_batch(&batch).unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.count().unwrap(), 2);

        // Re-inserting an already stored batch adds nothing.
        assert_eq!(store.insert_batch(&[a]).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_redb_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.redb");
        {
            let store = RedbEventStore::open(&path).unwrap();
            store
                .insert_batch(&[event(EventKind::PageView, "u1", "s1")])
                .unwrap();
        }
        let store = RedbEventStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_query_filters_and_pages() {
        let store = MemoryEventStore::new();
        let mut batch = Vec::new();
        for _ in 0..5 {
            batch.push(event(EventKind::Click, "u1", "s1"));
        }
        batch.push(event(EventKind::PageView, "u2", "s2"));
        store.insert_batch(&batch).unwrap();

        let page = store
            .query(&EventQuery {
                actor_id: Some("u1".to_string()),
                page: 1,
                page_size: 3,
                ..EventQuery::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.events.len(), 3);

        let page2 = store
            .query(&EventQuery {
                actor_id: Some("u1".to_string()),
                page: 2,
                page_size: 3,
                ..EventQuery::default()
            })
            .unwrap();
        assert_eq!(page2.events.len(), 2);
    }

    #[test]
    fn test_stats_counts_kinds_and_uniques() {
        let store = MemoryEventStore::new();
        store
            .insert_batch(&[
                event(EventKind::Click, "u1", "s1"),
                event(EventKind::Click, "u1", "s1"),
                event(EventKind::PageView, "u2", "s2"),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get("click"), Some(&2));
        assert_eq!(stats.unique_actors, 2);
        assert_eq!(stats.unique_sessions, 2);
    }

    #[test]
    fn test_session_analysis_rolls_up_per_session() {
        let store = MemoryEventStore::new();
        let view = event(EventKind::PageView, "u1", "s1").with_page(PageContext {
            path: "/home".to_string(),
            ..PageContext::default()
        });
        store
            .insert_batch(&[
                view,
                event(EventKind::Click, "u1", "s1"),
                event(EventKind::Click, "u1", "s2"),
                event(EventKind::Click, "other", "s3"),
            ])
            .unwrap();

        let sessions = store.session_analysis("u1").unwrap();
        assert_eq!(sessions.len(), 2);
        let s1 = sessions.iter().find(|s| s.session_id == "s1").unwrap();
        assert_eq!(s1.event_count, 2);
        assert_eq!(s1.page_view_count, 1);
        assert_eq!(s1.pages, vec!["/home".to_string()]);
    }

    #[test]
    fn test_page_performance_averages_dwell() {
        let store = MemoryEventStore::new();
        let view = |path: &str| {
            event(EventKind::PageView, "u1", "s1").with_page(PageContext {
                path: path.to_string(),
                ..PageContext::default()
            })
        };
        let leave = |path: &str, ms: u64| {
            event(EventKind::PageLeave, "u1", "s1").with_page(PageContext {
                path: path.to_string(),
                duration_ms: Some(ms),
                ..PageContext::default()
            })
        };
        store
            .insert_batch(&[
                view("/home"),
                view("/home"),
                leave("/home", 1000),
                leave("/home", 3000),
                view("/jobs"),
            ])
            .unwrap();

        let report = store.page_performance().unwrap();
        assert_eq!(report[0].path, "/home");
        assert_eq!(report[0].views, 2);
        assert_eq!(report[0].avg_dwell_ms, Some(2000));
        assert_eq!(report[1].path, "/jobs");
        assert_eq!(report[1].avg_dwell_ms, None);
    }

    #[test]
    fn test_purge_inactive_only_spares_active_sessions() {
        let store = MemoryEventStore::new();
        // s1 is old and quiet; s2 is old but has recent activity.
        store
            .insert_batch(&[
                aged(EventKind::Click, "u1", "s1", 72),
                aged(EventKind::Click, "u1", "s2", 72),
                aged(EventKind::Click, "u1", "s2", 1),
            ])
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::hours(48);
        let outcome = store.purge(cutoff, PurgeMode::InactiveOnly, false).unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_purge_dry_run_deletes_nothing() {
        let store = MemoryEventStore::new();
        store
            .insert_batch(&[
                aged(EventKind::Click, "u1", "s1", 72),
                aged(EventKind::Click, "u1", "s2", 1),
            ])
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::hours(48);
        let dry = store.purge(cutoff, PurgeMode::All, true).unwrap();
        assert_eq!(dry.affected, 1);
        assert!(dry.dry_run);
        assert_eq!(dry.sample.len(), 1);
        assert_eq!(store.count().unwrap(), 2);

        let real = store.purge(cutoff, PurgeMode::All, false).unwrap();
        assert_eq!(real.affected, dry.affected);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_retention_stats_reads_only() {
        let store = MemoryEventStore::new();
        store
            .insert_batch(&[
                aged(EventKind::Click, "u1", "s1", 72),
                aged(EventKind::Click, "u1", "s2", 72),
                aged(EventKind::Click, "u1", "s2", 1),
            ])
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::hours(48);
        let stats = store.retention_stats(cutoff).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.expired, 2);
        assert_eq!(store.count().unwrap(), 3);
    }
}
