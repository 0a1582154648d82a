//! Session identity and activity tracking.
//!
//! A session groups the events of one client lifetime. The tracker issues the
//! session id, bumps activity counters on every submission, and persists its
//! state through a session-scoped [`SessionStore`] so a reload within the
//! same session keeps the same id and counters.

use crate::event::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Mutable per-session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    /// Stable session identifier (UUID v4)
    pub session_id: String,

    /// Session start time
    pub started_at: DateTime<Utc>,

    /// Last submission time
    pub last_active_at: DateTime<Utc>,

    /// Number of page-view events seen this session
    pub page_view_count: u64,

    /// Total number of events seen this session
    pub event_count: u64,
}

impl SessionInfo {
    /// Starts a fresh session.
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            last_active_at: now,
            page_view_count: 0,
            event_count: 0,
        }
    }
}

/// Session-scoped persistence for [`SessionInfo`].
///
/// Store failures are never surfaced to the host; implementations log and
/// continue, since losing a session record only costs counter continuity.
pub trait SessionStore: Send + Sync {
    /// Loads the persisted session, if any.
    fn load(&self) -> Option<SessionInfo>;

    /// Persists the session state.
    fn save(&self, info: &SessionInfo);
}

/// In-memory session store. Used when session persistence is disabled and in
/// tests; state lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slot: Arc<Mutex<Option<SessionInfo>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<SessionInfo> {
        self.slot.lock().map(|slot| slot.clone()).unwrap_or(None)
    }

    fn save(&self, info: &SessionInfo) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(info.clone());
        }
    }
}

/// File-backed session store holding one JSON document.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<SessionInfo> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "Discarding corrupt session record");
                None
            }
        }
    }

    fn save(&self, info: &SessionInfo) {
        let raw = match serde_json::to_string(info) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "Failed to serialize session record");
                return;
            }
        };
        if let Err(error) = std::fs::write(&self.path, raw) {
            warn!(path = %self.path.display(), %error, "Failed to persist session record");
        }
    }
}

/// Tracks the current session and its activity counters.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    info: Mutex<SessionInfo>,
}

impl SessionTracker {
    /// Recovers the persisted session or starts a fresh one.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let info = store.load().unwrap_or_else(SessionInfo::start);
        store.save(&info);
        Self {
            store,
            info: Mutex::new(info),
        }
    }

    /// Returns the stable session id.
    pub fn session_id(&self) -> String {
        self.info
            .lock()
            .map(|info| info.session_id.clone())
            .unwrap_or_default()
    }

    /// Records one submission: bumps counters and last-active time.
    pub fn record(&self, kind: EventKind) {
        let Ok(mut info) = self.info.lock() else {
            return;
        };
        info.event_count = info.event_count.saturating_add(1);
        if kind == EventKind::PageView {
            info.page_view_count = info.page_view_count.saturating_add(1);
        }
        info.last_active_at = Utc::now();
        self.store.save(&info);
    }

    /// Returns a copy of the current session state.
    pub fn snapshot(&self) -> SessionInfo {
        self.info
            .lock()
            .map(|info| info.clone())
            .unwrap_or_else(|_| SessionInfo::start())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_counters_advance_on_record() {
        let tracker = SessionTracker::new(Arc::new(MemorySessionStore::new()));
        tracker.record(EventKind::PageView);
        tracker.record(EventKind::Click);
        tracker.record(EventKind::Click);

        let info = tracker.snapshot();
        assert_eq!(info.event_count, 3);
        assert_eq!(info.page_view_count, 1);
    }

    #[test]
    fn test_session_id_survives_reload() {
        let store = Arc::new(MemorySessionStore::new());
        let first = SessionTracker::new(store.clone());
        first.record(EventKind::PageView);
        let id = first.session_id();
        drop(first);

        let second = SessionTracker::new(store);
        assert_eq!(second.session_id(), id);
        assert_eq!(second.snapshot().page_view_count, 1);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        let info = SessionInfo::start();
        store.save(&info);
        assert_eq!(store.load(), Some(info));
    }

    #[test]
    fn test_file_store_discards_corrupt_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSessionStore::new(path);
        assert!(store.load().is_none());
    }
}
