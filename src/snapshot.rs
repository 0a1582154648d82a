//! Durable client-side queue snapshots.
//!
//! The collector persists its full pending queue after every mutation so that
//! a reload or crash loses nothing that was not yet delivered. A snapshot
//! that fails to parse is discarded and the collector starts empty; snapshot
//! corruption is never surfaced to the host application.

use crate::event::QueueItem;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Snapshot persistence errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistence seam for the pending-queue snapshot.
///
/// One logical storage key holds the serialized queue. `save` replaces the
/// snapshot wholesale; partial updates are never performed.
pub trait SnapshotStore: Send + Sync {
    /// Replaces the snapshot with the given queue contents.
    fn save(&self, items: &[QueueItem]) -> Result<(), SnapshotError>;

    /// Loads the persisted queue. An absent snapshot is an empty queue.
    fn load(&self) -> Result<Vec<QueueItem>, SnapshotError>;

    /// Removes the snapshot.
    fn clear(&self) -> Result<(), SnapshotError>;
}

/// File-backed snapshot store holding one JSON array.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, items: &[QueueItem]) -> Result<(), SnapshotError> {
        let raw = serde_json::to_vec(items)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<QueueItem>, SnapshotError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    fn clear(&self) -> Result<(), SnapshotError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-memory snapshot store. Used when queue persistence is disabled and in
/// tests, where cloned handles share the same underlying snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    items: Arc<Mutex<Vec<QueueItem>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot contents. Test-observation helper.
    pub fn contents(&self) -> Vec<QueueItem> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, items: &[QueueItem]) -> Result<(), SnapshotError> {
        if let Ok(mut slot) = self.items.lock() {
            *slot = items.to_vec();
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<QueueItem>, SnapshotError> {
        Ok(self.contents())
    }

    fn clear(&self) -> Result<(), SnapshotError> {
        if let Ok(mut slot) = self.items.lock() {
            slot.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, UserEvent};
    use tempfile::tempdir;

    fn item(actor: &str) -> QueueItem {
        QueueItem::new(UserEvent::new(EventKind::Click, actor, "", "s1"))
    }

    #[test]
    fn test_missing_file_is_empty_queue() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("queue.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_preserves_order() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("queue.json"));
        let items = vec![item("u1"), item("u2"), item("u3")];
        store.save(&items).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, items);
    }

    #[test]
    fn test_corrupt_snapshot_reports_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "[{\"event\":").unwrap();
        let store = FileSnapshotStore::new(path);
        assert!(matches!(store.load(), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("queue.json"));
        store.save(&[item("u1")]).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
