//! Durable server-side ingestion buffer.
//!
//! Ingestion handlers append whole batches to the tail of a durable FIFO
//! and acknowledge the client as soon as the append commits; the drain
//! scheduler later pops from the head and moves entries into the persistent
//! store. Appends and pops are each a single transaction, so concurrent
//! appenders and the single drainer never observe a half-applied mutation.
//!
//! Duplicate event ids are accepted here without complaint; the store's
//! insert path collapses them.

use crate::event::UserEvent;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

const BUFFER_TABLE: TableDefinition<'static, u64, Vec<u8>> = TableDefinition::new("ingest_buffer");

/// Ingestion buffer errors.
///
/// `Unavailable` is the signal the ingestion service watches for: it means
/// the buffer backend cannot take writes and the degraded direct-write path
/// should be used instead.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer backend unavailable: {0}")]
    Unavailable(String),

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

/// Durable FIFO between ingestion and the drain scheduler.
pub trait IngestBuffer: Send + Sync {
    /// Appends all events to the tail. All-or-nothing per call.
    fn enqueue(&self, events: &[UserEvent]) -> Result<(), BufferError>;

    /// Removes and returns up to `max` entries from the head, in FIFO order.
    fn pop_batch(&self, max: usize) -> Result<Vec<UserEvent>, BufferError>;

    /// Number of buffered entries.
    fn len(&self) -> Result<u64, BufferError>;

    fn is_empty(&self) -> Result<bool, BufferError> {
        Ok(self.len()? == 0)
    }
}

/// redb-backed buffer. Entries are keyed by a monotonically increasing
/// sequence number, so key order is FIFO order.
pub struct RedbBuffer {
    db: Database,
    next_seq: AtomicU64,
}

impl RedbBuffer {
    /// Opens (or creates) the buffer at the given path, resuming the
    /// sequence counter after the highest surviving entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        let next_seq = {
            let table = txn.open_table(BUFFER_TABLE)?;
            let seq = match table.last()? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            seq
        };
        txn.commit()?;
        Ok(Self {
            db,
            next_seq: AtomicU64::new(next_seq),
        })
    }
}

impl IngestBuffer for RedbBuffer {
    fn enqueue(&self, events: &[UserEvent]) -> Result<(), BufferError> {
        if events.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BUFFER_TABLE)?;
            for event in events {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                let raw = serde_json::to_vec(event)?;
                table.insert(seq, raw)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn pop_batch(&self, max: usize) -> Result<Vec<UserEvent>, BufferError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_write()?;
        let mut popped = Vec::new();
        {
            let mut table = txn.open_table(BUFFER_TABLE)?;
            let keys: Vec<u64> = table
                .iter()?
                .take(max)
                .map(|entry| entry.map(|(key, _)| key.value()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                if let Some(value) = table.remove(key)? {
                    popped.push(serde_json::from_slice(&value.value())?);
                }
            }
        }
        txn.commit()?;
        Ok(popped)
    }

    fn len(&self) -> Result<u64, BufferError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BUFFER_TABLE)?;
        Ok(table.len()?)
    }
}

/// In-memory buffer for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    entries: Mutex<std::collections::VecDeque<UserEvent>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IngestBuffer for MemoryBuffer {
    fn enqueue(&self, events: &[UserEvent]) -> Result<(), BufferError> {
        let Ok(mut entries) = self.entries.lock() else {
            return Err(BufferError::Unavailable("buffer lock poisoned".to_string()));
        };
        entries.extend(events.iter().cloned());
        Ok(())
    }

    fn pop_batch(&self, max: usize) -> Result<Vec<UserEvent>, BufferError> {
        let Ok(mut entries) = self.entries.lock() else {
            return Err(BufferError::Unavailable("buffer lock poisoned".to_string()));
        };
        let take = max.min(entries.len());
        Ok(entries.drain(..take).collect())
    }

    fn len(&self) -> Result<u64, BufferError> {
        Ok(self.entries.lock().map(|e| e.len() as u64).unwrap_or(0))
    }
}
