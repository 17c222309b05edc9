//! Persistence abstraction and the write-through journaled log.

/// SQLite op journal.
pub mod sqlite;

use crate::{
    clock::TimeOfDay,
    core::store::{EventLog, LogSnapshotV1, StoreError},
    event::{EventDraft, EventRecord},
    op::StoredOp,
    types::{OpSeq, TeamId},
};

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// SQLite backend error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encode/decode error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// In-memory log refused the operation.
    #[error("log: {0}")]
    Store(#[from] StoreError),
    /// Store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Generic persistence failure.
    #[error("{0}")]
    Message(String),
}

impl StorageError {
    /// True when the failure is the empty-log undo case rather than I/O.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Store(StoreError::NothingToUndo))
    }
}

/// Result alias used by persistence code.
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable sink for journal ops.
pub trait OpSink: Send {
    /// Appends ops in order; returns the highest persisted sequence.
    fn append_ops(&mut self, ops: &[StoredOp]) -> StorageResult<OpSeq>;
    /// Flushes buffered writes.
    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
    /// Persists a snapshot covering every op up to `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &LogSnapshotV1, _last_seq: OpSeq) -> StorageResult<()> {
        Ok(())
    }
    /// Deletes ops up to and including `seq`; returns how many went.
    fn compact_through(&mut self, _seq: OpSeq) -> StorageResult<usize> {
        Ok(0)
    }
    /// Stores a labelled copy of `events`.
    fn write_archive(&mut self, _label: &str, _events: &[EventRecord]) -> StorageResult<()> {
        Ok(())
    }
}

/// Storage collaborator contract seen by the race context.
///
/// `read_all` returns `Ok(vec![])` for "no race yet"; an `Err` always means
/// the store could not be read. A failed write leaves the log unchanged.
pub trait EventStorage {
    /// Appends one arrival.
    fn append(&mut self, draft: EventDraft) -> StorageResult<EventRecord>;
    /// One `Start` per team, all or nothing.
    fn start_race(&mut self, teams: &[(TeamId, String)], at: TimeOfDay) -> StorageResult<Vec<EventRecord>>;
    /// Every stored event.
    fn read_all(&self) -> StorageResult<Vec<EventRecord>>;
    /// Truncates to empty.
    fn clear(&mut self) -> StorageResult<()>;
    /// Removes and returns the newest event.
    fn undo_last(&mut self) -> StorageResult<EventRecord>;
}

impl EventStorage for EventLog {
    fn append(&mut self, draft: EventDraft) -> StorageResult<EventRecord> {
        Ok(EventLog::append(self, draft)?.0)
    }

    fn start_race(&mut self, teams: &[(TeamId, String)], at: TimeOfDay) -> StorageResult<Vec<EventRecord>> {
        Ok(EventLog::start_race(self, teams, at)?.0)
    }

    fn read_all(&self) -> StorageResult<Vec<EventRecord>> {
        Ok(self.events_cloned())
    }

    fn clear(&mut self) -> StorageResult<()> {
        EventLog::clear(self);
        Ok(())
    }

    fn undo_last(&mut self) -> StorageResult<EventRecord> {
        Ok(EventLog::undo_last(self)?.0)
    }
}

/// In-memory log that writes every op through to a sink before returning.
///
/// When the write fails the op is rolled back, so an `Err` never leaves a
/// change behind that a retry would repeat.
pub struct Journaled<S: OpSink> {
    log: EventLog,
    sink: S,
}

impl<S: OpSink> Journaled<S> {
    /// Wraps `log`, journaling into `sink`.
    pub fn new(log: EventLog, sink: S) -> Self {
        Self { log, sink }
    }

    /// Current in-memory log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Persists pending ops; a failure leaves them queued for the next call.
    pub fn sync(&mut self) -> StorageResult<OpSeq> {
        let ops = self.log.drain_pending_ops();
        match self.sink.append_ops(&ops) {
            Ok(seq) => Ok(seq),
            Err(err) => {
                tracing::warn!(ops = ops.len(), error = %err, "journal append failed");
                self.log.requeue_pending_ops(ops);
                Err(err)
            }
        }
    }

    /// Saves the current events under `label`, then clears the log.
    pub fn archive(&mut self, label: &str) -> StorageResult<Vec<EventRecord>> {
        self.sink.write_archive(label, self.log.events())?;
        let (archived, stored) = self.log.archive();
        self.commit(&stored, archived.clone())?;
        Ok(archived)
    }

    /// Syncs, writes a snapshot and optionally compacts the journal.
    pub fn checkpoint(&mut self, compact: bool) -> StorageResult<()> {
        self.sync()?;
        let last_seq = self.log.latest_op_seq();
        self.sink.write_snapshot(&self.log.export_snapshot(), last_seq)?;
        if compact {
            self.sink.compact_through(last_seq)?;
        }
        Ok(())
    }

    fn commit(&mut self, stored: &StoredOp, dropped: Vec<EventRecord>) -> StorageResult<()> {
        if let Err(err) = self.sync() {
            if !self.log.rollback_unpersisted(stored, dropped) {
                tracing::warn!(op_seq = stored.seq, "failed op could not be rolled back, left queued");
            }
            return Err(err);
        }
        Ok(())
    }
}

impl<S: OpSink> EventStorage for Journaled<S> {
    fn append(&mut self, draft: EventDraft) -> StorageResult<EventRecord> {
        let (record, stored) = self.log.append(draft)?;
        self.commit(&stored, Vec::new())?;
        Ok(record)
    }

    fn start_race(&mut self, teams: &[(TeamId, String)], at: TimeOfDay) -> StorageResult<Vec<EventRecord>> {
        let (records, stored) = self.log.start_race(teams, at)?;
        self.commit(&stored, Vec::new())?;
        Ok(records)
    }

    fn read_all(&self) -> StorageResult<Vec<EventRecord>> {
        Ok(self.log.events_cloned())
    }

    fn clear(&mut self) -> StorageResult<()> {
        let dropped = self.log.events_cloned();
        let stored = self.log.clear();
        self.commit(&stored, dropped)
    }

    fn undo_last(&mut self) -> StorageResult<EventRecord> {
        let (record, stored) = self.log.undo_last()?;
        self.commit(&stored, vec![record.clone()])?;
        Ok(record)
    }
}
