//! SQLite-backed append-only op journal sink.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    core::store::{EventLog, LogSnapshotV1},
    event::EventRecord,
    op::{Op, StoredOp, StoredOpEnvelope},
    types::OpSeq,
};

use super::{OpSink, StorageError, StorageResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: LogSnapshotV1,
}

/// SQLite implementation of [`crate::persist::OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the log from the latest snapshot plus tail ops.
    pub fn load_log(&self) -> StorageResult<EventLog> {
        let (mut log, start_seq) = match self.load_latest_snapshot()? {
            Some((snapshot, last_seq)) => (EventLog::from_snapshot(snapshot)?, last_seq),
            None => (EventLog::new(), 0),
        };

        let ops = self.load_ops_after(start_seq)?;
        tracing::debug!(after = start_seq, ops = ops.len(), "replaying journal");
        for op in ops {
            log.apply_replayed_op(op)?;
        }
        Ok(log)
    }

    /// Loads ops strictly after `seq`.
    pub fn load_ops_after(&self, seq: OpSeq) -> StorageResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM ops WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut op = decode_stored_op_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            op.seq = seq as OpSeq;
            op.ts_ms = ts_ms as u64;
            Ok(op)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &LogSnapshotV1, last_seq: OpSeq) -> StorageResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms(), payload],
        )?;
        Ok(())
    }

    /// Deletes ops up to and including `seq`.
    pub fn compact_through(&mut self, seq: OpSeq) -> StorageResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM ops WHERE seq <= ?1", params![seq as i64])?;
        Ok(count)
    }

    /// Stores a copy of `events` under `label`.
    pub fn write_archive(&mut self, label: &str, events: &[EventRecord]) -> StorageResult<()> {
        let payload = serde_json::to_vec(events)?;
        self.conn.execute(
            "INSERT INTO archives(label, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![label, now_ms(), payload],
        )?;
        Ok(())
    }

    /// Archive labels, oldest first.
    pub fn archive_labels(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT label FROM archives ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent archive saved under `label`.
    pub fn load_archive(&self, label: &str) -> StorageResult<Option<Vec<EventRecord>>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM archives WHERE label = ?1 ORDER BY id DESC LIMIT 1",
                params![label],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .transpose()
    }

    /// Returns the latest sequence persisted in the ops table.
    pub fn latest_seq(&self) -> StorageResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM ops", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn load_latest_snapshot(&self) -> StorageResult<Option<(LogSnapshotV1, OpSeq)>> {
        let row: Option<(Vec<u8>, i64)> = self
            .conn
            .query_row(
                "SELECT payload, last_seq FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, last_seq)) = row else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::Message(
                "unsupported snapshot format".to_string(),
            ));
        }
        Ok(Some((env.snapshot, last_seq as OpSeq)))
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> StorageResult<OpSeq> {
        if ops.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ops(seq, ts_ms, kind, event_count, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                let (kind, event_count) = op_kind_and_count(&stored.op);
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    kind,
                    event_count,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &LogSnapshotV1, last_seq: OpSeq) -> StorageResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> StorageResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }

    fn write_archive(&mut self, label: &str, events: &[EventRecord]) -> StorageResult<()> {
        SqliteOpSink::write_archive(self, label, events)
    }
}

fn op_kind_and_count(op: &Op) -> (i64, i64) {
    match op {
        Op::Append { events } => (1, events.len() as i64),
        Op::RemoveLast { .. } => (2, 1),
        Op::Clear { removed } => (3, *removed as i64),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn decode_stored_op_payload(payload: &[u8]) -> Result<StoredOp, String> {
    let envelope = serde_json::from_slice::<StoredOpEnvelope>(payload)
        .map_err(|e| format!("op payload decode failed: {e}"))?;
    if envelope.format_version != crate::op::OP_FORMAT_VERSION {
        return Err(format!(
            "unsupported op format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
