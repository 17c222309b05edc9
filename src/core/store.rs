use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    clock::TimeOfDay,
    event::{EventDraft, EventRecord, RawEvent},
    op::{Op, StoredOp},
    types::{EventSeq, Location, OpSeq, ParseError, Section, TeamId},
};

use super::indices::VecIndex;

/// In-memory log failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Undo requested on an empty log.
    #[error("no event to undo")]
    NothingToUndo,
    /// Row failed boundary parsing.
    #[error("invalid event: {0}")]
    Invalid(#[from] ParseError),
    /// Race start with no teams.
    #[error("race start needs at least one team")]
    EmptyRoster,
    /// Record sequence does not follow the current tail.
    #[error("event seq {0} is not after the log tail")]
    OutOfOrderSeq(EventSeq),
    /// Journal removal does not match the rebuilt log.
    #[error("replayed removal of seq {expected} but log tail is {found:?}")]
    ReplayMismatch {
        /// Seq named by the journal op.
        expected: EventSeq,
        /// Actual tail seq, if any.
        found: Option<EventSeq>,
    },
}

/// Serializable full-state snapshot, version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshotV1 {
    /// Next event sequence to allocate.
    pub next_event_seq: EventSeq,
    /// Next operation sequence to allocate.
    pub next_op_seq: OpSeq,
    /// Events in insertion order.
    pub events: Vec<EventRecord>,
}

/// Ordered, append-only set of checkpoint arrivals.
///
/// Derived figures are never stored here; see [`crate::engine::timing`].
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<EventRecord>,
    by_team: VecIndex<TeamId>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_event_seq: EventSeq,
}

impl EventLog {
    /// Creates an empty log with sequences starting at 1.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_event_seq: 1,
            ..Self::default()
        }
    }

    /// Restores a log from a snapshot.
    pub fn from_snapshot(snapshot: LogSnapshotV1) -> Result<Self, StoreError> {
        let mut log = Self {
            next_event_seq: snapshot.next_event_seq,
            next_op_seq: snapshot.next_op_seq,
            ..Self::default()
        };

        for event in snapshot.events {
            log.push_record(event)?;
        }

        Ok(log)
    }

    /// Exports the full state.
    pub fn export_snapshot(&self) -> LogSnapshotV1 {
        LogSnapshotV1 {
            next_event_seq: self.next_event_seq,
            next_op_seq: self.next_op_seq,
            events: self.events.clone(),
        }
    }

    /// Appends one arrival and records an [`Op::Append`].
    pub fn append(&mut self, draft: EventDraft) -> Result<(EventRecord, StoredOp), StoreError> {
        let record = self.materialize(draft);
        self.push_record(record.clone())?;
        tracing::debug!(
            seq = record.seq,
            team = %record.team_id,
            section = %record.section,
            location = %record.location,
            "event appended"
        );
        let stored = self.record_op(Op::Append {
            events: vec![record.clone()],
        });
        Ok((record, stored))
    }

    /// Parses a storage-shaped row, then appends it.
    pub fn append_raw(&mut self, raw: RawEvent) -> Result<(EventRecord, StoredOp), StoreError> {
        self.append(EventDraft::try_from(raw)?)
    }

    /// Appends one `Start` per team in a single journal op.
    pub fn start_race(
        &mut self,
        teams: &[(TeamId, String)],
        at: TimeOfDay,
    ) -> Result<(Vec<EventRecord>, StoredOp), StoreError> {
        if teams.is_empty() {
            return Err(StoreError::EmptyRoster);
        }

        let mut records = Vec::with_capacity(teams.len());
        for (team_id, team_name) in teams {
            let draft = EventDraft::at(team_id.clone(), team_name.clone(), Section::FIRST, Location::Start, at);
            let record = self.materialize(draft);
            self.push_record(record.clone())?;
            records.push(record);
        }

        tracing::info!(teams = records.len(), start = %at, "race started");
        let stored = self.record_op(Op::Append {
            events: records.clone(),
        });
        Ok((records, stored))
    }

    /// Removes the most recently appended event.
    pub fn undo_last(&mut self) -> Result<(EventRecord, StoredOp), StoreError> {
        let removed = self.pop_record().ok_or(StoreError::NothingToUndo)?;
        tracing::debug!(seq = removed.seq, team = %removed.team_id, "last event removed");
        let stored = self.record_op(Op::RemoveLast { seq: removed.seq });
        Ok((removed, stored))
    }

    /// Truncates the log. Clearing an empty log is a no-op apart from the op.
    pub fn clear(&mut self) -> StoredOp {
        let removed = self.events.len();
        self.events.clear();
        self.by_team.clear();
        self.record_op(Op::Clear { removed })
    }

    /// Hands back every event and leaves the log empty.
    pub fn archive(&mut self) -> (Vec<EventRecord>, StoredOp) {
        let archived = self.events.clone();
        let stored = self.clear();
        tracing::info!(events = archived.len(), "log archived");
        (archived, stored)
    }

    /// Applies a journal op during replay.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        match stored.op {
            Op::Append { events } => {
                for event in events {
                    self.push_record(event)?;
                }
            }
            Op::RemoveLast { seq } => {
                let found = self.events.last().map(|e| e.seq);
                if found != Some(seq) {
                    return Err(StoreError::ReplayMismatch {
                        expected: seq,
                        found,
                    });
                }
                self.pop_record();
            }
            Op::Clear { .. } => {
                self.events.clear();
                self.by_team.clear();
            }
        }
        self.next_op_seq = self.next_op_seq.max(stored.seq.saturating_add(1));
        Ok(())
    }

    /// Events in insertion order.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Owned copy of every event.
    pub fn events_cloned(&self) -> Vec<EventRecord> {
        self.events.clone()
    }

    /// Looks up an event by sequence.
    pub fn get(&self, seq: EventSeq) -> Option<&EventRecord> {
        self.position(seq).map(|idx| &self.events[idx])
    }

    /// Most recently appended event.
    pub fn last(&self) -> Option<&EventRecord> {
        self.events.last()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no event is stored.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Up to `n` newest events, oldest first.
    pub fn recent(&self, n: usize) -> &[EventRecord] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// One team's events in insertion order.
    pub fn by_team(&self, team_id: &str) -> Vec<&EventRecord> {
        self.by_team
            .get(team_id)
            .into_iter()
            .flat_map(|seqs| seqs.iter())
            .filter_map(|seq| self.get(*seq))
            .collect()
    }

    /// Owned form of [`EventLog::by_team`].
    pub fn by_team_cloned(&self, team_id: &str) -> Vec<EventRecord> {
        self.by_team(team_id).into_iter().cloned().collect()
    }

    /// Takes ops not yet handed to a sink.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Puts unpersisted ops back in front of anything queued since.
    pub fn requeue_pending_ops(&mut self, mut ops: Vec<StoredOp>) {
        ops.append(&mut self.pending_ops);
        self.pending_ops = ops;
    }

    /// Reverts an op that never reached the journal.
    ///
    /// `stored` must be the newest pending op. `dropped` holds the records it
    /// removed: the single record for [`Op::RemoveLast`], every record for
    /// [`Op::Clear`], nothing for [`Op::Append`]. Returns false and changes
    /// nothing when the op cannot be reverted.
    pub fn rollback_unpersisted(&mut self, stored: &StoredOp, dropped: Vec<EventRecord>) -> bool {
        if !self.pending_ops.last().is_some_and(|op| op.seq == stored.seq) {
            return false;
        }

        match &stored.op {
            Op::Append { events } => {
                let Some(start) = self.events.len().checked_sub(events.len()) else {
                    return false;
                };
                if self.events[start..] != events[..] {
                    return false;
                }
                for _ in 0..events.len() {
                    self.pop_record();
                }
            }
            Op::RemoveLast { seq } => {
                let [record] = dropped.as_slice() else {
                    return false;
                };
                if record.seq != *seq || self.events.last().is_some_and(|tail| tail.seq >= *seq) {
                    return false;
                }
                if self.push_record(record.clone()).is_err() {
                    return false;
                }
            }
            Op::Clear { removed } => {
                if !self.events.is_empty() || dropped.len() != *removed {
                    return false;
                }
                if !dropped.windows(2).all(|w| w[0].seq < w[1].seq) {
                    return false;
                }
                for record in dropped {
                    // Cannot fail: the log is empty and `dropped` is ascending.
                    let _ = self.push_record(record);
                }
            }
        }

        tracing::debug!(op_seq = stored.seq, "unpersisted op rolled back");
        self.pending_ops.pop();
        self.next_op_seq = stored.seq;
        true
    }

    /// Sequence of the newest op, 0 before any.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn materialize(&mut self, draft: EventDraft) -> EventRecord {
        let seq = self.next_event_seq;
        self.next_event_seq += 1;
        EventRecord {
            seq,
            team_id: draft.team_id,
            team_name: draft.team_name,
            section: draft.section,
            location: draft.location,
            time: draft.time,
        }
    }

    fn push_record(&mut self, record: EventRecord) -> Result<(), StoreError> {
        if self.events.last().is_some_and(|tail| tail.seq >= record.seq) {
            return Err(StoreError::OutOfOrderSeq(record.seq));
        }
        self.next_event_seq = self.next_event_seq.max(record.seq.saturating_add(1));
        self.by_team
            .entry(record.team_id.clone())
            .or_default()
            .push(record.seq);
        self.events.push(record);
        Ok(())
    }

    fn pop_record(&mut self) -> Option<EventRecord> {
        let record = self.events.pop()?;
        if let Some(seqs) = self.by_team.get_mut(record.team_id.as_str()) {
            seqs.retain(|seq| *seq != record.seq);
            if seqs.is_empty() {
                self.by_team.remove(record.team_id.as_str());
            }
        }
        Some(record)
    }

    fn position(&self, seq: EventSeq) -> Option<usize> {
        self.events.binary_search_by_key(&seq, |e| e.seq).ok()
    }

    fn record_op(&mut self, op: Op) -> StoredOp {
        let stored = StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms: now_ms(),
            op,
        };
        self.pending_ops.push(stored.clone());
        stored
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
