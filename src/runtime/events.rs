//! Runtime event stream payloads.

use crate::types::{EventSeq, OpSeq, TeamId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// One checkpoint arrival was appended.
    Appended {
        /// Sequence of the new event.
        seq: EventSeq,
        /// Team that arrived.
        team_id: TeamId,
    },
    /// Start events for the whole roster were appended.
    RaceStarted {
        /// Number of teams started.
        teams: usize,
    },
    /// The newest event was removed.
    Undone {
        /// Sequence of the removed event.
        seq: EventSeq,
    },
    /// The log was truncated (reset or archive).
    Cleared {
        /// Number of events dropped.
        removed: usize,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
