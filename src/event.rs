//! Checkpoint-arrival records: raw rows, drafts, stored events and annotated output.

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Elapsed, TimeOfDay},
    types::{EventSeq, Location, ParseError, Section, TeamId},
};

/// Untyped row shape exchanged with storage and display collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Stable team identifier.
    pub team_id: String,
    /// Team display label.
    pub team_name: String,
    /// Section label such as `"2区"`.
    pub section: String,
    /// Location label such as `"Relay"` or `"3km"`.
    pub location: String,
    /// Time of day `HH:MM:SS[.f]`.
    pub time: String,
}

/// Insert payload used to create a new [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Stable team identifier.
    pub team_id: TeamId,
    /// Team display label.
    pub team_name: String,
    /// Leg the team is running.
    pub section: Section,
    /// Checkpoint reached.
    pub location: Location,
    /// Raw time text; parsed by the engine, which tolerates bad values.
    pub time: String,
}

impl EventDraft {
    /// Draft stamped with `time` in storage form.
    pub fn at(
        team_id: impl Into<TeamId>,
        team_name: impl Into<String>,
        section: Section,
        location: Location,
        time: TimeOfDay,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            team_name: team_name.into(),
            section,
            location,
            time: time.to_stored_string(),
        }
    }
}

impl TryFrom<RawEvent> for EventDraft {
    type Error = ParseError;

    /// Checks structural shape only; the timestamp text is kept as-is.
    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        if raw.team_id.trim().is_empty() {
            return Err(ParseError::Missing("team_id"));
        }
        if raw.time.trim().is_empty() {
            return Err(ParseError::Missing("time"));
        }
        Ok(Self {
            section: raw.section.parse()?,
            location: raw.location.parse()?,
            team_id: raw.team_id,
            team_name: raw.team_name,
            time: raw.time,
        })
    }
}

/// Stored checkpoint arrival. Holds raw fields only, never derived figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Insertion sequence within the log.
    pub seq: EventSeq,
    /// Stable team identifier.
    pub team_id: TeamId,
    /// Team display label.
    pub team_name: String,
    /// Recorded leg label.
    pub section: Section,
    /// Checkpoint reached.
    pub location: Location,
    /// Raw time text.
    pub time: String,
}

impl EventRecord {
    /// Row form for collaborators.
    pub fn to_raw(&self) -> RawEvent {
        RawEvent {
            team_id: self.team_id.clone(),
            team_name: self.team_name.clone(),
            section: self.section.to_string(),
            location: self.location.to_string(),
            time: self.time.clone(),
        }
    }

    /// Parsed timestamp, if well formed.
    pub fn parse_time(&self) -> Result<TimeOfDay, ParseError> {
        self.time.parse()
    }
}

/// Event plus the figures derived by [`crate::engine::timing::recompute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedEvent {
    /// Source event.
    pub event: EventRecord,
    /// Effective timestamp (the fallback instant when `time` is malformed).
    pub at: TimeOfDay,
    /// True when `at` is a fallback rather than the recorded time.
    pub degraded: bool,
    /// Since this team's previous event.
    pub point_lap: Elapsed,
    /// Since the start of this team's current leg.
    pub section_lap: Elapsed,
    /// Since race start.
    pub split: Elapsed,
    /// Arrival order within the `(section, location)` group, from 1.
    pub checkpoint_rank: u32,
}

impl AnnotatedEvent {
    /// Display row with formatted durations.
    pub fn to_row(&self) -> AnnotatedRow {
        let raw = self.event.to_raw();
        AnnotatedRow {
            team_id: raw.team_id,
            team_name: raw.team_name,
            section: raw.section,
            location: raw.location,
            time: raw.time,
            point_lap: self.point_lap.lap_string(),
            section_lap: self.section_lap.lap_string(),
            split: self.split.split_string(),
            checkpoint_rank: self.checkpoint_rank,
        }
    }
}

/// Output row shape handed to display collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedRow {
    /// Stable team identifier.
    pub team_id: String,
    /// Team display label.
    pub team_name: String,
    /// Section label.
    pub section: String,
    /// Location label.
    pub location: String,
    /// Recorded time text.
    pub time: String,
    /// `MM:SS.f`.
    pub point_lap: String,
    /// `MM:SS.f`.
    pub section_lap: String,
    /// `H:MM:SS`.
    pub split: String,
    /// Rank at this checkpoint.
    pub checkpoint_rank: u32,
}
