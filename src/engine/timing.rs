//! Full recomputation of split, lap and rank figures from raw events.
//!
//! Nothing here is cached: every call derives the whole annotated log from
//! the raw fields, so it is always safe to rerun after an edit, undo or
//! clear. Bad timestamps degrade to the supplied `now` for that event only.

use hashbrown::{HashMap, HashSet};

use crate::{
    clock::{Elapsed, TimeOfDay},
    event::{AnnotatedEvent, AnnotatedRow, EventRecord},
    types::{EventSeq, Location, ParseError, Section},
};

use super::checks::{self, Anomaly};

/// Where the race-start anchor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSource {
    /// Earliest `Start` event in the log.
    Start,
    /// No `Start` present; `now` was used.
    Fallback,
}

/// An event whose timestamp could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    /// Affected event.
    pub seq: EventSeq,
    /// Team of the affected event.
    pub team_id: String,
    /// Parse failure.
    pub error: ParseError,
}

/// Annotated log plus everything that was recovered along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recomputation {
    /// Split anchor.
    pub race_start: TimeOfDay,
    /// Origin of `race_start`.
    pub anchor: AnchorSource,
    /// Every event, chronological (ties by insertion sequence).
    pub events: Vec<AnnotatedEvent>,
    /// Events that fell back to `now`.
    pub degraded: Vec<Degradation>,
    /// Business-rule violations found in the per-team sequences.
    pub anomalies: Vec<Anomaly>,
}

impl Recomputation {
    /// Display rows, chronological.
    pub fn rows(&self) -> Vec<AnnotatedRow> {
        self.events.iter().map(AnnotatedEvent::to_row).collect()
    }

    /// One team's events in running order.
    pub fn for_team(&self, team_id: &str) -> Vec<&AnnotatedEvent> {
        self.events.iter().filter(|e| e.event.team_id == team_id).collect()
    }

    /// Most recent event for a team.
    pub fn latest_for_team(&self, team_id: &str) -> Option<&AnnotatedEvent> {
        self.events.iter().rev().find(|e| e.event.team_id == team_id)
    }

    /// Leg the team is running now: one past the recorded section right
    /// after a `Relay`, the recorded section otherwise.
    pub fn current_section(&self, team_id: &str) -> Option<Section> {
        self.latest_for_team(team_id)
            .map(|e| current_section(e.event.section, e.event.location))
    }

    /// Annotated form of one event.
    pub fn get(&self, seq: EventSeq) -> Option<&AnnotatedEvent> {
        self.events.iter().find(|e| e.event.seq == seq)
    }

    /// Team ids in order of first appearance.
    pub fn team_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .map(|e| e.event.team_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// True when any figure rests on a fallback instant.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty() || (self.anchor == AnchorSource::Fallback && !self.events.is_empty())
    }
}

/// Section presented as "current" given a team's latest event.
pub fn current_section(recorded: Section, location: Location) -> Section {
    if location == Location::Relay {
        recorded.next()
    } else {
        recorded
    }
}

/// Derives every event's figures from the raw log.
///
/// Input order is irrelevant; `now` is the fallback for malformed timestamps
/// and for a log without any well-formed `Start`.
pub fn recompute(events: &[EventRecord], now: TimeOfDay) -> Recomputation {
    let mut degraded = Vec::new();
    let mut fell_back = vec![false; events.len()];
    let mut at = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        match event.parse_time() {
            Ok(t) => at.push(t),
            Err(error) => {
                tracing::warn!(
                    seq = event.seq,
                    team = %event.team_id,
                    raw = %event.time,
                    fallback = %now,
                    "unparseable timestamp, using current time"
                );
                degraded.push(Degradation {
                    seq: event.seq,
                    team_id: event.team_id.clone(),
                    error,
                });
                fell_back[i] = true;
                at.push(now);
            }
        }
    }

    let earliest_start = events
        .iter()
        .zip(&at)
        .zip(&fell_back)
        .filter(|((event, _), degraded)| event.location == Location::Start && !**degraded)
        .map(|((_, t), _)| *t)
        .min();
    let (race_start, anchor) = match earliest_start {
        Some(t) => (t, AnchorSource::Start),
        None => {
            if !events.is_empty() {
                tracing::warn!(anchor = %now, "no Start event in log, anchoring splits at current time");
            }
            (now, AnchorSource::Fallback)
        }
    };

    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by_key(|&i| (at[i], events[i].seq));

    let mut by_team: HashMap<&str, Vec<usize>> = HashMap::new();
    for &i in &order {
        by_team.entry(events[i].team_id.as_str()).or_default().push(i);
    }

    let mut figures = vec![(Elapsed::ZERO, Elapsed::ZERO, Elapsed::ZERO); events.len()];
    for indices in by_team.values() {
        let team_start = indices
            .iter()
            .find(|&&i| events[i].location == Location::Start && !fell_back[i])
            .map(|&i| at[i])
            .unwrap_or(race_start);

        let mut leg_start = team_start;
        let mut prev: Option<TimeOfDay> = None;
        for &i in indices {
            let t = at[i];
            let point_lap = prev.map(|p| t.since(p)).unwrap_or(Elapsed::ZERO);
            figures[i] = (point_lap, t.since(leg_start), t.since(race_start));
            // A fallback instant never opens a leg.
            if events[i].location.opens_leg() && !fell_back[i] {
                leg_start = t;
            }
            prev = Some(t);
        }
    }

    let mut arrivals: HashMap<(Section, Location), u32> = HashMap::new();
    let mut annotated = Vec::with_capacity(events.len());
    for &i in &order {
        let event = &events[i];
        let rank = arrivals.entry((event.section, event.location)).or_insert(0);
        *rank += 1;

        let (point_lap, section_lap, split) = figures[i];
        annotated.push(AnnotatedEvent {
            event: event.clone(),
            at: at[i],
            degraded: fell_back[i],
            point_lap,
            section_lap,
            split,
            checkpoint_rank: *rank,
        });
    }

    let anomalies = checks::check_sequences(&annotated);

    Recomputation {
        race_start,
        anchor,
        events: annotated,
        degraded,
        anomalies,
    }
}
