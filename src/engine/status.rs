//! Per-team race state inferred from the latest event.
//!
//! State is never stored; it is read off the recomputed log:
//! `NotStarted -> Racing(k) -> HandedOff(k) -> Racing(k+1) -> ... -> Finished`.

use crate::{
    clock::{Elapsed, TimeOfDay},
    config::RaceConfig,
    event::AnnotatedEvent,
    types::{Location, Section, TeamId},
};

use super::timing::{Recomputation, current_section};

/// Where a team stands in the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamState {
    /// No events yet.
    NotStarted,
    /// Running the given leg.
    Racing(Section),
    /// Handed off at the end of the given leg; the next leg is underway.
    HandedOff(Section),
    /// Crossed the finish line.
    Finished,
}

impl TeamState {
    /// State implied by a team's most recent event.
    pub fn after(latest: Option<(Section, Location)>) -> Self {
        match latest {
            None => TeamState::NotStarted,
            Some((_, Location::Finish)) => TeamState::Finished,
            Some((section, Location::Relay)) => TeamState::HandedOff(section),
            Some((section, _)) => TeamState::Racing(section),
        }
    }
}

/// A checkpoint the operator may record next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Leg label for the new event.
    pub section: Section,
    /// Checkpoint to record.
    pub location: Location,
}

/// Checkpoints that can follow `latest`, given the race length.
///
/// The next distance marker continues from the last one (`Point(1)` after a
/// `Start` or `Relay`); the leg closes with `Relay`, or `Finish` on the last leg.
pub fn next_checkpoints(latest: Option<(Section, Location)>, total_sections: u32) -> Vec<Checkpoint> {
    let closing = |section: Section| {
        if section.get() >= total_sections {
            Location::Finish
        } else {
            Location::Relay
        }
    };

    let (section, next_point) = match latest {
        None => {
            return vec![Checkpoint {
                section: Section::FIRST,
                location: Location::Start,
            }];
        }
        Some((_, Location::Finish)) => return Vec::new(),
        Some((section, Location::Relay)) => (section.next(), 1),
        Some((section, Location::Start)) => (section, 1),
        Some((section, Location::Point(n))) => (section, n.saturating_add(1)),
    };

    vec![
        Checkpoint {
            section,
            location: Location::Point(next_point),
        },
        Checkpoint {
            section,
            location: closing(section),
        },
    ]
}

/// Live summary of one team at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamStatus {
    /// Stable team identifier.
    pub team_id: TeamId,
    /// Display label.
    pub team_name: String,
    /// Highlighted team in displays.
    pub is_main: bool,
    /// Inferred state.
    pub state: TeamState,
    /// Leg being run, `None` before the start.
    pub current_section: Option<Section>,
    /// Latest annotated event.
    pub last: Option<AnnotatedEvent>,
    /// Running time since the latest checkpoint; `None` once finished.
    pub since_last: Option<Elapsed>,
    /// Running time on the current leg; `None` once finished.
    pub since_leg_start: Option<Elapsed>,
    /// Running time since race start; `None` once finished.
    pub since_race_start: Option<Elapsed>,
    /// What the operator can record next.
    pub next: Vec<Checkpoint>,
}

/// Status of every roster team, then any unlisted team seen in the log.
pub fn team_statuses(recomputed: &Recomputation, config: &RaceConfig, now: TimeOfDay) -> Vec<TeamStatus> {
    let mut teams: Vec<(TeamId, String)> = config.roster_pairs();
    for team_id in recomputed.team_ids() {
        if !teams.iter().any(|(id, _)| id == team_id) {
            let name = recomputed
                .latest_for_team(team_id)
                .map(|e| e.event.team_name.clone())
                .unwrap_or_default();
            teams.push((team_id.to_string(), name));
        }
    }

    teams
        .into_iter()
        .map(|(team_id, team_name)| {
            let last = recomputed.latest_for_team(&team_id).cloned();
            let latest = last.as_ref().map(|e| (e.event.section, e.event.location));
            let state = TeamState::after(latest);

            let live = match (&last, state) {
                (Some(e), TeamState::Racing(_) | TeamState::HandedOff(_)) => {
                    let since_last = now.since(e.at);
                    let since_leg_start = if e.event.location.opens_leg() {
                        since_last
                    } else {
                        e.section_lap.saturating_add(since_last)
                    };
                    Some((since_last, since_leg_start, now.since(recomputed.race_start)))
                }
                _ => None,
            };

            TeamStatus {
                is_main: config.is_main_team(&team_id),
                current_section: last
                    .as_ref()
                    .map(|e| current_section(e.event.section, e.event.location)),
                since_last: live.map(|l| l.0),
                since_leg_start: live.map(|l| l.1),
                since_race_start: live.map(|l| l.2),
                next: next_checkpoints(latest, config.total_sections),
                team_id,
                team_name,
                state,
                last,
            }
        })
        .collect()
}
