//! Business-rule checks over each team's running order.
//!
//! Findings are reported, never corrected; figures are computed regardless.

use hashbrown::HashMap;

use crate::{
    event::AnnotatedEvent,
    types::{EventSeq, Location, Section},
};

/// Rule broken by a team's event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Recorded section went backwards.
    SectionDecreased {
        /// Section of the preceding event.
        from: Section,
        /// Section of this event.
        to: Section,
    },
    /// Event recorded after the team finished.
    AfterFinish,
    /// Event after a `Relay` is not labelled with the following leg.
    SectionNotAdvanced {
        /// Leg implied by the relay.
        expected: Section,
        /// Leg on the label.
        found: Section,
    },
    /// More than one `Start` for the team.
    DuplicateStart,
    /// Inserted before an event that precedes it in time.
    RecordedOutOfOrder,
}

/// One flagged event. Anomalies never change the computed figures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// Offending event.
    pub seq: EventSeq,
    /// Team of the offending event.
    pub team_id: String,
    /// Broken rule.
    pub kind: AnomalyKind,
}

/// Walks each team's events (already in running order) for rule violations.
pub(crate) fn check_sequences(events: &[AnnotatedEvent]) -> Vec<Anomaly> {
    let mut last_seen: HashMap<&str, &AnnotatedEvent> = HashMap::new();
    let mut starts: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::new();

    for current in events {
        let team = current.event.team_id.as_str();
        let mut flag = |kind| {
            out.push(Anomaly {
                seq: current.event.seq,
                team_id: team.to_string(),
                kind,
            })
        };

        if current.event.location == Location::Start {
            let count = starts.entry(team).or_insert(0);
            *count += 1;
            if *count > 1 {
                flag(AnomalyKind::DuplicateStart);
            }
        }

        if let Some(prev) = last_seen.get(team) {
            let (from, to) = (prev.event.section, current.event.section);
            match prev.event.location {
                Location::Finish => flag(AnomalyKind::AfterFinish),
                Location::Relay if to != from.next() => flag(AnomalyKind::SectionNotAdvanced {
                    expected: from.next(),
                    found: to,
                }),
                _ if to < from => flag(AnomalyKind::SectionDecreased { from, to }),
                _ => {}
            }
            if current.event.seq < prev.event.seq {
                flag(AnomalyKind::RecordedOutOfOrder);
            }
        }

        last_seen.insert(team, current);
    }

    if !out.is_empty() {
        tracing::debug!(count = out.len(), "event log anomalies");
    }
    out
}
