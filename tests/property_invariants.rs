use hashbrown::HashMap;
use proptest::prelude::*;

use ekidenlog::{
    clock::{Elapsed, TimeOfDay},
    core::store::{EventLog, StoreError},
    engine::timing::recompute,
    event::{EventDraft, EventRecord, RawEvent},
    types::{EventSeq, Location, Section},
};

#[derive(Debug, Clone)]
enum Action {
    Arrive { team: u8, section: u8, location: u8, secs: u32 },
    Garbled { team: u8 },
    Undo,
    Clear,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        8 => (0u8..4, 1u8..4, 0u8..6, 0u32..7_200).prop_map(|(team, section, location, secs)| {
            Action::Arrive { team, section, location, secs }
        }),
        1 => (0u8..4).prop_map(|team| Action::Garbled { team }),
        2 => Just(Action::Undo),
        1 => Just(Action::Clear),
    ]
}

fn location_from(idx: u8) -> Location {
    match idx {
        0 => Location::Start,
        1 => Location::Relay,
        2 => Location::Finish,
        n => Location::Point(u32::from(n) - 2),
    }
}

fn arrival(team: u8, section: u8, location: u8, secs: u32) -> EventDraft {
    let at = TimeOfDay::from_millis(8 * 3_600_000 + secs * 1_000).unwrap();
    EventDraft::at(
        format!("T{team}"),
        format!("Team {team}"),
        Section::new(u32::from(section)).unwrap(),
        location_from(location),
        at,
    )
}

fn full_scan_by_team(log: &EventLog, team: &str) -> Vec<EventSeq> {
    log.events()
        .iter()
        .filter(|e| e.team_id == team)
        .map(|e| e.seq)
        .collect()
}

fn run(actions: &[Action]) -> EventLog {
    let mut log = EventLog::new();
    for action in actions {
        match action {
            Action::Arrive { team, section, location, secs } => {
                let _ = log.append(arrival(*team, *section, *location, *secs));
            }
            Action::Garbled { team } => {
                let mut draft = arrival(*team, 1, 3, 0);
                draft.time = "??:??".to_string();
                let _ = log.append(draft);
            }
            Action::Undo => match log.undo_last() {
                Ok(_) | Err(StoreError::NothingToUndo) => {}
                Err(other) => panic!("unexpected undo error: {other:?}"),
            },
            Action::Clear => {
                log.clear();
            }
        }
    }
    log
}

fn now() -> TimeOfDay {
    TimeOfDay::from_hms_milli(11, 0, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn team_index_matches_full_scan(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let log = run(&actions);
        for team in 0u8..4 {
            let id = format!("T{team}");
            let indexed: Vec<EventSeq> = log.by_team(&id).into_iter().map(|e| e.seq).collect();
            prop_assert_eq!(indexed, full_scan_by_team(&log, &id));
        }
        let seqs: Vec<EventSeq> = log.events().iter().map(|e| e.seq).collect();
        prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn recompute_is_idempotent_and_ignores_input_order(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let log = run(&actions);
        let first = recompute(log.events(), now());
        let again = recompute(log.events(), now());
        prop_assert_eq!(&first, &again);

        let mut reversed: Vec<EventRecord> = log.events_cloned();
        reversed.reverse();
        let shuffled = recompute(&reversed, now());
        prop_assert_eq!(&first.events, &shuffled.events);
        prop_assert_eq!(&first.anomalies, &shuffled.anomalies);
        prop_assert_eq!(first.race_start, shuffled.race_start);
    }

    #[test]
    fn output_rows_rebuild_the_same_figures(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let log = run(&actions);
        let out = recompute(log.events(), now());

        let mut rebuilt = EventLog::new();
        for event in log.events() {
            let row = out.get(event.seq).unwrap().to_row();
            rebuilt
                .append_raw(RawEvent {
                    team_id: row.team_id,
                    team_name: row.team_name,
                    section: row.section,
                    location: row.location,
                    time: row.time,
                })
                .unwrap();
        }

        let again = recompute(rebuilt.events(), now());
        prop_assert_eq!(out.rows(), again.rows());
        prop_assert_eq!(out.race_start, again.race_start);
        prop_assert_eq!(out.degraded.len(), again.degraded.len());
    }

    #[test]
    fn splits_never_decrease_along_a_team(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let log = run(&actions);
        let out = recompute(log.events(), now());
        for team in 0u8..4 {
            let splits: Vec<Elapsed> = out.for_team(&format!("T{team}")).iter().map(|e| e.split).collect();
            prop_assert!(splits.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn checkpoint_ranks_are_a_bijection(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let log = run(&actions);
        let out = recompute(log.events(), now());

        let mut groups: HashMap<(Section, Location), Vec<u32>> = HashMap::new();
        for e in &out.events {
            groups.entry((e.event.section, e.event.location)).or_default().push(e.checkpoint_rank);
        }
        for ranks in groups.values() {
            let expected: Vec<u32> = (1..=ranks.len() as u32).collect();
            prop_assert_eq!(ranks, &expected);
        }
    }

    #[test]
    fn displayed_figures_never_run_fast(ms in 0u64..40_000_000) {
        let elapsed = Elapsed::from_millis(ms);
        let tenths = elapsed.ceil_tenths() * 100;
        let secs = elapsed.ceil_secs() * 1_000;
        prop_assert!(tenths >= ms && tenths < ms + 100);
        prop_assert!(secs >= ms && secs < ms + 1_000);

        let lap = elapsed.lap_string();
        let (minutes, rest) = lap.split_once(':').unwrap();
        let shown = minutes.parse::<u64>().unwrap() * 60_000
            + (rest.parse::<f64>().unwrap() * 1_000.0).round() as u64;
        prop_assert_eq!(shown, tenths);

        let split = elapsed.split_string();
        let fields: Vec<u64> = split.split(':').map(|f| f.parse().unwrap()).collect();
        prop_assert_eq!(fields.len(), 3);
        prop_assert!(fields[1] < 60 && fields[2] < 60);
        let shown = (fields[0] * 3_600 + fields[1] * 60 + fields[2]) * 1_000;
        prop_assert_eq!(shown, secs);
        prop_assert!(shown >= ms && shown < ms + 1_000);
    }
}
