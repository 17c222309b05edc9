use ekidenlog::{
    clock::TimeOfDay,
    core::store::{EventLog, StoreError},
    event::{EventDraft, RawEvent},
    op::Op,
    types::{Location, ParseError, Section},
};

fn t(h: u32, m: u32, s: u32) -> TimeOfDay {
    TimeOfDay::from_hms_milli(h, m, s, 0).unwrap()
}

fn draft(team: &str, section: u32, location: Location, at: TimeOfDay) -> EventDraft {
    EventDraft::at(team, format!("Team {team}"), Section::new(section).unwrap(), location, at)
}

#[test]
fn append_yields_monotonic_seqs() {
    let mut log = EventLog::new();
    let (e1, op1) = log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();
    let (e2, op2) = log.append(draft("B", 1, Location::Start, t(8, 0, 0))).unwrap();
    let (e3, op3) = log.append(draft("A", 1, Location::Point(1), t(8, 3, 0))).unwrap();

    assert_eq!((e1.seq, e2.seq, e3.seq), (1, 2, 3));
    assert_eq!((op1.seq, op2.seq, op3.seq), (1, 2, 3));
    assert_eq!(e3.time, "08:03:00.0");
    assert_eq!(log.by_team("A").len(), 2);
}

#[test]
fn undo_last_removes_only_the_tail() {
    let mut log = EventLog::new();
    log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();
    log.append(draft("A", 1, Location::Point(1), t(8, 3, 0))).unwrap();
    let before = log.events_cloned();
    log.append(draft("A", 1, Location::Relay, t(8, 9, 0))).unwrap();

    let (removed, op) = log.undo_last().unwrap();
    assert_eq!(removed.location, Location::Relay);
    assert_eq!(op.op, Op::RemoveLast { seq: removed.seq });
    assert_eq!(log.events(), before.as_slice());
    assert_eq!(log.by_team("A").len(), 2);

    // A fresh append never reuses the removed seq.
    let (next, _) = log.append(draft("A", 1, Location::Relay, t(8, 9, 1))).unwrap();
    assert_eq!(next.seq, 4);
}

#[test]
fn undo_on_empty_log_reports_nothing_to_undo() {
    let mut log = EventLog::new();
    assert_eq!(log.undo_last().unwrap_err(), StoreError::NothingToUndo);
}

#[test]
fn clear_is_idempotent() {
    let mut log = EventLog::new();
    log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();

    let first = log.clear();
    assert_eq!(first.op, Op::Clear { removed: 1 });
    assert!(log.is_empty());

    let second = log.clear();
    assert_eq!(second.op, Op::Clear { removed: 0 });
    assert!(log.is_empty());
    assert!(log.by_team("A").is_empty());
}

#[test]
fn start_race_appends_every_team_in_one_op() {
    let mut log = EventLog::new();
    let teams = vec![
        ("A".to_string(), "Alpha".to_string()),
        ("B".to_string(), "Bravo".to_string()),
        ("C".to_string(), "Charlie".to_string()),
    ];

    let (records, stored) = log.start_race(&teams, t(8, 0, 0)).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.location == Location::Start && r.section == Section::FIRST));
    let Op::Append { events } = &stored.op else {
        panic!("expected append op");
    };
    assert_eq!(events, &records);
    assert_eq!(log.drain_pending_ops().len(), 1);
}

#[test]
fn start_race_rejects_empty_roster() {
    let mut log = EventLog::new();
    assert_eq!(log.start_race(&[], t(8, 0, 0)).unwrap_err(), StoreError::EmptyRoster);
    assert!(log.is_empty());
}

#[test]
fn raw_rows_are_parsed_at_the_boundary() {
    let mut log = EventLog::new();
    let raw = RawEvent {
        team_id: "A".to_string(),
        team_name: "Alpha".to_string(),
        section: "2区".to_string(),
        location: "3km".to_string(),
        time: "08:30:00.0".to_string(),
    };
    let (record, _) = log.append_raw(raw.clone()).unwrap();
    assert_eq!(record.section, Section::new(2).unwrap());
    assert_eq!(record.location, Location::Point(3));
    assert_eq!(record.to_raw(), raw);

    let bad = RawEvent {
        location: "Halfway".to_string(),
        ..raw
    };
    assert_eq!(
        log.append_raw(bad).unwrap_err(),
        StoreError::Invalid(ParseError::Location("Halfway".to_string()))
    );
    assert_eq!(log.len(), 1);
}

#[test]
fn unparseable_time_text_is_still_stored() {
    let mut log = EventLog::new();
    let raw = RawEvent {
        team_id: "A".to_string(),
        team_name: "Alpha".to_string(),
        section: "1".to_string(),
        location: "Point(1)".to_string(),
        time: "8h03".to_string(),
    };
    let (record, _) = log.append_raw(raw).unwrap();
    assert!(record.parse_time().is_err());
}

#[test]
fn recent_and_snapshot_round_trip() {
    let mut log = EventLog::new();
    for i in 0..5 {
        log.append(draft("A", 1, Location::Point(i + 1), t(8, i, 0))).unwrap();
    }
    assert_eq!(log.recent(2).iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(log.recent(50).len(), 5);

    let restored = EventLog::from_snapshot(log.export_snapshot()).unwrap();
    assert_eq!(restored.events(), log.events());
    assert_eq!(restored.latest_op_seq(), log.latest_op_seq());
}

#[test]
fn rollback_reverts_the_newest_unpersisted_append() {
    let mut log = EventLog::new();
    log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();
    let (_, stored) = log.append(draft("A", 1, Location::Point(1), t(8, 3, 0))).unwrap();

    assert!(log.rollback_unpersisted(&stored, Vec::new()));
    assert_eq!(log.len(), 1);
    assert_eq!(log.latest_op_seq(), 1);
    assert!(!log.rollback_unpersisted(&stored, Vec::new()));
}

#[test]
fn rollback_reverts_a_whole_race_start() {
    let mut log = EventLog::new();
    let teams = vec![
        ("A".to_string(), "Alpha".to_string()),
        ("B".to_string(), "Bravo".to_string()),
    ];
    let (_, stored) = log.start_race(&teams, t(8, 0, 0)).unwrap();

    assert!(log.rollback_unpersisted(&stored, Vec::new()));
    assert!(log.is_empty());
    assert!(log.by_team("B").is_empty());
    assert!(log.drain_pending_ops().is_empty());
}

#[test]
fn rollback_restores_an_undone_event() {
    let mut log = EventLog::new();
    log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();
    log.append(draft("A", 1, Location::Point(1), t(8, 3, 0))).unwrap();
    let before = log.events_cloned();
    log.drain_pending_ops();

    let (removed, stored) = log.undo_last().unwrap();
    assert!(!log.rollback_unpersisted(&stored, Vec::new()));
    assert!(log.rollback_unpersisted(&stored, vec![removed]));
    assert_eq!(log.events(), before.as_slice());
    assert_eq!(log.by_team("A").len(), 2);
    assert_eq!(log.latest_op_seq(), 2);
}

#[test]
fn rollback_restores_a_cleared_log() {
    let mut log = EventLog::new();
    log.append(draft("A", 1, Location::Start, t(8, 0, 0))).unwrap();
    log.append(draft("B", 1, Location::Start, t(8, 0, 0))).unwrap();
    let before = log.events_cloned();

    let stored = log.clear();
    assert!(log.rollback_unpersisted(&stored, before.clone()));
    assert_eq!(log.events(), before.as_slice());
    assert_eq!(log.by_team("B").len(), 1);

    // Only the newest pending op can be reverted.
    let (_, older) = log.append(draft("A", 1, Location::Point(1), t(8, 3, 0))).unwrap();
    log.append(draft("B", 1, Location::Point(1), t(8, 3, 1))).unwrap();
    assert!(!log.rollback_unpersisted(&older, Vec::new()));
    assert_eq!(log.len(), 4);
}

#[test]
fn time_text_parses_with_optional_fraction() {
    let parse = |s: &str| s.parse::<TimeOfDay>();

    assert_eq!(parse("08:05:00").unwrap(), t(8, 5, 0));
    assert_eq!(parse(" 08:05:00.0 ").unwrap(), t(8, 5, 0));
    assert_eq!(parse("08:05:00.4").unwrap().as_millis(), t(8, 5, 0).as_millis() + 400);
    // Digits past the millisecond are dropped, not rounded.
    assert_eq!(parse("08:05:00.12399").unwrap().as_millis(), t(8, 5, 0).as_millis() + 123);
    // Single-digit fields are accepted.
    assert_eq!(parse("8:5:0").unwrap(), t(8, 5, 0));

    for bad in ["24:00:00", "08:60:00", "08:00:60", "08:00", "eight", ""] {
        assert_eq!(parse(bad), Err(ParseError::Time(bad.to_string())), "{bad:?}");
    }
}

#[test]
fn stored_time_truncates_to_tenths() {
    let at = TimeOfDay::from_hms_milli(8, 5, 0, 990).unwrap();
    assert_eq!(at.to_stored_string(), "08:05:00.9");
    assert_eq!(at.truncate_to_tenth().as_millis(), t(8, 5, 0).as_millis() + 900);
}
