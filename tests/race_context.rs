use std::cell::Cell;

use ekidenlog::{
    clock::{FixedClock, TimeOfDay},
    config::{ConfigurationError, RaceConfig},
    context::{ContextError, RaceContext},
    core::store::EventLog,
    engine::status::TeamState,
    event::{EventDraft, EventRecord},
    persist::{EventStorage, StorageError, StorageResult},
    types::{Location, Section, TeamId},
};

const CONFIG: &str = r#"{
    "race_name": "Hakone Practice",
    "total_sections": 2,
    "roster": [
        {"team_id": "A", "team_name": "Alpha"},
        {"team_id": "B", "team_name": "Bravo"}
    ],
    "main_team": "B"
}"#;

fn t(h: u32, m: u32, s: u32) -> TimeOfDay {
    TimeOfDay::from_hms_milli(h, m, s, 0).unwrap()
}

/// Log whose reads can be switched off.
struct FlakyStorage {
    log: EventLog,
    down: Cell<bool>,
}

impl EventStorage for FlakyStorage {
    fn append(&mut self, draft: EventDraft) -> StorageResult<EventRecord> {
        EventStorage::append(&mut self.log, draft)
    }

    fn start_race(&mut self, teams: &[(TeamId, String)], at: TimeOfDay) -> StorageResult<Vec<EventRecord>> {
        EventStorage::start_race(&mut self.log, teams, at)
    }

    fn read_all(&self) -> StorageResult<Vec<EventRecord>> {
        if self.down.get() {
            return Err(StorageError::Unavailable("disk unplugged".to_string()));
        }
        self.log.read_all()
    }

    fn clear(&mut self) -> StorageResult<()> {
        EventStorage::clear(&mut self.log)
    }

    fn undo_last(&mut self) -> StorageResult<EventRecord> {
        EventStorage::undo_last(&mut self.log)
    }
}

#[test]
fn config_parses_with_default_offset() {
    let cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    assert_eq!(cfg.utc_offset_minutes, 540);
    assert_eq!(cfg.final_section(), Section::new(2));
    assert!(cfg.is_main_team("B"));
    assert_eq!(cfg.team("A").unwrap().team_name, "Alpha");
}

#[test]
fn config_validation_rejects_bad_rosters() {
    let mut cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    cfg.roster[1].team_id = "A".to_string();
    assert!(matches!(cfg.validate(), Err(ConfigurationError::DuplicateTeam(id)) if id == "A"));

    let mut cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    cfg.main_team = Some("Z".to_string());
    assert!(matches!(cfg.validate(), Err(ConfigurationError::UnknownMainTeam(_))));

    let mut cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    cfg.total_sections = 0;
    assert!(matches!(cfg.validate(), Err(ConfigurationError::NoSections)));

    let mut cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    cfg.utc_offset_minutes = 24 * 60;
    assert!(matches!(cfg.validate(), Err(ConfigurationError::InvalidOffset(_))));

    assert!(matches!(
        RaceConfig::from_json_str("{\"race_name\": 3}"),
        Err(ConfigurationError::Parse(_))
    ));
}

#[test]
fn config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.json");
    std::fs::write(&path, CONFIG).unwrap();
    assert_eq!(RaceConfig::load(&path).unwrap().race_name, "Hakone Practice");

    let missing = dir.path().join("nope.json");
    assert!(matches!(RaceConfig::load(&missing), Err(ConfigurationError::Read { .. })));
}

#[test]
fn unconfigured_context_refuses_race_operations() {
    let mut ctx = RaceContext::unconfigured();
    let mut log = EventLog::new();

    assert!(matches!(ctx.config(), Err(ConfigurationError::Missing)));
    assert!(matches!(
        ctx.start_race(&mut log, t(8, 0, 0)),
        Err(ContextError::Configuration(ConfigurationError::Missing))
    ));
    assert!(log.is_empty());

    // Log-level views still work.
    assert!(ctx.view(t(8, 0, 0)).statuses.is_empty());
}

#[test]
fn arrivals_follow_the_inferred_section() {
    let mut ctx = RaceContext::new(RaceConfig::from_json_str(CONFIG).unwrap()).unwrap();
    let mut log = EventLog::new();
    assert!(ctx.awaiting_start());

    ctx.start_race(&mut log, t(8, 0, 0)).unwrap();
    assert_eq!(ctx.snapshot().len(), 2);

    ctx.record_arrival(&mut log, "A", Location::Relay, t(8, 30, 0)).unwrap();
    let point = ctx.record_arrival(&mut log, "A", Location::Point(1), t(8, 33, 0)).unwrap();
    assert_eq!(point.section, Section::new(2).unwrap());
    assert_eq!(point.team_name, "Alpha");

    assert!(matches!(
        ctx.record_arrival(&mut log, "Z", Location::Point(1), t(8, 34, 0)),
        Err(ContextError::Configuration(ConfigurationError::UnknownTeam(_)))
    ));

    let view = ctx.view_with(&FixedClock(t(8, 40, 0)));
    assert!(view.stale.is_none());
    assert_eq!(view.statuses[0].state, TeamState::Racing(Section::new(2).unwrap()));
    assert!(view.statuses[1].is_main);
    assert!(view.recomputed.anomalies.is_empty());
}

#[test]
fn undo_and_reset_reload_the_snapshot() {
    let mut ctx = RaceContext::new(RaceConfig::from_json_str(CONFIG).unwrap()).unwrap();
    let mut log = EventLog::new();
    ctx.start_race(&mut log, t(8, 0, 0)).unwrap();
    ctx.record_arrival(&mut log, "B", Location::Point(1), t(8, 4, 0)).unwrap();

    let removed = ctx.undo_last(&mut log).unwrap();
    assert_eq!(removed.location, Location::Point(1));
    assert_eq!(ctx.snapshot().len(), 2);

    ctx.reset(&mut log).unwrap();
    assert!(ctx.awaiting_start());
    assert!(ctx.undo_last(&mut log).unwrap_err().is_not_found());
}

#[test]
fn failed_reload_keeps_previous_snapshot_and_marks_stale() {
    let mut ctx = RaceContext::new(RaceConfig::from_json_str(CONFIG).unwrap()).unwrap();
    let mut storage = FlakyStorage {
        log: EventLog::new(),
        down: Cell::new(false),
    };
    ctx.start_race(&mut storage, t(8, 0, 0)).unwrap();

    storage.down.set(true);
    assert!(ctx.refresh(&storage).is_err());
    assert_eq!(ctx.snapshot().len(), 2);
    assert!(ctx.stale().is_some());
    assert!(ctx.view(t(8, 5, 0)).stale.unwrap().contains("disk unplugged"));

    storage.down.set(false);
    assert_eq!(ctx.refresh(&storage).unwrap(), 2);
    assert!(ctx.stale().is_none());
}

#[test]
fn reconfigure_is_refused_mid_race() {
    let cfg = RaceConfig::from_json_str(CONFIG).unwrap();
    let mut ctx = RaceContext::new(cfg.clone()).unwrap();
    let mut log = EventLog::new();
    ctx.start_race(&mut log, t(8, 0, 0)).unwrap();

    let mut longer = cfg.clone();
    longer.total_sections = 5;
    assert!(matches!(ctx.configure(longer.clone()), Err(ConfigurationError::RaceInProgress)));
    assert!(ctx.configure(cfg).is_ok());

    ctx.reset(&mut log).unwrap();
    assert!(ctx.configure(longer).is_ok());
    assert_eq!(ctx.config().unwrap().total_sections, 5);
}
