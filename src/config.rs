//! Race configuration: name, leg count, roster and locale offset.

use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::{
    clock::SystemClock,
    types::{Section, TeamId},
};

/// Japan Standard Time, the default race locale.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 9 * 60;

/// Missing or incomplete race configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// No configuration has been supplied.
    #[error("race configuration missing")]
    Missing,
    /// `total_sections` is zero.
    #[error("race must have at least one section")]
    NoSections,
    /// Roster has no teams.
    #[error("race roster is empty")]
    EmptyRoster,
    /// A roster entry has an empty id.
    #[error("roster entry {0} has an empty team id")]
    BlankTeamId(usize),
    /// Two roster entries share an id.
    #[error("team id {0:?} listed more than once")]
    DuplicateTeam(TeamId),
    /// Main team is not on the roster.
    #[error("main team {0:?} is not on the roster")]
    UnknownMainTeam(TeamId),
    /// Operation named a team that is not on the roster.
    #[error("team {0:?} is not on the roster")]
    UnknownTeam(TeamId),
    /// Configuration replaced while the current log still holds events.
    #[error("cannot reconfigure while the race log holds events")]
    RaceInProgress,
    /// UTC offset outside +-24h.
    #[error("utc offset of {0} minutes is out of range")]
    InvalidOffset(i32),
    /// Configuration file could not be read.
    #[error("reading {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Configuration text is not valid JSON for [`RaceConfig`].
    #[error("parsing race configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamEntry {
    /// Stable identifier.
    pub team_id: TeamId,
    /// Display label.
    pub team_name: String,
}

/// Immutable description of one race. A new configuration means a new log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Race title.
    pub race_name: String,
    /// Number of legs.
    pub total_sections: u32,
    /// Teams in display order.
    pub roster: Vec<TeamEntry>,
    /// Team highlighted in displays.
    #[serde(default)]
    pub main_team: Option<TeamId>,
    /// Fixed offset of the race locale, in minutes east of UTC.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

impl RaceConfig {
    /// Parses and validates JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: RaceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks leg count, roster ids, main team and offset.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.total_sections == 0 {
            return Err(ConfigurationError::NoSections);
        }
        if self.roster.is_empty() {
            return Err(ConfigurationError::EmptyRoster);
        }

        let mut seen = HashSet::new();
        for (idx, entry) in self.roster.iter().enumerate() {
            if entry.team_id.trim().is_empty() {
                return Err(ConfigurationError::BlankTeamId(idx));
            }
            if !seen.insert(entry.team_id.as_str()) {
                return Err(ConfigurationError::DuplicateTeam(entry.team_id.clone()));
            }
        }

        if let Some(main) = &self.main_team {
            if !seen.contains(main.as_str()) {
                return Err(ConfigurationError::UnknownMainTeam(main.clone()));
            }
        }

        self.offset().map(|_| ())
    }

    /// UTC offset of the race locale.
    pub fn offset(&self) -> Result<FixedOffset, ConfigurationError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigurationError::InvalidOffset(self.utc_offset_minutes))
    }

    /// Wall clock in the race locale.
    pub fn clock(&self) -> Result<SystemClock, ConfigurationError> {
        Ok(SystemClock::new(self.offset()?))
    }

    /// Last leg of the race.
    pub fn final_section(&self) -> Option<Section> {
        Section::new(self.total_sections)
    }

    /// Roster entry for `team_id`.
    pub fn team(&self, team_id: &str) -> Option<&TeamEntry> {
        self.roster.iter().find(|t| t.team_id == team_id)
    }

    /// True for the highlighted team.
    pub fn is_main_team(&self, team_id: &str) -> bool {
        self.main_team.as_deref() == Some(team_id)
    }

    /// `(id, name)` pairs in roster order.
    pub fn roster_pairs(&self) -> Vec<(TeamId, String)> {
        self.roster
            .iter()
            .map(|t| (t.team_id.clone(), t.team_name.clone()))
            .collect()
    }
}
