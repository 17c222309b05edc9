//! Explicit race context: configuration plus the last log snapshot read.
//!
//! There is no process-wide state. Callers hold a [`RaceContext`], call
//! [`RaceContext::refresh`] to reload the log, and derive views on demand.
//! A failed reload keeps the previous snapshot and marks the context stale.

use crate::{
    clock::{Clock, TimeOfDay},
    config::{ConfigurationError, RaceConfig},
    engine::{
        status::{TeamStatus, team_statuses},
        timing::{Recomputation, recompute},
    },
    event::{EventDraft, EventRecord},
    persist::{EventStorage, StorageError},
    types::{Location, Section},
};

/// Failure of a context operation.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Configuration missing or the team is not on the roster.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Storage read or write failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything a display needs for one refresh.
#[derive(Debug, Clone)]
pub struct RaceView {
    /// Annotated log.
    pub recomputed: Recomputation,
    /// Per-team live summaries; empty without a configuration.
    pub statuses: Vec<TeamStatus>,
    /// Set when the figures come from an older snapshot.
    pub stale: Option<String>,
}

/// Configuration plus the last log snapshot read from storage.
#[derive(Debug, Default)]
pub struct RaceContext {
    config: Option<RaceConfig>,
    snapshot: Vec<EventRecord>,
    stale: Option<String>,
}

impl RaceContext {
    /// Context for a validated configuration.
    pub fn new(config: RaceConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config: Some(config),
            ..Self::default()
        })
    }

    /// Context with no configuration; only log-level operations are allowed.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    /// Active configuration, or [`ConfigurationError::Missing`].
    pub fn config(&self) -> Result<&RaceConfig, ConfigurationError> {
        self.config.as_ref().ok_or(ConfigurationError::Missing)
    }

    /// Installs a configuration. Refused while the snapshot still holds a
    /// race run under a different configuration.
    pub fn configure(&mut self, config: RaceConfig) -> Result<(), ConfigurationError> {
        config.validate()?;
        let differs = self.config.as_ref().is_some_and(|current| *current != config);
        if differs && !self.snapshot.is_empty() {
            return Err(ConfigurationError::RaceInProgress);
        }
        self.config = Some(config);
        Ok(())
    }

    /// Reloads the snapshot. On failure the old snapshot is kept and marked stale.
    pub fn refresh<S: EventStorage + ?Sized>(&mut self, storage: &S) -> Result<usize, StorageError> {
        match storage.read_all() {
            Ok(events) => {
                self.snapshot = events;
                self.stale = None;
                Ok(self.snapshot.len())
            }
            Err(err) => {
                tracing::warn!(error = %err, kept = self.snapshot.len(), "log reload failed, keeping stale snapshot");
                self.stale = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Events from the last successful reload.
    pub fn snapshot(&self) -> &[EventRecord] {
        &self.snapshot
    }

    /// Reason the snapshot is stale, if the last reload failed.
    pub fn stale(&self) -> Option<&str> {
        self.stale.as_deref()
    }

    /// True before any event has been recorded.
    pub fn awaiting_start(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Figures for the current snapshot.
    pub fn recompute(&self, now: TimeOfDay) -> Recomputation {
        recompute(&self.snapshot, now)
    }

    /// Annotated log, team statuses and staleness at `now`.
    pub fn view(&self, now: TimeOfDay) -> RaceView {
        let recomputed = self.recompute(now);
        let statuses = match &self.config {
            Some(config) => team_statuses(&recomputed, config, now),
            None => Vec::new(),
        };
        RaceView {
            recomputed,
            statuses,
            stale: self.stale.clone(),
        }
    }

    /// [`RaceContext::view`] at the clock's current time.
    pub fn view_with(&self, clock: &dyn Clock) -> RaceView {
        self.view(clock.now())
    }

    /// Records one `Start` per roster team atomically, then reloads.
    pub fn start_race<S: EventStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        at: TimeOfDay,
    ) -> Result<Vec<EventRecord>, ContextError> {
        let teams = self.config()?.roster_pairs();
        let started = storage.start_race(&teams, at)?;
        self.refresh(storage)?;
        Ok(started)
    }

    /// Records a roster team reaching `location` at `at`.
    ///
    /// The section label is the team's current leg, so an arrival right after
    /// a `Relay` is filed under the following section.
    pub fn record_arrival<S: EventStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        team_id: &str,
        location: Location,
        at: TimeOfDay,
    ) -> Result<EventRecord, ContextError> {
        let team = self
            .config()?
            .team(team_id)
            .ok_or_else(|| ConfigurationError::UnknownTeam(team_id.to_string()))?
            .clone();

        let section = self
            .recompute(at)
            .current_section(team_id)
            .unwrap_or(Section::FIRST);
        let draft = EventDraft::at(team.team_id, team.team_name, section, location, at);
        let record = storage.append(draft)?;
        self.refresh(storage)?;
        Ok(record)
    }

    /// Administrative removal of the newest event, then reload.
    pub fn undo_last<S: EventStorage + ?Sized>(&mut self, storage: &mut S) -> Result<EventRecord, StorageError> {
        let removed = storage.undo_last()?;
        self.refresh(storage)?;
        Ok(removed)
    }

    /// Wipes the log, then reload.
    pub fn reset<S: EventStorage + ?Sized>(&mut self, storage: &mut S) -> Result<(), StorageError> {
        storage.clear()?;
        self.refresh(storage)?;
        Ok(())
    }
}
