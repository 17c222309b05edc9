//! Shared primitive IDs and checkpoint enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unparseable or missing field text at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Timestamp is not `HH:MM:SS[.f]`.
    #[error("malformed time of day: {0:?}")]
    Time(String),
    /// Section label is not a positive leg number.
    #[error("malformed section label: {0:?}")]
    Section(String),
    /// Location label is not a known checkpoint.
    #[error("malformed location label: {0:?}")]
    Location(String),
    /// Mandatory field is empty.
    #[error("missing field: {0}")]
    Missing(&'static str),
}

/// Monotonic insertion sequence assigned by the log.
pub type EventSeq = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Opaque, stable team identifier.
pub type TeamId = String;

/// One leg of the relay, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Section(u32);

impl Section {
    /// First leg.
    pub const FIRST: Section = Section(1);

    /// Builds a section, rejecting zero.
    pub fn new(n: u32) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    /// Leg number.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Following leg.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}区", self.0)
    }
}

impl FromStr for Section {
    type Err = ParseError;

    /// Accepts `"3区"`, `"3"` and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim();
        let body = body.strip_suffix('区').unwrap_or(body).trim();
        body.parse::<u32>()
            .ok()
            .and_then(Section::new)
            .ok_or_else(|| ParseError::Section(s.to_string()))
    }
}

/// Checkpoint where an arrival was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Race start of the first leg.
    Start,
    /// Intermediate distance marker, 1-based.
    Point(u32),
    /// Hand-off ending the current leg.
    Relay,
    /// Race finish.
    Finish,
}

impl Location {
    /// True for checkpoints that open a new leg.
    pub fn opens_leg(self) -> bool {
        matches!(self, Location::Start | Location::Relay)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Start => f.write_str("Start"),
            Location::Relay => f.write_str("Relay"),
            Location::Finish => f.write_str("Finish"),
            Location::Point(n) => write!(f, "{n}km"),
        }
    }
}

impl FromStr for Location {
    type Err = ParseError;

    /// Accepts `Start`, `Relay`, `Finish`, `Point(n)` and `<n>km`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim();
        let bad = || ParseError::Location(s.to_string());

        if body.eq_ignore_ascii_case("start") {
            return Ok(Location::Start);
        }
        if body.eq_ignore_ascii_case("relay") {
            return Ok(Location::Relay);
        }
        if body.eq_ignore_ascii_case("finish") {
            return Ok(Location::Finish);
        }

        let index = if let Some(inner) = body
            .strip_prefix("Point(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            inner.trim()
        } else if let Some(km) = body.strip_suffix("km") {
            km.trim()
        } else {
            return Err(bad());
        };

        match index.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Location::Point(n)),
            _ => Err(bad()),
        }
    }
}
