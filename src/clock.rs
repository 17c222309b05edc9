//! Time-of-day values, elapsed durations and the display rounding policy.
//!
//! Stored timestamps carry exactly one fractional digit (truncated). Lap
//! durations are rounded *up* to the next tenth and splits up to the next
//! whole second, so a displayed figure is never faster than the real one.

use std::fmt;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ParseError;

const MS_PER_SEC: u32 = 1_000;
const MS_PER_DAY: u32 = 24 * 60 * 60 * MS_PER_SEC;

/// Wall-clock time of day in the race's fixed offset, millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    /// Midnight.
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    /// Builds from milliseconds since midnight.
    pub fn from_millis(ms: u32) -> Option<Self> {
        (ms < MS_PER_DAY).then_some(Self(ms))
    }

    /// Builds from clock fields.
    pub fn from_hms_milli(h: u32, m: u32, s: u32, ms: u32) -> Option<Self> {
        if h > 23 || m > 59 || s > 59 || ms > 999 {
            return None;
        }
        Some(Self(((h * 60 + m) * 60 + s) * MS_PER_SEC + ms))
    }

    /// Milliseconds since midnight.
    pub fn as_millis(self) -> u32 {
        self.0
    }

    /// Same instant with sub-tenth precision dropped.
    pub fn truncate_to_tenth(self) -> Self {
        Self(self.0 - self.0 % 100)
    }

    /// Elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(self, earlier: TimeOfDay) -> Elapsed {
        Elapsed(u64::from(self.0.saturating_sub(earlier.0)))
    }

    /// Storage form `HH:MM:SS.f` (tenths truncated).
    pub fn to_stored_string(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_secs = self.0 / MS_PER_SEC;
        let tenths = (self.0 % MS_PER_SEC) / 100;
        let (h, rem) = (total_secs / 3600, total_secs % 3600);
        write!(f, "{:02}:{:02}:{:02}.{}", h, rem / 60, rem % 60, tenths)
    }
}

impl FromStr for TimeOfDay {
    type Err = ParseError;

    /// Accepts `H[H]:M[M]:S[S]` with an optional fraction; digits past the
    /// millisecond are dropped. Leap seconds are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseError::Time(s.to_string());
        let t = NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").map_err(|_| bad())?;
        let ms = t.nanosecond() / 1_000_000;
        if ms >= MS_PER_SEC {
            return Err(bad());
        }
        Ok(TimeOfDay(t.num_seconds_from_midnight() * MS_PER_SEC + ms))
    }
}

/// Non-negative duration between two checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Elapsed(u64);

impl Elapsed {
    /// Zero duration.
    pub const ZERO: Elapsed = Elapsed(0);

    /// Builds from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Duration in milliseconds.
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Sum, saturating at the maximum.
    pub fn saturating_add(self, other: Elapsed) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Tenths of a second, rounded up.
    pub fn ceil_tenths(self) -> u64 {
        self.0.div_ceil(100)
    }

    /// Whole seconds, rounded up.
    pub fn ceil_secs(self) -> u64 {
        self.0.div_ceil(u64::from(MS_PER_SEC))
    }

    /// Lap form `MM:SS.f`; minutes keep growing past 59.
    pub fn lap_string(self) -> String {
        let tenths = self.ceil_tenths();
        let secs = tenths / 10;
        format!("{:02}:{:02}.{}", secs / 60, secs % 60, tenths % 10)
    }

    /// Split form `H:MM:SS`.
    pub fn split_string(self) -> String {
        let secs = self.ceil_secs();
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Source of "now" for the engine's fallbacks and live elapsed figures.
pub trait Clock: Send + Sync {
    /// Current time of day in the race's offset.
    fn now(&self) -> TimeOfDay;
}

/// Wall clock pinned to a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Clock in `offset`.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> TimeOfDay {
        let t = Utc::now().with_timezone(&self.offset).time();
        // Leap-second nanos run past 1e9.
        let ms = (t.nanosecond() / 1_000_000).min(999);
        TimeOfDay(t.num_seconds_from_midnight() * MS_PER_SEC + ms)
    }
}

/// Clock that always reports the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub TimeOfDay);

impl Clock for FixedClock {
    fn now(&self) -> TimeOfDay {
        self.0
    }
}
