//! Ekiden relay live timing: an append-only checkpoint log with SQLite
//! journaling and a pure engine that derives laps, splits and ranks.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::EventLog`]:
//! ```
//! use ekidenlog::{
//!     clock::TimeOfDay,
//!     core::store::EventLog,
//!     engine::timing::recompute,
//!     event::EventDraft,
//!     types::{Location, Section},
//! };
//!
//! let t = |h, m, s| TimeOfDay::from_hms_milli(h, m, s, 0).expect("time");
//! let mut log = EventLog::new();
//! log.append(EventDraft::at("T1", "Team One", Section::FIRST, Location::Start, t(8, 0, 0)))
//!     .expect("start");
//! log.append(EventDraft::at("T1", "Team One", Section::FIRST, Location::Point(1), t(8, 3, 5)))
//!     .expect("point");
//!
//! let out = recompute(log.events(), t(8, 10, 0));
//! assert_eq!(out.events[1].to_row().point_lap, "03:05.0");
//! assert_eq!(out.events[1].to_row().split, "0:03:05");
//! ```
//!
//! Runtime usage with SQLite sink:
//! ```no_run
//! use ekidenlog::{
//!     clock::TimeOfDay,
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::{spawn_event_log, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteOpSink::open("ekiden.db").expect("open sqlite");
//! let log = sink.load_log().expect("replay");
//! let handle = spawn_event_log(log, Some(Box::new(sink)), RuntimeConfig::default());
//! let start = TimeOfDay::from_hms_milli(8, 0, 0, 0).expect("time");
//! handle
//!     .start_race(vec![("T1".to_string(), "Team One".to_string())], start)
//!     .await
//!     .expect("start");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Time-of-day values, durations and clocks.
pub mod clock;
/// Race configuration and validation.
pub mod config;
/// Explicit race context passed to every operation.
pub mod context;
/// Core in-memory log and index helpers.
pub mod core;
/// Timing, status and anomaly engine.
pub mod engine;
/// Event row, record and annotated forms.
pub mod event;
/// Journal op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
