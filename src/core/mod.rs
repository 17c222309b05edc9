//! In-memory authoritative event log and index helpers.

/// Helper index aliases.
pub mod indices;
/// Authoritative append-only event log.
pub mod store;
