//! Timing and ranking engine.

/// Business-rule checks over per-team event sequences.
pub mod checks;
/// Per-team state machine, live figures and next-checkpoint proposals.
pub mod status;
/// Recomputation of laps, splits and checkpoint ranks.
pub mod timing;
