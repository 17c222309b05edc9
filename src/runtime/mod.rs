//! Single-writer async runtime API.

/// Runtime event stream types.
pub mod events;
/// Runtime handle and command processing loop.
pub mod handle;
