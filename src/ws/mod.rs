//! Realtime room coordination: membership and fan-out, per-connection
//! sessions, debounced persistence and cross-process relay.

pub mod persistence;
pub mod registry;
pub mod relay;
pub mod session;
