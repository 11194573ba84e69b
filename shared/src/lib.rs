//! hue-storm Shared Protocol Types
//!
//! This crate provides the command model and wire codec used to talk to
//! lighting bridges, shared by the dispatcher and the bridge simulator.

pub mod codec;
pub mod command;

use std::time::{SystemTime, UNIX_EPOCH};

pub use command::{Action, Command, CommandError, Method, StatePayload, Target};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Limits imposed by bridge hardware and the wire protocol
pub mod limits {
    /// Simultaneous connections a bridge will accept
    pub const BRIDGE_MAX_CONNECTIONS: usize = 6;

    /// Default in-flight requests per lane
    pub const DEFAULT_LANE_CONNECTIONS: usize = 3;

    /// Default bridge HTTP port
    pub const DEFAULT_PORT: u16 = 80;

    /// Per-request deadline in seconds
    pub const REQUEST_TIMEOUT_SECS: f64 = 5.0;

    /// Connect deadline in seconds
    pub const CONNECT_TIMEOUT_SECS: f64 = 5.0;

    /// Marker the bridge puts in a body when it rejects a request
    pub const ERROR_MARKER: &str = "error";

    /// Largest response we are willing to buffer
    pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

    /// Largest request the simulator is willing to buffer
    pub const MAX_REQUEST_SIZE: usize = 16 * 1024;
}

/// Convert a transition in seconds to the bridge's tenths-of-a-second field
pub fn transition_tenths(seconds: f64) -> u64 {
    (seconds * 10.0).round() as u64
}
