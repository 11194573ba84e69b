//! Bridge transports
//!
//! This module handles:
//! - The `Transport` seam the dispatcher sends through
//! - Outcome classification and phase timings
//! - Plain TCP HTTP/1.0 delivery

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod traits;

pub use http::HttpTransport;
pub use traits::{Delivery, Outcome, PhaseTimings, Transport};
