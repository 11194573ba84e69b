//! Transport trait abstraction for bridge command delivery

use async_trait::async_trait;
use hue_storm_shared::Command;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::BridgeConfig;

/// Classified result of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 200 with a clean body
    Success { status: u16, body: String },
    /// Reachable, but the bridge rejected the command in the body (rate limit etc.)
    SoftFailure { reason: String },
    /// No complete response before the deadline
    HardTimeout,
    /// Connection refused/reset, DNS failure
    ConnectionError { cause: String },
    /// Non-200 status, or a status line we could not parse
    Rejected { status: Option<u16>, reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Whether this outcome may be resubmitted under a retry policy
    pub fn is_retryable(&self, retry_soft_failures: bool) -> bool {
        match self {
            Outcome::Success { .. } => false,
            Outcome::SoftFailure { .. } => retry_soft_failures,
            Outcome::HardTimeout | Outcome::ConnectionError { .. } | Outcome::Rejected { .. } => {
                true
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { status, .. } => write!(f, "success ({})", status),
            Outcome::SoftFailure { reason } => write!(f, "soft failure: {}", reason),
            Outcome::HardTimeout => write!(f, "hard timeout"),
            Outcome::ConnectionError { cause } => write!(f, "connection error: {}", cause),
            Outcome::Rejected {
                status: Some(status),
                reason,
            } => write!(f, "rejected ({}): {}", status, reason),
            Outcome::Rejected { status: None, reason } => write!(f, "rejected: {}", reason),
        }
    }
}

/// Phase timings for one request, measured from the start of the call
///
/// Advisory only; phases that were never reached stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTimings {
    pub allocated: Option<Duration>,
    pub connected: Option<Duration>,
    pub sent: Option<Duration>,
    pub first_byte: Option<Duration>,
    pub received: Option<Duration>,
    pub parsed: Option<Duration>,
}

/// Records phase timings as a request progresses
#[derive(Debug)]
pub struct Stopwatch {
    started: Instant,
    timings: PhaseTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Allocated,
    Connected,
    Sent,
    FirstByte,
    Received,
    Parsed,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            timings: PhaseTimings::default(),
        }
    }

    pub fn record(&mut self, phase: Phase) {
        let elapsed = Some(self.started.elapsed());
        let slot = match phase {
            Phase::Allocated => &mut self.timings.allocated,
            Phase::Connected => &mut self.timings.connected,
            Phase::Sent => &mut self.timings.sent,
            Phase::FirstByte => &mut self.timings.first_byte,
            Phase::Received => &mut self.timings.received,
            Phase::Parsed => &mut self.timings.parsed,
        };
        *slot = elapsed;
    }

    pub fn first_byte_pending(&self) -> bool {
        self.timings.first_byte.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(self) -> PhaseTimings {
        self.timings
    }
}

/// An outcome plus the timings observed while producing it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub outcome: Outcome,
    pub timings: PhaseTimings,
}

impl Delivery {
    pub fn new(outcome: Outcome, timings: PhaseTimings) -> Self {
        Self { outcome, timings }
    }
}

/// Delivers commands to bridges
///
/// Implementations enforce `deadline` themselves and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one command and classify the response
    async fn send(&self, bridge: &BridgeConfig, command: &Command, deadline: Duration) -> Delivery;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(!Outcome::Success { status: 200, body: String::new() }.is_retryable(true));
        assert!(Outcome::HardTimeout.is_retryable(false));
        assert!(Outcome::ConnectionError { cause: "refused".into() }.is_retryable(false));

        let soft = Outcome::SoftFailure { reason: "rate limit".into() };
        assert!(soft.is_retryable(true));
        assert!(!soft.is_retryable(false));
    }

    #[test]
    fn test_stopwatch_records_phases() {
        let mut watch = Stopwatch::start();
        watch.record(Phase::Allocated);
        watch.record(Phase::Connected);
        let timings = watch.finish();
        assert!(timings.allocated.is_some());
        assert!(timings.connected.is_some());
        assert!(timings.first_byte.is_none());
    }
}
