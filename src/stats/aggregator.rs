//! Process-wide outcome totals

use std::ops::AddAssign;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::transport::{Outcome, PhaseTimings};

/// Per-round outcome counts, owned by a single lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounters {
    pub successes: u64,
    pub soft_failures: u64,
    /// Non-200 responses, protocol errors and connection errors
    pub hard_failures: u64,
    pub hard_timeouts: u64,
    /// Resubmissions; not part of the request total
    pub retries: u64,
    /// Attempts that read a full response, and their summed latencies
    pub timed: u64,
    pub first_byte_total: Duration,
    pub response_total: Duration,
}

impl LaneCounters {
    /// Count one final outcome
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.successes += 1,
            Outcome::SoftFailure { .. } => self.soft_failures += 1,
            Outcome::HardTimeout => self.hard_timeouts += 1,
            Outcome::ConnectionError { .. } | Outcome::Rejected { .. } => {
                self.hard_failures += 1
            }
        }
    }

    /// Fold the timings of one attempt, final or not
    pub fn record_timings(&mut self, timings: &PhaseTimings) {
        if let Some(received) = timings.received {
            self.timed += 1;
            self.response_total = self.response_total.saturating_add(received);
            self.first_byte_total = self
                .first_byte_total
                .saturating_add(timings.first_byte.unwrap_or(received));
        }
    }

    /// Mean time to the full response, and to its first byte
    pub fn mean_latency(&self) -> Option<(Duration, Duration)> {
        if self.timed == 0 {
            return None;
        }
        let mean = |total: Duration| {
            let nanos = total.as_nanos() / u128::from(self.timed);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        Some((mean(self.response_total), mean(self.first_byte_total)))
    }

    /// Commands that reached a final outcome
    pub fn requests(&self) -> u64 {
        self.successes + self.soft_failures + self.hard_failures + self.hard_timeouts
    }

    pub fn failures(&self) -> u64 {
        self.soft_failures + self.hard_failures + self.hard_timeouts
    }
}

impl AddAssign for LaneCounters {
    fn add_assign(&mut self, other: Self) {
        self.successes += other.successes;
        self.soft_failures += other.soft_failures;
        self.hard_failures += other.hard_failures;
        self.hard_timeouts += other.hard_timeouts;
        self.retries += other.retries;
        self.timed += other.timed;
        self.first_byte_total = self.first_byte_total.saturating_add(other.first_byte_total);
        self.response_total = self.response_total.saturating_add(other.response_total);
    }
}

/// Point-in-time copy of the aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateStats {
    pub totals: LaneCounters,
    /// Rounds folded in so far, across all lanes
    pub rounds: u64,
    pub started_at: Instant,
}

/// Shared sink for lane counters
#[derive(Debug)]
pub struct Aggregator {
    inner: Mutex<AggregateStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AggregateStats {
                totals: LaneCounters::default(),
                rounds: 0,
                started_at: Instant::now(),
            }),
        }
    }

    /// Fold one round's counters into the totals
    pub async fn merge(&self, counters: LaneCounters) {
        let mut stats = self.inner.lock().await;
        stats.totals += counters;
        stats.rounds += 1;
    }

    pub async fn snapshot(&self) -> AggregateStats {
        *self.inner.lock().await
    }

    /// Reset the start time; called when lanes are released
    pub async fn mark_started(&self) {
        self.inner.lock().await.started_at = Instant::now();
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
