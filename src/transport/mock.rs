//! Scripted transport for dispatch tests

use async_trait::async_trait;
use hue_storm_shared::{Command, Target};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::transport::traits::{Delivery, Outcome, PhaseTimings, Transport};

pub fn success() -> Outcome {
    Outcome::Success {
        status: 200,
        body: "[{\"success\":{}}]".into(),
    }
}

/// Replies per target from a script, falling back to a fixed outcome
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<Target, VecDeque<Outcome>>>,
    fallback: Outcome,
    latency: Duration,
    timings: PhaseTimings,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    sent: Mutex<Vec<(String, Command)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: success(),
            latency: Duration::ZERO,
            timings: PhaseTimings::default(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, outcome: Outcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Simulated time each request spends in flight
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Phase timings reported with every delivery
    pub fn with_timings(mut self, timings: PhaseTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn script(self, target: Target, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(target, outcomes.into_iter().collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent sends observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, Command)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, bridge: &BridgeConfig, command: &Command, deadline: Duration) -> Delivery {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((bridge.name.clone(), command.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&command.target())
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        let wait = if outcome == Outcome::HardTimeout {
            deadline
        } else {
            self.latency.min(deadline)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Delivery::new(outcome, self.timings.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
