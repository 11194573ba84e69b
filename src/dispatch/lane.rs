//! Lane worker: owns a fixed set of targets and runs rounds over them

use hue_storm_shared::{Command, CommandError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Barrier};
use tracing::{debug, error, trace};

use super::fanout::{FanOut, Job};
use super::partition::LaneTarget;
use super::retry::RetryPolicy;
use crate::effect::PayloadSource;
use crate::stats::{Aggregator, LaneCounters};

/// Run state broadcast from the supervisor to every lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneControl {
    /// Ready, waiting for release
    Hold,
    Run,
    /// Finish the current round, then exit
    Stop,
}

/// Resolves once `Stop` is published or the sender is gone
pub async fn stop_requested(control: &mut watch::Receiver<LaneControl>) {
    loop {
        if *control.borrow_and_update() == LaneControl::Stop {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

/// Wait for release; true if the lane should start running
async fn released(control: &mut watch::Receiver<LaneControl>) -> bool {
    loop {
        match *control.borrow_and_update() {
            LaneControl::Run => return true,
            LaneControl::Stop => return false,
            LaneControl::Hold => {}
        }
        if control.changed().await.is_err() {
            return false;
        }
    }
}

/// A round that could not be carried out
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaneFault {
    #[error("Lane {lane} could not build a command for light {light}: {source}")]
    Command {
        lane: usize,
        light: u32,
        #[source]
        source: CommandError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundResult {
    Completed(LaneCounters),
    Fault(LaneFault),
}

/// Cadence for one lane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    /// Rounds to run; `None` runs until stopped
    pub iterations: Option<u64>,
    /// Delay before the first round
    pub start_delay: Duration,
    /// Delay between rounds
    pub between: Duration,
}

/// How a lane finished
#[derive(Debug, Clone)]
pub struct LaneReport {
    pub id: usize,
    pub rounds: u64,
    pub counters: LaneCounters,
    pub fault: Option<LaneFault>,
}

pub struct Lane {
    id: usize,
    targets: Vec<LaneTarget>,
    fanout: FanOut,
    source: Arc<dyn PayloadSource>,
    transition: f64,
    policy: RetryPolicy,
    aggregator: Arc<Aggregator>,
}

impl Lane {
    pub fn new(
        id: usize,
        targets: Vec<LaneTarget>,
        fanout: FanOut,
        source: Arc<dyn PayloadSource>,
        transition: f64,
        policy: RetryPolicy,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            id,
            targets,
            fanout,
            source,
            transition,
            policy,
            aggregator,
        }
    }

    fn build_jobs(&self) -> Result<Vec<Job>, LaneFault> {
        self.targets
            .iter()
            .map(|target| {
                let payload = self.source.payload(target.index);
                Command::light_update(target.light, payload, Some(self.transition))
                    .map(|command| Job::new(target.bridge.clone(), command))
                    .map_err(|source| LaneFault::Command {
                        lane: self.id,
                        light: target.light,
                        source,
                    })
            })
            .collect()
    }

    /// Build, send and count one round, then fold it into the aggregate
    pub async fn run_round(&self) -> RoundResult {
        let jobs = match self.build_jobs() {
            Ok(jobs) => jobs,
            Err(fault) => return RoundResult::Fault(fault),
        };

        let report = self.fanout.perform_with_retries(jobs, &self.policy).await;
        for (job, outcome) in &report.failed {
            trace!(
                lane = self.id,
                bridge = %job.bridge.name,
                target = %job.command.target(),
                %outcome,
                "Command failed"
            );
        }

        self.aggregator.merge(report.counters).await;
        RoundResult::Completed(report.counters)
    }

    /// Round loop; returns when the budget is spent, a stop arrives or a
    /// round faults
    pub async fn run(
        self,
        schedule: Schedule,
        mut control: watch::Receiver<LaneControl>,
        ready: Arc<Barrier>,
    ) -> LaneReport {
        let mut report = LaneReport {
            id: self.id,
            rounds: 0,
            counters: LaneCounters::default(),
            fault: None,
        };

        debug!(lane = self.id, targets = self.targets.len(), "Lane ready");
        ready.wait().await;
        if !released(&mut control).await {
            return report;
        }

        if !schedule.start_delay.is_zero() && !pause(schedule.start_delay, &mut control).await {
            return report;
        }

        loop {
            if *control.borrow() == LaneControl::Stop {
                break;
            }

            match self.run_round().await {
                RoundResult::Completed(counters) => {
                    report.rounds += 1;
                    report.counters += counters;
                    trace!(
                        lane = self.id,
                        round = report.rounds,
                        successes = counters.successes,
                        failures = counters.failures(),
                        "Round complete"
                    );
                }
                RoundResult::Fault(fault) => {
                    error!(lane = self.id, "Lane stopped: {}", fault);
                    report.fault = Some(fault);
                    break;
                }
            }

            if schedule.iterations.is_some_and(|n| report.rounds >= n) {
                break;
            }
            if !schedule.between.is_zero() && !pause(schedule.between, &mut control).await {
                break;
            }
        }

        debug!(lane = self.id, rounds = report.rounds, "Lane finished");
        report
    }
}

/// Sleep unless stopped first; true if the full delay elapsed
async fn pause(delay: Duration, control: &mut watch::Receiver<LaneControl>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop_requested(control) => false,
    }
}
