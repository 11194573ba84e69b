//! Lane orchestration
//!
//! The dispatcher validates the run shape, partitions targets, and spawns one
//! task per lane plus the optional sweep. Lanes park on a barrier and a
//! `Hold` control value until the supervisor releases them.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Barrier, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use super::fanout::FanOut;
use super::lane::{Lane, LaneControl, LaneReport, Schedule};
use super::partition::{self, LaneTarget};
use super::sweep::Sweep;
use crate::config::{BridgeConfig, ConfigError, RunConfig};
use crate::effect::PayloadSource;
use crate::stats::Aggregator;
use crate::transport::Transport;

/// A validated run shape
#[derive(Debug)]
pub struct Plan {
    pub lanes: Vec<Vec<LaneTarget>>,
    pub lane_cap: usize,
    pub global_cap: usize,
}

impl Plan {
    /// Check the run shape and partition targets round-robin
    pub fn admit(
        bridges: &[Arc<BridgeConfig>],
        lanes: Option<usize>,
        lane_cap: usize,
        global_cap: usize,
    ) -> Result<Self, ConfigError> {
        let targets = partition::targets(bridges);
        let lanes = lanes.unwrap_or_else(|| {
            bridges.iter().filter(|b| !b.lights.is_empty()).count()
        });

        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if lanes == 0 {
            return Err(ConfigError::NoLanes);
        }
        if lanes > targets.len() {
            return Err(ConfigError::TooManyLanes {
                lanes,
                targets: targets.len(),
            });
        }
        let requested = lane_cap * lanes;
        if requested > global_cap {
            return Err(ConfigError::ConnectionCeiling {
                cap: global_cap,
                requested,
                per_lane: lane_cap,
                lanes,
            });
        }

        Ok(Self {
            lanes: partition::round_robin(targets, lanes),
            lane_cap,
            global_cap,
        })
    }

    pub fn largest_lane(&self) -> usize {
        self.lanes.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// How long a stopping lane may take: waves of `lane_cap` requests,
    /// each bounded by `deadline`, plus one spare deadline
    pub fn join_grace(&self, deadline: Duration) -> Duration {
        let waves = self.largest_lane().div_ceil(self.lane_cap.max(1));
        let waves = u32::try_from(waves).unwrap_or(u32::MAX);
        deadline.saturating_mul(waves.saturating_add(1))
    }
}

/// First-round offset of lane `id`
fn spread(step: Duration, id: usize) -> Duration {
    step.saturating_mul(u32::try_from(id).unwrap_or(u32::MAX))
}

/// Spawned lanes and the handles the supervisor drives them with
pub struct Running {
    pub lanes: JoinSet<LaneReport>,
    pub control: watch::Sender<LaneControl>,
    /// Sized lanes + 1; the supervisor is the last to arrive
    pub ready: Arc<Barrier>,
    pub sweep: Option<JoinHandle<u64>>,
    /// Upper bound on how long a stopping lane may take to finish its round
    pub join_grace: Duration,
}

pub struct Dispatcher {
    plan: Plan,
    bridges: Vec<Arc<BridgeConfig>>,
    transport: Arc<dyn Transport>,
    source: Arc<dyn PayloadSource>,
    aggregator: Arc<Aggregator>,
    run: RunConfig,
}

impl Dispatcher {
    /// Validate the run; fails before anything touches the network
    pub fn new(
        run: RunConfig,
        bridges: Vec<BridgeConfig>,
        transport: Arc<dyn Transport>,
        source: Arc<dyn PayloadSource>,
        aggregator: Arc<Aggregator>,
    ) -> Result<Self, ConfigError> {
        let bridges: Vec<Arc<BridgeConfig>> = bridges.into_iter().map(Arc::new).collect();
        let plan = Plan::admit(&bridges, run.lanes, run.lane_connections, run.global_connections)?;

        Ok(Self {
            plan,
            bridges,
            transport,
            source,
            aggregator,
            run,
        })
    }

    /// Spawn every lane (and the sweep) in the `Hold` state
    pub fn start(self) -> Running {
        let lane_count = self.plan.lanes.len();
        let (control, control_rx) = watch::channel(LaneControl::Hold);
        let ready = Arc::new(Barrier::new(lane_count + 1));
        let global = Arc::new(Semaphore::new(self.plan.global_cap));

        info!(
            lanes = lane_count,
            lane_cap = self.plan.lane_cap,
            global_cap = self.plan.global_cap,
            transport = self.transport.name(),
            "Starting lanes"
        );

        let join_grace = self.plan.join_grace(self.run.request_timeout);
        let mut lanes = JoinSet::new();
        for (id, targets) in self.plan.lanes.into_iter().enumerate() {
            debug!(lane = id, lights = targets.len(), "Lane assigned");
            let fanout = FanOut::new(
                self.transport.clone(),
                global.clone(),
                self.plan.lane_cap,
                self.run.request_timeout,
            )
            .with_control(control_rx.clone());

            let lane = Lane::new(
                id,
                targets,
                fanout,
                self.source.clone(),
                self.run.transition,
                self.run.retry,
                self.aggregator.clone(),
            );
            let schedule = Schedule {
                iterations: self.run.iterations,
                start_delay: spread(self.run.spread_sleep, id),
                between: self.run.between_sleep,
            };
            lanes.spawn(lane.run(schedule, control_rx.clone(), ready.clone()));
        }

        let sweep = self.run.use_sweep.then(|| {
            let sweep = Sweep::new(
                self.transport.clone(),
                global.clone(),
                self.bridges.clone(),
                self.run.hue.min,
                self.run.hue.max,
                self.run.sweep_length,
                self.run.request_timeout,
            );
            let mut rx = control_rx.clone();
            tokio::spawn(async move {
                // Start alongside the lanes
                while *rx.borrow_and_update() == LaneControl::Hold {
                    if rx.changed().await.is_err() {
                        return 0;
                    }
                }
                sweep.run(rx).await
            })
        });

        Running {
            lanes,
            control,
            ready,
            sweep,
            join_grace,
        }
    }
}
