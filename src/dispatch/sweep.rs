//! Broadcast hue sweep on its own timer
//!
//! Alternates group 0 of every bridge between the configured hue bounds. The
//! sweep never retries and is not counted in the aggregate, but its requests
//! hold a slot of the global connection cap like any lane's.

use futures::future::join_all;
use hue_storm_shared::{Command, CommandError, StatePayload};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lane::{stop_requested, LaneControl};
use crate::config::BridgeConfig;
use crate::transport::{Outcome, Transport};

/// Shortest interval between broadcasts
const MIN_PERIOD: Duration = Duration::from_millis(50);

/// The broadcast group covering every light on a bridge
const ALL_LIGHTS_GROUP: u32 = 0;

pub struct Sweep {
    transport: Arc<dyn Transport>,
    global: Arc<Semaphore>,
    bridges: Vec<Arc<BridgeConfig>>,
    min_hue: u32,
    max_hue: u32,
    /// Seconds; both the transition and the timer period
    length: f64,
    deadline: Duration,
}

impl Sweep {
    pub fn new(
        transport: Arc<dyn Transport>,
        global: Arc<Semaphore>,
        bridges: Vec<Arc<BridgeConfig>>,
        min_hue: u32,
        max_hue: u32,
        length: f64,
        deadline: Duration,
    ) -> Self {
        Self {
            transport,
            global,
            bridges,
            min_hue,
            max_hue,
            length,
            deadline,
        }
    }

    fn command(&self, hue: u32) -> Result<Command, CommandError> {
        let mut payload = StatePayload::new();
        payload.insert("hue".into(), Value::from(hue));
        Command::group_update(ALL_LIGHTS_GROUP, payload, Some(self.length))
    }

    async fn send(&self, bridge: &BridgeConfig, command: &Command) -> Outcome {
        let _permit = match self.global.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Outcome::ConnectionError {
                    cause: "connection pool closed".into(),
                }
            }
        };
        self.transport.send(bridge, command, self.deadline).await.outcome
    }

    /// Broadcast until `Stop`; returns the number of broadcasts sent
    pub async fn run(self, mut control: watch::Receiver<LaneControl>) -> u64 {
        let period = Duration::try_from_secs_f64(self.length)
            .unwrap_or(Duration::MAX)
            .max(MIN_PERIOD);
        let mut hue = self.max_hue;
        let mut sent = 0u64;

        loop {
            let started = Instant::now();
            hue = if hue == self.max_hue {
                self.min_hue
            } else {
                self.max_hue
            };

            match self.command(hue) {
                Ok(command) => {
                    let command = &command;
                    let sends = self.bridges.iter().map(|bridge| self.send(bridge, command));
                    for (bridge, outcome) in self.bridges.iter().zip(join_all(sends).await) {
                        if !outcome.is_success() {
                            debug!(bridge = %bridge.name, %outcome, "Sweep failed");
                        }
                    }
                    sent += 1;
                }
                Err(e) => {
                    warn!("Sweep disabled: {}", e);
                    return sent;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(period.saturating_sub(started.elapsed())) => {}
                _ = stop_requested(&mut control) => return sent,
            }
        }
    }
}
