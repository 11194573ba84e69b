//! Light identification pass
//!
//! Sets every configured light to its bridge's debug hue, with saturation
//! and brightness ramping by position so neighbours can be told apart.

use hue_storm_shared::{Command, CommandError, StatePayload};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, FileConfig, LightGroup};
use crate::dispatch::{FanOut, Job, RetryPolicy};
use crate::stats::LaneCounters;

#[derive(Error, Debug)]
pub enum MarkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Per-bridge outcome of one light list
#[derive(Debug, Clone)]
pub struct MarkResult {
    pub group: LightGroup,
    pub bridge: String,
    pub lights: usize,
    pub counters: LaneCounters,
}

/// State for the light at `index` of `count` on one bridge
pub fn light_state(hue: Option<u32>, index: usize, count: usize) -> StatePayload {
    let level = if count == 0 {
        0
    } else {
        (254.0 * (index as f64 / count as f64)).round() as u32
    };

    let mut payload = StatePayload::new();
    payload.insert("on".into(), Value::Bool(true));
    if let Some(hue) = hue {
        payload.insert("hue".into(), Value::from(hue));
    }
    payload.insert("sat".into(), Value::from(level));
    payload.insert("bri".into(), Value::from(level));
    payload
}

/// Mark every light list, one concurrent batch per bridge
pub async fn mark_lights(
    file: &FileConfig,
    fanout: &FanOut,
    policy: &RetryPolicy,
) -> Result<Vec<MarkResult>, MarkError> {
    let mut results = Vec::new();

    for group in LightGroup::ALL {
        for bridge in file.bridges(group)? {
            if bridge.lights.is_empty() {
                continue;
            }
            let bridge = Arc::new(bridge);
            let count = bridge.lights.len();

            let jobs = bridge
                .lights
                .iter()
                .enumerate()
                .map(|(index, &light)| {
                    let state = light_state(bridge.debug_hue, index, count);
                    Command::light_update(light, state, Some(0.0))
                        .map(|command| Job::new(bridge.clone(), command))
                })
                .collect::<Result<Vec<_>, _>>()?;

            debug!(group = group.name(), bridge = %bridge.name, lights = count, "Marking");
            let report = fanout.perform_with_retries(jobs, policy).await;
            info!(
                group = group.name(),
                bridge = %bridge.name,
                successes = report.counters.successes,
                failures = report.counters.failures(),
                "Marked lights"
            );

            results.push(MarkResult {
                group,
                bridge: bridge.name.clone(),
                lights: count,
                counters: report.counters,
            });
        }
    }

    Ok(results)
}
