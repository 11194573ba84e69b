use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use super::waveform::{scale, PerlinNoise, Waveform};
use super::PayloadSource;
use hue_storm_shared::StatePayload;

/// One color channel: how it moves and where it may go
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pub waveform: Waveform,
    /// Multiplier applied to elapsed seconds
    pub timescale: f64,
    pub min: u32,
    pub max: u32,
}

impl ChannelConfig {
    pub fn new(waveform: Waveform, timescale: f64, min: u32, max: u32) -> Self {
        Self {
            waveform,
            timescale,
            min,
            max,
        }
    }
}

/// Produces hue/sat/bri payloads from per-channel waveforms
///
/// Values are a pure function of seed, target index and time since `basis`.
#[derive(Debug, Clone)]
pub struct ColorGenerator {
    channels: [(&'static str, ChannelConfig); 3],
    noise: PerlinNoise,
    basis: Instant,
}

impl ColorGenerator {
    pub fn new(hue: ChannelConfig, sat: ChannelConfig, bri: ChannelConfig, seed: u64) -> Self {
        Self {
            channels: [("hue", hue), ("sat", sat), ("bri", bri)],
            noise: PerlinNoise::new(seed),
            basis: Instant::now(),
        }
    }

    /// Payload for a target `elapsed` after the generator was created
    pub fn payload_at(&self, index: usize, elapsed: Duration) -> StatePayload {
        let seconds = elapsed.as_secs_f64();
        let mut payload = StatePayload::new();

        for (field, channel) in &self.channels {
            let t = seconds * channel.timescale;
            let raw = match channel.waveform {
                Waveform::Perlin => self.noise.sample(index as f64, t),
                Waveform::Wave => t.sin(),
                Waveform::None => continue,
            };
            payload.insert(
                (*field).to_string(),
                Value::from(scale(raw, channel.min, channel.max)),
            );
        }

        payload
    }
}

impl PayloadSource for ColorGenerator {
    fn payload(&self, index: usize) -> StatePayload {
        self.payload_at(index, self.basis.elapsed())
    }
}
