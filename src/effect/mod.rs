//! Payload generators
//!
//! This module handles:
//! - Parsing waveform names from configuration
//! - Seeded Perlin noise and sine channels
//! - Building hue/sat/bri payloads per target

pub mod generator;
pub mod waveform;

pub use generator::{ChannelConfig, ColorGenerator};
pub use waveform::{UnknownWaveform, Waveform};

use hue_storm_shared::StatePayload;

/// Source of per-target state payloads
pub trait PayloadSource: Send + Sync {
    /// Payload for the target at the given global index
    fn payload(&self, index: usize) -> StatePayload;
}
