//! Waveforms for a single color channel

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown waveform `{0}`, expected perlin, wave or none")]
pub struct UnknownWaveform(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// 2D gradient noise over (target index, scaled time)
    Perlin,
    /// Sine over scaled time, identical for every target
    Wave,
    /// Channel is left out of the payload
    None,
}

impl FromStr for Waveform {
    type Err = UnknownWaveform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "perlin" => Ok(Waveform::Perlin),
            "wave" => Ok(Waveform::Wave),
            "none" | "" => Ok(Waveform::None),
            _ => Err(UnknownWaveform(s.to_string())),
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Waveform::Perlin => "perlin",
            Waveform::Wave => "wave",
            Waveform::None => "none",
        };
        f.write_str(name)
    }
}

/// Improved Perlin noise with a seeded permutation table
#[derive(Debug, Clone)]
pub struct PerlinNoise {
    perm: [u8; 512],
}

impl PerlinNoise {
    pub fn new(seed: u64) -> Self {
        let mut table: Vec<u8> = (0..=255).collect();
        table.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut perm = [0u8; 512];
        for (i, slot) in perm.iter_mut().enumerate() {
            *slot = table[i & 255];
        }
        Self { perm }
    }

    /// Noise value in roughly [-1, 1]
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let xi = (x.floor() as i64 & 255) as usize;
        let yi = (y.floor() as i64 & 255) as usize;
        let xf = x - x.floor();
        let yf = y - y.floor();

        let u = fade(xf);
        let v = fade(yf);

        let p = &self.perm;
        let aa = p[p[xi] as usize + yi];
        let ab = p[p[xi] as usize + yi + 1];
        let ba = p[p[xi + 1] as usize + yi];
        let bb = p[p[xi + 1] as usize + yi + 1];

        let x1 = lerp(u, grad(aa, xf, yf), grad(ba, xf - 1.0, yf));
        let x2 = lerp(u, grad(ab, xf, yf - 1.0), grad(bb, xf - 1.0, yf - 1.0));
        lerp(v, x1, x2)
    }
}

fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(t: f64, a: f64, b: f64) -> f64 {
    a + t * (b - a)
}

fn grad(hash: u8, x: f64, y: f64) -> f64 {
    match hash & 7 {
        0 => x + y,
        1 => -x + y,
        2 => x - y,
        3 => -x - y,
        4 => x,
        5 => -x,
        6 => y,
        _ => -y,
    }
}

/// Scale a value in [-1, 1] onto [min, max], truncating like an integer cast
pub fn scale(value: f64, min: u32, max: u32) -> u32 {
    let span = (max - min) as f64;
    let scaled = ((value.clamp(-1.0, 1.0) + 1.0) * 0.5 * span) + min as f64;
    (scaled as u32).clamp(min, max)
}
