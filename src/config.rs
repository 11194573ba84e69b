//! Run configuration
//!
//! Bridges and light assignments come from a TOML file; timing, concurrency
//! and effect parameters come from the environment.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::RetryPolicy;
use crate::effect::{ChannelConfig, UnknownWaveform, Waveform};
use hue_storm_shared::limits;

/// Fatal, startup-time configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid address for bridge {bridge}: {reason}")]
    InvalidAddress { bridge: String, reason: String },

    #[error("Light {light} refers to unknown bridge {bridge}")]
    UnknownBridge { bridge: String, light: u32 },

    #[error("Light {light} is assigned more than once on bridge {bridge}")]
    DuplicateLight { bridge: String, light: u32 },

    #[error(transparent)]
    Waveform(#[from] UnknownWaveform),

    #[error("{name} range is empty: min {min} > max {max}")]
    EmptyRange { name: &'static str, min: u32, max: u32 },

    #[error("At least one of HUE_FUNC, SAT_FUNC, BRI_FUNC must be set")]
    NoChannels,

    #[error("No lights configured")]
    NoTargets,

    #[error("Need at least one lane")]
    NoLanes,

    #[error("Must have at least one light for every lane: {lanes} lanes for {targets} lights")]
    TooManyLanes { lanes: usize, targets: usize },

    #[error(
        "No more than {cap} connections are allowed at once! You asked for {requested} \
         ({per_lane} per lane x {lanes} lanes)"
    )]
    ConnectionCeiling {
        cap: usize,
        requested: usize,
        per_lane: usize,
        lanes: usize,
    },
}

/// Static, per-bridge settings
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub username: String,
    /// Hue used when marking lights for identification
    pub debug_hue: Option<u32>,
    /// Light ids on this bridge assigned to the run
    pub lights: Vec<u32>,
}

/// Which light list of the config file to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightGroup {
    Main,
    Dance,
    Accent,
}

impl LightGroup {
    pub const ALL: [LightGroup; 3] = [LightGroup::Main, LightGroup::Dance, LightGroup::Accent];

    pub fn name(&self) -> &'static str {
        match self {
            LightGroup::Main => "main_lights",
            LightGroup::Dance => "dance_lights",
            LightGroup::Accent => "accent_lights",
        }
    }
}

/// TOML file structure
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Prefix for report lines
    #[serde(default = "default_name")]
    pub name: String,
    pub bridges: BTreeMap<String, BridgeEntry>,
    #[serde(default)]
    pub main_lights: Vec<(String, u32)>,
    #[serde(default)]
    pub dance_lights: Vec<(String, u32)>,
    #[serde(default)]
    pub accent_lights: Vec<(String, u32)>,
}

fn default_name() -> String {
    "hue-storm".to_string()
}

fn default_port() -> u16 {
    limits::DEFAULT_PORT
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeEntry {
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub debug_hue: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    fn lights(&self, group: LightGroup) -> &[(String, u32)] {
        match group {
            LightGroup::Main => &self.main_lights,
            LightGroup::Dance => &self.dance_lights,
            LightGroup::Accent => &self.accent_lights,
        }
    }

    /// Every bridge, each carrying its share of the given light list
    pub fn bridges(&self, group: LightGroup) -> Result<Vec<BridgeConfig>, ConfigError> {
        let mut bridges = BTreeMap::new();
        for (name, entry) in &self.bridges {
            validate_address(name, entry)?;
            bridges.insert(
                name.clone(),
                BridgeConfig {
                    name: name.clone(),
                    ip: entry.ip.clone(),
                    port: entry.port,
                    username: entry.username.clone(),
                    debug_hue: entry.debug_hue,
                    lights: Vec::new(),
                },
            );
        }

        for (bridge_name, light) in self.lights(group) {
            let bridge = bridges
                .get_mut(bridge_name)
                .ok_or_else(|| ConfigError::UnknownBridge {
                    bridge: bridge_name.clone(),
                    light: *light,
                })?;
            if bridge.lights.contains(light) {
                return Err(ConfigError::DuplicateLight {
                    bridge: bridge_name.clone(),
                    light: *light,
                });
            }
            bridge.lights.push(*light);
        }

        Ok(bridges.into_values().collect())
    }
}

fn validate_address(name: &str, entry: &BridgeEntry) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        bridge: name.to_string(),
        reason: reason.to_string(),
    };

    if entry.ip.trim().is_empty() {
        return Err(invalid("ip is empty"));
    }
    if entry.ip.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
        return Err(invalid("ip must be a bare host or address"));
    }
    if entry.port == 0 {
        return Err(invalid("port must be non-zero"));
    }
    if entry.username.is_empty() || entry.username.contains(['/', ' ']) {
        return Err(invalid("username must be a single path segment"));
    }
    Ok(())
}

/// Environment-driven run settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Lane count; defaults to one lane per bridge with lights
    pub lanes: Option<usize>,
    /// In-flight requests per lane
    pub lane_connections: usize,
    /// In-flight requests across all lanes
    pub global_connections: usize,
    /// Rounds per lane; `None` runs until stopped
    pub iterations: Option<u64>,
    pub spread_sleep: Duration,
    pub between_sleep: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub verbose: bool,
    /// Accepted for compatibility; there is no collector to pause
    pub skip_gc: bool,
    pub use_sweep: bool,
    /// Seconds
    pub transition: f64,
    /// Seconds
    pub sweep_length: f64,
    pub hue: ChannelConfig,
    pub sat: ChannelConfig,
    pub bri: ChannelConfig,
    pub seed: u64,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lanes: None,
            lane_connections: limits::DEFAULT_LANE_CONNECTIONS,
            global_connections: limits::BRIDGE_MAX_CONNECTIONS,
            iterations: None,
            spread_sleep: Duration::ZERO,
            between_sleep: Duration::ZERO,
            request_timeout: Duration::from_secs_f64(limits::REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs_f64(limits::CONNECT_TIMEOUT_SECS),
            verbose: false,
            skip_gc: false,
            use_sweep: true,
            transition: 0.4,
            sweep_length: 2.0,
            hue: ChannelConfig::new(Waveform::None, 0.2, 48_000, 51_000),
            sat: ChannelConfig::new(Waveform::None, 1.0, 212, 254),
            bri: ChannelConfig::new(Waveform::Perlin, 2.0, 63, 191),
            seed: 0,
            retry: RetryPolicy::disabled(),
        }
    }
}

impl RunConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let seed = match env.parse::<u64>("SEED")? {
            Some(seed) => seed,
            // Large seeds are pointless for a 256-entry permutation table
            None => hue_storm_shared::now_ms() / 1000 % 1000,
        };

        let config = Self {
            lanes: env.parse("LANES")?,
            lane_connections: env.parse("MAX_CONNECTS")?.unwrap_or(defaults.lane_connections),
            global_connections: env
                .parse("GLOBAL_CONNECTS")?
                .unwrap_or(defaults.global_connections),
            iterations: env.parse("ITERATIONS")?.filter(|n: &u64| *n > 0),
            spread_sleep: env.seconds("SPREAD_SLEEP")?.unwrap_or(defaults.spread_sleep),
            between_sleep: env.seconds("BETWEEN_SLEEP")?.unwrap_or(defaults.between_sleep),
            request_timeout: env.seconds("TIMEOUT")?.unwrap_or(defaults.request_timeout),
            connect_timeout: env
                .seconds("CONNECT_TIMEOUT")?
                .unwrap_or(defaults.connect_timeout),
            verbose: env.flag("VERBOSE")?.unwrap_or(defaults.verbose),
            skip_gc: env.flag("SKIP_GC")?.unwrap_or(defaults.skip_gc),
            use_sweep: env.flag("USE_SWEEP")?.unwrap_or(defaults.use_sweep),
            transition: env.non_negative("TRANSITION")?.unwrap_or(defaults.transition),
            sweep_length: env.non_negative("SWEEP_LENGTH")?.unwrap_or(defaults.sweep_length),
            hue: env.channel("HUE", "H", defaults.hue)?,
            sat: env.channel("SAT", "S", defaults.sat)?,
            bri: env.channel("BRI", "B", defaults.bri)?,
            seed,
            retry: RetryPolicy {
                max_retries: match env.get("MAX_RETRIES").as_deref() {
                    None => defaults.retry.max_retries,
                    Some("unbounded") => None,
                    Some(value) => Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                        name: "MAX_RETRIES",
                        value: value.to_string(),
                    })?),
                },
                base_delay: env.seconds("RETRY_BASE")?.unwrap_or(defaults.retry.base_delay),
                retry_soft_failures: env
                    .flag("RETRY_SOFT_FAILURES")?
                    .unwrap_or(defaults.retry.retry_soft_failures),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lane_connections == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONNECTS",
                value: "0".into(),
            });
        }
        if self.global_connections == 0 {
            return Err(ConfigError::InvalidValue {
                name: "GLOBAL_CONNECTS",
                value: "0".into(),
            });
        }
        if self.lanes == Some(0) {
            return Err(ConfigError::NoLanes);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "TIMEOUT",
                value: "0".into(),
            });
        }

        for (name, channel) in [("HUE", &self.hue), ("SAT", &self.sat), ("BRI", &self.bri)] {
            if channel.min > channel.max {
                return Err(ConfigError::EmptyRange {
                    name,
                    min: channel.min,
                    max: channel.max,
                });
            }
        }
        if [&self.hue, &self.sat, &self.bri]
            .iter()
            .all(|c| c.waveform == Waveform::None)
        {
            return Err(ConfigError::NoChannels);
        }
        Ok(())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { name, value }),
        }
    }

    fn non_negative(&self, name: &'static str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(name)? {
            Some(v) if !v.is_finite() || v < 0.0 => Err(ConfigError::InvalidValue {
                name,
                value: v.to_string(),
            }),
            other => Ok(other),
        }
    }

    fn seconds(&self, name: &'static str) -> Result<Option<Duration>, ConfigError> {
        self.non_negative(name)?
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
                    name,
                    value: secs.to_string(),
                })
            })
            .transpose()
    }

    /// Integer flags: any non-zero value is true
    fn flag(&self, name: &'static str) -> Result<Option<bool>, ConfigError> {
        Ok(self.parse::<i64>(name)?.map(|v| v != 0))
    }

    /// `<NAME>_FUNC`, `MIN_<NAME>`, `MAX_<NAME>`, `TIMESCALE_<suffix>`
    fn channel(
        &self,
        name: &'static str,
        suffix: &'static str,
        defaults: ChannelConfig,
    ) -> Result<ChannelConfig, ConfigError> {
        let waveform = match self.get(&format!("{}_FUNC", name)) {
            Some(tag) => tag.parse()?,
            None => defaults.waveform,
        };

        let number = |var: String, label: &'static str| -> Result<Option<u32>, ConfigError> {
            match self.get(&var) {
                None => Ok(None),
                Some(value) => value
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { name: label, value }),
            }
        };

        let min = number(format!("MIN_{}", name), name)?.unwrap_or(defaults.min);
        let max = number(format!("MAX_{}", name), name)?.unwrap_or(defaults.max);

        let timescale = match self.get(&format!("TIMESCALE_{}", suffix)) {
            None => defaults.timescale,
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "TIMESCALE",
                value,
            })?,
        };

        Ok(ChannelConfig::new(waveform, timescale, min, max))
    }
}
