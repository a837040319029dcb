//! Engine and application configuration
//!
//! [`EngineConfig`] is the plain-data input to `Engine::create`. It is
//! immutable once the engine is running. [`AppConfig`] wraps it with the
//! host-side settings used by the `receiver` binary and is persisted as TOML.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::audio::channel::ChannelSelector;
use crate::constants::*;
use crate::error::{ConfigError, Error, Result};

/// Playout operating mode. Selects the latency policy used to size the
/// jitter buffer and the output burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Smallest stable burst, no headroom beyond the requested latency
    #[default]
    LowLatency,
    /// Device default burst with one burst of headroom
    Balanced,
    /// Larger bursts, fewer wakeups, more latency
    PowerSaving,
}

impl LatencyMode {
    pub const ALL: [LatencyMode; 3] = [
        LatencyMode::LowLatency,
        LatencyMode::Balanced,
        LatencyMode::PowerSaving,
    ];

    /// Numeric form used in `udp://` URIs (0, 1, 2)
    pub fn index(self) -> u8 {
        match self {
            LatencyMode::LowLatency => 0,
            LatencyMode::Balanced => 1,
            LatencyMode::PowerSaving => 2,
        }
    }

    pub fn from_index(index: u64) -> std::result::Result<Self, ConfigError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| ConfigError::InvalidLatencyMode(index.to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LatencyMode::LowLatency => "low_latency",
            LatencyMode::Balanced => "balanced",
            LatencyMode::PowerSaving => "power_saving",
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LatencyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low_latency" | "lowlatency" | "low" => Ok(LatencyMode::LowLatency),
            "balanced" | "none" => Ok(LatencyMode::Balanced),
            "power_saving" | "powersaving" | "power" => Ok(LatencyMode::PowerSaving),
            other => match other.parse::<u64>() {
                Ok(index) => Self::from_index(index),
                Err(_) => Err(ConfigError::InvalidLatencyMode(s.to_string())),
            },
        }
    }
}

/// Transport endpoint. `host` may be a unicast address to listen on, or a
/// multicast group to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_MULTICAST_GROUP, DEFAULT_UDP_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Engine configuration supplied by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address and port to receive on
    pub endpoint: Endpoint,
    /// Maximum RTP payload size in bytes
    pub mtu: usize,
    /// Latency/power trade-off
    pub latency_mode: LatencyMode,
    /// Requested maximum buffering latency in milliseconds
    pub max_latency_ms: u32,
    /// Interleaved channels carried by each packet
    pub num_channels: u16,
    /// Input channels routed to the output, bit i = input channel i.
    /// Zero passes every channel through.
    pub channel_mask: u32,
    /// Skip or repeat single frames to track sender clock drift
    pub drift_correction: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            mtu: DEFAULT_MTU,
            latency_mode: LatencyMode::default(),
            max_latency_ms: DEFAULT_MAX_LATENCY_MS,
            num_channels: DEFAULT_CHANNELS,
            channel_mask: 0,
            drift_correction: true,
        }
    }
}

impl EngineConfig {
    /// Check every field. Device-dependent checks (output channel count)
    /// happen in `Engine::create` once device parameters are known.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::InvalidEndpoint("empty host".to_string()));
        }
        if self.mtu == 0 {
            return Err(ConfigError::ZeroMtu);
        }
        if self.mtu > MAX_MTU {
            return Err(ConfigError::MtuTooLarge {
                mtu: self.mtu,
                max: MAX_MTU,
            });
        }
        if self.max_latency_ms == 0 {
            return Err(ConfigError::ZeroLatency);
        }
        if self.max_latency_ms > MAX_LATENCY_MS {
            return Err(ConfigError::LatencyTooLarge {
                ms: self.max_latency_ms,
                max: MAX_LATENCY_MS,
            });
        }
        if self.num_channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.mtu < self.frame_bytes() {
            return Err(ConfigError::MtuTooSmall {
                mtu: self.mtu,
                channels: self.num_channels,
            });
        }
        ChannelSelector::new(self.num_channels, self.channel_mask)?;
        Ok(())
    }

    /// Bytes in one interleaved input frame
    pub fn frame_bytes(&self) -> usize {
        self.num_channels as usize * SAMPLE_SIZE
    }

    /// Largest number of frames a single valid packet can carry
    pub fn max_frames_per_packet(&self) -> usize {
        self.mtu / self.frame_bytes().max(1)
    }

    /// Parse the `udp://host:port/?latency=0&mtu=320&...` form.
    ///
    /// Missing query parameters keep their default values; unknown ones are
    /// ignored.
    pub fn from_uri(uri: &str) -> std::result::Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::InvalidUri(format!("{}: {}", msg, uri));

        let rest = uri
            .strip_prefix("udp://")
            .ok_or_else(|| invalid("expected udp:// scheme"))?;
        let (authority, query) = match rest.find(|c| c == '/' || c == '?') {
            Some(pos) => {
                let query = rest[pos..].split_once('?').map(|(_, q)| q).unwrap_or("");
                (&rest[..pos], query)
            }
            None => (rest, ""),
        };

        let mut config = Self::default();
        let (host, port) = split_authority(authority).ok_or_else(|| invalid("bad authority"))?;
        if !host.is_empty() {
            config.endpoint.host = host.to_string();
        }
        if let Some(port) = port {
            config.endpoint.port = port;
        }

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let number = || {
                value
                    .parse::<u64>()
                    .map_err(|_| invalid(&format!("bad value for {}", key)))
            };
            match key {
                URI_KEY_LATENCY => config.latency_mode = value.parse()?,
                URI_KEY_MTU => config.mtu = number()? as usize,
                URI_KEY_MAX_LATENCY => {
                    config.max_latency_ms = u32::try_from(number()?)
                        .map_err(|_| invalid("max_latency out of range"))?
                }
                URI_KEY_NUM_CHANNEL => {
                    config.num_channels = u16::try_from(number()?)
                        .map_err(|_| invalid("num_channel out of range"))?
                }
                URI_KEY_MASK_CHANNEL => {
                    config.channel_mask = u32::try_from(number()?)
                        .map_err(|_| invalid("mask_channel out of range"))?
                }
                URI_KEY_DRIFT => config.drift_correction = number()? != 0,
                _ => {}
            }
        }

        Ok(config)
    }

    /// Inverse of [`EngineConfig::from_uri`]
    pub fn to_uri(&self) -> String {
        format!(
            "udp://{}/?{}={}&{}={}&{}={}&{}={}&{}={}&{}={}",
            self.endpoint,
            URI_KEY_LATENCY,
            self.latency_mode.index(),
            URI_KEY_MTU,
            self.mtu,
            URI_KEY_MAX_LATENCY,
            self.max_latency_ms,
            URI_KEY_NUM_CHANNEL,
            self.num_channels,
            URI_KEY_MASK_CHANNEL,
            self.channel_mask,
            URI_KEY_DRIFT,
            u8::from(self.drift_correction),
        )
    }
}

const URI_KEY_LATENCY: &str = "latency";
const URI_KEY_MTU: &str = "mtu";
const URI_KEY_MAX_LATENCY: &str = "max_latency";
const URI_KEY_NUM_CHANNEL: &str = "num_channel";
const URI_KEY_MASK_CHANNEL: &str = "mask_channel";
const URI_KEY_DRIFT: &str = "drift";

/// Split `host:port`, `[v6]:port`, `host` or `[v6]`
fn split_authority(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if tail.is_empty() => Some((host, None)),
            None => None,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host, Some(port.parse().ok()?))),
        Some(_) => Some((authority, None)),
        None => Some((authority, None)),
    }
}

/// Output device settings for the `receiver` binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device name, `None` for the system default
    pub device: Option<String>,
    /// Override the device's nominal sample rate
    pub sample_rate: Option<u32>,
    /// Override the device's nominal burst size in frames
    pub frames_per_burst: Option<u32>,
}

/// Telemetry polling settings for the `receiver` binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    /// Emit one JSON object per poll instead of a log line
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub output: OutputConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/rtp-audio-sink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults when no file
    /// exists
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(ConfigError::Parse(e.to_string())))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(ConfigError::Parse(e.to_string())))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}
