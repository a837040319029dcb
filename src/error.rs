//! Error types for the audio sink

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid engine configuration, raised synchronously by `Engine::create`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MTU must be greater than zero")]
    ZeroMtu,

    #[error("MTU of {mtu} bytes cannot hold a single {channels}-channel frame")]
    MtuTooSmall { mtu: usize, channels: u16 },

    #[error("MTU of {mtu} bytes exceeds the {max} byte limit")]
    MtuTooLarge { mtu: usize, max: usize },

    #[error("Maximum latency must be greater than zero")]
    ZeroLatency,

    #[error("Maximum latency of {ms} ms exceeds the {max} ms limit")]
    LatencyTooLarge { ms: u32, max: u32 },

    #[error("Jitter buffer of {slots} slots exceeds the {max} slot limit")]
    BufferTooLarge { slots: usize, max: usize },

    #[error("Channel count must be greater than zero")]
    ZeroChannels,

    #[error("Channel mask {mask:#x} selects channels beyond the {channels} input channels")]
    MaskOutOfRange { mask: u32, channels: u16 },

    #[error("Channel mask selects {selected} channels but the output device expects {expected}")]
    ChannelMismatch { selected: u16, expected: u16 },

    #[error("Invalid latency mode: {0}")]
    InvalidLatencyMode(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Device sample rate and burst size have not been supplied")]
    MissingDeviceParams,

    #[error("Invalid device parameters: {0}")]
    InvalidDeviceParams(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}

/// Transport setup errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Multicast join failed: {0}")]
    JoinFailed(String),

    #[error("Failed to resolve {0}")]
    Resolve(String),

    #[error("Failed to spawn receiver thread: {0}")]
    Spawn(String),
}

/// Malformed datagram. Recovered inside the receiver loop, never surfaced
/// from the engine API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("Datagram too short: {0} bytes")]
    Truncated(usize),

    #[error("Datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("Unsupported RTP version {0}")]
    BadVersion(u8),

    #[error("Invalid padding length {0}")]
    BadPadding(u8),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload of {len} bytes is not a whole number of {frame_bytes} byte frames")]
    PartialFrame { len: usize, frame_bytes: usize },
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output backend already running")]
    AlreadyRunning,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Engine state machine violations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Engine has been destroyed")]
    Destroyed,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
