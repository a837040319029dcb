//! # RTP Audio Sink
//!
//! Low-latency playback of multi-channel L16 audio streamed over RTP/UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SENDER                                  │
//! │        L16 PCM, big-endian, interleaved ──► RTP ──► UDP (multicast)  │
//! └───────────────────────────────────┬──────────────────────────────────┘
//!                                     │ UDP over LAN
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              ENGINE                                  │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Network Receiver thread (network::receiver)                   │  │
//! │  │  parse RTP ─► validate ─► decode L16 ─► Channel Selector       │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │ RingProducer (tail)               │
//! │                                  ▼                                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Jitter Ring Buffer (audio::buffer)                            │  │
//! │  │  fixed slots, one packet each, sized by the Latency Policy     │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │ RingConsumer (head)               │
//! │                                  ▼                                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Pull Callback (audio::callback)                               │  │
//! │  │  priming ─► playing, silence on underrun, drift correction     │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │ OutputBackend (audio::playback)   │
//! │                                  ▼                                   │
//! │                        cpal output stream                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`engine::Engine`] facade ties the pieces together and exposes
//! [`telemetry::Telemetry`] snapshots to the host.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default multicast group for the audio stream
    pub const DEFAULT_MULTICAST_GROUP: &str = "224.0.0.56";

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 4010;

    /// Default maximum RTP payload size in bytes
    pub const DEFAULT_MTU: usize = 320;

    /// Largest RTP payload that fits a UDP datagram
    pub const MAX_MTU: usize = 65_507 - 12;

    /// Default latency ceiling used to size the jitter buffer
    pub const DEFAULT_MAX_LATENCY_MS: u32 = 300;

    /// Upper bound on the requested latency
    pub const MAX_LATENCY_MS: u32 = 5_000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Bytes per L16 sample
    pub const SAMPLE_SIZE: usize = 2;

    /// Default sample rate for audio output
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Burst size assumed when the device does not report one
    pub const DEFAULT_FRAMES_PER_BURST: u32 = 192;

    /// Socket read timeout; bounds how long stopping the receiver takes
    pub const RECV_TIMEOUT_MS: u64 = 100;

    /// Default interval between telemetry reports
    pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 1000;

    pub const APP_NAME: &str = "rtp-audio-sink";

    pub const CONFIG_FILE_NAME: &str = "config.toml";
}
