//! Latency policy
//!
//! Derives jitter buffer capacity, pre-fill threshold and output burst size
//! from the operating mode, the requested maximum latency, the packet size
//! and the output device's nominal parameters. Runs once at engine creation.
//!
//! One ring slot holds one packet, so capacity is the requested latency in
//! frames divided by the frames a full-MTU packet carries, rounded up.

use serde::{Deserialize, Serialize};

use crate::config::LatencyMode;
use crate::constants::MAX_LATENCY_MS;
use crate::error::ConfigError;

/// Smallest buffer the policy will produce, in slots
pub const MIN_CAPACITY: usize = 2;

/// Largest buffer the policy will produce, in slots
pub const MAX_CAPACITY: usize = 1 << 16;

/// The buffer always holds at least this many output bursts
pub const MIN_BURSTS: u64 = 2;

/// Burst multiplier applied in [`LatencyMode::PowerSaving`]
pub const POWER_SAVING_BURST_FACTOR: u32 = 4;

pub const MAX_SAMPLE_RATE: u32 = 384_000;

pub const MAX_FRAMES_PER_BURST: u32 = 16_384;

/// Nominal output device parameters, supplied by the host before creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub sample_rate: u32,
    pub frames_per_burst: u32,
    /// Channels the output stream is opened with
    pub channels: u16,
}

impl DeviceParams {
    pub fn new(sample_rate: u32, frames_per_burst: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            frames_per_burst,
            channels,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidDeviceParams("sample rate is zero".into()));
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::InvalidDeviceParams(format!(
                "sample rate {} above {}",
                self.sample_rate, MAX_SAMPLE_RATE
            )));
        }
        if self.frames_per_burst == 0 {
            return Err(ConfigError::InvalidDeviceParams("burst size is zero".into()));
        }
        if self.frames_per_burst > MAX_FRAMES_PER_BURST {
            return Err(ConfigError::InvalidDeviceParams(format!(
                "burst size {} above {}",
                self.frames_per_burst, MAX_FRAMES_PER_BURST
            )));
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidDeviceParams("channel count is zero".into()));
        }
        Ok(())
    }
}

/// Sizing derived from a [`LatencyMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyPlan {
    pub mode: LatencyMode,
    /// Frames the output device is asked to request per callback
    pub burst_frames: u32,
    /// Frames in one full-MTU packet, i.e. one slot
    pub packet_frames: usize,
    /// Jitter buffer slots
    pub capacity: usize,
    /// Occupancy required before playout starts or resumes after an underrun
    pub prefill: usize,
}

impl LatencyPlan {
    /// Audio the full buffer holds, in frames
    pub fn buffered_frames(&self) -> usize {
        self.capacity * self.packet_frames
    }

    /// Above this occupancy the callback starts dropping a frame per burst
    pub fn flood_enter(&self) -> usize {
        self.capacity / 2
    }

    /// Stay in flood correction while occupancy is above this
    pub fn flood_exit(&self) -> usize {
        self.capacity / 4
    }

    /// Below this occupancy the callback starts repeating a frame per burst
    pub fn starve_enter(&self) -> usize {
        self.capacity / 16
    }

    /// Stay in starvation correction while occupancy is below this
    pub fn starve_exit(&self) -> usize {
        self.capacity / 8
    }
}

/// Stateless policy, see [`LatencyPolicy::plan`]
pub struct LatencyPolicy;

impl LatencyPolicy {
    /// Output burst for a mode
    pub fn burst_frames(mode: LatencyMode, device: &DeviceParams) -> u32 {
        match mode {
            LatencyMode::LowLatency | LatencyMode::Balanced => device.frames_per_burst,
            LatencyMode::PowerSaving => device
                .frames_per_burst
                .saturating_mul(POWER_SAVING_BURST_FACTOR),
        }
    }

    /// Frames in `max_latency_ms` of audio, rounded up
    pub fn latency_frames(max_latency_ms: u32, sample_rate: u32) -> u64 {
        (max_latency_ms as u64 * sample_rate as u64).div_ceil(1000)
    }

    /// Slots of `packet_frames` needed to hold `frames`, at least
    /// [`MIN_CAPACITY`]
    pub fn slots(frames: u64, packet_frames: usize) -> usize {
        let slots = frames.div_ceil(packet_frames.max(1) as u64);
        usize::try_from(slots).unwrap_or(usize::MAX).max(MIN_CAPACITY)
    }

    /// `packet_frames` is the frame count of a full-MTU packet.
    pub fn plan(
        mode: LatencyMode,
        max_latency_ms: u32,
        packet_frames: usize,
        device: &DeviceParams,
    ) -> Result<LatencyPlan, ConfigError> {
        device.validate()?;
        if max_latency_ms == 0 {
            return Err(ConfigError::ZeroLatency);
        }
        if max_latency_ms > MAX_LATENCY_MS {
            return Err(ConfigError::LatencyTooLarge {
                ms: max_latency_ms,
                max: MAX_LATENCY_MS,
            });
        }
        if packet_frames == 0 {
            return Err(ConfigError::ZeroMtu);
        }

        let burst_frames = Self::burst_frames(mode, device);
        let (headroom, prefill_divisor) = match mode {
            LatencyMode::LowLatency => (0, 32),
            LatencyMode::Balanced => (1, 16),
            LatencyMode::PowerSaving => (1, 8),
        };

        let burst = burst_frames as u64;
        let frames = Self::latency_frames(max_latency_ms, device.sample_rate).max(MIN_BURSTS * burst)
            + headroom * burst;
        let capacity = Self::slots(frames, packet_frames);
        if capacity > MAX_CAPACITY {
            return Err(ConfigError::BufferTooLarge {
                slots: capacity,
                max: MAX_CAPACITY,
            });
        }
        let prefill = (capacity / prefill_divisor).clamp(1, capacity);

        Ok(LatencyPlan {
            mode,
            burst_frames,
            packet_frames,
            capacity,
            prefill,
        })
    }
}
