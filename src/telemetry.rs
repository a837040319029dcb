//! Engine telemetry
//!
//! Counters are plain atomics shared between the receiver thread, the audio
//! callback and whoever polls [`Telemetry`]. Reads never block either side.
//! All counters start at zero when an engine is created and only grow for
//! the lifetime of that engine.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::audio::buffer::JitterRingBuffer;
use crate::audio::latency::DeviceParams;

/// Live counters written by the receiver and the pull callback
#[derive(Debug, Default)]
pub struct EngineTelemetry {
    packets_received: AtomicU64,
    packets_invalid: AtomicU64,
    packets_lost: AtomicU64,
    packets_reordered: AtomicU64,
    underruns: AtomicU64,
    frames_skipped: AtomicU64,
    frames_repeated: AtomicU64,
    output_buffer_size: AtomicU32,
}

impl EngineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.packets_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u64) {
        self.packets_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reordered(&self) {
        self.packets_reordered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repeat(&self) {
        self.frames_repeated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_burst(&self, frames: usize) {
        self.output_buffer_size.store(frames as u32, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_invalid(&self) -> u64 {
        self.packets_invalid.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Combine the counters with the ring state and device parameters
    pub fn snapshot(&self, ring: &JitterRingBuffer, device: Option<DeviceParams>) -> Telemetry {
        let stats = ring.stats();
        Telemetry {
            sample_rate: device.map(|d| d.sample_rate).unwrap_or(0),
            frames_per_burst: device.map(|d| d.frames_per_burst).unwrap_or(0),
            output_buffer_size: self.output_buffer_size.load(Ordering::Relaxed),
            underruns: self.underruns(),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_repeated: self.frames_repeated.load(Ordering::Relaxed),
            buffer_occupancy: ring.occupancy(),
            buffer_capacity: ring.capacity(),
            packets_received: self.packets_received(),
            packets_invalid: self.packets_invalid(),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            packets_reordered: self.packets_reordered.load(Ordering::Relaxed),
            head_move_requests: stats.head_move_requests,
            head_moves: stats.head_moves,
            tail_move_requests: stats.tail_move_requests,
            tail_moves: stats.tail_moves,
        }
    }
}

/// Plain-data telemetry snapshot handed to the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    /// Nominal output sample rate
    pub sample_rate: u32,
    /// Nominal output burst size in frames
    pub frames_per_burst: u32,
    /// Frames requested by the most recent audio callback
    pub output_buffer_size: u32,
    /// Bursts that were padded with silence
    pub underruns: u64,
    /// Frames dropped by drift correction
    pub frames_skipped: u64,
    /// Frames repeated by drift correction
    pub frames_repeated: u64,
    pub buffer_occupancy: usize,
    pub buffer_capacity: usize,
    /// Valid datagrams, whether or not they fit in the buffer
    pub packets_received: u64,
    /// Malformed or oversized datagrams
    pub packets_invalid: u64,
    /// Sequence gaps
    pub packets_lost: u64,
    /// Late or duplicate arrivals
    pub packets_reordered: u64,
    pub head_move_requests: u64,
    pub head_moves: u64,
    pub tail_move_requests: u64,
    pub tail_moves: u64,
}

impl Telemetry {
    /// Zeroed snapshot that still reports known device parameters
    pub fn idle(device: Option<DeviceParams>) -> Self {
        Self {
            sample_rate: device.map(|d| d.sample_rate).unwrap_or(0),
            frames_per_burst: device.map(|d| d.frames_per_burst).unwrap_or(0),
            ..Default::default()
        }
    }

    /// Packets rejected because the buffer was full
    pub fn overflows(&self) -> u64 {
        self.tail_move_requests.saturating_sub(self.tail_moves)
    }

    pub fn fill_level(&self) -> f32 {
        if self.buffer_capacity == 0 {
            0.0
        } else {
            self.buffer_occupancy as f32 / self.buffer_capacity as f32
        }
    }

    pub fn loss_rate(&self) -> f32 {
        let expected = self.packets_received + self.packets_lost;
        if expected == 0 {
            0.0
        } else {
            self.packets_lost as f32 / expected as f32
        }
    }
}
