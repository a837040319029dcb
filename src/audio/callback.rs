//! Audio pull callback
//!
//! Invoked by the output device once per burst. Drains packets from the
//! jitter buffer, splitting them across bursts as needed, and pads with
//! silence whenever the network has not delivered enough audio.
//!
//! Everything here runs on the device's real-time thread: no allocation,
//! no locks, no logging, no blocking.

use cpal::{FromSample, Sample};
use std::sync::Arc;

use crate::audio::buffer::{PacketFrame, RingConsumer};
use crate::audio::latency::LatencyPlan;
use crate::telemetry::EngineTelemetry;

/// Whether the callback is waiting for the buffer to refill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutState {
    /// Emitting silence until occupancy reaches the pre-fill threshold
    Priming,
    /// Draining the buffer
    Playing,
}

/// Clock drift correction applied to the next burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    Nominal,
    /// Buffer running low: repeat one frame
    Starved,
    /// Buffer running high: drop one frame
    Flooded,
}

/// Consumer side of the engine, handed to the output backend
pub struct PullCallback {
    consumer: RingConsumer,
    /// Packet currently being played
    current: PacketFrame,
    /// Sample index of the next frame in `current`
    offset: usize,
    channels: usize,
    plan: LatencyPlan,
    drift_correction: bool,
    state: PlayoutState,
    drift: DriftState,
    telemetry: Arc<EngineTelemetry>,
}

impl PullCallback {
    /// `max_packet_frames` sizes the scratch packet so dequeues never
    /// allocate.
    pub fn new(
        consumer: RingConsumer,
        channels: u16,
        max_packet_frames: usize,
        plan: LatencyPlan,
        drift_correction: bool,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            consumer,
            current: PacketFrame::with_capacity(channels, max_packet_frames),
            offset: 0,
            channels: channels.max(1) as usize,
            plan,
            drift_correction,
            state: PlayoutState::Priming,
            drift: DriftState::Nominal,
            telemetry,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    pub fn state(&self) -> PlayoutState {
        self.state
    }

    pub fn drift(&self) -> DriftState {
        self.drift
    }

    pub fn plan(&self) -> &LatencyPlan {
        &self.plan
    }

    /// Fill one output burst of interleaved samples.
    ///
    /// Always writes every element of `out`. A trailing partial frame is
    /// zeroed.
    pub fn fill<T>(&mut self, out: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        let ch = self.channels;
        let frames = out.len() / ch;
        self.telemetry.record_burst(frames);

        let (body, remainder) = out.split_at_mut(frames * ch);
        remainder.fill(T::EQUILIBRIUM);
        if frames == 0 {
            return;
        }

        let occupancy = self.consumer.occupancy();
        if self.state == PlayoutState::Priming {
            if occupancy < self.plan.prefill {
                body.fill(T::EQUILIBRIUM);
                self.telemetry.record_underrun();
                return;
            }
            self.state = PlayoutState::Playing;
            self.drift = DriftState::Nominal;
        }

        let adjustment = if self.drift_correction {
            self.update_drift(occupancy)
        } else {
            DriftState::Nominal
        };
        let mut skip = adjustment == DriftState::Flooded;
        let mut repeat = adjustment == DriftState::Starved;

        let mut written = 0;
        while written < frames {
            if !self.ensure_frame() {
                break;
            }
            if skip {
                skip = false;
                self.offset += ch;
                self.telemetry.record_skip();
                continue;
            }

            let src = &self.current.samples[self.offset..self.offset + ch];
            let dst = &mut body[written * ch..(written + 1) * ch];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = T::from_sample(s);
            }

            if repeat {
                repeat = false;
                self.telemetry.record_repeat();
            } else {
                self.offset += ch;
            }
            written += 1;
        }

        if written < frames {
            body[written * ch..].fill(T::EQUILIBRIUM);
            self.telemetry.record_underrun();
            self.state = PlayoutState::Priming;
        }
    }

    /// Make sure `current[offset..offset + channels]` is a whole frame,
    /// pulling packets from the ring as needed. False on underrun.
    fn ensure_frame(&mut self) -> bool {
        while self.offset + self.channels > self.current.samples.len() {
            self.offset = 0;
            if !self.consumer.try_dequeue(&mut self.current) {
                self.current.samples.clear();
                return false;
            }
        }
        true
    }

    fn update_drift(&mut self, occupancy: usize) -> DriftState {
        let plan = &self.plan;
        self.drift = match self.drift {
            DriftState::Flooded if occupancy > plan.flood_exit() => DriftState::Flooded,
            DriftState::Starved if occupancy < plan.starve_exit() => DriftState::Starved,
            _ if occupancy > plan.flood_enter() => DriftState::Flooded,
            _ if occupancy < plan.starve_enter() => DriftState::Starved,
            _ => DriftState::Nominal,
        };
        self.drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{JitterRingBuffer, RingProducer};
    use crate::config::LatencyMode;

    fn plan(capacity: usize, prefill: usize) -> LatencyPlan {
        LatencyPlan {
            mode: LatencyMode::LowLatency,
            burst_frames: 4,
            packet_frames: 4,
            capacity,
            prefill,
        }
    }

    fn setup(
        capacity: usize,
        prefill: usize,
        drift: bool,
    ) -> (RingProducer, PullCallback, Arc<EngineTelemetry>) {
        let telemetry = Arc::new(EngineTelemetry::new());
        let (producer, consumer) = JitterRingBuffer::new(capacity, 8).split();
        let callback = PullCallback::new(
            consumer,
            2,
            4,
            plan(capacity, prefill),
            drift,
            telemetry.clone(),
        );
        (producer, callback, telemetry)
    }

    /// Stereo packet of `frames` frames; left = base + i, right = -(base + i)
    fn packet(base: i16, frames: usize, seq: u64) -> PacketFrame {
        let samples = (0..frames as i16)
            .flat_map(|i| [base + i, -(base + i)])
            .collect();
        PacketFrame::new(samples, 2, 0, seq)
    }

    #[test]
    fn test_empty_buffer_yields_silence_and_underrun() {
        let (_producer, mut callback, telemetry) = setup(4, 1, false);
        let mut out = [1i16; 8];

        assert_eq!(telemetry.underruns(), 0);
        callback.fill(&mut out);

        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(telemetry.underruns(), 1);
        assert_eq!(callback.state(), PlayoutState::Priming);
    }

    #[test]
    fn test_plays_packets_across_bursts() {
        let (mut producer, mut callback, telemetry) = setup(4, 1, false);
        producer.try_enqueue(packet(10, 3, 0));
        producer.try_enqueue(packet(20, 3, 1));

        let mut out = [0i16; 8];
        callback.fill(&mut out);
        assert_eq!(out, [10, -10, 11, -11, 12, -12, 20, -20]);
        assert_eq!(callback.state(), PlayoutState::Playing);

        let mut out = [0i16; 4];
        callback.fill(&mut out);
        assert_eq!(out, [21, -21, 22, -22]);
        assert_eq!(telemetry.underruns(), 0);
    }

    #[test]
    fn test_underrun_pads_rest_of_burst() {
        let (mut producer, mut callback, telemetry) = setup(4, 1, false);
        producer.try_enqueue(packet(5, 2, 0));

        let mut out = [9i16; 8];
        callback.fill(&mut out);
        assert_eq!(out, [5, -5, 6, -6, 0, 0, 0, 0]);
        assert_eq!(telemetry.underruns(), 1);
        assert_eq!(callback.state(), PlayoutState::Priming);
    }

    #[test]
    fn test_priming_waits_for_prefill() {
        let (mut producer, mut callback, telemetry) = setup(8, 2, false);
        producer.try_enqueue(packet(1, 2, 0));

        let mut out = [7i16; 4];
        callback.fill(&mut out);
        assert_eq!(out, [0; 4]);
        assert_eq!(telemetry.underruns(), 1);
        // Buffer untouched while priming
        assert_eq!(producer.occupancy(), 1);
        assert_eq!(producer.stats().head_move_requests, 0);

        producer.try_enqueue(packet(3, 2, 1));
        callback.fill(&mut out);
        assert_eq!(out, [1, -1, 2, -2]);
        assert_eq!(callback.state(), PlayoutState::Playing);
    }

    #[test]
    fn test_converts_to_float() {
        let (mut producer, mut callback, _telemetry) = setup(4, 1, false);
        producer.try_enqueue(PacketFrame::new(vec![i16::MAX, i16::MIN], 2, 0, 0));

        let mut out = [1.0f32; 4];
        callback.fill(&mut out);
        assert!((out[0] - 1.0).abs() < 1e-3);
        assert!((out[1] + 1.0).abs() < 1e-3);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn test_partial_trailing_frame_zeroed() {
        let (mut producer, mut callback, telemetry) = setup(4, 1, false);
        producer.try_enqueue(packet(1, 4, 0));

        let mut out = [5i16; 5];
        callback.fill(&mut out);
        assert_eq!(out, [1, -1, 2, -2, 0]);
        assert_eq!(telemetry.underruns(), 0);
    }

    #[test]
    fn test_flooded_buffer_skips_one_frame() {
        // capacity 8: flood above 4, stay flooded above 2
        let (mut producer, mut callback, telemetry) = setup(8, 1, true);
        for seq in 0..6 {
            producer.try_enqueue(packet(seq as i16 * 10, 2, seq));
        }

        let mut out = [0i16; 4];
        callback.fill(&mut out);
        assert_eq!(callback.drift(), DriftState::Flooded);
        // First frame (0) dropped
        assert_eq!(out, [1, -1, 10, -10]);

        let snap = telemetry.snapshot(&producer, None);
        assert_eq!(snap.frames_skipped, 1);
    }

    #[test]
    fn test_starved_buffer_repeats_one_frame() {
        // capacity 32: starve below 2, stay starved below 4
        let (mut producer, mut callback, telemetry) = setup(32, 1, true);
        producer.try_enqueue(packet(1, 4, 0));

        let mut out = [0i16; 6];
        callback.fill(&mut out);
        assert_eq!(callback.drift(), DriftState::Starved);
        assert_eq!(out, [1, -1, 1, -1, 2, -2]);

        let snap = telemetry.snapshot(&producer, None);
        assert_eq!(snap.frames_repeated, 1);
    }

    #[test]
    fn test_drift_hysteresis() {
        let (mut producer, mut callback, _telemetry) = setup(8, 1, true);
        for seq in 0..5 {
            producer.try_enqueue(packet(0, 1, seq));
        }
        let mut out = [0i16; 2];

        // 5 > 4: flooded; consumes two packets (skip + play)
        callback.fill(&mut out);
        assert_eq!(callback.drift(), DriftState::Flooded);
        assert_eq!(producer.occupancy(), 3);

        // 3 > 2: still flooded
        callback.fill(&mut out);
        assert_eq!(callback.drift(), DriftState::Flooded);
        assert_eq!(producer.occupancy(), 1);

        // 1: back to nominal
        callback.fill(&mut out);
        assert_eq!(callback.drift(), DriftState::Nominal);
    }

    #[test]
    fn test_records_burst_size() {
        let (producer, mut callback, telemetry) = setup(4, 1, false);
        let mut out = [0i16; 384];
        callback.fill(&mut out);
        assert_eq!(telemetry.snapshot(&producer, None).output_buffer_size, 192);
    }
}
