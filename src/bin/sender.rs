//! Test Tone Sender
//!
//! Streams a sine tone per channel as RTP L16 to a receiver, paced at the
//! nominal sample rate. Useful for demos and loopback checks.
//!
//! Usage: `sender [ADDR] [CHANNELS]`, defaulting to the multicast group and
//! stereo.

use anyhow::{Context, Result};
use bytes::BytesMut;
use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_audio_sink::{
    constants::*,
    protocol::{encode_l16, RtpHeader, DEFAULT_PAYLOAD_TYPE, RTP_HEADER_LEN},
};

/// Base tone; channel `n` plays `(n + 1)` times this
const BASE_FREQUENCY: f32 = 440.0;

/// Peak amplitude relative to full scale
const AMPLITUDE: f32 = 0.25;

/// Interleaved sine generator
struct ToneGenerator {
    phases: Vec<f32>,
    steps: Vec<f32>,
}

impl ToneGenerator {
    fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            phases: vec![0.0; channels as usize],
            steps: (0..channels)
                .map(|ch| TAU * BASE_FREQUENCY * (ch + 1) as f32 / sample_rate as f32)
                .collect(),
        }
    }

    fn fill(&mut self, frames: usize, out: &mut Vec<i16>) {
        out.clear();
        for _ in 0..frames {
            for (phase, step) in self.phases.iter_mut().zip(&self.steps) {
                out.push((phase.sin() * AMPLITUDE * i16::MAX as f32) as i16);
                *phase = (*phase + step) % TAU;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RTP test tone sender");

    let mut args = std::env::args().skip(1);
    let target: SocketAddr = args
        .next()
        .unwrap_or_else(|| format!("{}:{}", DEFAULT_MULTICAST_GROUP, DEFAULT_UDP_PORT))
        .parse()
        .context("invalid target address")?;
    let channels: u16 = match args.next() {
        Some(arg) => arg.parse().context("invalid channel count")?,
        None => DEFAULT_CHANNELS,
    };
    anyhow::ensure!(channels > 0, "channel count must be greater than zero");

    let frames_per_packet = DEFAULT_MTU / (SAMPLE_SIZE * channels as usize);
    anyhow::ensure!(frames_per_packet > 0, "too many channels for a {} byte MTU", DEFAULT_MTU);
    let packet_interval =
        Duration::from_secs_f64(frames_per_packet as f64 / DEFAULT_SAMPLE_RATE as f64);

    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = tokio::net::UdpSocket::bind(bind_addr).await?;
    if target.ip().is_multicast() && target.is_ipv4() {
        socket.set_multicast_ttl_v4(1)?;
    }

    tracing::info!(
        "Sending {} channels at {} Hz to {}: {} frames per packet every {:?}",
        channels,
        DEFAULT_SAMPLE_RATE,
        target,
        frames_per_packet,
        packet_interval
    );

    let ssrc = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
        ^ std::process::id();

    let mut generator = ToneGenerator::new(channels, DEFAULT_SAMPLE_RATE);
    let mut samples = Vec::with_capacity(frames_per_packet * channels as usize);
    let mut packet = BytesMut::with_capacity(RTP_HEADER_LEN + DEFAULT_MTU);
    let mut sequence: u16 = 0;
    let mut timestamp: u32 = 0;
    let mut packets_sent: u64 = 0;
    let mut last_stats_time = Instant::now();

    let mut ticker = tokio::time::interval(packet_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("Starting main loop - press Ctrl+C to stop");

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                generator.fill(frames_per_packet, &mut samples);

                packet.clear();
                RtpHeader::new(DEFAULT_PAYLOAD_TYPE, sequence, timestamp, ssrc).write(&mut packet);
                encode_l16(&samples, &mut packet);

                if let Err(e) = socket.send_to(&packet, target).await {
                    tracing::warn!("Failed to send packet: {}", e);
                } else {
                    packets_sent += 1;
                }

                sequence = sequence.wrapping_add(1);
                timestamp = timestamp.wrapping_add(frames_per_packet as u32);
            }
        }

        // Periodic stats logging
        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            tracing::info!("Stats: {} packets sent, sequence {}", packets_sent, sequence);
        }
    }

    tracing::info!("Sent {} packets", packets_sent);
    Ok(())
}
