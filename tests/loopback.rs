//! End-to-end: real UDP datagrams into an engine pulled by hand

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use rtp_audio_sink::audio::latency::DeviceParams;
use rtp_audio_sink::audio::playback::{ManualOutput, ManualPull};
use rtp_audio_sink::config::{Endpoint, EngineConfig};
use rtp_audio_sink::engine::{Engine, EngineState};
use rtp_audio_sink::protocol::{encode_l16, RtpHeader, DEFAULT_PAYLOAD_TYPE};
use rtp_audio_sink::telemetry::Telemetry;

const FRAMES: usize = 80;

fn datagram(seq: u16, samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::new();
    RtpHeader::new(DEFAULT_PAYLOAD_TYPE, seq, seq as u32 * FRAMES as u32, 0x1234).write(&mut out);
    encode_l16(samples, &mut out);
    out
}

/// Interleaved ramp; sample `i` of packet `seq` is unique across the test
fn ramp(seq: u16, channels: usize) -> Vec<i16> {
    (0..FRAMES * channels)
        .map(|i| (seq as i32 * 1000 + i as i32) as i16)
        .collect()
}

fn start(config: EngineConfig, device_channels: u16) -> (Engine, ManualPull) {
    let mut engine = Engine::new();
    engine
        .set_device_params(DeviceParams::new(48000, FRAMES as u32, device_channels))
        .unwrap();
    let output = ManualOutput::new();
    let pull = output.handle();
    engine.create(config, Box::new(output)).unwrap();
    (engine, pull)
}

fn local_config(num_channels: u16, channel_mask: u32) -> EngineConfig {
    EngineConfig {
        endpoint: Endpoint::new("127.0.0.1", 0),
        num_channels,
        channel_mask,
        drift_correction: false,
        ..Default::default()
    }
}

fn wait_for(engine: &Engine, done: impl Fn(&Telemetry) -> bool) -> Telemetry {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = engine.telemetry();
        if done(&snapshot) || Instant::now() > deadline {
            return snapshot;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_packets_play_in_order() {
    let (engine, pull) = start(local_config(2, 0), 2);
    let target = engine.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    for seq in 0..10u16 {
        sender.send_to(&datagram(seq, &ramp(seq, 2)), target).unwrap();
    }
    let snapshot = wait_for(&engine, |t| t.packets_received == 10);
    assert_eq!(snapshot.packets_received, 10);
    assert_eq!(snapshot.buffer_occupancy, 10);
    assert_eq!(snapshot.packets_lost, 0);

    let mut burst = vec![0i16; FRAMES * 2];
    for seq in 0..10u16 {
        assert!(pull.pull(&mut burst));
        assert_eq!(burst, ramp(seq, 2), "burst {}", seq);
    }

    let snapshot = engine.telemetry();
    assert_eq!(snapshot.underruns, 0);
    assert_eq!(snapshot.buffer_occupancy, 0);
    assert_eq!(snapshot.head_moves, 10);
    assert_eq!(snapshot.output_buffer_size, FRAMES as u32);

    pull.pull(&mut burst);
    assert!(burst.iter().all(|&s| s == 0));
    assert_eq!(engine.telemetry().underruns, 1);
}

#[test]
fn test_channel_mask_over_the_wire() {
    let (engine, pull) = start(local_config(4, 0b1001), 2);
    let target = engine.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    // Enough to pass the pre-fill threshold
    let prefill = engine.plan().unwrap().prefill;
    for seq in 0..prefill as u16 {
        sender.send_to(&datagram(seq, &ramp(seq, 4)), target).unwrap();
    }
    wait_for(&engine, |t| t.packets_received == prefill as u64);

    let mut burst = vec![0i16; FRAMES * 2];
    assert!(pull.pull(&mut burst));

    let input = ramp(0, 4);
    let expected: Vec<i16> = input.chunks(4).flat_map(|f| [f[0], f[3]]).collect();
    assert_eq!(burst, expected);
}

#[test]
fn test_malformed_datagrams_counted() {
    let (engine, _pull) = start(local_config(2, 0), 2);
    let target = engine.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    // Odd byte count: half a sample
    let mut odd = datagram(0, &[1, 2]);
    odd.push(0);
    sender.send_to(&odd, target).unwrap();
    // Not RTP at all
    sender.send_to(b"hello", target).unwrap();
    // Payload larger than the MTU
    sender.send_to(&datagram(1, &[0; 400]), target).unwrap();
    // Valid
    sender.send_to(&datagram(2, &ramp(2, 2)), target).unwrap();

    let snapshot = wait_for(&engine, |t| t.packets_invalid == 3 && t.packets_received == 1);
    assert_eq!(snapshot.packets_invalid, 3);
    assert_eq!(snapshot.packets_received, 1);
    assert_eq!(snapshot.buffer_occupancy, 1);
}

#[test]
fn test_sequence_gaps_reported() {
    let (engine, _pull) = start(local_config(2, 0), 2);
    let target = engine.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    for seq in [0u16, 1, 4, 5] {
        sender.send_to(&datagram(seq, &ramp(seq, 2)), target).unwrap();
    }
    let snapshot = wait_for(&engine, |t| t.packets_received == 4);
    assert_eq!(snapshot.packets_lost, 2);
    assert_eq!(snapshot.buffer_occupancy, 4);
}

#[test]
fn test_destroy_stops_receiving() {
    let (mut engine, pull) = start(local_config(2, 0), 2);
    let target = engine.local_addr().unwrap();

    let started = Instant::now();
    engine.destroy();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.state(), EngineState::Destroyed);
    assert!(!pull.is_active());

    // The port is free again
    UdpSocket::bind(target).unwrap();
}
