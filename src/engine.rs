//! Engine lifecycle and telemetry facade
//!
//! An [`Engine`] owns at most one running pipeline: the jitter buffer, the
//! receiver thread and the output backend. It moves through
//! `Uninitialized -> Created -> Destroyed`; `Destroyed` is terminal and a
//! host that wants to play again builds a new engine.

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::{JitterRingBuffer, RingMonitor};
use crate::audio::callback::PullCallback;
use crate::audio::channel::ChannelSelector;
use crate::audio::latency::{DeviceParams, LatencyPlan, LatencyPolicy};
use crate::audio::playback::{OutputBackend, StreamParams};
use crate::config::EngineConfig;
use crate::constants::RECV_TIMEOUT_MS;
use crate::error::{ConfigError, LifecycleError, Result};
use crate::network::receiver::{NetworkReceiver, PacketIngest};
use crate::network::udp::bind_receiver;
use crate::telemetry::{EngineTelemetry, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Created,
    Destroyed,
}

/// Everything that only exists while the engine is `Created`
struct Pipeline {
    device: DeviceParams,
    plan: LatencyPlan,
    monitor: RingMonitor,
    telemetry: Arc<EngineTelemetry>,
    receiver: NetworkReceiver,
    backend: Box<dyn OutputBackend>,
}

impl Pipeline {
    /// Output first so the callback stops touching the buffer before the
    /// producer goes away.
    fn shutdown(mut self) {
        self.backend.stop();
        self.receiver.stop();
        tracing::info!(
            "Engine stopped: {} packets, {} underruns",
            self.telemetry.packets_received(),
            self.telemetry.underruns()
        );
    }
}

pub struct Engine {
    state: EngineState,
    device: Option<DeviceParams>,
    pipeline: Option<Pipeline>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: EngineState::Uninitialized,
            device: None,
            pipeline: None,
        }
    }

    /// Nominal output device parameters, needed before [`Engine::create`].
    /// A running pipeline keeps the parameters it was created with.
    pub fn set_device_params(&mut self, params: DeviceParams) -> Result<()> {
        if self.state == EngineState::Destroyed {
            return Err(LifecycleError::Destroyed.into());
        }
        params.validate()?;
        self.device = Some(params);
        Ok(())
    }

    pub fn device_params(&self) -> Option<DeviceParams> {
        self.device
    }

    /// Build the pipeline and start streaming.
    ///
    /// Does nothing if the engine is already created. On failure every part
    /// already started is torn down again and the engine stays
    /// `Uninitialized`.
    pub fn create(&mut self, config: EngineConfig, mut backend: Box<dyn OutputBackend>) -> Result<()> {
        match self.state {
            EngineState::Created => {
                tracing::debug!("Engine already created, ignoring create");
                return Ok(());
            }
            EngineState::Destroyed => return Err(LifecycleError::Destroyed.into()),
            EngineState::Uninitialized => {}
        }

        config.validate()?;
        let device = self.device.ok_or(ConfigError::MissingDeviceParams)?;
        let max_frames = config.max_frames_per_packet();
        let plan = LatencyPolicy::plan(config.latency_mode, config.max_latency_ms, max_frames, &device)?;
        let selector = ChannelSelector::new(config.num_channels, config.channel_mask)?;
        selector.check_output(device.channels)?;

        let output_channels = selector.output_channels();
        let ring = JitterRingBuffer::new(plan.capacity, max_frames * output_channels as usize);
        let (producer, consumer) = ring.split();
        let monitor = producer.monitor();
        let telemetry = Arc::new(EngineTelemetry::new());

        let socket = bind_receiver(&config.endpoint, Duration::from_millis(RECV_TIMEOUT_MS))?;
        let ingest = PacketIngest::new(producer, selector, config.mtu, telemetry.clone());
        let mut receiver = NetworkReceiver::start(socket, ingest)?;

        let callback = PullCallback::new(
            consumer,
            output_channels,
            max_frames,
            plan,
            config.drift_correction,
            telemetry.clone(),
        );
        let stream = StreamParams {
            sample_rate: device.sample_rate,
            channels: device.channels,
            burst_frames: plan.burst_frames,
        };
        if let Err(e) = backend.start(callback, &stream) {
            receiver.stop();
            return Err(e.into());
        }

        tracing::info!(
            "Engine created on {} ({}): {} slots, pre-fill {}, burst {} frames",
            receiver.local_addr(),
            plan.mode,
            plan.capacity,
            plan.prefill,
            plan.burst_frames
        );

        self.pipeline = Some(Pipeline {
            device,
            plan,
            monitor,
            telemetry,
            receiver,
            backend,
        });
        self.state = EngineState::Created;
        Ok(())
    }

    /// Stop streaming and release the pipeline. Idempotent; the engine
    /// cannot be created again afterwards.
    pub fn destroy(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        self.state = EngineState::Destroyed;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_created(&self) -> bool {
        self.state == EngineState::Created
    }

    /// Live counters, or zeroes unless created
    pub fn telemetry(&self) -> Telemetry {
        match &self.pipeline {
            Some(p) => p.telemetry.snapshot(&p.monitor, Some(p.device)),
            None => Telemetry::idle(self.device),
        }
    }

    /// Address the receiver socket is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.pipeline.as_ref().map(|p| p.receiver.local_addr())
    }

    pub fn plan(&self) -> Option<LatencyPlan> {
        self.pipeline.as_ref().map(|p| p.plan)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::ManualOutput;
    use crate::config::{Endpoint, LatencyMode};
    use crate::error::{AudioError, Error, NetworkError};

    fn local_config() -> EngineConfig {
        EngineConfig {
            endpoint: Endpoint::new("127.0.0.1", 0),
            ..Default::default()
        }
    }

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine
            .set_device_params(DeviceParams::new(48000, 192, 2))
            .unwrap();
        engine
    }

    struct FailingOutput;

    impl OutputBackend for FailingOutput {
        fn start(&mut self, _callback: PullCallback, _stream: &StreamParams) -> std::result::Result<(), AudioError> {
            Err(AudioError::DeviceNotFound("test".to_string()))
        }

        fn stop(&mut self) {}

        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_telemetry_before_create_is_zero() {
        let engine = Engine::new();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.telemetry(), Telemetry::default());
        assert!(engine.local_addr().is_none());
        assert!(engine.plan().is_none());
    }

    #[test]
    fn test_create_requires_device_params() {
        let mut engine = Engine::new();
        let err = engine
            .create(local_config(), Box::new(ManualOutput::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingDeviceParams)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut engine = engine();
        let config = EngineConfig {
            mtu: 0,
            ..local_config()
        };
        let err = engine.create(config, Box::new(ManualOutput::new())).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ZeroMtu)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn test_create_and_destroy() {
        let mut engine = engine();
        let output = ManualOutput::new();
        let pull = output.handle();

        engine.create(local_config(), Box::new(output)).unwrap();
        assert_eq!(engine.state(), EngineState::Created);
        assert!(pull.is_active());

        let stream = pull.stream().unwrap();
        assert_eq!(stream.sample_rate, 48000);
        assert_eq!(stream.channels, 2);
        assert_eq!(stream.burst_frames, 192);

        let addr = engine.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let plan = engine.plan().unwrap();
        assert_eq!(plan.mode, LatencyMode::LowLatency);
        // 300ms at 48kHz in 80-frame packets
        assert_eq!(plan.packet_frames, 80);
        assert_eq!(plan.capacity, 180);
        assert!(plan.buffered_frames() >= 14_400);
        let snap = engine.telemetry();
        assert_eq!(snap.buffer_capacity, plan.capacity);
        assert_eq!(snap.sample_rate, 48000);
        assert_eq!(snap.frames_per_burst, 192);

        engine.destroy();
        assert_eq!(engine.state(), EngineState::Destroyed);
        assert!(!pull.is_active());
        assert!(engine.local_addr().is_none());

        let snap = engine.telemetry();
        assert_eq!(snap.buffer_capacity, 0);
        assert_eq!(snap.packets_received, 0);
        assert_eq!(snap.sample_rate, 48000);

        // Idempotent
        engine.destroy();
        assert_eq!(engine.state(), EngineState::Destroyed);
    }

    #[test]
    fn test_create_twice_is_noop() {
        let mut engine = engine();
        engine
            .create(local_config(), Box::new(ManualOutput::new()))
            .unwrap();
        let addr = engine.local_addr();

        let second = ManualOutput::new();
        let second_pull = second.handle();
        engine.create(local_config(), Box::new(second)).unwrap();

        assert_eq!(engine.local_addr(), addr);
        assert!(!second_pull.is_active());
    }

    #[test]
    fn test_destroyed_is_terminal() {
        let mut engine = engine();
        engine.destroy();
        let err = engine
            .create(local_config(), Box::new(ManualOutput::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::Destroyed)));
        assert!(engine
            .set_device_params(DeviceParams::new(44100, 256, 2))
            .is_err());
    }

    #[test]
    fn test_channel_layout_must_match_device() {
        let mut engine = Engine::new();
        engine
            .set_device_params(DeviceParams::new(48000, 192, 1))
            .unwrap();
        let err = engine
            .create(local_config(), Box::new(ManualOutput::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ChannelMismatch {
                selected: 2,
                expected: 1
            })
        ));

        // Selecting one of two channels fits a mono device
        let config = EngineConfig {
            channel_mask: 0b10,
            ..local_config()
        };
        engine.create(config, Box::new(ManualOutput::new())).unwrap();
        assert!(engine.is_created());
    }

    #[test]
    fn test_backend_failure_rolls_back() {
        let mut engine = engine();
        let err = engine
            .create(local_config(), Box::new(FailingOutput))
            .unwrap_err();
        assert!(matches!(err, Error::Audio(AudioError::DeviceNotFound(_))));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.local_addr().is_none());

        engine
            .create(local_config(), Box::new(ManualOutput::new()))
            .unwrap();
        assert!(engine.is_created());
    }

    #[test]
    fn test_bind_failure_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut engine = engine();
        let config = EngineConfig {
            endpoint: Endpoint::new("127.0.0.1", port),
            ..Default::default()
        };
        let err = engine.create(config, Box::new(ManualOutput::new())).unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::BindFailed(_))));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }
}
