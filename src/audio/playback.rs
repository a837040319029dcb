//! Audio output backends
//!
//! The engine hands its [`PullCallback`] to an [`OutputBackend`], which
//! invokes it once per device burst. [`CpalOutput`] drives a real device;
//! [`ManualOutput`] lets the host (or a test) pull bursts itself.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::callback::PullCallback;
use crate::audio::device::get_output_device;
use crate::error::AudioError;

/// Stream shape requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback
    pub burst_frames: u32,
}

/// Something that calls the pull callback on the audio clock
pub trait OutputBackend: Send {
    /// Take ownership of the callback and start invoking it
    fn start(&mut self, callback: PullCallback, stream: &StreamParams) -> Result<(), AudioError>;

    /// Stop invoking the callback and release it. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// cpal stream config for `stream`, falling back to the device's default
/// buffer size when the requested burst is outside the supported range
pub fn stream_config(stream: &StreamParams, supported: &cpal::SupportedBufferSize) -> StreamConfig {
    let buffer_size = match supported {
        cpal::SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&stream.burst_frames) =>
        {
            cpal::BufferSize::Fixed(stream.burst_frames)
        }
        _ => cpal::BufferSize::Default,
    };

    StreamConfig {
        channels: stream.channels,
        sample_rate: cpal::SampleRate(stream.sample_rate),
        buffer_size,
    }
}

/// Output through a cpal device
///
/// cpal streams are not `Send` on every host, so the stream lives on its own
/// thread for as long as the backend runs.
pub struct CpalOutput {
    device_name: Option<String>,
    /// Dropping this ends the stream thread
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl CpalOutput {
    /// `device_name` of `None` selects the system default output
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stop_tx: None,
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Next runtime error reported by the stream, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl OutputBackend for CpalOutput {
    fn start(&mut self, callback: PullCallback, stream: &StreamParams) -> Result<(), AudioError> {
        if self.thread_handle.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let device_name = self.device_name.clone();
        let stream = *stream;

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), &stream, callback, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the backend is stopped or dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread_handle = Some(handle);
                self.error_rx = Some(error_rx);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("output thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.stop_tx.take();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio output thread panicked");
            }
            tracing::info!("Audio output stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    device_name: Option<&str>,
    stream: &StreamParams,
    callback: PullCallback,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let device = get_output_device(device_name)?;
    let default_config = device.default_output_config()?;
    let config = stream_config(stream, default_config.buffer_size());

    tracing::info!(
        "Opening output '{}': {} Hz, {} channels, {:?} buffer, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        config.buffer_size,
        default_config.sample_format()
    );

    let device = device.into_inner();
    let stream = match default_config.sample_format() {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, callback, error_tx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, callback, error_tx)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, callback, error_tx)?,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };

    stream
        .play()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: PullCallback,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| callback.fill(data),
            move |err| {
                tracing::error!("Output stream error: {}", err);
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

#[derive(Default)]
struct ManualShared {
    callback: Option<PullCallback>,
    stream: Option<StreamParams>,
}

/// Host-side handle used to pull bursts from a [`ManualOutput`]
#[derive(Clone, Default)]
pub struct ManualPull {
    shared: Arc<Mutex<ManualShared>>,
}

impl ManualPull {
    /// Fill `out` from the engine. Writes silence and returns false when the
    /// backend is not running.
    pub fn pull<T>(&self, out: &mut [T]) -> bool
    where
        T: Sample + FromSample<i16>,
    {
        match self.shared.lock().callback.as_mut() {
            Some(callback) => {
                callback.fill(out);
                true
            }
            None => {
                out.fill(T::EQUILIBRIUM);
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().callback.is_some()
    }

    /// Stream shape the engine asked for, while running
    pub fn stream(&self) -> Option<StreamParams> {
        self.shared.lock().stream
    }
}

/// Backend driven by explicit [`ManualPull::pull`] calls
#[derive(Default)]
pub struct ManualOutput {
    handle: ManualPull,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ManualPull {
        self.handle.clone()
    }
}

impl OutputBackend for ManualOutput {
    fn start(&mut self, callback: PullCallback, stream: &StreamParams) -> Result<(), AudioError> {
        let mut shared = self.handle.shared.lock();
        if shared.callback.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        shared.callback = Some(callback);
        shared.stream = Some(*stream);
        Ok(())
    }

    fn stop(&mut self) {
        let mut shared = self.handle.shared.lock();
        shared.callback = None;
        shared.stream = None;
    }

    fn is_running(&self) -> bool {
        self.handle.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{JitterRingBuffer, PacketFrame, RingProducer};
    use crate::audio::latency::LatencyPlan;
    use crate::config::LatencyMode;
    use crate::telemetry::EngineTelemetry;

    const STREAM: StreamParams = StreamParams {
        sample_rate: 48000,
        channels: 2,
        burst_frames: 4,
    };

    fn callback() -> (RingProducer, PullCallback) {
        let (producer, consumer) = JitterRingBuffer::new(4, 8).split();
        let plan = LatencyPlan {
            mode: LatencyMode::LowLatency,
            burst_frames: 4,
            packet_frames: 4,
            capacity: 4,
            prefill: 1,
        };
        let callback = PullCallback::new(
            consumer,
            2,
            4,
            plan,
            false,
            Arc::new(EngineTelemetry::new()),
        );
        (producer, callback)
    }

    #[test]
    fn test_manual_pull_before_start_is_silent() {
        let output = ManualOutput::new();
        let handle = output.handle();
        let mut out = [3i16; 4];
        assert!(!handle.pull(&mut out));
        assert_eq!(out, [0; 4]);
        assert!(handle.stream().is_none());
    }

    #[test]
    fn test_manual_pull_drives_callback() {
        let mut output = ManualOutput::new();
        let handle = output.handle();
        let (mut producer, callback) = callback();
        producer.try_enqueue(PacketFrame::new(vec![1, 2, 3, 4], 2, 0, 0));

        output.start(callback, &STREAM).unwrap();
        assert!(output.is_running());
        assert_eq!(handle.stream(), Some(STREAM));

        let mut out = [0i16; 4];
        assert!(handle.pull(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);

        output.stop();
        assert!(!handle.is_active());
        assert!(!handle.pull(&mut out));
        // Idempotent
        output.stop();
    }

    #[test]
    fn test_manual_start_twice_rejected() {
        let mut output = ManualOutput::new();
        let (_p1, first) = callback();
        let (_p2, second) = callback();
        output.start(first, &STREAM).unwrap();
        assert!(matches!(
            output.start(second, &STREAM),
            Err(AudioError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_stream_config_buffer_size() {
        let cfg = stream_config(&STREAM, &cpal::SupportedBufferSize::Range { min: 2, max: 1024 });
        assert_eq!(cfg.buffer_size, cpal::BufferSize::Fixed(4));
        assert_eq!(cfg.channels, 2);
        assert_eq!(cfg.sample_rate, cpal::SampleRate(48000));

        let cfg = stream_config(&STREAM, &cpal::SupportedBufferSize::Range { min: 64, max: 1024 });
        assert_eq!(cfg.buffer_size, cpal::BufferSize::Default);

        let cfg = stream_config(&STREAM, &cpal::SupportedBufferSize::Unknown);
        assert_eq!(cfg.buffer_size, cpal::BufferSize::Default);
    }

    #[test]
    fn test_cpal_output_stop_without_start() {
        let mut output = CpalOutput::new(None);
        assert!(!output.is_running());
        output.stop();
        assert!(output.check_errors().is_none());
    }
}
