//! Audio subsystem module

pub mod buffer;
pub mod callback;
pub mod channel;
pub mod device;
pub mod latency;
pub mod playback;

pub use buffer::{JitterRingBuffer, PacketFrame, RingConsumer, RingMonitor, RingProducer};
pub use callback::{DriftState, PlayoutState, PullCallback};
pub use channel::ChannelSelector;
pub use device::{get_output_device, list_output_devices, AudioDevice, OutputDeviceInfo};
pub use latency::{DeviceParams, LatencyPlan, LatencyPolicy};
pub use playback::{CpalOutput, ManualOutput, ManualPull, OutputBackend, StreamParams};
