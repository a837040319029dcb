//! Output device enumeration and nominal stream parameters

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::audio::latency::DeviceParams;
use crate::config::OutputConfig;
use crate::constants::{DEFAULT_FRAMES_PER_BURST, DEFAULT_SAMPLE_RATE};
use crate::error::AudioError;

/// Output device as reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around a cpal output device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner: device, name }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Nominal parameters of this device, with overrides from `output`
    pub fn device_params(&self, output: &OutputConfig) -> Result<DeviceParams, AudioError> {
        let default_config = self.default_output_config()?;
        let params = DeviceParams::new(
            output.sample_rate.unwrap_or(default_config.sample_rate().0),
            output
                .frames_per_burst
                .unwrap_or_else(|| nominal_burst(default_config.buffer_size())),
            default_config.channels(),
        );
        params
            .validate()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        Ok(params)
    }
}

/// Burst size to assume for a device's buffer size range
pub fn nominal_burst(range: &cpal::SupportedBufferSize) -> u32 {
    match range {
        cpal::SupportedBufferSize::Range { min, max } if min <= max => {
            DEFAULT_FRAMES_PER_BURST.clamp(*min, *max)
        }
        _ => DEFAULT_FRAMES_PER_BURST,
    }
}

/// List all available output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Common sample rates and channel counts a device supports
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    (sample_rates, channels)
}

/// Output device by name, or the host default when `name` is `None`
pub fn get_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device));
            }
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Parameters to assume when no device can be queried, with overrides from
/// `output`
pub fn fallback_params(output: &OutputConfig, channels: u16) -> DeviceParams {
    DeviceParams::new(
        output.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
        output.frames_per_burst.unwrap_or(DEFAULT_FRAMES_PER_BURST),
        channels,
    )
}
