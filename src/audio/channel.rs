//! Channel selection by bitmask
//!
//! Maps an interleaved multi-channel input frame onto the output layout.
//! Bit `i` of the mask set means input channel `i` is copied to the output,
//! in ascending bit order. A zero mask passes every channel through.

use crate::error::ConfigError;

/// Highest channel count a 32-bit mask can address
pub const MAX_CHANNELS: u16 = 32;

/// Precomputed channel routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelector {
    input_channels: u16,
    /// Input channel index for each output channel
    routes: Vec<usize>,
}

impl ChannelSelector {
    pub fn new(input_channels: u16, mask: u32) -> Result<Self, ConfigError> {
        if input_channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if input_channels < MAX_CHANNELS && (mask >> input_channels) != 0 {
            return Err(ConfigError::MaskOutOfRange {
                mask,
                channels: input_channels,
            });
        }

        let routes = if mask == 0 {
            (0..input_channels as usize).collect()
        } else {
            (0..input_channels.min(MAX_CHANNELS) as usize)
                .filter(|&bit| mask & (1u32 << bit) != 0)
                .collect()
        };

        Ok(Self {
            input_channels,
            routes,
        })
    }

    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    pub fn output_channels(&self) -> u16 {
        self.routes.len() as u16
    }

    /// True when every input channel is passed through unchanged
    pub fn is_passthrough(&self) -> bool {
        self.routes.len() == self.input_channels as usize
    }

    /// Fail when the selected layout does not match the output device
    pub fn check_output(&self, device_channels: u16) -> Result<(), ConfigError> {
        if self.output_channels() != device_channels {
            return Err(ConfigError::ChannelMismatch {
                selected: self.output_channels(),
                expected: device_channels,
            });
        }
        Ok(())
    }

    /// Append the selected channels of every complete frame in `input` to
    /// `output`. A trailing partial frame is ignored.
    pub fn select_into<T: Copy>(&self, input: &[T], output: &mut Vec<T>) {
        let stride = self.input_channels as usize;
        if self.is_passthrough() {
            let whole = input.len() - input.len() % stride;
            output.extend_from_slice(&input[..whole]);
            return;
        }
        for frame in input.chunks_exact(stride) {
            output.extend(self.routes.iter().map(|&ch| frame[ch]));
        }
    }
}
