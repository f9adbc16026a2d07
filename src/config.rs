//! Configuration for SonoMix

use crate::error::{Result, SonoMixError};
use crate::math::{DEFAULT_BASE_VOLUME, clamp_base_volume};
use std::time::Duration;

/// Largest event queue a mixer will allocate.
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

/// Descriptor for a [`Mixer`](crate::Mixer) instance.
#[derive(Debug, Clone)]
pub struct MixerDesc {
    /// Number of playback channels. Channels are addressed `1..=num_channels`.
    pub num_channels: usize,
    /// Output sample rate in Hz. Decoders are expected to deliver PCM at this rate.
    pub mix_rate: u32,
    /// Global attenuation applied to every channel, clamped to `[0, 16]`.
    pub base_volume: f32,
    /// Largest number of frames mixed in one internal chunk. Longer `get_pcm` requests are
    /// split into chunks of this size so the mixing pass never allocates.
    pub max_block_frames: usize,
    /// Capacity of the event queue drained by [`Mixer::poll_events`](crate::Mixer::poll_events).
    pub event_capacity: usize,
}

impl Default for MixerDesc {
    fn default() -> Self {
        Self {
            num_channels: 8,
            mix_rate: 44100,
            base_volume: DEFAULT_BASE_VOLUME,
            max_block_frames: 4096,
            event_capacity: 256,
        }
    }
}

impl MixerDesc {
    pub fn new(num_channels: usize, mix_rate: u32) -> Self {
        Self {
            num_channels,
            mix_rate,
            ..Default::default()
        }
    }

    pub fn num_channels(mut self, channels: usize) -> Self {
        self.num_channels = channels;
        self
    }

    pub fn mix_rate(mut self, rate: u32) -> Self {
        self.mix_rate = rate;
        self
    }

    pub fn base_volume(mut self, volume: f32) -> Self {
        self.base_volume = clamp_base_volume(volume);
        self
    }

    pub fn max_block_frames(mut self, frames: usize) -> Self {
        self.max_block_frames = frames;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Checks that the descriptor describes a mixer that can be initialized.
    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            return Err(SonoMixError::Configuration(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        if self.mix_rate == 0 {
            return Err(SonoMixError::Configuration(
                "Mix rate must be greater than 0".to_string(),
            ));
        }

        if self.max_block_frames == 0 {
            return Err(SonoMixError::Configuration(
                "Block size must be greater than 0".to_string(),
            ));
        }

        if self.event_capacity == 0 || self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(SonoMixError::Configuration(format!(
                "Event queue capacity must be between 1 and {}",
                MAX_EVENT_CAPACITY
            )));
        }

        Ok(())
    }
}

/// Descriptor for a [`BufferBridge`](crate::BufferBridge) ring.
#[derive(Debug, Clone)]
pub struct BridgeDesc {
    /// Number of output buffers in the ring. Latency is roughly `slot_count` buffer periods.
    pub slot_count: usize,
    /// Stereo frames per buffer.
    pub frames_per_slot: usize,
    /// How long the fill task sleeps when it finds no empty slot, unless woken earlier.
    pub fill_interval: Duration,
}

impl Default for BridgeDesc {
    fn default() -> Self {
        Self {
            slot_count: 4,
            frames_per_slot: 1024,
            fill_interval: Duration::from_millis(5),
        }
    }
}

impl BridgeDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_count(mut self, count: usize) -> Self {
        self.slot_count = count;
        self
    }

    pub fn frames_per_slot(mut self, frames: usize) -> Self {
        self.frames_per_slot = frames;
        self
    }

    pub fn fill_interval(mut self, interval: Duration) -> Self {
        self.fill_interval = interval;
        self
    }

    /// Approximate output latency of a full ring at the given sample rate.
    pub fn latency(&self, mix_rate: u32) -> Duration {
        if mix_rate == 0 {
            return Duration::ZERO;
        }
        let frames = (self.slot_count * self.frames_per_slot) as f64;
        Duration::from_secs_f64(frames / mix_rate as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_count < 2 {
            return Err(SonoMixError::Configuration(
                "Bridge needs at least 2 buffer slots".to_string(),
            ));
        }

        if self.frames_per_slot == 0 {
            return Err(SonoMixError::Configuration(
                "Buffer slots must hold at least one frame".to_string(),
            ));
        }

        Ok(())
    }
}
