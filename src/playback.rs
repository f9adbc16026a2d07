//! Mixer-side channel state.
//!
//! This module holds what the mixing pass owns for every channel:
//! - [`Voice`]: volume, pan and fade as seen by the pass
//! - [`Fade`]: a linear volume ramp measured in elapsed samples
//! - [`ParamUpdate`]: the latest parameter changes posted by control threads
//!
//! Control operations never write a `Voice` directly. They record a change in the channel's
//! [`ParamUpdate`] and the next pass applies it before mixing, so each pass sees one
//! consistent set of parameters.

use crate::math::{channel_gain, clamp_pan, clamp_volume};

/// A linear volume ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    pub start_volume: f32,
    pub target_volume: f32,
    /// Ramp length in output samples, at least 1.
    pub total_samples: u64,
    pub elapsed_samples: u64,
    /// Stop playback when the ramp reaches a zero target.
    pub cut_on_zero: bool,
}

impl Fade {
    pub fn new(
        start_volume: f32,
        target_volume: f32,
        total_samples: u64,
        cut_on_zero: bool,
    ) -> Self {
        Self {
            start_volume,
            target_volume,
            total_samples: total_samples.max(1),
            elapsed_samples: 0,
            cut_on_zero,
        }
    }

    /// Volume change per output sample.
    pub fn rate_per_sample(&self) -> f32 {
        (self.target_volume - self.start_volume) / self.total_samples as f32
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed_samples >= self.total_samples
    }

    /// Volume after `elapsed_samples`, exactly on the straight line between start and target.
    pub fn volume(&self) -> f32 {
        if self.is_complete() {
            return self.target_volume;
        }
        let t = self.elapsed_samples as f64 / self.total_samples as f64;
        (self.start_volume as f64 + (self.target_volume - self.start_volume) as f64 * t) as f32
    }

    pub fn advance(&mut self, samples: u64) {
        self.elapsed_samples = self.elapsed_samples.saturating_add(samples);
    }

    pub fn stops_playback(&self) -> bool {
        self.cut_on_zero && self.target_volume == 0.0
    }
}

/// What happened to a voice's fade at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    None,
    Completed,
    CompletedAndStopped,
}

/// Per-channel parameters owned by the mixing pass.
#[derive(Debug, Clone)]
pub struct Voice {
    /// Bind generation these parameters belong to.
    pub generation: u64,
    pub volume: f32,
    pub pan: f32,
    pub fade: Option<Fade>,
    /// Gain snapshot taken at the start of the current pass.
    pub(crate) gain: f32,
    /// Whether the channel takes part in the current pass.
    pub(crate) active: bool,
    /// The decoder ran short earlier in the current pass; the rest of the pass is silent.
    pub(crate) drained: bool,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            generation: 0,
            volume: 1.0,
            pan: 0.0,
            fade: None,
            gain: 0.0,
            active: false,
            drained: false,
        }
    }
}

impl Voice {
    /// Forgets the previous binding's parameters.
    pub fn rebind(&mut self, generation: u64) {
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        self.fade = None;
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = clamp_pan(pan);
    }

    /// Starts a ramp from the current volume, or cancels any ramp when `total_samples` is 0.
    pub fn set_fade(&mut self, target: f32, total_samples: u64, cut_on_zero: bool) {
        if total_samples == 0 {
            self.fade = None;
            return;
        }
        self.fade = Some(Fade::new(
            self.volume,
            clamp_volume(target),
            total_samples,
            cut_on_zero,
        ));
    }

    /// Applies pending changes, volume before fade.
    pub fn apply(&mut self, update: &ParamUpdate) {
        if let Some(volume) = update.volume {
            self.set_volume(volume);
        }
        if let Some(pan) = update.pan {
            self.set_pan(pan);
        }
        if let Some(fade) = update.fade {
            self.set_fade(fade.target, fade.total_samples, fade.cut_on_zero);
        }
    }

    /// Snapshots the gain used for every frame of the coming pass.
    pub(crate) fn begin_pass(&mut self, base_volume: f32) {
        self.gain = channel_gain(self.volume, base_volume);
        self.drained = false;
    }

    /// Moves an active fade forward by the frames of one pass and updates the volume for the
    /// next pass.
    pub(crate) fn end_pass(&mut self, frames: u64) -> FadeOutcome {
        let Some(fade) = self.fade.as_mut() else {
            return FadeOutcome::None;
        };

        fade.advance(frames);
        self.volume = fade.volume();
        if !fade.is_complete() {
            return FadeOutcome::None;
        }

        let stops = fade.stops_playback();
        self.fade = None;
        if stops {
            FadeOutcome::CompletedAndStopped
        } else {
            FadeOutcome::Completed
        }
    }
}

/// Parameter change for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    Volume(f32),
    Pan(f32),
    Fade {
        target: f32,
        total_samples: u64,
        cut_on_zero: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeRequest {
    pub target: f32,
    pub total_samples: u64,
    pub cut_on_zero: bool,
}

/// Parameter changes waiting for the next pass, tagged with the bind generation they were
/// issued against.
///
/// Only the latest value of each parameter is kept, so any number of calls between two
/// passes fits. A volume change drops a pending fade, and a pending fade starts from the
/// volume applied just before it, which is the same result as applying the calls in order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParamUpdate {
    pub generation: u64,
    pub volume: Option<f32>,
    pub pan: Option<f32>,
    pub fade: Option<FadeRequest>,
}

impl ParamUpdate {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn record(&mut self, kind: CommandKind) {
        match kind {
            CommandKind::Volume(volume) => {
                self.volume = Some(volume);
                self.fade = None;
            }
            CommandKind::Pan(pan) => self.pan = Some(pan),
            CommandKind::Fade {
                target,
                total_samples,
                cut_on_zero,
            } => {
                self.fade = Some(FadeRequest {
                    target,
                    total_samples,
                    cut_on_zero,
                })
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.pan.is_none() && self.fade.is_none()
    }
}
