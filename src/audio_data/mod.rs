mod load_options;
mod symphonia_loader;

use crate::decoder::{
    ClipDecoder, DecodeParams, Decoder, DecoderOpen, LoopMode, open_at_rate, publish_params,
};
use crate::error::{Result, SonoMixError};
pub use load_options::LoadOptions;
use std::sync::Arc;
use std::time::Duration;

pub use symphonia_loader::load_audio_file;

/// Decoded, interleaved 16-bit PCM held in memory.
///
/// Only mono and stereo are represented; files with more channels are folded down when
/// loaded. Cloning is cheap and shares the sample storage.
#[derive(Debug, Clone)]
pub struct PcmClip {
    inner: Arc<ClipInner>,
}

#[derive(Debug)]
struct ClipInner {
    samples: Arc<[i16]>,
    sample_rate: u32,
    stereo: bool,
    total_frames: usize,
}

impl PcmClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32, stereo: bool) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SonoMixError::AudioFormat(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if stereo && samples.len() % 2 != 0 {
            return Err(SonoMixError::AudioFormat(format!(
                "Stereo clip has an odd sample count ({})",
                samples.len()
            )));
        }

        let total_frames = if stereo { samples.len() / 2 } else { samples.len() };
        Ok(Self {
            inner: Arc::new(ClipInner {
                samples: samples.into(),
                sample_rate,
                stereo,
                total_frames,
            }),
        })
    }

    /// Loads and decodes an audio file with default options.
    pub fn from_path(path: &str) -> Result<Self> {
        load_audio_file(path, &LoadOptions::default())
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn is_stereo(&self) -> bool {
        self.inner.stereo
    }

    pub fn channels(&self) -> usize {
        if self.inner.stereo { 2 } else { 1 }
    }

    pub fn samples(&self) -> &[i16] {
        &self.inner.samples
    }

    pub(crate) fn shared_samples(&self) -> Arc<[i16]> {
        self.inner.samples.clone()
    }

    pub fn total_frames(&self) -> usize {
        self.inner.total_frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.inner.total_frames as f64 / self.inner.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.total_frames == 0
    }

    /// Convert to mono by averaging both sides
    pub fn to_mono(&self) -> Result<Self> {
        if !self.inner.stereo {
            return Ok(self.clone());
        }

        let mono = self
            .inner
            .samples
            .chunks_exact(2)
            .map(|frame| ((frame[0] as i32 + frame[1] as i32) / 2) as i16)
            .collect();

        Self::new(mono, self.inner.sample_rate, false)
    }

    /// Duplicate a mono clip onto both sides
    pub fn to_stereo(&self) -> Result<Self> {
        if self.inner.stereo {
            return Ok(self.clone());
        }

        let stereo = self.inner.samples.iter().flat_map(|&s| [s, s]).collect();
        Self::new(stereo, self.inner.sample_rate, true)
    }

    /// Builds an opener that binds this clip to a mixer channel.
    ///
    /// The clip is converted to the layout the channel asks for, and wrapped in a
    /// [`ResamplingDecoder`](crate::decoder::ResamplingDecoder) when its rate differs from
    /// the mix rate.
    pub fn opener(&self, loop_mode: LoopMode, interpolate: bool) -> impl DecoderOpen + use<> {
        let clip = self.clone();
        move |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
            let mix_rate = params.native_sample_rate;
            let clip = if params.stereo { clip.to_stereo() } else { clip.to_mono() };
            let clip = match clip {
                Ok(clip) => clip,
                Err(e) => {
                    log::warn!("Cannot prepare clip for binding: {}", e);
                    return None;
                }
            };

            let decoder = open_at_rate(
                Box::new(ClipDecoder::new(&clip, loop_mode)),
                mix_rate,
                interpolate,
            )?;
            publish_params(params, decoder.as_ref());
            Some(decoder)
        }
    }
}
