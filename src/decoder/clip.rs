use super::{DecodeParams, Decoder, PcmRead};
use crate::audio_data::PcmClip;
use std::sync::Arc;

/// Loop mode for clip playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play once and report end-of-stream
    #[default]
    Once,
    /// Repeat the loop region forever (the whole clip unless a region is set)
    Infinite,
}

/// Plays an in-memory [`PcmClip`].
#[derive(Debug, Clone)]
pub struct ClipDecoder {
    params: DecodeParams,
    samples: Arc<[i16]>,
    total_frames: u64,
    position: u64,
    loop_mode: LoopMode,
}

impl ClipDecoder {
    pub fn new(clip: &PcmClip, loop_mode: LoopMode) -> Self {
        let total_frames = clip.total_frames() as u64;
        let mut params = DecodeParams::new(clip.is_stereo(), clip.sample_rate());
        params.bitrate = clip.sample_rate() * 16 * clip.channels() as u32;
        if loop_mode == LoopMode::Infinite {
            params.loop_length = total_frames;
        }

        Self {
            params,
            samples: clip.shared_samples(),
            total_frames,
            position: 0,
            loop_mode,
        }
    }

    /// Restricts looping to `length` frames starting at `start`. Playback still begins at
    /// frame 0 and runs into the region.
    pub fn with_loop_region(mut self, start: u64, length: u64) -> Self {
        let start = start.min(self.total_frames);
        self.params.loop_start = start;
        self.params.loop_length = length.min(self.total_frames - start);
        self.loop_mode = LoopMode::Infinite;
        self
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn looping(&self) -> bool {
        self.loop_mode == LoopMode::Infinite && self.params.loop_length > 0
    }

    fn end_frame(&self) -> u64 {
        if self.looping() {
            self.params.loop_start + self.params.loop_length
        } else {
            self.total_frames
        }
    }
}

impl Decoder for ClipDecoder {
    fn params(&self) -> &DecodeParams {
        &self.params
    }

    fn get_pcm(&mut self, pcm: &mut [i16], frames: usize) -> PcmRead {
        let channels = self.params.channels();
        let frames = frames.min(pcm.len() / channels);
        let mut produced = 0;
        let mut loop_offset = 0;

        while produced < frames {
            let end = self.end_frame();
            if self.position >= end {
                if !self.looping() {
                    break;
                }
                loop_offset += (self.position - self.params.loop_start) as usize;
                self.position = self.params.loop_start;
                continue;
            }

            let n = ((end - self.position) as usize).min(frames - produced);
            let src = self.position as usize * channels;
            let dst = produced * channels;
            pcm[dst..dst + n * channels].copy_from_slice(&self.samples[src..src + n * channels]);
            produced += n;
            self.position += n as u64;
        }

        pcm[produced * channels..frames * channels].fill(0);
        PcmRead {
            frames: produced,
            loop_offset,
        }
    }
}
