use super::{DecodeParams, Decoder, PcmRead};
use crate::error::{Result, SonoMixError};

const INPUT_CHUNK_FRAMES: usize = 1024;

/// Converts another decoder's output to a target rate on the fly.
///
/// Without interpolation each output frame repeats the most recent input frame; with
/// interpolation it is the linear blend of the two input frames around it.
pub struct ResamplingDecoder {
    inner: Box<dyn Decoder>,
    params: DecodeParams,
    source_sample_rate: u32,
    interpolate: bool,
    /// Input frames advanced per output frame.
    step: f64,
    phase: f64,
    input: Vec<i16>,
    input_frames: usize,
    input_pos: usize,
    prev: [i16; 2],
    next: [i16; 2],
    next_valid: bool,
    primed: bool,
    exhausted: bool,
    pending_loop_offset: usize,
}

impl ResamplingDecoder {
    pub fn new(
        inner: Box<dyn Decoder>,
        target_sample_rate: u32,
        interpolate: bool,
    ) -> Result<Self> {
        let source = *inner.params();
        if source.native_sample_rate == 0 || target_sample_rate == 0 {
            return Err(SonoMixError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        let step = source.native_sample_rate as f64 / target_sample_rate as f64;
        let scale = |frames: u64| (frames as f64 / step).round() as u64;

        log::debug!(
            "Resampling decoder {} Hz -> {} Hz (interpolate: {})",
            source.native_sample_rate,
            target_sample_rate,
            interpolate
        );

        Ok(Self {
            params: DecodeParams {
                native_sample_rate: target_sample_rate,
                loop_start: scale(source.loop_start),
                loop_length: scale(source.loop_length),
                ..source
            },
            source_sample_rate: source.native_sample_rate,
            inner,
            interpolate,
            step,
            phase: 0.0,
            input: vec![0; INPUT_CHUNK_FRAMES * source.channels()],
            input_frames: 0,
            input_pos: 0,
            prev: [0; 2],
            next: [0; 2],
            next_valid: false,
            primed: false,
            exhausted: false,
            pending_loop_offset: 0,
        })
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.params.native_sample_rate
    }

    fn pull(&mut self) -> Option<[i16; 2]> {
        if self.input_pos == self.input_frames {
            if self.exhausted {
                return None;
            }
            let read = self.inner.get_pcm(&mut self.input, INPUT_CHUNK_FRAMES);
            if read.is_end() {
                self.exhausted = true;
                return None;
            }
            self.pending_loop_offset += read.loop_offset;
            self.input_frames = read.frames.min(INPUT_CHUNK_FRAMES);
            self.input_pos = 0;
        }

        let frame = if self.params.stereo {
            let i = self.input_pos * 2;
            [self.input[i], self.input[i + 1]]
        } else {
            let s = self.input[self.input_pos];
            [s, s]
        };
        self.input_pos += 1;
        Some(frame)
    }

    fn prime(&mut self) -> bool {
        let Some(first) = self.pull() else {
            return false;
        };
        self.prev = first;
        match self.pull() {
            Some(second) => {
                self.next = second;
                self.next_valid = true;
            }
            None => self.next_valid = false,
        }
        self.primed = true;
        true
    }

    /// Moves the read position forward by whole input frames. Returns false once the last
    /// input frame has been passed.
    fn advance(&mut self) -> bool {
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            if !self.next_valid {
                return false;
            }
            self.prev = self.next;
            match self.pull() {
                Some(frame) => self.next = frame,
                None => self.next_valid = false,
            }
        }
        true
    }

    fn blend(&self, side: usize) -> i16 {
        if !self.interpolate || !self.next_valid {
            return self.prev[side];
        }
        let a = self.prev[side] as f64;
        let b = self.next[side] as f64;
        (a + (b - a) * self.phase).round() as i16
    }
}

impl Decoder for ResamplingDecoder {
    fn params(&self) -> &DecodeParams {
        &self.params
    }

    fn get_pcm(&mut self, pcm: &mut [i16], frames: usize) -> PcmRead {
        let channels = self.params.channels();
        let frames = frames.min(pcm.len() / channels);

        if !self.primed && !self.prime() {
            return PcmRead::END;
        }

        let mut produced = 0;
        while produced < frames {
            if !self.advance() {
                break;
            }
            let base = produced * channels;
            pcm[base] = self.blend(0);
            if channels == 2 {
                pcm[base + 1] = self.blend(1);
            }
            self.phase += self.step;
            produced += 1;
        }

        pcm[produced * channels..frames * channels].fill(0);

        let loop_offset = (self.pending_loop_offset as f64 / self.step).round() as usize;
        self.pending_loop_offset = 0;
        PcmRead {
            frames: produced,
            loop_offset,
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
