use super::{DecodeParams, Decoder, PcmRead};

/// Shape produced by a [`ToneDecoder`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// High for the first half of each period, low for the second.
    Square { period: u64 },
    /// Linear ramp from `-amplitude` towards `+amplitude` over each period.
    Sawtooth { period: u64 },
    /// Sine wave at the given frequency in Hz.
    Sine { frequency: f32 },
}

/// Test-tone generator implementing the decoder contract.
///
/// The generated value is the same on both sides of a stereo frame. A negative amplitude
/// inverts the phase.
#[derive(Debug, Clone)]
pub struct ToneDecoder {
    params: DecodeParams,
    waveform: Waveform,
    amplitude: i32,
    position: u64,
    length: Option<u64>,
}

impl ToneDecoder {
    pub fn new(waveform: Waveform, amplitude: i32, sample_rate: u32, stereo: bool) -> Self {
        Self {
            params: DecodeParams::new(stereo, sample_rate),
            waveform,
            amplitude,
            position: 0,
            length: None,
        }
    }

    /// Limits the tone to `frames` frames; unlimited tones never end.
    pub fn with_length(mut self, frames: u64) -> Self {
        self.length = Some(frames);
        self
    }

    fn sample_at(&self, n: u64) -> i16 {
        let amp = self.amplitude as i64;
        let value = match self.waveform {
            Waveform::Square { period } => {
                let period = period.max(1);
                if (n % period) * 2 < period { amp } else { -amp }
            }
            Waveform::Sawtooth { period } => {
                let period = period.max(1) as i64;
                let phase = (n % period as u64) as i64;
                phase * 2 * amp / period - amp
            }
            Waveform::Sine { frequency } => {
                let rate = self.params.native_sample_rate.max(1) as f64;
                let t = n as f64 / rate;
                (amp as f64 * (std::f64::consts::TAU * frequency as f64 * t).sin()).round() as i64
            }
        };
        value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }
}

impl Decoder for ToneDecoder {
    fn params(&self) -> &DecodeParams {
        &self.params
    }

    fn get_pcm(&mut self, pcm: &mut [i16], frames: usize) -> PcmRead {
        let channels = self.params.channels();
        let frames = frames.min(pcm.len() / channels);
        let available = match self.length {
            Some(length) => length.saturating_sub(self.position).min(frames as u64) as usize,
            None => frames,
        };
        if available == 0 {
            return PcmRead::END;
        }

        for (i, frame) in pcm.chunks_exact_mut(channels).take(frames).enumerate() {
            let value = if i < available {
                self.sample_at(self.position + i as u64)
            } else {
                0
            };
            frame.fill(value);
        }

        self.position += available as u64;
        PcmRead::frames(available)
    }
}
