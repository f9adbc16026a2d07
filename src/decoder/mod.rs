//! The decoder contract: anything that can produce 16-bit PCM on demand.
//!
//! A [`Decoder`] is bound to one mixer channel by [`Mixer::setdata`](crate::Mixer::setdata)
//! through a [`DecoderOpen`] value. From then on the channel owns it exclusively and calls
//! [`Decoder::close`] exactly once, on reset, on end-of-stream or on mixer cleanup.
//!
//! Shipped implementations:
//! - [`ToneDecoder`]: square, sawtooth and sine generators
//! - [`ClipDecoder`]: plays a decoded [`PcmClip`](crate::audio_data::PcmClip) with loop points
//! - [`ResamplingDecoder`]: converts another decoder's rate to the mix rate

mod clip;
mod resample;
mod tone;

pub use clip::{ClipDecoder, LoopMode};
pub use resample::ResamplingDecoder;
pub use tone::{ToneDecoder, Waveform};

/// Stream properties populated by a decoder's opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParams {
    /// Two interleaved samples per frame when true, one otherwise.
    pub stereo: bool,
    /// Rate at which the decoder produces frames.
    pub native_sample_rate: u32,
    /// Advisory bitrate of the underlying stream in bits per second, 0 if unknown.
    pub bitrate: u32,
    /// First frame of the loop region.
    pub loop_start: u64,
    /// Length of the loop region in frames, 0 when the stream does not loop.
    pub loop_length: u64,
}

impl DecodeParams {
    pub fn new(stereo: bool, native_sample_rate: u32) -> Self {
        Self {
            stereo,
            native_sample_rate,
            bitrate: 0,
            loop_start: 0,
            loop_length: 0,
        }
    }

    /// Interleaved samples per frame.
    pub fn channels(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }
}

/// Outcome of one [`Decoder::get_pcm`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PcmRead {
    /// Frames actually decoded. Zero means permanent end-of-stream.
    pub frames: usize,
    /// Frames skipped backward by a loop wrap during this call. Only used for position
    /// reporting; the written data already reflects the wrap.
    pub loop_offset: usize,
}

impl PcmRead {
    pub const END: PcmRead = PcmRead {
        frames: 0,
        loop_offset: 0,
    };

    pub fn frames(frames: usize) -> Self {
        Self {
            frames,
            loop_offset: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.frames == 0
    }
}

/// A pull-based PCM source.
pub trait Decoder: Send {
    fn params(&self) -> &DecodeParams;

    /// Fills up to `frames` frames into `pcm`, which holds at least
    /// `frames * params().channels()` samples.
    ///
    /// When fewer frames remain the available ones are written, the rest of the requested
    /// range is zero-filled and the decoded count is returned. Returning zero frames signals
    /// end-of-stream; the decoder is not called again afterwards.
    fn get_pcm(&mut self, pcm: &mut [i16], frames: usize) -> PcmRead;

    /// Releases resources acquired at open time.
    fn close(&mut self) {}
}

/// Constructs a decoder when a channel is bound.
///
/// `params` arrives pre-populated with the layout requested by the caller and the mixer's
/// rate. The opener overwrites whatever it knows about the stream and returns `None` on
/// failure, in which case nothing is bound.
pub trait DecoderOpen {
    fn open(self, params: &mut DecodeParams) -> Option<Box<dyn Decoder>>;
}

impl<F> DecoderOpen for F
where
    F: FnOnce(&mut DecodeParams) -> Option<Box<dyn Decoder>>,
{
    fn open(self, params: &mut DecodeParams) -> Option<Box<dyn Decoder>> {
        self(params)
    }
}

/// Wraps `decoder` in a [`ResamplingDecoder`] when its native rate differs from `mix_rate`.
pub fn open_at_rate(
    decoder: Box<dyn Decoder>,
    mix_rate: u32,
    interpolate: bool,
) -> Option<Box<dyn Decoder>> {
    if decoder.params().native_sample_rate == mix_rate {
        return Some(decoder);
    }

    match ResamplingDecoder::new(decoder, mix_rate, interpolate) {
        Ok(resampled) => Some(Box::new(resampled)),
        Err(e) => {
            log::warn!("Cannot resample decoder to {} Hz: {}", mix_rate, e);
            None
        }
    }
}

/// Copies `params` into `target` after a successful open.
pub(crate) fn publish_params(target: &mut DecodeParams, decoder: &dyn Decoder) {
    *target = *decoder.params();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_opener_populates_params() {
        let opener = |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
            let tone = ToneDecoder::new(
                Waveform::Square { period: 4 },
                1000,
                params.native_sample_rate,
                params.stereo,
            );
            let decoder: Box<dyn Decoder> = Box::new(tone);
            publish_params(params, decoder.as_ref());
            Some(decoder)
        };

        let mut params = DecodeParams::new(true, 22050);
        let decoder = opener.open(&mut params).expect("opener succeeds");
        assert!(params.stereo);
        assert_eq!(params.native_sample_rate, 22050);
        assert_eq!(decoder.params().channels(), 2);
    }

    #[test]
    fn test_open_at_rate_wraps_only_when_needed() {
        let tone = ToneDecoder::new(Waveform::Square { period: 4 }, 1000, 44100, false);
        let same = open_at_rate(Box::new(tone), 44100, true).unwrap();
        assert_eq!(same.params().native_sample_rate, 44100);

        let tone = ToneDecoder::new(Waveform::Square { period: 4 }, 1000, 22050, false);
        let wrapped = open_at_rate(Box::new(tone), 44100, true).unwrap();
        assert_eq!(wrapped.params().native_sample_rate, 44100);
    }

    #[test]
    fn test_pcm_read_end() {
        assert!(PcmRead::END.is_end());
        assert!(!PcmRead::frames(3).is_end());
    }
}
