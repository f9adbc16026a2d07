//! The mixer core: channel table, control operations and the real-time mixing pass.
//!
//! Control operations may be called from any thread. Parameter changes are recorded per
//! channel, latest value wins, and take effect at the start of the next pass.
//! [`Mixer::get_pcm`] never blocks: anything it cannot acquire immediately is treated as
//! silence for that pass.
//!
//! Invalid channel numbers, unbound channels and calls on an uninitialized mixer are
//! silently ignored by every control operation.

use crate::config::MixerDesc;
use crate::decoder::{DecodeParams, Decoder, DecoderOpen};
use crate::error::{Result, SonoMixError};
use crate::events::MixerEvent;
use crate::math::{
    DEFAULT_BASE_VOLUME, clamp_base_volume, clip_i16, pan_gains, pan_stereo, to_accum,
};
use crate::playback::{CommandKind, FadeOutcome, ParamUpdate, Voice};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, TryLockError};

/// A decoder bound to a channel, tagged with the bind generation.
struct BoundDecoder {
    decoder: Box<dyn Decoder>,
    generation: u64,
    stereo: bool,
}

/// Shared per-channel state.
struct ChannelSlot {
    decoder: Mutex<Option<BoundDecoder>>,
    bound: AtomicBool,
    playing: AtomicBool,
    generation: AtomicU64,
    position: AtomicU64,
    pending: Mutex<ParamUpdate>,
    /// Set while `pending` holds changes the pass has not taken yet.
    dirty: AtomicBool,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            decoder: Mutex::new(None),
            bound: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            position: AtomicU64::new(0),
            pending: Mutex::new(ParamUpdate::default()),
            dirty: AtomicBool::new(false),
        }
    }

    fn post(&self, kind: CommandKind) {
        let generation = self.generation.load(Ordering::Acquire);
        let mut pending = lock_or_recover(&self.pending);
        if pending.generation != generation {
            *pending = ParamUpdate::new(generation);
        }
        pending.record(kind);
        self.dirty.store(true, Ordering::Release);
    }

    /// Takes the pending changes without waiting. A contended cell stays dirty and is
    /// picked up by a later pass.
    fn take_pending(&self) -> Option<ParamUpdate> {
        if !self.dirty.load(Ordering::Acquire) {
            return None;
        }
        let mut pending = match self.pending.try_lock() {
            Ok(pending) => pending,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        let update = *pending;
        *pending = ParamUpdate::new(update.generation);
        self.dirty.store(false, Ordering::Release);
        Some(update)
    }

    /// Unbinds and closes the decoder, waiting for any pass that is reading it.
    fn release(&self) -> bool {
        self.playing.store(false, Ordering::Release);
        let mut guard = lock_or_recover(&self.decoder);
        let taken = guard.take();
        self.bound.store(false, Ordering::Release);
        drop(guard);

        match taken {
            Some(mut bound) => {
                bound.decoder.close();
                true
            }
            None => false,
        }
    }
}

/// Scratch state owned by whichever call is currently mixing.
struct MixPass {
    voices: Vec<Voice>,
    scratch: Vec<i16>,
    accum: Vec<i32>,
}

struct MixerCore {
    mix_rate: u32,
    max_block_frames: usize,
    slots: Box<[ChannelSlot]>,
    event_tx: Sender<MixerEvent>,
    event_rx: Receiver<MixerEvent>,
    pass: Mutex<MixPass>,
}

/// Software mixer combining up to `num_channels` decoders into interleaved stereo i16.
///
/// A `Mixer` starts uninitialized; [`Mixer::init`] allocates the channel table and
/// [`Mixer::cleanup`] releases it. Several independent mixers may exist at once.
///
/// ```
/// use sonomix::Mixer;
/// use sonomix::decoder::{Decoder, DecodeParams, ToneDecoder, Waveform};
///
/// let mixer = Mixer::new();
/// assert!(mixer.init(2, 16));
///
/// let tone = |_params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
///     let tone = ToneDecoder::new(Waveform::Square { period: 4 }, 10000, 16, false);
///     Some(Box::new(tone.with_length(4)))
/// };
/// assert!(mixer.setdata(1, Some(tone), false));
/// mixer.start(1);
///
/// let mut out = [0i16; 10];
/// mixer.get_pcm(&mut out, 5);
/// assert_eq!(out, [10000, 10000, 10000, 10000, -10000, -10000, -10000, -10000, 0, 0]);
/// ```
pub struct Mixer {
    state: RwLock<Option<MixerCore>>,
    base_volume: AtomicU32,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    /// Creates an uninitialized mixer. It outputs silence until initialized.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            base_volume: AtomicU32::new(DEFAULT_BASE_VOLUME.to_bits()),
        }
    }

    /// Initializes `num_channels` channels mixing at `mix_rate` Hz.
    ///
    /// Returns false when either argument is zero, the mixer is already initialized, or the
    /// channel table cannot be allocated.
    pub fn init(&self, num_channels: usize, mix_rate: u32) -> bool {
        match self.try_init(&MixerDesc::new(num_channels, mix_rate)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Mixer init rejected: {}", e);
                false
            }
        }
    }

    /// Initializes the mixer from a full descriptor.
    ///
    /// Fails with [`SonoMixError::ResourceExhausted`] when the channel table or the mixing
    /// buffers cannot be allocated.
    pub fn try_init(&self, desc: &MixerDesc) -> Result<()> {
        desc.validate()?;
        if self.is_initialized() {
            return Err(SonoMixError::AlreadyInitialized);
        }

        let block_samples = desc.max_block_frames.checked_mul(2).ok_or_else(|| {
            SonoMixError::ResourceExhausted(format!(
                "Block of {} frames is too large",
                desc.max_block_frames
            ))
        })?;
        let slots = try_alloc(desc.num_channels, "channel table", ChannelSlot::new)?;
        let pass = MixPass {
            voices: try_alloc(desc.num_channels, "voices", Voice::default)?,
            scratch: try_alloc(block_samples, "decode buffer", || 0)?,
            accum: try_alloc(block_samples, "mix buffer", || 0)?,
        };
        let (event_tx, event_rx) = crossbeam_channel::bounded(desc.event_capacity);

        let mut state = write_or_recover(&self.state);
        if state.is_some() {
            return Err(SonoMixError::AlreadyInitialized);
        }
        *state = Some(MixerCore {
            mix_rate: desc.mix_rate,
            max_block_frames: desc.max_block_frames,
            slots: slots.into_boxed_slice(),
            event_tx,
            event_rx,
            pass: Mutex::new(pass),
        });
        self.base_volume
            .store(clamp_base_volume(desc.base_volume).to_bits(), Ordering::Release);

        log::info!(
            "Mixer initialized: {} channels at {} Hz",
            desc.num_channels,
            desc.mix_rate
        );
        Ok(())
    }

    /// Closes every bound decoder and frees the channel table. Safe to call repeatedly and
    /// on a mixer that was never initialized.
    pub fn cleanup(&self) {
        let Some(core) = write_or_recover(&self.state).take() else {
            return;
        };

        let closed = core.slots.iter().filter(|slot| slot.release()).count();
        log::info!("Mixer cleaned up ({} decoder(s) closed)", closed);
    }

    pub fn is_initialized(&self) -> bool {
        read_or_recover(&self.state).is_some()
    }

    /// Number of channels, 0 when uninitialized.
    pub fn num_channels(&self) -> usize {
        read_or_recover(&self.state)
            .as_ref()
            .map_or(0, |core| core.slots.len())
    }

    pub fn mix_rate(&self) -> Option<u32> {
        read_or_recover(&self.state).as_ref().map(|core| core.mix_rate)
    }

    /// Sets the global attenuation, clamped to `[0, 16]`. Applies from the next pass.
    pub fn set_base_volume(&self, volume: f32) {
        self.base_volume
            .store(clamp_base_volume(volume).to_bits(), Ordering::Release);
    }

    pub fn base_volume(&self) -> f32 {
        f32::from_bits(self.base_volume.load(Ordering::Acquire))
    }

    /// Binds a decoder to `channel`.
    ///
    /// Fails without side effects when the channel is out of range, `open` is `None`, the
    /// channel already has a decoder, or the opener fails. A newly bound channel is stopped,
    /// at volume 1.0, centred and without a fade.
    pub fn setdata<O: DecoderOpen>(
        &self,
        channel: usize,
        open: Option<O>,
        is_stereo: bool,
    ) -> bool {
        let state = read_or_recover(&self.state);
        let Some(core) = state.as_ref() else {
            return false;
        };
        let Some(slot) = core.slot(channel) else {
            return false;
        };
        let Some(open) = open else {
            return false;
        };
        if slot.bound.load(Ordering::Acquire) {
            return false;
        }

        let mut params = DecodeParams::new(is_stereo, core.mix_rate);
        let Some(mut decoder) = open.open(&mut params) else {
            log::debug!("Channel {}: decoder open failed", channel);
            return false;
        };

        let stereo = decoder.params().stereo;
        if decoder.params().native_sample_rate != core.mix_rate {
            log::warn!(
                "Channel {}: decoder produces {} Hz but the mixer runs at {} Hz",
                channel,
                decoder.params().native_sample_rate,
                core.mix_rate
            );
        }

        let mut guard = lock_or_recover(&slot.decoder);
        if guard.is_some() {
            drop(guard);
            decoder.close();
            return false;
        }

        let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *guard = Some(BoundDecoder {
            decoder,
            generation,
            stereo,
        });
        slot.position.store(0, Ordering::Release);
        slot.playing.store(false, Ordering::Release);
        slot.bound.store(true, Ordering::Release);
        drop(guard);

        log::debug!(
            "Channel {} bound ({}, generation {})",
            channel,
            if stereo { "stereo" } else { "mono" },
            generation
        );
        true
    }

    /// Sets the channel volume, clamped to `[0, MAX_VOLUME]`, cancelling any fade.
    pub fn setvol(&self, channel: usize, volume: f32) {
        self.post_change(channel, CommandKind::Volume(volume));
    }

    /// Sets the stereo balance, clamped to `[-1, 1]`.
    pub fn setpan(&self, channel: usize, pan: f32) {
        self.post_change(channel, CommandKind::Pan(pan));
    }

    /// Ramps the volume linearly to `target` over `length_seconds`.
    ///
    /// A non-positive length cancels any running fade and leaves the volume alone. When the
    /// ramp ends at zero and `cut_on_zero` is set, playback stops.
    pub fn setfade(&self, channel: usize, target: f32, length_seconds: f32, cut_on_zero: bool) {
        let Some(mix_rate) = self.mix_rate() else {
            return;
        };
        let total_samples = if length_seconds > 0.0 {
            ((length_seconds as f64 * mix_rate as f64).round() as u64).max(1)
        } else {
            0
        };
        log::debug!(
            "Channel {}: fade to {} over {} samples (cut: {})",
            channel,
            target,
            total_samples,
            cut_on_zero
        );
        self.post_change(
            channel,
            CommandKind::Fade {
                target,
                total_samples,
                cut_on_zero,
            },
        );
    }

    /// Begins or resumes playback. No effect on an unbound channel.
    pub fn start(&self, channel: usize) {
        self.with_slot(channel, |slot| {
            if slot.bound.load(Ordering::Acquire) {
                slot.playing.store(true, Ordering::Release);
            }
        });
    }

    /// Halts playback without unbinding; [`Mixer::start`] resumes.
    pub fn stop(&self, channel: usize) {
        self.with_slot(channel, |slot| slot.playing.store(false, Ordering::Release));
    }

    /// Stops the channel, then closes and unbinds its decoder.
    ///
    /// Blocks until no mixing pass is reading the decoder.
    pub fn reset(&self, channel: usize) {
        self.with_slot(channel, |slot| {
            if slot.release() {
                log::debug!("Channel {} reset", channel);
            }
        });
    }

    /// True while the channel is playing. End-of-stream is noticed by the pass that reads
    /// zero frames from the decoder.
    pub fn status(&self, channel: usize) -> bool {
        self.with_slot(channel, |slot| {
            slot.playing.load(Ordering::Acquire) && slot.bound.load(Ordering::Acquire)
        })
        .unwrap_or(false)
    }

    /// Playback position of the bound stream in frames, adjusted for loop wraps.
    pub fn position(&self, channel: usize) -> Option<u64> {
        self.with_slot(channel, |slot| {
            slot.bound
                .load(Ordering::Acquire)
                .then(|| slot.position.load(Ordering::Acquire))
        })
        .flatten()
    }

    /// Drains the events emitted by mixing passes since the last poll.
    pub fn poll_events(&self) -> Vec<MixerEvent> {
        read_or_recover(&self.state)
            .as_ref()
            .map(|core| core.event_rx.try_iter().collect())
            .unwrap_or_default()
    }

    /// Mixes `frames` interleaved stereo frames into `out`.
    ///
    /// Callable from any thread; never allocates or waits. Writes silence when the mixer is
    /// uninitialized or another call is already mixing. `frames` is limited to
    /// `out.len() / 2`.
    pub fn get_pcm(&self, out: &mut [i16], frames: usize) {
        let frames = frames.min(out.len() / 2);
        let out = &mut out[..frames * 2];

        let state = match self.state.try_read() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0);
                return;
            }
        };

        match state.as_ref() {
            Some(core) => core.mix(out, frames, self.base_volume()),
            None => out.fill(0),
        }
    }

    fn with_slot<R>(&self, channel: usize, f: impl FnOnce(&ChannelSlot) -> R) -> Option<R> {
        let state = read_or_recover(&self.state);
        let slot = state.as_ref()?.slot(channel)?;
        Some(f(slot))
    }

    fn post_change(&self, channel: usize, kind: CommandKind) {
        self.with_slot(channel, |slot| {
            if slot.bound.load(Ordering::Acquire) {
                slot.post(kind);
            }
        });
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl MixerCore {
    fn slot(&self, channel: usize) -> Option<&ChannelSlot> {
        channel.checked_sub(1).and_then(|i| self.slots.get(i))
    }

    fn emit(&self, event: MixerEvent) {
        // A full queue means nobody is polling; the event is dropped.
        let _ = self.event_tx.try_send(event);
    }

    fn mix(&self, out: &mut [i16], frames: usize, base_volume: f32) {
        let mut pass = match self.pass.try_lock() {
            Ok(pass) => pass,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0);
                return;
            }
        };
        let MixPass {
            voices,
            scratch,
            accum,
        } = &mut *pass;

        self.prepare_voices(voices, base_volume);

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_block_frames);
            let block = &mut accum[..n * 2];
            block.fill(0);

            for (index, voice) in voices.iter_mut().enumerate() {
                if voice.active && !voice.drained {
                    self.mix_voice(index, voice, scratch, block, n);
                }
            }

            for (dst, &sum) in out[done * 2..(done + n) * 2].iter_mut().zip(block.iter()) {
                *dst = clip_i16(sum);
            }
            done += n;
        }

        self.finish_voices(voices, frames as u64);
    }

    /// Brings voices up to date with bindings and pending changes, then snapshots gains.
    fn prepare_voices(&self, voices: &mut [Voice], base_volume: f32) {
        for (voice, slot) in voices.iter_mut().zip(self.slots.iter()) {
            let generation = slot.generation.load(Ordering::Acquire);
            if generation > voice.generation {
                voice.rebind(generation);
            }

            // Changes posted against an older binding are dropped with it.
            if let Some(update) = slot.take_pending() {
                if update.generation > voice.generation {
                    voice.rebind(update.generation);
                }
                if update.generation == voice.generation {
                    voice.apply(&update);
                }
            }

            voice.active =
                slot.playing.load(Ordering::Acquire) && slot.bound.load(Ordering::Acquire);
            if voice.active {
                voice.begin_pass(base_volume);
            }
        }
    }

    fn mix_voice(
        &self,
        index: usize,
        voice: &mut Voice,
        scratch: &mut [i16],
        accum: &mut [i32],
        frames: usize,
    ) {
        let slot = &self.slots[index];
        let mut guard = match slot.decoder.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // A reset or bind is touching this channel right now.
            Err(TryLockError::WouldBlock) => return,
        };

        let Some(bound) = guard.as_mut() else {
            voice.active = false;
            return;
        };
        if bound.generation != voice.generation {
            return;
        }

        let stereo = bound.stereo;
        let channels = if stereo { 2 } else { 1 };
        let pcm = &mut scratch[..frames * channels];
        let read = bound.decoder.get_pcm(pcm, frames);

        if read.is_end() {
            let finished = guard.take();
            slot.bound.store(false, Ordering::Release);
            slot.playing.store(false, Ordering::Release);
            drop(guard);
            if let Some(mut finished) = finished {
                finished.decoder.close();
            }
            voice.active = false;
            self.emit(MixerEvent::ChannelFinished { channel: index + 1 });
            return;
        }
        drop(guard);

        let produced = read.frames.min(frames);
        if produced < frames {
            voice.drained = true;
        }
        slot.position.fetch_add(produced as u64, Ordering::AcqRel);
        if read.loop_offset > 0 {
            let offset = read.loop_offset as u64;
            let _ = slot
                .position
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                    Some(p.saturating_sub(offset))
                });
            self.emit(MixerEvent::ChannelLooped {
                channel: index + 1,
                loop_offset: read.loop_offset,
            });
        }

        if voice.gain == 0.0 {
            return;
        }

        if stereo {
            for (frame, acc) in pcm[..produced * 2]
                .chunks_exact(2)
                .zip(accum.chunks_exact_mut(2))
            {
                let (l, r) = pan_stereo(frame[0] as f32, frame[1] as f32, voice.gain, voice.pan);
                acc[0] = acc[0].saturating_add(to_accum(l));
                acc[1] = acc[1].saturating_add(to_accum(r));
            }
        } else {
            let (gain_l, gain_r) = pan_gains(voice.gain, voice.pan);
            for (&sample, acc) in pcm[..produced].iter().zip(accum.chunks_exact_mut(2)) {
                let s = sample as f32;
                acc[0] = acc[0].saturating_add(to_accum(s * gain_l));
                acc[1] = acc[1].saturating_add(to_accum(s * gain_r));
            }
        }
    }

    fn finish_voices(&self, voices: &mut [Voice], frames: u64) {
        for (index, voice) in voices.iter_mut().enumerate() {
            if !voice.active {
                continue;
            }
            voice.active = false;

            match voice.end_pass(frames) {
                FadeOutcome::None => {}
                FadeOutcome::Completed => self.emit(MixerEvent::FadeCompleted {
                    channel: index + 1,
                    stopped: false,
                }),
                FadeOutcome::CompletedAndStopped => {
                    self.slots[index].playing.store(false, Ordering::Release);
                    self.emit(MixerEvent::FadeCompleted {
                        channel: index + 1,
                        stopped: true,
                    });
                }
            }
        }
    }
}

fn try_alloc<T>(len: usize, what: &str, fill: impl FnMut() -> T) -> Result<Vec<T>> {
    let mut items = Vec::new();
    items.try_reserve_exact(len).map_err(|e| {
        SonoMixError::ResourceExhausted(format!(
            "Cannot allocate {} ({} entries): {}",
            what, len, e
        ))
    })?;
    items.extend(std::iter::repeat_with(fill).take(len));
    Ok(items)
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        log::warn!("Mixer channel mutex poisoned; continuing");
        e.into_inner()
    })
}

fn read_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| {
        log::warn!("Mixer state lock poisoned; continuing");
        e.into_inner()
    })
}

fn write_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| {
        log::warn!("Mixer state lock poisoned; continuing");
        e.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::PcmClip;
    use crate::decoder::{ClipDecoder, LoopMode, PcmRead, ToneDecoder, Waveform};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn tone(
        waveform: Waveform,
        amplitude: i32,
        rate: u32,
        length: Option<u64>,
    ) -> impl FnOnce(&mut DecodeParams) -> Option<Box<dyn Decoder>> {
        move |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
            let mut tone = ToneDecoder::new(waveform, amplitude, rate, params.stereo);
            if let Some(length) = length {
                tone = tone.with_length(length);
            }
            Some(Box::new(tone))
        }
    }

    fn square(amplitude: i32) -> impl FnOnce(&mut DecodeParams) -> Option<Box<dyn Decoder>> {
        tone(Waveform::Square { period: 1_000_000 }, amplitude, 100, None)
    }

    /// Counts close() calls so tests can check decoders are closed exactly once.
    struct Tracked {
        inner: ToneDecoder,
        closes: Arc<AtomicUsize>,
    }

    impl Decoder for Tracked {
        fn params(&self) -> &DecodeParams {
            self.inner.params()
        }

        fn get_pcm(&mut self, pcm: &mut [i16], frames: usize) -> PcmRead {
            self.inner.get_pcm(pcm, frames)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(
        closes: &Arc<AtomicUsize>,
        length: Option<u64>,
    ) -> impl FnOnce(&mut DecodeParams) -> Option<Box<dyn Decoder>> + use<> {
        let closes = closes.clone();
        move |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
            let mut inner = ToneDecoder::new(
                Waveform::Square { period: 1_000_000 },
                1000,
                params.native_sample_rate,
                false,
            );
            if let Some(length) = length {
                inner = inner.with_length(length);
            }
            Some(Box::new(Tracked { inner, closes }))
        }
    }

    fn mix(mixer: &Mixer, frames: usize) -> Vec<i16> {
        let mut out = vec![1i16; frames * 2];
        mixer.get_pcm(&mut out, frames);
        out
    }

    #[test]
    fn test_init_rules() {
        let mixer = Mixer::new();
        assert!(!mixer.init(0, 44100));
        assert!(!mixer.init(2, 0));
        assert!(!mixer.is_initialized());

        assert!(mixer.init(2, 44100));
        assert!(!mixer.init(4, 22050));
        assert_eq!(mixer.num_channels(), 2);
        assert_eq!(mixer.mix_rate(), Some(44100));
        assert!(matches!(
            mixer.try_init(&MixerDesc::default()),
            Err(SonoMixError::AlreadyInitialized)
        ));

        mixer.cleanup();
        mixer.cleanup();
        assert!(!mixer.is_initialized());
        assert!(mixer.init(4, 22050));
    }

    #[test]
    fn test_init_reports_failed_allocation() {
        let mixer = Mixer::new();
        assert!(!mixer.init(usize::MAX / 4, 44100));
        assert!(!mixer.is_initialized());

        let desc = MixerDesc::new(1, 44100).max_block_frames(usize::MAX / 2);
        assert!(matches!(
            mixer.try_init(&desc),
            Err(SonoMixError::ResourceExhausted(_))
        ));
        assert!(mixer.init(1, 44100));
    }

    #[test]
    fn test_init_resets_base_volume() {
        let mixer = Mixer::new();
        mixer.set_base_volume(3.0);
        assert!(mixer.init(1, 8000));
        assert_eq!(mixer.base_volume(), 0.5);
        mixer.set_base_volume(20.0);
        assert_eq!(mixer.base_volume(), 16.0);
        mixer.set_base_volume(-1.0);
        assert_eq!(mixer.base_volume(), 0.0);
    }

    #[test]
    fn test_uninitialized_outputs_silence() {
        let mixer = Mixer::new();
        assert_eq!(mix(&mixer, 4), vec![0; 8]);
        assert!(!mixer.setdata(1, Some(square(100)), false));
        mixer.setvol(1, 0.5);
        mixer.start(1);
        assert!(!mixer.status(1));
    }

    #[test]
    fn test_square_wave_scenario() {
        let mixer = Mixer::new();
        assert!(mixer.init(2, 16));
        let open = tone(Waveform::Square { period: 4 }, 10000, 16, Some(4));
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);

        assert_eq!(
            mix(&mixer, 5),
            vec![10000, 10000, 10000, 10000, -10000, -10000, -10000, -10000, 0, 0]
        );
        assert!(mixer.status(1));

        assert_eq!(mix(&mixer, 5), vec![0; 10]);
        assert!(!mixer.status(1));
        assert_eq!(
            mixer.poll_events(),
            vec![MixerEvent::ChannelFinished { channel: 1 }]
        );
    }

    #[test]
    fn test_full_scale_sawtooth_is_lossless() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 44100));
        let open = tone(Waveform::Sawtooth { period: 65536 }, 32768, 44100, None);
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);

        let out = mix(&mixer, 65536);
        for (i, frame) in out.chunks_exact(2).enumerate() {
            let expected = (i as i32 - 32768) as i16;
            assert_eq!(frame, &[expected, expected], "frame {i}");
        }
    }

    #[test]
    fn test_opposite_squares_cancel_and_equal_squares_clip() {
        let mixer = Mixer::new();
        assert!(mixer.init(2, 100));
        let open = tone(Waveform::Square { period: 8 }, 12000, 100, None);
        assert!(mixer.setdata(1, Some(open), false));
        let open = tone(Waveform::Square { period: 8 }, -12000, 100, None);
        assert!(mixer.setdata(2, Some(open), false));
        mixer.start(1);
        mixer.start(2);
        assert_eq!(mix(&mixer, 16), vec![0; 32]);
        mixer.reset(2);

        let open = tone(Waveform::Square { period: 8 }, 5000, 100, None);
        assert!(mixer.setdata(2, Some(open), false));
        mixer.start(2);
        let out = mix(&mixer, 8);
        // Channel 1 continues its own phase: frames 16..24 of a period-8 square.
        assert_eq!(&out[..8], &[17000; 8]);
        assert_eq!(&out[8..], &[-17000; 8]);

        mixer.reset(2);
        let open = tone(Waveform::Square { period: 8 }, 25000, 100, None);
        assert!(mixer.setdata(2, Some(open), false));
        mixer.start(2);
        let out = mix(&mixer, 8);
        assert_eq!(&out[..8], &[i16::MAX; 8]);
        assert_eq!(&out[8..], &[i16::MIN; 8]);
    }

    #[test]
    fn test_pan_ratio_and_centre() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(8000)), false));
        mixer.start(1);

        let centre = mix(&mixer, 1);
        assert_eq!(centre, vec![8000, 8000]);
        assert_eq!(centre[0] as i32 + centre[1] as i32, 2 * 8000);

        mixer.setpan(1, -0.5);
        assert_eq!(mix(&mixer, 1), vec![12000, 4000]);

        mixer.setpan(1, 0.25);
        assert_eq!(mix(&mixer, 1), vec![6000, 10000]);

        mixer.setpan(1, -3.0);
        assert_eq!(mix(&mixer, 1), vec![16000, 0]);
    }

    #[test]
    fn test_stereo_source_keeps_sides() {
        let clip = PcmClip::new(vec![1000, -2000, 3000, -4000], 100, true).unwrap();
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        let open = clip.opener(LoopMode::Once, false);
        assert!(mixer.setdata(1, Some(open), true));
        mixer.start(1);
        assert_eq!(mix(&mixer, 2), vec![1000, -2000, 3000, -4000]);
    }

    #[test]
    fn test_stereo_pan_moves_one_side_into_the_other() {
        let clip = PcmClip::new(vec![1000, -2000, 3000, -4000], 100, true).unwrap();
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));

        assert!(mixer.setdata(1, Some(clip.opener(LoopMode::Once, false)), true));
        mixer.setpan(1, -0.5);
        mixer.start(1);
        assert_eq!(mix(&mixer, 2), vec![0, -1000, 1000, -2000]);

        mixer.reset(1);
        assert!(mixer.setdata(1, Some(clip.opener(LoopMode::Once, false)), true));
        mixer.setpan(1, 0.5);
        mixer.start(1);
        assert_eq!(mix(&mixer, 2), vec![500, -1500, 1500, -2500]);
    }

    #[test]
    fn test_volume_and_base_volume() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);

        mixer.setvol(1, 2.0);
        assert_eq!(mix(&mixer, 1), vec![2000, 2000]);

        mixer.set_base_volume(0.25);
        assert_eq!(mix(&mixer, 1), vec![1000, 1000]);

        mixer.setvol(1, 100.0);
        mixer.set_base_volume(16.0);
        assert_eq!(mix(&mixer, 1), vec![i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_fade_is_linear_and_cuts() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(10000)), false));
        mixer.start(1);
        mixer.setfade(1, 0.0, 1.0, true);

        for step in 0..10 {
            assert!(mixer.status(1));
            let out = mix(&mixer, 10);
            let expected = 10000 - step * 1000;
            assert!(
                out.iter().all(|&s| (s as i32 - expected).abs() <= 1),
                "pass {step}: {:?}",
                &out[..2]
            );
        }
        assert!(!mixer.status(1));
        assert_eq!(mix(&mixer, 10), vec![0; 20]);
        assert_eq!(
            mixer.poll_events(),
            vec![MixerEvent::FadeCompleted { channel: 1, stopped: true }]
        );

        // Stopped, not unbound: a restart plays at the faded-to volume.
        mixer.start(1);
        assert!(mixer.status(1));
        assert_eq!(mix(&mixer, 1), vec![0, 0]);
    }

    #[test]
    fn test_fade_without_cut_keeps_playing() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(10000)), false));
        mixer.start(1);
        mixer.setfade(1, 0.0, 0.1, false);
        mix(&mixer, 20);
        assert!(mixer.status(1));
        assert_eq!(mix(&mixer, 1), vec![0, 0]);
    }

    #[test]
    fn test_setvol_and_zero_fade_override_running_fade() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);

        mixer.setfade(1, 0.0, 1.0, true);
        mix(&mixer, 50);
        mixer.setvol(1, 1.0);
        mix(&mixer, 100);
        assert!(mixer.status(1));
        assert_eq!(mix(&mixer, 1), vec![1000, 1000]);

        mixer.setfade(1, 0.0, 1.0, true);
        mix(&mixer, 50);
        mixer.setfade(1, 3.0, 0.0, false);
        mix(&mixer, 100);
        assert!(mixer.status(1));
        assert_eq!(mix(&mixer, 1), vec![500, 500]);
    }

    #[test]
    fn test_short_fade_jumps_once_per_buffer() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 1000));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);
        mixer.setfade(1, 0.0, 0.001, false);

        // The whole buffer uses the volume at its start; the next one is at the target.
        assert!(mix(&mixer, 64).iter().all(|&s| s == 1000));
        assert!(mix(&mixer, 64).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_setdata_rules() {
        let mixer = Mixer::new();
        assert!(mixer.init(2, 100));
        assert!(!mixer.setdata(0, Some(square(1)), false));
        assert!(!mixer.setdata(3, Some(square(1)), false));
        let none: Option<fn(&mut DecodeParams) -> Option<Box<dyn Decoder>>> = None;
        assert!(!mixer.setdata(1, none, false));
        let failing = |_: &mut DecodeParams| -> Option<Box<dyn Decoder>> { None };
        assert!(!mixer.setdata(1, Some(failing), false));

        assert!(mixer.setdata(1, Some(square(1)), false));
        assert!(!mixer.setdata(1, Some(square(1)), false));
        assert!(!mixer.status(1), "bound channels start stopped");
        assert_eq!(mixer.position(1), Some(0));
        assert_eq!(mixer.position(2), None);
    }

    #[test]
    fn test_rebind_resets_parameters() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.setvol(1, 0.0);
        mixer.setpan(1, 1.0);
        mixer.start(1);
        assert_eq!(mix(&mixer, 1), vec![0, 0]);

        mixer.reset(1);
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);
        assert_eq!(mix(&mixer, 1), vec![1000, 1000]);
    }

    #[test]
    fn test_many_changes_between_passes_keep_the_last() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);

        for _ in 0..1024 {
            mixer.setpan(1, 0.0);
        }
        mixer.setvol(1, 0.25);
        assert_eq!(mix(&mixer, 1), vec![250, 250]);

        for i in 0..10_000 {
            mixer.setvol(1, i as f32 / 10_000.0);
            mixer.setpan(1, -1.0);
        }
        mixer.setfade(1, 0.0, 0.05, true);
        mixer.setvol(1, 2.0);
        assert_eq!(mix(&mixer, 10), [4000, 0].repeat(10));
        assert!(mixer.status(1));
    }

    #[test]
    fn test_changes_for_old_binding_are_ignored() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.setvol(1, 0.0);
        // No pass runs between the volume change and the rebind.
        mixer.reset(1);
        assert!(mixer.setdata(1, Some(square(1000)), false));
        mixer.start(1);
        assert_eq!(mix(&mixer, 1), vec![1000, 1000]);
    }

    #[test]
    fn test_setters_ignore_invalid_channels() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        mixer.setvol(0, 1.0);
        mixer.setvol(9, 1.0);
        mixer.setpan(1, 1.0);
        mixer.setfade(1, 0.0, 1.0, true);
        mixer.start(1);
        mixer.stop(5);
        mixer.reset(7);
        assert!(!mixer.status(1));
        assert!(!mixer.status(0));
        assert_eq!(mix(&mixer, 2), vec![0; 4]);
    }

    #[test]
    fn test_stop_and_resume() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        let open = tone(Waveform::Square { period: 2 }, 100, 100, None);
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);
        assert_eq!(mix(&mixer, 1), vec![100, 100]);
        mixer.stop(1);
        assert!(!mixer.status(1));
        assert_eq!(mix(&mixer, 1), vec![0, 0]);
        mixer.start(1);
        // Stopping does not advance the decoder.
        assert_eq!(mix(&mixer, 1), vec![-100, -100]);
    }

    #[test]
    fn test_decoder_closed_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mixer = Mixer::new();
        assert!(mixer.init(3, 100));

        assert!(mixer.setdata(1, Some(tracked(&closes, None)), false));
        mixer.reset(1);
        mixer.reset(1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert!(mixer.setdata(2, Some(tracked(&closes, Some(3))), false));
        mixer.start(2);
        mix(&mixer, 4);
        mix(&mixer, 4);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        mixer.reset(2);
        assert_eq!(closes.load(Ordering::SeqCst), 2);

        assert!(mixer.setdata(3, Some(tracked(&closes, None)), false));
        mixer.cleanup();
        mixer.cleanup();
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_rejected_double_bind_closes_new_decoder_only() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        assert!(mixer.setdata(1, Some(tracked(&closes, None)), false));
        assert!(!mixer.setdata(1, Some(tracked(&closes, None)), false));
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_end_of_stream_frees_channel() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        let open = tone(Waveform::Square { period: 2 }, 10, 100, Some(2));
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);
        mix(&mixer, 2);
        mix(&mixer, 2);
        assert!(!mixer.status(1));
        assert!(mixer.setdata(1, Some(square(10)), false));
    }

    #[test]
    fn test_position_tracks_loops() {
        let clip = PcmClip::new(vec![1, 2, 3, 4, 5], 100, false).unwrap();
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        let open = move |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
            let decoder = ClipDecoder::new(&clip, LoopMode::Infinite);
            *params = *decoder.params();
            Some(Box::new(decoder))
        };
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);

        mix(&mixer, 3);
        assert_eq!(mixer.position(1), Some(3));
        mix(&mixer, 4);
        assert_eq!(mixer.position(1), Some(2));
        assert_eq!(
            mixer.poll_events(),
            vec![MixerEvent::ChannelLooped { channel: 1, loop_offset: 5 }]
        );
    }

    #[test]
    fn test_long_requests_are_chunked() {
        let mixer = Mixer::new();
        let desc = MixerDesc::new(1, 100).max_block_frames(3);
        mixer.try_init(&desc).unwrap();
        let open = tone(Waveform::Sawtooth { period: 10 }, 1000, 100, Some(8));
        assert!(mixer.setdata(1, Some(open), false));
        mixer.start(1);

        let out = mix(&mixer, 10);
        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![-1000, -800, -600, -400, -200, 0, 200, 400, 0, 0]);
        // The short read in the third chunk ends the pass for this channel; the decoder
        // reports the end only on the next pass.
        assert!(mixer.status(1));
        assert!(mixer.poll_events().is_empty());

        assert_eq!(mix(&mixer, 4), vec![0; 8]);
        assert!(!mixer.status(1));
        assert_eq!(
            mixer.poll_events(),
            vec![MixerEvent::ChannelFinished { channel: 1 }]
        );
    }

    #[test]
    fn test_get_pcm_limits_frames_to_buffer() {
        let mixer = Mixer::new();
        assert!(mixer.init(1, 100));
        let mut out = [5i16; 3];
        mixer.get_pcm(&mut out, 10);
        assert_eq!(out, [0, 0, 5]);
    }

    #[test]
    fn test_reset_while_mixing_on_another_thread() {
        let mixer = Arc::new(Mixer::new());
        assert!(mixer.init(4, 1000));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let mixer = mixer.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                let mut out = vec![0i16; 256];
                while running.load(Ordering::Acquire) {
                    mixer.get_pcm(&mut out, 128);
                }
            })
        };

        let closes = Arc::new(AtomicUsize::new(0));
        for round in 0..200 {
            let channel = round % 4 + 1;
            assert!(mixer.setdata(channel, Some(tracked(&closes, None)), false));
            mixer.start(channel);
            mixer.setvol(channel, 0.5);
            mixer.reset(channel);
            assert!(!mixer.status(channel));
        }

        running.store(false, Ordering::Release);
        worker.join().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 200);
    }
}
