//! Buffering bridge between the mixer and a real-time audio callback.
//!
//! A fixed ring of output slots sits between a background fill thread, which runs the mixer
//! ahead of time, and the hardware callback, which only ever copies finished slots. The
//! callback never waits on the mixer: when nothing is ready it plays silence.
//!
//! The ring is split into exactly one [`BridgeFiller`] and one [`BridgeConsumer`]. Each slot
//! carries an atomic ready flag; the filler turns it on and the consumer turns it off, so a
//! slot's payload is only ever touched by the side that currently owns it.

use crate::config::BridgeDesc;
use crate::error::{Result, SonoMixError};
use crate::mixer::Mixer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Anything that can render interleaved stereo PCM on demand.
pub trait PcmSource: Send + Sync + 'static {
    /// Writes `frames` stereo frames into `out`. Must not block for long.
    fn get_pcm(&self, out: &mut [i16], frames: usize);
}

impl PcmSource for Mixer {
    fn get_pcm(&self, out: &mut [i16], frames: usize) {
        Mixer::get_pcm(self, out, frames);
    }
}

/// Counters shared by both ends of the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub buffers_filled: u64,
    pub buffers_delivered: u64,
    /// Times the consumer found no ready slot and played silence.
    pub underruns: u64,
}

struct Slot {
    ready: AtomicBool,
    generation: AtomicU64,
    data: UnsafeCell<Box<[i16]>>,
}

// SAFETY: `data` is written only by the filler while `ready` is false and read only by the
// consumer while `ready` is true. The flag is published with Release and observed with
// Acquire, so the two sides never access the payload at the same time.
unsafe impl Sync for Slot {}

struct SlotRing {
    slots: Box<[Slot]>,
    frames_per_slot: usize,
    buffers_filled: AtomicU64,
    buffers_delivered: AtomicU64,
    underruns: AtomicU64,
}

impl SlotRing {
    fn stats(&self) -> BridgeStats {
        BridgeStats {
            buffers_filled: self.buffers_filled.load(Ordering::Relaxed),
            buffers_delivered: self.buffers_delivered.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }

    fn samples_per_slot(&self) -> usize {
        self.frames_per_slot * 2
    }
}

/// Creates a slot ring and splits it into its two ends.
pub fn slot_ring(desc: &BridgeDesc) -> Result<(BridgeFiller, BridgeConsumer)> {
    desc.validate()?;

    let samples = desc.frames_per_slot * 2;
    let slots = (0..desc.slot_count)
        .map(|_| Slot {
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            data: UnsafeCell::new(vec![0; samples].into_boxed_slice()),
        })
        .collect();
    let ring = Arc::new(SlotRing {
        slots,
        frames_per_slot: desc.frames_per_slot,
        buffers_filled: AtomicU64::new(0),
        buffers_delivered: AtomicU64::new(0),
        underruns: AtomicU64::new(0),
    });
    let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

    let filler = BridgeFiller {
        ring: ring.clone(),
        cursor: 0,
        next_generation: 1,
        wake_rx,
    };
    let consumer = BridgeConsumer {
        ring,
        cursor: 0,
        held: None,
        offset: 0,
        silence: vec![0; samples].into_boxed_slice(),
        wake_tx,
    };
    Ok((filler, consumer))
}

/// Producing end of the ring, driven by the fill thread.
pub struct BridgeFiller {
    ring: Arc<SlotRing>,
    cursor: usize,
    next_generation: u64,
    wake_rx: Receiver<()>,
}

impl BridgeFiller {
    /// Fills the next empty slot and hands it to the consumer.
    ///
    /// Starts at the fill cursor and scans forward past slots that are still full, so a
    /// slot the consumer has not released is never overwritten. Returns the generation
    /// number given to the slot, or `None` when every slot is full.
    pub fn fill_next(&mut self, fill: impl FnOnce(&mut [i16], usize)) -> Option<u64> {
        let count = self.ring.slots.len();
        let index = (0..count)
            .map(|step| (self.cursor + step) % count)
            .find(|&i| !self.ring.slots[i].ready.load(Ordering::Acquire))?;
        let slot = &self.ring.slots[index];

        // SAFETY: `ready` is false, so the consumer is not reading this slot and will not
        // until the Release store below.
        let data = unsafe { &mut *slot.data.get() };
        fill(data, self.ring.frames_per_slot);

        let generation = self.next_generation;
        self.next_generation += 1;
        slot.generation.store(generation, Ordering::Relaxed);
        slot.ready.store(true, Ordering::Release);

        self.cursor = (index + 1) % count;
        self.ring.buffers_filled.fetch_add(1, Ordering::Relaxed);
        Some(generation)
    }

    /// Sleeps until the consumer frees a slot or `timeout` passes.
    ///
    /// Returns false once the consumer has been dropped.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.wake_rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub fn frames_per_slot(&self) -> usize {
        self.ring.frames_per_slot
    }

    pub fn stats(&self) -> BridgeStats {
        self.ring.stats()
    }
}

/// One buffer handed to the hardware callback.
#[derive(Debug, Clone, Copy)]
pub struct PlayBuffer<'a> {
    pub samples: &'a [i16],
    /// Fill generation, `None` for the silence buffer.
    pub generation: Option<u64>,
}

impl PlayBuffer<'_> {
    pub fn is_silence(&self) -> bool {
        self.generation.is_none()
    }
}

/// Consuming end of the ring, driven by the hardware callback.
///
/// Never blocks, allocates or calls into the mixer.
pub struct BridgeConsumer {
    ring: Arc<SlotRing>,
    cursor: usize,
    /// Slot most recently delivered; it stays full until the next delivery.
    held: Option<usize>,
    /// Samples of the held slot already copied by `read_into`.
    offset: usize,
    silence: Box<[i16]>,
    wake_tx: Sender<()>,
}

impl BridgeConsumer {
    /// Releases the previously delivered slot and delivers the next one.
    ///
    /// When the slot at the play cursor is not ready yet, delivers silence and leaves the
    /// cursor where it is so the same slot is tried again next time.
    pub fn next_buffer(&mut self) -> PlayBuffer<'_> {
        self.release_held();

        match self.acquire() {
            Some(index) => {
                let slot = &self.ring.slots[index];
                self.offset = self.ring.samples_per_slot();
                // SAFETY: `acquire` observed `ready` with Acquire; the filler leaves the
                // payload alone until this consumer clears the flag.
                let samples = unsafe { &**slot.data.get() };
                PlayBuffer {
                    samples,
                    generation: Some(slot.generation.load(Ordering::Relaxed)),
                }
            }
            None => PlayBuffer {
                samples: &self.silence,
                generation: None,
            },
        }
    }

    /// Copies interleaved samples into a callback buffer of any size, converting each one.
    ///
    /// Slots are consumed across calls as needed; whatever cannot be served from ready
    /// slots is filled with converted silence. Returns the number of mixed samples written.
    pub fn read_into<T>(&mut self, out: &mut [T], convert: impl Fn(i16) -> T) -> usize {
        let slot_len = self.ring.samples_per_slot();
        let mut written = 0;

        while written < out.len() {
            if self.held.is_none() || self.offset >= slot_len {
                self.release_held();
                if self.acquire().is_none() {
                    for sample in &mut out[written..] {
                        *sample = convert(0);
                    }
                    return written;
                }
                self.offset = 0;
            }

            let Some(index) = self.held else {
                break;
            };
            // SAFETY: the held slot stays ready until `release_held`.
            let samples = unsafe { &**self.ring.slots[index].data.get() };
            let n = (slot_len - self.offset).min(out.len() - written);
            for (dst, &src) in out[written..written + n]
                .iter_mut()
                .zip(&samples[self.offset..self.offset + n])
            {
                *dst = convert(src);
            }
            self.offset += n;
            written += n;
        }

        written
    }

    pub fn frames_per_slot(&self) -> usize {
        self.ring.frames_per_slot
    }

    pub fn stats(&self) -> BridgeStats {
        self.ring.stats()
    }

    /// Takes the slot at the play cursor if it is ready, counting an underrun otherwise.
    fn acquire(&mut self) -> Option<usize> {
        let index = self.cursor;
        if !self.ring.slots[index].ready.load(Ordering::Acquire) {
            self.ring.underruns.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.held = Some(index);
        self.cursor = (index + 1) % self.ring.slots.len();
        self.ring.buffers_delivered.fetch_add(1, Ordering::Relaxed);
        Some(index)
    }

    fn release_held(&mut self) {
        if let Some(index) = self.held.take() {
            self.ring.slots[index].ready.store(false, Ordering::Release);
            // A full wake channel already has a pending wakeup.
            let _ = self.wake_tx.try_send(());
        }
    }
}

/// Background fill thread keeping a slot ring topped up from a [`PcmSource`].
pub struct BufferBridge {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    ring: Arc<SlotRing>,
    latency: Duration,
}

impl BufferBridge {
    /// Starts the fill thread and returns it together with the consumer for the callback.
    ///
    /// The fill thread runs at normal OS priority. It keeps ahead of the callback by refilling
    /// each slot as soon as the consumer releases it.
    pub fn spawn<S: PcmSource + ?Sized>(
        source: Arc<S>,
        desc: &BridgeDesc,
        mix_rate: u32,
    ) -> Result<(Self, BridgeConsumer)> {
        let (mut filler, consumer) = slot_ring(desc)?;
        let ring = filler.ring.clone();
        let running = Arc::new(AtomicBool::new(true));
        let fill_interval = desc.fill_interval;

        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("sonomix-fill".into())
            .spawn(move || {
                log::debug!("Fill thread started");
                while thread_running.load(Ordering::Acquire) {
                    let filled =
                        filler.fill_next(|buffer, frames| source.get_pcm(buffer, frames));
                    if filled.is_none() && !filler.wait(fill_interval) {
                        break;
                    }
                }
                log::debug!("Fill thread exiting");
            })
            .map_err(|e| SonoMixError::Engine(format!("Failed to spawn fill thread: {}", e)))?;

        let latency = desc.latency(mix_rate);
        log::info!(
            "Buffer bridge started: {} slots of {} frames (~{:?} latency)",
            desc.slot_count,
            desc.frames_per_slot,
            latency
        );

        Ok((
            Self {
                running,
                handle: Some(handle),
                ring,
                latency,
            },
            consumer,
        ))
    }

    /// Stops and joins the fill thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Fill thread panicked");
            }
            let stats = self.ring.stats();
            log::info!(
                "Buffer bridge stopped: {} filled, {} delivered, {} underruns",
                stats.buffers_filled,
                stats.buffers_delivered,
                stats.underruns
            );
        }
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Worst-case delay between mixing a buffer and playing it.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn stats(&self) -> BridgeStats {
        self.ring.stats()
    }
}

impl Drop for BufferBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
