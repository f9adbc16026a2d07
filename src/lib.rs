//! SonoMix: a software channel mixer with a lock-free buffering bridge.
//!
//! Decoders are bound to mixer channels, the [`Mixer`] scales, pans, fades and sums them into
//! interleaved stereo 16-bit PCM, and a [`BufferBridge`] keeps a real-time audio callback fed
//! from a background fill thread. The optional `backend` feature plays the result through
//! cpal with [`SonoMixEngine`].

pub mod audio_data;
pub mod bridge;
pub mod config;
pub mod decoder;
#[cfg(feature = "backend")]
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod mixer;
pub mod playback;

pub use audio_data::{LoadOptions, PcmClip, load_audio_file};
pub use bridge::{BridgeConsumer, BridgeFiller, BridgeStats, BufferBridge, PcmSource, PlayBuffer};
pub use config::{BridgeDesc, MixerDesc};
pub use decoder::{DecodeParams, Decoder, DecoderOpen, LoopMode, PcmRead};
#[cfg(feature = "backend")]
pub use engine::SonoMixEngine;
pub use error::{Result, SonoMixError};
pub use events::MixerEvent;
pub use mixer::Mixer;
