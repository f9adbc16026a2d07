//! Error types for SonoMix

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonoMixError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Mixer is already initialized")]
    AlreadyInitialized,

    #[error("Mixer is not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, SonoMixError>;
