//! cpal output backend driving a [`BufferBridge`] from the hardware callback.

use crate::bridge::{BridgeConsumer, BufferBridge, BridgeStats};
use crate::config::BridgeDesc;
use crate::error::{Result, SonoMixError};
use crate::mixer::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Plays a [`Mixer`] on the default output device.
///
/// The mixer runs on the bridge's fill thread; the device callback only copies finished
/// buffers out of the ring.
pub struct SonoMixEngine {
    mixer: Arc<Mixer>,
    desc: BridgeDesc,
    stream: Option<cpal::Stream>,
    bridge: Option<BufferBridge>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl SonoMixEngine {
    /// Create a new engine for an initialized mixer
    pub fn new(mixer: Arc<Mixer>, desc: BridgeDesc) -> Result<Self> {
        desc.validate()?;
        Ok(Self {
            mixer,
            desc,
            stream: None,
            bridge: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Start the fill thread and open an output stream at the mixer's rate
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mix_rate = self.mixer.mix_rate().ok_or(SonoMixError::NotInitialized)?;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            SonoMixError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(mix_rate),
            buffer_size: cpal::BufferSize::Fixed(self.desc.frames_per_slot as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            SonoMixError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let (bridge, consumer) = BufferBridge::spawn(self.mixer.clone(), &self.desc, mix_rate)?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config, consumer)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config, consumer)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config, consumer)?,
            format => {
                return Err(SonoMixError::AudioFormat(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        };

        stream.play().map_err(|e| {
            SonoMixError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Audio engine started: {} Hz stereo, {:?} device format",
            mix_rate,
            default_config.sample_format()
        );

        self.stream = Some(stream);
        self.bridge = Some(bridge);
        self.is_running.store(true, Ordering::Relaxed);

        Ok(())
    }

    /// Stop the output stream, then the fill thread
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.stop();
            log::info!("Audio engine stopped after {} frames", self.frames_processed());
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Stereo frames handed to the device since creation
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Ring counters, `None` while stopped
    pub fn bridge_stats(&self) -> Option<BridgeStats> {
        self.bridge.as_ref().map(BufferBridge::stats)
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn config(&self) -> &BridgeDesc {
        &self.desc
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: BridgeConsumer,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<i16>,
    {
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        data.fill(T::from_sample(0i16));
                        return;
                    }

                    let written = consumer.read_into(data, |s| T::from_sample(s));
                    frames_processed.fetch_add(written / 2, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| SonoMixError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl Drop for SonoMixEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
