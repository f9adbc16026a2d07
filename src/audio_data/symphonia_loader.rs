use crate::{
    audio_data::{LoadOptions, PcmClip},
    error::{Result, SonoMixError},
};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Decodes a whole audio file into a [`PcmClip`].
///
/// Files with more than two channels keep their first two. Mono conversion averages the
/// kept channels unless `options.mono_channel` selects one.
pub fn load_audio_file(path: &str, options: &LoadOptions) -> Result<PcmClip> {
    let file = File::open(path)?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SonoMixError::AudioLoading(format!("Failed to probe audio format: {:?}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| SonoMixError::AudioLoading("No default audio track found".to_string()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SonoMixError::AudioLoading("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| SonoMixError::AudioLoading("Channel count not found".to_string()))?
        .count();

    if let Some(mono_ch) = options.mono_channel {
        if mono_ch >= channels {
            return Err(SonoMixError::AudioFormat(format!(
                "Channel {} out of range (max: {})",
                mono_ch,
                channels - 1
            )));
        }
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SonoMixError::AudioLoading(format!("Failed to create decoder: {:?}", e)))?;

    let max_frames = options
        .max_duration
        .map(|d| (d.as_secs_f64() * sample_rate as f64) as usize)
        .unwrap_or(usize::MAX);

    let mono = options.convert_to_mono || channels == 1;
    let out_channels = if mono { 1 } else { 2 };
    let mut samples: Vec<i16> = Vec::new();
    let mut frames_decoded = 0;

    while frames_decoded < max_frames {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(SonoMixError::AudioLoading(format!(
                    "Error reading packet: {:?}",
                    e
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break,
            Err(Error::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet in {}: {}", path, e);
                continue;
            }
            Err(e) => {
                return Err(SonoMixError::AudioLoading(format!(
                    "Error decoding packet: {:?}",
                    e
                )));
            }
        };

        let spec = *decoded.spec();
        let mut tmp = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        for frame in tmp.samples().chunks_exact(channels) {
            if frames_decoded >= max_frames {
                break;
            }
            if mono {
                let value = match options.mono_channel {
                    Some(ch) => frame[ch],
                    None => {
                        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                        (sum / channels as i32) as i16
                    }
                };
                samples.push(value);
            } else {
                samples.push(frame[0]);
                samples.push(frame[1]);
            }
            frames_decoded += 1;
        }
    }

    log::info!(
        "Loaded {}: {} frames, {} Hz, {} channel(s) (source had {})",
        path,
        frames_decoded,
        sample_rate,
        out_channels,
        channels
    );

    PcmClip::new(samples, sample_rate, !mono)
}
