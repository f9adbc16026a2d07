use sonomix::decoder::{ToneDecoder, Waveform};
use sonomix::{BridgeDesc, DecodeParams, Decoder, LoopMode, Mixer, PcmClip, SonoMixEngine};
use std::sync::Arc;
use std::time::Duration;

/// Plays two tones through the default output device, fading one out, and optionally a
/// file given on the command line.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mixer = Arc::new(Mixer::new());
    if !mixer.init(8, 48000) {
        anyhow::bail!("failed to initialize mixer");
    }

    let a4 = |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
        let sine = Waveform::Sine { frequency: 440.0 };
        let tone = ToneDecoder::new(sine, 6000, params.native_sample_rate, params.stereo);
        Some(Box::new(tone))
    };
    let e5 = |params: &mut DecodeParams| -> Option<Box<dyn Decoder>> {
        let sine = Waveform::Sine { frequency: 659.25 };
        let tone = ToneDecoder::new(sine, 4000, params.native_sample_rate, params.stereo);
        Some(Box::new(tone))
    };
    mixer.setdata(1, Some(a4), false);
    mixer.setdata(2, Some(e5), false);
    mixer.setpan(1, -0.5);
    mixer.setpan(2, 0.5);

    if let Some(path) = std::env::args().nth(1) {
        let clip = PcmClip::from_path(&path)?;
        println!("Loaded {} ({:.2}s)", path, clip.duration().as_secs_f32());
        mixer.setdata(3, Some(clip.opener(LoopMode::Once, true)), clip.is_stereo());
        mixer.start(3);
    }

    let mut engine = SonoMixEngine::new(mixer.clone(), BridgeDesc::default())?;
    engine.start()?;

    mixer.start(1);
    mixer.start(2);
    mixer.setfade(2, 0.0, 2.0, true);
    println!("Playing two tones, fading the upper one out over 2 seconds...");

    for _ in 0..6 {
        std::thread::sleep(Duration::from_millis(500));
        for event in mixer.poll_events() {
            println!("Event: {:?}", event);
        }
    }

    println!("Frames processed: {}", engine.frames_processed());
    if let Some(stats) = engine.bridge_stats() {
        println!("Bridge: {:?}", stats);
    }

    engine.stop()?;
    mixer.cleanup();
    Ok(())
}
