//! Gain, pan and clipping arithmetic shared by the mixing pass.

/// Default global attenuation. At this value a lone channel at unity volume passes through
/// unchanged.
pub const DEFAULT_BASE_VOLUME: f32 = 0.5;

/// Upper bound for the global attenuation factor.
pub const MAX_BASE_VOLUME: f32 = 16.0;

/// Upper bound for a single channel's volume.
pub const MAX_VOLUME: f32 = 16.0;

pub fn clamp_base_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return DEFAULT_BASE_VOLUME;
    }
    volume.clamp(0.0, MAX_BASE_VOLUME)
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}

pub fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        return 0.0;
    }
    pan.clamp(-1.0, 1.0)
}

/// Overall gain of a channel: its volume scaled by the global base volume, normalised so
/// that [`DEFAULT_BASE_VOLUME`] is unity.
#[inline]
pub fn channel_gain(volume: f32, base_volume: f32) -> f32 {
    volume * base_volume / DEFAULT_BASE_VOLUME
}

/// Left/right gains for a mono source.
///
/// The side the source is panned towards gains what the other side loses, so
/// `left / right == (1 - pan) / (1 + pan)`.
#[inline]
pub fn pan_gains(gain: f32, pan: f32) -> (f32, f32) {
    (gain * (1.0 - pan), gain * (1.0 + pan))
}

/// Applies gain and balance to one stereo frame.
///
/// Panning left attenuates the right input by `1 + pan` and moves the removed part of it
/// into the left output; panning right is symmetric.
#[inline]
pub fn pan_stereo(left: f32, right: f32, gain: f32, pan: f32) -> (f32, f32) {
    if pan < 0.0 {
        let moved = -pan;
        (gain * (left + right * moved), gain * right * (1.0 + pan))
    } else if pan > 0.0 {
        (gain * left * (1.0 - pan), gain * (right + left * pan))
    } else {
        (gain * left, gain * right)
    }
}

/// Rounds a scaled sample into the accumulator domain.
#[inline]
pub fn to_accum(sample: f32) -> i32 {
    // f32 -> i32 casts saturate, so runaway gains cannot wrap.
    sample.round() as i32
}

#[inline]
pub fn clip_i16(sample: i32) -> i16 {
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
