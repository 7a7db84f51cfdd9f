//! Logarithmic unit conversions shared by the loader and the voice DSP.
//!
//! Timecents encode durations (`seconds = 2^(tc/1200)`), absolute cents
//! encode frequencies relative to 8.176 Hz, and gains travel as decibels
//! until the moment a sample is scaled.

pub fn timecents_to_seconds(timecents: f64) -> f64 {
    2.0_f64.powf(timecents / 1200.0)
}

pub fn timecents_to_seconds_f(timecents: f32) -> f32 {
    2.0_f32.powf(timecents / 1200.0)
}

pub fn cents_to_hertz(cents: f32) -> f32 {
    8.176 * 2.0_f32.powf(cents / 1200.0)
}

/// Decibels to a linear gain factor. Anything at or below -100 dB is treated
/// as silence so fully attenuated voices multiply by exactly zero.
pub fn gain(decibels: f32) -> f32 {
    if decibels > -100.0 {
        10.0_f32.powf(decibels * 0.05)
    } else {
        0.0
    }
}

pub fn decibels(gain: f32) -> f32 {
    20.0 * gain.log10()
}
