//! SoundFont 2 loading and polyphonic rendering.
//!
//! [`Synth`] parses a SoundFont 2 bank from any [`riff::FontSource`] and
//! renders note events into caller-provided PCM buffers. Audio device I/O,
//! MIDI file handling and thread synchronization are left to the host.

pub mod dtype;
pub mod fileutils;
pub mod hydra;
pub mod math;
pub mod preset;
pub mod riff;
pub mod synth;
mod voice;

pub use dtype::FontError;
pub use preset::{Envelope, LoopMode, Preset, Region};
pub use synth::{OutputMode, Synth};
