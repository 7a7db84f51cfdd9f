//! The synthesizer: owns the compiled presets, the normalized sample pool
//! and the voice pool, and turns note events into PCM. Not internally
//! thread-safe; a host that pushes events from one thread while rendering
//! on another must serialize the calls (a short mutex around both is the
//! usual arrangement). Nothing here spawns threads or keeps global state,
//! and apart from the occasional voice-pool growth in [`Synth::note_on`]
//! the event and render paths do not allocate.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

use crate::dtype::FontError;
use crate::hydra::{read_sample_pool, Hydra};
use crate::preset::{self, Preset};
use crate::riff::{read_riff_chunk, skip_bytes, FontSource};
use crate::voice::{EnvelopeSegment, Voice};

/// How rendered frames are laid out in the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Left/right pairs, one after another.
    #[default]
    StereoInterleaved,
    /// All left samples first, then all right samples.
    StereoUnweaved,
    /// Single channel; stereo placement collapses to the average.
    Mono,
}

impl OutputMode {
    pub fn channels(self) -> usize {
        match self {
            OutputMode::Mono => 1,
            _ => 2,
        }
    }
}

// Quantization thresholds for the float -> i16 conversion. Values past
// these rails map to the extreme codes instead of wrapping.
const SHORT_CLIP_LO: f32 = -1.00004566;
const SHORT_CLIP_HI: f32 = 1.00001514;

pub struct Synth {
    presets: Vec<Preset>,
    /// Normalized samples plus one trailing guard zero; `sample_count` is
    /// the logical length without the guard.
    sample_pool: Vec<f32>,
    sample_count: usize,
    voices: Vec<Voice>,
    voice_play_index: u32,
    out_sample_rate: f32,
    output_mode: OutputMode,
    global_gain_db: f32,
    global_pan_left: f32,
    global_pan_right: f32,
    scratch: Vec<f32>,
}

impl Synth {
    /// Parses a SoundFont from any byte source. The hydra arrays live only
    /// for the duration of this call; the returned synthesizer owns just
    /// the compiled presets and the sample pool.
    pub fn load<R: FontSource>(reader: &mut R) -> Result<Synth, FontError> {
        let mut head = match read_riff_chunk(reader, None) {
            Some(chunk) if chunk.is(b"sfbk") => chunk,
            _ => return Err(FontError::NoSfbkHeader),
        };

        let mut hydra = Hydra::default();
        let mut sample_pool: Option<Vec<f32>> = None;
        while let Some(mut list) = read_riff_chunk(reader, Some(&mut head)) {
            if list.is(b"pdta") {
                hydra.read_pdta(reader, &mut list)?;
            } else if list.is(b"sdta") {
                while let Some(chunk) = read_riff_chunk(reader, Some(&mut list)) {
                    if chunk.is(b"smpl") {
                        sample_pool = Some(read_sample_pool(reader, &chunk)?);
                    } else {
                        skip_bytes(reader, chunk.size)?;
                    }
                }
            } else {
                skip_bytes(reader, list.size)?;
            }
        }

        if !hydra.is_complete() {
            return Err(FontError::IncompleteHydra);
        }
        let sample_pool = sample_pool.ok_or(FontError::NoSampleData)?;
        let sample_count = sample_pool.len() - 1;
        let presets = preset::compile_presets(&hydra);

        Ok(Synth {
            presets,
            sample_pool,
            sample_count,
            voices: Vec::new(),
            voice_play_index: 0,
            out_sample_rate: 44100.0,
            output_mode: OutputMode::StereoInterleaved,
            global_gain_db: 0.0,
            global_pan_left: 1.0,
            global_pan_right: 1.0,
            scratch: Vec::new(),
        })
    }

    pub fn load_memory(bytes: &[u8]) -> Result<Synth, FontError> {
        Synth::load(&mut Cursor::new(bytes))
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Synth, FontError> {
        let file = File::open(path.as_ref())
            .map_err(|_| FontError::FileNotFound(path.as_ref().to_path_buf()))?;
        Synth::load(&mut BufReader::new(file))
    }

    pub fn preset_count(&self) -> usize {
        self.presets.len()
    }

    /// Position of a `(bank, program)` pair in the sorted preset list.
    pub fn preset_index(&self, bank: u16, program: u16) -> Option<usize> {
        self.presets
            .iter()
            .position(|p| p.program == program && p.bank == bank)
    }

    pub fn preset_name(&self, preset_index: usize) -> Option<&str> {
        self.presets.get(preset_index).map(|p| p.name.as_str())
    }

    pub fn bank_preset_name(&self, bank: u16, program: u16) -> Option<&str> {
        self.preset_name(self.preset_index(bank, program)?)
    }

    /// The compiled presets, ordered by `(bank, program)`.
    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    /// Configures the render output. A sample rate below 1 falls back to
    /// 44100 Hz.
    pub fn set_output(&mut self, output_mode: OutputMode, sample_rate: u32, global_gain_db: f32) {
        self.out_sample_rate = if sample_rate >= 1 { sample_rate as f32 } else { 44100.0 };
        self.output_mode = output_mode;
        self.global_gain_db = global_gain_db;
    }

    /// Per-channel gain factors applied on top of region panning. Mono
    /// output uses the average of the two.
    pub fn set_panning(&mut self, pan_factor_left: f32, pan_factor_right: f32) {
        self.global_pan_left = pan_factor_left;
        self.global_pan_right = pan_factor_right;
    }

    /// Starts every region of the preset that matches the key/velocity
    /// rectangle, all sharing one play index. Velocity is `0.0..=1.0`;
    /// anything at or below zero is a note-off. Out-of-range preset
    /// indices are ignored.
    pub fn note_on(&mut self, preset_index: usize, key: u8, vel: f32) {
        if preset_index >= self.presets.len() {
            return;
        }
        if vel <= 0.0 {
            self.note_off(preset_index, key);
            return;
        }
        let midi_velocity = (vel * 127.0) as i32;
        let out_sample_rate = self.out_sample_rate;
        let global_gain_db = self.global_gain_db;
        let sample_count = self.sample_count;

        let play_index = self.voice_play_index;
        self.voice_play_index = self.voice_play_index.wrapping_add(1);

        let Synth { ref presets, ref mut voices, .. } = *self;

        // Whether any voice of this preset belongs to an exclusive class;
        // only then is the takeover scan below worth running.
        let mut have_grouped_notes_playing = false;
        for voice in voices.iter() {
            if voice.playing_preset != preset_index as i32 {
                continue;
            }
            if presets[preset_index].regions[voice.region_index].group != 0 {
                have_grouped_notes_playing = true;
            }
        }

        for (region_index, region) in presets[preset_index].regions.iter().enumerate() {
            if key < region.lokey
                || key > region.hikey
                || midi_velocity < region.lovel as i32
                || midi_velocity > region.hivel as i32
            {
                continue;
            }

            if have_grouped_notes_playing && region.group != 0 {
                for voice in voices.iter_mut() {
                    if voice.playing_preset == preset_index as i32
                        && presets[preset_index].regions[voice.region_index].group == region.group
                    {
                        voice.end_quick(out_sample_rate);
                    }
                }
            }

            let slot = match voices.iter().position(Voice::is_free) {
                Some(slot) => slot,
                None => {
                    let slot = voices.len();
                    voices.extend((0..4).map(|_| Voice::free()));
                    slot
                }
            };
            voices[slot].start(
                region,
                region_index,
                preset_index,
                key,
                vel,
                play_index,
                global_gain_db,
                sample_count,
                out_sample_rate,
            );
        }
    }

    pub fn bank_note_on(&mut self, bank: u16, program: u16, key: u8, vel: f32) {
        if let Some(preset_index) = self.preset_index(bank, program) {
            self.note_on(preset_index, key, vel);
        }
    }

    /// Releases the oldest still-held strike of `key` on the preset: every
    /// voice born from that one note-on (they share a play index) moves to
    /// its release segment together. Later strikes of the same key keep
    /// ringing until their own note-off. A no-op when nothing matches.
    pub fn note_off(&mut self, preset_index: usize, key: u8) {
        let out_sample_rate = self.out_sample_rate;
        let Synth { ref presets, ref mut voices, .. } = *self;

        let matches = |voice: &Voice| {
            voice.playing_preset == preset_index as i32
                && voice.playing_key == key
                && voice.ampenv.segment < EnvelopeSegment::Release
        };

        let mut oldest_play_index: Option<u32> = None;
        for voice in voices.iter() {
            if !matches(voice) {
                continue;
            }
            oldest_play_index = Some(match oldest_play_index {
                Some(oldest) => oldest.min(voice.play_index),
                None => voice.play_index,
            });
        }
        let Some(play_index) = oldest_play_index else { return };

        for voice in voices.iter_mut() {
            if matches(voice) && voice.play_index == play_index {
                let region = &presets[preset_index].regions[voice.region_index];
                voice.end(region, out_sample_rate);
            }
        }
    }

    pub fn bank_note_off(&mut self, bank: u16, program: u16, key: u8) {
        if let Some(preset_index) = self.preset_index(bank, program) {
            self.note_off(preset_index, key);
        }
    }

    /// Moves every sounding voice into its release segment.
    pub fn note_off_all(&mut self) {
        let out_sample_rate = self.out_sample_rate;
        let Synth { ref presets, ref mut voices, .. } = *self;
        for voice in voices.iter_mut() {
            if voice.is_free() || voice.ampenv.segment >= EnvelopeSegment::Release {
                continue;
            }
            let region =
                &presets[voice.playing_preset as usize].regions[voice.region_index];
            voice.end(region, out_sample_rate);
        }
    }

    /// Number of voices currently sounding (including releases).
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    /// Renders `samples` frames of float audio. `buffer` must hold
    /// `samples × channels` values for the configured output mode; it is
    /// zeroed first unless `mixing` asks to accumulate into existing data.
    pub fn render_float(&mut self, buffer: &mut [f32], samples: usize, mixing: bool) {
        let buffer = &mut buffer[..self.output_mode.channels() * samples];
        if !mixing {
            buffer.fill(0.0);
        }
        let out_sample_rate = self.out_sample_rate;
        let output_mode = self.output_mode;
        let (global_pan_left, global_pan_right) = (self.global_pan_left, self.global_pan_right);
        let Synth { ref presets, ref sample_pool, ref mut voices, .. } = *self;
        for voice in voices.iter_mut() {
            if voice.is_free() {
                continue;
            }
            let region =
                &presets[voice.playing_preset as usize].regions[voice.region_index];
            voice.render(
                region,
                sample_pool,
                buffer,
                output_mode,
                global_pan_left,
                global_pan_right,
                out_sample_rate,
                samples,
            );
        }
    }

    /// Renders `samples` frames as signed 16-bit PCM through a retained
    /// scratch float bus (grown on demand, never shrunk). When mixing, the
    /// new audio is added to the existing buffer contents with saturation.
    pub fn render_short(&mut self, buffer: &mut [i16], samples: usize, mixing: bool) {
        let needed = self.output_mode.channels() * samples;
        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.len() < needed {
            scratch.resize(needed, 0.0);
        }
        self.render_float(&mut scratch[..needed], samples, false);

        let buffer = &mut buffer[..needed];
        if mixing {
            for (out, &value) in buffer.iter_mut().zip(scratch.iter()) {
                let mixed = *out as i32 + quantize(value) as i32;
                *out = mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
        } else {
            for (out, &value) in buffer.iter_mut().zip(scratch.iter()) {
                *out = quantize(value);
            }
        }
        self.scratch = scratch;
    }
}

fn quantize(value: f32) -> i16 {
    if value < SHORT_CLIP_LO {
        i16::MIN
    } else if value > SHORT_CLIP_HI {
        i16::MAX
    } else {
        (value * 32767.5) as i16
    }
}
