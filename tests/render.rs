//! End-to-end rendering tests against SoundFont banks assembled in memory:
//! a single sawtooth sample looped continuously, wired up through one
//! preset with configurable instrument zones.

use sfsynth::{FontError, OutputMode, Synth};

// =========================================================================
// In-memory SoundFont assembly
// =========================================================================

const GEN_INITIAL_FILTER_FC: u16 = 8;
const GEN_RELEASE_VOL_ENV: u16 = 38;
const GEN_INSTRUMENT: u16 = 41;
const GEN_KEY_RANGE: u16 = 43;
const GEN_SAMPLE_ID: u16 = 53;
const GEN_SAMPLE_MODES: u16 = 54;
const GEN_EXCLUSIVE_CLASS: u16 = 57;

const SAW_LEN: usize = 100;

fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn list(form: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::from(&form[..]);
    inner.extend_from_slice(body);
    chunk(b"LIST", &inner)
}

fn name20(name: &str) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

fn phdr(name: &str, bag: u16) -> Vec<u8> {
    let mut out = Vec::from(&name20(name)[..]);
    out.extend_from_slice(&0u16.to_le_bytes()); // program
    out.extend_from_slice(&0u16.to_le_bytes()); // bank
    out.extend_from_slice(&bag.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]); // library, genre, morphology
    out
}

fn bag(gen_index: u16) -> Vec<u8> {
    let mut out = Vec::from(&gen_index.to_le_bytes()[..]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn gen(oper: u16, amount: u16) -> Vec<u8> {
    let mut out = Vec::from(&oper.to_le_bytes()[..]);
    out.extend_from_slice(&amount.to_le_bytes());
    out
}

fn inst(name: &str, bag: u16) -> Vec<u8> {
    let mut out = Vec::from(&name20(name)[..]);
    out.extend_from_slice(&bag.to_le_bytes());
    out
}

fn shdr_saw(len: u32) -> Vec<u8> {
    let mut out = Vec::from(&name20("saw")[..]);
    out.extend_from_slice(&0u32.to_le_bytes()); // start
    out.extend_from_slice(&len.to_le_bytes()); // end
    out.extend_from_slice(&0u32.to_le_bytes()); // loop start
    out.extend_from_slice(&len.to_le_bytes()); // loop end
    out.extend_from_slice(&44100u32.to_le_bytes());
    out.push(60); // original pitch
    out.push(0); // pitch correction
    out.extend_from_slice(&[0u8; 4]); // link, type
    out
}

fn saw_samples() -> Vec<i16> {
    (0..SAW_LEN)
        .map(|i| (((i as f32 / SAW_LEN as f32) * 2.0 - 1.0) * 16000.0) as i16)
        .collect()
}

/// One preset (bank 0, program 0) routed to one instrument whose zones are
/// given as generator lists; a `SampleID` referencing the sawtooth is
/// appended to each zone.
fn build_font_ex(zones: &[&[(u16, u16)]], with_sdta: bool, with_shdr: bool) -> Vec<u8> {
    let mut igen = Vec::new();
    let mut ibag_bytes = Vec::new();
    let mut gen_cursor = 0u16;
    for zone in zones {
        ibag_bytes.extend_from_slice(&bag(gen_cursor));
        for &(oper, amount) in *zone {
            igen.extend_from_slice(&gen(oper, amount));
            gen_cursor += 1;
        }
        igen.extend_from_slice(&gen(GEN_SAMPLE_ID, 0));
        gen_cursor += 1;
    }
    ibag_bytes.extend_from_slice(&bag(gen_cursor));
    igen.extend_from_slice(&gen(0, 0)); // terminal

    let mut pdta = Vec::new();
    let mut phdr_bytes = phdr("Test", 0);
    phdr_bytes.extend_from_slice(&phdr("EOP", 1));
    pdta.extend_from_slice(&chunk(b"phdr", &phdr_bytes));
    let mut pbag_bytes = bag(0);
    pbag_bytes.extend_from_slice(&bag(1));
    pdta.extend_from_slice(&chunk(b"pbag", &pbag_bytes));
    pdta.extend_from_slice(&chunk(b"pmod", &[0u8; 10]));
    let mut pgen_bytes = gen(GEN_INSTRUMENT, 0);
    pgen_bytes.extend_from_slice(&gen(0, 0));
    pdta.extend_from_slice(&chunk(b"pgen", &pgen_bytes));
    let mut inst_bytes = inst("sawinst", 0);
    inst_bytes.extend_from_slice(&inst("EOI", zones.len() as u16));
    pdta.extend_from_slice(&chunk(b"inst", &inst_bytes));
    pdta.extend_from_slice(&chunk(b"ibag", &ibag_bytes));
    pdta.extend_from_slice(&chunk(b"imod", &[0u8; 10]));
    pdta.extend_from_slice(&chunk(b"igen", &igen));
    if with_shdr {
        let mut shdr_bytes = shdr_saw(SAW_LEN as u32);
        shdr_bytes.extend_from_slice(&[0u8; 46]); // EOS
        pdta.extend_from_slice(&chunk(b"shdr", &shdr_bytes));
    }

    let mut body = Vec::from(&b"sfbk"[..]);
    body.extend_from_slice(&list(b"INFO", &chunk(b"ifil", &[2, 0, 1, 0])));
    if with_sdta {
        let mut smpl = Vec::new();
        for s in saw_samples() {
            smpl.extend_from_slice(&s.to_le_bytes());
        }
        body.extend_from_slice(&list(b"sdta", &chunk(b"smpl", &smpl)));
    }
    body.extend_from_slice(&list(b"pdta", &pdta));
    chunk(b"RIFF", &body)
}

fn build_font(zones: &[&[(u16, u16)]]) -> Vec<u8> {
    build_font_ex(zones, true, true)
}

/// The minimal patch: one full-range region looping the sawtooth.
fn saw_font() -> Vec<u8> {
    build_font(&[&[(GEN_SAMPLE_MODES, 1)]])
}

fn lo_hi(lo: u8, hi: u8) -> u16 {
    u16::from_le_bytes([lo, hi])
}

fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
}

// =========================================================================
// Loading
// =========================================================================

#[test]
fn loads_the_minimal_saw_patch() {
    let synth = Synth::load_memory(&saw_font()).unwrap();
    assert_eq!(synth.preset_count(), 1);
    assert_eq!(synth.preset_index(0, 0), Some(0));
    assert_eq!(synth.preset_index(0, 1), None);
    assert_eq!(synth.preset_name(0), Some("Test"));
    assert_eq!(synth.bank_preset_name(0, 0), Some("Test"));
    assert_eq!(synth.presets()[0].regions.len(), 1);

    let region = &synth.presets()[0].regions[0];
    assert!(region.lokey <= region.hikey);
    assert!(region.lovel <= region.hivel);
    assert!(region.pan >= -100.0 && region.pan <= 100.0);
    assert!(region.volume <= 6.0);
    assert_eq!(region.loop_end, SAW_LEN as u32 - 1);
}

#[test]
fn load_failures_are_classified() {
    assert!(matches!(
        Synth::load_memory(&build_font_ex(&[&[]], false, true)),
        Err(FontError::NoSampleData)
    ));
    assert!(matches!(
        Synth::load_memory(&build_font_ex(&[&[]], true, false)),
        Err(FontError::IncompleteHydra)
    ));
    assert!(matches!(
        Synth::load_memory(b"RIFFxxxx"),
        Err(FontError::NoSfbkHeader)
    ));
}

// =========================================================================
// Rendering scenarios
// =========================================================================

#[test]
fn two_looping_voices_sound_for_three_seconds() {
    let mut synth = Synth::load_memory(&saw_font()).unwrap();
    synth.set_output(OutputMode::StereoInterleaved, 44100, -10.0);
    synth.note_on(0, 48, 1.0);
    synth.note_on(0, 52, 1.0);
    assert_eq!(synth.active_voices(), 2);

    let frames = 44100 * 3;
    let mut buffer = vec![0i16; frames * 2];
    synth.render_short(&mut buffer, frames, false);

    let first = &buffer[..44100 * 2];
    let last = &buffer[(frames - 44100) * 2..];
    let int_peak = |b: &[i16]| b.iter().map(|s| (*s as i32).abs()).max().unwrap();
    assert!(int_peak(first) > 1000, "start went silent");
    assert!(int_peak(last) > 1000, "loop went silent");
    assert_eq!(synth.active_voices(), 2);
}

#[test]
fn half_velocity_attenuates_by_six_decibels() {
    let frames = 4410;
    let render = |vel: f32| {
        let mut synth = Synth::load_memory(&saw_font()).unwrap();
        synth.set_output(OutputMode::Mono, 44100, 0.0);
        synth.note_on(0, 60, vel);
        let mut buffer = vec![0f32; frames];
        synth.render_float(&mut buffer, frames, false);
        peak(&buffer)
    };
    let full = render(1.0);
    let half = render(0.5);
    assert!(full > 0.1);
    let ratio = half / full;
    assert!((ratio - 0.5).abs() < 0.01, "ratio {ratio}");
}

#[test]
fn centered_pitch_wheel_plays_the_sample_verbatim() {
    // Key 60 at the sample's own rate: the resampler must step exactly one
    // source sample per output sample, and the loop must restart without a
    // discontinuity. The cutoff sits above 13500 cents so the low-pass
    // stays out of the signal path (the default of exactly 13500 keeps it
    // in).
    let zone = [(GEN_SAMPLE_MODES, 1), (GEN_INITIAL_FILTER_FC, 14000)];
    let font = build_font(&[&zone]);
    let mut synth = Synth::load_memory(&font).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 0.0);
    synth.note_on(0, 60, 1.0);

    let frames = SAW_LEN * 3;
    let mut buffer = vec![0f32; frames];
    synth.render_float(&mut buffer, frames, false);

    let pool: Vec<f32> = saw_samples()
        .iter()
        .map(|&s| (s as f64 / 32767.0) as f32)
        .collect();
    for (i, &out) in buffer.iter().enumerate() {
        let expected = pool[i % SAW_LEN];
        assert!(
            (out - expected).abs() < 1e-6,
            "frame {i}: {out} vs {expected}"
        );
    }
}

#[test]
fn unweaved_output_matches_interleaved_channels() {
    let frames = 1000;
    let render = |mode: OutputMode| {
        let mut synth = Synth::load_memory(&saw_font()).unwrap();
        synth.set_output(mode, 44100, 0.0);
        synth.set_panning(0.8, 1.2);
        synth.note_on(0, 57, 1.0);
        let mut buffer = vec![0f32; frames * 2];
        synth.render_float(&mut buffer, frames, false);
        buffer
    };
    let interleaved = render(OutputMode::StereoInterleaved);
    let unweaved = render(OutputMode::StereoUnweaved);
    for i in 0..frames {
        assert_eq!(interleaved[i * 2].to_bits(), unweaved[i].to_bits());
        assert_eq!(interleaved[i * 2 + 1].to_bits(), unweaved[frames + i].to_bits());
    }
}

#[test]
fn mixing_render_conserves_against_overwrite() {
    let frames = 2048;
    let run = |mixing: bool| {
        let mut synth = Synth::load_memory(&saw_font()).unwrap();
        synth.set_output(OutputMode::StereoInterleaved, 48000, -3.0);
        synth.note_on(0, 64, 0.9);
        let mut buffer = vec![0f32; frames * 2];
        synth.render_float(&mut buffer, frames, mixing);
        buffer
    };
    let overwrite = run(false);
    let mixed_into_zeros = run(true);
    for (a, b) in overwrite.iter().zip(mixed_into_zeros.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn note_off_is_idempotent_for_a_single_strike() {
    let frames = 4096;
    let run = |double_off: bool| {
        let mut synth = Synth::load_memory(&saw_font()).unwrap();
        synth.set_output(OutputMode::Mono, 44100, 0.0);
        synth.note_on(0, 60, 1.0);
        let mut warmup = vec![0f32; frames];
        synth.render_float(&mut warmup, frames, false);
        synth.note_off(0, 60);
        if double_off {
            synth.note_off(0, 60);
        }
        let mut buffer = vec![0f32; frames];
        synth.render_float(&mut buffer, frames, false);
        buffer
    };
    let once = run(false);
    let twice = run(true);
    for (a, b) in once.iter().zip(twice.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn note_off_releases_strikes_oldest_first() {
    let mut synth = Synth::load_memory(&saw_font()).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 0.0);
    synth.note_on(0, 60, 1.0);
    synth.note_on(0, 60, 1.0);
    assert_eq!(synth.active_voices(), 2);

    // Default release resolves to the 10 ms grace window; 0.1 s of audio
    // is enough for a released voice to finish and free its slot.
    let mut buffer = vec![0f32; 4410];
    synth.note_off(0, 60);
    synth.render_float(&mut buffer, 4410, false);
    assert_eq!(synth.active_voices(), 1);

    synth.note_off(0, 60);
    synth.render_float(&mut buffer, 4410, false);
    assert_eq!(synth.active_voices(), 0);
}

#[test]
fn exclusive_class_forces_the_previous_note_out() {
    let low = [
        (GEN_KEY_RANGE, lo_hi(0, 63)),
        (GEN_EXCLUSIVE_CLASS, 7),
        (GEN_SAMPLE_MODES, 1),
    ];
    let high = [
        (GEN_KEY_RANGE, lo_hi(64, 127)),
        (GEN_EXCLUSIVE_CLASS, 7),
        (GEN_SAMPLE_MODES, 1),
    ];
    let font = build_font(&[&low, &high]);
    let mut synth = Synth::load_memory(&font).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 0.0);

    synth.note_on(0, 36, 1.0);
    assert_eq!(synth.active_voices(), 1);
    synth.note_on(0, 96, 1.0);
    assert_eq!(synth.active_voices(), 2);

    // The takeover pushed the first voice into a zero-time release; one
    // render block later it is gone while the new note keeps sounding.
    let mut buffer = vec![0f32; 2205];
    synth.render_float(&mut buffer, 2205, false);
    assert_eq!(synth.active_voices(), 1);
}

#[test]
fn all_notes_decay_to_silence_after_note_off_all() {
    // Half-second release (-1200 timecents).
    let zone = [
        (GEN_SAMPLE_MODES, 1),
        (GEN_RELEASE_VOL_ENV, (-1200i16) as u16),
    ];
    let font = build_font(&[&zone]);
    let mut synth = Synth::load_memory(&font).unwrap();
    synth.set_output(OutputMode::StereoInterleaved, 44100, 0.0);
    synth.note_on(0, 55, 1.0);
    synth.note_on(0, 62, 0.8);

    let mut buffer = vec![0f32; 44100 * 2];
    synth.render_float(&mut buffer, 44100, false);
    assert!(peak(&buffer) > 0.1);

    synth.note_off_all();
    // Monotone decay through the release, measured in 50 ms windows.
    let window = 2205;
    let mut last_peak = f32::MAX;
    for _ in 0..10 {
        let mut chunk = vec![0f32; window * 2];
        synth.render_float(&mut chunk, window, false);
        let p = peak(&chunk);
        assert!(p <= last_peak + 1e-6, "release did not decay: {p} > {last_peak}");
        last_peak = p;
    }

    // Render past the full release: residual energy under -80 dBFS.
    synth.render_float(&mut buffer, 44100, false);
    let mut tail = vec![0f32; 4410 * 2];
    synth.render_float(&mut tail, 4410, false);
    assert!(peak(&tail) < 1e-4, "tail peak {}", peak(&tail));
}

#[test]
fn short_render_saturates_instead_of_wrapping() {
    // +40 dB of global gain drives the float bus far past full scale.
    let mut synth = Synth::load_memory(&saw_font()).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 40.0);
    synth.note_on(0, 60, 1.0);
    let frames = SAW_LEN * 2;
    let mut buffer = vec![0i16; frames];
    synth.render_short(&mut buffer, frames, false);
    assert_eq!(*buffer.iter().max().unwrap(), 32767);
    assert_eq!(*buffer.iter().min().unwrap(), -32768);

    // Mixing into hot existing data clamps instead of overflowing.
    let mut synth = Synth::load_memory(&saw_font()).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 0.0);
    synth.note_on(0, 60, 1.0);
    let mut buffer = vec![30000i16; frames];
    synth.render_short(&mut buffer, frames, true);
    assert!(buffer.iter().all(|&s| s >= 0), "mix wrapped around");
    assert!(buffer.iter().any(|&s| s == 32767), "mix never saturated");
}

#[test]
fn velocity_zero_routes_to_note_off() {
    let mut synth = Synth::load_memory(&saw_font()).unwrap();
    synth.set_output(OutputMode::Mono, 44100, 0.0);
    synth.note_on(0, 60, 1.0);
    assert_eq!(synth.active_voices(), 1);
    synth.note_on(0, 60, 0.0);

    let mut buffer = vec![0f32; 4410];
    synth.render_float(&mut buffer, 4410, false);
    assert_eq!(synth.active_voices(), 0);

    // Events against absent presets and keys stay no-ops.
    synth.note_on(99, 60, 1.0);
    synth.note_off(99, 60);
    synth.note_off(0, 61);
    assert_eq!(synth.active_voices(), 0);
}
