//! Per-voice DSP state: the two envelope generators, the two triangle LFOs,
//! the dynamic low-pass biquad and the resampling inner loop. Everything
//! here runs on the audio path and never allocates.

use crate::math;
use crate::preset::{Envelope, LoopMode, Region};
use crate::synth::OutputMode;

/// Modulation granularity of the render loop. Envelopes and LFOs advance in
/// blocks of at most this many samples; the filter and pitch pick up their
/// modulated values once per block.
pub(crate) const RENDER_EFFECT_SAMPLE_BLOCK: usize = 64;

/// Grace release applied when a voice is stopped with a zero release time,
/// so forced note ends do not click.
const FAST_RELEASE_TIME: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub(crate) enum EnvelopeSegment {
    #[default]
    None,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Done,
}

/// Runtime state of one envelope generator. Each segment is described by an
/// entry level, a per-sample slope (additive, or multiplicative for the
/// exponential segments of the amplitude envelope) and a sample countdown;
/// zero-length segments fall straight through to the next one.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VoiceEnvelope {
    pub level: f32,
    slope: f32,
    samples_until_next: i32,
    pub segment: EnvelopeSegment,
    parameters: Envelope,
    segment_is_exponential: bool,
    exponential_decay: bool,
}

impl VoiceEnvelope {
    pub fn setup(
        &mut self,
        parameters: &Envelope,
        midi_key: u8,
        exponential_decay: bool,
        out_sample_rate: f32,
    ) {
        self.parameters = *parameters;
        // Key-number tracked hold/decay arrive in timecents and resolve
        // here, where the key is known.
        if self.parameters.keynum_to_hold != 0.0 {
            self.parameters.hold += self.parameters.keynum_to_hold * (60.0 - midi_key as f32);
            self.parameters.hold = if self.parameters.hold < -10000.0 {
                0.0
            } else {
                math::timecents_to_seconds_f(self.parameters.hold)
            };
        }
        if self.parameters.keynum_to_decay != 0.0 {
            self.parameters.decay += self.parameters.keynum_to_decay * (60.0 - midi_key as f32);
            self.parameters.decay = if self.parameters.decay < -10000.0 {
                0.0
            } else {
                math::timecents_to_seconds_f(self.parameters.decay)
            };
        }
        self.exponential_decay = exponential_decay;
        self.next_segment(EnvelopeSegment::None, out_sample_rate);
    }

    pub fn next_segment(&mut self, active_segment: EnvelopeSegment, out_sample_rate: f32) {
        use EnvelopeSegment::*;

        if active_segment == None {
            self.samples_until_next = (self.parameters.delay * out_sample_rate) as i32;
            if self.samples_until_next > 0 {
                self.segment = Delay;
                self.segment_is_exponential = false;
                self.level = 0.0;
                self.slope = 0.0;
                return;
            }
        }
        if active_segment <= Delay {
            self.samples_until_next = (self.parameters.attack * out_sample_rate) as i32;
            if self.samples_until_next > 0 {
                self.segment = Attack;
                self.segment_is_exponential = false;
                self.level = self.parameters.start / 100.0;
                self.slope = 1.0 / self.samples_until_next as f32;
                return;
            }
        }
        if active_segment <= Attack {
            self.samples_until_next = (self.parameters.hold * out_sample_rate) as i32;
            if self.samples_until_next > 0 {
                self.segment = Hold;
                self.segment_is_exponential = false;
                self.level = 1.0;
                self.slope = 0.0;
                return;
            }
        }
        if active_segment <= Hold {
            self.samples_until_next = (self.parameters.decay * out_sample_rate) as i32;
            if self.samples_until_next > 0 {
                self.segment = Decay;
                self.level = 1.0;
                if self.exponential_decay {
                    // Constant borrowed from LinuxSampler: ln(1e-4), a 40 dB
                    // drop over the nominal segment length. The decay time
                    // specifies the fall to zero, so the segment is cut
                    // short once the sustain level is reached.
                    let decay_slope = -9.226 / self.samples_until_next as f32;
                    self.slope = decay_slope.exp();
                    self.segment_is_exponential = true;
                    if self.parameters.sustain > 0.0 {
                        self.samples_until_next = (((self.parameters.sustain as f64 / 100.0)
                            / self.level as f64)
                            .ln() as f32
                            / decay_slope) as i32;
                    }
                } else {
                    self.slope = (self.parameters.sustain / 100.0 - 1.0)
                        / self.samples_until_next as f32;
                    self.segment_is_exponential = false;
                }
                return;
            }
        }
        if active_segment <= Decay {
            self.segment = Sustain;
            self.level = self.parameters.sustain / 100.0;
            self.slope = 0.0;
            self.samples_until_next = i32::MAX;
            self.segment_is_exponential = false;
            return;
        }
        if active_segment <= Sustain {
            self.segment = Release;
            self.samples_until_next = ((if self.parameters.release <= 0.0 {
                FAST_RELEASE_TIME
            } else {
                self.parameters.release
            }) * out_sample_rate) as i32;
            if self.exponential_decay {
                let release_slope = -9.226 / self.samples_until_next as f32;
                self.slope = release_slope.exp();
                self.segment_is_exponential = true;
            } else {
                self.slope = -self.level / self.samples_until_next as f32;
                self.segment_is_exponential = false;
            }
            return;
        }
        self.segment = Done;
        self.segment_is_exponential = false;
        self.level = 0.0;
        self.slope = 0.0;
        self.samples_until_next = 0x7FFFFFF;
    }

    /// Advances the envelope by a whole block in O(1).
    pub fn process(&mut self, num_samples: i32, out_sample_rate: f32) {
        if self.slope != 0.0 {
            if self.segment_is_exponential {
                self.level *= self.slope.powf(num_samples as f32);
            } else {
                self.level += self.slope * num_samples as f32;
            }
        }
        self.samples_until_next -= num_samples;
        if self.samples_until_next <= 0 {
            self.next_segment(self.segment, out_sample_rate);
        }
    }

    /// Jumps into the release segment with no release time left. Combined
    /// with [`FAST_RELEASE_TIME`] this gives the 10 ms grace fade used for
    /// exclusive-class stops.
    pub fn release_immediately(&mut self, out_sample_rate: f32) {
        self.parameters.release = 0.0;
        self.next_segment(EnvelopeSegment::Sustain, out_sample_rate);
    }
}

/// Delayed triangle oscillator in [-1, 1].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VoiceLfo {
    samples_until: i32,
    pub level: f32,
    pub delta: f32,
}

impl VoiceLfo {
    pub fn setup(&mut self, delay: f32, freq_cents: i32, out_sample_rate: f32) {
        self.samples_until = (delay * out_sample_rate) as i32;
        self.delta = 4.0 * math::cents_to_hertz(freq_cents as f32) / out_sample_rate;
        self.level = 0.0;
    }

    pub fn process(&mut self, block_samples: i32) {
        if self.samples_until > block_samples {
            self.samples_until -= block_samples;
            return;
        }
        self.level += self.delta * block_samples as f32;
        if self.level > 1.0 {
            self.delta = -self.delta;
            self.level = 2.0 - self.level;
        } else if self.level < -1.0 {
            self.delta = -self.delta;
            self.level = -2.0 - self.level;
        }
    }
}

/// Two-pole low-pass, direct form II transposed. Coefficients are refreshed
/// at block granularity when the cutoff is under modulation; the filter
/// drops out entirely above 13500 cents.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VoiceLowpass {
    pub q_inv: f64,
    a0: f64,
    a1: f64,
    b1: f64,
    b2: f64,
    pub z1: f64,
    pub z2: f64,
    pub active: bool,
}

impl VoiceLowpass {
    /// `fc` is the cutoff normalized to the output sample rate.
    pub fn setup(&mut self, fc: f64) {
        let k = (std::f64::consts::PI * fc).tan();
        let kk = k * k;
        let norm = 1.0 / (1.0 + k * self.q_inv + kk);
        self.a0 = kk * norm;
        self.a1 = 2.0 * self.a0;
        self.b1 = 2.0 * (kk - 1.0) * norm;
        self.b2 = (1.0 - k * self.q_inv + kk) * norm;
    }

    #[inline(always)]
    pub fn process(&mut self, input: f64) -> f32 {
        let out = input * self.a0 + self.z1;
        self.z1 = input * self.a1 + self.z2 - self.b1 * out;
        self.z2 = input * self.a0 - self.b2 * out;
        out as f32
    }
}

/// One sounding instance of a region. A free pool slot is encoded as
/// `playing_preset == -1`; regions are addressed as `(preset, region)`
/// indices so voices stay valid for the synthesizer's whole lifetime.
#[derive(Debug, Clone, Default)]
pub(crate) struct Voice {
    pub playing_preset: i32,
    pub playing_key: u8,
    pub cur_pitch_wheel: i32,
    pub region_index: usize,
    pitch_input_timecents: f64,
    pitch_output_factor: f64,
    source_sample_position: f64,
    pub note_gain_db: f32,
    pan_factor_left: f32,
    pan_factor_right: f32,
    pub play_index: u32,
    sample_end: u32,
    loop_start: u32,
    loop_end: u32,
    pub ampenv: VoiceEnvelope,
    pub modenv: VoiceEnvelope,
    lowpass: VoiceLowpass,
    modlfo: VoiceLfo,
    viblfo: VoiceLfo,
}

impl Voice {
    pub fn free() -> Voice {
        Voice { playing_preset: -1, ..Voice::default() }
    }

    pub fn is_free(&self) -> bool {
        self.playing_preset == -1
    }

    pub fn kill(&mut self) {
        self.playing_preset = -1;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        region: &Region,
        region_index: usize,
        preset_index: usize,
        key: u8,
        vel: f32,
        play_index: u32,
        global_gain_db: f32,
        sample_count: usize,
        out_sample_rate: f32,
    ) {
        self.region_index = region_index;
        self.playing_preset = preset_index as i32;
        self.playing_key = key;
        self.play_index = play_index;

        self.cur_pitch_wheel = 8192;
        self.calc_pitch_ratio(region, out_sample_rate);

        self.note_gain_db = global_gain_db + region.volume
            + (-20.0 * (1.0 / vel as f64).log10()) as f32;
        // 3 dB pan law over the -100..100 span.
        let adjusted_pan = (region.pan as f64 + 100.0) / 200.0;
        self.pan_factor_left = (1.0 - adjusted_pan).sqrt() as f32;
        self.pan_factor_right = adjusted_pan.sqrt() as f32;

        self.source_sample_position = region.offset as f64;
        self.sample_end = sample_count as u32;
        if region.end > 0 && region.end < self.sample_end {
            self.sample_end = region.end + 1;
        }

        let do_loop = region.loop_mode != LoopMode::None
            && region.loop_start < region.loop_end
            && (region.loop_end as usize) < sample_count;
        self.loop_start = if do_loop { region.loop_start } else { 0 };
        self.loop_end = if do_loop { region.loop_end } else { 0 };

        self.ampenv.setup(&region.ampenv, key, true, out_sample_rate);
        self.modenv.setup(&region.modenv, key, false, out_sample_rate);

        let filter_q_db = region.initial_filter_q as f64 / 10.0;
        self.lowpass.q_inv = 1.0 / 10.0_f64.powf(filter_q_db / 20.0);
        self.lowpass.z1 = 0.0;
        self.lowpass.z2 = 0.0;
        self.lowpass.active = region.initial_filter_fc <= 13500;
        if self.lowpass.active {
            let fc = math::cents_to_hertz(region.initial_filter_fc as f32) / out_sample_rate;
            self.lowpass.setup(fc as f64);
        }

        self.modlfo
            .setup(region.delay_mod_lfo, region.freq_mod_lfo, out_sample_rate);
        self.viblfo
            .setup(region.delay_vib_lfo, region.freq_vib_lfo, out_sample_rate);
    }

    pub fn calc_pitch_ratio(&mut self, region: &Region, out_sample_rate: f32) {
        let mut note = self.playing_key as f64;
        note += region.transpose as f64;
        note += region.tune as f64 / 100.0;

        let mut adjusted_pitch = region.pitch_keycenter as f64
            + (note - region.pitch_keycenter as f64) * (region.pitch_keytrack as f64 / 100.0);
        if self.cur_pitch_wheel != 8192 {
            adjusted_pitch += (4.0 * self.cur_pitch_wheel as f64 / 16383.0) - 2.0;
        }

        self.pitch_input_timecents = adjusted_pitch * 100.0;
        self.pitch_output_factor = region.sample_rate as f64
            / (math::timecents_to_seconds(region.pitch_keycenter as f64 * 100.0)
                * out_sample_rate as f64);
    }

    /// Moves to the release segment. Sustain-looped voices keep sounding
    /// but stop looping.
    pub fn end(&mut self, region: &Region, out_sample_rate: f32) {
        self.ampenv.next_segment(EnvelopeSegment::Sustain, out_sample_rate);
        self.modenv.next_segment(EnvelopeSegment::Sustain, out_sample_rate);
        if region.loop_mode == LoopMode::Sustain {
            self.loop_end = self.loop_start;
        }
    }

    /// Forced stop for exclusive-class takeover: both envelopes drop into a
    /// zero-time (grace) release.
    pub fn end_quick(&mut self, out_sample_rate: f32) {
        self.ampenv.release_immediately(out_sample_rate);
        self.modenv.release_immediately(out_sample_rate);
    }

    /// Renders and accumulates `num_samples` output frames. The voice kills
    /// itself once the source position passes the sample end or the
    /// amplitude envelope completes.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        region: &Region,
        input: &[f32],
        output: &mut [f32],
        output_mode: OutputMode,
        global_pan_left: f32,
        global_pan_right: f32,
        out_sample_rate: f32,
        num_samples: usize,
    ) {
        let update_mod_env =
            region.mod_env_to_pitch != 0 || region.mod_env_to_filter_fc != 0;
        let update_mod_lfo = self.modlfo.delta != 0.0
            && (region.mod_lfo_to_pitch != 0
                || region.mod_lfo_to_filter_fc != 0
                || region.mod_lfo_to_volume != 0);
        let update_vib_lfo = self.viblfo.delta != 0.0 && region.vib_lfo_to_pitch != 0;
        let is_looping = self.loop_start < self.loop_end;
        let loop_start = self.loop_start as usize;
        let loop_end = self.loop_end as usize;
        let sample_end = self.sample_end as f64;
        let loop_end_dbl = loop_end as f64 + 1.0;
        let mut position = self.source_sample_position;
        let mut lowpass = self.lowpass;

        let dynamic_lowpass =
            region.mod_lfo_to_filter_fc != 0 || region.mod_env_to_filter_fc != 0;
        let dynamic_pitch_ratio = region.mod_lfo_to_pitch != 0
            || region.mod_env_to_pitch != 0
            || region.vib_lfo_to_pitch != 0;
        let dynamic_gain = region.mod_lfo_to_volume != 0;

        let mut pitch_ratio = if dynamic_pitch_ratio {
            0.0
        } else {
            math::timecents_to_seconds(self.pitch_input_timecents) * self.pitch_output_factor
        };
        let mut note_gain = if dynamic_gain {
            0.0
        } else {
            math::gain(self.note_gain_db)
        };
        let mod_lfo_to_volume = region.mod_lfo_to_volume as f32 * 0.1;

        let mut out_index = 0usize;
        let mut samples_left = num_samples;
        while samples_left > 0 {
            let block_total = samples_left.min(RENDER_EFFECT_SAMPLE_BLOCK);
            samples_left -= block_total;

            if dynamic_lowpass {
                let fres = region.initial_filter_fc as f32
                    + self.modlfo.level * region.mod_lfo_to_filter_fc as f32
                    + self.modenv.level * region.mod_env_to_filter_fc as f32;
                lowpass.active = fres <= 13500.0;
                if lowpass.active {
                    lowpass.setup((math::cents_to_hertz(fres) / out_sample_rate) as f64);
                }
            }

            if dynamic_pitch_ratio {
                pitch_ratio = math::timecents_to_seconds(
                    self.pitch_input_timecents
                        + (self.modlfo.level * region.mod_lfo_to_pitch as f32
                            + self.viblfo.level * region.vib_lfo_to_pitch as f32
                            + self.modenv.level * region.mod_env_to_pitch as f32)
                            as f64,
                ) * self.pitch_output_factor;
            }

            if dynamic_gain {
                note_gain =
                    math::gain(self.note_gain_db + self.modlfo.level * mod_lfo_to_volume);
            }

            let gain_mono = note_gain * self.ampenv.level;

            self.ampenv.process(block_total as i32, out_sample_rate);
            if update_mod_env {
                self.modenv.process(block_total as i32, out_sample_rate);
            }
            if update_mod_lfo {
                self.modlfo.process(block_total as i32);
            }
            if update_vib_lfo {
                self.viblfo.process(block_total as i32);
            }

            match output_mode {
                OutputMode::StereoInterleaved => {
                    let gain_left = gain_mono * global_pan_left * self.pan_factor_left;
                    let gain_right = gain_mono * global_pan_right * self.pan_factor_right;
                    let mut block = block_total;
                    while block > 0 && position < sample_end {
                        block -= 1;
                        let pos = position as usize;
                        let next = if pos >= loop_end && is_looping { loop_start } else { pos + 1 };
                        let alpha = (position - pos as f64) as f32;
                        let mut val = input[pos] * (1.0 - alpha) + input[next] * alpha;
                        if lowpass.active {
                            val = lowpass.process(val as f64);
                        }
                        output[out_index] += val * gain_left;
                        output[out_index + 1] += val * gain_right;
                        out_index += 2;
                        position += pitch_ratio;
                        if position >= loop_end_dbl && is_looping {
                            position -= (loop_end - loop_start + 1) as f64;
                        }
                    }
                }
                OutputMode::StereoUnweaved => {
                    let gain_left = gain_mono * global_pan_left * self.pan_factor_left;
                    let gain_right = gain_mono * global_pan_right * self.pan_factor_right;
                    let mut block = block_total;
                    while block > 0 && position < sample_end {
                        block -= 1;
                        let pos = position as usize;
                        let next = if pos >= loop_end && is_looping { loop_start } else { pos + 1 };
                        let alpha = (position - pos as f64) as f32;
                        let mut val = input[pos] * (1.0 - alpha) + input[next] * alpha;
                        if lowpass.active {
                            val = lowpass.process(val as f64);
                        }
                        output[out_index] += val * gain_left;
                        output[out_index + num_samples] += val * gain_right;
                        out_index += 1;
                        position += pitch_ratio;
                        if position >= loop_end_dbl && is_looping {
                            position -= (loop_end - loop_start + 1) as f64;
                        }
                    }
                }
                OutputMode::Mono => {
                    let gain_center =
                        gain_mono * (global_pan_left + global_pan_right) * 0.5;
                    let mut block = block_total;
                    while block > 0 && position < sample_end {
                        block -= 1;
                        let pos = position as usize;
                        let next = if pos >= loop_end && is_looping { loop_start } else { pos + 1 };
                        let alpha = (position - pos as f64) as f32;
                        let mut val = input[pos] * (1.0 - alpha) + input[next] * alpha;
                        if lowpass.active {
                            val = lowpass.process(val as f64);
                        }
                        output[out_index] += val * gain_center;
                        out_index += 1;
                        position += pitch_ratio;
                        if position >= loop_end_dbl && is_looping {
                            position -= (loop_end - loop_start + 1) as f64;
                        }
                    }
                }
            }

            if position >= sample_end || self.ampenv.segment == EnvelopeSegment::Done {
                self.kill();
                return;
            }
        }

        self.source_sample_position = position;
        if lowpass.active || dynamic_lowpass {
            self.lowpass = lowpass;
        }
    }
}
