//! Lowers the hydra's parallel arrays into owned presets: every
//! (preset zone × instrument zone × sample) combination becomes one flat
//! [`Region`] with all generators resolved, times in seconds and gains in
//! decibels, ready for the voice allocator to match against key/velocity.

use serde::Serialize;
use strum::FromRepr;

use crate::dtype::fixed_name_to_string;
use crate::hydra::{
    BagRecord, GenAmount, GeneratorRecord, Hydra, InstrumentHeader, SampleHeader,
};
use crate::math;

/// SoundFont generator operators, in file order. Operators missing from the
/// match arms below (chorus/reverb sends, `Keynum`, `Velocity`, the unused
/// and reserved slots) are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum Generator {
    StartAddrsOffset,
    EndAddrsOffset,
    StartloopAddrsOffset,
    EndloopAddrsOffset,
    StartAddrsCoarseOffset,
    ModLfoToPitch,
    VibLfoToPitch,
    ModEnvToPitch,
    InitialFilterFc,
    InitialFilterQ,
    ModLfoToFilterFc,
    ModEnvToFilterFc,
    EndAddrsCoarseOffset,
    ModLfoToVolume,
    Unused1,
    ChorusEffectsSend,
    ReverbEffectsSend,
    Pan,
    Unused2,
    Unused3,
    Unused4,
    DelayModLfo,
    FreqModLfo,
    DelayVibLfo,
    FreqVibLfo,
    DelayModEnv,
    AttackModEnv,
    HoldModEnv,
    DecayModEnv,
    SustainModEnv,
    ReleaseModEnv,
    KeynumToModEnvHold,
    KeynumToModEnvDecay,
    DelayVolEnv,
    AttackVolEnv,
    HoldVolEnv,
    DecayVolEnv,
    SustainVolEnv,
    ReleaseVolEnv,
    KeynumToVolEnvHold,
    KeynumToVolEnvDecay,
    Instrument,
    Reserved1,
    KeyRange,
    VelRange,
    StartloopAddrsCoarseOffset,
    Keynum,
    Velocity,
    InitialAttenuation,
    Reserved2,
    EndloopAddrsCoarseOffset,
    CoarseTune,
    FineTune,
    SampleId,
    SampleModes,
    Reserved3,
    ScaleTuning,
    ExclusiveClass,
    OverridingRootKey,
    Unused5,
    EndOper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LoopMode {
    #[default]
    None,
    Continuous,
    Sustain,
}

/// Envelope generator parameters. While a zone is being compiled the time
/// fields hold raw timecents; [`Envelope::to_seconds`] converts them when
/// the zone is closed out. Hold and decay stay in timecents when their
/// key-number tracking is active, since the final value depends on the key
/// and is resolved at note-on.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Envelope {
    #[serde(rename = "@delay")]
    pub delay: f32,
    #[serde(rename = "@start")]
    pub start: f32,
    #[serde(rename = "@attack")]
    pub attack: f32,
    #[serde(rename = "@hold")]
    pub hold: f32,
    #[serde(rename = "@decay")]
    pub decay: f32,
    #[serde(rename = "@sustain")]
    pub sustain: f32,
    #[serde(rename = "@release")]
    pub release: f32,
    #[serde(rename = "@keynum_to_hold")]
    pub keynum_to_hold: f32,
    #[serde(rename = "@keynum_to_decay")]
    pub keynum_to_decay: f32,
}

impl Envelope {
    fn timecent_defaults() -> Envelope {
        Envelope {
            delay: -12000.0,
            attack: -12000.0,
            hold: -12000.0,
            decay: -12000.0,
            release: -12000.0,
            ..Envelope::default()
        }
    }

    /// Timecents never reach zero, so very short segments are pinned to 0
    /// seconds. The sustain field becomes a percentage: converted from
    /// centi-decibels of attenuation for the amplitude envelope, taken as
    /// tenths of a percent for the modulation envelope.
    pub(crate) fn to_seconds(&mut self, sustain_is_gain: bool) {
        self.delay = resolve_timecents(self.delay);
        self.attack = resolve_timecents(self.attack);
        self.release = resolve_timecents(self.release);
        if self.keynum_to_hold == 0.0 {
            self.hold = resolve_timecents(self.hold);
        }
        if self.keynum_to_decay == 0.0 {
            self.decay = resolve_timecents(self.decay);
        }
        if self.sustain < 0.0 {
            self.sustain = 0.0;
        } else if sustain_is_gain {
            self.sustain = 100.0 * math::gain(-self.sustain / 10.0);
        } else {
            self.sustain /= 10.0;
        }
    }
}

fn resolve_timecents(timecents: f32) -> f32 {
    if timecents < -11950.0 {
        0.0
    } else {
        math::timecents_to_seconds_f(timecents)
    }
}

/// A fully-resolved playable unit: a key/velocity rectangle bound to one
/// sample window with its articulation parameters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Region {
    #[serde(rename = "@loop_mode")]
    pub loop_mode: LoopMode,
    #[serde(rename = "@sample_rate")]
    pub sample_rate: u32,
    #[serde(rename = "@lokey")]
    pub lokey: u8,
    #[serde(rename = "@hikey")]
    pub hikey: u8,
    #[serde(rename = "@lovel")]
    pub lovel: u8,
    #[serde(rename = "@hivel")]
    pub hivel: u8,
    #[serde(rename = "@group")]
    pub group: u32,
    #[serde(rename = "@offset")]
    pub offset: u32,
    #[serde(rename = "@end")]
    pub end: u32,
    #[serde(rename = "@loop_start")]
    pub loop_start: u32,
    #[serde(rename = "@loop_end")]
    pub loop_end: u32,
    #[serde(rename = "@transpose")]
    pub transpose: i32,
    #[serde(rename = "@tune")]
    pub tune: i32,
    #[serde(rename = "@pitch_keycenter")]
    pub pitch_keycenter: i32,
    #[serde(rename = "@pitch_keytrack")]
    pub pitch_keytrack: i32,
    #[serde(rename = "@volume")]
    pub volume: f32,
    #[serde(rename = "@pan")]
    pub pan: f32,
    #[serde(rename = "@initial_filter_q")]
    pub initial_filter_q: i32,
    #[serde(rename = "@initial_filter_fc")]
    pub initial_filter_fc: i32,
    #[serde(rename = "@mod_env_to_pitch")]
    pub mod_env_to_pitch: i32,
    #[serde(rename = "@mod_env_to_filter_fc")]
    pub mod_env_to_filter_fc: i32,
    #[serde(rename = "@mod_lfo_to_filter_fc")]
    pub mod_lfo_to_filter_fc: i32,
    #[serde(rename = "@mod_lfo_to_volume")]
    pub mod_lfo_to_volume: i32,
    #[serde(rename = "@delay_mod_lfo")]
    pub delay_mod_lfo: f32,
    #[serde(rename = "@freq_mod_lfo")]
    pub freq_mod_lfo: i32,
    #[serde(rename = "@mod_lfo_to_pitch")]
    pub mod_lfo_to_pitch: i32,
    #[serde(rename = "@delay_vib_lfo")]
    pub delay_vib_lfo: f32,
    #[serde(rename = "@freq_vib_lfo")]
    pub freq_vib_lfo: i32,
    #[serde(rename = "@vib_lfo_to_pitch")]
    pub vib_lfo_to_pitch: i32,
    pub ampenv: Envelope,
    pub modenv: Envelope,
}

impl Region {
    /// Baseline for a preset-level zone. Preset generators are relative
    /// modifications, so everything starts at zero except the ranges and
    /// the key center.
    pub(crate) fn zone_relative() -> Region {
        Region {
            hikey: 127,
            hivel: 127,
            pitch_keycenter: 60,
            ..Region::default()
        }
    }

    /// Baseline for an instrument-level zone: the real SF2 defaults, with
    /// envelope and LFO times still in timecents. A key center of -1 means
    /// "inherit from the sample header".
    pub(crate) fn instrument_default() -> Region {
        Region {
            hikey: 127,
            hivel: 127,
            pitch_keycenter: -1,
            pitch_keytrack: 100,
            ampenv: Envelope::timecent_defaults(),
            modenv: Envelope::timecent_defaults(),
            initial_filter_fc: 13500,
            delay_mod_lfo: -12000.0,
            delay_vib_lfo: -12000.0,
            ..Region::default()
        }
    }

    /// Applies one generator. Ranges overwrite, sample-address offsets
    /// accumulate, everything else replaces the current value.
    pub(crate) fn apply_generator(&mut self, oper: u16, amount: GenAmount) {
        use Generator::*;
        let Some(oper) = Generator::from_repr(oper) else { return };
        match oper {
            StartAddrsOffset => {
                self.offset = self.offset.wrapping_add_signed(amount.short_amount() as i32)
            }
            EndAddrsOffset => {
                self.end = self.end.wrapping_add_signed(amount.short_amount() as i32)
            }
            StartloopAddrsOffset => {
                self.loop_start = self
                    .loop_start
                    .wrapping_add_signed(amount.short_amount() as i32)
            }
            EndloopAddrsOffset => {
                self.loop_end = self
                    .loop_end
                    .wrapping_add_signed(amount.short_amount() as i32)
            }
            StartAddrsCoarseOffset => {
                self.offset = self
                    .offset
                    .wrapping_add_signed(amount.short_amount() as i32 * 32768)
            }
            ModLfoToPitch => self.mod_lfo_to_pitch = amount.short_amount() as i32,
            VibLfoToPitch => self.vib_lfo_to_pitch = amount.short_amount() as i32,
            ModEnvToPitch => self.mod_env_to_pitch = amount.short_amount() as i32,
            InitialFilterFc => self.initial_filter_fc = amount.short_amount() as i32,
            InitialFilterQ => self.initial_filter_q = amount.short_amount() as i32,
            ModLfoToFilterFc => self.mod_lfo_to_filter_fc = amount.short_amount() as i32,
            ModEnvToFilterFc => self.mod_env_to_filter_fc = amount.short_amount() as i32,
            EndAddrsCoarseOffset => {
                self.end = self
                    .end
                    .wrapping_add_signed(amount.short_amount() as i32 * 32768)
            }
            ModLfoToVolume => self.mod_lfo_to_volume = amount.short_amount() as i32,
            // The file encodes pan in 0.1% units of the -50%..+50% span.
            Pan => self.pan = amount.short_amount() as f32 * (2.0 / 10.0),
            DelayModLfo => self.delay_mod_lfo = amount.short_amount() as f32,
            FreqModLfo => self.freq_mod_lfo = amount.short_amount() as i32,
            DelayVibLfo => self.delay_vib_lfo = amount.short_amount() as f32,
            FreqVibLfo => self.freq_vib_lfo = amount.short_amount() as i32,
            DelayModEnv => self.modenv.delay = amount.short_amount() as f32,
            AttackModEnv => self.modenv.attack = amount.short_amount() as f32,
            HoldModEnv => self.modenv.hold = amount.short_amount() as f32,
            DecayModEnv => self.modenv.decay = amount.short_amount() as f32,
            SustainModEnv => self.modenv.sustain = amount.short_amount() as f32,
            ReleaseModEnv => self.modenv.release = amount.short_amount() as f32,
            KeynumToModEnvHold => self.modenv.keynum_to_hold = amount.short_amount() as f32,
            KeynumToModEnvDecay => self.modenv.keynum_to_decay = amount.short_amount() as f32,
            DelayVolEnv => self.ampenv.delay = amount.short_amount() as f32,
            AttackVolEnv => self.ampenv.attack = amount.short_amount() as f32,
            HoldVolEnv => self.ampenv.hold = amount.short_amount() as f32,
            DecayVolEnv => self.ampenv.decay = amount.short_amount() as f32,
            SustainVolEnv => self.ampenv.sustain = amount.short_amount() as f32,
            ReleaseVolEnv => self.ampenv.release = amount.short_amount() as f32,
            KeynumToVolEnvHold => self.ampenv.keynum_to_hold = amount.short_amount() as f32,
            KeynumToVolEnvDecay => self.ampenv.keynum_to_decay = amount.short_amount() as f32,
            KeyRange => {
                self.lokey = amount.range_lo();
                self.hikey = amount.range_hi();
            }
            VelRange => {
                self.lovel = amount.range_lo();
                self.hivel = amount.range_hi();
            }
            StartloopAddrsCoarseOffset => {
                self.loop_start = self
                    .loop_start
                    .wrapping_add_signed(amount.short_amount() as i32 * 32768)
            }
            InitialAttenuation => self.volume += -(amount.short_amount() as f32) / 100.0,
            EndloopAddrsCoarseOffset => {
                self.loop_end = self
                    .loop_end
                    .wrapping_add_signed(amount.short_amount() as i32 * 32768)
            }
            CoarseTune => self.transpose += amount.short_amount() as i32,
            FineTune => self.tune += amount.short_amount() as i32,
            SampleModes => {
                self.loop_mode = match amount.word_amount() & 3 {
                    3 => LoopMode::Sustain,
                    1 => LoopMode::Continuous,
                    _ => LoopMode::None,
                }
            }
            ScaleTuning => self.pitch_keytrack = amount.short_amount() as i32,
            ExclusiveClass => self.group = amount.word_amount() as u32,
            OverridingRootKey => self.pitch_keycenter = amount.short_amount() as i32,
            _ => {}
        }
    }

    /// Folds the preset-level zone into this instrument-level zone: every
    /// numeric generator is additive across the two levels. Ranges, the key
    /// center, the exclusive class and the key-number tracking amounts do
    /// not take part.
    fn sum_from(&mut self, preset_region: &Region) {
        self.offset = self.offset.wrapping_add(preset_region.offset);
        self.end = self.end.wrapping_add(preset_region.end);
        self.loop_start = self.loop_start.wrapping_add(preset_region.loop_start);
        self.loop_end = self.loop_end.wrapping_add(preset_region.loop_end);
        self.transpose += preset_region.transpose;
        self.tune += preset_region.tune;
        self.pitch_keytrack += preset_region.pitch_keytrack;
        self.volume += preset_region.volume;
        self.pan += preset_region.pan;
        self.ampenv.delay += preset_region.ampenv.delay;
        self.ampenv.attack += preset_region.ampenv.attack;
        self.ampenv.hold += preset_region.ampenv.hold;
        self.ampenv.decay += preset_region.ampenv.decay;
        self.ampenv.sustain += preset_region.ampenv.sustain;
        self.ampenv.release += preset_region.ampenv.release;
        self.modenv.delay += preset_region.modenv.delay;
        self.modenv.attack += preset_region.modenv.attack;
        self.modenv.hold += preset_region.modenv.hold;
        self.modenv.decay += preset_region.modenv.decay;
        self.modenv.sustain += preset_region.modenv.sustain;
        self.modenv.release += preset_region.modenv.release;
        self.initial_filter_q += preset_region.initial_filter_q;
        self.initial_filter_fc += preset_region.initial_filter_fc;
        self.mod_env_to_pitch += preset_region.mod_env_to_pitch;
        self.mod_env_to_filter_fc += preset_region.mod_env_to_filter_fc;
        self.delay_mod_lfo += preset_region.delay_mod_lfo;
        self.freq_mod_lfo += preset_region.freq_mod_lfo;
        self.mod_lfo_to_pitch += preset_region.mod_lfo_to_pitch;
        self.mod_lfo_to_filter_fc += preset_region.mod_lfo_to_filter_fc;
        self.mod_lfo_to_volume += preset_region.mod_lfo_to_volume;
        self.delay_vib_lfo += preset_region.delay_vib_lfo;
        self.freq_vib_lfo += preset_region.freq_vib_lfo;
        self.vib_lfo_to_pitch += preset_region.vib_lfo_to_pitch;
    }

    /// Closes out a zone once its `SampleID` generator arrives: resolves
    /// times, pins values to their ranges and folds the sample header in.
    fn close_out(&mut self, preset_region: &Region, shdr: &SampleHeader) {
        self.sum_from(preset_region);

        self.ampenv.to_seconds(true);
        self.modenv.to_seconds(false);
        self.delay_mod_lfo = resolve_timecents(self.delay_mod_lfo);
        self.delay_vib_lfo = resolve_timecents(self.delay_vib_lfo);

        self.pan = self.pan.clamp(-100.0, 100.0);
        if self.initial_filter_q < 1500 || self.initial_filter_q > 13500 {
            self.initial_filter_q = 0;
        }

        self.offset = self.offset.wrapping_add(shdr.start);
        self.end = self.end.wrapping_add(shdr.end);
        self.loop_start = self.loop_start.wrapping_add(shdr.loop_start);
        self.loop_end = self.loop_end.wrapping_add(shdr.loop_end);
        if shdr.loop_end > 0 {
            self.loop_end = self.loop_end.wrapping_sub(1);
        }
        if self.pitch_keycenter == -1 {
            self.pitch_keycenter = shdr.original_pitch as i32;
        }
        self.tune += shdr.pitch_correction as i32;

        if self.volume > 6.0 {
            self.volume = 6.0;
        }
        self.sample_rate = shdr.sample_rate;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@bank")]
    pub bank: u16,
    #[serde(rename = "@program")]
    pub program: u16,
    #[serde(rename = "region")]
    pub regions: Vec<Region>,
}

/// Expands every preset header (minus the terminal sentinel) into its flat
/// region list. The result is ordered by `(bank, program)` with ties kept
/// in file order.
pub fn compile_presets(hydra: &Hydra) -> Vec<Preset> {
    let phdrs = hydra.phdr.as_deref().unwrap_or(&[]);
    let pbags = hydra.pbag.as_deref().unwrap_or(&[]);
    let pgens = hydra.pgen.as_deref().unwrap_or(&[]);
    let insts = hydra.inst.as_deref().unwrap_or(&[]);
    let ibags = hydra.ibag.as_deref().unwrap_or(&[]);
    let igens = hydra.igen.as_deref().unwrap_or(&[]);
    let shdrs = hydra.shdr.as_deref().unwrap_or(&[]);

    let count = phdrs.len().saturating_sub(1);
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&i| (phdrs[i].bank, phdrs[i].program));

    let mut presets = Vec::with_capacity(count);
    for &phdr_index in &order {
        let phdr = &phdrs[phdr_index];
        let next_phdr = &phdrs[phdr_index + 1];
        let mut preset = Preset {
            name: fixed_name_to_string(&phdr.name),
            bank: phdr.bank,
            program: phdr.program,
            regions: Vec::new(),
        };

        for bag_index in phdr.bag_index as usize..next_phdr.bag_index as usize {
            let (Some(bag), Some(next_bag)) = (pbags.get(bag_index), pbags.get(bag_index + 1))
            else {
                break;
            };
            let mut preset_region = Region::zone_relative();
            for pgen in slice_between(pgens, bag.gen_index, next_bag.gen_index) {
                if pgen.oper == Generator::Instrument as u16 {
                    compile_instrument(
                        &mut preset,
                        &preset_region,
                        pgen.amount().word_amount(),
                        insts,
                        ibags,
                        igens,
                        shdrs,
                    );
                } else {
                    preset_region.apply_generator(pgen.oper, pgen.amount());
                }
            }
        }
        presets.push(preset);
    }
    presets
}

fn compile_instrument(
    preset: &mut Preset,
    preset_region: &Region,
    which: u16,
    insts: &[InstrumentHeader],
    ibags: &[BagRecord],
    igens: &[GeneratorRecord],
    shdrs: &[SampleHeader],
) {
    let (Some(inst), Some(next_inst)) =
        (insts.get(which as usize), insts.get(which as usize + 1))
    else {
        return;
    };

    let mut inst_region = Region::instrument_default();
    // Preset generators are relative modifications of the instrument
    // settings, which makes no sense for ranges: the preset zone's ranges
    // win outright. Kept for compatibility with existing renderers.
    inst_region.lokey = preset_region.lokey;
    inst_region.hikey = preset_region.hikey;
    inst_region.lovel = preset_region.lovel;
    inst_region.hivel = preset_region.hivel;

    let first_bag = inst.bag_index as usize;
    for bag_index in first_bag..next_inst.bag_index as usize {
        let (Some(bag), Some(next_bag)) = (ibags.get(bag_index), ibags.get(bag_index + 1))
        else {
            break;
        };
        let mut zone = inst_region;
        let mut had_sample_id = false;
        for igen in slice_between(igens, bag.gen_index, next_bag.gen_index) {
            if igen.oper == Generator::SampleId as u16 {
                let Some(shdr) = shdrs.get(igen.amount().word_amount() as usize) else {
                    continue;
                };
                zone.close_out(preset_region, shdr);
                preset.regions.push(zone);
                had_sample_id = true;
            } else {
                zone.apply_generator(igen.oper, igen.amount());
            }
        }
        // A first bag without a sample is the instrument's global zone: its
        // values become the baseline for the remaining bags.
        if bag_index == first_bag && !had_sample_id {
            inst_region = zone;
        }
    }
}

fn slice_between<T>(items: &[T], start: u16, end: u16) -> &[T] {
    let (start, end) = (start as usize, end as usize);
    if start >= end || end > items.len() {
        &[]
    } else {
        &items[start..end]
    }
}
