//! The "hydra": nine parallel record arrays inside the `pdta` LIST that
//! together describe the preset → instrument → sample graph, plus the raw
//! 16-bit PCM stream inside `sdta`. Terminal sentinel records close the
//! index range of the record before them, so the arrays are kept flat here
//! and only lowered to owned presets by the compiler in [`crate::preset`].

use bevy_reflect::Reflect;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::dtype::{AutoParse, FontError, Parse};
use crate::riff::{read_riff_chunk, skip_bytes, FontSource, RiffChunk};

/// Window size (in samples) for streaming the `smpl` chunk.
const SAMPLE_WINDOW: usize = 1024;

pub trait HydraRecord: AutoParse {
    /// On-disk record size. Chunk sizes that are not an exact multiple of
    /// this disqualify the chunk.
    const DISK_SIZE: u32;
}

/// One addressable (bank, program) entry. The final record is the EOP
/// sentinel whose bag index closes the previous preset's zone range.
#[derive(Debug, Clone, Default, Reflect)]
pub struct PresetHeader {
    pub name: [u8; 20],
    pub program: u16,
    pub bank: u16,
    pub bag_index: u16,
    pub library: u32,
    pub genre: u32,
    pub morphology: u32,
}
impl AutoParse for PresetHeader {}
impl HydraRecord for PresetHeader {
    const DISK_SIZE: u32 = 38;
}

/// A zone ("bag"): start indices into the generator and modulator arrays.
/// Shared between the preset level (pbag) and the instrument level (ibag).
#[derive(Debug, Clone, Default, Reflect)]
pub struct BagRecord {
    pub gen_index: u16,
    pub mod_index: u16,
}
impl AutoParse for BagRecord {}
impl HydraRecord for BagRecord {
    const DISK_SIZE: u32 = 4;
}

/// Modulator records are parsed so the stream position stays correct, but
/// they are never applied to the synthesis model.
#[derive(Debug, Clone, Default, Reflect)]
pub struct ModulatorRecord {
    pub src_oper: u16,
    pub dest_oper: u16,
    pub amount: i16,
    pub amount_src_oper: u16,
    pub trans_oper: u16,
}
impl AutoParse for ModulatorRecord {}
impl HydraRecord for ModulatorRecord {
    const DISK_SIZE: u32 = 10;
}

/// A generator: operator plus a 16-bit amount whose interpretation depends
/// on the operator (signed value, unsigned index, or a lo/hi byte range).
#[derive(Debug, Clone, Default, Reflect)]
pub struct GeneratorRecord {
    pub oper: u16,
    pub amount: u16,
}
impl AutoParse for GeneratorRecord {}
impl HydraRecord for GeneratorRecord {
    const DISK_SIZE: u32 = 4;
}

impl GeneratorRecord {
    pub fn amount(&self) -> GenAmount {
        GenAmount(self.amount)
    }
}

/// The three views of a generator amount.
#[derive(Debug, Clone, Copy)]
pub struct GenAmount(pub u16);

impl GenAmount {
    pub fn short_amount(self) -> i16 {
        self.0 as i16
    }
    pub fn word_amount(self) -> u16 {
        self.0
    }
    pub fn range_lo(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
    pub fn range_hi(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

#[derive(Debug, Clone, Default, Reflect)]
pub struct InstrumentHeader {
    pub name: [u8; 20],
    pub bag_index: u16,
}
impl AutoParse for InstrumentHeader {}
impl HydraRecord for InstrumentHeader {
    const DISK_SIZE: u32 = 22;
}

/// Describes one sample's window inside the shared pool, its native rate
/// and pitch. `loop_start`/`loop_end` are absolute pool positions.
#[derive(Debug, Clone, Default, Reflect)]
pub struct SampleHeader {
    pub name: [u8; 20],
    pub start: u32,
    pub end: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub sample_rate: u32,
    pub original_pitch: u8,
    pub pitch_correction: i8,
    pub link: u16,
    pub sample_type: u16,
}
impl AutoParse for SampleHeader {}
impl HydraRecord for SampleHeader {
    const DISK_SIZE: u32 = 46;
}

/// The nine flat arrays, each `Some` once its chunk has been seen. All of
/// this is transient: the preset compiler lowers it to owned regions and the
/// whole struct is dropped before the synthesizer is handed out.
#[derive(Debug, Default)]
pub struct Hydra {
    pub phdr: Option<Vec<PresetHeader>>,
    pub pbag: Option<Vec<BagRecord>>,
    pub pmod: Option<Vec<ModulatorRecord>>,
    pub pgen: Option<Vec<GeneratorRecord>>,
    pub inst: Option<Vec<InstrumentHeader>>,
    pub ibag: Option<Vec<BagRecord>>,
    pub imod: Option<Vec<ModulatorRecord>>,
    pub igen: Option<Vec<GeneratorRecord>>,
    pub shdr: Option<Vec<SampleHeader>>,
}

impl Hydra {
    /// Walks the `pdta` LIST. Known sub-chunks with a well-formed size are
    /// parsed into their arrays, everything else is skipped.
    pub fn read_pdta<R: FontSource>(
        &mut self,
        reader: &mut R,
        list: &mut RiffChunk,
    ) -> Result<(), FontError> {
        while let Some(chunk) = read_riff_chunk(reader, Some(list)) {
            macro_rules! handle_chunk {
                ($($tag:literal => $slot:ident : $ty:ty),+ $(,)?) => {
                    $(if chunk.is($tag) && chunk.size % <$ty>::DISK_SIZE == 0 {
                        self.$slot = Some(read_records::<$ty, R>(
                            reader,
                            chunk.size / <$ty>::DISK_SIZE,
                        )?);
                    } else)+ {
                        skip_bytes(reader, chunk.size)?;
                    }
                };
            }
            handle_chunk!(
                b"phdr" => phdr: PresetHeader,
                b"pbag" => pbag: BagRecord,
                b"pmod" => pmod: ModulatorRecord,
                b"pgen" => pgen: GeneratorRecord,
                b"inst" => inst: InstrumentHeader,
                b"ibag" => ibag: BagRecord,
                b"imod" => imod: ModulatorRecord,
                b"igen" => igen: GeneratorRecord,
                b"shdr" => shdr: SampleHeader,
            );
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.phdr.is_some()
            && self.pbag.is_some()
            && self.pmod.is_some()
            && self.pgen.is_some()
            && self.inst.is_some()
            && self.ibag.is_some()
            && self.imod.is_some()
            && self.igen.is_some()
            && self.shdr.is_some()
    }
}

fn read_records<T: HydraRecord, R: FontSource>(
    reader: &mut R,
    count: u32,
) -> Result<Vec<T>, FontError> {
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut record = T::default();
        record.read_from(reader)?;
        records.push(record);
    }
    Ok(records)
}

/// Streams the `smpl` chunk into a normalized float pool. One guard sample
/// is appended so the interpolator's `pos + 1` access never leaves the
/// buffer; the logical sample count is `pool.len() - 1`.
pub fn read_sample_pool<R: FontSource>(
    reader: &mut R,
    chunk: &RiffChunk,
) -> Result<Vec<f32>, FontError> {
    let total = (chunk.size / 2) as usize;
    let mut pool = Vec::with_capacity(total + 1);
    let mut window = [0i16; SAMPLE_WINDOW];
    let mut samples_left = total;
    while samples_left > 0 {
        let n = samples_left.min(SAMPLE_WINDOW);
        reader.read_i16_into::<LittleEndian>(&mut window[..n])?;
        pool.extend(window[..n].iter().map(|&s| (s as f64 / 32767.0) as f32));
        samples_left -= n;
    }
    pool.push(0.0);
    Ok(pool)
}
