use std::io::Read;
use std::path::PathBuf;

use bevy_reflect::{Reflect, Struct};
use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

/// Everything that can go wrong while bringing up a synthesizer from a
/// SoundFont byte stream. Once a [`crate::Synth`] exists, no operation on it
/// returns an error: note events and render calls are total.
#[derive(Debug, Error)]
pub enum FontError {
    #[error("soundfont file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("stream does not start with a RIFF sfbk form")]
    NoSfbkHeader,
    #[error("pdta list is missing one or more hydra sub-chunks")]
    IncompleteHydra,
    #[error("sdta list carries no smpl sample data")]
    NoSampleData,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

macro_rules! read_n_bytes {
    ($file:ident, $n:literal) => {{
        let mut buf: [u8; $n] = [0; $n];
        $file.read_exact(&mut buf).map(|_| buf)
    }};
}

/// Marker for fixed-layout little-endian records that can be parsed
/// field-by-field through reflection. Supported field types are the ones the
/// hydra records use: `u8`/`i8`/`u16`/`i16`/`u32` scalars and `[u8; 4]` /
/// `[u8; 20]` byte arrays (fourccs and fixed-width names).
pub trait AutoParse: Reflect + Struct + Default {}

pub trait Parse {
    fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<(), FontError>;
}

impl<T: AutoParse> Parse for T {
    fn read_from<R: Read>(&mut self, file: &mut R) -> Result<(), FontError> {
        for field_i in 0..self.field_len() {
            let field = self.field_at_mut(field_i).expect("reflect: field vanished");
            let type_info = field
                .get_represented_type_info()
                .expect("reflect: field carries no type info");
            match type_info {
                bevy_reflect::TypeInfo::Array(array_info) => {
                    let capacity = array_info.capacity();
                    if array_info.item_type_name() == "u8" {
                        if capacity == 4 {
                            *field
                                .as_any_mut()
                                .downcast_mut::<[u8; 4]>()
                                .expect("reflect: array downcast") = read_n_bytes!(file, 4)?;
                        } else if capacity == 20 {
                            *field
                                .as_any_mut()
                                .downcast_mut::<[u8; 20]>()
                                .expect("reflect: array downcast") = read_n_bytes!(file, 20)?;
                        } else {
                            panic!("Unsupported auto type!");
                        }
                    } else {
                        panic!("Unsupported auto type!");
                    }
                }
                bevy_reflect::TypeInfo::Value(value_info) => {
                    if value_info.type_name() == "u8" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u8>()
                            .expect("reflect: value downcast") = file.read_u8()?;
                    } else if value_info.type_name() == "i8" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<i8>()
                            .expect("reflect: value downcast") = file.read_i8()?;
                    } else if value_info.type_name() == "u16" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u16>()
                            .expect("reflect: value downcast") =
                            file.read_u16::<LittleEndian>()?;
                    } else if value_info.type_name() == "i16" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<i16>()
                            .expect("reflect: value downcast") =
                            file.read_i16::<LittleEndian>()?;
                    } else if value_info.type_name() == "u32" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u32>()
                            .expect("reflect: value downcast") =
                            file.read_u32::<LittleEndian>()?;
                    } else {
                        panic!("Unsupported auto type!");
                    }
                }
                _ => panic!("Unsupported auto type!"),
            }
        }
        Ok(())
    }
}

/// Fixed-width, NUL-padded name fields (preset, instrument and sample names).
pub fn fixed_name_to_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
