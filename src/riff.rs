use std::fmt::Display;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dtype::FontError;

/// Anything the loader can pull SoundFont bytes from: deliver bytes on
/// demand and skip forward without copying. Seeks are only ever issued
/// relative and forward, so files, buffered readers and in-memory cursors
/// all qualify.
pub trait FontSource: Read + Seek {}
impl<R: Read + Seek> FontSource for R {}

pub fn skip_bytes<R: FontSource>(reader: &mut R, count: u32) -> Result<(), FontError> {
    reader.seek(SeekFrom::Current(count as i64))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// One RIFF chunk header. For `RIFF` and `LIST` chunks `id` holds the form
/// type (the second fourcc) and `size` excludes it, so walking code only
/// ever matches on `id`.
#[derive(Debug, Clone, Copy)]
pub struct RiffChunk {
    pub id: FourCC,
    pub size: u32,
}

impl RiffChunk {
    pub fn is(&self, tag: &[u8; 4]) -> bool {
        &self.id.0 == tag
    }
}

/// Reads the next chunk header inside `parent` (or at the top level).
/// Returns `None` at end of input and on anything malformed: a fourcc whose
/// leading byte is not printable, a nested chunk overrunning its parent, or
/// a `RIFF` form below the top level. The parent's remaining size is
/// reduced by the full `8 + size` footprint of the chunk that was read.
pub fn read_riff_chunk<R: FontSource>(
    reader: &mut R,
    parent: Option<&mut RiffChunk>,
) -> Option<RiffChunk> {
    let has_parent = parent.is_some();
    if let Some(p) = &parent {
        if 8 > p.size {
            return None;
        }
    }
    let mut id = [0u8; 4];
    reader.read_exact(&mut id).ok()?;
    if id[0] <= b' ' || id[0] >= b'z' {
        return None;
    }
    let mut size = reader.read_u32::<LittleEndian>().ok()?;
    if let Some(p) = parent {
        if 8 + size as u64 > p.size as u64 {
            return None;
        }
        p.size -= 8 + size;
    }
    let is_riff = &id == b"RIFF";
    let is_list = &id == b"LIST";
    if is_riff && has_parent {
        return None; // not allowed below top level
    }
    if !is_riff && !is_list {
        return Some(RiffChunk { id: FourCC(id), size });
    }
    // Form chunk: the form type replaces the id.
    reader.read_exact(&mut id).ok()?;
    if id[0] <= b' ' || id[0] >= b'z' {
        return None;
    }
    size = size.checked_sub(4)?;
    Some(RiffChunk { id: FourCC(id), size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

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

    #[test]
    fn walks_a_nested_list() {
        let inner = chunk(b"smpl", &[1, 2, 3, 4]);
        let bytes = list(b"sdta", &inner);
        let mut cur = Cursor::new(bytes);

        let mut outer = read_riff_chunk(&mut cur, None).unwrap();
        assert!(outer.is(b"sdta"));
        assert_eq!(outer.size, inner.len() as u32);

        let sub = read_riff_chunk(&mut cur, Some(&mut outer)).unwrap();
        assert!(sub.is(b"smpl"));
        assert_eq!(sub.size, 4);
        assert_eq!(outer.size, 0);

        skip_bytes(&mut cur, sub.size).unwrap();
        assert!(read_riff_chunk(&mut cur, Some(&mut outer)).is_none());
    }

    #[test]
    fn riff_form_promotes_its_type() {
        let bytes = {
            let mut inner = Vec::from(&b"sfbk"[..]);
            inner.extend_from_slice(&chunk(b"tail", &[]));
            chunk(b"RIFF", &inner)
        };
        let head = read_riff_chunk(&mut Cursor::new(bytes), None).unwrap();
        assert!(head.is(b"sfbk"));
        assert_eq!(head.size, 8);
    }

    #[test]
    fn nested_riff_is_rejected() {
        let bytes = {
            let mut inner = Vec::from(&b"sfbk"[..]);
            let nested = chunk(b"RIFF", b"oops");
            inner.extend_from_slice(&nested);
            chunk(b"RIFF", &inner)
        };
        let mut cur = Cursor::new(bytes);
        let mut head = read_riff_chunk(&mut cur, None).unwrap();
        assert!(read_riff_chunk(&mut cur, Some(&mut head)).is_none());
    }

    #[test]
    fn child_overrunning_parent_is_rejected() {
        // Child claims 100 body bytes, parent only accounts for 12.
        let mut inner = Vec::from(&b"sfbk"[..]);
        inner.extend_from_slice(b"big ");
        inner.extend_from_slice(&100u32.to_le_bytes());
        let bytes = chunk(b"RIFF", &inner);
        let mut cur = Cursor::new(bytes);
        let mut head = read_riff_chunk(&mut cur, None).unwrap();
        assert!(read_riff_chunk(&mut cur, Some(&mut head)).is_none());
    }

    #[test]
    fn unprintable_fourcc_stops_the_walk() {
        let mut bytes = vec![0x01, b'b', b'a', b'd'];
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(read_riff_chunk(&mut Cursor::new(bytes), None).is_none());
        assert!(read_riff_chunk(&mut Cursor::new(Vec::new()), None).is_none());
    }
}
