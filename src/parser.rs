use crate::boxes::{BoxHeader, FourCC};
use crate::error::{Error, Result};
use crate::util::OffsetReader;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{ErrorKind, Read};

/// Read the 8-byte size+tag header, plus the 64-bit size when the 32-bit
/// size field is 1. Advances the stream by exactly `header_size` bytes.
///
/// Returns [`Error::EndOfStream`] if the stream ends before the first byte,
/// and [`Error::Truncated`] if it ends inside the header.
pub fn read_box_header<R: Read>(r: &mut OffsetReader<R>) -> Result<BoxHeader> {
    let start = r.position();
    let mut head = [0u8; 8];
    let mut got = 0;
    while got < head.len() {
        match r.read(&mut head[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if got == 0 {
        return Err(Error::EndOfStream);
    }
    let mut typ = [0u8; 4];
    if got < head.len() {
        typ[..got.saturating_sub(4)].copy_from_slice(&head[4..got.max(4)]);
        return Err(Error::Truncated { tag: FourCC(typ), offset: start });
    }

    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    typ.copy_from_slice(&head[4..8]);
    let typ = FourCC(typ);

    let (size, header_size) = if size32 == 1 {
        let ext = r
            .read_u64::<BigEndian>()
            .map_err(|_| Error::Truncated { tag: typ, offset: start })?;
        (ext, 16u64)
    } else {
        (size32 as u64, 8u64)
    };

    if size != 0 && size < header_size {
        let reason = if header_size == 16 {
            format!("extended size {} smaller than its 16-byte header", size)
        } else {
            format!("unsupported size marker {}", size)
        };
        return Err(Error::structural(typ, start, reason));
    }

    Ok(BoxHeader { size, typ, header_size, start })
}
