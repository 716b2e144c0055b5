//! Box writer with size backpatching.
//!
//! `begin` records where a box starts and writes a zero size; `end` seeks
//! back, writes the real size and returns to the end of the output. Boxes
//! nest by pairing the calls. Between calls the cursor is always at the end
//! of the output.

use crate::boxes::FourCC;
use crate::error::{Error, Result};
use crate::fields::to_fixed_16_16;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Seek, SeekFrom, Write};

/// Identity transform in 16.16 / 2.30 fixed point.
pub const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

struct Pending {
    start: u64,
    tag: FourCC,
}

pub struct BoxWriter<W: Write + Seek> {
    inner: W,
    pending: Vec<Pending>,
}

impl<W: Write + Seek> BoxWriter<W> {
    /// Wrap a seekable output. Probes the seek once so an unseekable
    /// destination fails here rather than at the first backpatch.
    pub fn new(mut inner: W) -> Result<Self> {
        inner
            .stream_position()
            .map_err(|e| Error::NotSeekable(e.to_string()))?;
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Open boxes not yet closed with [`BoxWriter::end`].
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    pub fn begin(&mut self, tag: &[u8; 4]) -> Result<()> {
        let start = self.position()?;
        self.inner.write_u32::<BigEndian>(0)?;
        self.inner.write_all(tag)?;
        self.pending.push(Pending {
            start,
            tag: FourCC(*tag),
        });
        Ok(())
    }

    pub fn begin_full(&mut self, tag: &[u8; 4], version: u8, flags: u32) -> Result<()> {
        self.begin(tag)?;
        self.inner.write_u8(version)?;
        self.inner.write_u24::<BigEndian>(flags)?;
        Ok(())
    }

    /// Close the innermost open box. Returns its total size.
    pub fn end(&mut self) -> Result<u64> {
        let open = self
            .pending
            .pop()
            .ok_or_else(|| Error::MuxInvariant("end() without an open box".into()))?;
        let end = self.position()?;
        let size = end - open.start;
        let size32 = u32::try_from(size).map_err(|_| {
            Error::MuxInvariant(format!("'{}' grew to {} bytes, past a 32-bit size", open.tag, size))
        })?;
        self.patch_u32(open.start, size32)?;
        Ok(size)
    }

    /// Overwrite four bytes at `pos` and return to the end of the output.
    pub fn patch_u32(&mut self, pos: u64, value: u32) -> Result<()> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        self.inner.write_u32::<BigEndian>(value)?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Header for a box whose payload length is known up front. Uses the
    /// 16-byte extended form when the total does not fit 32 bits.
    /// Returns the header length.
    pub fn write_header(&mut self, tag: &[u8; 4], payload_len: u64) -> Result<u64> {
        match u32::try_from(payload_len + 8) {
            Ok(size) => {
                self.inner.write_u32::<BigEndian>(size)?;
                self.inner.write_all(tag)?;
                Ok(8)
            }
            Err(_) => {
                self.inner.write_u32::<BigEndian>(1)?;
                self.inner.write_all(tag)?;
                self.inner.write_u64::<BigEndian>(payload_len + 16)?;
                Ok(16)
            }
        }
    }

    /// Complete leaf box.
    pub fn write_box(&mut self, tag: &[u8; 4], payload: &[u8]) -> Result<u64> {
        let header = self.write_header(tag, payload.len() as u64)?;
        self.inner.write_all(payload)?;
        Ok(header + payload.len() as u64)
    }

    pub fn u8(&mut self, v: u8) -> Result<()> {
        Ok(self.inner.write_u8(v)?)
    }

    pub fn u16(&mut self, v: u16) -> Result<()> {
        Ok(self.inner.write_u16::<BigEndian>(v)?)
    }

    pub fn i16(&mut self, v: i16) -> Result<()> {
        Ok(self.inner.write_i16::<BigEndian>(v)?)
    }

    pub fn u32(&mut self, v: u32) -> Result<()> {
        Ok(self.inner.write_u32::<BigEndian>(v)?)
    }

    pub fn u64(&mut self, v: u64) -> Result<()> {
        Ok(self.inner.write_u64::<BigEndian>(v)?)
    }

    pub fn fixed_16_16(&mut self, v: f64) -> Result<()> {
        self.u32(to_fixed_16_16(v))
    }

    pub fn fourcc(&mut self, tag: &[u8; 4]) -> Result<()> {
        Ok(self.inner.write_all(tag)?)
    }

    pub fn bytes(&mut self, b: &[u8]) -> Result<()> {
        Ok(self.inner.write_all(b)?)
    }

    pub fn zeros(&mut self, n: usize) -> Result<()> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut left = n;
        while left > 0 {
            let take = left.min(ZEROS.len());
            self.inner.write_all(&ZEROS[..take])?;
            left -= take;
        }
        Ok(())
    }

    pub fn matrix(&mut self) -> Result<()> {
        for v in UNITY_MATRIX {
            self.u32(v)?;
        }
        Ok(())
    }

    /// Flush and hand back the output. Fails if a box is still open.
    pub fn finish(mut self) -> Result<W> {
        if let Some(open) = self.pending.last() {
            return Err(Error::MuxInvariant(format!(
                "'{}' at {} was never closed",
                open.tag, open.start
            )));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for BoxWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
