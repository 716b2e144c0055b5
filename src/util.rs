use std::io::{self, Read, Seek, SeekFrom};

/// Reader that tracks its absolute stream offset, so non-seekable input
/// (standard input) can still report box positions.
pub struct OffsetReader<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> OffsetReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    /// Wrap a reader already positioned at `pos`.
    pub fn at(inner: R, pos: u64) -> Self {
        Self { inner, pos }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: Read> Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

pub const SCRATCH_CAPACITY: usize = 16 * 1024;

/// Fixed-capacity buffer reused for every bounded dump during a walk.
pub struct ScratchBuf {
    buf: Box<[u8; SCRATCH_CAPACITY]>,
}

impl ScratchBuf {
    pub fn new() -> Self {
        Self { buf: Box::new([0u8; SCRATCH_CAPACITY]) }
    }

    /// Drain exactly `len` bytes from `r`, keeping at most `preview_len` of them.
    /// Returns the preview and the number of bytes drained (less than `len`
    /// only if `len` is `u64::MAX`, i.e. "to end of stream").
    pub fn drain<R: Read + ?Sized>(
        &mut self,
        r: &mut R,
        len: u64,
        preview_len: usize,
    ) -> io::Result<(Vec<u8>, u64)> {
        let to_eof = len == u64::MAX;
        let mut preview = Vec::with_capacity(preview_len.min(len as usize));
        let mut left = len;
        let mut total = 0u64;
        while left > 0 {
            let want = left.min(SCRATCH_CAPACITY as u64) as usize;
            let n = r.read(&mut self.buf[..want])?;
            if n == 0 {
                if to_eof {
                    break;
                }
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            if preview.len() < preview_len {
                let keep = (preview_len - preview.len()).min(n);
                preview.extend_from_slice(&self.buf[..keep]);
            }
            total += n as u64;
            left -= n as u64;
        }
        Ok((preview, total))
    }
}

impl Default for ScratchBuf {
    fn default() -> Self {
        Self::new()
    }
}

pub fn read_slice<R: Read + Seek>(r: &mut R, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    r.seek(SeekFrom::Start(offset))?;
    let mut v = vec![0u8; len as usize];
    r.read_exact(&mut v)?;
    Ok(v)
}

pub fn hex_dump(bytes: &[u8], start_offset: u64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offs = start_offset + (i as u64) * 16;
        let hexs: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
        let ascii: String = chunk.iter().map(|b| {
            let c = *b;
            if (32..=126).contains(&c) { c as char } else { '.' }
        }).collect();
        out.push_str(&format!("{:08x}  {:<48}  |{}|\n", offs, hexs, ascii));
    }
    out
}
