//! Round-trip check of a file written by the muxer.

use crate::boxes::{FourCC, find_box};
use crate::error::{Error, Result};
use crate::mux::MuxReport;
use crate::parser::read_box_header;
use crate::registry::{BoxValue, StructuredData, default_registry};
use crate::util::OffsetReader;
use crate::walker::{WalkOptions, Walker};
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub samples_checked: usize,
    pub bytes_checked: u64,
    pub chunk_offset: u64,
}

fn fail(msg: impl Into<String>) -> Error {
    Error::Verification(msg.into())
}

/// Seek to `mdat_offset`, confirm an `mdat` box is there, and check that its
/// length-prefixed samples match `sizes` one for one and fill it exactly.
pub fn verify_mdat<R: Read + Seek>(r: &mut R, mdat_offset: u64, sizes: &[u32]) -> Result<VerifyReport> {
    r.seek(SeekFrom::Start(mdat_offset))?;
    let mut rd = OffsetReader::at(&mut *r, mdat_offset);
    let hdr = read_box_header(&mut rd).map_err(|e| fail(format!("no box at {:#x}: {}", mdat_offset, e)))?;
    if hdr.typ != FourCC(*b"mdat") {
        return Err(fail(format!("expected 'mdat' at {:#x}, found '{}'", mdat_offset, hdr.typ)));
    }
    let payload = hdr
        .payload_len()
        .ok_or_else(|| fail("mdat has no declared size"))?;

    let mut checked = 0u64;
    for (i, &expected) in sizes.iter().enumerate() {
        if checked + 4 > payload {
            return Err(fail(format!("sample {} starts past the end of mdat", i)));
        }
        let len = rd
            .read_u32::<BigEndian>()
            .map_err(|e| fail(format!("sample {}: length prefix unreadable: {}", i, e)))?;
        let recovered = len as u64 + 4;
        if recovered != expected as u64 {
            return Err(fail(format!(
                "sample {}: mdat holds {} bytes, stsz says {}",
                i, recovered, expected
            )));
        }
        if checked + recovered > payload {
            return Err(fail(format!("sample {} runs past the end of mdat", i)));
        }
        let skipped = std::io::copy(&mut (&mut rd).take(len as u64), &mut std::io::sink())?;
        if skipped != len as u64 {
            return Err(fail(format!("sample {} is truncated", i)));
        }
        checked += recovered;
    }

    if checked != payload {
        return Err(fail(format!(
            "{} bytes of mdat not covered by the {} samples",
            payload - checked,
            sizes.len()
        )));
    }
    Ok(VerifyReport {
        samples_checked: sizes.len(),
        bytes_checked: checked,
        chunk_offset: hdr.payload_start(),
    })
}

/// Re-read a muxed file: its own `stsz`, `stco` and `mdat` must agree with
/// what the muxer reported, and the samples must match the table.
pub fn verify_file<R: Read + Seek>(mut r: R, expected: &MuxReport) -> Result<VerifyReport> {
    r.seek(SeekFrom::Start(0))?;
    let registry = default_registry();
    // the configured brand need not be on the allow-list
    let options = WalkOptions { brand_check: false, ..WalkOptions::default() };
    let roots = Walker::new(&registry, None, options)
        .walk_file(&mut r)
        .map_err(|e| fail(format!("output does not parse: {}", e)))?;

    let stsz = match find_box(&roots, FourCC(*b"stsz")).and_then(|b| b.value.as_ref()) {
        Some(BoxValue::Structured(StructuredData::SampleSize(s))) => s.clone(),
        _ => return Err(fail("output has no sample size table")),
    };
    let file_sizes: Vec<u32> = if stsz.sample_size != 0 {
        vec![stsz.sample_size; stsz.sample_count as usize]
    } else {
        stsz.sample_sizes
    };
    if file_sizes.len() != expected.sample_sizes.len() {
        return Err(fail(format!(
            "stsz lists {} samples, muxer wrote {}",
            file_sizes.len(),
            expected.sample_sizes.len()
        )));
    }
    if let Some((i, (got, want))) = file_sizes
        .iter()
        .zip(&expected.sample_sizes)
        .enumerate()
        .find(|(_, (a, b))| a != b)
    {
        return Err(fail(format!("stsz entry {}: file says {}, muxer wrote {}", i, got, want)));
    }

    match find_box(&roots, FourCC(*b"stco")).and_then(|b| b.value.as_ref()) {
        Some(BoxValue::Structured(StructuredData::ChunkOffset(c)))
            if c.chunk_offsets.as_slice() == [expected.chunk_offset as u32] => {}
        Some(BoxValue::Structured(StructuredData::ChunkOffset(c))) => {
            return Err(fail(format!(
                "stco holds {:?}, expected [{}]",
                c.chunk_offsets, expected.chunk_offset
            )));
        }
        _ => return Err(fail("output has no chunk offset table")),
    }

    let mdat = roots
        .iter()
        .find(|b| b.header.typ == FourCC(*b"mdat"))
        .ok_or_else(|| fail("output has no mdat"))?;
    if mdat.header.start != expected.mdat_offset {
        return Err(fail(format!(
            "mdat found at {:#x}, muxer wrote it at {:#x}",
            mdat.header.start, expected.mdat_offset
        )));
    }

    let report = verify_mdat(&mut r, expected.mdat_offset, &expected.sample_sizes)?;
    if report.chunk_offset != expected.chunk_offset {
        return Err(fail(format!(
            "first sample at {:#x}, stco says {:#x}",
            report.chunk_offset, expected.chunk_offset
        )));
    }
    log::info!(
        "verified {} samples, {} bytes",
        report.samples_checked,
        report.bytes_checked
    );
    Ok(report)
}

pub fn verify_path(path: impl AsRef<Path>, expected: &MuxReport) -> Result<VerifyReport> {
    let file = File::open(path.as_ref())?;
    verify_file(file, expected)
}

/// Verify the muxer's output at `path`, or standard output when `None`.
/// Standard output is usually open write-only, so it is re-read through
/// `/proc/self/fd/1`.
pub fn verify_output(path: Option<&Path>, expected: &MuxReport) -> Result<VerifyReport> {
    match path {
        Some(p) => verify_path(p, expected),
        None => {
            let file = File::open("/proc/self/fd/1")
                .map_err(|e| fail(format!("cannot re-read standard output: {}", e)))?;
            verify_file(file, expected)
        }
    }
}
