//! Annex-B H.264 framing: start-code scanning, NAL classification and
//! per-frame access units.

use crate::error::{Error, Result};
use serde::Serialize;

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NalKind {
    Sps,
    Pps,
    Idr,
    NonIdr,
    /// SEI, access unit delimiters and anything else.
    Other(u8),
}

impl NalKind {
    pub fn from_header(byte: u8) -> Self {
        match byte & 0x1F {
            7 => NalKind::Sps,
            8 => NalKind::Pps,
            5 => NalKind::Idr,
            1 => NalKind::NonIdr,
            t => NalKind::Other(t),
        }
    }

    pub fn is_slice(self) -> bool {
        matches!(self, NalKind::Idr | NalKind::NonIdr)
    }
}

/// One NAL unit located in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementaryFrame {
    pub kind: NalKind,
    /// Offset of the start code.
    pub byte_offset: usize,
    /// Start code plus NAL bytes, up to the next start code or the end.
    pub length: usize,
}

impl ElementaryFrame {
    /// The NAL unit bytes, without the start code.
    pub fn nal<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.byte_offset + START_CODE.len()..self.byte_offset + self.length]
    }

    /// Size of this NAL once the start code is rewritten as a 4-byte length.
    pub fn sample_len(&self) -> usize {
        self.length
    }
}

fn start_codes(buf: &[u8]) -> Vec<usize> {
    buf.windows(START_CODE.len())
        .enumerate()
        .filter(|(_, w)| *w == START_CODE)
        .map(|(i, _)| i)
        .collect()
}

/// Locate every NAL unit introduced by a 4-byte start code.
pub fn scan_nal_units(buf: &[u8]) -> Vec<ElementaryFrame> {
    let marks = start_codes(buf);
    if let Some(&first) = marks.first() {
        if first > 0 {
            log::debug!("annexb: {} bytes before the first start code", first);
        }
    }

    let mut out = Vec::with_capacity(marks.len());
    for (i, &at) in marks.iter().enumerate() {
        let end = marks.get(i + 1).copied().unwrap_or(buf.len());
        let header = at + START_CODE.len();
        if header >= end {
            continue;
        }
        out.push(ElementaryFrame {
            kind: NalKind::from_header(buf[header]),
            byte_offset: at,
            length: end - at,
        });
    }
    out
}

/// The NAL units of one input frame. Exactly one of them is a coded slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub nals: Vec<ElementaryFrame>,
    slice: usize,
}

impl AccessUnit {
    pub fn slice(&self) -> &ElementaryFrame {
        &self.nals[self.slice]
    }

    pub fn is_keyframe(&self) -> bool {
        self.slice().kind == NalKind::Idr
    }

    pub fn find(&self, kind: NalKind) -> Option<&ElementaryFrame> {
        self.nals.iter().find(|n| n.kind == kind)
    }
}

/// Scan one frame and check it carries exactly one coded slice.
pub fn frame_access_unit(frame: &[u8], index: usize) -> Result<AccessUnit> {
    let nals = scan_nal_units(frame);
    let slices: Vec<usize> = nals
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind.is_slice())
        .map(|(i, _)| i)
        .collect();
    match slices.as_slice() {
        [slice] => Ok(AccessUnit { slice: *slice, nals }),
        [] => Err(Error::MuxInvariant(format!(
            "frame {} has no coded slice ({} NAL units)",
            index,
            nals.len()
        ))),
        many => Err(Error::MuxInvariant(format!(
            "frame {} has {} coded slices; one per frame is supported",
            index,
            many.len()
        ))),
    }
}

/// SPS and PPS taken from the first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    pub fn from_access_unit(frame: &[u8], au: &AccessUnit) -> Result<Self> {
        let sps = au
            .find(NalKind::Sps)
            .ok_or_else(|| Error::MuxInvariant("first frame carries no SPS".into()))?;
        let pps = au
            .find(NalKind::Pps)
            .ok_or_else(|| Error::MuxInvariant("first frame carries no PPS".into()))?;
        Ok(Self {
            sps: sps.nal(frame).to_vec(),
            pps: pps.nal(frame).to_vec(),
        })
    }
}

/// Cut a continuous Annex-B stream into frames. A frame runs from the end of
/// the previous coded slice through the next one, so parameter sets and SEI
/// stay with the slice they precede.
pub fn split_access_units(stream: &[u8]) -> Vec<&[u8]> {
    let nals = scan_nal_units(stream);
    let mut frames = Vec::new();
    let mut frame_start: Option<usize> = None;

    for nal in &nals {
        let start = *frame_start.get_or_insert(nal.byte_offset);
        if nal.kind.is_slice() {
            frames.push(&stream[start..nal.byte_offset + nal.length]);
            frame_start = None;
        }
    }
    if let Some(start) = frame_start {
        log::debug!(
            "annexb: dropping {} bytes after the last coded slice",
            stream.len() - start
        );
    }
    frames
}
