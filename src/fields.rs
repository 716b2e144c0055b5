//! Primitive field decoders shared by the built-in decoders and the schema
//! interpreter.

use crate::boxes::FourCC;
use crate::error::{Result, malformed};
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::Read;

/// Seconds between 1904-01-01 (MP4 epoch) and 1970-01-01.
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// A named, decoded field.
#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self { name: name.into(), value }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Fixed(f64),
    FourCC(FourCC),
    FourCCList(Vec<FourCC>),
    Language(String),
    Time(Mp4Time),
    VersionFlags { version: u8, flags: u32 },
    Text(String),
    Bytes(#[serde(serialize_with = "crate::boxes::hex_bytes")] Vec<u8>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Signed(v) => write!(f, "{}", v),
            FieldValue::Fixed(v) => write!(f, "{}", v),
            FieldValue::FourCC(cc) => write!(f, "{}", cc),
            FieldValue::FourCCList(list) => {
                let names: Vec<String> = list.iter().map(|c| c.to_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
            FieldValue::Language(l) => write!(f, "{}", l),
            FieldValue::Time(t) => write!(f, "{}", t),
            FieldValue::VersionFlags { version, flags } => {
                write!(f, "version={} flags=0x{:06x}", version, flags)
            }
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Bytes(b) => {
                if b.len() > 16 {
                    write!(f, "{}... ({} bytes)", hex::encode(&b[..16]), b.len())
                } else {
                    write!(f, "{}", hex::encode(b))
                }
            }
        }
    }
}

/// Timestamp counted in seconds from the MP4 epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mp4Time {
    pub raw: u64,
    /// Seconds since the Unix epoch; negative before 1970. `None` when the
    /// raw count does not fit an `i64`.
    pub unix: Option<i64>,
}

impl Mp4Time {
    pub fn from_raw(raw: u64) -> Self {
        let unix = i64::try_from(raw)
            .ok()
            .and_then(|r| r.checked_sub(MP4_EPOCH_OFFSET as i64));
        Self { raw, unix }
    }

    pub fn from_unix(unix: i64) -> Self {
        let raw = unix.saturating_add(MP4_EPOCH_OFFSET as i64).max(0) as u64;
        Self { raw, unix: Some(unix) }
    }
}

impl fmt::Display for Mp4Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unix {
            _ if self.raw == 0 => write!(f, "unset"),
            Some(unix) => write!(f, "unix {}", unix),
            None => write!(f, "raw {}", self.raw),
        }
    }
}

pub fn read_version_flags(r: &mut dyn Read) -> Result<(u8, u32)> {
    let version = r.read_u8()?;
    let flags = r.read_u24::<BigEndian>()?;
    Ok((version, flags))
}

pub fn read_fourcc(r: &mut dyn Read) -> Result<FourCC> {
    let mut cc = [0u8; 4];
    r.read_exact(&mut cc)?;
    Ok(FourCC(cc))
}

/// Read FourCCs until the reader is exhausted. A trailing partial code is malformed.
pub fn read_fourcc_list(r: &mut dyn Read) -> Result<Vec<FourCC>> {
    let mut rest = Vec::new();
    r.read_to_end(&mut rest)?;
    if rest.len() % 4 != 0 {
        return Err(malformed(format!(
            "FourCC list of {} bytes is not a multiple of 4",
            rest.len()
        )));
    }
    Ok(rest
        .chunks_exact(4)
        .map(|c| FourCC([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn fixed_16_16(raw: u32) -> f64 {
    raw as i32 as f64 / 65536.0
}

pub fn fixed_8_8(raw: u16) -> f64 {
    raw as i16 as f64 / 256.0
}

pub fn to_fixed_16_16(v: f64) -> u32 {
    (v * 65536.0).round() as i32 as u32
}

/// ISO-639-2/T code packed as three 5-bit letters offset from 0x60.
pub fn lang_from_u16(code: u16) -> String {
    if code == 0 || code == 0x7FFF {
        return "und".to_string();
    }
    if code < 0x400 {
        // QuickTime Macintosh language code
        return format!("mac:{}", code);
    }
    let c1 = ((code >> 10) & 0x1F) as u8 + 0x60;
    let c2 = ((code >> 5) & 0x1F) as u8 + 0x60;
    let c3 = (code & 0x1F) as u8 + 0x60;
    format!("{}{}{}", c1 as char, c2 as char, c3 as char)
}

pub fn lang_to_u16(lang: &str) -> u16 {
    let b = lang.as_bytes();
    if b.len() != 3 || !b.iter().all(|c| c.is_ascii_lowercase()) {
        return lang_to_u16("und");
    }
    (((b[0] - 0x60) as u16) << 10) | (((b[1] - 0x60) as u16) << 5) | ((b[2] - 0x60) as u16)
}

/// MPEG-4 descriptor length.
///
/// Bytes with the high bit set are continuation markers and contribute
/// nothing; the first byte without it ends the length and supplies its value.
/// At most three markers are accepted before the terminating byte, so the
/// field spans one to four bytes. Unlike the 7-bit accumulation of
/// ISO/IEC 14496-1, `[0x81, 0x02]` yields 2.
///
/// Returns `(length, bytes_read)`.
pub fn read_descriptor_len(r: &mut dyn Read) -> Result<(u32, u64)> {
    let mut read = 0u64;
    loop {
        let b = r.read_u8()?;
        read += 1;
        if b & 0x80 == 0 {
            return Ok((b as u32, read));
        }
        if read == 4 {
            return Err(malformed("descriptor length runs past four bytes"));
        }
    }
}

/// Read until the first NUL (consumed) or the end of the reader.
pub fn read_c_string(r: &mut dyn Read) -> Result<String> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(c_string_lossy(&buf))
}

pub fn c_string_lossy(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// Version-sized unsigned: 32 bits for version 0, 64 bits otherwise.
pub fn read_uint_v(r: &mut dyn Read, version: u8) -> Result<u64> {
    if version == 1 {
        Ok(r.read_u64::<BigEndian>()?)
    } else {
        Ok(r.read_u32::<BigEndian>()? as u64)
    }
}
