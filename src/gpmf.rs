//! GPMF key-length-value telemetry.
//!
//! Each item is an 8-byte header (4-byte key, 1-byte type, 1-byte element
//! size, 2-byte big-endian repeat count) followed by `size * repeat` bytes
//! of data padded to a 32-bit boundary. Type `0` nests further items.

use crate::boxes::FourCC;
use crate::error::{Result, malformed};
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, Read};

pub const NESTED: u8 = 0;

#[derive(Debug, Clone, Serialize)]
pub struct KlvNode {
    pub key: FourCC,
    #[serde(serialize_with = "type_char")]
    pub kind: u8,
    pub size: u8,
    pub repeat: u16,
    pub value: KlvValue,
}

fn type_char<S: serde::Serializer>(kind: &u8, s: S) -> std::result::Result<S::Ok, S::Error> {
    if *kind == NESTED {
        s.serialize_str("nested")
    } else {
        s.serialize_char(*kind as char)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KlvValue {
    Nested(Vec<KlvNode>),
    Chars { text: String, padded_len: u32 },
    Bytes(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Raw(#[serde(serialize_with = "crate::boxes::hex_bytes")] Vec<u8>),
}

impl KlvNode {
    /// Byte length of the data (without header), before padding.
    pub fn data_len(&self) -> u32 {
        self.size as u32 * self.repeat as u32
    }
}

fn padded(len: u64) -> u64 {
    (len + 3) & !3
}

/// Decode items from `r` until `budget` bytes are used. The whole budget is
/// always consumed: an all-zero key ends the scope and the rest is padding.
pub fn decode_klv(r: &mut dyn Read, budget: u64) -> Result<Vec<KlvNode>> {
    let mut items = Vec::new();
    let mut left = budget;

    while left > 0 {
        if left < 8 {
            log::debug!("klv: {} trailing bytes in scope", left);
            skip(r, left)?;
            break;
        }
        let key = FourCC([r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?]);
        let kind = r.read_u8()?;
        let size = r.read_u8()?;
        let repeat = r.read_u16::<BigEndian>()?;
        left -= 8;

        if key.is_zero() {
            skip(r, left)?;
            break;
        }

        let total = size as u64 * repeat as u64;
        let with_pad = padded(total);
        if with_pad > left {
            return Err(malformed(format!(
                "klv '{}' needs {} bytes but only {} remain in scope",
                key, with_pad, left
            )));
        }

        let value = if kind == NESTED {
            let children = decode_klv(r, total)?;
            skip(r, with_pad - total)?;
            KlvValue::Nested(children)
        } else {
            let mut data = vec![0u8; with_pad as usize];
            r.read_exact(&mut data)?;
            data.truncate(total as usize);
            decode_elements(kind, data, with_pad as u32)
        };
        left -= with_pad;

        items.push(KlvNode { key, kind, size, repeat, value });
    }
    Ok(items)
}

fn decode_elements(kind: u8, data: Vec<u8>, padded_len: u32) -> KlvValue {
    let width = match kind {
        b'c' | b'B' | b'b' => 1,
        b's' | b'S' => 2,
        b'l' | b'L' | b'f' | b'F' => 4,
        b'j' | b'J' | b'd' => 8,
        _ => return KlvValue::Raw(data),
    };
    if data.len() % width != 0 {
        return KlvValue::Raw(data);
    }
    let n = data.len() / width;

    match kind {
        b'c' => {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            KlvValue::Chars {
                text: String::from_utf8_lossy(&data[..end]).to_string(),
                padded_len,
            }
        }
        b'B' => KlvValue::Bytes(data),
        b'b' => KlvValue::I8(data.iter().map(|&b| b as i8).collect()),
        b's' => KlvValue::I16(elements(&data, n, |c| c.read_i16::<BigEndian>())),
        b'S' => KlvValue::U16(elements(&data, n, |c| c.read_u16::<BigEndian>())),
        b'l' => KlvValue::I32(elements(&data, n, |c| c.read_i32::<BigEndian>())),
        b'L' => KlvValue::U32(elements(&data, n, |c| c.read_u32::<BigEndian>())),
        b'f' | b'F' => KlvValue::F32(elements(&data, n, |c| c.read_f32::<BigEndian>())),
        b'j' => KlvValue::I64(elements(&data, n, |c| c.read_i64::<BigEndian>())),
        b'J' => KlvValue::U64(elements(&data, n, |c| c.read_u64::<BigEndian>())),
        b'd' => KlvValue::F64(elements(&data, n, |c| c.read_f64::<BigEndian>())),
        _ => KlvValue::Raw(data),
    }
}

// `data` is already a whole number of elements, so the reads cannot run short.
fn elements<T>(data: &[u8], n: usize, read: impl Fn(&mut &[u8]) -> io::Result<T>) -> Vec<T> {
    let mut cur = data;
    (0..n).filter_map(|_| read(&mut cur).ok()).collect()
}

fn skip(r: &mut dyn Read, n: u64) -> Result<()> {
    let copied = io::copy(&mut r.take(n), &mut io::sink())?;
    if copied != n {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}
