//! Codec configuration records carried inside sample entries: `avcC` and `esds`.

use crate::error::{Result, malformed};
use crate::fields::read_descriptor_len;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Write};

/// AVCDecoderConfigurationRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvcConfig {
    pub version: u8,
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// NAL length prefix size in bytes (1, 2 or 4).
    pub length_size: u8,
    #[serde(serialize_with = "hex_list")]
    pub sps: Vec<Vec<u8>>,
    #[serde(serialize_with = "hex_list")]
    pub pps: Vec<Vec<u8>>,
    /// High-profile extension bytes, kept opaque.
    #[serde(serialize_with = "crate::boxes::hex_bytes")]
    pub trailing: Vec<u8>,
}

fn hex_list<S: serde::Serializer>(list: &[Vec<u8>], s: S) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(list.len()))?;
    for item in list {
        seq.serialize_element(&hex::encode(item))?;
    }
    seq.end()
}

impl AvcConfig {
    /// Build a record for one SPS/PPS pair; profile, compatibility and level
    /// come from SPS bytes 1..4.
    pub fn from_parameter_sets(sps: &[u8], pps: &[u8]) -> Result<Self> {
        if sps.len() < 4 {
            return Err(malformed(format!("SPS of {} bytes is too short", sps.len())));
        }
        Ok(Self {
            version: 1,
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            length_size: 4,
            sps: vec![sps.to_vec()],
            pps: vec![pps.to_vec()],
            trailing: Vec::new(),
        })
    }

    /// Decode the record, consuming the whole reader.
    pub fn decode(r: &mut dyn Read) -> Result<Self> {
        let version = r.read_u8()?;
        let profile = r.read_u8()?;
        let compatibility = r.read_u8()?;
        let level = r.read_u8()?;
        let length_size = (r.read_u8()? & 0x03) + 1;

        let sps_count = r.read_u8()? & 0x1F;
        let mut sps = Vec::with_capacity(sps_count as usize);
        for _ in 0..sps_count {
            sps.push(read_u16_prefixed(r)?);
        }
        let pps_count = r.read_u8()?;
        let mut pps = Vec::with_capacity(pps_count as usize);
        for _ in 0..pps_count {
            pps.push(read_u16_prefixed(r)?);
        }

        let mut trailing = Vec::new();
        r.read_to_end(&mut trailing)?;

        Ok(Self {
            version,
            profile,
            compatibility,
            level,
            length_size,
            sps,
            pps,
            trailing,
        })
    }

    pub fn encoded_len(&self) -> usize {
        7 + self.sps.iter().map(|s| 2 + s.len()).sum::<usize>()
            + self.pps.iter().map(|p| 2 + p.len()).sum::<usize>()
            + self.trailing.len()
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.version)?;
        w.write_u8(self.profile)?;
        w.write_u8(self.compatibility)?;
        w.write_u8(self.level)?;
        w.write_u8(0xFC | (self.length_size - 1))?;
        w.write_u8(0xE0 | self.sps.len() as u8)?;
        for s in &self.sps {
            w.write_u16::<BigEndian>(s.len() as u16)?;
            w.write_all(s)?;
        }
        w.write_u8(self.pps.len() as u8)?;
        for p in &self.pps {
            w.write_u16::<BigEndian>(p.len() as u16)?;
            w.write_all(p)?;
        }
        w.write_all(&self.trailing)?;
        Ok(())
    }
}

fn read_u16_prefixed(r: &mut dyn Read) -> Result<Vec<u8>> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut v = vec![0u8; len];
    r.read_exact(&mut v)?;
    Ok(v)
}

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub flags: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on_es_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoder_config: Option<DecoderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_predefined: Option<u8>,
    /// Descriptors with tags we do not interpret, as `(tag, length)`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<(u8, u32)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecoderConfig {
    pub object_type: u8,
    pub stream_type: u8,
    pub buffer_size: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    #[serde(serialize_with = "crate::boxes::hex_bytes")]
    pub specific_info: Vec<u8>,
}

/// Decode the descriptor payload of an `esds` box (after version/flags).
/// Consumes the whole reader.
pub fn decode_esds(r: &mut dyn Read) -> Result<EsDescriptor> {
    let mut es = EsDescriptor::default();
    let mut payload = Vec::new();
    r.read_to_end(&mut payload)?;
    walk_descriptors(&payload, &mut es, 0)?;
    Ok(es)
}

const MAX_DESCRIPTOR_DEPTH: usize = 8;

/// Decode the descriptors in `cur`, descending into the ones that nest
/// others and resuming after them.
fn walk_descriptors(mut cur: &[u8], es: &mut EsDescriptor, depth: usize) -> Result<()> {
    if depth > MAX_DESCRIPTOR_DEPTH {
        return Err(malformed(format!(
            "descriptors nested deeper than {} levels",
            MAX_DESCRIPTOR_DEPTH
        )));
    }
    while !cur.is_empty() {
        let tag = cur.read_u8()?;
        let (len, _) = read_descriptor_len(&mut cur)?;
        if len as usize > cur.len() {
            return Err(malformed(format!(
                "descriptor 0x{:02x} claims {} bytes, {} left",
                tag,
                len,
                cur.len()
            )));
        }
        let (mut body, rest) = cur.split_at(len as usize);
        match tag {
            ES_DESCRIPTOR_TAG => {
                es.es_id = body.read_u16::<BigEndian>()?;
                es.flags = body.read_u8()?;
                if es.flags & 0x80 != 0 {
                    es.depends_on_es_id = Some(body.read_u16::<BigEndian>()?);
                }
                if es.flags & 0x40 != 0 {
                    let n = body.read_u8()? as usize;
                    let mut url = vec![0u8; n];
                    body.read_exact(&mut url)?;
                    es.url = Some(String::from_utf8_lossy(&url).to_string());
                }
                if es.flags & 0x20 != 0 {
                    let _ocr_es_id = body.read_u16::<BigEndian>()?;
                }
                walk_descriptors(body, es, depth + 1)?;
            }
            DECODER_CONFIG_TAG => {
                let object_type = body.read_u8()?;
                let stream_type = body.read_u8()? >> 2;
                let buffer_size = body.read_u24::<BigEndian>()?;
                let max_bitrate = body.read_u32::<BigEndian>()?;
                let avg_bitrate = body.read_u32::<BigEndian>()?;
                es.decoder_config = Some(DecoderConfig {
                    object_type,
                    stream_type,
                    buffer_size,
                    max_bitrate,
                    avg_bitrate,
                    specific_info: Vec::new(),
                });
                walk_descriptors(body, es, depth + 1)?;
            }
            DECODER_SPECIFIC_TAG => {
                if let Some(dc) = es.decoder_config.as_mut() {
                    dc.specific_info = body.to_vec();
                } else {
                    es.skipped.push((tag, len));
                }
            }
            SL_CONFIG_TAG => {
                es.sl_predefined = body.first().copied();
            }
            _ => es.skipped.push((tag, len)),
        }
        cur = rest;
    }
    Ok(())
}
