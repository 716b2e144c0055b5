use crate::boxes::{BoxHeader, FourCC, RawPreview};
use crate::codec::{AvcConfig, EsDescriptor, decode_esds};
use crate::error::{Result, malformed};
use crate::fields::{
    Field, Mp4Time, fixed_8_8, fixed_16_16, lang_from_u16, read_c_string, read_fourcc,
    read_fourcc_list, read_uint_v, read_version_flags,
};
use crate::gpmf::{KlvNode, decode_klv};
use crate::text::{LabeledText, TextLayout, classify, decode_labeled_text};
use crate::walker::Scope;
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;

/// A value returned from a box decoder.
///
/// Built-in decoders return structured data; the schema interpreter returns
/// a field list or text; the fallback dumper returns a bounded preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxValue {
    Structured(StructuredData),
    Fields(Vec<Field>),
    Text(String),
    Bytes(RawPreview),
}

impl BoxValue {
    /// Timescale this box establishes for the boxes that follow it.
    pub fn timescale(&self) -> Option<u32> {
        match self {
            BoxValue::Structured(StructuredData::MovieHeader(m)) => Some(m.timescale),
            BoxValue::Structured(StructuredData::MediaHeader(m)) => Some(m.timescale),
            BoxValue::Fields(fields) => fields.iter().find_map(|f| match (&f.name[..], &f.value) {
                ("timescale", crate::fields::FieldValue::Unsigned(v)) => Some(*v as u32),
                _ => None,
            }),
            _ => None,
        }
    }

    /// One-line description for text output.
    pub fn summary(&self) -> String {
        match self {
            BoxValue::Structured(s) => s.summary(),
            BoxValue::Fields(fields) => fields
                .iter()
                .map(|f| format!("{}={}", f.name, f.value))
                .collect::<Vec<_>>()
                .join(" "),
            BoxValue::Text(t) => format!("{:?}", t),
            BoxValue::Bytes(raw) => {
                if raw.preview.is_empty() {
                    format!("{} bytes", raw.total_len)
                } else {
                    format!("{} bytes: {}", raw.total_len, hex::encode(&raw.preview))
                }
            }
        }
    }
}

/// Structured data produced by the built-in decoders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredData {
    FileType(FtypData),
    MovieHeader(MvhdData),
    TrackHeader(TkhdData),
    MediaHeader(MdhdData),
    HandlerReference(HdlrData),
    VideoMediaHeader(VmhdData),
    SoundMediaHeader { version: u8, flags: u32, balance: f64 },
    /// Prefix of `dref`; entries follow as child boxes.
    DataReference { version: u8, flags: u32, entry_count: u32 },
    DataEntryUrl { version: u8, flags: u32, location: Option<String> },
    /// Prefix of `meta`; child boxes follow. A QuickTime `meta` has no
    /// version/flags and starts directly with its `hdlr` child.
    Meta {
        version: u8,
        flags: u32,
        quicktime: bool,
        /// Bytes read past the prefix while telling the layouts apart.
        #[serde(skip)]
        replay: Vec<u8>,
    },
    /// Prefix of `stsd`; sample entries follow as child boxes.
    SampleDescription(StsdData),
    VisualSampleEntry(VisualEntry),
    AudioSampleEntry(AudioEntry),
    DecodingTimeToSample(SttsData),
    CompositionTimeToSample(CttsData),
    SampleToChunk(StscData),
    SampleSize(StszData),
    SyncSample(StssData),
    ChunkOffset(StcoData),
    ChunkOffset64(Co64Data),
    EditList(ElstData),
    AvcConfiguration(AvcConfig),
    ElementaryStream { version: u8, flags: u32, descriptor: EsDescriptor },
    PixelAspectRatio { h_spacing: u32, v_spacing: u32 },
    LabeledText(LabeledText),
    Telemetry(Vec<KlvNode>),
}

impl StructuredData {
    pub fn summary(&self) -> String {
        match self {
            StructuredData::FileType(f) => format!(
                "major={} minor={:#x} compatible={:?}",
                f.major_brand, f.minor_version, f.compatible_brands
            ),
            StructuredData::MovieHeader(m) => format!(
                "timescale={} duration={} ({:.3}s) next_track_id={}",
                m.timescale,
                m.duration,
                seconds(m.duration, m.timescale),
                m.next_track_id
            ),
            StructuredData::TrackHeader(t) => format!(
                "track_id={} duration={}{} enabled={} in_movie={} in_preview={} width={} height={}",
                t.track_id,
                t.duration,
                t.duration_seconds.map(|s| format!(" ({:.3}s)", s)).unwrap_or_default(),
                t.enabled,
                t.in_movie,
                t.in_preview,
                t.width,
                t.height
            ),
            StructuredData::MediaHeader(m) => format!(
                "timescale={} duration={} ({:.3}s) language={}",
                m.timescale,
                m.duration,
                seconds(m.duration, m.timescale),
                m.language
            ),
            StructuredData::HandlerReference(h) => {
                format!("handler_type={} name={:?}", h.handler_type, h.name)
            }
            StructuredData::VideoMediaHeader(v) => {
                format!("graphics_mode={} opcolor={:?}", v.graphics_mode, v.opcolor)
            }
            StructuredData::SoundMediaHeader { balance, .. } => format!("balance={}", balance),
            StructuredData::DataReference { entry_count, .. } => {
                format!("entry_count={}", entry_count)
            }
            StructuredData::DataEntryUrl { flags, location, .. } => match location {
                Some(l) => format!("location={:?}", l),
                None if flags & 1 != 0 => "self-contained".to_string(),
                None => "no location".to_string(),
            },
            StructuredData::Meta { quicktime: true, .. } => "quicktime layout".to_string(),
            StructuredData::Meta { version, .. } => format!("version={}", version),
            StructuredData::SampleDescription(s) => format!("entry_count={}", s.entry_count),
            StructuredData::VisualSampleEntry(v) => format!(
                "data_reference_index={} width={} height={} compressor={:?} depth={}",
                v.data_reference_index, v.width, v.height, v.compressor_name, v.depth
            ),
            StructuredData::AudioSampleEntry(a) => format!(
                "data_reference_index={} channels={} sample_size={} sample_rate={}",
                a.data_reference_index, a.channel_count, a.sample_size, a.sample_rate
            ),
            StructuredData::DecodingTimeToSample(s) => format!(
                "entries={} samples={}{}",
                s.entry_count,
                s.entries.iter().map(|e| e.sample_count as u64).sum::<u64>(),
                s.duration_seconds.map(|d| format!(" ({:.3}s)", d)).unwrap_or_default()
            ),
            StructuredData::CompositionTimeToSample(c) => format!("entries={}", c.entry_count),
            StructuredData::SampleToChunk(s) => format!("entries={}", s.entry_count),
            StructuredData::SampleSize(s) => {
                if s.sample_size != 0 {
                    format!("sample_count={} constant_size={}", s.sample_count, s.sample_size)
                } else {
                    format!("sample_count={} sizes={:?}", s.sample_count, preview(&s.sample_sizes))
                }
            }
            StructuredData::SyncSample(s) => format!("entries={}", s.entry_count),
            StructuredData::ChunkOffset(c) => {
                format!("entries={} offsets={:?}", c.entry_count, preview(&c.chunk_offsets))
            }
            StructuredData::ChunkOffset64(c) => {
                format!("entries={} offsets={:?}", c.entry_count, preview(&c.chunk_offsets))
            }
            StructuredData::EditList(e) => format!("version={} entries={}", e.version, e.entries.len()),
            StructuredData::AvcConfiguration(a) => format!(
                "profile={} compatibility={:#04x} level={} length_size={} sps={} pps={}",
                a.profile,
                a.compatibility,
                a.level,
                a.length_size,
                a.sps.len(),
                a.pps.len()
            ),
            StructuredData::ElementaryStream { descriptor, .. } => match &descriptor.decoder_config {
                Some(dc) => format!(
                    "es_id={} object_type={:#04x} stream_type={} avg_bitrate={} specific_info={}",
                    descriptor.es_id,
                    dc.object_type,
                    dc.stream_type,
                    dc.avg_bitrate,
                    hex::encode(&dc.specific_info)
                ),
                None => format!("es_id={}", descriptor.es_id),
            },
            StructuredData::PixelAspectRatio { h_spacing, v_spacing } => {
                format!("{}:{}", h_spacing, v_spacing)
            }
            StructuredData::LabeledText(t) => match &t.language {
                Some(l) => format!("[{}] {:?}", l, t.text),
                None => format!("{:?}", t.text),
            },
            StructuredData::Telemetry(items) => format!("{} klv items", items.len()),
        }
    }
}

fn seconds(ticks: u64, timescale: u32) -> f64 {
    if timescale == 0 { 0.0 } else { ticks as f64 / timescale as f64 }
}

fn preview<T: Copy>(v: &[T]) -> Vec<T> {
    v.iter().take(8).copied().collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FtypData {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MvhdData {
    pub version: u8,
    pub flags: u32,
    pub creation_time: Mp4Time,
    pub modification_time: Mp4Time,
    pub timescale: u32,
    pub duration: u64,
    pub rate: f64,
    pub volume: f64,
    pub next_track_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TkhdData {
    pub version: u8,
    pub flags: u32,
    pub enabled: bool,
    pub in_movie: bool,
    pub in_preview: bool,
    pub creation_time: Mp4Time,
    pub modification_time: Mp4Time,
    pub track_id: u32,
    pub duration: u64,
    /// Duration in seconds using the enclosing movie timescale.
    pub duration_seconds: Option<f64>,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: f64,
    pub width: f64,
    pub height: f64,
}

/// Media Header Box data
#[derive(Debug, Clone, Serialize)]
pub struct MdhdData {
    pub version: u8,
    pub flags: u32,
    pub creation_time: Mp4Time,
    pub modification_time: Mp4Time,
    pub timescale: u32,
    pub duration: u64,
    pub language: String,
}

/// Handler Reference Box data
#[derive(Debug, Clone, Serialize)]
pub struct HdlrData {
    pub version: u8,
    pub flags: u32,
    pub handler_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmhdData {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

/// Sample Description Box prefix
#[derive(Debug, Clone, Serialize)]
pub struct StsdData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: f64,
    pub vert_resolution: f64,
    pub frame_count: u16,
    pub compressor_name: String,
    pub depth: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioEntry {
    pub data_reference_index: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: f64,
}

/// Decoding Time-to-Sample Box data
#[derive(Debug, Clone, Serialize)]
pub struct SttsData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub entries: Vec<SttsEntry>,
    /// Total duration in seconds using the enclosing media timescale; `None`
    /// without a timescale or when the tick total overflows.
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// Composition Time-to-Sample Box data
#[derive(Debug, Clone, Serialize)]
pub struct CttsData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub entries: Vec<CttsEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i64, // signed in version 1
}

/// Sample-to-Chunk Box data
#[derive(Debug, Clone, Serialize)]
pub struct StscData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub entries: Vec<StscEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample Size Box data
#[derive(Debug, Clone, Serialize)]
pub struct StszData {
    pub version: u8,
    pub flags: u32,
    pub sample_size: u32,
    pub sample_count: u32,
    pub sample_sizes: Vec<u32>, // Empty if sample_size > 0
}

/// Sync Sample Box data
#[derive(Debug, Clone, Serialize)]
pub struct StssData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub sample_numbers: Vec<u32>,
}

/// Chunk Offset Box data
#[derive(Debug, Clone, Serialize)]
pub struct StcoData {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub chunk_offsets: Vec<u32>,
}

/// 64-bit Chunk Offset Box data
#[derive(Debug, Clone, Serialize)]
pub struct Co64Data {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
    pub chunk_offsets: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElstData {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<ElstEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElstEntry {
    pub segment_duration: u64,
    pub segment_seconds: Option<f64>,
    pub media_time: i64,
    pub media_rate: f64,
}

/// Trait for built-in box decoders.
///
/// A decoder interprets the payload of one box type. The reader it receives
/// is limited to the box payload; the decoder must consume all of it unless
/// [`BoxDecoder::has_children`] is true, in which case the walker parses the
/// remainder as child boxes.
pub trait BoxDecoder: Send + Sync {
    fn decode(&self, r: &mut dyn Read, hdr: &BoxHeader, scope: &Scope<'_>) -> Result<BoxValue>;

    /// Child boxes follow the decoded prefix.
    fn has_children(&self) -> bool {
        false
    }

    /// Payload bytes `decode` read beyond its prefix. The walker parses them
    /// as the start of the child boxes.
    fn replay<'v>(&self, _value: &'v BoxValue) -> &'v [u8] {
        &[]
    }
}

/// Registry of decoders keyed by box type.
///
/// The registry is immutable once constructed; use [`Registry::with_decoder`]
/// to build it fluently.
pub struct Registry {
    map: HashMap<FourCC, BoxDecoderEntry>,
}

struct BoxDecoderEntry {
    inner: Box<dyn BoxDecoder>,
    name: String,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Return a new registry with the given decoder added.
    ///
    /// `name` is human-readable and used only for debugging / logging.
    pub fn with_decoder(mut self, key: FourCC, name: &str, dec: Box<dyn BoxDecoder>) -> Self {
        self.map.insert(
            key,
            BoxDecoderEntry {
                inner: dec,
                name: name.to_string(),
            },
        );
        self
    }

    pub fn get(&self, key: FourCC) -> Option<&dyn BoxDecoder> {
        self.map.get(&key).map(|d| d.inner.as_ref())
    }

    /// Name the decoder was registered under.
    pub fn name(&self, key: FourCC) -> Option<&str> {
        self.map.get(&key).map(|d| d.name.as_str())
    }

    /// Try to decode the payload of a box using a registered decoder.
    ///
    /// Returns `None` if no decoder exists for the given key.
    pub fn decode(
        &self,
        key: FourCC,
        r: &mut dyn Read,
        hdr: &BoxHeader,
        scope: &Scope<'_>,
    ) -> Option<Result<BoxValue>> {
        self.get(key).map(|d| d.decode(r, hdr, scope))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------- Helpers ----------

fn skip(r: &mut dyn Read, n: usize) -> Result<()> {
    let mut buf = [0u8; 64];
    let mut left = n;
    while left > 0 {
        let take = left.min(buf.len());
        r.read_exact(&mut buf[..take])?;
        left -= take;
    }
    Ok(())
}

fn read_matrix(r: &mut dyn Read) -> Result<()> {
    skip(r, 36)
}

fn structured(data: StructuredData) -> Result<BoxValue> {
    Ok(BoxValue::Structured(data))
}

// ---------- Decoders ----------

// ftyp: major + minor + compatible brands
pub struct FtypDecoder;

impl BoxDecoder for FtypDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let major_brand = read_fourcc(r)?;
        let minor_version = r.read_u32::<BigEndian>()?;
        let compatible_brands = read_fourcc_list(r)?;
        structured(StructuredData::FileType(FtypData {
            major_brand,
            minor_version,
            compatible_brands,
        }))
    }
}

// mvhd: timescale + duration
pub struct MvhdDecoder;

impl BoxDecoder for MvhdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let creation_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let modification_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let timescale = r.read_u32::<BigEndian>()?;
        let duration = read_uint_v(r, version)?;
        let rate = fixed_16_16(r.read_u32::<BigEndian>()?);
        let volume = fixed_8_8(r.read_u16::<BigEndian>()?);
        skip(r, 10)?; // reserved
        read_matrix(r)?;
        skip(r, 24)?; // pre_defined
        let next_track_id = r.read_u32::<BigEndian>()?;

        structured(StructuredData::MovieHeader(MvhdData {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            next_track_id,
        }))
    }
}

// tkhd: track id, duration, flags, width, height
pub struct TkhdDecoder;

impl BoxDecoder for TkhdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let creation_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let modification_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let track_id = r.read_u32::<BigEndian>()?;
        let _reserved = r.read_u32::<BigEndian>()?;
        let duration = read_uint_v(r, version)?;
        skip(r, 8)?;
        let layer = r.read_i16::<BigEndian>()?;
        let alternate_group = r.read_i16::<BigEndian>()?;
        let volume = fixed_8_8(r.read_u16::<BigEndian>()?);
        let _reserved = r.read_u16::<BigEndian>()?;
        read_matrix(r)?;
        let width = fixed_16_16(r.read_u32::<BigEndian>()?);
        let height = fixed_16_16(r.read_u32::<BigEndian>()?);

        structured(StructuredData::TrackHeader(TkhdData {
            version,
            flags,
            enabled: flags & 0x1 != 0,
            in_movie: flags & 0x2 != 0,
            in_preview: flags & 0x4 != 0,
            creation_time,
            modification_time,
            track_id,
            duration,
            duration_seconds: scope.timescale.map(|ts| seconds(duration, ts)),
            layer,
            alternate_group,
            volume,
            width,
            height,
        }))
    }
}

// mdhd: timescale, duration, language
pub struct MdhdDecoder;

impl BoxDecoder for MdhdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let creation_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let modification_time = Mp4Time::from_raw(read_uint_v(r, version)?);
        let timescale = r.read_u32::<BigEndian>()?;
        let duration = read_uint_v(r, version)?;
        let language_code = r.read_u16::<BigEndian>()?;
        let _pre_defined = r.read_u16::<BigEndian>()?;

        structured(StructuredData::MediaHeader(MdhdData {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language: lang_from_u16(language_code & 0x7FFF),
        }))
    }
}

// hdlr: handler type + name
pub struct HdlrDecoder;

impl BoxDecoder for HdlrDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        // pre_defined (4 bytes) + handler_type (4 bytes)
        let _pre_defined = r.read_u32::<BigEndian>()?;
        let handler_type = read_fourcc(r)?;
        skip(r, 12)?; // reserved

        // name: null-terminated string (or just rest of box)
        let mut name_bytes = Vec::new();
        r.read_to_end(&mut name_bytes)?;
        // QuickTime writes a Pascal string here
        if let Some(&n) = name_bytes.first() {
            if n as usize == name_bytes.len() - 1 && n != 0 && !name_bytes[1..].contains(&0) {
                name_bytes.remove(0);
            }
        }
        while name_bytes.last() == Some(&0) {
            name_bytes.pop();
        }

        structured(StructuredData::HandlerReference(HdlrData {
            version,
            flags,
            handler_type: handler_type.to_string(),
            name: String::from_utf8_lossy(&name_bytes).to_string(),
        }))
    }
}

pub struct VmhdDecoder;

impl BoxDecoder for VmhdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let graphics_mode = r.read_u16::<BigEndian>()?;
        let opcolor = [
            r.read_u16::<BigEndian>()?,
            r.read_u16::<BigEndian>()?,
            r.read_u16::<BigEndian>()?,
        ];
        structured(StructuredData::VideoMediaHeader(VmhdData {
            version,
            flags,
            graphics_mode,
            opcolor,
        }))
    }
}

pub struct SmhdDecoder;

impl BoxDecoder for SmhdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let balance = fixed_8_8(r.read_u16::<BigEndian>()?);
        let _reserved = r.read_u16::<BigEndian>()?;
        structured(StructuredData::SoundMediaHeader { version, flags, balance })
    }
}

// dref: count, then `url `/`urn ` entries as children
pub struct DrefDecoder;

impl BoxDecoder for DrefDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        structured(StructuredData::DataReference { version, flags, entry_count })
    }

    fn has_children(&self) -> bool {
        true
    }
}

pub struct UrlDecoder;

impl BoxDecoder for UrlDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let location = read_c_string(r)?;
        structured(StructuredData::DataEntryUrl {
            version,
            flags,
            location: if location.is_empty() { None } else { Some(location) },
        })
    }
}

pub struct MetaDecoder;

impl BoxDecoder for MetaDecoder {
    fn decode(&self, r: &mut dyn Read, hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let mut head = [0u8; 8];
        let len = hdr.payload_len().unwrap_or(0).min(8) as usize;
        r.read_exact(&mut head[..len.max(4)])?;

        if len == 8 && &head[4..8] == b"hdlr" {
            return structured(StructuredData::Meta {
                version: 0,
                flags: 0,
                quicktime: true,
                replay: head.to_vec(),
            });
        }
        let (version, flags) = read_version_flags(&mut &head[..4])?;
        structured(StructuredData::Meta {
            version,
            flags,
            quicktime: false,
            replay: head[4..len.max(4)].to_vec(),
        })
    }

    fn has_children(&self) -> bool {
        true
    }

    fn replay<'v>(&self, value: &'v BoxValue) -> &'v [u8] {
        match value {
            BoxValue::Structured(StructuredData::Meta { replay, .. }) => replay,
            _ => &[],
        }
    }
}

// stsd: entry count, then sample entries as children
pub struct StsdDecoder;

impl BoxDecoder for StsdDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        structured(StructuredData::SampleDescription(StsdData {
            version,
            flags,
            entry_count,
        }))
    }

    fn has_children(&self) -> bool {
        true
    }
}

// avc1/hvc1/...: 78-byte VisualSampleEntry prefix, then avcC/pasp/btrt children
pub struct VisualSampleEntryDecoder;

impl BoxDecoder for VisualSampleEntryDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        skip(r, 6)?; // reserved
        let data_reference_index = r.read_u16::<BigEndian>()?;
        skip(r, 16)?; // pre_defined + reserved
        let width = r.read_u16::<BigEndian>()?;
        let height = r.read_u16::<BigEndian>()?;
        let horiz_resolution = fixed_16_16(r.read_u32::<BigEndian>()?);
        let vert_resolution = fixed_16_16(r.read_u32::<BigEndian>()?);
        let _reserved = r.read_u32::<BigEndian>()?;
        let frame_count = r.read_u16::<BigEndian>()?;
        let mut name = [0u8; 32];
        r.read_exact(&mut name)?;
        let name_len = (name[0] as usize).min(31);
        let compressor_name = String::from_utf8_lossy(&name[1..1 + name_len]).to_string();
        let depth = r.read_u16::<BigEndian>()?;
        let _pre_defined = r.read_i16::<BigEndian>()?;

        structured(StructuredData::VisualSampleEntry(VisualEntry {
            data_reference_index,
            width,
            height,
            horiz_resolution,
            vert_resolution,
            frame_count,
            compressor_name,
            depth,
        }))
    }

    fn has_children(&self) -> bool {
        true
    }
}

// mp4a: 28-byte AudioSampleEntry prefix, then esds
pub struct AudioSampleEntryDecoder;

impl BoxDecoder for AudioSampleEntryDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        skip(r, 6)?;
        let data_reference_index = r.read_u16::<BigEndian>()?;
        let entry_version = r.read_u16::<BigEndian>()?;
        skip(r, 6)?; // revision + vendor
        let channel_count = r.read_u16::<BigEndian>()?;
        let sample_size = r.read_u16::<BigEndian>()?;
        skip(r, 4)?; // compression id + packet size
        // unsigned 16.16; 48 kHz does not fit the signed form
        let rate = r.read_u32::<BigEndian>()?;
        let sample_rate = (rate >> 16) as f64 + (rate & 0xFFFF) as f64 / 65536.0;
        match entry_version {
            0 => {}
            1 => skip(r, 16)?,
            2 => skip(r, 36)?,
            v => return Err(malformed(format!("unknown sound sample entry version {}", v))),
        }

        structured(StructuredData::AudioSampleEntry(AudioEntry {
            data_reference_index,
            channel_count,
            sample_size,
            sample_rate,
        }))
    }

    fn has_children(&self) -> bool {
        true
    }
}

// stts: time-to-sample
pub struct SttsDecoder;

impl BoxDecoder for SttsDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut entries = Vec::new();
        let mut total = Some(0u64);

        for _ in 0..entry_count {
            let sample_count = r.read_u32::<BigEndian>()?;
            let sample_delta = r.read_u32::<BigEndian>()?;
            total = total.and_then(|t| t.checked_add(sample_count as u64 * sample_delta as u64));
            entries.push(SttsEntry {
                sample_count,
                sample_delta,
            });
        }

        structured(StructuredData::DecodingTimeToSample(SttsData {
            version,
            flags,
            entry_count,
            entries,
            duration_seconds: total.zip(scope.timescale).map(|(t, ts)| seconds(t, ts)),
        }))
    }
}

// stss: sync sample table
pub struct StssDecoder;

impl BoxDecoder for StssDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut sample_numbers = Vec::new();

        for _ in 0..entry_count {
            sample_numbers.push(r.read_u32::<BigEndian>()?);
        }

        structured(StructuredData::SyncSample(StssData {
            version,
            flags,
            entry_count,
            sample_numbers,
        }))
    }
}

// ctts: composition time to sample
pub struct CttsDecoder;

impl BoxDecoder for CttsDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut entries = Vec::new();

        for _ in 0..entry_count {
            let sample_count = r.read_u32::<BigEndian>()?;
            let sample_offset = if version == 1 {
                r.read_i32::<BigEndian>()? as i64
            } else {
                r.read_u32::<BigEndian>()? as i64
            };
            entries.push(CttsEntry {
                sample_count,
                sample_offset,
            });
        }

        structured(StructuredData::CompositionTimeToSample(CttsData {
            version,
            flags,
            entry_count,
            entries,
        }))
    }
}

// stsc: sample-to-chunk
pub struct StscDecoder;

impl BoxDecoder for StscDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut entries = Vec::new();

        for _ in 0..entry_count {
            let first_chunk = r.read_u32::<BigEndian>()?;
            let samples_per_chunk = r.read_u32::<BigEndian>()?;
            let sample_description_index = r.read_u32::<BigEndian>()?;
            entries.push(StscEntry {
                first_chunk,
                samples_per_chunk,
                sample_description_index,
            });
        }

        structured(StructuredData::SampleToChunk(StscData {
            version,
            flags,
            entry_count,
            entries,
        }))
    }
}

// stsz: sample sizes
pub struct StszDecoder;

impl BoxDecoder for StszDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let sample_size = r.read_u32::<BigEndian>()?;
        let sample_count = r.read_u32::<BigEndian>()?;
        let mut sample_sizes = Vec::new();

        // If sample_size is 0, each sample has its own size
        if sample_size == 0 {
            for _ in 0..sample_count {
                sample_sizes.push(r.read_u32::<BigEndian>()?);
            }
        }

        structured(StructuredData::SampleSize(StszData {
            version,
            flags,
            sample_size,
            sample_count,
            sample_sizes,
        }))
    }
}

// stco: 32-bit chunk offsets
pub struct StcoDecoder;

impl BoxDecoder for StcoDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut chunk_offsets = Vec::new();

        for _ in 0..entry_count {
            chunk_offsets.push(r.read_u32::<BigEndian>()?);
        }

        structured(StructuredData::ChunkOffset(StcoData {
            version,
            flags,
            entry_count,
            chunk_offsets,
        }))
    }
}

// co64: 64-bit chunk offsets
pub struct Co64Decoder;

impl BoxDecoder for Co64Decoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut chunk_offsets = Vec::new();

        for _ in 0..entry_count {
            chunk_offsets.push(r.read_u64::<BigEndian>()?);
        }

        structured(StructuredData::ChunkOffset64(Co64Data {
            version,
            flags,
            entry_count,
            chunk_offsets,
        }))
    }
}

// elst: edit list
pub struct ElstDecoder;

impl BoxDecoder for ElstDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32::<BigEndian>()?;
        let mut entries = Vec::new();

        for _ in 0..entry_count {
            let (segment_duration, media_time) = if version == 1 {
                (r.read_u64::<BigEndian>()?, r.read_i64::<BigEndian>()?)
            } else {
                (
                    r.read_u32::<BigEndian>()? as u64,
                    r.read_i32::<BigEndian>()? as i64,
                )
            };
            let rate_int = r.read_i16::<BigEndian>()?;
            let rate_frac = r.read_i16::<BigEndian>()?;
            entries.push(ElstEntry {
                segment_duration,
                segment_seconds: scope.timescale.map(|ts| seconds(segment_duration, ts)),
                media_time,
                media_rate: rate_int as f64 + rate_frac as f64 / 65536.0,
            });
        }

        structured(StructuredData::EditList(ElstData { version, flags, entries }))
    }
}

pub struct AvccDecoder;

impl BoxDecoder for AvccDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        structured(StructuredData::AvcConfiguration(AvcConfig::decode(r)?))
    }
}

pub struct EsdsDecoder;

impl BoxDecoder for EsdsDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let (version, flags) = read_version_flags(r)?;
        let descriptor = decode_esds(r)?;
        structured(StructuredData::ElementaryStream { version, flags, descriptor })
    }
}

pub struct PaspDecoder;

impl BoxDecoder for PaspDecoder {
    fn decode(&self, r: &mut dyn Read, _hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let h_spacing = r.read_u32::<BigEndian>()?;
        let v_spacing = r.read_u32::<BigEndian>()?;
        structured(StructuredData::PixelAspectRatio { h_spacing, v_spacing })
    }
}

/// Shared decoder for user-data text atoms; the layout comes from the tag.
pub struct LabeledTextDecoder;

impl BoxDecoder for LabeledTextDecoder {
    fn decode(&self, r: &mut dyn Read, hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let layout = classify(hdr.typ).unwrap_or(TextLayout::EmptyTag);
        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;
        structured(StructuredData::LabeledText(decode_labeled_text(layout, &payload)))
    }
}

// GPMF: KLV telemetry stored in udta
pub struct GpmfDecoder;

impl BoxDecoder for GpmfDecoder {
    fn decode(&self, r: &mut dyn Read, hdr: &BoxHeader, _scope: &Scope<'_>) -> Result<BoxValue> {
        let budget = hdr
            .payload_len()
            .ok_or_else(|| malformed("GPMF payload must have a declared size"))?;
        structured(StructuredData::Telemetry(decode_klv(r, budget)?))
    }
}

// ---------- Default registry ----------

const VISUAL_ENTRIES: &[&[u8; 4]] = &[b"avc1", b"avc3", b"hvc1", b"hev1", b"mp4v"];
const TEXT_ATOMS: &[&[u8; 4]] = &[
    b"auth", b"cprt", b"titl", b"dscp", b"perf", b"gnre", b"name",
    b"\xa9nam", b"\xa9cmt", b"\xa9day", b"\xa9ART", b"\xa9too", b"\xa9xyz", b"\xa9mod",
    b"\xa9swr", b"\xa9des", b"\xa9inf", b"\xa9fmt", b"\xa9mak", b"\xa9aut",
];

pub fn default_registry() -> Registry {
    let mut reg = Registry::new()
        .with_decoder(FourCC(*b"ftyp"), "ftyp", Box::new(FtypDecoder))
        .with_decoder(FourCC(*b"mvhd"), "mvhd", Box::new(MvhdDecoder))
        .with_decoder(FourCC(*b"tkhd"), "tkhd", Box::new(TkhdDecoder))
        .with_decoder(FourCC(*b"mdhd"), "mdhd", Box::new(MdhdDecoder))
        .with_decoder(FourCC(*b"hdlr"), "hdlr", Box::new(HdlrDecoder))
        .with_decoder(FourCC(*b"vmhd"), "vmhd", Box::new(VmhdDecoder))
        .with_decoder(FourCC(*b"smhd"), "smhd", Box::new(SmhdDecoder))
        .with_decoder(FourCC(*b"dref"), "dref", Box::new(DrefDecoder))
        .with_decoder(FourCC(*b"url "), "url", Box::new(UrlDecoder))
        .with_decoder(FourCC(*b"meta"), "meta", Box::new(MetaDecoder))
        .with_decoder(FourCC(*b"stsd"), "stsd", Box::new(StsdDecoder))
        .with_decoder(FourCC(*b"mp4a"), "mp4a", Box::new(AudioSampleEntryDecoder))
        .with_decoder(FourCC(*b"stts"), "stts", Box::new(SttsDecoder))
        .with_decoder(FourCC(*b"stss"), "stss", Box::new(StssDecoder))
        .with_decoder(FourCC(*b"ctts"), "ctts", Box::new(CttsDecoder))
        .with_decoder(FourCC(*b"stsc"), "stsc", Box::new(StscDecoder))
        .with_decoder(FourCC(*b"stsz"), "stsz", Box::new(StszDecoder))
        .with_decoder(FourCC(*b"stco"), "stco", Box::new(StcoDecoder))
        .with_decoder(FourCC(*b"co64"), "co64", Box::new(Co64Decoder))
        .with_decoder(FourCC(*b"elst"), "elst", Box::new(ElstDecoder))
        .with_decoder(FourCC(*b"avcC"), "avcC", Box::new(AvccDecoder))
        .with_decoder(FourCC(*b"esds"), "esds", Box::new(EsdsDecoder))
        .with_decoder(FourCC(*b"pasp"), "pasp", Box::new(PaspDecoder))
        .with_decoder(FourCC(*b"GPMF"), "GPMF", Box::new(GpmfDecoder));

    for tag in VISUAL_ENTRIES {
        reg = reg.with_decoder(FourCC(**tag), "visual sample entry", Box::new(VisualSampleEntryDecoder));
    }
    for tag in TEXT_ATOMS {
        reg = reg.with_decoder(FourCC(**tag), "labeled text", Box::new(LabeledTextDecoder));
    }
    reg
}
