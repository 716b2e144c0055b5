//! Single-track H.264 muxer.
//!
//! All frames are scanned before anything is written, so the sample tables
//! in `moov` are complete when they are emitted ahead of `mdat`. The one
//! value that depends on the final layout, the chunk offset, is written as
//! a placeholder and patched once `moov` has been closed.

use crate::annexb::{AccessUnit, ElementaryFrame, NalKind, ParameterSets, frame_access_unit, split_access_units};
use crate::boxes::FourCC;
use crate::codec::AvcConfig;
use crate::error::{Error, Result};
use crate::fields::{Mp4Time, lang_to_u16};
use crate::sps::parse_sps;
use crate::text::encode_language_prefixed;
use crate::writer::BoxWriter;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TRACK_ID: u32 = 1;
/// `tkhd` flags: enabled, in movie, in preview.
pub const TRACK_FLAGS: u32 = 0x7;

#[derive(Debug, Clone, Serialize)]
pub struct MuxConfig {
    pub timescale: u32,
    /// Used when the frame source reports no rate of its own.
    pub frame_rate: f64,
    pub author: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
    /// Seconds since the Unix epoch; the current time when unset.
    pub creation_time: Option<i64>,
    pub compressor_name: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            timescale: 1000,
            frame_rate: 30.0,
            author: "mp4atom".to_string(),
            width: None,
            height: None,
            major_brand: FourCC(*b"isom"),
            minor_version: 0x200,
            compatible_brands: vec![
                FourCC(*b"isom"),
                FourCC(*b"iso2"),
                FourCC(*b"avc1"),
                FourCC(*b"mp41"),
            ],
            creation_time: None,
            compressor_name: "mp4atom AVC".to_string(),
        }
    }
}

/// Supplies discrete Annex-B frames and the rate they were captured at.
pub trait FrameSource {
    fn frame_rate(&self) -> Option<f64>;

    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Frames already held in memory.
pub struct VecFrameSource {
    frames: VecDeque<Vec<u8>>,
    rate: Option<f64>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Vec<u8>>, rate: f64) -> Self {
        Self {
            frames: frames.into(),
            rate: Some(rate),
        }
    }

    /// Split a continuous Annex-B stream into one frame per coded slice.
    pub fn from_annexb(stream: &[u8], rate: Option<f64>) -> Self {
        Self {
            frames: split_access_units(stream).into_iter().map(<[u8]>::to_vec).collect(),
            rate,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for VecFrameSource {
    fn frame_rate(&self) -> Option<f64> {
        self.rate
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.frames.pop_front())
    }
}

/// What the muxer wrote, for the verifier and for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MuxReport {
    pub frame_count: u32,
    pub sample_sizes: Vec<u32>,
    pub ticks_per_frame: u32,
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    /// Offset of the `stsz` box header.
    pub stsz_offset: u64,
    /// Offset of the `mdat` box header.
    pub mdat_offset: u64,
    pub mdat_header_len: u64,
    pub mdat_payload_len: u64,
    /// First sample byte; equals `mdat_offset + mdat_header_len`.
    pub chunk_offset: u64,
}

/// Per-invocation state. Nothing here outlives one call to [`Muxer::mux`].
struct MuxState {
    frames: Vec<Vec<u8>>,
    units: Vec<AccessUnit>,
    params: ParameterSets,
    sample_sizes: Vec<u32>,
    ticks: u32,
    duration: u64,
    width: u32,
    height: u32,
    stsz_offset: u64,
    stco_entry_pos: u64,
}

pub fn ticks_per_frame(timescale: u32, rate: f64) -> Result<u32> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::MuxInvariant(format!("frame rate {} is not positive", rate)));
    }
    let ticks = (timescale as f64 / rate).round();
    if ticks < 1.0 || ticks > u32::MAX as f64 {
        return Err(Error::MuxInvariant(format!(
            "{} fps does not fit timescale {}",
            rate, timescale
        )));
    }
    Ok(ticks as u32)
}

pub struct Muxer {
    config: MuxConfig,
}

impl Muxer {
    pub fn new(config: MuxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Write a complete file to `out`, which must be seekable and positioned
    /// at its start, since chunk offsets are absolute.
    pub fn mux<S, W>(&self, source: &mut S, out: W) -> Result<(MuxReport, W)>
    where
        S: FrameSource + ?Sized,
        W: Write + Seek,
    {
        let mut w = BoxWriter::new(out)?;
        let at = w.position()?;
        if at != 0 {
            return Err(Error::NotSeekable(format!(
                "output starts at offset {}; chunk offsets need an empty output",
                at
            )));
        }
        let mut state = self.scan(source)?;

        self.write_ftyp(&mut w)?;
        w.write_box(b"free", &[])?;
        self.write_moov(&mut w, &mut state)?;
        let (mdat_offset, mdat_header_len, mdat_payload_len) = self.write_mdat(&mut w, &state)?;
        let out = w.finish()?;

        let report = MuxReport {
            frame_count: state.sample_sizes.len() as u32,
            sample_sizes: state.sample_sizes,
            ticks_per_frame: state.ticks,
            duration: state.duration,
            width: state.width,
            height: state.height,
            stsz_offset: state.stsz_offset,
            mdat_offset,
            mdat_header_len,
            mdat_payload_len,
            chunk_offset: mdat_offset + mdat_header_len,
        };
        log::info!(
            "muxed {} frames, {} ticks each, {} media bytes at {:#x}",
            report.frame_count,
            report.ticks_per_frame,
            report.mdat_payload_len,
            report.chunk_offset
        );
        Ok((report, out))
    }

    fn scan<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<MuxState> {
        let rate = source.frame_rate().unwrap_or(self.config.frame_rate);
        let ticks = ticks_per_frame(self.config.timescale, rate)?;

        let mut frames = Vec::new();
        let mut units = Vec::new();
        let mut sample_sizes = Vec::new();
        let mut params: Option<ParameterSets> = None;

        while let Some(frame) = source.next_frame()? {
            let index = frames.len();
            let au = frame_access_unit(&frame, index)?;
            if let Some(first) = &params {
                warn_on_new_parameter_sets(first, &frame, &au, index);
            } else {
                params = Some(ParameterSets::from_access_unit(&frame, &au)?);
            }
            for nal in au.nals.iter().filter(|n| !n.kind.is_slice()) {
                log::debug!("frame {}: stripping {:?} NAL of {} bytes", index, nal.kind, nal.length);
            }
            let size = u32::try_from(au.slice().sample_len()).map_err(|_| {
                Error::MuxInvariant(format!("frame {} slice exceeds a 32-bit sample size", index))
            })?;
            sample_sizes.push(size);
            units.push(au);
            frames.push(frame);
        }

        let params = params.ok_or_else(|| Error::MuxInvariant("frame source produced no frames".into()))?;
        let count = frames.len() as u64;
        let (width, height) = self.dimensions(&params.sps);
        if width > 0xFFFF || height > 0xFFFF {
            return Err(Error::MuxInvariant(format!(
                "{}x{} does not fit a visual sample entry",
                width, height
            )));
        }

        Ok(MuxState {
            frames,
            units,
            params,
            sample_sizes,
            ticks,
            duration: ticks as u64 * count,
            width,
            height,
            stsz_offset: 0,
            stco_entry_pos: 0,
        })
    }

    fn dimensions(&self, sps: &[u8]) -> (u32, u32) {
        let parsed = match parse_sps(sps) {
            Ok(info) => Some((info.width, info.height)),
            Err(e) => {
                if self.config.width.is_none() || self.config.height.is_none() {
                    log::warn!("cannot read picture size from SPS ({}); using overrides or 0", e);
                }
                None
            }
        };
        (
            self.config.width.or(parsed.map(|p| p.0)).unwrap_or(0),
            self.config.height.or(parsed.map(|p| p.1)).unwrap_or(0),
        )
    }

    fn times(&self) -> u32 {
        let unix = self.config.creation_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        });
        u32::try_from(Mp4Time::from_unix(unix).raw).unwrap_or(u32::MAX)
    }

    fn write_ftyp<W: Write + Seek>(&self, w: &mut BoxWriter<W>) -> Result<()> {
        w.begin(b"ftyp")?;
        w.fourcc(&self.config.major_brand.0)?;
        w.u32(self.config.minor_version)?;
        for b in &self.config.compatible_brands {
            w.fourcc(&b.0)?;
        }
        w.end()?;
        Ok(())
    }

    fn write_moov<W: Write + Seek>(&self, w: &mut BoxWriter<W>, state: &mut MuxState) -> Result<()> {
        let now = self.times();
        w.begin(b"moov")?;

        w.begin_full(b"mvhd", 0, 0)?;
        w.u32(now)?;
        w.u32(now)?;
        w.u32(self.config.timescale)?;
        w.u32(duration_u32(state.duration)?)?;
        w.fixed_16_16(1.0)?; // rate
        w.u16(0x0100)?; // volume
        w.zeros(10)?;
        w.matrix()?;
        w.zeros(24)?;
        w.u32(TRACK_ID + 1)?;
        w.end()?;

        w.begin(b"udta")?;
        w.write_box(b"auth", &encode_language_prefixed("und", &self.config.author))?;
        w.end()?;

        w.begin(b"trak")?;
        self.write_tkhd(w, state, now)?;
        w.begin(b"mdia")?;

        w.begin_full(b"mdhd", 0, 0)?;
        w.u32(now)?;
        w.u32(now)?;
        w.u32(self.config.timescale)?;
        w.u32(duration_u32(state.duration)?)?;
        w.u16(lang_to_u16("und"))?;
        w.u16(0)?;
        w.end()?;

        w.begin_full(b"hdlr", 0, 0)?;
        w.u32(0)?;
        w.fourcc(b"vide")?;
        w.zeros(12)?;
        w.bytes(b"VideoHandler\0")?;
        w.end()?;

        w.begin(b"minf")?;
        w.begin_full(b"vmhd", 0, 1)?;
        w.u16(0)?;
        w.zeros(6)?;
        w.end()?;

        w.begin(b"dinf")?;
        w.begin_full(b"dref", 0, 0)?;
        w.u32(1)?;
        w.begin_full(b"url ", 0, 1)?; // media is in this file
        w.end()?;
        w.end()?;
        w.end()?;

        w.begin(b"stbl")?;
        self.write_stsd(w, state)?;
        self.write_sample_tables(w, state)?;
        w.end()?; // stbl
        w.end()?; // minf
        w.end()?; // mdia
        w.end()?; // trak
        w.end()?; // moov
        Ok(())
    }

    fn write_tkhd<W: Write + Seek>(&self, w: &mut BoxWriter<W>, state: &MuxState, now: u32) -> Result<()> {
        w.begin_full(b"tkhd", 0, TRACK_FLAGS)?;
        w.u32(now)?;
        w.u32(now)?;
        w.u32(TRACK_ID)?;
        w.u32(0)?;
        w.u32(duration_u32(state.duration)?)?;
        w.zeros(8)?;
        w.i16(0)?; // layer
        w.i16(0)?; // alternate group
        w.u16(0)?; // volume
        w.u16(0)?;
        w.matrix()?;
        w.u32(state.width << 16)?;
        w.u32(state.height << 16)?;
        w.end()?;
        Ok(())
    }

    fn write_stsd<W: Write + Seek>(&self, w: &mut BoxWriter<W>, state: &MuxState) -> Result<()> {
        w.begin_full(b"stsd", 0, 0)?;
        w.u32(1)?;

        w.begin(b"avc1")?;
        w.zeros(6)?;
        w.u16(1)?; // data reference index
        w.zeros(16)?;
        w.u16(state.width as u16)?;
        w.u16(state.height as u16)?;
        w.u32(0x0048_0000)?; // 72 dpi
        w.u32(0x0048_0000)?;
        w.u32(0)?;
        w.u16(1)?; // frame count
        let mut name = [0u8; 32];
        let len = self.config.compressor_name.len().min(31);
        name[0] = len as u8;
        name[1..1 + len].copy_from_slice(&self.config.compressor_name.as_bytes()[..len]);
        w.bytes(&name)?;
        w.u16(0x0018)?; // depth
        w.i16(-1)?;

        w.begin(b"avcC")?;
        AvcConfig::from_parameter_sets(&state.params.sps, &state.params.pps)?.write(w)?;
        w.end()?;

        w.end()?; // avc1
        w.end()?; // stsd
        Ok(())
    }

    fn write_sample_tables<W: Write + Seek>(&self, w: &mut BoxWriter<W>, state: &mut MuxState) -> Result<()> {
        let count = state.sample_sizes.len() as u32;

        w.begin_full(b"stts", 0, 0)?;
        w.u32(1)?;
        w.u32(count)?;
        w.u32(state.ticks)?;
        w.end()?;

        w.begin_full(b"stsc", 0, 0)?;
        w.u32(1)?;
        w.u32(1)?; // first chunk
        w.u32(count)?;
        w.u32(1)?; // sample description index
        w.end()?;

        state.stsz_offset = w.position()?;
        w.begin_full(b"stsz", 0, 0)?;
        w.u32(0)?;
        w.u32(count)?;
        for &size in &state.sample_sizes {
            w.u32(size)?;
        }
        w.end()?;

        w.begin_full(b"stco", 0, 0)?;
        w.u32(1)?;
        state.stco_entry_pos = w.position()?;
        w.u32(0)?; // patched once mdat's position is known
        w.end()?;
        Ok(())
    }

    fn write_mdat<W: Write + Seek>(&self, w: &mut BoxWriter<W>, state: &MuxState) -> Result<(u64, u64, u64)> {
        let payload_len: u64 = state.sample_sizes.iter().map(|&s| s as u64).sum();
        let mdat_offset = w.position()?;
        let header_len = w.write_header(b"mdat", payload_len)?;
        let chunk_offset = mdat_offset + header_len;
        let chunk32 = u32::try_from(chunk_offset)
            .map_err(|_| Error::MuxInvariant(format!("chunk offset {} exceeds stco range", chunk_offset)))?;
        w.patch_u32(state.stco_entry_pos, chunk32)?;

        let mut written = 0u64;
        let mut samples = 0usize;
        for (frame, au) in state.frames.iter().zip(&state.units) {
            written += write_sample(w, frame, au.slice())?;
            samples += 1;
        }

        if samples != state.sample_sizes.len() || written != payload_len {
            return Err(Error::MuxInvariant(format!(
                "wrote {} samples / {} bytes, tables say {} / {}",
                samples,
                written,
                state.sample_sizes.len(),
                payload_len
            )));
        }
        let end = w.position()?;
        if end - mdat_offset != header_len + payload_len {
            return Err(Error::MuxInvariant(format!(
                "mdat spans {} bytes, expected {}",
                end - mdat_offset,
                header_len + payload_len
            )));
        }
        Ok((mdat_offset, header_len, payload_len))
    }
}

/// Write one slice with its start code replaced by a big-endian length.
fn write_sample<W: Write + Seek>(w: &mut BoxWriter<W>, frame: &[u8], slice: &ElementaryFrame) -> Result<u64> {
    let nal = slice.nal(frame);
    let len = u32::try_from(nal.len())
        .map_err(|_| Error::MuxInvariant("NAL unit exceeds a 32-bit length".into()))?;
    w.u32(len)?;
    w.bytes(nal)?;
    Ok(4 + nal.len() as u64)
}

fn duration_u32(duration: u64) -> Result<u32> {
    u32::try_from(duration)
        .map_err(|_| Error::MuxInvariant(format!("duration {} needs a version 1 header", duration)))
}

fn warn_on_new_parameter_sets(first: &ParameterSets, frame: &[u8], au: &AccessUnit, index: usize) {
    let changed = [(NalKind::Sps, &first.sps), (NalKind::Pps, &first.pps)]
        .iter()
        .any(|(kind, known)| au.find(*kind).is_some_and(|n| n.nal(frame) != known.as_slice()));
    if changed {
        log::warn!(
            "frame {}: parameter sets differ from the first frame; only the first pair is stored",
            index
        );
    }
}

/// Open `path` for writing, or standard output when `None`. Fails with
/// [`Error::NotSeekable`] if the destination cannot seek or does not start
/// at offset 0.
///
/// Standard output opened in append mode (`>>` onto an empty file) passes
/// this check, but every write lands at the end, so the size backpatches
/// corrupt the output. Redirect with `>` instead.
pub fn open_seekable_output(path: Option<&Path>) -> Result<File> {
    let mut file = match path {
        Some(p) => File::create(p)?,
        None => stdout_file()?,
    };
    let at = file
        .stream_position()
        .map_err(|e| Error::NotSeekable(format!("{}: {}", describe(path), e)))?;
    if at != 0 {
        return Err(Error::NotSeekable(format!(
            "{} is already at offset {}",
            describe(path),
            at
        )));
    }
    Ok(file)
}

fn describe(path: Option<&Path>) -> String {
    path.map_or_else(|| "standard output".to_string(), |p| p.display().to_string())
}

#[cfg(unix)]
fn stdout_file() -> Result<File> {
    use std::os::fd::AsFd;
    let fd = std::io::stdout().as_fd().try_clone_to_owned()?;
    Ok(File::from(fd))
}

#[cfg(not(unix))]
fn stdout_file() -> Result<File> {
    Err(Error::NotSeekable("standard output".into()))
}

/// Mux an in-memory Annex-B stream to a file (or standard output).
pub fn mux_to_path(stream: &[u8], output: Option<&Path>, config: MuxConfig) -> Result<MuxReport> {
    let out = open_seekable_output(output)?;
    let mut source = VecFrameSource::from_annexb(stream, None);
    let (report, _) = Muxer::new(config).mux(&mut source, out)?;
    Ok(report)
}
