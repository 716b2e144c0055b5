//! Just enough of an H.264 sequence parameter set to recover the picture size.

use crate::error::{Result, malformed};
use bitreader::BitReader;

/// Profiles whose SPS carries chroma format and scaling-matrix fields.
const HIGH_PROFILES: &[u8] = &[100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile: u8,
    pub level: u8,
    pub width: u32,
    pub height: u32,
}

/// Remove emulation-prevention bytes (`00 00 03` -> `00 00`).
pub fn unescape_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &b in nal {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

fn read_ue(r: &mut BitReader<'_>) -> Result<u32> {
    let mut leading = 0u8;
    while !r.read_bool()? {
        leading += 1;
        if leading > 31 {
            return Err(malformed("exp-Golomb code longer than 32 bits"));
        }
    }
    if leading == 0 {
        return Ok(0);
    }
    let rest = r.read_u32(leading)?;
    Ok(((1u64 << leading) - 1 + rest as u64) as u32)
}

fn read_se(r: &mut BitReader<'_>) -> Result<i32> {
    let k = read_ue(r)? as i64;
    Ok(if k % 2 == 1 { ((k + 1) / 2) as i32 } else { (-(k / 2)) as i32 })
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = read_se(r)?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Parse an SPS NAL unit, header byte included.
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo> {
    if nal.len() < 4 || nal[0] & 0x1F != 7 {
        return Err(malformed("not an SPS NAL unit"));
    }
    let rbsp = unescape_rbsp(&nal[1..]);
    let mut r = BitReader::new(&rbsp);

    let profile = r.read_u8(8)?;
    let _constraints = r.read_u8(8)?;
    let level = r.read_u8(8)?;
    let _sps_id = read_ue(&mut r)?;

    let mut chroma_format_idc = 1;
    if HIGH_PROFILES.contains(&profile) {
        chroma_format_idc = read_ue(&mut r)?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane = r.read_bool()?;
        }
        let _bit_depth_luma = read_ue(&mut r)?;
        let _bit_depth_chroma = read_ue(&mut r)?;
        let _transform_bypass = r.read_bool()?;
        if r.read_bool()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_bool()? {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num = read_ue(&mut r)?;
    match read_ue(&mut r)? {
        0 => {
            let _log2_max_poc_lsb = read_ue(&mut r)?;
        }
        1 => {
            let _delta_always_zero = r.read_bool()?;
            let _offset_non_ref = read_se(&mut r)?;
            let _offset_top_bottom = read_se(&mut r)?;
            for _ in 0..read_ue(&mut r)? {
                let _offset_ref = read_se(&mut r)?;
            }
        }
        _ => {}
    }
    let _max_ref_frames = read_ue(&mut r)?;
    let _gaps_allowed = r.read_bool()?;

    let width_mbs = read_ue(&mut r)? as u64 + 1;
    let height_units = read_ue(&mut r)? as u64 + 1;
    let frame_mbs_only = r.read_bool()?;
    if !frame_mbs_only {
        let _mb_adaptive = r.read_bool()?;
    }
    let _direct_8x8 = r.read_bool()?;

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let (mut crop_x, mut crop_y) = (0, 0);
    if r.read_bool()? {
        let left = read_ue(&mut r)? as u64;
        let right = read_ue(&mut r)? as u64;
        let top = read_ue(&mut r)? as u64;
        let bottom = read_ue(&mut r)? as u64;
        let (unit_x, unit_y) = match chroma_format_idc {
            0 | 3 => (1, 1),
            2 => (2, 1),
            _ => (2, 2),
        };
        crop_x = (left + right) * unit_x;
        crop_y = (top + bottom) * unit_y * field_factor;
    }

    let full_w = width_mbs * 16;
    let full_h = height_units * 16 * field_factor;
    if crop_x >= full_w || crop_y >= full_h {
        return Err(malformed("cropping removes the whole picture"));
    }
    let width = u32::try_from(full_w - crop_x).map_err(|_| malformed("picture width overflows"))?;
    let height = u32::try_from(full_h - crop_y).map_err(|_| malformed("picture height overflows"))?;

    Ok(SpsInfo { profile, level, width, height })
}
