#![allow(dead_code)]

/// Plain box: 32-bit size, tag, payload.
pub fn boxed(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    v.extend_from_slice(tag);
    v.extend_from_slice(payload);
    v
}

/// Full box: version and flags ahead of the payload.
pub fn full(tag: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    boxed(tag, &body)
}

pub fn container(tag: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    boxed(tag, &children.concat())
}

pub fn ftyp(major: &[u8; 4], minor: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(major);
    p.extend_from_slice(&minor.to_be_bytes());
    p.extend_from_slice(b"isom");
    p.extend_from_slice(b"avc1");
    boxed(b"ftyp", &p)
}

/// Version 0 movie header.
pub fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&0u32.to_be_bytes()); // creation
    p.extend_from_slice(&0u32.to_be_bytes()); // modification
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    p.extend_from_slice(&0x0100u16.to_be_bytes());
    p.extend_from_slice(&[0; 10]);
    for m in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        p.extend_from_slice(&m.to_be_bytes());
    }
    p.extend_from_slice(&[0; 24]);
    p.extend_from_slice(&2u32.to_be_bytes());
    full(b"mvhd", 0, 0, &p)
}

/// Version 1 movie header with 64-bit times.
pub fn mvhd_v1(creation: u64, timescale: u32, duration: u64) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&creation.to_be_bytes());
    p.extend_from_slice(&creation.to_be_bytes()); // modification
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    p.extend_from_slice(&0x0100u16.to_be_bytes());
    p.extend_from_slice(&[0; 10]);
    for m in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        p.extend_from_slice(&m.to_be_bytes());
    }
    p.extend_from_slice(&[0; 24]);
    p.extend_from_slice(&2u32.to_be_bytes());
    full(b"mvhd", 1, 0, &p)
}

/// Version 0 media header, language "und".
pub fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&0x55C4u16.to_be_bytes());
    p.extend_from_slice(&0u16.to_be_bytes());
    full(b"mdhd", 0, 0, &p)
}

pub fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut p = (entries.len() as u32).to_be_bytes().to_vec();
    for (count, delta) in entries {
        p.extend_from_slice(&count.to_be_bytes());
        p.extend_from_slice(&delta.to_be_bytes());
    }
    full(b"stts", 0, 0, &p)
}

pub fn stsz(sizes: &[u32]) -> Vec<u8> {
    let mut p = 0u32.to_be_bytes().to_vec();
    p.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for s in sizes {
        p.extend_from_slice(&s.to_be_bytes());
    }
    full(b"stsz", 0, 0, &p)
}

/// One Annex-B NAL: start code, header byte, `len` filler bytes.
pub fn nal(header: u8, len: usize, fill: u8) -> Vec<u8> {
    let mut v = vec![0, 0, 0, 1, header];
    v.extend(std::iter::repeat_n(fill, len));
    v
}

/// Baseline SPS for 64x48: profile 66, level 30, frame_mbs_only, no cropping.
pub const SPS_64X48: [u8; 7] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x23, 0xC8];

/// Three frames: SPS + PPS + 100-byte IDR, then 90- and 95-byte slices.
pub fn three_frames() -> Vec<Vec<u8>> {
    let mut f0 = nal(0x67, 8, 0x11);
    f0.extend(nal(0x68, 4, 0x22));
    f0.extend(nal(0x65, 99, 0x33));
    let f1 = nal(0x61, 89, 0x44);
    let f2 = nal(0x61, 94, 0x55);
    vec![f0, f1, f2]
}
