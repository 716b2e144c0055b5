mod common;

use common::*;
use mp4atom::boxes::{BoxNode, DecodeSource, FourCC, find_box};
use mp4atom::registry::{BoxValue, StructuredData, default_registry};
use mp4atom::schema::Schema;
use mp4atom::walker::{WalkOptions, Walker, walk_reader};
use mp4atom::Error;
use std::io::Cursor;

fn small_movie() -> Vec<u8> {
    let stbl = container(b"stbl", &[stts(&[(90, 1000)]), stsz(&[10, 20, 30])]);
    let minf = container(b"minf", &[stbl]);
    let mdia = container(b"mdia", &[mdhd(90_000, 90_000), minf]);
    let trak = container(b"trak", &[mdia]);
    let moov = container(b"moov", &[mvhd(1000, 3000), trak]);
    [ftyp(b"isom", 0x200), moov].concat()
}

fn assert_no_drift(nodes: &[BoxNode]) {
    for n in nodes {
        assert_eq!(n.recomputed_size(), n.header.size, "'{}' drifted", n.header.typ);
        let children: u64 = n.children.iter().map(|c| c.header.size).sum();
        if n.source == DecodeSource::Container {
            assert_eq!(children, n.consumed, "'{}' children", n.header.typ);
        }
        assert_no_drift(&n.children);
    }
}

#[test]
fn walks_nested_movie_without_drift() {
    let data = small_movie();
    let roots = walk_reader(Cursor::new(&data)).expect("walk");

    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0].header.typ, FourCC(*b"ftyp"));
    assert_eq!(roots[1].header.typ, FourCC(*b"moov"));
    let total: u64 = roots.iter().map(|r| r.header.size).sum();
    assert_eq!(total, data.len() as u64);
    assert_no_drift(&roots);

    let stbl = roots[1].child_path("trak.mdia.minf.stbl").expect("stbl");
    let tags: Vec<FourCC> = stbl.children.iter().map(|c| c.header.typ).collect();
    assert_eq!(tags, vec![FourCC(*b"stts"), FourCC(*b"stsz")]);
}

#[test]
fn media_timescale_scopes_later_siblings() {
    let roots = walk_reader(Cursor::new(small_movie())).unwrap();
    match find_box(&roots, FourCC(*b"stts")).and_then(|b| b.value.as_ref()) {
        Some(BoxValue::Structured(StructuredData::DecodingTimeToSample(s))) => {
            // 90 samples of 1000 ticks at mdhd's 90 kHz, not mvhd's 1 kHz
            assert_eq!(s.duration_seconds, Some(1.0));
        }
        other => panic!("unexpected stts value: {:?}", other),
    }
}

#[test]
fn extended_size_header() {
    let mut data = ftyp(b"isom", 0);
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"abcd");
    data.extend_from_slice(&20u64.to_be_bytes());
    data.extend_from_slice(&[1, 2, 3, 4]);

    let roots = walk_reader(Cursor::new(data)).unwrap();
    let ext = &roots[1];
    assert_eq!(ext.header.header_size, 16);
    assert!(ext.header.is_extended());
    assert_eq!(ext.header.size, 20);
    assert_eq!(ext.consumed, 4);
    assert_eq!(ext.source, DecodeSource::Fallback);
}

#[test]
fn empty_payload_box_still_decodes() {
    let data = [ftyp(b"isom", 0), boxed(b"free", &[]), boxed(b"udta", &[])].concat();
    let roots = walk_reader(Cursor::new(data)).unwrap();

    assert_eq!(roots.len(), 3);
    assert_eq!(roots[1].consumed, 0);
    match &roots[1].value {
        Some(BoxValue::Bytes(p)) => assert_eq!(p.total_len, 0),
        other => panic!("unexpected free value: {:?}", other),
    }
    assert!(roots[2].children.is_empty());
}

#[test]
fn size_zero_box_runs_to_end_of_stream() {
    let mut data = ftyp(b"isom", 0);
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(&[9; 10]);

    let roots = walk_reader(Cursor::new(data)).unwrap();
    let mdat = &roots[1];
    assert_eq!(mdat.header.size, 0);
    assert_eq!(mdat.consumed, 10);
    assert_eq!(mdat.recomputed_size(), 18);
}

#[test]
fn nested_size_zero_box_is_structural() {
    let mut inner = 0u32.to_be_bytes().to_vec();
    inner.extend_from_slice(b"abcd");
    let data = [ftyp(b"isom", 0), boxed(b"moov", &inner)].concat();

    match walk_reader(Cursor::new(data)) {
        Err(Error::Structural { tag, .. }) => assert_eq!(tag, FourCC(*b"abcd")),
        other => panic!("expected structural error, got {:?}", other),
    }
}

#[test]
fn child_overrunning_parent_is_structural() {
    let mut inner = 32u32.to_be_bytes().to_vec();
    inner.extend_from_slice(b"abcd");
    let data = [ftyp(b"isom", 0), boxed(b"moov", &inner), vec![0; 24]].concat();

    match walk_reader(Cursor::new(data)) {
        Err(Error::Structural { tag, offset, reason }) => {
            assert_eq!(tag, FourCC(*b"abcd"));
            assert_eq!(offset, 32);
            assert!(reason.contains("overruns"), "{}", reason);
        }
        other => panic!("expected structural error, got {:?}", other),
    }
}

#[test]
fn unread_payload_bytes_are_structural() {
    let mut mv = mvhd(1000, 0);
    let size = mv.len() as u32 + 4;
    mv[..4].copy_from_slice(&size.to_be_bytes());
    mv.extend_from_slice(&[0xAA; 4]);
    let data = [ftyp(b"isom", 0), container(b"moov", &[mv])].concat();

    match walk_reader(Cursor::new(data)) {
        Err(Error::Structural { tag, reason, .. }) => {
            assert_eq!(tag, FourCC(*b"mvhd"));
            assert!(reason.contains("consumed 100 of 104"), "{}", reason);
        }
        other => panic!("expected structural error, got {:?}", other),
    }
}

#[test]
fn fields_past_payload_end_are_structural() {
    // stsz claims three entries but carries one
    let mut p = 0u32.to_be_bytes().to_vec();
    p.extend_from_slice(&3u32.to_be_bytes());
    p.extend_from_slice(&7u32.to_be_bytes());
    let stbl = container(b"stbl", &[full(b"stsz", 0, 0, &p)]);
    let data = [ftyp(b"isom", 0), stbl].concat();

    match walk_reader(Cursor::new(data)) {
        Err(Error::Structural { tag, reason, .. }) => {
            assert_eq!(tag, FourCC(*b"stsz"));
            assert!(reason.contains("past the end"), "{}", reason);
        }
        other => panic!("expected structural error, got {:?}", other),
    }
}

#[test]
fn short_input_is_truncated() {
    let mut data = ftyp(b"isom", 0);
    data.extend_from_slice(&100u32.to_be_bytes());
    data.extend_from_slice(b"abcd");
    data.extend_from_slice(&[0; 10]);

    match walk_reader(Cursor::new(data)) {
        Err(Error::Truncated { tag, offset }) => {
            assert_eq!(tag, FourCC(*b"abcd"));
            assert_eq!(offset, 24);
        }
        other => panic!("expected truncation, got {:?}", other),
    }
}

#[test]
fn zero_padding_inside_container_is_accepted() {
    let mut udta = container(b"udta", &[boxed(b"abcd", &[1, 2])]);
    let size = udta.len() as u32 + 4;
    udta[..4].copy_from_slice(&size.to_be_bytes());
    udta.extend_from_slice(&[0; 4]);
    let data = [ftyp(b"isom", 0), udta].concat();

    let roots = walk_reader(Cursor::new(data)).unwrap();
    assert_eq!(roots[1].children.len(), 1);
    assert_eq!(roots[1].consumed, 14);
}

#[test]
fn nonzero_tail_inside_container_is_structural() {
    let mut udta = container(b"udta", &[boxed(b"abcd", &[1, 2])]);
    let size = udta.len() as u32 + 3;
    udta[..4].copy_from_slice(&size.to_be_bytes());
    udta.extend_from_slice(&[0, 7, 0]);
    let data = [ftyp(b"isom", 0), udta].concat();

    assert!(matches!(
        walk_reader(Cursor::new(data)),
        Err(Error::Structural { .. })
    ));
}

#[test]
fn unknown_brand_aborts_the_walk() {
    let data = [ftyp(b"zzzz", 7), boxed(b"free", &[])].concat();
    match walk_reader(Cursor::new(&data)) {
        Err(Error::UnsupportedVariant { major, minor }) => {
            assert_eq!(major, FourCC(*b"zzzz"));
            assert_eq!(minor, 7);
        }
        other => panic!("expected unsupported variant, got {:?}", other),
    }

    let registry = default_registry();
    let options = WalkOptions { brand_check: false, ..WalkOptions::default() };
    let roots = Walker::new(&registry, None, options)
        .walk_file(Cursor::new(&data))
        .unwrap();
    assert_eq!(roots.len(), 2);
}

#[test]
fn camera_brand_accepts_any_minor_version() {
    let data = ftyp(b"mp41", 0x2013_0925);
    assert!(walk_reader(Cursor::new(data)).is_ok());
}

#[test]
fn file_must_start_with_ftyp() {
    let data = [boxed(b"free", &[]), ftyp(b"isom", 0)].concat();
    assert!(matches!(
        walk_reader(Cursor::new(data)),
        Err(Error::Structural { .. })
    ));
}

#[test]
fn depth_limit_is_enforced() {
    let data = [ftyp(b"isom", 0), small_movie()[24..].to_vec()].concat();
    let registry = default_registry();
    let options = WalkOptions { max_depth: 2, ..WalkOptions::default() };
    let result = Walker::new(&registry, None, options).walk_file(Cursor::new(data));
    match result {
        Err(Error::Structural { reason, .. }) => assert!(reason.contains("nesting"), "{}", reason),
        other => panic!("expected depth error, got {:?}", other),
    }
}

#[test]
fn schema_entries_take_precedence() {
    let schema = Schema::bundled().unwrap();
    let registry = default_registry();
    let roots = Walker::new(&registry, Some(&schema), WalkOptions::default())
        .walk_file(Cursor::new(small_movie()))
        .unwrap();
    assert_no_drift(&roots);

    assert_eq!(roots[0].source, DecodeSource::Schema);
    match &roots[0].value {
        Some(BoxValue::Fields(fields)) => {
            assert_eq!(fields[0].name, "major_brand");
            assert_eq!(fields[0].value.to_string(), "isom");
        }
        other => panic!("unexpected ftyp value: {:?}", other),
    }

    let mvhd = find_box(&roots, FourCC(*b"mvhd")).unwrap();
    assert_eq!(mvhd.source, DecodeSource::Schema);
    assert_eq!(mvhd.value.as_ref().and_then(BoxValue::timescale), Some(1000));

    // stts is not in the dictionary and falls back to the built-in decoder,
    // still seeing the timescale set by the schema-decoded mdhd
    let stts = find_box(&roots, FourCC(*b"stts")).unwrap();
    assert_eq!(stts.source, DecodeSource::Builtin);
    match &stts.value {
        Some(BoxValue::Structured(StructuredData::DecodingTimeToSample(s))) => {
            assert_eq!(s.duration_seconds, Some(1.0))
        }
        other => panic!("unexpected stts value: {:?}", other),
    }
}

#[test]
fn nested_schema_entries_apply_only_inside_their_container() {
    let schema = Schema::parse(
        r#"
        moov { "Type": CONTAINER, "Description": "Movie",
               "Parts": { abcd { "Type": STRUCT, "Description": "scoped",
                                 "Parts": { "value": U16 } } } }
        "#,
    )
    .unwrap();
    let inner = boxed(b"abcd", &[0x01, 0x02]);
    let data = [ftyp(b"isom", 0), inner.clone(), container(b"moov", &[inner])].concat();

    let registry = default_registry();
    let roots = Walker::new(&registry, Some(&schema), WalkOptions::default())
        .walk_file(Cursor::new(data))
        .unwrap();

    assert_eq!(roots[1].source, DecodeSource::Fallback);
    let scoped = &roots[2].children[0];
    assert_eq!(scoped.source, DecodeSource::Schema);
    match &scoped.value {
        Some(BoxValue::Fields(f)) => assert_eq!(f[0].value.to_string(), "258"),
        other => panic!("unexpected value: {:?}", other),
    }
}

#[test]
fn schema_struct_must_match_payload() {
    let schema = Schema::parse(r#"abcd { "Type": STRUCT, "Description": "", "Parts": { "v": U32 } }"#)
        .unwrap();
    let data = [ftyp(b"isom", 0), boxed(b"abcd", &[0, 0, 0, 1, 0, 0])].concat();
    let registry = default_registry();
    let result = Walker::new(&registry, Some(&schema), WalkOptions::default())
        .walk_file(Cursor::new(data));
    assert!(matches!(result, Err(Error::Structural { .. })));
}

#[test]
fn sibling_tags_may_repeat() {
    let data = [
        ftyp(b"isom", 0),
        boxed(b"free", &[1]),
        boxed(b"free", &[2, 3]),
        boxed(b"free", &[]),
    ]
    .concat();
    let roots = walk_reader(Cursor::new(data)).unwrap();
    let sizes: Vec<u64> = roots[1..].iter().map(|r| r.header.size).collect();
    assert_eq!(sizes, vec![9, 10, 8]);
}

#[test]
fn v1_times_beyond_i64_still_decode() {
    let moov = container(b"moov", &[mvhd_v1(0x8000_0000_0000_0000, 600, 1200)]);
    let data = [ftyp(b"isom", 0x200), moov].concat();

    let roots = walk_reader(Cursor::new(&data)).expect("walk");
    match find_box(&roots, FourCC(*b"mvhd")).and_then(|b| b.value.as_ref()) {
        Some(BoxValue::Structured(StructuredData::MovieHeader(m))) => {
            assert_eq!(m.version, 1);
            assert_eq!(m.creation_time.raw, 0x8000_0000_0000_0000);
            assert_eq!(m.creation_time.unix, None);
            assert_eq!(m.timescale, 600);
            assert_eq!(m.duration, 1200);
        }
        other => panic!("unexpected mvhd value: {:?}", other),
    }
}

#[test]
fn stts_tick_overflow_leaves_duration_unknown() {
    let stbl = container(b"stbl", &[stts(&[(u32::MAX, u32::MAX), (u32::MAX, u32::MAX)])]);
    let minf = container(b"minf", &[stbl]);
    let mdia = container(b"mdia", &[mdhd(90_000, 0), minf]);
    let moov = container(b"moov", &[container(b"trak", &[mdia])]);
    let data = [ftyp(b"isom", 0x200), moov].concat();

    let roots = walk_reader(Cursor::new(&data)).expect("walk");
    match find_box(&roots, FourCC(*b"stts")).and_then(|b| b.value.as_ref()) {
        Some(BoxValue::Structured(StructuredData::DecodingTimeToSample(s))) => {
            assert_eq!(s.entries.len(), 2);
            assert_eq!(s.duration_seconds, None);
        }
        other => panic!("unexpected stts value: {:?}", other),
    }
}

fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut p = 0u32.to_be_bytes().to_vec(); // pre_defined
    p.extend_from_slice(handler);
    p.extend_from_slice(&[0; 12]);
    p.extend_from_slice(b"meta\0");
    full(b"hdlr", 0, 0, &p)
}

#[test]
fn quicktime_meta_without_version_flags() {
    let keys = full(b"keys", 0, 0, &0u32.to_be_bytes());
    let meta = container(b"meta", &[hdlr(b"mdta"), keys]);
    let moov = container(b"moov", &[container(b"udta", &[meta])]);
    let data = [ftyp(b"qt  ", 0x200), moov].concat();

    let roots = walk_reader(Cursor::new(&data)).expect("walk");
    assert_no_drift(&roots);
    let meta = roots[1].child_path("udta.meta").expect("meta");
    match &meta.value {
        Some(BoxValue::Structured(StructuredData::Meta { quicktime, .. })) => assert!(*quicktime),
        other => panic!("unexpected meta value: {:?}", other),
    }
    let tags: Vec<FourCC> = meta.children.iter().map(|c| c.header.typ).collect();
    assert_eq!(tags, vec![FourCC(*b"hdlr"), FourCC(*b"keys")]);
    assert_eq!(meta.children[0].header.start, meta.header.start + 8);
}

#[test]
fn iso_meta_keeps_version_flags() {
    let mut body = vec![0, 0, 0, 0];
    body.extend(hdlr(b"mdir"));
    let meta = boxed(b"meta", &body);
    let moov = container(b"moov", &[container(b"udta", &[meta])]);
    let data = [ftyp(b"isom", 0x200), moov].concat();

    let roots = walk_reader(Cursor::new(&data)).expect("walk");
    assert_no_drift(&roots);
    let meta = roots[1].child_path("udta.meta").expect("meta");
    match &meta.value {
        Some(BoxValue::Structured(StructuredData::Meta { version, quicktime, .. })) => {
            assert_eq!(*version, 0);
            assert!(!*quicktime);
        }
        other => panic!("unexpected meta value: {:?}", other),
    }
    assert_eq!(meta.children.len(), 1);
    assert_eq!(meta.children[0].header.typ, FourCC(*b"hdlr"));
    assert_eq!(meta.children[0].header.start, meta.header.start + 12);
}
