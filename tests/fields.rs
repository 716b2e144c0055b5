mod common;

use mp4atom::codec::{AvcConfig, decode_esds};
use mp4atom::fields::{
    Mp4Time, fixed_8_8, fixed_16_16, lang_from_u16, lang_to_u16, read_descriptor_len,
    read_fourcc_list, read_version_flags,
};
use mp4atom::gpmf::{KlvValue, decode_klv};
use mp4atom::sps::{parse_sps, unescape_rbsp};
use mp4atom::text::{TextLayout, classify, decode_labeled_text, encode_language_prefixed};
use mp4atom::{Error, FourCC};
use std::io::Cursor;

#[test]
fn descriptor_length_skips_marker_bytes() {
    let mut r = Cursor::new(vec![0x81, 0x02]);
    assert_eq!(read_descriptor_len(&mut r).unwrap(), (2, 2));

    let mut r = Cursor::new(vec![0x80, 0x80, 0x80, 0x19]);
    assert_eq!(read_descriptor_len(&mut r).unwrap(), (0x19, 4));

    let mut r = Cursor::new(vec![0x05, 0xFF]);
    assert_eq!(read_descriptor_len(&mut r).unwrap(), (5, 1));
    assert_eq!(r.position(), 1);
}

#[test]
fn descriptor_length_gives_up_after_four_bytes() {
    let mut r = Cursor::new(vec![0x80, 0x80, 0x80, 0x80, 0x01]);
    assert!(matches!(read_descriptor_len(&mut r), Err(Error::Malformed(_))));
}

#[test]
fn fixed_point_conversions() {
    assert_eq!(fixed_16_16(0x0001_8000), 1.5);
    assert_eq!(fixed_16_16(0xFFFF_0000), -1.0);
    assert_eq!(fixed_8_8(0x0100), 1.0);
    assert_eq!(fixed_8_8(0x0080), 0.5);
}

#[test]
fn packed_language_codes() {
    assert_eq!(lang_from_u16(0x55C4), "und");
    assert_eq!(lang_from_u16(0x15C7), "eng");
    assert_eq!(lang_from_u16(0), "und");
    assert_eq!(lang_to_u16("eng"), 0x15C7);
    // anything that is not three lowercase letters becomes "und"
    assert_eq!(lang_to_u16("EN"), 0x55C4);
}

#[test]
fn mp4_epoch_offset() {
    assert_eq!(Mp4Time::from_raw(2_082_844_800).unix, Some(0));
    assert_eq!(Mp4Time::from_raw(0x8000_0000_0000_0000).unix, None);
    assert_eq!(Mp4Time::from_raw(0x8000_0000_0000_0000).to_string(), "raw 9223372036854775808");
    assert_eq!(Mp4Time::from_unix(86_400).raw, 2_082_931_200);
}

#[test]
fn version_flags_and_fourcc_list() {
    let mut r = Cursor::new(vec![1, 0x00, 0x00, 0x07]);
    assert_eq!(read_version_flags(&mut r).unwrap(), (1, 7));

    let mut r = Cursor::new(b"isomavc1".to_vec());
    assert_eq!(
        read_fourcc_list(&mut r).unwrap(),
        vec![FourCC(*b"isom"), FourCC(*b"avc1")]
    );

    let mut r = Cursor::new(b"isomav".to_vec());
    assert!(read_fourcc_list(&mut r).is_err());
}

#[test]
fn fourcc_from_str_maps_copyright_sign() {
    assert_eq!(FourCC::from_str("©nam"), Some(FourCC(*b"\xa9nam")));
    assert_eq!(FourCC::from_str("url "), Some(FourCC(*b"url ")));
    assert_eq!(FourCC::from_str("toolong"), None);
    assert_eq!(FourCC(*b"\xa9nam").to_string(), "©nam");
}

#[test]
fn avcc_decode_and_write() {
    let mut bytes = vec![1, 0x42, 0x00, 0x1E, 0xFF, 0xE1, 0x00, 0x07];
    bytes.extend_from_slice(&common::SPS_64X48);
    bytes.extend_from_slice(&[0x01, 0x00, 0x04, 0x68, 0xCE, 0x3C, 0x80]);

    let cfg = AvcConfig::decode(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(cfg.profile, 0x42);
    assert_eq!(cfg.level, 0x1E);
    assert_eq!(cfg.length_size, 4);
    assert_eq!(cfg.sps, vec![common::SPS_64X48.to_vec()]);
    assert_eq!(cfg.pps, vec![vec![0x68, 0xCE, 0x3C, 0x80]]);
    assert!(cfg.trailing.is_empty());

    let built = AvcConfig::from_parameter_sets(&common::SPS_64X48, &[0x68, 0xCE, 0x3C, 0x80]).unwrap();
    assert_eq!(built, cfg);
    let mut out = Vec::new();
    built.write(&mut out).unwrap();
    assert_eq!(out, bytes);
    assert_eq!(built.encoded_len(), bytes.len());
}

#[test]
fn esds_nested_descriptors() {
    let bytes = vec![
        0x03, 0x80, 0x80, 0x80, 25, // ES_Descriptor, padded length
        0x00, 0x01, // ES_ID
        0x00, // flags
        0x04, 17, // DecoderConfigDescriptor
        0x40, // AAC
        0x15, // audio stream << 2 | upstream | reserved
        0x00, 0x18, 0x00, // buffer size
        0x00, 0x01, 0xF4, 0x00, // max bitrate
        0x00, 0x01, 0xF4, 0x00, // avg bitrate
        0x05, 0x02, 0x12, 0x10, // DecoderSpecificInfo
        0x06, 0x01, 0x02, // SLConfig
    ];

    let es = decode_esds(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(es.es_id, 1);
    let dc = es.decoder_config.expect("decoder config");
    assert_eq!(dc.object_type, 0x40);
    assert_eq!(dc.stream_type, 5);
    assert_eq!(dc.buffer_size, 0x1800);
    assert_eq!(dc.max_bitrate, 128_000);
    assert_eq!(dc.specific_info, vec![0x12, 0x10]);
    assert_eq!(es.sl_predefined, Some(2));
    assert!(es.skipped.is_empty());
}

#[test]
fn esds_descriptors_after_the_es_descriptor_are_kept() {
    let bytes = vec![
        0x03, 6, // ES_Descriptor
        0x00, 0x02, 0x00, // ES_ID, flags
        0x06, 0x01, 0x02, // SLConfig inside
        0x0E, 0x02, 0xAA, 0xBB, // IPI descriptor pointer after it
    ];

    let es = decode_esds(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(es.es_id, 2);
    assert_eq!(es.sl_predefined, Some(2));
    assert_eq!(es.skipped, vec![(0x0E, 2)]);
}

#[test]
fn gpmf_nested_device_name() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"DEVC");
    bytes.extend_from_slice(&[0, 4, 0, 4]); // nested, 4 x 4 bytes
    bytes.extend_from_slice(b"DVNM");
    bytes.extend_from_slice(&[b'c', 1, 0, 6]);
    bytes.extend_from_slice(b"GoPro1\0\0");

    let mut r = Cursor::new(bytes);
    let items = decode_klv(&mut r, 24).unwrap();
    assert_eq!(r.position(), 24);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key, FourCC(*b"DEVC"));
    match &items[0].value {
        KlvValue::Nested(children) => {
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].key, FourCC(*b"DVNM"));
            match &children[0].value {
                KlvValue::Chars { text, padded_len } => {
                    assert_eq!(text, "GoPro1");
                    assert_eq!(*padded_len, 8);
                }
                other => panic!("expected chars, got {:?}", other),
            }
        }
        other => panic!("expected nested, got {:?}", other),
    }
}

#[test]
fn gpmf_zero_key_consumes_rest_of_scope() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"SCAL");
    bytes.extend_from_slice(&[b'L', 4, 0, 2]);
    bytes.extend_from_slice(&[0, 0, 0, 1, 0, 0, 1, 0]);
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0xAB; 8]);

    let mut r = Cursor::new(bytes);
    let items = decode_klv(&mut r, 32).unwrap();
    assert_eq!(r.position(), 32);
    assert_eq!(items.len(), 1);
    match &items[0].value {
        KlvValue::U32(v) => assert_eq!(v, &vec![1, 256]),
        other => panic!("expected u32 array, got {:?}", other),
    }
}

#[test]
fn gpmf_item_larger_than_scope_is_malformed() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"ACCL");
    bytes.extend_from_slice(&[b's', 6, 0, 10]);
    bytes.extend_from_slice(&[0; 8]);
    assert!(matches!(
        decode_klv(&mut Cursor::new(bytes), 16),
        Err(Error::Malformed(_))
    ));
}

#[test]
fn labeled_text_classifier() {
    assert_eq!(classify(FourCC(*b"auth")), Some(TextLayout::LanguagePrefixed));
    assert_eq!(classify(FourCC(*b"\xa9too")), Some(TextLayout::FourccLabeled));
    assert_eq!(classify(FourCC(*b"name")), Some(TextLayout::EmptyTag));
    assert_eq!(classify(FourCC(*b"mvhd")), None);
}

#[test]
fn labeled_text_round_trip_and_fallback() {
    let payload = encode_language_prefixed("eng", "hello");
    let t = decode_labeled_text(TextLayout::LanguagePrefixed, &payload);
    assert_eq!(t.language.as_deref(), Some("eng"));
    assert_eq!(t.text, "hello");

    // declared length longer than the payload: reported as bare text
    let t = decode_labeled_text(TextLayout::FourccLabeled, &[0, 40, 0x55, 0xC4, b'x']);
    assert_eq!(t.language, None);

    let t = decode_labeled_text(TextLayout::EmptyTag, b"track one");
    assert_eq!(t.text, "track one");
}

#[test]
fn sps_picture_size() {
    let info = parse_sps(&common::SPS_64X48).unwrap();
    assert_eq!(info.profile, 66);
    assert_eq!(info.level, 30);
    assert_eq!((info.width, info.height), (64, 48));
}

#[test]
fn sps_rejects_other_nal_types() {
    assert!(parse_sps(&[0x68, 0xCE, 0x3C, 0x80]).is_err());
    assert!(parse_sps(&[0x67, 0x42]).is_err());
}

#[test]
fn rbsp_unescaping() {
    assert_eq!(unescape_rbsp(&[0, 0, 3, 1, 0, 0, 3]), vec![0, 0, 1, 0, 0]);
    assert_eq!(unescape_rbsp(&[0, 3, 0]), vec![0, 3, 0]);
}
