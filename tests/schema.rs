use mp4atom::fields::FieldValue;
use mp4atom::schema::{FieldType, Schema, SchemaKind, interpret};
use mp4atom::{Error, FourCC};
use std::io::Cursor;

const SAMPLE: &str = r#"
# comment lines are ignored
ftyp { "Type": STRUCT, "Description": "File Type Box",
       "Parts": { "major_brand": FOURCC, "minor_version": U32,
                  "compatible_brands": FOURCC_LIST } }

moov { "Type": CONTAINER, "Description": "Movie Box # not a comment",
       "Parts": {
           udta { "Type": CONTAINER, "Description": "User data",
                  "Parts": { "©nam" { "Type": CHARS, "Description": "Title" } } }
       } }

"url " { "Type": STRUCT, "Description": "Data Entry URL",
         "Parts": { "version_flags": VERSION_FLAGS, "location": CSTRING } }

mdat { "Type": BYTES, "Description": "Media Data" }
"#;

#[test]
fn parses_entries_and_kinds() {
    let schema = Schema::parse(SAMPLE).unwrap();
    assert_eq!(schema.len(), 4);

    let ftyp = schema.lookup(FourCC(*b"ftyp")).unwrap();
    assert_eq!(ftyp.description, "File Type Box");
    match &ftyp.kind {
        SchemaKind::Struct(fields) => {
            let types: Vec<FieldType> = fields.iter().map(|f| f.ty).collect();
            assert_eq!(types, vec![FieldType::FourCC, FieldType::U32, FieldType::FourCCList]);
            assert_eq!(fields[1].name, "minor_version");
        }
        other => panic!("expected struct, got {:?}", other),
    }

    assert_eq!(schema.lookup(FourCC(*b"mdat")).unwrap().kind, SchemaKind::Bytes);
    assert!(schema.lookup(FourCC(*b"url ")).is_some());
    assert!(schema.lookup(FourCC(*b"trak")).is_none());
}

#[test]
fn nested_entries_stay_scoped() {
    let schema = Schema::parse(SAMPLE).unwrap();
    let moov = schema.lookup(FourCC(*b"moov")).unwrap();
    assert_eq!(moov.description, "Movie Box # not a comment");

    let udta = moov.nested_lookup(FourCC(*b"udta")).unwrap();
    assert_eq!(udta.kind, SchemaKind::Container);
    let nam = udta.nested_lookup(FourCC(*b"\xa9nam")).unwrap();
    assert_eq!(nam.kind, SchemaKind::Chars);

    // not visible at the top level
    assert!(schema.lookup(FourCC(*b"udta")).is_none());
}

#[test]
fn bundled_dictionary_loads() {
    let schema = Schema::bundled().unwrap();
    assert!(!schema.is_empty());
    for tag in [b"ftyp", b"moov", b"mvhd", b"tkhd", b"mdhd", b"hdlr", b"url ", b"mdat"] {
        assert!(schema.lookup(FourCC(*tag)).is_some(), "missing {}", FourCC(*tag));
    }
}

fn load_error(text: &str) -> String {
    match Schema::parse(text) {
        Err(Error::SchemaLoad(msg)) => msg,
        other => panic!("expected a schema load error, got {:?}", other),
    }
}

#[test]
fn malformed_dictionaries_are_rejected() {
    assert!(load_error("").contains("empty"));
    assert!(load_error("# only a comment\n").contains("empty"));
    assert!(load_error(r#"abcd { "Type": BYTES, "Description": "x" "#).contains("unbalanced"));
    assert!(load_error(r#"abcd { "Type": BLOB, "Description": "x" }"#).contains("BLOB"));
    assert!(load_error(r#"abcd { "Type": STRUCT, "Parts": { "v": U99 } }"#).contains("U99"));
    assert!(load_error(r#"abcd { "Description": "x" }"#).contains("missing Type"));
    assert!(load_error(r#"toolong { "Type": BYTES }"#).contains("four-character"));
    assert!(load_error(r#"abcd { "Type": BYTES, "Parts": { "v": U8 } }"#).contains("no Parts"));
    assert!(
        load_error(r#"abcd { "Type": BYTES } abcd { "Type": CHARS }"#).contains("duplicate")
    );
}

#[test]
fn missing_file_is_a_load_error() {
    assert!(matches!(
        Schema::load("/nonexistent/boxes.dict"),
        Err(Error::SchemaLoad(_))
    ));
}

#[test]
fn reserved_runs_parse_as_fixed_width() {
    let schema = Schema::parse(
        r#"vmhd { "Type": STRUCT, "Parts": { "vf": VERSION_FLAGS, "mode": U16, "opcolor": BYTES(6) } }"#,
    )
    .unwrap();
    match &schema.lookup(FourCC(*b"vmhd")).unwrap().kind {
        SchemaKind::Struct(f) => assert_eq!(f[2].ty, FieldType::Skip(6)),
        other => panic!("expected struct, got {:?}", other),
    }
}

#[test]
fn interpreter_follows_version_for_sized_fields() {
    let schema = Schema::parse(
        r#"mdhd { "Type": STRUCT,
                 "Parts": { "vf": VERSION_FLAGS, "created": MP4TIME, "timescale": U32,
                            "duration": UINTV, "language": LANGUAGE, "rest": REMAINDER } }"#,
    )
    .unwrap();
    let SchemaKind::Struct(fields) = &schema.lookup(FourCC(*b"mdhd")).unwrap().kind else {
        panic!("expected struct");
    };

    let mut v1 = vec![1, 0, 0, 0];
    v1.extend_from_slice(&2_082_844_800u64.to_be_bytes());
    v1.extend_from_slice(&48_000u32.to_be_bytes());
    v1.extend_from_slice(&96_000u64.to_be_bytes());
    v1.extend_from_slice(&0x15C7u16.to_be_bytes());
    v1.extend_from_slice(&[0xDE, 0xAD]);

    let mut r = Cursor::new(v1);
    let out = interpret(fields, &mut r).unwrap();
    assert_eq!(r.position(), r.get_ref().len() as u64);

    match &out[1].value {
        FieldValue::Time(t) => assert_eq!(t.unix, Some(0)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(out[2].value, FieldValue::Unsigned(48_000)));
    assert!(matches!(out[3].value, FieldValue::Unsigned(96_000)));
    assert_eq!(out[4].value.to_string(), "eng");
    match &out[5].value {
        FieldValue::Bytes(b) => assert_eq!(b, &vec![0xDE, 0xAD]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn interpreter_rejects_unknown_versions() {
    let fields = match Schema::parse(r#"abcd { "Type": STRUCT, "Parts": { "vf": VERSION_FLAGS, "d": UINTV } }"#)
        .unwrap()
        .lookup(FourCC(*b"abcd"))
        .map(|e| e.kind.clone())
    {
        Some(SchemaKind::Struct(f)) => f,
        other => panic!("expected struct, got {:?}", other),
    };
    let mut r = Cursor::new(vec![2, 0, 0, 0, 0, 0, 0, 1]);
    assert!(matches!(interpret(&fields, &mut r), Err(Error::Malformed(_))));
}
