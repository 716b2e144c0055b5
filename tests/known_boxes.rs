use mp4atom::boxes::FourCC;
use mp4atom::known_boxes::KnownBox;

#[test]
fn known_box_from_ftyp() {
    let kb = KnownBox::from(FourCC(*b"ftyp"));
    assert!(matches!(kb, KnownBox::Ftyp));
    assert_eq!(kb.full_name(), "File Type Box");
}

#[test]
fn known_box_classifies_containers() {
    for tag in [b"moov", b"trak", b"mdia", b"minf", b"stbl", b"udta", b"dinf"] {
        assert!(KnownBox::from(FourCC(*tag)).is_container(), "{}", FourCC(*tag));
    }
    assert!(!KnownBox::from(FourCC(*b"ftyp")).is_container());
    assert!(!KnownBox::from(FourCC(*b"mdat")).is_container());
}

#[test]
fn known_box_classifies_full_box() {
    assert!(KnownBox::from(FourCC(*b"mvhd")).is_full_box());
    assert!(KnownBox::from(FourCC(*b"stsz")).is_full_box());
    assert!(!KnownBox::from(FourCC(*b"mdat")).is_full_box());
    assert!(!KnownBox::from(FourCC(*b"avc1")).is_full_box());
}

#[test]
fn unlisted_tags_stay_unknown() {
    let kb = KnownBox::from(FourCC(*b"zzzz"));
    assert_eq!(kb, KnownBox::Unknown(FourCC(*b"zzzz")));
    assert_eq!(kb.full_name(), "Unknown Box");
    assert!(!kb.is_container());
}

#[test]
fn metadata_text_boxes_have_names() {
    assert_eq!(KnownBox::from(FourCC(*b"auth")).full_name(), "Author");
    assert_eq!(KnownBox::from(FourCC(*b"GPMF")).full_name(), "GoPro Metadata Format");
}
