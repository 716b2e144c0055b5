mod common;

use common::{nal, three_frames};
use mp4atom::annexb::{
    NalKind, ParameterSets, frame_access_unit, scan_nal_units, split_access_units,
};
use mp4atom::Error;

#[test]
fn scans_and_classifies_nal_units() {
    let frames = three_frames();
    let nals = scan_nal_units(&frames[0]);

    let kinds: Vec<NalKind> = nals.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NalKind::Sps, NalKind::Pps, NalKind::Idr]);
    let offsets: Vec<usize> = nals.iter().map(|n| n.byte_offset).collect();
    assert_eq!(offsets, vec![0, 13, 22]);
    let lengths: Vec<usize> = nals.iter().map(|n| n.length).collect();
    assert_eq!(lengths, vec![13, 9, 104]);

    assert_eq!(nals[2].nal(&frames[0]).len(), 100);
    assert_eq!(nals[2].nal(&frames[0])[0], 0x65);
}

#[test]
fn other_nal_types_are_kept_apart() {
    assert_eq!(NalKind::from_header(0x06), NalKind::Other(6));
    assert_eq!(NalKind::from_header(0x09), NalKind::Other(9));
    assert!(NalKind::from_header(0x41).is_slice());
    assert!(!NalKind::from_header(0x67).is_slice());
}

#[test]
fn bytes_before_first_start_code_are_ignored() {
    let mut buf = vec![0xAA, 0xBB];
    buf.extend(nal(0x61, 3, 0x01));
    let nals = scan_nal_units(&buf);
    assert_eq!(nals.len(), 1);
    assert_eq!(nals[0].byte_offset, 2);
    assert_eq!(nals[0].length, 8);
}

#[test]
fn access_unit_needs_exactly_one_slice() {
    let frames = three_frames();
    let au = frame_access_unit(&frames[0], 0).unwrap();
    assert!(au.is_keyframe());
    assert_eq!(au.slice().sample_len(), 104);

    let au = frame_access_unit(&frames[1], 1).unwrap();
    assert!(!au.is_keyframe());

    let params_only = [nal(0x67, 8, 0x11), nal(0x68, 4, 0x22)].concat();
    assert!(matches!(
        frame_access_unit(&params_only, 3),
        Err(Error::MuxInvariant(_))
    ));

    let two_slices = [nal(0x65, 10, 0x33), nal(0x61, 10, 0x44)].concat();
    match frame_access_unit(&two_slices, 4) {
        Err(Error::MuxInvariant(msg)) => assert!(msg.contains("2 coded slices"), "{}", msg),
        other => panic!("expected mux invariant, got {:?}", other),
    }
}

#[test]
fn parameter_sets_come_from_the_frame() {
    let frames = three_frames();
    let au = frame_access_unit(&frames[0], 0).unwrap();
    let ps = ParameterSets::from_access_unit(&frames[0], &au).unwrap();
    assert_eq!(ps.sps.len(), 9);
    assert_eq!(ps.sps[0], 0x67);
    assert_eq!(ps.pps, vec![0x68, 0x22, 0x22, 0x22, 0x22]);

    let au = frame_access_unit(&frames[1], 1).unwrap();
    assert!(ParameterSets::from_access_unit(&frames[1], &au).is_err());
}

#[test]
fn continuous_stream_splits_at_slices() {
    let frames = three_frames();
    let mut stream = frames.concat();
    // trailing parameter sets with no slice after them are dropped
    stream.extend(nal(0x67, 8, 0x11));

    let split = split_access_units(&stream);
    assert_eq!(split.len(), 3);
    for (got, want) in split.iter().zip(&frames) {
        assert_eq!(*got, want.as_slice());
    }
}
