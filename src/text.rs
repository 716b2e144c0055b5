//! User-data text atoms. Three payload layouts share one decoder:
//!
//! * `LanguagePrefixed`: 3GPP style (`auth`, `cprt`, ...): version/flags,
//!   a packed language code, then NUL-terminated text.
//! * `FourccLabeled`: QuickTime `©xxx` atoms: 16-bit text length, 16-bit
//!   language code, then the text.
//! * `EmptyTag`: the payload is the bare text.

use crate::boxes::FourCC;
use crate::fields::{c_string_lossy, lang_from_u16, lang_to_u16};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextLayout {
    LanguagePrefixed,
    FourccLabeled,
    EmptyTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledText {
    pub layout: TextLayout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub text: String,
}

const LANGUAGE_PREFIXED: &[&[u8; 4]] = &[
    b"cprt", b"auth", b"titl", b"dscp", b"perf", b"gnre", b"albm",
];

const EMPTY_TAG: &[&[u8; 4]] = &[b"name", b"keyw"];

pub fn classify(tag: FourCC) -> Option<TextLayout> {
    if tag.0[0] == 0xA9 {
        Some(TextLayout::FourccLabeled)
    } else if LANGUAGE_PREFIXED.contains(&&tag.0) {
        Some(TextLayout::LanguagePrefixed)
    } else if EMPTY_TAG.contains(&&tag.0) {
        Some(TextLayout::EmptyTag)
    } else {
        None
    }
}

/// Interpret a whole payload. Never fails: a payload that does not fit its
/// layout is reported as bare text so the box still consumes exactly its size.
pub fn decode_labeled_text(layout: TextLayout, payload: &[u8]) -> LabeledText {
    match layout {
        TextLayout::LanguagePrefixed if payload.len() >= 6 => {
            let code = u16::from_be_bytes([payload[4], payload[5]]) & 0x7FFF;
            LabeledText {
                layout,
                language: Some(lang_from_u16(code)),
                text: decode_text(&payload[6..]),
            }
        }
        TextLayout::FourccLabeled if payload.len() >= 4 => {
            let len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
            let code = u16::from_be_bytes([payload[2], payload[3]]);
            let body = &payload[4..];
            if len <= body.len() {
                LabeledText {
                    layout,
                    language: Some(lang_from_u16(code)),
                    text: decode_text(&body[..len]),
                }
            } else {
                bare(layout, payload)
            }
        }
        _ => bare(layout, payload),
    }
}

fn bare(layout: TextLayout, payload: &[u8]) -> LabeledText {
    LabeledText { layout, language: None, text: c_string_lossy(payload) }
}

fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        return String::from_utf16_lossy(&units);
    }
    c_string_lossy(bytes)
}

/// Payload for a 3GPP language-prefixed atom (version 0, flags 0).
pub fn encode_language_prefixed(language: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + text.len());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&lang_to_u16(language).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    out
}
