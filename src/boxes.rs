use crate::registry::BoxValue;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn from_str(s: &str) -> Option<Self> {
        // '©' arrives as two UTF-8 bytes but is stored as the single byte 0xA9
        let mut out = [0u8; 4];
        let mut n = 0;
        for c in s.chars() {
            if n == 4 {
                return None;
            }
            out[n] = match c {
                '©' => 0xA9,
                c if c.is_ascii() => c as u8,
                _ => return None,
            };
            n += 1;
        }
        if n == 4 { Some(FourCC(out)) } else { None }
    }
    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| match c {
                32..=126 => c as char,
                0xA9 => '©',
                _ => '.',
            })
            .collect()
    }
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }
}
impl fmt::Debug for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }
impl fmt::Display for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxHeader {
    pub size: u64,          // declared size including header, or 0=to end of stream
    pub typ: FourCC,
    pub header_size: u64,   // 8, or 16 with an extended size
    pub start: u64,         // stream offset of header start
}

impl BoxHeader {
    /// Declared payload length; `None` for a size-0 box running to end of stream.
    pub fn payload_len(&self) -> Option<u64> {
        if self.size == 0 {
            None
        } else {
            Some(self.size - self.header_size)
        }
    }

    pub fn payload_start(&self) -> u64 {
        self.start + self.header_size
    }

    pub fn is_extended(&self) -> bool {
        self.header_size == 16
    }
}

/// Which path decoded a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeSource {
    Container,
    Schema,
    Builtin,
    Fallback,
}

/// A decoded box. Children are owned; the parent is implied by the position
/// in the tree and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct BoxNode {
    pub header: BoxHeader,
    pub source: DecodeSource,
    /// Payload bytes actually consumed while decoding this box.
    pub consumed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<BoxValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BoxNode>,
}

impl BoxNode {
    /// Size recomputed from what was consumed: header plus payload bytes.
    /// Matches `header.size` for every well-formed box.
    pub fn recomputed_size(&self) -> u64 {
        self.header.header_size + self.consumed
    }

    /// Depth-first search for the first box with the given tag.
    pub fn find(&self, typ: FourCC) -> Option<&BoxNode> {
        if self.header.typ == typ {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(typ))
    }

    /// Follow a dotted path of tags (e.g. `trak.mdia.minf`) below this node.
    pub fn child_path(&self, path: &str) -> Option<&BoxNode> {
        let mut cur = self;
        for seg in path.split('.') {
            let cc = FourCC::from_str(seg)?;
            cur = cur.children.iter().find(|c| c.header.typ == cc)?;
        }
        Some(cur)
    }
}

/// Find the first box with the given tag anywhere in a forest.
pub fn find_box(roots: &[BoxNode], typ: FourCC) -> Option<&BoxNode> {
    roots.iter().find_map(|b| b.find(typ))
}

/// Bounded preview of a payload that was skipped rather than decoded.
#[derive(Debug, Clone, Serialize)]
pub struct RawPreview {
    pub total_len: u64,
    #[serde(serialize_with = "hex_bytes")]
    pub preview: Vec<u8>,
}

pub(crate) fn hex_bytes<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}
