//! Recursive box walker.
//!
//! One walker serves both decode paths: a schema entry for the tag wins when
//! a schema is loaded; otherwise the tag table and the built-in decoders are
//! used; unknown tags are skipped through a bounded dump.
//!
//! Every box payload is read through a reader limited to the declared
//! payload length, so a decoder can never wander into its sibling. Whatever
//! the decoder leaves unread, or tries to read past the end, is a
//! structural error naming the box and its offset.

use crate::boxes::{BoxHeader, BoxNode, DecodeSource, FourCC, RawPreview};
use crate::error::{Error, Result};
use crate::fields::{FieldValue, c_string_lossy};
use crate::known_boxes::KnownBox;
use crate::parser::read_box_header;
use crate::registry::{BoxValue, Registry, StructuredData};
use crate::schema::{Schema, SchemaEntry, SchemaKind, interpret};
use crate::util::{OffsetReader, ScratchBuf};
use std::io::{ErrorKind, Read, Take};

pub const DEFAULT_MAX_DEPTH: usize = 64;
pub const DEFAULT_PREVIEW_LEN: usize = 64;

/// Major brand / minor version pairs accepted at the top of a file.
/// `None` accepts any minor version for that brand.
pub const KNOWN_BRANDS: &[(&[u8; 4], Option<u32>)] = &[
    (b"isom", Some(0)),
    (b"isom", Some(1)),
    (b"isom", Some(0x200)),
    (b"iso2", Some(0)),
    (b"iso2", Some(0x200)),
    (b"iso4", Some(0)),
    (b"iso4", Some(0x200)),
    (b"iso5", Some(0)),
    (b"iso5", Some(0x200)),
    (b"iso6", Some(0)),
    (b"iso6", Some(0x200)),
    (b"avc1", Some(0)),
    (b"mp42", Some(0)),
    (b"mp42", Some(1)),
    // camera firmware stamps a build date here
    (b"mp41", None),
    (b"qt  ", Some(0)),
    (b"qt  ", Some(0x200)),
    (b"qt  ", Some(0x2005_0300)),
    (b"qt  ", Some(0x2006_0200)),
    (b"M4V ", Some(0)),
    (b"M4V ", Some(1)),
    (b"M4A ", Some(0)),
    (b"3gp4", Some(0)),
    (b"3gp5", Some(0)),
    (b"3gp6", Some(0)),
    (b"3gp6", Some(0x100)),
    (b"3gp6", Some(0x200)),
    (b"dash", Some(0)),
];

/// Reject a file whose `ftyp` brand pair is not in [`KNOWN_BRANDS`].
pub fn check_brand(major: FourCC, minor: u32) -> Result<()> {
    let known = KNOWN_BRANDS
        .iter()
        .any(|(b, m)| **b == major.0 && m.is_none_or(|m| m == minor));
    if known {
        Ok(())
    } else {
        Err(Error::UnsupportedVariant { major, minor })
    }
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Require a leading `ftyp` with a known brand pair.
    pub brand_check: bool,
    pub max_depth: usize,
    /// Bytes kept from each dumped payload.
    pub preview_len: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            brand_check: true,
            max_depth: DEFAULT_MAX_DEPTH,
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }
}

/// Context threaded through every recursive call: nesting depth, the
/// timescale in force, and the schema entries visible at this level.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub depth: usize,
    pub timescale: Option<u32>,
    schema: Option<&'a Schema>,
    container: Option<&'a SchemaEntry>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn root(schema: Option<&'a Schema>) -> Self {
        Self {
            depth: 0,
            timescale: None,
            schema,
            container: None,
            parent: None,
        }
    }

    /// Innermost scoped entry first, then the top-level table.
    pub fn lookup(&self, tag: FourCC) -> Option<&'a SchemaEntry> {
        let mut cur: Option<&Scope<'a>> = Some(self);
        while let Some(s) = cur {
            if let Some(e) = s.container.and_then(|c| c.nested_lookup(tag)) {
                return Some(e);
            }
            cur = s.parent;
        }
        self.schema.and_then(|s| s.lookup(tag))
    }

    fn child<'b>(&'b self, container: Option<&'b SchemaEntry>) -> Scope<'b> {
        Scope {
            depth: self.depth + 1,
            timescale: self.timescale,
            schema: self.schema,
            container,
            parent: Some(self),
        }
    }
}

type Payload<'r, 'i> = Take<&'r mut OffsetReader<&'i mut dyn Read>>;

pub struct Walker<'a> {
    registry: &'a Registry,
    schema: Option<&'a Schema>,
    options: WalkOptions,
    scratch: ScratchBuf,
}

impl<'a> Walker<'a> {
    pub fn new(registry: &'a Registry, schema: Option<&'a Schema>, options: WalkOptions) -> Self {
        Self {
            registry,
            schema,
            options,
            scratch: ScratchBuf::new(),
        }
    }

    /// Walk a whole stream until end of input.
    pub fn walk_file<R: Read>(&mut self, mut input: R) -> Result<Vec<BoxNode>> {
        let mut r: OffsetReader<&mut dyn Read> = OffsetReader::new(&mut input);
        let mut scope = Scope::root(self.schema);
        let mut nodes = Vec::new();

        loop {
            let hdr = match read_box_header(&mut r) {
                Ok(h) => h,
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            };
            let node = self.walk_box(&mut r, hdr, &scope, None)?;

            if nodes.is_empty() && self.options.brand_check {
                self.check_first_box(&node)?;
            }
            if let Some(ts) = node.value.as_ref().and_then(BoxValue::timescale) {
                scope.timescale = Some(ts);
            }
            let to_eof = node.header.size == 0;
            nodes.push(node);
            if to_eof {
                break;
            }
        }
        Ok(nodes)
    }

    /// Walk the boxes in the next `budget` bytes of `r`, which sits at
    /// absolute stream offset `start`.
    pub fn walk(&mut self, r: &mut dyn Read, start: u64, budget: u64) -> Result<Vec<BoxNode>> {
        let scope = Scope::root(self.schema);
        self.walk_children(r, start, budget, &scope, FourCC(*b"root"))
    }

    fn check_first_box(&self, node: &BoxNode) -> Result<()> {
        let hdr = &node.header;
        if hdr.typ != FourCC(*b"ftyp") {
            return Err(Error::structural(
                hdr.typ,
                hdr.start,
                "file does not begin with an ftyp box",
            ));
        }
        let (major, minor) = brand_of(node)
            .ok_or_else(|| Error::structural(hdr.typ, hdr.start, "ftyp carries no brand"))?;
        check_brand(major, minor)
    }

    fn walk_children(
        &mut self,
        r: &mut dyn Read,
        start: u64,
        budget: u64,
        scope: &Scope<'_>,
        parent: FourCC,
    ) -> Result<Vec<BoxNode>> {
        if scope.depth > self.options.max_depth {
            return Err(Error::structural(
                parent,
                start,
                format!("nesting deeper than {} levels", self.options.max_depth),
            ));
        }

        let mut r = OffsetReader::at(r, start);
        let mut left = budget;
        let mut here = *scope;
        let mut children = Vec::new();

        while left > 0 {
            if left < 8 {
                self.trailing(&mut r, left, parent, start)?;
                break;
            }
            let hdr = match read_box_header(&mut r) {
                Ok(h) => h,
                Err(Error::EndOfStream) => {
                    return Err(Error::Truncated { tag: parent, offset: r.position() });
                }
                Err(e) => return Err(e),
            };
            if hdr.size == 0 {
                return Err(Error::structural(hdr.typ, hdr.start, "unterminated size-0 box"));
            }
            if hdr.size > left {
                return Err(Error::structural(
                    hdr.typ,
                    hdr.start,
                    format!(
                        "box of {} bytes overruns '{}' ({} bytes left)",
                        hdr.size, parent, left
                    ),
                ));
            }

            let node = self.walk_box(&mut r, hdr, &here, Some(parent))?;
            left -= node.header.size;
            if let Some(ts) = node.value.as_ref().and_then(BoxValue::timescale) {
                here.timescale = Some(ts);
            }
            children.push(node);
        }
        Ok(children)
    }

    fn trailing(
        &mut self,
        r: &mut OffsetReader<&mut dyn Read>,
        left: u64,
        parent: FourCC,
        start: u64,
    ) -> Result<()> {
        let at = r.position();
        let mut tail = [0u8; 8];
        let tail = &mut tail[..left as usize];
        r.read_exact(tail)
            .map_err(|_| Error::Truncated { tag: parent, offset: at })?;
        if tail.iter().all(|&b| b == 0) {
            log::debug!("'{}' at {:#x}: {} zero bytes of padding", parent, start, left);
            Ok(())
        } else {
            Err(Error::structural(
                parent,
                at,
                format!("{} trailing bytes are too short for a box header", left),
            ))
        }
    }

    fn walk_box(
        &mut self,
        r: &mut OffsetReader<&mut dyn Read>,
        hdr: BoxHeader,
        scope: &Scope<'_>,
        parent: Option<FourCC>,
    ) -> Result<BoxNode> {
        let Some(len) = hdr.payload_len() else {
            if parent.is_some() {
                return Err(Error::structural(hdr.typ, hdr.start, "unterminated size-0 box"));
            }
            return self.drain_to_eof(r, hdr);
        };

        let mut payload = (&mut *r).take(len);
        let result = self.dispatch(&mut payload, &hdr, scope);
        let left = payload.limit();

        let (source, value, children) = match result {
            Ok(v) => v,
            Err(e) => return Err(rewrap(e, &hdr, left)),
        };
        if left != 0 {
            return Err(Error::structural(
                hdr.typ,
                hdr.start,
                format!("decoder consumed {} of {} payload bytes", len - left, len),
            ));
        }

        Ok(BoxNode {
            header: hdr,
            source,
            consumed: len,
            value,
            children,
        })
    }

    fn dispatch(
        &mut self,
        payload: &mut Payload<'_, '_>,
        hdr: &BoxHeader,
        scope: &Scope<'_>,
    ) -> Result<(DecodeSource, Option<BoxValue>, Vec<BoxNode>)> {
        let start = hdr.payload_start();

        if let Some(entry) = scope.lookup(hdr.typ) {
            let value = match &entry.kind {
                SchemaKind::Container => {
                    let len = payload.limit();
                    let child = scope.child(Some(entry));
                    let children = self.walk_children(payload, start, len, &child, hdr.typ)?;
                    return Ok((DecodeSource::Schema, None, children));
                }
                SchemaKind::Struct(fields) => BoxValue::Fields(interpret(fields, payload)?),
                SchemaKind::Bytes => BoxValue::Bytes(self.dump(payload)?),
                SchemaKind::Chars => {
                    let mut text = Vec::new();
                    payload.read_to_end(&mut text)?;
                    BoxValue::Text(c_string_lossy(&text))
                }
            };
            return Ok((DecodeSource::Schema, Some(value), Vec::new()));
        }

        if KnownBox::from(hdr.typ).is_container() {
            let len = payload.limit();
            let child = scope.child(None);
            let children = self.walk_children(payload, start, len, &child, hdr.typ)?;
            return Ok((DecodeSource::Container, None, children));
        }

        let registry = self.registry;
        if let Some(dec) = registry.get(hdr.typ) {
            log::debug!(
                "'{}' at {:#x}: {} decoder",
                hdr.typ,
                hdr.start,
                registry.name(hdr.typ).unwrap_or("built-in")
            );
            let value = dec.decode(payload, hdr, scope)?;
            let mut children = Vec::new();
            if dec.has_children() {
                let replay = dec.replay(&value);
                let left = payload.limit() + replay.len() as u64;
                let prefix = hdr.payload_len().unwrap_or(0) - left;
                let child = scope.child(None);
                let mut rest = replay.chain(&mut *payload);
                children = self.walk_children(&mut rest, start + prefix, left, &child, hdr.typ)?;
            }
            return Ok((DecodeSource::Builtin, Some(value), children));
        }

        log::debug!(
            "'{}' at {:#x}: no decoder, dumping {} bytes",
            hdr.typ,
            hdr.start,
            payload.limit()
        );
        Ok((DecodeSource::Fallback, Some(BoxValue::Bytes(self.dump(payload)?)), Vec::new()))
    }

    fn dump(&mut self, payload: &mut Payload<'_, '_>) -> Result<RawPreview> {
        let len = payload.limit();
        let (preview, total) = self.scratch.drain(payload, len, self.options.preview_len)?;
        Ok(RawPreview { total_len: total, preview })
    }

    fn drain_to_eof(&mut self, r: &mut OffsetReader<&mut dyn Read>, hdr: BoxHeader) -> Result<BoxNode> {
        let (preview, total) = self.scratch.drain(r, u64::MAX, self.options.preview_len)?;
        log::debug!("'{}' at {:#x}: size 0, {} bytes to end of stream", hdr.typ, hdr.start, total);
        Ok(BoxNode {
            header: hdr,
            source: DecodeSource::Fallback,
            consumed: total,
            value: Some(BoxValue::Bytes(RawPreview { total_len: total, preview })),
            children: Vec::new(),
        })
    }
}

/// Attach the box tag and offset to an error raised by its decoder.
fn rewrap(e: Error, hdr: &BoxHeader, left: u64) -> Error {
    match e {
        Error::Malformed(reason) => Error::structural(hdr.typ, hdr.start, reason),
        Error::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            if left == 0 {
                Error::structural(hdr.typ, hdr.start, "fields run past the end of the payload")
            } else {
                Error::Truncated { tag: hdr.typ, offset: hdr.start }
            }
        }
        other => other,
    }
}

/// Major brand and minor version of a decoded `ftyp`, from either decode path.
pub fn brand_of(node: &BoxNode) -> Option<(FourCC, u32)> {
    match node.value.as_ref()? {
        BoxValue::Structured(StructuredData::FileType(f)) => Some((f.major_brand, f.minor_version)),
        BoxValue::Fields(fields) => {
            let major = fields.iter().find_map(|f| match (&f.name[..], &f.value) {
                ("major_brand", FieldValue::FourCC(cc)) => Some(*cc),
                _ => None,
            })?;
            let minor = fields.iter().find_map(|f| match (&f.name[..], &f.value) {
                ("minor_version", FieldValue::Unsigned(v)) => Some(*v as u32),
                _ => None,
            })?;
            Some((major, minor))
        }
        _ => None,
    }
}

/// Walk `input` with the built-in decoders and default options.
pub fn walk_reader<R: Read>(input: R) -> Result<Vec<BoxNode>> {
    let registry = crate::registry::default_registry();
    Walker::new(&registry, None, WalkOptions::default()).walk_file(input)
}
