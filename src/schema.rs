//! Declarative box dictionary.
//!
//! The dictionary is a list of brace-delimited entries:
//!
//! ```text
//! ftyp { "Type": STRUCT, "Description": "File Type Box",
//!        "Parts": { "major_brand": FOURCC, "minor_version": U32,
//!                   "compatible_brands": FOURCC_LIST } }
//! moov { "Type": CONTAINER, "Description": "Movie Box",
//!        "Parts": { udta { "Type": CONTAINER, "Description": "Movie user data" } } }
//! ```
//!
//! A `STRUCT` entry's `Parts` is an ordered field list. A `CONTAINER` entry's
//! `Parts` holds nested entries that apply only inside that container.
//! Tags may be quoted (`"url "`); `©` stands for the byte 0xA9. Text after
//! `#` up to the end of the line is a comment.

use crate::boxes::FourCC;
use crate::error::{Error, Result, malformed};
use crate::fields::{
    Field, FieldValue, Mp4Time, fixed_8_8, fixed_16_16, lang_from_u16, read_c_string,
    read_fourcc, read_fourcc_list, read_version_flags,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Dictionary bundled with the crate.
pub const BUNDLED_DICTIONARY: &str = include_str!("../schema/boxes.dict");

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Container,
    Struct(Vec<FieldSpec>),
    Bytes,
    Chars,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    VersionFlags,
    U8,
    U16,
    U24,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Fixed16_16,
    Fixed8_8,
    FourCC,
    FourCCList,
    Language,
    Mp4Time32,
    Mp4Time64,
    /// 32 or 64 bits depending on the preceding version field.
    Mp4TimeV,
    /// 32 or 64 bits depending on the preceding version field.
    UIntV,
    /// Fixed run of opaque bytes, e.g. `BYTES(10)` for reserved space.
    Skip(u32),
    CString,
    Remainder,
}

impl FieldType {
    fn parse(token: &str) -> Option<Self> {
        if let Some(n) = token
            .strip_prefix("BYTES(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return n.trim().parse().ok().map(FieldType::Skip);
        }
        Some(match token {
            "VERSION_FLAGS" => FieldType::VersionFlags,
            "U8" => FieldType::U8,
            "U16" => FieldType::U16,
            "U24" => FieldType::U24,
            "U32" => FieldType::U32,
            "U64" => FieldType::U64,
            "I8" => FieldType::I8,
            "I16" => FieldType::I16,
            "I32" => FieldType::I32,
            "I64" => FieldType::I64,
            "FIXED16_16" => FieldType::Fixed16_16,
            "FIXED8_8" => FieldType::Fixed8_8,
            "FOURCC" => FieldType::FourCC,
            "FOURCC_LIST" => FieldType::FourCCList,
            "LANGUAGE" => FieldType::Language,
            "MP4TIME32" => FieldType::Mp4Time32,
            "MP4TIME64" => FieldType::Mp4Time64,
            "MP4TIME" => FieldType::Mp4TimeV,
            "UINTV" => FieldType::UIntV,
            "CSTRING" => FieldType::CString,
            "REMAINDER" => FieldType::Remainder,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub tag: FourCC,
    pub kind: SchemaKind,
    pub description: String,
    /// Entries scoped to the inside of this container.
    pub nested: Vec<SchemaEntry>,
}

impl SchemaEntry {
    pub fn nested_lookup(&self, tag: FourCC) -> Option<&SchemaEntry> {
        self.nested.iter().find(|e| e.tag == tag)
    }
}

/// Read-only tag table. Built once and shared by reference for the rest of
/// the process.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
    index: HashMap<FourCC, usize>,
}

impl Schema {
    pub fn parse(text: &str) -> Result<Self> {
        let text = strip_comments(text);
        let entries = parse_entries(&text)?;
        if entries.is_empty() {
            return Err(Error::SchemaLoad("dictionary is empty".into()));
        }
        let mut index = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            if index.insert(e.tag, i).is_some() {
                return Err(Error::SchemaLoad(format!("duplicate entry for '{}'", e.tag)));
            }
        }
        log::debug!("schema: {} top-level entries", entries.len());
        Ok(Self { entries, index })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::SchemaLoad(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_DICTIONARY)
    }

    pub fn lookup(&self, tag: FourCC) -> Option<&SchemaEntry> {
        self.index.get(&tag).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------- Interpreter ----------

/// Apply an ordered field list to a payload. Reads only what the fields
/// describe; the caller checks that the payload was consumed exactly.
pub fn interpret(fields: &[FieldSpec], r: &mut dyn Read) -> Result<Vec<Field>> {
    let mut out = Vec::with_capacity(fields.len());
    let mut version = 0u8;

    for spec in fields {
        let value = match spec.ty {
            FieldType::VersionFlags => {
                let (v, flags) = read_version_flags(r)?;
                version = v;
                FieldValue::VersionFlags { version: v, flags }
            }
            FieldType::U8 => FieldValue::Unsigned(r.read_u8()? as u64),
            FieldType::U16 => FieldValue::Unsigned(r.read_u16::<BigEndian>()? as u64),
            FieldType::U24 => FieldValue::Unsigned(r.read_u24::<BigEndian>()? as u64),
            FieldType::U32 => FieldValue::Unsigned(r.read_u32::<BigEndian>()? as u64),
            FieldType::U64 => FieldValue::Unsigned(r.read_u64::<BigEndian>()?),
            FieldType::I8 => FieldValue::Signed(r.read_i8()? as i64),
            FieldType::I16 => FieldValue::Signed(r.read_i16::<BigEndian>()? as i64),
            FieldType::I32 => FieldValue::Signed(r.read_i32::<BigEndian>()? as i64),
            FieldType::I64 => FieldValue::Signed(r.read_i64::<BigEndian>()?),
            FieldType::Fixed16_16 => FieldValue::Fixed(fixed_16_16(r.read_u32::<BigEndian>()?)),
            FieldType::Fixed8_8 => FieldValue::Fixed(fixed_8_8(r.read_u16::<BigEndian>()?)),
            FieldType::FourCC => FieldValue::FourCC(read_fourcc(r)?),
            FieldType::FourCCList => FieldValue::FourCCList(read_fourcc_list(r)?),
            FieldType::Language => {
                FieldValue::Language(lang_from_u16(r.read_u16::<BigEndian>()? & 0x7FFF))
            }
            FieldType::Mp4Time32 => {
                FieldValue::Time(Mp4Time::from_raw(r.read_u32::<BigEndian>()? as u64))
            }
            FieldType::Mp4Time64 => FieldValue::Time(Mp4Time::from_raw(r.read_u64::<BigEndian>()?)),
            FieldType::Mp4TimeV => FieldValue::Time(Mp4Time::from_raw(read_v(r, version)?)),
            FieldType::UIntV => FieldValue::Unsigned(read_v(r, version)?),
            FieldType::Skip(n) => {
                let mut buf = vec![0u8; n as usize];
                r.read_exact(&mut buf)?;
                FieldValue::Bytes(buf)
            }
            FieldType::CString => FieldValue::Text(read_c_string(r)?),
            FieldType::Remainder => {
                let mut rest = Vec::new();
                r.read_to_end(&mut rest)?;
                FieldValue::Bytes(rest)
            }
        };
        out.push(Field::new(spec.name.clone(), value));
    }
    Ok(out)
}

fn read_v(r: &mut dyn Read, version: u8) -> Result<u64> {
    match version {
        0 => Ok(r.read_u32::<BigEndian>()? as u64),
        1 => Ok(r.read_u64::<BigEndian>()?),
        v => Err(malformed(format!("no version-sized layout for version {}", v))),
    }
}

// ---------- Dictionary parser ----------

fn load_err(msg: impl Into<String>) -> Error {
    Error::SchemaLoad(msg.into())
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_quotes = false;
        let mut end = line.len();
        for (i, c) in line.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                '#' if !in_quotes => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        out.push_str(&line[..end]);
        out.push('\n');
    }
    out
}

/// Index of the `}` matching the `{` at `open`, counting depth and skipping
/// quoted strings.
fn matching_brace(s: &str, open: usize) -> Result<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'{' if !in_quotes => depth += 1,
            b'}' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(load_err(format!("unbalanced '{{' at byte {}", open)))
}

/// Split at top-level commas, ignoring commas inside braces or quotes.
fn split_top_level(s: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut last = 0;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'{' if !in_quotes => depth += 1,
            b'}' if !in_quotes => depth -= 1,
            b',' if !in_quotes && depth == 0 => {
                parts.push(&s[last..i]);
                last = i + 1;
            }
            _ => {}
        }
        if depth < 0 {
            return Err(load_err("unbalanced '}'"));
        }
    }
    if in_quotes {
        return Err(load_err("unterminated string"));
    }
    parts.push(&s[last..]);
    Ok(parts.into_iter().filter(|p| !p.trim().is_empty()).collect())
}

fn unquote(s: &str) -> Option<&str> {
    s.trim().strip_prefix('"').and_then(|v| v.strip_suffix('"'))
}

fn parse_entries(s: &str) -> Result<Vec<SchemaEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    let bytes = s.as_bytes();

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        // tag: quoted (may contain spaces) or a bare token up to whitespace or '{'
        let (tag_text, after_tag) = if bytes[pos] == b'"' {
            let close = s[pos + 1..]
                .find('"')
                .ok_or_else(|| load_err(format!("unterminated tag at byte {}", pos)))?;
            (&s[pos + 1..pos + 1 + close], pos + close + 2)
        } else {
            let end = s[pos..]
                .find(|c: char| c.is_whitespace() || c == '{')
                .map(|n| pos + n)
                .unwrap_or(s.len());
            (&s[pos..end], end)
        };
        let tag = FourCC::from_str(tag_text)
            .ok_or_else(|| load_err(format!("'{}' is not a four-character tag", tag_text)))?;

        let open = s[after_tag..]
            .find(|c: char| !c.is_whitespace())
            .map(|n| after_tag + n)
            .filter(|&i| bytes[i] == b'{')
            .ok_or_else(|| load_err(format!("expected '{{' after '{}'", tag)))?;
        let close = matching_brace(s, open)?;
        entries.push(parse_entry(tag, &s[open + 1..close])?);
        pos = close + 1;
    }
    Ok(entries)
}

fn parse_entry(tag: FourCC, body: &str) -> Result<SchemaEntry> {
    let mut kind_token = None;
    let mut description = String::new();
    let mut parts = None;

    for item in split_top_level(body)? {
        let (key, value) = item
            .split_once(':')
            .ok_or_else(|| load_err(format!("'{}': expected \"Key\": value, got '{}'", tag, item.trim())))?;
        let key = unquote(key).ok_or_else(|| load_err(format!("'{}': unquoted key '{}'", tag, key.trim())))?;
        let value = value.trim();
        match key {
            "Type" => kind_token = Some(value),
            "Description" => {
                description = unquote(value)
                    .ok_or_else(|| load_err(format!("'{}': Description must be a string", tag)))?
                    .to_string()
            }
            "Parts" => {
                let inner = value
                    .strip_prefix('{')
                    .and_then(|v| v.strip_suffix('}'))
                    .ok_or_else(|| load_err(format!("'{}': Parts must be a braced block", tag)))?;
                parts = Some(inner);
            }
            other => return Err(load_err(format!("'{}': unknown key '{}'", tag, other))),
        }
    }

    let kind_token = kind_token.ok_or_else(|| load_err(format!("'{}': missing Type", tag)))?;
    let mut nested = Vec::new();
    let kind = match kind_token {
        "CONTAINER" => {
            if let Some(p) = parts {
                nested = parse_entries(p)?;
            }
            SchemaKind::Container
        }
        "STRUCT" => SchemaKind::Struct(parse_fields(tag, parts.unwrap_or(""))?),
        "BYTES" | "CHARS" if parts.is_some() => {
            return Err(load_err(format!("'{}': {} takes no Parts", tag, kind_token)));
        }
        "BYTES" => SchemaKind::Bytes,
        "CHARS" => SchemaKind::Chars,
        other => return Err(load_err(format!("'{}': unknown Type '{}'", tag, other))),
    };

    Ok(SchemaEntry { tag, kind, description, nested })
}

fn parse_fields(tag: FourCC, parts: &str) -> Result<Vec<FieldSpec>> {
    let mut fields = Vec::new();
    for item in split_top_level(parts)? {
        let (name, ty) = item
            .split_once(':')
            .ok_or_else(|| load_err(format!("'{}': bad field '{}'", tag, item.trim())))?;
        let name = unquote(name)
            .ok_or_else(|| load_err(format!("'{}': unquoted field name '{}'", tag, name.trim())))?;
        let ty = FieldType::parse(ty.trim())
            .ok_or_else(|| load_err(format!("'{}': unknown field type '{}'", tag, ty.trim())))?;
        fields.push(FieldSpec { name: name.to_string(), ty });
    }
    Ok(fields)
}
