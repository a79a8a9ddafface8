//! Streaming XML layer for the label and index schemas.
//!
//! The parser is a thin pull layer over `quick-xml`: element dispatch by
//! name, required-tag bitmaps per element, subtree skipping for unknown
//! tags, and verbatim capture (`save_tag`) of the unknown tags that must
//! round-trip. Leaf value parsers mirror the schema's little grammar
//! (uuid, booleans, timestamps, partition letters, percent-encoded
//! names).

pub mod reader;
pub mod writer;

use crate::error::{LtfsError, Result};
use crate::pathname;
use crate::tape::{ReadOutcome, SpaceKind, TapeDrive};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

/// One opened element: its name, attributes, and the byte offset of its
/// `<` in the source (for verbatim capture).
#[derive(Debug, Clone)]
pub struct StartTag {
    pub name: String,
    attrs: Vec<(String, String)>,
    start_pos: usize,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Pull parser over an in-memory document.
pub struct XmlParser<'a> {
    buf: &'a [u8],
    reader: Reader<&'a [u8]>,
}

impl<'a> XmlParser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(buf);
        reader.expand_empty_elements(true);
        Self { buf, reader }
    }

    fn read_event(&mut self) -> Result<(usize, Event<'a>)> {
        let pos = self.reader.buffer_position();
        let ev = self
            .reader
            .read_event()
            .map_err(|e| LtfsError::index_invalid(format!("XML parse error: {e}")))?;
        Ok((pos, ev))
    }

    fn start_tag(&self, pos: usize, e: &quick_xml::events::BytesStart) -> Result<StartTag> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr =
                attr.map_err(|e| LtfsError::index_invalid(format!("bad XML attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| LtfsError::index_invalid(format!("bad XML attribute: {e}")))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(StartTag {
            name,
            attrs,
            start_pos: pos,
        })
    }

    /// Open the document: verify the declared encoding is UTF-8, find
    /// the top element, and confirm its name. Returns the top tag (its
    /// `version` attribute is the schema version).
    pub fn open_document(&mut self, top_name: &str) -> Result<StartTag> {
        let mut saw_decl = false;
        loop {
            let (pos, ev) = self.read_event()?;
            match ev {
                Event::Decl(decl) => {
                    saw_decl = true;
                    let enc = decl
                        .encoding()
                        .transpose()
                        .map_err(|e| LtfsError::index_invalid(format!("bad XML declaration: {e}")))?;
                    match enc {
                        Some(enc) if enc.as_ref() == b"UTF-8" => {}
                        other => {
                            return Err(LtfsError::index_invalid(format!(
                                "document encoding is not UTF-8: {:?}",
                                other.map(|e| String::from_utf8_lossy(&e).into_owned())
                            )))
                        }
                    }
                }
                Event::Start(e) => {
                    if !saw_decl {
                        return Err(LtfsError::index_invalid(
                            "missing XML declaration with UTF-8 encoding",
                        ));
                    }
                    let tag = self.start_tag(pos, &e)?;
                    if tag.name != top_name {
                        return Err(LtfsError::index_invalid(format!(
                            "unexpected top element {} (wanted {top_name})",
                            tag.name
                        )));
                    }
                    return Ok(tag);
                }
                Event::Text(_) | Event::Comment(_) | Event::DocType(_) | Event::PI(_) => {}
                Event::Eof => {
                    return Err(LtfsError::index_invalid("unexpected end of document"))
                }
                other => {
                    return Err(LtfsError::index_invalid(format!(
                        "unexpected XML content before top element: {other:?}"
                    )))
                }
            }
        }
    }

    /// Next child element inside `container`, or `None` at its end tag.
    pub fn next_tag_in(&mut self, container: &str) -> Result<Option<StartTag>> {
        loop {
            let (pos, ev) = self.read_event()?;
            match ev {
                Event::Start(e) => return Ok(Some(self.start_tag(pos, &e)?)),
                Event::End(e) => {
                    if e.name().as_ref() == container.as_bytes() {
                        return Ok(None);
                    }
                    return Err(LtfsError::index_invalid(format!(
                        "unexpected end tag {} inside {container}",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                Event::Text(_) | Event::CData(_) | Event::Comment(_) | Event::PI(_) => {}
                Event::Eof => return Err(LtfsError::index_invalid("unexpected end of document")),
                other => {
                    return Err(LtfsError::index_invalid(format!(
                        "unexpected XML content inside {container}: {other:?}"
                    )))
                }
            }
        }
    }

    /// Collect the text content of the current element up to its end tag.
    pub fn scan_text(&mut self, tag: &StartTag) -> Result<String> {
        let mut out = String::new();
        loop {
            let (_, ev) = self.read_event()?;
            match ev {
                Event::Text(t) => out.push_str(
                    &t.unescape()
                        .map_err(|e| LtfsError::index_invalid(format!("bad XML text: {e}")))?,
                ),
                Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c.into_inner())),
                Event::End(e) if e.name().as_ref() == tag.name.as_bytes() => return Ok(out),
                Event::Comment(_) | Event::PI(_) => {}
                Event::Eof => return Err(LtfsError::index_invalid("unexpected end of document")),
                other => {
                    return Err(LtfsError::index_invalid(format!(
                        "unexpected XML content inside {}: {other:?}",
                        tag.name
                    )))
                }
            }
        }
    }

    /// Consume the rest of the current element, contents and all.
    pub fn skip_tag(&mut self, tag: &StartTag) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let (_, ev) = self.read_event()?;
            match ev {
                Event::Start(_) => depth += 1,
                Event::End(e) => {
                    if depth == 0 {
                        if e.name().as_ref() == tag.name.as_bytes() {
                            return Ok(());
                        }
                        return Err(LtfsError::index_invalid(format!(
                            "mismatched end tag for {}",
                            tag.name
                        )));
                    }
                    depth -= 1;
                }
                Event::Eof => return Err(LtfsError::index_invalid("unexpected end of document")),
                _ => {}
            }
        }
    }

    /// Skip the current element and return its verbatim outer XML for
    /// round-tripping. Whitespace inside the fragment is untouched.
    pub fn save_tag(&mut self, tag: &StartTag) -> Result<Vec<u8>> {
        self.skip_tag(tag)?;
        let end = self.reader.buffer_position();
        debug!(tag = %tag.name, "preserving unknown tag");
        Ok(self.buf[tag.start_pos..end].to_vec())
    }
}

/// Required/optional tag bookkeeping for one element.
///
/// Each required child is assigned a bit; duplicates and missing tags
/// are errors at the close of the element.
pub struct TagTracker {
    element: &'static str,
    required_mask: u32,
    seen_required: u32,
    seen_optional: u32,
}

impl TagTracker {
    pub fn new(element: &'static str, required_count: u32) -> Self {
        Self {
            element,
            required_mask: (1u32 << required_count) - 1,
            seen_required: 0,
            seen_optional: 0,
        }
    }

    pub fn required(&mut self, bit: u32, tag: &str) -> Result<()> {
        let mask = 1u32 << bit;
        if self.seen_required & mask != 0 {
            return Err(LtfsError::index_invalid(format!(
                "duplicate {tag} in {}",
                self.element
            )));
        }
        self.seen_required |= mask;
        Ok(())
    }

    pub fn optional(&mut self, bit: u32, tag: &str) -> Result<()> {
        let mask = 1u32 << bit;
        if self.seen_optional & mask != 0 {
            return Err(LtfsError::index_invalid(format!(
                "duplicate {tag} in {}",
                self.element
            )));
        }
        self.seen_optional |= mask;
        Ok(())
    }

    /// Mark a version-gated required tag satisfied by reconstruction.
    pub fn supply(&mut self, bit: u32) {
        self.seen_required |= 1u32 << bit;
    }

    pub fn finish(&self) -> Result<()> {
        if self.seen_required != self.required_mask {
            return Err(LtfsError::index_invalid(format!(
                "missing required tag(s) in {}",
                self.element
            )));
        }
        Ok(())
    }
}

/// Parse a UUID: 36 characters, dashes at 8/13/18/23, hex elsewhere.
/// Uppercase hex is folded to lowercase.
pub fn parse_uuid(text: &str) -> Result<String> {
    if text.len() != 36 {
        return Err(LtfsError::index_invalid(format!("bad uuid: {text}")));
    }
    let mut out = String::with_capacity(36);
    for (i, c) in text.chars().enumerate() {
        if i == 8 || i == 13 || i == 18 || i == 23 {
            if c != '-' {
                return Err(LtfsError::index_invalid(format!("bad uuid: {text}")));
            }
            out.push('-');
        } else if c.is_ascii_hexdigit() {
            out.push(c.to_ascii_lowercase());
        } else {
            return Err(LtfsError::index_invalid(format!("bad uuid: {text}")));
        }
    }
    Ok(out)
}

/// Per the W3C boolean datatype: `true`/`1` and `false`/`0`.
pub fn parse_bool(text: &str) -> Result<bool> {
    match text {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(LtfsError::index_invalid(format!("bad boolean: {other}"))),
    }
}

pub fn parse_ull(text: &str) -> Result<u64> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(LtfsError::index_invalid(format!("bad number: {text}")));
    }
    text.parse()
        .map_err(|_| LtfsError::index_invalid(format!("bad number: {text}")))
}

pub fn parse_ll(text: &str) -> Result<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(LtfsError::index_invalid(format!("bad number: {text}")));
    }
    text.parse()
        .map_err(|_| LtfsError::index_invalid(format!("bad number: {text}")))
}

pub fn parse_xll(text: &str) -> Result<u64> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LtfsError::index_invalid(format!("bad hex number: {text}")));
    }
    u64::from_str_radix(text, 16)
        .map_err(|_| LtfsError::index_invalid(format!("bad hex number: {text}")))
}

/// An unsigned integer with an optional `:k`/`:m`/`:g` multiplier.
pub fn parse_ull_suffixed(text: &str) -> Result<u64> {
    let (digits, mult) = match text.split_once(':') {
        None => (text, 1u64),
        Some((d, suffix)) => {
            let m = match suffix {
                "k" | "K" => 1024,
                "m" | "M" => 1024 * 1024,
                "g" | "G" => 1024 * 1024 * 1024,
                _ => {
                    return Err(LtfsError::index_invalid(format!(
                        "bad size suffix: {text}"
                    )))
                }
            };
            (d, m)
        }
    };
    parse_ull(digits)?
        .checked_mul(mult)
        .ok_or_else(|| LtfsError::index_invalid(format!("size overflows: {text}")))
}

/// A single lowercase letter naming a partition.
pub fn parse_partition(text: &str) -> Result<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() => Ok(c),
        _ => Err(LtfsError::index_invalid(format!("bad partition id: {text}"))),
    }
}

/// Decode a nametype element's text: percent-decode if the element said
/// so, then normalize to NFC and validate as a file name or a target.
pub fn parse_nametype(text: &str, percent_encoded: bool, target: bool) -> Result<String> {
    let decoded: String = if percent_encoded {
        let bytes: Vec<u8> = percent_encoding::percent_decode(text.as_bytes()).collect();
        String::from_utf8(bytes)
            .map_err(|_| LtfsError::invalid_path(format!("not UTF-8 after decoding: {text}")))?
    } else {
        text.to_string()
    };

    let normalized = pathname::normalize(&decoded);
    if target {
        pathname::validate_target(&normalized)?;
    } else {
        pathname::validate_file(&normalized)?;
    }
    Ok(normalized)
}

/// Read the index (or label) record stream from the tape into memory.
///
/// Records are read through a one-block cache sized to the volume block
/// size; a short record ends the document, a zero-length read is the
/// trailing filemark. When the filemark is present the head is left
/// before it so the next write can overwrite it; when it is missing the
/// parse still succeeds and the caller is told.
///
/// Returns the document bytes and whether the trailing filemark was seen.
pub fn read_tape_blob(drive: &mut dyn TapeDrive, blocksize: usize) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut cache = vec![0u8; blocksize];
    loop {
        match drive.read(&mut cache, true)? {
            ReadOutcome::Data(n) => out.extend_from_slice(&cache[..n]),
            ReadOutcome::Filemark => {
                drive.space(SpaceKind::Filemarks(-1))?;
                return Ok((out, true));
            }
            ReadOutcome::EndOfData => return Ok((out, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_parses_and_lowercases() {
        let u = parse_uuid("F81D4FAE-7DEC-11D0-A765-00A0C91E6BF6").unwrap();
        assert_eq!(u, "f81d4fae-7dec-11d0-a765-00a0c91e6bf6");
        assert!(parse_uuid("f81d4fae-7dec-11d0-a765-00a0c91e6bf").is_err());
        assert!(parse_uuid("f81d4fae-7dec-11d0-a765_00a0c91e6bf6").is_err());
        assert!(parse_uuid("g81d4fae-7dec-11d0-a765-00a0c91e6bf6").is_err());
    }

    #[test]
    fn boolean_accepts_both_spellings() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_ull("12345").unwrap(), 12345);
        assert!(parse_ull("12a").is_err());
        assert!(parse_ull("-1").is_err());
        assert_eq!(parse_ll("-42").unwrap(), -42);
        assert_eq!(parse_xll("ff").unwrap(), 255);
        assert_eq!(parse_ull_suffixed("2:k").unwrap(), 2048);
        assert_eq!(parse_ull_suffixed("3:M").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_ull_suffixed("7").unwrap(), 7);
        assert!(parse_ull_suffixed("7:x").is_err());
    }

    #[test]
    fn partition_letters() {
        assert_eq!(parse_partition("a").unwrap(), 'a');
        assert!(parse_partition("A").is_err());
        assert!(parse_partition("ab").is_err());
        assert!(parse_partition("").is_err());
    }

    #[test]
    fn nametype_decodes_percent_encoding() {
        assert_eq!(parse_nametype("plain.txt", false, false).unwrap(), "plain.txt");
        // %2F decodes to '/', which a file name may not contain.
        assert!(matches!(
            parse_nametype("a%2Fb", true, false),
            Err(LtfsError::InvalidPath(_))
        ));
        // ...but a literal "a%2Fb" is fine when not marked encoded.
        assert_eq!(parse_nametype("a%2Fb", false, false).unwrap(), "a%2Fb");
        // Targets allow the slash.
        assert_eq!(parse_nametype("a%2Fb", true, true).unwrap(), "a/b");
    }

    #[test]
    fn parser_walks_elements_and_tracks_required_tags() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<top version="2.4.0">
  <one>first</one>
  <two attr="v">second</two>
</top>"#;
        let mut p = XmlParser::new(doc);
        let top = p.open_document("top").unwrap();
        assert_eq!(top.attr("version"), Some("2.4.0"));

        let mut tracker = TagTracker::new("top", 2);
        while let Some(tag) = p.next_tag_in("top").unwrap() {
            match tag.name.as_str() {
                "one" => {
                    tracker.required(0, "one").unwrap();
                    assert_eq!(p.scan_text(&tag).unwrap(), "first");
                }
                "two" => {
                    tracker.required(1, "two").unwrap();
                    assert_eq!(tag.attr("attr"), Some("v"));
                    assert_eq!(p.scan_text(&tag).unwrap(), "second");
                }
                _ => p.skip_tag(&tag).unwrap(),
            }
        }
        tracker.finish().unwrap();
    }

    #[test]
    fn missing_required_tag_is_detected() {
        let mut tracker = TagTracker::new("x", 2);
        tracker.required(0, "a").unwrap();
        assert!(tracker.finish().is_err());
        assert!(tracker.required(0, "a").is_err());
    }

    #[test]
    fn save_tag_captures_verbatim_bytes() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<top version="1.0"><known>1</known><custom a="b">  <inner>x</inner>
</custom></top>"#;
        let mut p = XmlParser::new(doc);
        p.open_document("top").unwrap();
        let mut saved = None;
        while let Some(tag) = p.next_tag_in("top").unwrap() {
            match tag.name.as_str() {
                "known" => {
                    p.scan_text(&tag).unwrap();
                }
                _ => saved = Some(p.save_tag(&tag).unwrap()),
            }
        }
        let saved = saved.unwrap();
        assert_eq!(
            String::from_utf8(saved).unwrap(),
            "<custom a=\"b\">  <inner>x</inner>\n</custom>"
        );
    }

    #[test]
    fn rejects_non_utf8_encoding_declarations() {
        let doc = br#"<?xml version="1.0" encoding="ISO-8859-1"?><top></top>"#;
        let mut p = XmlParser::new(doc);
        assert!(p.open_document("top").is_err());
    }

    #[test]
    fn empty_elements_read_as_empty_containers() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?><top><contents/></top>"#;
        let mut p = XmlParser::new(doc);
        p.open_document("top").unwrap();
        let contents = p.next_tag_in("top").unwrap().unwrap();
        assert_eq!(contents.name, "contents");
        assert!(p.next_tag_in("contents").unwrap().is_none());
        assert!(p.next_tag_in("top").unwrap().is_none());
    }
}
