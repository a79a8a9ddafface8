//! Label and index serialization.
//!
//! The writer mirrors the reader: any index this implementation parses
//! serializes back to a document that parses into a structurally equal
//! tree, preserved unknown fragments included. The coordinator stamps
//! generation and pointers on the [`Index`] before serialization, once
//! the append position is known, so the document is emitted in one pass.

use crate::dentry::{Dentry, DentryId};
use crate::error::{LtfsError, Result};
use crate::index::{Index, TapeLocation, VolumeLockState};
use crate::label::LtfsLabel;
use crate::pathname::{self, XattrEncoding};
use base64::Engine;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

type Xml = Writer<Vec<u8>>;

fn wrap(e: quick_xml::Error) -> LtfsError {
    LtfsError::internal(format!("XML write error: {e}"))
}

fn open(w: &mut Xml, name: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name))).map_err(wrap)
}

fn close(w: &mut Xml, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name))).map_err(wrap)
}

fn text_elem(w: &mut Xml, name: &str, text: &str) -> Result<()> {
    open(w, name)?;
    w.write_event(Event::Text(BytesText::new(text))).map_err(wrap)?;
    close(w, name)
}

/// Write a nametype element, percent-encoding when the text would break
/// XML well-formedness.
fn name_elem(w: &mut Xml, name: &str, value: &str) -> Result<()> {
    let (text, encoded) = encode_nametype(value);
    let mut start = BytesStart::new(name);
    if encoded {
        start.push_attribute(("percentencoded", "true"));
    }
    w.write_event(Event::Start(start)).map_err(wrap)?;
    w.write_event(Event::Text(BytesText::new(&text))).map_err(wrap)?;
    close(w, name)
}

/// Percent-encode a name if it contains characters unsafe for XML
/// character data. When any encoding happens, `%` itself is encoded too
/// so decoding stays unambiguous.
pub fn encode_nametype(value: &str) -> (String, bool) {
    let needs = value
        .chars()
        .any(|c| !pathname::char_valid_in_xml(c) || c == '\u{7f}');
    if !needs {
        return (value.to_string(), false);
    }
    let mut out = String::with_capacity(value.len() * 3);
    for &b in value.as_bytes() {
        let unsafe_byte = b < 0x20 || b == 0x7f || b == b'%';
        if unsafe_byte {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    (out, true)
}

fn raw_fragment(w: &mut Xml, fragment: &[u8]) -> Result<()> {
    let text = std::str::from_utf8(fragment)
        .map_err(|_| LtfsError::internal("preserved tag is not UTF-8"))?;
    w.write_event(Event::Text(BytesText::from_escaped(text)))
        .map_err(wrap)
}

fn location_elem(w: &mut Xml, name: &str, loc: &TapeLocation) -> Result<()> {
    open(w, name)?;
    text_elem(w, "partition", &loc.partition.to_string())?;
    text_elem(w, "startblock", &loc.block.to_string())?;
    close(w, name)
}

fn bool_text(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Serialize an LTFS label for one partition.
pub fn write_label(label: &LtfsLabel) -> Result<Vec<u8>> {
    label.validate()?;
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(wrap)?;

    let mut top = BytesStart::new("ltfslabel");
    top.push_attribute(("version", label.version.to_string().as_str()));
    w.write_event(Event::Start(top)).map_err(wrap)?;

    text_elem(&mut w, "creator", &label.creator)?;
    text_elem(&mut w, "formattime", &label.format_time.format())?;
    text_elem(&mut w, "volumeuuid", &label.volume_uuid)?;
    open(&mut w, "location")?;
    text_elem(&mut w, "partition", &label.this_partition.to_string())?;
    close(&mut w, "location")?;
    open(&mut w, "partitions")?;
    text_elem(&mut w, "index", &label.partitions.index.to_string())?;
    text_elem(&mut w, "data", &label.partitions.data.to_string())?;
    close(&mut w, "partitions")?;
    text_elem(&mut w, "blocksize", &label.blocksize.to_string())?;
    text_elem(&mut w, "compression", bool_text(label.compression))?;

    close(&mut w, "ltfslabel")?;
    let mut out = w.into_inner();
    out.push(b'\n');
    Ok(out)
}

/// Serialize an index document.
pub fn write_index(idx: &Index) -> Result<Vec<u8>> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(wrap)?;

    let mut top = BytesStart::new("ltfsindex");
    top.push_attribute(("version", idx.version.to_string().as_str()));
    w.write_event(Event::Start(top)).map_err(wrap)?;

    text_elem(&mut w, "creator", &idx.creator)?;
    text_elem(&mut w, "volumeuuid", &idx.volume_uuid)?;
    text_elem(&mut w, "generationnumber", &idx.generation.to_string())?;
    text_elem(&mut w, "updatetime", &idx.update_time.format())?;
    location_elem(&mut w, "location", &idx.self_location)?;
    if let Some(prev) = &idx.previous_location {
        location_elem(&mut w, "previousgenerationlocation", prev)?;
    }
    text_elem(
        &mut w,
        "allowpolicyupdate",
        bool_text(idx.criteria_allow_update),
    )?;

    // The policy written back is the on-tape original, not a mount-time
    // override.
    if idx.original_criteria.have_criteria {
        open(&mut w, "dataplacementpolicy")?;
        open(&mut w, "indexpartitioncriteria")?;
        text_elem(
            &mut w,
            "size",
            &idx.original_criteria.max_filesize.to_string(),
        )?;
        for pattern in &idx.original_criteria.glob_patterns {
            name_elem(&mut w, "name", pattern)?;
        }
        close(&mut w, "indexpartitioncriteria")?;
        close(&mut w, "dataplacementpolicy")?;
    }

    if let Some(comment) = &idx.comment {
        text_elem(&mut w, "comment", comment)?;
    }
    if idx.volume_lock_state != VolumeLockState::Unlocked {
        text_elem(&mut w, "volumelockstate", idx.volume_lock_state.as_str())?;
    }
    text_elem(
        &mut w,
        "highestfileuid",
        &(idx.tree.next_uid() - 1).to_string(),
    )?;

    for fragment in &idx.preserved_tags {
        raw_fragment(&mut w, fragment)?;
    }

    write_dentry(&mut w, idx, idx.tree.root())?;

    close(&mut w, "ltfsindex")?;
    let mut out = w.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn write_dentry(w: &mut Xml, idx: &Index, id: DentryId) -> Result<()> {
    let d = idx
        .tree
        .get(id)
        .ok_or_else(|| LtfsError::internal("dangling dentry id"))?;
    if d.is_directory {
        write_directory(w, idx, d)
    } else {
        write_file(w, d)
    }
}

fn write_directory(w: &mut Xml, idx: &Index, d: &Dentry) -> Result<()> {
    open(w, "directory")?;
    name_elem(w, "name", &d.name)?;
    text_elem(w, "readonly", bool_text(d.readonly))?;
    text_elem(w, "creationtime", &d.creation_time.format())?;
    text_elem(w, "changetime", &d.change_time.format())?;
    text_elem(w, "modifytime", &d.modify_time.format())?;
    text_elem(w, "accesstime", &d.access_time.format())?;
    text_elem(w, "backuptime", &d.backup_time.format())?;
    text_elem(w, "fileuid", &d.uid.to_string())?;
    write_xattrs(w, d)?;
    for fragment in &d.preserved_tags {
        raw_fragment(w, fragment)?;
    }
    open(w, "contents")?;
    for child in &d.children {
        write_dentry(w, idx, *child)?;
    }
    close(w, "contents")?;
    close(w, "directory")
}

fn write_file(w: &mut Xml, d: &Dentry) -> Result<()> {
    open(w, "file")?;
    name_elem(w, "name", &d.name)?;
    text_elem(w, "length", &d.size.to_string())?;
    text_elem(w, "readonly", bool_text(d.readonly))?;
    text_elem(w, "creationtime", &d.creation_time.format())?;
    text_elem(w, "changetime", &d.change_time.format())?;
    text_elem(w, "modifytime", &d.modify_time.format())?;
    text_elem(w, "accesstime", &d.access_time.format())?;
    text_elem(w, "backuptime", &d.backup_time.format())?;
    text_elem(w, "fileuid", &d.uid.to_string())?;
    if d.open_for_write {
        text_elem(w, "openforwrite", "true")?;
    }
    if let Some(target) = &d.symlink_target {
        name_elem(w, "symlink", target)?;
    }
    write_xattrs(w, d)?;
    if !d.extents.is_empty() {
        open(w, "extentinfo")?;
        for e in &d.extents {
            open(w, "extent")?;
            text_elem(w, "fileoffset", &e.file_offset.to_string())?;
            text_elem(w, "partition", &e.partition.to_string())?;
            text_elem(w, "startblock", &e.start_block.to_string())?;
            text_elem(w, "byteoffset", &e.byte_offset.to_string())?;
            text_elem(w, "bytecount", &e.byte_count.to_string())?;
            close(w, "extent")?;
        }
        close(w, "extentinfo")?;
    }
    for fragment in &d.preserved_tags {
        raw_fragment(w, fragment)?;
    }
    close(w, "file")
}

fn write_xattrs(w: &mut Xml, d: &Dentry) -> Result<()> {
    if d.xattrs.is_empty() {
        return Ok(());
    }
    open(w, "extendedattributes")?;
    for x in &d.xattrs {
        open(w, "xattr")?;
        name_elem(w, "key", &x.key)?;
        match pathname::validate_xattr_value(&x.value) {
            XattrEncoding::Text => {
                // Safe by the encoding check: the bytes are UTF-8.
                let text = std::str::from_utf8(&x.value).unwrap_or_default();
                text_elem(w, "value", text)?;
            }
            XattrEncoding::Base64 => {
                let mut start = BytesStart::new("value");
                start.push_attribute(("type", "base64"));
                w.write_event(Event::Start(start)).map_err(wrap)?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&x.value);
                w.write_event(Event::Text(BytesText::new(&encoded)))
                    .map_err(wrap)?;
                close(w, "value")?;
            }
        }
        close(w, "xattr")?;
    }
    close(w, "extendedattributes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::ExtentInfo;
    use crate::index_criteria::IndexCriteria;
    use crate::label::{LtfsLabel, VERSION_MAX};
    use crate::xml::reader;

    const UUID: &str = "f81d4fae-7dec-11d0-a765-00a0c91e6bf6";

    fn sample_index() -> Index {
        let mut idx = Index::new(UUID.to_string(), "ltfs-format test".to_string(), 524288);
        idx.generation = 3;
        idx.self_location = TapeLocation {
            partition: 'a',
            block: 9,
        };
        idx.previous_location = Some(TapeLocation {
            partition: 'b',
            block: 7,
        });
        idx.set_criteria(IndexCriteria::parse("size=1M/name=*.xml").unwrap());

        let root = idx.tree.root();
        let dir = idx
            .tree
            .allocate_dentry(root, "data", true, false, true)
            .unwrap();
        let file = idx
            .tree
            .allocate_dentry(dir, "a.bin", false, false, true)
            .unwrap();
        idx.tree
            .add_extent(
                file,
                ExtentInfo {
                    partition: 'b',
                    start_block: 5,
                    byte_offset: 0,
                    byte_count: 700000,
                    file_offset: 0,
                },
            )
            .unwrap();
        idx.tree.get_mut(file).unwrap().size = 700000;
        idx.tree
            .set_xattr(file, "user.origin", b"host:/src/a.bin")
            .unwrap();
        idx.tree.set_xattr(file, "user.blob", &[0u8, 1, 255]).unwrap();

        let link = idx
            .tree
            .allocate_dentry(root, "latest", false, true, true)
            .unwrap();
        idx.tree.get_mut(link).unwrap().symlink_target = Some("data/a.bin".to_string());
        idx
    }

    #[test]
    fn label_round_trips() {
        let label = LtfsLabel::new(UUID.to_string(), 524288, true);
        let xml = write_label(&label).unwrap();
        let parsed = reader::parse_label(&xml).unwrap();
        assert_eq!(parsed.version, VERSION_MAX);
        assert_eq!(parsed.volume_uuid, UUID);
        assert_eq!(parsed.blocksize, 524288);
        assert!(parsed.compression);
        assert_eq!(parsed.this_partition, 'a');
        assert_eq!(parsed.format_time, label.format_time);

        let data_copy = label.for_partition('b');
        let parsed_b = reader::parse_label(&write_label(&data_copy).unwrap()).unwrap();
        parsed.check_consistent(&parsed_b).unwrap();
    }

    #[test]
    fn index_round_trips_structurally() {
        let idx = sample_index();
        let xml = write_index(&idx).unwrap();
        let parsed = reader::parse_index(&xml, 524288).unwrap();

        assert_eq!(parsed.generation, 3);
        assert_eq!(parsed.volume_uuid, UUID);
        assert_eq!(parsed.self_location, idx.self_location);
        assert_eq!(parsed.previous_location, idx.previous_location);
        assert_eq!(parsed.original_criteria.max_filesize, 1024 * 1024);
        assert_eq!(parsed.original_criteria.glob_patterns, vec!["*.xml"]);
        assert_eq!(parsed.tree.len(), idx.tree.len());

        let file = parsed.tree.lookup_path("/data/a.bin").unwrap();
        let d = parsed.tree.get(file).unwrap();
        assert_eq!(d.size, 700000);
        assert_eq!(d.extents.len(), 1);
        assert_eq!(d.extents[0].byte_count, 700000);
        assert_eq!(
            parsed.tree.get_xattr(file, "user.origin").unwrap(),
            b"host:/src/a.bin"
        );
        assert_eq!(parsed.tree.get_xattr(file, "user.blob").unwrap(), &[0u8, 1, 255]);

        let link = parsed.tree.lookup_path("/latest").unwrap();
        let ld = parsed.tree.get(link).unwrap();
        assert!(ld.is_symlink);
        assert_eq!(ld.symlink_target.as_deref(), Some("data/a.bin"));
    }

    #[test]
    fn timestamps_round_trip_with_parsed_precision() {
        let mut idx = sample_index();
        let root = idx.tree.root();
        let (t, _) = crate::utils::LtfsTime::parse("2017-11-07T03:48:12.5Z").unwrap();
        idx.tree.get_mut(root).unwrap().modify_time = t;

        let xml = write_index(&idx).unwrap();
        let text = String::from_utf8(xml.clone()).unwrap();
        assert!(text.contains("2017-11-07T03:48:12.5Z"));
        let parsed = reader::parse_index(&xml, 524288).unwrap();
        assert_eq!(parsed.tree.get(parsed.tree.root()).unwrap().modify_time, t);
    }

    #[test]
    fn unknown_tags_round_trip_verbatim() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="2.4.0">
  <creator>test</creator>
  <volumeuuid>{UUID}</volumeuuid>
  <generationnumber>1</generationnumber>
  <updatetime>2025-08-14T04:33:40.000000000Z</updatetime>
  <location><partition>a</partition><startblock>5</startblock></location>
  <allowpolicyupdate>true</allowpolicyupdate>
  <directory>
    <name></name>
    <readonly>false</readonly>
    <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
    <changetime>2025-08-14T04:33:40.000000000Z</changetime>
    <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
    <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
    <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
    <fileuid>1</fileuid>
    <contents>
      <file>
        <name>f.bin</name>
        <length>0</length>
        <readonly>false</readonly>
        <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
        <changetime>2025-08-14T04:33:40.000000000Z</changetime>
        <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
        <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
        <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
        <fileuid>2</fileuid>
        <vendorextension scope="x"> <raw>bytes</raw> </vendorextension>
      </file>
    </contents>
  </directory>
</ltfsindex>"#
        );
        let parsed = reader::parse_index(xml.as_bytes(), 524288).unwrap();
        let file = parsed.tree.lookup_path("/f.bin").unwrap();
        let preserved = &parsed.tree.get(file).unwrap().preserved_tags;
        assert_eq!(preserved.len(), 1);
        assert_eq!(
            String::from_utf8(preserved[0].clone()).unwrap(),
            "<vendorextension scope=\"x\"> <raw>bytes</raw> </vendorextension>"
        );

        // Reserialize and confirm the fragment comes back byte for byte,
        // then survives another parse.
        let rewritten = write_index(&parsed).unwrap();
        let text = String::from_utf8(rewritten.clone()).unwrap();
        assert!(text.contains("<vendorextension scope=\"x\"> <raw>bytes</raw> </vendorextension>"));
        let reparsed = reader::parse_index(&rewritten, 524288).unwrap();
        let file2 = reparsed.tree.lookup_path("/f.bin").unwrap();
        assert_eq!(reparsed.tree.get(file2).unwrap().preserved_tags, *preserved);
    }

    #[test]
    fn percent_encoding_is_applied_when_needed() {
        let (text, encoded) = encode_nametype("plain-name.txt");
        assert!(!encoded);
        assert_eq!(text, "plain-name.txt");

        let (text, encoded) = encode_nametype("bad\u{1}name");
        assert!(encoded);
        assert_eq!(text, "bad%01name");

        // '%' is encoded whenever anything else had to be.
        let (text, encoded) = encode_nametype("50%\u{1}");
        assert!(encoded);
        assert_eq!(text, "50%25%01");

        // A literal '%' alone needs no encoding at all.
        let (text, encoded) = encode_nametype("50%full");
        assert!(!encoded);
        assert_eq!(text, "50%full");
    }

    #[test]
    fn symlink_and_extent_conflict_is_recorded_not_fatal() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="2.4.0">
  <creator>test</creator>
  <volumeuuid>{UUID}</volumeuuid>
  <generationnumber>1</generationnumber>
  <updatetime>2025-08-14T04:33:40.000000000Z</updatetime>
  <location><partition>a</partition><startblock>5</startblock></location>
  <allowpolicyupdate>true</allowpolicyupdate>
  <directory>
    <name></name>
    <readonly>false</readonly>
    <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
    <changetime>2025-08-14T04:33:40.000000000Z</changetime>
    <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
    <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
    <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
    <fileuid>1</fileuid>
    <contents>
      <file>
        <name>conflicted</name>
        <length>10</length>
        <readonly>false</readonly>
        <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
        <changetime>2025-08-14T04:33:40.000000000Z</changetime>
        <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
        <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
        <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
        <fileuid>2</fileuid>
        <symlink>elsewhere</symlink>
        <extentinfo>
          <extent>
            <fileoffset>0</fileoffset>
            <partition>b</partition>
            <startblock>5</startblock>
            <byteoffset>0</byteoffset>
            <bytecount>10</bytecount>
          </extent>
        </extentinfo>
      </file>
    </contents>
  </directory>
</ltfsindex>"#
        );
        let parsed = reader::parse_index(xml.as_bytes(), 524288).unwrap();
        assert_eq!(parsed.symlink_conflicts.len(), 1);
        assert!(matches!(
            parsed.conflict_status(),
            Err(LtfsError::SymlinkConflict(1))
        ));
        // The dentry is intact: name and uid are available to report.
        let d = parsed.tree.get(parsed.symlink_conflicts[0]).unwrap();
        assert_eq!(d.name, "conflicted");
        assert_eq!(d.uid, 2);
    }

    #[test]
    fn percent_encoded_slash_in_name_is_rejected() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="2.4.0">
  <creator>t</creator>
  <volumeuuid>{UUID}</volumeuuid>
  <generationnumber>1</generationnumber>
  <updatetime>2025-08-14T04:33:40.000000000Z</updatetime>
  <location><partition>a</partition><startblock>5</startblock></location>
  <allowpolicyupdate>true</allowpolicyupdate>
  <directory>
    <name></name>
    <readonly>false</readonly>
    <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
    <changetime>2025-08-14T04:33:40.000000000Z</changetime>
    <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
    <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
    <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
    <fileuid>1</fileuid>
    <contents>
      <file>
        <name percentencoded="true">a%2Fb</name>
        <length>0</length>
        <readonly>false</readonly>
        <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
        <changetime>2025-08-14T04:33:40.000000000Z</changetime>
        <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
        <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
        <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
        <fileuid>2</fileuid>
      </file>
    </contents>
  </directory>
</ltfsindex>"#
        );
        assert!(matches!(
            reader::parse_index(xml.as_bytes(), 524288),
            Err(LtfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn old_versions_reconstruct_uid_backuptime_and_fileoffset() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="1.0">
  <creator>legacy</creator>
  <volumeuuid>{UUID}</volumeuuid>
  <generationnumber>2</generationnumber>
  <updatetime>2011-05-01T10:00:00.000000000Z</updatetime>
  <location><partition>a</partition><startblock>5</startblock></location>
  <allowpolicyupdate>false</allowpolicyupdate>
  <directory>
    <name></name>
    <readonly>false</readonly>
    <creationtime>2011-05-01T10:00:00.000000000Z</creationtime>
    <changetime>2011-05-01T10:00:00.000000000Z</changetime>
    <modifytime>2011-05-01T10:00:00.000000000Z</modifytime>
    <accesstime>2011-05-01T10:00:00.000000000Z</accesstime>
    <contents>
      <file>
        <name>old.bin</name>
        <length>300</length>
        <readonly>false</readonly>
        <creationtime>2011-05-01T09:00:00.000000000Z</creationtime>
        <changetime>2011-05-01T10:00:00.000000000Z</changetime>
        <modifytime>2011-05-01T10:00:00.000000000Z</modifytime>
        <accesstime>2011-05-01T10:00:00.000000000Z</accesstime>
        <extentinfo>
          <extent>
            <partition>b</partition>
            <startblock>5</startblock>
            <byteoffset>0</byteoffset>
            <bytecount>100</bytecount>
          </extent>
          <extent>
            <partition>b</partition>
            <startblock>6</startblock>
            <byteoffset>0</byteoffset>
            <bytecount>200</bytecount>
          </extent>
        </extentinfo>
      </file>
    </contents>
  </directory>
</ltfsindex>"#
        );
        let parsed = reader::parse_index(xml.as_bytes(), 524288).unwrap();
        let file = parsed.tree.lookup_path("/old.bin").unwrap();
        let d = parsed.tree.get(file).unwrap();
        assert!(d.uid > 1);
        assert_eq!(d.backup_time, d.creation_time);
        assert_eq!(d.extents[0].file_offset, 0);
        assert_eq!(d.extents[1].file_offset, 100);
    }

    #[test]
    fn file_size_below_extent_end_is_rejected() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="2.4.0">
  <creator>t</creator>
  <volumeuuid>{UUID}</volumeuuid>
  <generationnumber>1</generationnumber>
  <updatetime>2025-08-14T04:33:40.000000000Z</updatetime>
  <location><partition>a</partition><startblock>5</startblock></location>
  <allowpolicyupdate>true</allowpolicyupdate>
  <directory>
    <name></name>
    <readonly>false</readonly>
    <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
    <changetime>2025-08-14T04:33:40.000000000Z</changetime>
    <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
    <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
    <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
    <fileuid>1</fileuid>
    <contents>
      <file>
        <name>short</name>
        <length>50</length>
        <readonly>false</readonly>
        <creationtime>2025-08-14T04:33:40.000000000Z</creationtime>
        <changetime>2025-08-14T04:33:40.000000000Z</changetime>
        <modifytime>2025-08-14T04:33:40.000000000Z</modifytime>
        <accesstime>2025-08-14T04:33:40.000000000Z</accesstime>
        <backuptime>2025-08-14T04:33:40.000000000Z</backuptime>
        <fileuid>2</fileuid>
        <extentinfo>
          <extent>
            <fileoffset>0</fileoffset>
            <partition>b</partition>
            <startblock>5</startblock>
            <byteoffset>0</byteoffset>
            <bytecount>100</bytecount>
          </extent>
        </extentinfo>
      </file>
    </contents>
  </directory>
</ltfsindex>"#
        );
        assert!(reader::parse_index(xml.as_bytes(), 524288).is_err());
    }

    #[test]
    fn unsupported_version_is_rejected_distinctly() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ltfsindex version="3.0.0"></ltfsindex>"#;
        assert!(matches!(
            reader::parse_index(xml, 524288),
            Err(LtfsError::UnsupportedIndexVersion(_))
        ));
    }
}
