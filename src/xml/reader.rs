//! Label and index document parsing.

use super::{
    parse_bool, parse_nametype, parse_partition, parse_ull, parse_uuid, StartTag, TagTracker,
    XmlParser,
};
use crate::dentry::{DentryId, ExtentInfo, XattrInfo, XATTR_APPENDONLY, XATTR_IMMUTABLE};
use crate::error::{LtfsError, Result};
use crate::index::{Index, TapeLocation, VolumeLockState, COMMENT_MAX};
use crate::index_criteria::IndexCriteria;
use crate::label::{FormatVersion, LtfsLabel, PartitionMap, VERSION_UID};
use crate::utils::LtfsTime;
use base64::Engine;
use tracing::{info, warn};

/// Parse an LTFS XML label document.
pub fn parse_label(xml: &[u8]) -> Result<LtfsLabel> {
    let mut p = XmlParser::new(xml);
    let top = p.open_document("ltfslabel")?;
    let version = FormatVersion::parse_supported(
        top.attr("version")
            .ok_or_else(|| LtfsError::label_invalid("missing version attribute"))?,
    )?;

    let mut tracker = TagTracker::new("ltfslabel", 7);
    let mut creator = String::new();
    let mut format_time = None;
    let mut volume_uuid = String::new();
    let mut this_partition = None;
    let mut partitions = None;
    let mut blocksize = 0u32;
    let mut compression = true;

    while let Some(tag) = p.next_tag_in("ltfslabel")? {
        match tag.name.as_str() {
            "creator" => {
                tracker.required(0, "creator")?;
                creator = p.scan_text(&tag)?;
            }
            "formattime" => {
                tracker.required(1, "formattime")?;
                let text = p.scan_text(&tag)?;
                let (t, out_of_range) = LtfsTime::parse(&text)?;
                if out_of_range {
                    warn!(formattime = %text, "label format time out of range");
                }
                format_time = Some(t);
            }
            "volumeuuid" => {
                tracker.required(2, "volumeuuid")?;
                volume_uuid = parse_uuid(&p.scan_text(&tag)?)?;
            }
            "location" => {
                tracker.required(3, "location")?;
                this_partition = Some(parse_label_location(&mut p)?);
            }
            "partitions" => {
                tracker.required(4, "partitions")?;
                partitions = Some(parse_partition_map(&mut p)?);
            }
            "blocksize" => {
                tracker.required(5, "blocksize")?;
                let v = parse_ull(&p.scan_text(&tag)?)?;
                if v == 0 || v > u32::MAX as u64 {
                    return Err(LtfsError::label_invalid(format!("bad blocksize: {v}")));
                }
                blocksize = v as u32;
            }
            "compression" => {
                tracker.required(6, "compression")?;
                compression = parse_bool(&p.scan_text(&tag)?)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()?;

    let label = LtfsLabel {
        version,
        creator,
        format_time: format_time.unwrap(),
        volume_uuid,
        this_partition: this_partition.unwrap(),
        partitions: partitions.unwrap(),
        blocksize,
        compression,
    };
    label.validate()?;
    Ok(label)
}

fn parse_label_location(p: &mut XmlParser) -> Result<char> {
    let mut tracker = TagTracker::new("location", 1);
    let mut partition = 'a';
    while let Some(tag) = p.next_tag_in("location")? {
        match tag.name.as_str() {
            "partition" => {
                tracker.required(0, "partition")?;
                partition = parse_partition(&p.scan_text(&tag)?)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()?;
    Ok(partition)
}

fn parse_partition_map(p: &mut XmlParser) -> Result<PartitionMap> {
    let mut tracker = TagTracker::new("partitions", 2);
    let mut map = PartitionMap::default();
    while let Some(tag) = p.next_tag_in("partitions")? {
        match tag.name.as_str() {
            "index" => {
                tracker.required(0, "index")?;
                map.index = parse_partition(&p.scan_text(&tag)?)?;
            }
            "data" => {
                tracker.required(1, "data")?;
                map.data = parse_partition(&p.scan_text(&tag)?)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()?;
    map.validate()?;
    Ok(map)
}

/// Parse an LTFS XML index document into an [`Index`].
///
/// Symlink/extent conflicts do not abort the parse; they are recorded on
/// the index and surfaced through [`Index::conflict_status`].
pub fn parse_index(xml: &[u8], blocksize: u64) -> Result<Index> {
    let mut p = XmlParser::new(xml);
    let top = p.open_document("ltfsindex")?;
    let version = FormatVersion::parse_supported(
        top.attr("version")
            .ok_or_else(|| LtfsError::index_invalid("missing version attribute"))?,
    )?;

    let mut idx = Index::new(String::new(), String::new(), blocksize);
    idx.version = version;

    let mut tracker = TagTracker::new("ltfsindex", 7);
    let mut saw_root = false;

    while let Some(tag) = p.next_tag_in("ltfsindex")? {
        match tag.name.as_str() {
            "creator" => {
                tracker.required(0, "creator")?;
                idx.creator = p.scan_text(&tag)?;
            }
            "volumeuuid" => {
                tracker.required(1, "volumeuuid")?;
                idx.volume_uuid = parse_uuid(&p.scan_text(&tag)?)?;
            }
            "generationnumber" => {
                tracker.required(2, "generationnumber")?;
                idx.generation = parse_ull(&p.scan_text(&tag)?)?;
            }
            "updatetime" => {
                tracker.required(3, "updatetime")?;
                let text = p.scan_text(&tag)?;
                let (t, out_of_range) = LtfsTime::parse(&text)?;
                if out_of_range {
                    warn!(updatetime = %text, "index update time out of range");
                }
                idx.update_time = t;
            }
            "location" => {
                tracker.required(4, "location")?;
                idx.self_location = parse_tape_location(&mut p, "location")?;
            }
            "allowpolicyupdate" => {
                tracker.required(5, "allowpolicyupdate")?;
                idx.criteria_allow_update = parse_bool(&p.scan_text(&tag)?)?;
            }
            "directory" => {
                tracker.required(6, "directory")?;
                if saw_root {
                    return Err(LtfsError::index_invalid("multiple root directories"));
                }
                saw_root = true;
                let root = idx.tree.root();
                parse_dirtree(&mut p, &mut idx, root, version, true)?;
            }
            "previousgenerationlocation" => {
                tracker.optional(0, "previousgenerationlocation")?;
                idx.previous_location =
                    Some(parse_tape_location(&mut p, "previousgenerationlocation")?);
            }
            "dataplacementpolicy" => {
                tracker.optional(1, "dataplacementpolicy")?;
                parse_policy(&mut p, &mut idx)?;
            }
            "comment" => {
                tracker.optional(2, "comment")?;
                let text = p.scan_text(&tag)?;
                if text.len() > COMMENT_MAX {
                    return Err(LtfsError::index_invalid("comment too long"));
                }
                idx.comment = Some(text);
            }
            "volumelockstate" => {
                tracker.optional(3, "volumelockstate")?;
                idx.volume_lock_state = VolumeLockState::parse(&p.scan_text(&tag)?)?;
            }
            "highestfileuid" if version >= VERSION_UID => {
                tracker.optional(4, "highestfileuid")?;
                let highest = parse_ull(&p.scan_text(&tag)?)?;
                idx.tree.set_next_uid(highest + 1);
            }
            "highestfileuid" => p.skip_tag(&tag)?,
            _ => {
                let fragment = p.save_tag(&tag)?;
                idx.preserved_tags.push(fragment);
            }
        }
    }
    tracker.finish()?;

    idx.tree.check_uids()?;
    idx.tree.report_open_for_write();
    info!(
        generation = idx.generation,
        dentries = idx.tree.len(),
        conflicts = idx.symlink_conflicts.len(),
        "index parsed"
    );
    Ok(idx)
}

fn parse_tape_location(p: &mut XmlParser, container: &'static str) -> Result<TapeLocation> {
    let mut tracker = TagTracker::new(container, 2);
    let mut loc = TapeLocation {
        partition: 'a',
        block: 0,
    };
    while let Some(tag) = p.next_tag_in(container)? {
        match tag.name.as_str() {
            "partition" => {
                tracker.required(0, "partition")?;
                loc.partition = parse_partition(&p.scan_text(&tag)?)?;
            }
            "startblock" => {
                tracker.required(1, "startblock")?;
                loc.block = parse_ull(&p.scan_text(&tag)?)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()?;
    Ok(loc)
}

fn parse_policy(p: &mut XmlParser, idx: &mut Index) -> Result<()> {
    let mut tracker = TagTracker::new("dataplacementpolicy", 1);
    while let Some(tag) = p.next_tag_in("dataplacementpolicy")? {
        match tag.name.as_str() {
            "indexpartitioncriteria" => {
                tracker.required(0, "indexpartitioncriteria")?;
                let mut inner = TagTracker::new("indexpartitioncriteria", 1);
                let mut size = 0u64;
                let mut patterns = Vec::new();
                while let Some(t) = p.next_tag_in("indexpartitioncriteria")? {
                    match t.name.as_str() {
                        "size" => {
                            inner.required(0, "size")?;
                            size = parse_ull(&p.scan_text(&t)?)?;
                        }
                        "name" => {
                            let encoded = t.attr("percentencoded") == Some("true");
                            let text = p.scan_text(&t)?;
                            patterns.push(parse_nametype(&text, encoded, false)?);
                        }
                        _ => p.skip_tag(&t)?,
                    }
                }
                inner.finish()?;
                idx.set_criteria(IndexCriteria::from_parts(size, patterns));
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()
}

/// Parse a `directory` element (the opening tag is already consumed)
/// into `dir`, recursing through `contents`.
fn parse_dirtree(
    p: &mut XmlParser,
    idx: &mut Index,
    dir: DentryId,
    version: FormatVersion,
    is_root: bool,
) -> Result<()> {
    let mut tracker = TagTracker::new("directory", 9);
    let mut uid_seen = 0u64;

    while let Some(tag) = p.next_tag_in("directory")? {
        match tag.name.as_str() {
            "name" => {
                tracker.required(0, "name")?;
                let encoded = tag.attr("percentencoded") == Some("true");
                let text = p.scan_text(&tag)?;
                let name = parse_nametype(&text, encoded, false)?;
                if !is_root && name.is_empty() {
                    return Err(LtfsError::invalid_path("empty directory name"));
                }
                let d = idx.tree.get_mut(dir).unwrap();
                d.name = name.clone();
                d.platform_safe_name = name;
            }
            "readonly" => {
                tracker.required(1, "readonly")?;
                let v = parse_bool(&p.scan_text(&tag)?)?;
                idx.tree.get_mut(dir).unwrap().readonly = v;
            }
            "creationtime" => {
                tracker.required(2, "creationtime")?;
                idx.tree.get_mut(dir).unwrap().creation_time =
                    parse_dentry_time(p, &tag, "creationtime")?;
            }
            "changetime" => {
                tracker.required(3, "changetime")?;
                idx.tree.get_mut(dir).unwrap().change_time =
                    parse_dentry_time(p, &tag, "changetime")?;
            }
            "modifytime" => {
                tracker.required(4, "modifytime")?;
                idx.tree.get_mut(dir).unwrap().modify_time =
                    parse_dentry_time(p, &tag, "modifytime")?;
            }
            "accesstime" => {
                tracker.required(5, "accesstime")?;
                idx.tree.get_mut(dir).unwrap().access_time =
                    parse_dentry_time(p, &tag, "accesstime")?;
            }
            "backuptime" if version >= VERSION_UID => {
                tracker.required(6, "backuptime")?;
                idx.tree.get_mut(dir).unwrap().backup_time =
                    parse_dentry_time(p, &tag, "backuptime")?;
            }
            "backuptime" => p.skip_tag(&tag)?,
            "fileuid" if version >= VERSION_UID => {
                tracker.required(7, "fileuid")?;
                uid_seen = parse_ull(&p.scan_text(&tag)?)?;
            }
            "fileuid" => p.skip_tag(&tag)?,
            "contents" => {
                tracker.required(8, "contents")?;
                parse_dir_contents(p, idx, dir, version)?;
            }
            "extendedattributes" => {
                parse_xattrs(p, idx, dir)?;
            }
            _ => {
                let fragment = p.save_tag(&tag)?;
                idx.tree.get_mut(dir).unwrap().preserved_tags.push(fragment);
            }
        }
    }

    // Version-gated fields: reconstruct what older schemas omit.
    if version < VERSION_UID {
        tracker.supply(6);
        tracker.supply(7);
        let d = idx.tree.get_mut(dir).unwrap();
        d.backup_time = d.creation_time;
        if !is_root {
            uid_seen = idx.tree.allocate_uid();
        }
    }
    tracker.finish()?;

    if !is_root {
        if uid_seen <= 1 {
            return Err(LtfsError::index_invalid(format!(
                "directory uid {uid_seen} is reserved"
            )));
        }
        idx.tree.observe_uid(uid_seen);
        idx.tree.get_mut(dir).unwrap().uid = uid_seen;
    } else if version >= VERSION_UID && uid_seen != 1 {
        return Err(LtfsError::index_invalid("root directory uid is not 1"));
    }

    idx.tree.assign_platform_safe_names(dir);
    Ok(())
}

fn parse_dir_contents(
    p: &mut XmlParser,
    idx: &mut Index,
    dir: DentryId,
    version: FormatVersion,
) -> Result<()> {
    while let Some(tag) = p.next_tag_in("contents")? {
        match tag.name.as_str() {
            "directory" => {
                let child = idx.tree.allocate_dentry(dir, "", true, false, false)?;
                parse_dirtree(p, idx, child, version, false)?;
            }
            "file" => {
                parse_file(p, idx, dir, version)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    Ok(())
}

fn parse_file(
    p: &mut XmlParser,
    idx: &mut Index,
    dir: DentryId,
    version: FormatVersion,
) -> Result<()> {
    let file = idx.tree.allocate_dentry(dir, "", false, false, false)?;
    let mut tracker = TagTracker::new("file", 9);
    let mut uid_seen = 0u64;
    let mut symlink_flag = false;
    let mut extent_flag = false;

    while let Some(tag) = p.next_tag_in("file")? {
        match tag.name.as_str() {
            "name" => {
                tracker.required(0, "name")?;
                let encoded = tag.attr("percentencoded") == Some("true");
                let text = p.scan_text(&tag)?;
                let name = parse_nametype(&text, encoded, false)?;
                if name.is_empty() {
                    return Err(LtfsError::invalid_path("empty file name"));
                }
                let d = idx.tree.get_mut(file).unwrap();
                d.name = name.clone();
                d.platform_safe_name = name;
            }
            "length" => {
                tracker.required(1, "length")?;
                idx.tree.get_mut(file).unwrap().size = parse_ull(&p.scan_text(&tag)?)?;
            }
            "readonly" => {
                tracker.required(2, "readonly")?;
                let v = parse_bool(&p.scan_text(&tag)?)?;
                idx.tree.get_mut(file).unwrap().readonly = v;
            }
            "modifytime" => {
                tracker.required(3, "modifytime")?;
                idx.tree.get_mut(file).unwrap().modify_time =
                    parse_dentry_time(p, &tag, "modifytime")?;
            }
            "creationtime" => {
                tracker.required(4, "creationtime")?;
                idx.tree.get_mut(file).unwrap().creation_time =
                    parse_dentry_time(p, &tag, "creationtime")?;
            }
            "accesstime" => {
                tracker.required(5, "accesstime")?;
                idx.tree.get_mut(file).unwrap().access_time =
                    parse_dentry_time(p, &tag, "accesstime")?;
            }
            "changetime" => {
                tracker.required(6, "changetime")?;
                idx.tree.get_mut(file).unwrap().change_time =
                    parse_dentry_time(p, &tag, "changetime")?;
            }
            "fileuid" if version >= VERSION_UID => {
                tracker.required(7, "fileuid")?;
                uid_seen = parse_ull(&p.scan_text(&tag)?)?;
            }
            "fileuid" => p.skip_tag(&tag)?,
            "backuptime" if version >= VERSION_UID => {
                tracker.required(8, "backuptime")?;
                idx.tree.get_mut(file).unwrap().backup_time =
                    parse_dentry_time(p, &tag, "backuptime")?;
            }
            "backuptime" => p.skip_tag(&tag)?,
            "extendedattributes" => {
                tracker.optional(0, "extendedattributes")?;
                parse_xattrs(p, idx, file)?;
            }
            "extentinfo" => {
                tracker.optional(1, "extentinfo")?;
                extent_flag = true;
                parse_extents(p, idx, file, version)?;
            }
            "symlink" => {
                tracker.optional(2, "symlink")?;
                let encoded = tag.attr("percentencoded") == Some("true");
                let text = p.scan_text(&tag)?;
                let target = parse_nametype(&text, encoded, true)?;
                let d = idx.tree.get_mut(file).unwrap();
                d.is_symlink = true;
                d.symlink_target = Some(target);
                symlink_flag = true;
            }
            "openforwrite" => {
                tracker.optional(3, "openforwrite")?;
                let text = p.scan_text(&tag)?;
                match parse_bool(&text) {
                    Ok(v) => {
                        let d = idx.tree.get_mut(file).unwrap();
                        d.open_for_write = v;
                        if v {
                            info!(name = %d.name, uid = d.uid, "file left open for write");
                        }
                    }
                    Err(_) => warn!(value = %text, "ignoring bad openforwrite value"),
                }
            }
            _ => {
                let fragment = p.save_tag(&tag)?;
                idx.tree.get_mut(file).unwrap().preserved_tags.push(fragment);
            }
        }
    }

    if version < VERSION_UID {
        tracker.supply(7);
        tracker.supply(8);
        uid_seen = idx.tree.allocate_uid();
        let d = idx.tree.get_mut(file).unwrap();
        d.backup_time = d.creation_time;
    }
    tracker.finish()?;

    if uid_seen <= 1 {
        return Err(LtfsError::index_invalid(format!(
            "file uid {uid_seen} is reserved"
        )));
    }
    idx.tree.observe_uid(uid_seen);

    let d = idx.tree.get_mut(file).unwrap();
    d.uid = uid_seen;

    // The extent list must not extend past the declared size; a size
    // beyond the last extent is an implicit zero tail and is fine.
    if let Some(last) = d.extents.last() {
        if last.end() > d.size {
            return Err(LtfsError::index_invalid(format!(
                "extents of {} extend past its length",
                d.name
            )));
        }
    }

    if symlink_flag && extent_flag {
        let (name, uid) = {
            let d = idx.tree.get(file).unwrap();
            (d.name.clone(), d.uid)
        };
        warn!(name = %name, uid, "file carries both a symlink target and extents");
        idx.symlink_conflicts.push(file);
    }

    Ok(())
}

fn parse_extents(
    p: &mut XmlParser,
    idx: &mut Index,
    file: DentryId,
    version: FormatVersion,
) -> Result<()> {
    while let Some(tag) = p.next_tag_in("extentinfo")? {
        match tag.name.as_str() {
            "extent" => parse_one_extent(p, idx, file, version)?,
            _ => p.skip_tag(&tag)?,
        }
    }
    Ok(())
}

fn parse_one_extent(
    p: &mut XmlParser,
    idx: &mut Index,
    file: DentryId,
    version: FormatVersion,
) -> Result<()> {
    let mut tracker = TagTracker::new("extent", 5);
    let mut extent = ExtentInfo {
        partition: 'a',
        start_block: 0,
        byte_offset: 0,
        byte_count: 0,
        file_offset: 0,
    };

    while let Some(tag) = p.next_tag_in("extent")? {
        match tag.name.as_str() {
            "partition" => {
                tracker.required(0, "partition")?;
                extent.partition = parse_partition(&p.scan_text(&tag)?)?;
            }
            "startblock" => {
                tracker.required(1, "startblock")?;
                extent.start_block = parse_ull(&p.scan_text(&tag)?)?;
            }
            "byteoffset" => {
                tracker.required(2, "byteoffset")?;
                extent.byte_offset = parse_ull(&p.scan_text(&tag)?)?;
            }
            "bytecount" => {
                tracker.required(3, "bytecount")?;
                extent.byte_count = parse_ull(&p.scan_text(&tag)?)?;
            }
            "fileoffset" if version >= VERSION_UID => {
                tracker.required(4, "fileoffset")?;
                extent.file_offset = parse_ull(&p.scan_text(&tag)?)?;
            }
            _ => p.skip_tag(&tag)?,
        }
    }

    // Older schemas omit fileoffset: each extent starts where the
    // previous one ended.
    if version < VERSION_UID {
        tracker.supply(4);
        let d = idx.tree.get(file).unwrap();
        extent.file_offset = d.extents.last().map(|e| e.end()).unwrap_or(0);
    }
    tracker.finish()?;

    idx.tree.add_extent(file, extent)
}

fn parse_xattrs(p: &mut XmlParser, idx: &mut Index, owner: DentryId) -> Result<()> {
    while let Some(tag) = p.next_tag_in("extendedattributes")? {
        match tag.name.as_str() {
            "xattr" => parse_one_xattr(p, idx, owner)?,
            _ => p.skip_tag(&tag)?,
        }
    }
    Ok(())
}

fn parse_one_xattr(p: &mut XmlParser, idx: &mut Index, owner: DentryId) -> Result<()> {
    let mut tracker = TagTracker::new("xattr", 2);
    let mut key = String::new();
    let mut value = Vec::new();

    while let Some(tag) = p.next_tag_in("xattr")? {
        match tag.name.as_str() {
            "key" => {
                tracker.required(0, "key")?;
                let encoded = tag.attr("percentencoded") == Some("true");
                let text = p.scan_text(&tag)?;
                // Xattr keys allow the slash (namespaced keys).
                key = parse_nametype(&text, encoded, true)?;
            }
            "value" => {
                tracker.required(1, "value")?;
                let kind = tag.attr("type").map(str::to_string);
                let text = p.scan_text(&tag)?;
                value = match kind.as_deref() {
                    None | Some("text") => text.into_bytes(),
                    Some("base64") => base64::engine::general_purpose::STANDARD
                        .decode(text.trim())
                        .map_err(|e| {
                            LtfsError::index_invalid(format!("bad base64 xattr value: {e}"))
                        })?,
                    Some(other) => {
                        return Err(LtfsError::index_invalid(format!(
                            "bad xattr value type: {other}"
                        )))
                    }
                };
            }
            _ => p.skip_tag(&tag)?,
        }
    }
    tracker.finish()?;

    let d = idx.tree.get_mut(owner).unwrap();
    let on = value == b"1";
    if key == XATTR_IMMUTABLE && on {
        d.is_immutable = true;
    } else if key == XATTR_APPENDONLY && on {
        d.is_appendonly = true;
    }
    d.xattrs.push(XattrInfo { key, value });
    Ok(())
}

fn parse_dentry_time(p: &mut XmlParser, tag: &StartTag, what: &str) -> Result<LtfsTime> {
    let text = p.scan_text(tag)?;
    let (t, out_of_range) = LtfsTime::parse(&text)?;
    if out_of_range {
        warn!(field = what, value = %text, "timestamp out of range, keeping value");
    }
    Ok(t)
}
