//! The in-memory dentry/extent tree.
//!
//! Dentries live in an arena keyed by [`DentryId`]; parent links are ids,
//! not owned references, so the parent/child cycle never needs
//! cycle-aware reference counting. Freeing a subtree walks children
//! first, then removes the mapping.

use crate::error::{LtfsError, Result};
use crate::pathname;
use crate::utils::LtfsTime;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Root directory uid. Every other dentry gets a uid above it.
pub const ROOT_UID: u64 = 1;

/// Arena key for one dentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DentryId(u64);

/// One positioned run of file bytes on tape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtentInfo {
    /// Partition letter this extent's payload lives on.
    pub partition: char,
    pub start_block: u64,
    /// Offset into the tape record at `start_block` where the data begins.
    pub byte_offset: u64,
    pub byte_count: u64,
    /// Position within the file at which these bytes land.
    pub file_offset: u64,
}

impl ExtentInfo {
    pub fn end(&self) -> u64 {
        self.file_offset + self.byte_count
    }
}

/// One extended attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XattrInfo {
    pub key: String,
    pub value: Vec<u8>,
}

pub const XATTR_IMMUTABLE: &str = "ltfs.vendor.IBM.immutable";
pub const XATTR_APPENDONLY: &str = "ltfs.vendor.IBM.appendonly";

/// A file, directory, or symlink node.
#[derive(Debug, Clone, Serialize)]
pub struct Dentry {
    pub id: DentryId,
    pub parent: Option<DentryId>,
    /// Canonical name, UTF-8 NFC. Empty only for the root.
    pub name: String,
    /// Host-safe variant, assigned after each directory loads.
    pub platform_safe_name: String,
    pub uid: u64,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
    pub readonly: bool,
    pub is_immutable: bool,
    pub is_appendonly: bool,
    /// Serialized in the index; still set on load means a writer crashed
    /// before its close was committed.
    pub open_for_write: bool,
    pub size: u64,
    /// Sum of extent byte counts; can trail `size` (implicit zero tail).
    pub realsize: u64,
    pub used_blocks: u64,
    pub modify_time: LtfsTime,
    pub creation_time: LtfsTime,
    pub access_time: LtfsTime,
    pub change_time: LtfsTime,
    pub backup_time: LtfsTime,
    /// Ordered by `file_offset`, non-overlapping.
    pub extents: Vec<ExtentInfo>,
    pub xattrs: Vec<XattrInfo>,
    pub children: Vec<DentryId>,
    /// Verbatim XML fragments of unknown tags, re-emitted on write.
    pub preserved_tags: Vec<Vec<u8>>,
}

impl Dentry {
    /// Hard link count as reported to the host: directories count their
    /// own entry, `.`, and one per subdirectory.
    pub fn link_count(&self, tree: &DentryTree) -> u32 {
        if self.is_directory {
            2 + self
                .children
                .iter()
                .filter(|c| tree.get(**c).map(|d| d.is_directory).unwrap_or(false))
                .count() as u32
        } else {
            1
        }
    }
}

/// The volume's tree of dentries.
#[derive(Debug, Clone)]
pub struct DentryTree {
    arena: HashMap<DentryId, Dentry>,
    next_id: u64,
    next_uid: u64,
    root: DentryId,
    blocksize: u64,
}

impl DentryTree {
    /// A fresh tree holding only the root directory.
    pub fn new(blocksize: u64) -> Self {
        let now = LtfsTime::now();
        let root_id = DentryId(1);
        let root = Dentry {
            id: root_id,
            parent: None,
            name: String::new(),
            platform_safe_name: String::new(),
            uid: ROOT_UID,
            is_directory: true,
            is_symlink: false,
            symlink_target: None,
            readonly: false,
            is_immutable: false,
            is_appendonly: false,
            open_for_write: false,
            size: 0,
            realsize: 0,
            used_blocks: 0,
            modify_time: now,
            creation_time: now,
            access_time: now,
            change_time: now,
            backup_time: now,
            extents: Vec::new(),
            xattrs: Vec::new(),
            children: Vec::new(),
            preserved_tags: Vec::new(),
        };
        let mut arena = HashMap::new();
        arena.insert(root_id, root);
        Self {
            arena,
            next_id: 2,
            next_uid: ROOT_UID + 1,
            root: root_id,
            blocksize,
        }
    }

    pub fn root(&self) -> DentryId {
        self.root
    }

    pub fn blocksize(&self) -> u64 {
        self.blocksize
    }

    pub fn get(&self, id: DentryId) -> Option<&Dentry> {
        self.arena.get(&id)
    }

    pub fn get_mut(&mut self, id: DentryId) -> Option<&mut Dentry> {
        self.arena.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Next free uid. The parser bumps this past uids it reads.
    pub fn allocate_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    pub fn next_uid(&self) -> u64 {
        self.next_uid
    }

    pub fn observe_uid(&mut self, uid: u64) {
        if uid >= self.next_uid {
            self.next_uid = uid + 1;
        }
    }

    pub fn set_next_uid(&mut self, next: u64) {
        if next > self.next_uid {
            self.next_uid = next;
        }
    }

    /// Allocate a dentry under `parent`. With `assign_uid` the next free
    /// uid is taken; the index parser passes false and fills the uid from
    /// the tape (or allocates afterwards for pre-2.0 indexes).
    pub fn allocate_dentry(
        &mut self,
        parent: DentryId,
        name: &str,
        is_directory: bool,
        is_symlink: bool,
        assign_uid: bool,
    ) -> Result<DentryId> {
        if !self
            .arena
            .get(&parent)
            .map(|p| p.is_directory)
            .unwrap_or(false)
        {
            return Err(LtfsError::internal("parent is not a directory"));
        }

        let id = DentryId(self.next_id);
        self.next_id += 1;
        let uid = if assign_uid { self.allocate_uid() } else { 0 };
        let now = LtfsTime::now();

        let d = Dentry {
            id,
            parent: Some(parent),
            name: name.to_string(),
            platform_safe_name: name.to_string(),
            uid,
            is_directory,
            is_symlink,
            symlink_target: None,
            readonly: false,
            is_immutable: false,
            is_appendonly: false,
            open_for_write: false,
            size: 0,
            realsize: 0,
            used_blocks: 0,
            modify_time: now,
            creation_time: now,
            access_time: now,
            change_time: now,
            backup_time: now,
            extents: Vec::new(),
            xattrs: Vec::new(),
            children: Vec::new(),
            preserved_tags: Vec::new(),
        };
        self.arena.insert(id, d);
        self.arena.get_mut(&parent).unwrap().children.push(id);
        Ok(id)
    }

    /// Free a dentry and, recursively, everything under it. The root
    /// cannot be freed.
    pub fn free_dentry(&mut self, id: DentryId) -> Result<()> {
        if id == self.root {
            return Err(LtfsError::internal("attempt to free the root dentry"));
        }
        let parent = self.arena.get(&id).and_then(|d| d.parent);
        if let Some(p) = parent {
            if let Some(pd) = self.arena.get_mut(&p) {
                pd.children.retain(|c| *c != id);
            }
        }
        self.free_subtree(id);
        Ok(())
    }

    fn free_subtree(&mut self, id: DentryId) {
        if let Some(d) = self.arena.remove(&id) {
            for child in d.children {
                self.free_subtree(child);
            }
        }
    }

    /// Exact-name lookup within one directory.
    pub fn lookup(&self, dir: DentryId, name: &str) -> Option<DentryId> {
        let d = self.arena.get(&dir)?;
        d.children
            .iter()
            .copied()
            .find(|c| self.arena.get(c).map(|cd| cd.name == name).unwrap_or(false))
    }

    /// Walk an absolute `/`-separated path from the root.
    pub fn lookup_path(&self, path: &str) -> Option<DentryId> {
        let mut cur = self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur = self.lookup(cur, part)?;
        }
        Some(cur)
    }

    /// Insert an extent, keeping the list ordered by file offset.
    ///
    /// The search starts from the tail since appends are the common
    /// case. Overlap with an existing extent is rejected.
    pub fn add_extent(&mut self, id: DentryId, extent: ExtentInfo) -> Result<()> {
        let blocksize = self.blocksize;
        let d = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| LtfsError::internal("no such dentry"))?;

        let mut insert_at = None;
        if d.extents.is_empty() {
            insert_at = Some(0);
        } else {
            for (i, existing) in d.extents.iter().enumerate().rev() {
                if existing.end() <= extent.file_offset {
                    insert_at = Some(i + 1);
                    break;
                } else if extent.end() > existing.file_offset {
                    return Err(LtfsError::index_invalid(format!(
                        "overlapping extent at file offset {} in {}",
                        extent.file_offset, d.name
                    )));
                }
            }
            if insert_at.is_none() {
                insert_at = Some(0);
            }
        }

        d.realsize += extent.byte_count;
        d.used_blocks += (extent.byte_offset + extent.byte_count).div_ceil(blocksize);
        d.extents.insert(insert_at.unwrap(), extent);
        Ok(())
    }

    /// Drop the extents covering a file range (whole extents only; used
    /// when rewritten data supersedes them).
    pub fn remove_extent_range(&mut self, id: DentryId, start: u64, end: u64) -> Result<()> {
        let blocksize = self.blocksize;
        let d = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| LtfsError::internal("no such dentry"))?;
        let mut kept = Vec::with_capacity(d.extents.len());
        for e in std::mem::take(&mut d.extents) {
            if e.file_offset >= start && e.end() <= end {
                d.realsize -= e.byte_count;
                d.used_blocks -= (e.byte_offset + e.byte_count).div_ceil(blocksize);
            } else {
                kept.push(e);
            }
        }
        d.extents = kept;
        Ok(())
    }

    /// Truncate a file: extents past the new size are dropped, one
    /// straddling extent is shortened, growth leaves an implicit zero
    /// tail.
    pub fn truncate(&mut self, id: DentryId, new_size: u64) -> Result<()> {
        let blocksize = self.blocksize;
        let d = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| LtfsError::internal("no such dentry"))?;
        if d.is_directory {
            return Err(LtfsError::internal("truncate on a directory"));
        }

        let mut kept = Vec::with_capacity(d.extents.len());
        for e in std::mem::take(&mut d.extents) {
            if e.file_offset >= new_size {
                d.realsize -= e.byte_count;
                d.used_blocks -= (e.byte_offset + e.byte_count).div_ceil(blocksize);
            } else {
                kept.push(e);
            }
        }
        d.extents = kept;
        if let Some(last) = d.extents.last_mut() {
            if last.end() > new_size {
                let cut = last.end() - new_size;
                last.byte_count -= cut;
                d.realsize -= cut;
            }
        }
        d.size = new_size;
        d.modify_time = LtfsTime::now();
        d.change_time = d.modify_time;
        Ok(())
    }

    /// Move a child between directories, replacing nothing: the target
    /// name must be free.
    pub fn rename(
        &mut self,
        old_parent: DentryId,
        old_name: &str,
        new_parent: DentryId,
        new_name: &str,
    ) -> Result<()> {
        pathname::validate_file(new_name)?;
        let id = self
            .lookup(old_parent, old_name)
            .ok_or_else(|| LtfsError::invalid_path(old_name))?;
        if self.lookup(new_parent, new_name).is_some() {
            return Err(LtfsError::invalid_path(format!(
                "target name exists: {new_name}"
            )));
        }
        if !self
            .arena
            .get(&new_parent)
            .map(|p| p.is_directory)
            .unwrap_or(false)
        {
            return Err(LtfsError::internal("rename target is not a directory"));
        }

        if let Some(pd) = self.arena.get_mut(&old_parent) {
            pd.children.retain(|c| *c != id);
        }
        self.arena.get_mut(&new_parent).unwrap().children.push(id);
        let d = self.arena.get_mut(&id).unwrap();
        d.parent = Some(new_parent);
        d.name = new_name.to_string();
        d.platform_safe_name = new_name.to_string();
        d.change_time = LtfsTime::now();
        Ok(())
    }

    pub fn get_xattr(&self, id: DentryId, key: &str) -> Option<&[u8]> {
        self.arena
            .get(&id)?
            .xattrs
            .iter()
            .find(|x| x.key == key)
            .map(|x| x.value.as_slice())
    }

    /// Set an xattr, replacing any previous value. The IBM vendor keys
    /// flip the matching dentry flag when the value is `"1"`.
    pub fn set_xattr(&mut self, id: DentryId, key: &str, value: &[u8]) -> Result<()> {
        pathname::validate_xattr_name(key)?;
        let d = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| LtfsError::internal("no such dentry"))?;
        match d.xattrs.iter_mut().find(|x| x.key == key) {
            Some(x) => x.value = value.to_vec(),
            None => d.xattrs.push(XattrInfo {
                key: key.to_string(),
                value: value.to_vec(),
            }),
        }
        let on = value == b"1";
        if key == XATTR_IMMUTABLE {
            d.is_immutable = on;
        } else if key == XATTR_APPENDONLY {
            d.is_appendonly = on;
        }
        Ok(())
    }

    pub fn remove_xattr(&mut self, id: DentryId, key: &str) -> Result<()> {
        let d = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| LtfsError::internal("no such dentry"))?;
        let before = d.xattrs.len();
        d.xattrs.retain(|x| x.key != key);
        if before == d.xattrs.len() {
            return Err(LtfsError::invalid_path(format!("no such xattr: {key}")));
        }
        if key == XATTR_IMMUTABLE {
            d.is_immutable = false;
        } else if key == XATTR_APPENDONLY {
            d.is_appendonly = false;
        }
        Ok(())
    }

    /// Assign platform-safe names for one directory's children.
    ///
    /// Two passes so the result does not depend on load order: names
    /// that neither collide caselessly with a sibling nor are host
    /// invalid are taken verbatim; the rest are mangled with their uid,
    /// which is stable across loads of the same tape.
    pub fn assign_platform_safe_names(&mut self, dir: DentryId) {
        let children: Vec<DentryId> = match self.arena.get(&dir) {
            Some(d) => d.children.clone(),
            None => return,
        };

        let mut folded: Vec<(DentryId, String)> = Vec::with_capacity(children.len());
        for id in &children {
            if let Some(d) = self.arena.get(id) {
                folded.push((*id, pathname::prepare_caseless(&d.name, true)));
            }
        }

        for (id, fold) in &folded {
            let collides = folded.iter().any(|(o, f)| o != id && f == fold);
            let d = self.arena.get_mut(id).unwrap();
            let host_invalid = d.name.contains(':') || d.name.contains('\\');
            if collides || host_invalid {
                let mangled = format!("{}~{}", sanitize_host_name(&d.name), d.uid);
                debug!(name = %d.name, safe = %mangled, "mangled platform-safe name");
                d.platform_safe_name = mangled;
            } else {
                d.platform_safe_name = d.name.clone();
            }
        }
    }

    /// Log any files left open by a crashed writer. Called after load.
    pub fn report_open_for_write(&self) {
        for d in self.arena.values() {
            if d.open_for_write {
                warn!(
                    name = %d.name,
                    uid = d.uid,
                    "file was open for write when the last index was written"
                );
            }
        }
    }

    /// Verify the uid invariants: root uid 1, everything else unique and
    /// above it.
    pub fn check_uids(&self) -> Result<()> {
        let mut seen = HashMap::new();
        for d in self.arena.values() {
            if d.id == self.root {
                if d.uid != ROOT_UID {
                    return Err(LtfsError::index_invalid("root dentry uid is not 1"));
                }
            } else if d.uid <= ROOT_UID {
                return Err(LtfsError::index_invalid(format!(
                    "non-root dentry {} has reserved uid {}",
                    d.name, d.uid
                )));
            }
            if let Some(other) = seen.insert(d.uid, d.id) {
                if other != d.id {
                    return Err(LtfsError::index_invalid(format!(
                        "duplicate uid {}",
                        d.uid
                    )));
                }
            }
        }
        Ok(())
    }

    /// Render the tree as JSON for debugging.
    pub fn dump_tree(&self) -> serde_json::Value {
        self.dump_node(self.root)
    }

    fn dump_node(&self, id: DentryId) -> serde_json::Value {
        match self.arena.get(&id) {
            None => json!(null),
            Some(d) => {
                let children: Vec<serde_json::Value> =
                    d.children.iter().map(|c| self.dump_node(*c)).collect();
                json!({
                    "name": d.name,
                    "uid": d.uid,
                    "dir": d.is_directory,
                    "size": d.size,
                    "extents": d.extents.len(),
                    "children": children,
                })
            }
        }
    }
}

fn sanitize_host_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == ':' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> DentryTree {
        DentryTree::new(524288)
    }

    fn extent(file_offset: u64, byte_count: u64, block: u64) -> ExtentInfo {
        ExtentInfo {
            partition: 'b',
            start_block: block,
            byte_offset: 0,
            byte_count,
            file_offset,
        }
    }

    #[test]
    fn root_has_uid_one_and_children_count_up() {
        let mut t = tree();
        assert_eq!(t.get(t.root()).unwrap().uid, ROOT_UID);
        let f = t.allocate_dentry(t.root(), "a.bin", false, false, true).unwrap();
        assert_eq!(t.get(f).unwrap().uid, 2);
        let d = t.allocate_dentry(t.root(), "dir", true, false, true).unwrap();
        assert_eq!(t.get(d).unwrap().uid, 3);
        t.check_uids().unwrap();
    }

    #[test]
    fn lookup_and_path_walk() {
        let mut t = tree();
        let dir = t.allocate_dentry(t.root(), "data", true, false, true).unwrap();
        let file = t.allocate_dentry(dir, "a.bin", false, false, true).unwrap();
        assert_eq!(t.lookup(t.root(), "data"), Some(dir));
        assert_eq!(t.lookup_path("/data/a.bin"), Some(file));
        assert_eq!(t.lookup_path("/data/missing"), None);
    }

    #[test]
    fn free_dentry_removes_the_whole_subtree() {
        let mut t = tree();
        let dir = t.allocate_dentry(t.root(), "data", true, false, true).unwrap();
        let _file = t.allocate_dentry(dir, "a.bin", false, false, true).unwrap();
        assert_eq!(t.len(), 3);
        t.free_dentry(dir).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.lookup(t.root(), "data"), None);
    }

    #[test]
    fn root_cannot_be_freed() {
        let mut t = tree();
        assert!(t.free_dentry(t.root()).is_err());
    }

    #[test]
    fn extents_stay_ordered_and_reject_overlap() {
        let mut t = tree();
        let f = t.allocate_dentry(t.root(), "f", false, false, true).unwrap();
        t.add_extent(f, extent(100, 50, 7)).unwrap();
        t.add_extent(f, extent(0, 100, 5)).unwrap();
        t.add_extent(f, extent(150, 10, 9)).unwrap();

        let d = t.get(f).unwrap();
        let offsets: Vec<u64> = d.extents.iter().map(|e| e.file_offset).collect();
        assert_eq!(offsets, vec![0, 100, 150]);
        assert_eq!(d.realsize, 160);

        assert!(t.add_extent(f, extent(120, 50, 11)).is_err());
        assert!(t.add_extent(f, extent(0, 1, 12)).is_err());
    }

    #[test]
    fn used_blocks_round_up_per_extent() {
        let mut t = DentryTree::new(1024);
        let f = t.allocate_dentry(t.root(), "f", false, false, true).unwrap();
        t.add_extent(f, extent(0, 1025, 5)).unwrap();
        assert_eq!(t.get(f).unwrap().used_blocks, 2);
    }

    #[test]
    fn truncate_trims_and_drops_extents() {
        let mut t = tree();
        let f = t.allocate_dentry(t.root(), "f", false, false, true).unwrap();
        t.add_extent(f, extent(0, 100, 5)).unwrap();
        t.add_extent(f, extent(100, 100, 6)).unwrap();
        t.get_mut(f).unwrap().size = 200;

        t.truncate(f, 150).unwrap();
        let d = t.get(f).unwrap();
        assert_eq!(d.size, 150);
        assert_eq!(d.extents.len(), 2);
        assert_eq!(d.extents[1].byte_count, 50);

        t.truncate(f, 50).unwrap();
        let d = t.get(f).unwrap();
        assert_eq!(d.extents.len(), 1);
        assert_eq!(d.extents[0].byte_count, 50);

        // Growth leaves an implicit zero tail.
        t.truncate(f, 500).unwrap();
        let d = t.get(f).unwrap();
        assert_eq!(d.size, 500);
        assert_eq!(d.extents.len(), 1);
    }

    #[test]
    fn rename_moves_between_directories() {
        let mut t = tree();
        let d1 = t.allocate_dentry(t.root(), "one", true, false, true).unwrap();
        let d2 = t.allocate_dentry(t.root(), "two", true, false, true).unwrap();
        let f = t.allocate_dentry(d1, "f.txt", false, false, true).unwrap();

        t.rename(d1, "f.txt", d2, "g.txt").unwrap();
        assert_eq!(t.lookup(d1, "f.txt"), None);
        assert_eq!(t.lookup(d2, "g.txt"), Some(f));
        assert_eq!(t.get(f).unwrap().parent, Some(d2));

        // Occupied target name is refused.
        t.allocate_dentry(d2, "h.txt", false, false, true).unwrap();
        assert!(t.rename(d2, "g.txt", d2, "h.txt").is_err());
    }

    #[test]
    fn vendor_xattrs_drive_dentry_flags() {
        let mut t = tree();
        let f = t.allocate_dentry(t.root(), "f", false, false, true).unwrap();
        t.set_xattr(f, XATTR_IMMUTABLE, b"1").unwrap();
        assert!(t.get(f).unwrap().is_immutable);
        t.set_xattr(f, XATTR_IMMUTABLE, b"0").unwrap();
        assert!(!t.get(f).unwrap().is_immutable);
        t.set_xattr(f, XATTR_APPENDONLY, b"1").unwrap();
        assert!(t.get(f).unwrap().is_appendonly);
        t.remove_xattr(f, XATTR_APPENDONLY).unwrap();
        assert!(!t.get(f).unwrap().is_appendonly);
    }

    #[test]
    fn platform_safe_names_are_deterministic() {
        let mut t = tree();
        let a = t.allocate_dentry(t.root(), "Readme", false, false, true).unwrap();
        let b = t.allocate_dentry(t.root(), "README", false, false, true).unwrap();
        let c = t.allocate_dentry(t.root(), "unique", false, false, true).unwrap();
        t.assign_platform_safe_names(t.root());

        let safe_a = t.get(a).unwrap().platform_safe_name.clone();
        let safe_b = t.get(b).unwrap().platform_safe_name.clone();
        assert_eq!(safe_a, format!("Readme~{}", t.get(a).unwrap().uid));
        assert_eq!(safe_b, format!("README~{}", t.get(b).unwrap().uid));
        assert_eq!(t.get(c).unwrap().platform_safe_name, "unique");
    }

    #[test]
    fn uid_invariants_are_checked() {
        let mut t = tree();
        let f = t.allocate_dentry(t.root(), "f", false, false, true).unwrap();
        t.check_uids().unwrap();
        t.get_mut(f).unwrap().uid = ROOT_UID;
        assert!(t.check_uids().is_err());
    }

    #[test]
    fn dump_tree_reflects_structure() {
        let mut t = tree();
        let d = t.allocate_dentry(t.root(), "docs", true, false, true).unwrap();
        t.allocate_dentry(d, "a.txt", false, false, true).unwrap();
        let dump = t.dump_tree();
        assert_eq!(dump["children"][0]["name"], "docs");
        assert_eq!(dump["children"][0]["children"][0]["name"], "a.txt");
    }
}
