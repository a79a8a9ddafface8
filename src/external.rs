//! Seams to external collaborators: the key manager and a
//! filesystem-operations adapter for mount glue (FUSE and friends).

use crate::dentry::DentryId;
use crate::error::{LtfsError, Result};
use crate::pathname;
use crate::volume::Volume;
use serde::Serialize;

/// Key-manager interface. Plugin internals (key stores, wrapping) live
/// outside the engine; the engine only asks for the data key of a
/// volume and reports the alias in diagnostics.
pub trait KeyManager: Send + Sync {
    /// The data key for a volume, or `None` when the volume is not
    /// encrypted under this manager.
    fn fetch_key(&self, volume_uuid: &str) -> Result<Option<Vec<u8>>>;

    /// Human-readable alias of the active key, for operator messages.
    fn key_alias(&self, volume_uuid: &str) -> Result<Option<String>>;
}

/// A key manager for unencrypted deployments.
pub struct NoKeyManager;

impl KeyManager for NoKeyManager {
    fn fetch_key(&self, _volume_uuid: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn key_alias(&self, _volume_uuid: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Attributes reported to the host filesystem layer. Timestamps are
/// clamped here and nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttr {
    pub uid: u64,
    pub size: u64,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub readonly: bool,
    pub nlink: u32,
    pub modify_secs: i64,
    pub create_secs: i64,
    pub access_secs: i64,
    pub change_secs: i64,
}

/// One readdir entry.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub platform_safe_name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Path-based filesystem operations over a mounted volume.
///
/// This is the surface the mount glue calls; it owns no state beyond
/// the volume reference and translates between paths and the tree.
pub struct FilesystemOps<'v> {
    volume: &'v Volume,
}

impl<'v> FilesystemOps<'v> {
    pub fn new(volume: &'v Volume) -> Self {
        Self { volume }
    }

    fn resolve(&self, path: &str) -> Result<DentryId> {
        self.volume
            .index
            .read()
            .tree
            .lookup_path(path)
            .ok_or_else(|| LtfsError::invalid_path(path))
    }

    fn split_parent<'a>(&self, path: &'a str) -> Result<(DentryId, &'a str)> {
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = match trimmed.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(LtfsError::invalid_path(path));
        }
        let parent = self.resolve(if dir.is_empty() { "/" } else { dir })?;
        Ok((parent, name))
    }

    pub fn getattr(&self, path: &str) -> Result<FileAttr> {
        let id = self.resolve(path)?;
        let index = self.volume.index.read();
        let d = index
            .tree
            .get(id)
            .ok_or_else(|| LtfsError::invalid_path(path))?;
        Ok(FileAttr {
            uid: d.uid,
            size: d.size,
            is_directory: d.is_directory,
            is_symlink: d.is_symlink,
            readonly: d.readonly,
            nlink: d.link_count(&index.tree),
            modify_secs: d.modify_time.clamped_secs(),
            create_secs: d.creation_time.clamped_secs(),
            access_secs: d.access_time.clamped_secs(),
            change_secs: d.change_time.clamped_secs(),
        })
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let id = self.resolve(path)?;
        let index = self.volume.index.read();
        let d = index
            .tree
            .get(id)
            .ok_or_else(|| LtfsError::invalid_path(path))?;
        if !d.is_directory {
            return Err(LtfsError::invalid_path(path));
        }
        Ok(d.children
            .iter()
            .filter_map(|c| index.tree.get(*c))
            .map(|c| DirEntry {
                name: c.name.clone(),
                platform_safe_name: c.platform_safe_name.clone(),
                is_directory: c.is_directory,
                size: c.size,
            })
            .collect())
    }

    pub fn create(&self, path: &str) -> Result<u64> {
        let (parent, name) = self.split_parent(path)?;
        let name = pathname::format(name, true, false)?;
        let mut index = self.volume.index.write();
        if index.tree.lookup(parent, &name).is_some() {
            return Err(LtfsError::invalid_path(format!("exists: {path}")));
        }
        let id = index.tree.allocate_dentry(parent, &name, false, false, true)?;
        index.dirty = true;
        Ok(index.tree.get(id).unwrap().uid)
    }

    pub fn mkdir(&self, path: &str) -> Result<u64> {
        let (parent, name) = self.split_parent(path)?;
        let name = pathname::format(name, true, false)?;
        let mut index = self.volume.index.write();
        if index.tree.lookup(parent, &name).is_some() {
            return Err(LtfsError::invalid_path(format!("exists: {path}")));
        }
        let id = index.tree.allocate_dentry(parent, &name, true, false, true)?;
        index.dirty = true;
        Ok(index.tree.get(id).unwrap().uid)
    }

    pub fn symlink(&self, path: &str, target: &str) -> Result<u64> {
        pathname::validate_target(target)?;
        let (parent, name) = self.split_parent(path)?;
        let name = pathname::format(name, true, false)?;
        let mut index = self.volume.index.write();
        if index.tree.lookup(parent, &name).is_some() {
            return Err(LtfsError::invalid_path(format!("exists: {path}")));
        }
        let id = index.tree.allocate_dentry(parent, &name, false, true, true)?;
        let d = index.tree.get_mut(id).unwrap();
        d.symlink_target = Some(target.to_string());
        let uid = d.uid;
        index.dirty = true;
        Ok(uid)
    }

    pub fn readlink(&self, path: &str) -> Result<String> {
        let id = self.resolve(path)?;
        let index = self.volume.index.read();
        index
            .tree
            .get(id)
            .and_then(|d| d.symlink_target.clone())
            .ok_or_else(|| LtfsError::invalid_path(path))
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        {
            let d = index
                .tree
                .get(id)
                .ok_or_else(|| LtfsError::invalid_path(path))?;
            if d.is_directory {
                return Err(LtfsError::invalid_path(path));
            }
            if d.is_immutable || d.is_appendonly {
                return Err(LtfsError::WriteProtect);
            }
        }
        index.tree.free_dentry(id)?;
        index.dirty = true;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        {
            let d = index
                .tree
                .get(id)
                .ok_or_else(|| LtfsError::invalid_path(path))?;
            if !d.is_directory {
                return Err(LtfsError::invalid_path(path));
            }
            if !d.children.is_empty() {
                return Err(LtfsError::invalid_path(format!("not empty: {path}")));
            }
        }
        index.tree.free_dentry(id)?;
        index.dirty = true;
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (old_parent, old_name) = self.split_parent(from)?;
        let (new_parent, new_name) = self.split_parent(to)?;
        let new_name = pathname::format(new_name, true, false)?;
        let mut index = self.volume.index.write();
        index.tree.rename(old_parent, old_name, new_parent, &new_name)?;
        index.dirty = true;
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        {
            let d = index
                .tree
                .get(id)
                .ok_or_else(|| LtfsError::invalid_path(path))?;
            if d.is_immutable || d.is_appendonly {
                return Err(LtfsError::WriteProtect);
            }
        }
        index.tree.truncate(id, size)?;
        index.dirty = true;
        Ok(())
    }

    /// Mark or clear the open-for-write flag; serialized in the index so
    /// a crash is visible on the next mount.
    pub fn set_open_for_write(&self, path: &str, open: bool) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        index
            .tree
            .get_mut(id)
            .ok_or_else(|| LtfsError::invalid_path(path))?
            .open_for_write = open;
        index.dirty = true;
        Ok(())
    }

    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.volume.read_file(path, offset, buf)
    }

    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.volume.write_file(path, offset, data)
    }

    pub fn get_xattr(&self, path: &str, key: &str) -> Result<Vec<u8>> {
        let id = self.resolve(path)?;
        let index = self.volume.index.read();
        index
            .tree
            .get_xattr(id, key)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| LtfsError::invalid_path(format!("no such xattr: {key}")))
    }

    pub fn set_xattr(&self, path: &str, key: &str, value: &[u8]) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        index.tree.set_xattr(id, key, value)?;
        index.dirty = true;
        Ok(())
    }

    pub fn remove_xattr(&self, path: &str, key: &str) -> Result<()> {
        let id = self.resolve(path)?;
        let mut index = self.volume.index.write();
        index.tree.remove_xattr(id, key)?;
        index.dirty = true;
        Ok(())
    }

    pub fn list_xattrs(&self, path: &str) -> Result<Vec<String>> {
        let id = self.resolve(path)?;
        let index = self.volume.index.read();
        Ok(index
            .tree
            .get(id)
            .map(|d| d.xattrs.iter().map(|x| x.key.clone()).collect())
            .unwrap_or_default())
    }
}
