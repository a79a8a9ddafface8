//! The index: one committed generation of the volume's tree.

use crate::dentry::{DentryId, DentryTree};
use crate::error::{LtfsError, Result};
use crate::index_criteria::IndexCriteria;
use crate::label::{FormatVersion, VERSION_MAX};
use crate::utils::LtfsTime;
use serde::Serialize;

/// Longest accepted index comment, in bytes.
pub const COMMENT_MAX: usize = 65536;

/// A `(partition letter, block)` tape location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapeLocation {
    pub partition: char,
    pub block: u64,
}

/// Cartridge lock state carried in the index (and mirrored to MAM).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum VolumeLockState {
    #[default]
    Unlocked,
    Locked,
    PermLocked,
}

impl VolumeLockState {
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "unlocked" => Ok(Self::Unlocked),
            "locked" => Ok(Self::Locked),
            "permlocked" => Ok(Self::PermLocked),
            other => Err(LtfsError::index_invalid(format!(
                "bad volumelockstate: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::PermLocked => "permlocked",
        }
    }
}

/// One generation of the on-tape index.
#[derive(Debug, Clone)]
pub struct Index {
    pub version: FormatVersion,
    pub creator: String,
    pub volume_uuid: String,
    /// Strictly increasing per committed generation; generation 0 is the
    /// freshly formatted cartridge before any data commit.
    pub generation: u64,
    pub update_time: LtfsTime,
    /// Where this index was written.
    pub self_location: TapeLocation,
    /// Where the previous generation was written; absent for generation 0.
    pub previous_location: Option<TapeLocation>,
    /// Policy as recorded on tape.
    pub original_criteria: IndexCriteria,
    /// Policy in effect (may be a mount-time override).
    pub criteria: IndexCriteria,
    pub criteria_allow_update: bool,
    pub comment: Option<String>,
    pub volume_lock_state: VolumeLockState,
    pub tree: DentryTree,
    /// Unknown top-level index tags, re-emitted verbatim.
    pub preserved_tags: Vec<Vec<u8>>,
    /// Dentries whose file element carried both a symlink target and
    /// extents.
    pub symlink_conflicts: Vec<DentryId>,
    /// Set when the tree diverges from the last committed generation.
    pub dirty: bool,
}

impl Index {
    /// A generation-0 index for a fresh format.
    pub fn new(volume_uuid: String, creator: String, blocksize: u64) -> Self {
        Self {
            version: VERSION_MAX,
            creator,
            volume_uuid,
            generation: 0,
            update_time: LtfsTime::now(),
            self_location: TapeLocation {
                partition: 'a',
                block: 0,
            },
            previous_location: None,
            original_criteria: IndexCriteria::none(),
            criteria: IndexCriteria::none(),
            criteria_allow_update: true,
            comment: None,
            volume_lock_state: VolumeLockState::Unlocked,
            tree: DentryTree::new(blocksize),
            preserved_tags: Vec::new(),
            symlink_conflicts: Vec::new(),
            dirty: false,
        }
    }

    /// Install a policy, recording it both as the on-tape original and
    /// as the active criteria.
    pub fn set_criteria(&mut self, criteria: IndexCriteria) {
        self.criteria = criteria.dup_rules();
        self.original_criteria = criteria;
    }

    /// Apply a mount-time override, leaving `original_criteria` (what
    /// future indexes record) untouched.
    pub fn override_criteria(&mut self, criteria: IndexCriteria) -> Result<()> {
        if !self.criteria_allow_update {
            return Err(LtfsError::PolicyImmutable);
        }
        self.criteria = criteria;
        Ok(())
    }

    pub fn set_comment(&mut self, comment: Option<String>) -> Result<()> {
        if let Some(c) = &comment {
            if c.len() > COMMENT_MAX {
                return Err(LtfsError::index_invalid(format!(
                    "comment exceeds {COMMENT_MAX} bytes"
                )));
            }
        }
        self.comment = comment;
        Ok(())
    }

    /// Error status for symlink/extent conflicts found during parse.
    pub fn conflict_status(&self) -> Result<()> {
        if self.symlink_conflicts.is_empty() {
            Ok(())
        } else {
            Err(LtfsError::SymlinkConflict(self.symlink_conflicts.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_index_is_generation_zero() {
        let idx = Index::new("u".into(), "c".into(), 524288);
        assert_eq!(idx.generation, 0);
        assert!(idx.previous_location.is_none());
        assert_eq!(idx.tree.get(idx.tree.root()).unwrap().uid, 1);
        idx.conflict_status().unwrap();
    }

    #[test]
    fn override_respects_allowpolicyupdate() {
        let mut idx = Index::new("u".into(), "c".into(), 524288);
        idx.set_criteria(IndexCriteria::parse("size=1M/name=*.xml").unwrap());
        idx.criteria_allow_update = false;
        let err = idx.override_criteria(IndexCriteria::parse("size=2M").unwrap());
        assert!(matches!(err, Err(LtfsError::PolicyImmutable)));
        assert_eq!(idx.criteria.max_filesize, 1024 * 1024);

        idx.criteria_allow_update = true;
        idx.override_criteria(IndexCriteria::parse("size=2M").unwrap()).unwrap();
        assert_eq!(idx.criteria.max_filesize, 2 * 1024 * 1024);
        // The on-tape original is untouched by the override.
        assert_eq!(idx.original_criteria.max_filesize, 1024 * 1024);
    }

    #[test]
    fn comment_length_is_bounded() {
        let mut idx = Index::new("u".into(), "c".into(), 524288);
        idx.set_comment(Some("archive set 7".into())).unwrap();
        assert!(idx.set_comment(Some("x".repeat(COMMENT_MAX + 1))).is_err());
    }

    #[test]
    fn volume_lock_state_round_trips() {
        for s in ["unlocked", "locked", "permlocked"] {
            assert_eq!(VolumeLockState::parse(s).unwrap().as_str(), s);
        }
        assert!(VolumeLockState::parse("open").is_err());
    }
}
