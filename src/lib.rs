//! LTFS on-tape format engine.
//!
//! Presents a partitioned tape cartridge as a POSIX-like filesystem:
//! partition layout and volume labels, the XML index schema with its
//! dentry/extent tree, positioned tape I/O through a generic drive
//! contract, and the index partition criteria that decide which file
//! payloads are duplicated on the index partition.

pub mod cli;
pub mod dentry;
pub mod error;
pub mod external;
pub mod index;
pub mod index_criteria;
pub mod label;
pub mod logger;
pub mod namematch;
pub mod pathname;
pub mod tape;
pub mod utils;
pub mod volume;
pub mod xml;

pub use dentry::{Dentry, DentryId, DentryTree, ExtentInfo, XattrInfo};
pub use error::{LtfsError, Result};
pub use index::{Index, TapeLocation, VolumeLockState};
pub use index_criteria::IndexCriteria;
pub use label::{FormatVersion, LtfsLabel, PartitionMap};
pub use tape::{LbpMethod, MemTape, Position, ReadOutcome, SpaceKind, TapeDrive};
pub use volume::{CancelToken, FormatOptions, MountOptions, Volume};
