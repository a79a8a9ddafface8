//! Backend-independent tape drive contract.
//!
//! The core engine depends on exactly this capability set: positioning,
//! record I/O with filemark signalling, partition formatting, cartridge
//! memory (MAM) attributes, logical block protection, and reservation.
//! Vendor SCSI backends implement [`TapeDrive`] out of tree; the bundled
//! [`MemTape`] implements it in memory for tests and the `mem:` device
//! scheme.

pub mod lbp;
pub mod memtape;

pub use lbp::LbpMethod;
pub use memtape::MemTape;

use crate::error::Result;
use serde::Serialize;

/// Command timeouts, in seconds. Formatting and long erase run for tens
/// of minutes on real hardware.
pub mod timeouts {
    pub const OPEN: u64 = 30;
    pub const READ: u64 = 300;
    pub const WRITE: u64 = 600;
    pub const LOCATE: u64 = 600;
    pub const FORMAT: u64 = 2400;
    pub const LONG_ERASE: u64 = 64800;
}

/// The drive head location plus latched space warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    /// Partition number (0 or 1).
    pub partition: u8,
    /// Logical object position; filemarks occupy one position each.
    pub block: u64,
    /// Filemarks passed since the beginning of the partition.
    pub filemarks: u64,
    /// Remaining capacity dropped below the vendor threshold.
    pub early_warning: bool,
    /// Configurable analogue of `early_warning`.
    pub prog_early_warning: bool,
}

/// Argument to [`TapeDrive::space`]. Negative counts move toward BOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Records(i64),
    Filemarks(i64),
    ToEod,
}

/// Outcome of one record read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A record of this many bytes landed in the buffer. Shorter than the
    /// buffer is an underrun and is not an error.
    Data(usize),
    /// A zero-length record: a filemark. The head is past it.
    Filemark,
    /// No more records on this partition.
    EndOfData,
}

/// Outcome of one record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub written: usize,
    /// Set exactly once, on the write that crossed the early-warning
    /// threshold.
    pub early_warning: bool,
    /// Set on writes after the threshold until end of medium.
    pub prog_early_warning: bool,
}

/// Capacity report, in MiB per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemainingCapacity {
    pub max_p0: u64,
    pub max_p1: u64,
    pub remain_p0: u64,
    pub remain_p1: u64,
}

/// One cartridge memory attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MamAttribute {
    pub id: u16,
    pub data: Vec<u8>,
}

/// Cartridge memory attribute ids used by this format.
pub mod mam_id {
    pub const APP_VENDOR: u16 = 0x0800;
    pub const APP_NAME: u16 = 0x0801;
    pub const APP_VERSION: u16 = 0x0802;
    pub const TEXT_LABEL: u16 = 0x0803;
    pub const BARCODE: u16 = 0x0806;
    /// Binary coherency record, updated after every committed index.
    pub const COHERENCY: u16 = 0x080A;
    pub const APP_FORMAT_VERSION: u16 = 0x080B;
    pub const VOLUME_UUID: u16 = 0x0820;
    pub const VOLUME_LOCK_STATE: u16 = 0x1623;
}

/// Decoded contents of the binary coherency attribute (0x080A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coherency {
    pub generation: u64,
    pub partition: char,
    pub block: u64,
    pub uuid: String,
}

impl Coherency {
    /// Big-endian packed layout: generation, partition letter, block,
    /// then the 36-byte textual UUID.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 1 + 8 + 36);
        out.extend_from_slice(&self.generation.to_be_bytes());
        out.push(self.partition as u8);
        out.extend_from_slice(&self.block.to_be_bytes());
        out.extend_from_slice(self.uuid.as_bytes());
        out
    }

    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() != 8 + 1 + 8 + 36 {
            return None;
        }
        let generation = u64::from_be_bytes(data[0..8].try_into().ok()?);
        let partition = data[8] as char;
        let block = u64::from_be_bytes(data[9..17].try_into().ok()?);
        let uuid = std::str::from_utf8(&data[17..]).ok()?.to_string();
        Some(Self {
            generation,
            partition,
            block,
            uuid,
        })
    }
}

/// The tape drive contract. All operations block; callers serialize
/// access through the volume's drive mutex.
pub trait TapeDrive: Send {
    fn open(&mut self, devname: &str) -> Result<()>;
    fn reopen(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Register this host's reservation key and reserve the drive.
    fn reserve(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
    fn prevent_removal(&mut self) -> Result<()>;
    fn allow_removal(&mut self) -> Result<()>;

    fn load(&mut self, force: bool) -> Result<()>;
    fn unload(&mut self, keep_on_drive: bool) -> Result<()>;
    fn test_unit_ready(&mut self) -> Result<()>;

    fn read_position(&mut self) -> Result<Position>;
    fn locate(&mut self, partition: u8, block: u64) -> Result<()>;
    fn space(&mut self, kind: SpaceKind) -> Result<()>;
    fn seek_eod(&mut self, partition: u8) -> Result<()>;

    /// Read one record. `unusual_size` suppresses the length-mismatch
    /// diagnostics for deliberately short reads.
    fn read(&mut self, buf: &mut [u8], unusual_size: bool) -> Result<ReadOutcome>;
    /// Write one record at the current position; anything after it is
    /// discarded (tape append semantics).
    fn write(&mut self, buf: &[u8]) -> Result<WriteStatus>;
    fn write_filemarks(&mut self, count: u8, immed: bool) -> Result<()>;

    /// Partition the medium: partition 0 becomes the index partition of
    /// the given size in MiB, partition 1 takes the remainder.
    fn format_partitions(&mut self, index_partition_mib: u64) -> Result<()>;
    /// Restore the single-partition layout, discarding all content.
    fn unformat(&mut self) -> Result<()>;
    fn reset_capacity(&mut self) -> Result<()>;
    fn erase(&mut self, long_erase: bool) -> Result<()>;

    fn set_compression(&mut self, enable: bool) -> Result<()>;
    fn set_append_only(&mut self, enable: bool) -> Result<()>;
    fn set_lbp(&mut self, method: LbpMethod) -> Result<()>;

    fn remaining_capacity(&mut self) -> Result<RemainingCapacity>;

    fn read_attribute(&mut self, partition: u8, id: u16) -> Result<Option<Vec<u8>>>;
    fn write_attribute(&mut self, partition: u8, attr: &MamAttribute) -> Result<()>;
    /// Drop an attribute entirely (unformat cleanup).
    fn clear_attribute(&mut self, partition: u8, id: u16) -> Result<()>;

    fn set_key(&mut self, key: &[u8]) -> Result<()>;
    fn clear_key(&mut self) -> Result<()>;
    fn get_key_alias(&mut self) -> Result<Option<String>>;

    fn is_write_protected(&self) -> bool;
    fn is_worm(&self) -> bool;
    /// True when short reads report exact residual lengths (SILI-capable
    /// path). Backends that misreport lengths return false after their
    /// VOL1 probe and the block layer stops trusting residuals.
    fn exact_lengths(&self) -> bool;
    fn max_block_size(&self) -> u32;
}
