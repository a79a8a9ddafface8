use thiserror::Error;

pub type Result<T> = std::result::Result<T, LtfsError>;

/// Error kinds raised by the format engine.
///
/// Soft conditions (early warning, filemark seen, underrun, cleaning
/// requests) are not errors; they travel on [`crate::tape::Position`] and
/// on read/write results instead.
#[derive(Error, Debug)]
pub enum LtfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("null or missing argument: {0}")]
    NullArg(&'static str),

    #[error("invalid path or name: {0}")]
    InvalidPath(String),

    #[error("name exceeds {max} code points: {name}")]
    NameTooLong { name: String, max: usize },

    #[error("invalid data placement policy: {0}")]
    PolicyInvalid(String),

    #[error("empty rule in data placement policy: {0}")]
    PolicyEmptyRule(String),

    #[error("data placement policy may not be updated on this volume")]
    PolicyImmutable,

    #[error("unsupported index version: {0}")]
    UnsupportedIndexVersion(String),

    #[error("invalid label: {0}")]
    LabelInvalid(String),

    #[error("labels disagree between partitions: {0}")]
    LabelMismatch(String),

    #[error("invalid index: {0}")]
    IndexInvalid(String),

    #[error("medium is not partitioned for this format")]
    NotPartitioned,

    #[error("{0} file element(s) carry both a symlink target and extents")]
    SymlinkConflict(usize),

    #[error("unsupported medium: {0}")]
    UnsupportedMedium(String),

    #[error("unsupported drive firmware: {0}")]
    UnsupportedFirmware(String),

    #[error("device is busy")]
    DeviceBusy,

    #[error("cannot open device: {0}")]
    DeviceUnopenable(String),

    #[error("no medium in drive")]
    NoMedium,

    #[error("medium is write protected")]
    WriteProtect,

    #[error("write error: {0}")]
    WriteError(String),

    #[error("no space left on medium")]
    NoSpace,

    #[error("less space remaining than requested")]
    LessSpace,

    #[error("end of data detected")]
    EodDetected,

    #[error("end-of-data marker missing on partition {0}")]
    EodMissing(char),

    #[error("encryption error: {0}")]
    CryptoError(String),

    #[error("an encryption key is required to access this medium")]
    KeyRequired,

    #[error("drive is reserved by another host")]
    ReservationConflict,

    #[error("drive reservation was preempted")]
    ReservationPreempted,

    #[error("key registration was preempted")]
    RegistrationPreempted,

    #[error("medium may have been changed")]
    MediumMayBeChanged,

    #[error("record length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("record longer than read buffer ({record} > {buffer})")]
    Overrun { record: usize, buffer: usize },

    #[error("logical block protection check failed at partition {partition} block {block}")]
    LbpReadError { partition: u8, block: u64 },

    #[error("device command timed out: {0}")]
    Timeout(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("out of memory: {0}")]
    NoMemory(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LtfsError {
    pub fn invalid_path<T: Into<String>>(msg: T) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub fn policy_invalid<T: Into<String>>(msg: T) -> Self {
        Self::PolicyInvalid(msg.into())
    }

    pub fn label_invalid<T: Into<String>>(msg: T) -> Self {
        Self::LabelInvalid(msg.into())
    }

    pub fn label_mismatch<T: Into<String>>(msg: T) -> Self {
        Self::LabelMismatch(msg.into())
    }

    pub fn index_invalid<T: Into<String>>(msg: T) -> Self {
        Self::IndexInvalid(msg.into())
    }

    pub fn write_error<T: Into<String>>(msg: T) -> Self {
        Self::WriteError(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Self::Internal(msg.into())
    }

    /// True if the error leaves the mount usable read-only rather than
    /// aborting it outright.
    pub fn demotes_to_read_only(&self) -> bool {
        matches!(
            self,
            Self::WriteProtect | Self::KeyRequired | Self::NoSpace | Self::LessSpace | Self::Timeout(_)
        )
    }
}
