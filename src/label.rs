//! Volume labels: the 80-byte ANSI VOL1 record and the LTFS XML label.
//!
//! Both partitions carry the same label except for the
//! `location/partition` letter; the mount path cross-checks everything
//! else and refuses the volume on a mismatch.

use crate::error::{LtfsError, Result};
use crate::utils::LtfsTime;
use serde::Serialize;
use std::fmt;

/// Oldest label/index schema this implementation reads.
pub const VERSION_MIN: FormatVersion = FormatVersion::new(1, 0, 0);
/// Newest schema this implementation reads, and the one it writes.
pub const VERSION_MAX: FormatVersion = FormatVersion::new(2, 4, 0);
/// Schema version from which uid, backuptime, and sparse extents exist.
pub const VERSION_UID: FormatVersion = FormatVersion::new(2, 0, 0);

pub const DEFAULT_BLOCKSIZE: u32 = 524288;
pub const DEFAULT_CREATOR: &str = concat!("ltfs-format ", env!("CARGO_PKG_VERSION"));

/// A schema version, `X.Y.Z`. The legacy spelling `1.0` reads as 1.0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FormatVersion(u32, u32, u32);

impl FormatVersion {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self(x, y, z)
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text == "1.0" {
            return Ok(Self(1, 0, 0));
        }
        let mut parts = text.split('.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| LtfsError::UnsupportedIndexVersion(text.to_string()))
        };
        let v = Self(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(LtfsError::UnsupportedIndexVersion(text.to_string()));
        }
        Ok(v)
    }

    /// Parse and confirm the version lies in the supported range.
    pub fn parse_supported(text: &str) -> Result<Self> {
        let v = Self::parse(text)?;
        if !(VERSION_MIN..=VERSION_MAX).contains(&v) {
            return Err(LtfsError::UnsupportedIndexVersion(text.to_string()));
        }
        Ok(v)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Index/data partition letters as recorded in the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionMap {
    pub index: char,
    pub data: char,
}

impl Default for PartitionMap {
    fn default() -> Self {
        Self {
            index: 'a',
            data: 'b',
        }
    }
}

impl PartitionMap {
    /// Partition number for a letter. The index partition is partition 0.
    pub fn number_of(&self, letter: char) -> Option<u8> {
        if letter == self.index {
            Some(0)
        } else if letter == self.data {
            Some(1)
        } else {
            None
        }
    }

    pub fn letter_of(&self, number: u8) -> Option<char> {
        match number {
            0 => Some(self.index),
            1 => Some(self.data),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for c in [self.index, self.data] {
            if !c.is_ascii_lowercase() {
                return Err(LtfsError::label_invalid(format!(
                    "partition id must be a single lowercase letter, got {c:?}"
                )));
            }
        }
        if self.index == self.data {
            return Err(LtfsError::label_invalid(
                "index and data partitions share a letter",
            ));
        }
        Ok(())
    }
}

/// The per-partition LTFS XML label.
#[derive(Debug, Clone)]
pub struct LtfsLabel {
    pub version: FormatVersion,
    pub creator: String,
    pub format_time: LtfsTime,
    pub volume_uuid: String,
    /// Letter of the partition this copy of the label sits on.
    pub this_partition: char,
    pub partitions: PartitionMap,
    pub blocksize: u32,
    pub compression: bool,
}

impl LtfsLabel {
    pub fn new(volume_uuid: String, blocksize: u32, compression: bool) -> Self {
        Self {
            version: VERSION_MAX,
            creator: DEFAULT_CREATOR.to_string(),
            format_time: LtfsTime::now(),
            volume_uuid,
            this_partition: 'a',
            partitions: PartitionMap::default(),
            blocksize,
            compression,
        }
    }

    /// The same label stamped for the other partition.
    pub fn for_partition(&self, letter: char) -> Self {
        let mut l = self.clone();
        l.this_partition = letter;
        l
    }

    pub fn validate(&self) -> Result<()> {
        self.partitions.validate()?;
        if self.partitions.number_of(self.this_partition).is_none() {
            return Err(LtfsError::label_invalid(format!(
                "this_partition {:?} is not in the partition map",
                self.this_partition
            )));
        }
        if self.blocksize == 0 {
            return Err(LtfsError::label_invalid("blocksize is zero"));
        }
        Ok(())
    }

    /// Cross-check the two partitions' labels: everything but
    /// `this_partition` must agree.
    pub fn check_consistent(&self, other: &LtfsLabel) -> Result<()> {
        if self.volume_uuid != other.volume_uuid {
            return Err(LtfsError::label_mismatch("volume uuid"));
        }
        if self.blocksize != other.blocksize {
            return Err(LtfsError::label_mismatch("blocksize"));
        }
        if self.compression != other.compression {
            return Err(LtfsError::label_mismatch("compression flag"));
        }
        if self.partitions != other.partitions {
            return Err(LtfsError::label_mismatch("partition map"));
        }
        if self.format_time != other.format_time {
            return Err(LtfsError::label_mismatch("format time"));
        }
        if self.this_partition == other.this_partition {
            return Err(LtfsError::label_mismatch(
                "both labels claim the same partition",
            ));
        }
        Ok(())
    }
}

/// Length of the ANSI VOL1 record.
pub const VOL1_LEN: usize = 80;

/// Build the VOL1 label: `VOL1`, the six-character volume serial, an
/// accessibility space, the `LTFS` owner identifier at offset 37, and the
/// label-standard version `4` in the last byte.
pub fn build_vol1(volume_serial: &str) -> Result<[u8; VOL1_LEN]> {
    if volume_serial.len() > 6 || !volume_serial.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LtfsError::label_invalid(format!(
            "volume serial must be up to six ASCII alphanumerics: {volume_serial:?}"
        )));
    }
    let mut out = [b' '; VOL1_LEN];
    out[0..4].copy_from_slice(b"VOL1");
    out[4..4 + volume_serial.len()].copy_from_slice(volume_serial.as_bytes());
    out[37..41].copy_from_slice(b"LTFS");
    out[79] = b'4';
    Ok(out)
}

/// Verify a VOL1 record and return the volume serial.
pub fn parse_vol1(record: &[u8]) -> Result<String> {
    if record.len() != VOL1_LEN {
        return Err(LtfsError::label_invalid(format!(
            "VOL1 record is {} bytes, expected {}",
            record.len(),
            VOL1_LEN
        )));
    }
    if &record[0..4] != b"VOL1" {
        return Err(LtfsError::label_invalid("missing VOL1 signature"));
    }
    if &record[37..41] != b"LTFS" {
        return Err(LtfsError::label_invalid("owner identifier is not LTFS"));
    }
    if record[79] != b'4' {
        return Err(LtfsError::label_invalid("unexpected label standard version"));
    }
    let serial = std::str::from_utf8(&record[4..10])
        .map_err(|_| LtfsError::label_invalid("volume serial is not ASCII"))?;
    Ok(serial.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(FormatVersion::parse("2.4.0").unwrap(), FormatVersion::new(2, 4, 0));
        assert_eq!(FormatVersion::parse("1.0").unwrap(), FormatVersion::new(1, 0, 0));
        assert!(FormatVersion::parse("2.4").is_err());
        assert!(FormatVersion::parse("2.4.0.1").is_err());
        assert!(FormatVersion::parse("a.b.c").is_err());
        assert!(FormatVersion::parse_supported("2.5.0").is_err());
        assert!(FormatVersion::parse_supported("0.9.0").is_err());
        assert_eq!(FormatVersion::new(2, 4, 0).to_string(), "2.4.0");
    }

    #[test]
    fn version_ordering_gates_features() {
        assert!(FormatVersion::parse("2.0.0").unwrap() >= VERSION_UID);
        assert!(FormatVersion::parse("1.0").unwrap() < VERSION_UID);
    }

    #[test]
    fn partition_map_maps_letters_to_numbers() {
        let map = PartitionMap::default();
        assert_eq!(map.number_of('a'), Some(0));
        assert_eq!(map.number_of('b'), Some(1));
        assert_eq!(map.number_of('c'), None);
        assert_eq!(map.letter_of(0), Some('a'));
        map.validate().unwrap();

        let bad = PartitionMap { index: 'a', data: 'a' };
        assert!(bad.validate().is_err());
        let upper = PartitionMap { index: 'A', data: 'b' };
        assert!(upper.validate().is_err());
    }

    #[test]
    fn vol1_round_trip() {
        let rec = build_vol1("TAPE01").unwrap();
        assert_eq!(rec.len(), 80);
        assert_eq!(&rec[0..4], b"VOL1");
        assert_eq!(parse_vol1(&rec).unwrap(), "TAPE01");

        let empty = build_vol1("").unwrap();
        assert_eq!(parse_vol1(&empty).unwrap(), "");
    }

    #[test]
    fn vol1_rejects_bad_input() {
        assert!(build_vol1("TOOLONG1").is_err());
        assert!(build_vol1("bad/sn").is_err());
        assert!(parse_vol1(&[0u8; 80]).is_err());
        assert!(parse_vol1(&[0u8; 79]).is_err());

        let mut rec = build_vol1("TAPE01").unwrap();
        rec[38] = b'X';
        assert!(parse_vol1(&rec).is_err());
    }

    #[test]
    fn labels_cross_check() {
        let a = LtfsLabel::new("f81d4fae-7dec-11d0-a765-00a0c91e6bf6".into(), 524288, true);
        let b = a.for_partition('b');
        a.check_consistent(&b).unwrap();

        let mut wrong = b.clone();
        wrong.blocksize = 65536;
        assert!(a.check_consistent(&wrong).is_err());

        // Two labels claiming the same partition is also a mismatch.
        assert!(a.check_consistent(&a.clone()).is_err());
    }
}
