//! In-memory tape drive.
//!
//! Records and filemarks are kept per partition; writing in the middle of
//! a partition discards everything after the head, exactly like a real
//! drive. The backend also models write protection, WORM media, the
//! early-warning threshold, cartridge memory, and reservation, which is
//! enough to exercise every mount, commit, and recovery path without
//! hardware.

use super::lbp::{self, LbpMethod};
use super::{
    MamAttribute, Position, ReadOutcome, RemainingCapacity, SpaceKind, TapeDrive, WriteStatus,
};
use crate::error::{LtfsError, Result};
use std::collections::HashMap;
use tracing::{debug, trace};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
enum Record {
    Data(Vec<u8>),
    Filemark,
}

impl Record {
    fn cost(&self) -> u64 {
        match self {
            Record::Data(d) => d.len() as u64,
            Record::Filemark => 0,
        }
    }
}

/// An in-memory tape cartridge plus the drive holding it.
pub struct MemTape {
    partitions: Vec<Vec<Record>>,
    capacity: Vec<u64>,
    used: Vec<u64>,
    head_partition: u8,
    head_index: usize,

    total_capacity: u64,
    partitioned: bool,

    opened: bool,
    loaded: bool,
    reserved: bool,
    removal_prevented: bool,
    write_protect: bool,
    worm: bool,
    append_only: bool,
    compression: bool,
    lbp: LbpMethod,
    ew_latched: bool,

    mam: HashMap<(u8, u16), Vec<u8>>,
    reservation_key: [u8; 8],
    foreign_reservation: Option<[u8; 8]>,
    encryption_key: Option<Vec<u8>>,
    key_alias: Option<String>,
}

impl Default for MemTape {
    fn default() -> Self {
        Self::with_capacity(256 * MIB)
    }
}

impl MemTape {
    pub fn new() -> Self {
        Self::default()
    }

    /// A blank, unpartitioned cartridge of the given size.
    pub fn with_capacity(total_bytes: u64) -> Self {
        Self {
            partitions: vec![Vec::new()],
            capacity: vec![total_bytes],
            used: vec![0],
            head_partition: 0,
            head_index: 0,
            total_capacity: total_bytes,
            partitioned: false,
            opened: false,
            loaded: false,
            reserved: false,
            removal_prevented: false,
            write_protect: false,
            worm: false,
            append_only: false,
            compression: true,
            lbp: LbpMethod::None,
            ew_latched: false,
            mam: HashMap::new(),
            reservation_key: *b"LTFSHOST",
            foreign_reservation: None,
            encryption_key: None,
            key_alias: None,
        }
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    pub fn set_write_protect(&mut self, on: bool) {
        self.write_protect = on;
    }

    pub fn set_worm(&mut self, on: bool) {
        self.worm = on;
    }

    /// Pretend another initiator holds a persistent reservation.
    pub fn set_foreign_reservation(&mut self, key: Option<[u8; 8]>) {
        self.foreign_reservation = key;
    }

    /// Test hook: drop every record from `keep` onward, simulating a
    /// crash that left the partition without its trailing filemark or
    /// with a truncated EOD.
    pub fn truncate_records(&mut self, partition: u8, keep: usize) {
        let p = partition as usize;
        if p < self.partitions.len() {
            self.partitions[p].truncate(keep);
            self.used[p] = self.partitions[p].iter().map(Record::cost).sum();
        }
    }

    /// Test hook: flip one byte of a data record to provoke an LBP
    /// verification failure.
    pub fn corrupt_record(&mut self, partition: u8, block: u64) {
        if let Some(Record::Data(d)) = self
            .partitions
            .get_mut(partition as usize)
            .and_then(|p| p.get_mut(block as usize))
        {
            if let Some(byte) = d.first_mut() {
                *byte ^= 0xff;
            }
        }
    }

    /// Number of records (blocks and filemarks) on a partition.
    pub fn record_count(&self, partition: u8) -> usize {
        self.partitions
            .get(partition as usize)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_ready(&self) -> Result<()> {
        if !self.opened {
            return Err(LtfsError::DeviceUnopenable("device not open".to_string()));
        }
        if !self.loaded {
            return Err(LtfsError::NoMedium);
        }
        Ok(())
    }

    fn check_partition(&self, partition: u8) -> Result<()> {
        if (partition as usize) >= self.partitions.len() {
            return Err(LtfsError::NotPartitioned);
        }
        Ok(())
    }

    fn ew_point(&self, partition: usize) -> u64 {
        // Early warning at 90% of the partition.
        self.capacity[partition] - self.capacity[partition] / 10
    }

    fn truncate_tail(&mut self) {
        let p = self.head_partition as usize;
        if self.head_index < self.partitions[p].len() {
            self.partitions[p].truncate(self.head_index);
            self.used[p] = self.partitions[p].iter().map(Record::cost).sum();
        }
    }
}

impl TapeDrive for MemTape {
    fn open(&mut self, devname: &str) -> Result<()> {
        debug!(devname, "opening in-memory tape drive");
        if self.foreign_reservation.is_some() {
            return Err(LtfsError::ReservationConflict);
        }
        self.opened = true;
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        if !self.opened {
            return Err(LtfsError::DeviceUnopenable("never opened".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.reserved = false;
        Ok(())
    }

    fn reserve(&mut self) -> Result<()> {
        self.check_ready()?;
        if self.foreign_reservation.is_some() {
            return Err(LtfsError::ReservationConflict);
        }
        self.reserved = true;
        trace!(key = %hex::encode(self.reservation_key), "drive reserved");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.reserved = false;
        Ok(())
    }

    fn prevent_removal(&mut self) -> Result<()> {
        self.check_ready()?;
        self.removal_prevented = true;
        Ok(())
    }

    fn allow_removal(&mut self) -> Result<()> {
        self.removal_prevented = false;
        Ok(())
    }

    fn load(&mut self, _force: bool) -> Result<()> {
        if !self.opened {
            return Err(LtfsError::DeviceUnopenable("device not open".to_string()));
        }
        self.loaded = true;
        self.head_partition = 0;
        self.head_index = 0;
        Ok(())
    }

    fn unload(&mut self, keep_on_drive: bool) -> Result<()> {
        if self.removal_prevented {
            return Err(LtfsError::DeviceBusy);
        }
        if !keep_on_drive {
            self.loaded = false;
        }
        self.head_partition = 0;
        self.head_index = 0;
        Ok(())
    }

    fn test_unit_ready(&mut self) -> Result<()> {
        self.check_ready()
    }

    fn read_position(&mut self) -> Result<Position> {
        self.check_ready()?;
        let p = self.head_partition as usize;
        let filemarks = self.partitions[p][..self.head_index]
            .iter()
            .filter(|r| matches!(r, Record::Filemark))
            .count() as u64;
        Ok(Position {
            partition: self.head_partition,
            block: self.head_index as u64,
            filemarks,
            early_warning: self.ew_latched,
            prog_early_warning: self.ew_latched,
        })
    }

    fn locate(&mut self, partition: u8, block: u64) -> Result<()> {
        self.check_ready()?;
        self.check_partition(partition)?;
        let len = self.partitions[partition as usize].len() as u64;
        if block > len {
            return Err(LtfsError::EodDetected);
        }
        self.head_partition = partition;
        self.head_index = block as usize;
        Ok(())
    }

    fn space(&mut self, kind: SpaceKind) -> Result<()> {
        self.check_ready()?;
        let p = self.head_partition as usize;
        let len = self.partitions[p].len();
        match kind {
            SpaceKind::Records(n) => {
                let target = self.head_index as i64 + n;
                if target < 0 || target as usize > len {
                    return Err(LtfsError::EodDetected);
                }
                self.head_index = target as usize;
            }
            SpaceKind::Filemarks(n) if n >= 0 => {
                let mut remaining = n;
                while remaining > 0 {
                    match self.partitions[p].get(self.head_index) {
                        Some(Record::Filemark) => {
                            remaining -= 1;
                            self.head_index += 1;
                        }
                        Some(Record::Data(_)) => self.head_index += 1,
                        None => return Err(LtfsError::EodDetected),
                    }
                }
            }
            SpaceKind::Filemarks(n) => {
                // Backward: stop on the BOP side of the nth filemark.
                let mut remaining = -n;
                while remaining > 0 {
                    if self.head_index == 0 {
                        return Err(LtfsError::EodDetected);
                    }
                    self.head_index -= 1;
                    if matches!(self.partitions[p][self.head_index], Record::Filemark) {
                        remaining -= 1;
                    }
                }
            }
            SpaceKind::ToEod => self.head_index = len,
        }
        Ok(())
    }

    fn seek_eod(&mut self, partition: u8) -> Result<()> {
        self.check_ready()?;
        self.check_partition(partition)?;
        self.head_partition = partition;
        self.head_index = self.partitions[partition as usize].len();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _unusual_size: bool) -> Result<ReadOutcome> {
        self.check_ready()?;
        let p = self.head_partition as usize;
        match self.partitions[p].get(self.head_index) {
            None => Ok(ReadOutcome::EndOfData),
            Some(Record::Filemark) => {
                self.head_index += 1;
                Ok(ReadOutcome::Filemark)
            }
            Some(Record::Data(stored)) => {
                let block = self.head_index as u64;
                let payload_len = lbp::verify(self.lbp, stored).ok_or(LtfsError::LbpReadError {
                    partition: self.head_partition,
                    block,
                })?;
                if payload_len > buf.len() {
                    self.head_index += 1;
                    return Err(LtfsError::Overrun {
                        record: payload_len,
                        buffer: buf.len(),
                    });
                }
                buf[..payload_len].copy_from_slice(&stored[..payload_len]);
                self.head_index += 1;
                Ok(ReadOutcome::Data(payload_len))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<WriteStatus> {
        self.check_ready()?;
        if self.write_protect {
            return Err(LtfsError::WriteProtect);
        }
        let p = self.head_partition as usize;
        if self.append_only && self.head_index < self.partitions[p].len() {
            return Err(LtfsError::write_error(
                "overwrite attempted in append-only mode",
            ));
        }
        if self.worm && self.head_index < self.partitions[p].len() {
            return Err(LtfsError::write_error("overwrite attempted on WORM medium"));
        }

        self.truncate_tail();
        if self.used[p] + buf.len() as u64 > self.capacity[p] {
            return Err(LtfsError::NoSpace);
        }

        let mut record = buf.to_vec();
        lbp::protect(self.lbp, &mut record);
        self.used[p] += buf.len() as u64;
        self.partitions[p].push(Record::Data(record));
        self.head_index += 1;

        let mut status = WriteStatus {
            written: buf.len(),
            early_warning: false,
            prog_early_warning: false,
        };
        if self.used[p] > self.ew_point(p) {
            if !self.ew_latched {
                self.ew_latched = true;
                status.early_warning = true;
            } else {
                status.prog_early_warning = true;
            }
        }
        Ok(status)
    }

    fn write_filemarks(&mut self, count: u8, _immed: bool) -> Result<()> {
        self.check_ready()?;
        if self.write_protect {
            return Err(LtfsError::WriteProtect);
        }
        self.truncate_tail();
        let p = self.head_partition as usize;
        for _ in 0..count {
            self.partitions[p].push(Record::Filemark);
            self.head_index += 1;
        }
        Ok(())
    }

    fn format_partitions(&mut self, index_partition_mib: u64) -> Result<()> {
        self.check_ready()?;
        if self.write_protect {
            return Err(LtfsError::WriteProtect);
        }
        let index_cap = (index_partition_mib * MIB)
            .clamp(MIB, self.total_capacity / 2);
        self.partitions = vec![Vec::new(), Vec::new()];
        // Partition 0 is the index partition; the data partition takes
        // the rest of the cartridge.
        self.capacity = vec![index_cap, self.total_capacity - index_cap];
        self.used = vec![0, 0];
        self.head_partition = 0;
        self.head_index = 0;
        self.partitioned = true;
        self.ew_latched = false;
        debug!(
            index_mib = index_cap / MIB,
            data_mib = (self.total_capacity - index_cap) / MIB,
            "medium partitioned"
        );
        Ok(())
    }

    fn unformat(&mut self) -> Result<()> {
        self.check_ready()?;
        if self.write_protect {
            return Err(LtfsError::WriteProtect);
        }
        self.partitions = vec![Vec::new()];
        self.capacity = vec![self.total_capacity];
        self.used = vec![0];
        self.head_partition = 0;
        self.head_index = 0;
        self.partitioned = false;
        self.ew_latched = false;
        Ok(())
    }

    fn reset_capacity(&mut self) -> Result<()> {
        self.check_ready()
    }

    fn erase(&mut self, _long_erase: bool) -> Result<()> {
        self.check_ready()?;
        let p = self.head_partition as usize;
        self.truncate_tail();
        self.used[p] = self.partitions[p].iter().map(Record::cost).sum();
        Ok(())
    }

    fn set_compression(&mut self, enable: bool) -> Result<()> {
        self.compression = enable;
        Ok(())
    }

    fn set_append_only(&mut self, enable: bool) -> Result<()> {
        self.append_only = enable;
        Ok(())
    }

    fn set_lbp(&mut self, method: LbpMethod) -> Result<()> {
        self.lbp = method;
        Ok(())
    }

    fn remaining_capacity(&mut self) -> Result<RemainingCapacity> {
        self.check_ready()?;
        let mut cap = RemainingCapacity::default();
        cap.max_p0 = self.capacity[0] / MIB;
        cap.remain_p0 = (self.capacity[0] - self.used[0]) / MIB;
        if self.partitions.len() > 1 {
            cap.max_p1 = self.capacity[1] / MIB;
            cap.remain_p1 = (self.capacity[1] - self.used[1]) / MIB;
        }
        Ok(cap)
    }

    fn read_attribute(&mut self, partition: u8, id: u16) -> Result<Option<Vec<u8>>> {
        self.check_ready()?;
        Ok(self.mam.get(&(partition, id)).cloned())
    }

    fn write_attribute(&mut self, partition: u8, attr: &MamAttribute) -> Result<()> {
        self.check_ready()?;
        self.mam.insert((partition, attr.id), attr.data.clone());
        Ok(())
    }

    fn clear_attribute(&mut self, partition: u8, id: u16) -> Result<()> {
        self.check_ready()?;
        self.mam.remove(&(partition, id));
        Ok(())
    }

    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.encryption_key = Some(key.to_vec());
        Ok(())
    }

    fn clear_key(&mut self) -> Result<()> {
        self.encryption_key = None;
        Ok(())
    }

    fn get_key_alias(&mut self) -> Result<Option<String>> {
        Ok(self.key_alias.clone())
    }

    fn is_write_protected(&self) -> bool {
        self.write_protect
    }

    fn is_worm(&self) -> bool {
        self.worm
    }

    fn exact_lengths(&self) -> bool {
        true
    }

    fn max_block_size(&self) -> u32 {
        1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_tape() -> MemTape {
        let mut t = MemTape::with_capacity(16 * MIB);
        t.open("mem:test").unwrap();
        t.load(false).unwrap();
        t.format_partitions(4).unwrap();
        t
    }

    #[test]
    fn write_then_read_round_trips_records() {
        let mut t = ready_tape();
        t.write(b"hello tape").unwrap();
        t.write_filemarks(1, false).unwrap();
        t.locate(0, 0).unwrap();

        let mut buf = vec![0u8; 64];
        assert_eq!(t.read(&mut buf, false).unwrap(), ReadOutcome::Data(10));
        assert_eq!(&buf[..10], b"hello tape");
        assert_eq!(t.read(&mut buf, false).unwrap(), ReadOutcome::Filemark);
        assert_eq!(t.read(&mut buf, false).unwrap(), ReadOutcome::EndOfData);
    }

    #[test]
    fn writing_mid_partition_discards_the_tail() {
        let mut t = ready_tape();
        t.write(b"one").unwrap();
        t.write(b"two").unwrap();
        t.write(b"three").unwrap();
        t.locate(0, 1).unwrap();
        t.write(b"TWO!").unwrap();
        assert_eq!(t.record_count(0), 2);

        t.locate(0, 1).unwrap();
        let mut buf = vec![0u8; 16];
        assert_eq!(t.read(&mut buf, false).unwrap(), ReadOutcome::Data(4));
        assert_eq!(&buf[..4], b"TWO!");
        assert_eq!(t.read(&mut buf, false).unwrap(), ReadOutcome::EndOfData);
    }

    #[test]
    fn locate_then_read_position_is_consistent() {
        let mut t = ready_tape();
        for _ in 0..5 {
            t.write(b"x").unwrap();
        }
        t.locate(0, 3).unwrap();
        let pos = t.read_position().unwrap();
        assert_eq!((pos.partition, pos.block), (0, 3));
        // readpos is idempotent
        assert_eq!(t.read_position().unwrap(), pos);
    }

    #[test]
    fn space_filemarks_backward_stops_before_the_mark() {
        let mut t = ready_tape();
        t.write(b"a").unwrap();
        t.write_filemarks(1, false).unwrap();
        t.write(b"b").unwrap();
        t.write_filemarks(1, false).unwrap();

        t.space(SpaceKind::Filemarks(-1)).unwrap();
        assert_eq!(t.read_position().unwrap().block, 3);
        t.space(SpaceKind::Filemarks(-1)).unwrap();
        assert_eq!(t.read_position().unwrap().block, 1);
    }

    #[test]
    fn early_warning_is_reported_once_then_prog() {
        let mut t = MemTape::with_capacity(4 * MIB);
        t.open("mem:ew").unwrap();
        t.load(false).unwrap();
        t.format_partitions(1).unwrap();

        // Partition 0 (index) has 1 MiB capacity, EW at 90%; 64 KiB
        // writes leave room for prog-early-warning reports between the
        // threshold and end of medium.
        let chunk = vec![0u8; 64 * 1024];
        let mut saw_first_ew = false;
        let mut saw_prog = false;
        loop {
            match t.write(&chunk) {
                Ok(st) => {
                    if st.early_warning {
                        assert!(!saw_first_ew, "early warning latched twice");
                        saw_first_ew = true;
                    } else if st.prog_early_warning {
                        saw_prog = true;
                    }
                }
                Err(LtfsError::NoSpace) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_first_ew);
        assert!(saw_prog);
    }

    #[test]
    fn write_protect_refuses_writes() {
        let mut t = ready_tape();
        t.set_write_protect(true);
        assert!(matches!(t.write(b"x"), Err(LtfsError::WriteProtect)));
        assert!(matches!(t.write_filemarks(1, false), Err(LtfsError::WriteProtect)));
    }

    #[test]
    fn lbp_corruption_is_detected_on_read() {
        let mut t = ready_tape();
        t.set_lbp(LbpMethod::Crc32c).unwrap();
        t.write(b"protected payload").unwrap();
        t.corrupt_record(0, 0);
        t.locate(0, 0).unwrap();
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            t.read(&mut buf, false),
            Err(LtfsError::LbpReadError { partition: 0, block: 0 })
        ));
    }

    #[test]
    fn foreign_reservation_surfaces_conflict() {
        let mut t = MemTape::new();
        t.open("mem:r").unwrap();
        t.load(false).unwrap();
        t.set_foreign_reservation(Some(*b"OTHRHOST"));
        assert!(matches!(t.reserve(), Err(LtfsError::ReservationConflict)));
    }

    #[test]
    fn overrun_is_an_error_underrun_is_not() {
        let mut t = ready_tape();
        t.write(&vec![7u8; 100]).unwrap();
        t.locate(0, 0).unwrap();
        let mut small = vec![0u8; 10];
        assert!(matches!(
            t.read(&mut small, false),
            Err(LtfsError::Overrun { record: 100, buffer: 10 })
        ));
        t.locate(0, 0).unwrap();
        let mut big = vec![0u8; 1000];
        assert_eq!(t.read(&mut big, true).unwrap(), ReadOutcome::Data(100));
    }
}
