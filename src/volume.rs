//! Mount/commit coordinator.
//!
//! A [`Volume`] owns the drive handle, the label pair semantics, and the
//! current index generation. The drive mutex serializes all device I/O;
//! the index (and its dentry tree) sits behind its own rwlock. Commits
//! hold the drive mutex from the first positioning call through the
//! final filemark.

use crate::error::{LtfsError, Result};
use crate::index::{Index, TapeLocation, VolumeLockState};
use crate::index_criteria::IndexCriteria;
use crate::label::{self, LtfsLabel, PartitionMap, DEFAULT_BLOCKSIZE, DEFAULT_CREATOR};
use crate::tape::{
    mam_id, Coherency, LbpMethod, MamAttribute, ReadOutcome, SpaceKind, TapeDrive, WriteStatus,
};
use crate::xml::{self, reader, writer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many index constructs the mount scan will walk back through when
/// the newest candidates fail to parse.
const MAX_INDEX_SCAN: i64 = 8;

/// Cooperative cancellation flag, polled at drive-command entry and
/// between blocks in long I/O loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LtfsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Options for formatting a cartridge.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub blocksize: u32,
    /// Cartridge barcode / volume serial, up to six characters.
    pub volume_serial: String,
    pub volume_name: Option<String>,
    /// Data placement policy rule string (`size=...`/`name=...`).
    pub rules: Option<String>,
    /// Forbid later policy overrides (`allowpolicyupdate` = false).
    pub no_override: bool,
    pub compression: bool,
    pub index_partition_mib: u64,
    /// Reformat even if the cartridge already carries this format.
    pub force: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            blocksize: DEFAULT_BLOCKSIZE,
            volume_serial: String::new(),
            volume_name: None,
            rules: None,
            no_override: false,
            compression: true,
            index_partition_mib: 1024,
            force: false,
        }
    }
}

/// Options for mounting.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Replace the active policy for this mount, if the volume allows it.
    pub rules_override: Option<String>,
    /// Mount an older generation read-only (rollback).
    pub rollback: bool,
}

/// Why a volume is read-only, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyReason {
    WriteProtect,
    KeyRequired,
    EarlyWarning,
    Rollback,
    VolumeLocked,
    WriteFailure,
}

/// A mounted (or freshly formatted) LTFS volume.
pub struct Volume {
    drive: Mutex<Box<dyn TapeDrive>>,
    label: LtfsLabel,
    pub index: RwLock<Index>,
    read_only: Mutex<Option<ReadOnlyReason>>,
    /// Trailing filemark missing on the last index construct, per
    /// partition number; repaired by the next commit's leading filemark.
    missing_filemark: [AtomicBool; 2],
    cancel: CancelToken,
}

impl Volume {
    // ------------------------------------------------------------------
    // Format
    // ------------------------------------------------------------------

    /// Lay out a fresh cartridge: partition map, VOL1 and LTFS labels on
    /// both partitions, a generation-0 index on the index partition, and
    /// the identification attributes in cartridge memory.
    pub fn format(mut drive: Box<dyn TapeDrive>, opts: FormatOptions) -> Result<Volume> {
        let cancel = CancelToken::new();

        drive.reserve()?;
        drive.prevent_removal()?;

        if !opts.force && is_ltfs_formatted(drive.as_mut()) {
            drive.allow_removal()?;
            drive.release()?;
            return Err(LtfsError::label_invalid(
                "medium already carries an LTFS format (use force to reformat)",
            ));
        }

        let criteria = match &opts.rules {
            Some(rules) => IndexCriteria::parse(rules)?,
            None => IndexCriteria::none(),
        };

        info!(
            blocksize = opts.blocksize,
            serial = %opts.volume_serial,
            "formatting cartridge"
        );
        drive.format_partitions(opts.index_partition_mib)?;
        drive.set_compression(opts.compression)?;

        let volume_uuid = Uuid::new_v4().to_string();
        let label = LtfsLabel::new(volume_uuid.clone(), opts.blocksize, opts.compression);

        let mut index = Index::new(volume_uuid.clone(), DEFAULT_CREATOR.to_string(), opts.blocksize as u64);
        index.criteria_allow_update = !opts.no_override;
        index.set_criteria(criteria);
        if let Some(name) = &opts.volume_name {
            let root = index.tree.root();
            let d = index.tree.get_mut(root).unwrap();
            d.name = name.clone();
            d.platform_safe_name = name.clone();
        }

        // Both partitions get VOL1 + filemark + label + filemark.
        for partition in [0u8, 1u8] {
            cancel.check()?;
            let letter = label.partitions.letter_of(partition).unwrap();
            drive.locate(partition, 0)?;
            let vol1 = label::build_vol1(&opts.volume_serial)?;
            drive.write(&vol1)?;
            drive.write_filemarks(1, false)?;
            let xml = writer::write_label(&label.for_partition(letter))?;
            write_records(drive.as_mut(), &xml, opts.blocksize as usize, &cancel)?;
            drive.write_filemarks(1, false)?;
        }

        // The index partition also gets the generation-0 index construct:
        // filemark, index, filemark.
        drive.locate(0, 0)?;
        drive.seek_eod(0)?;
        drive.write_filemarks(1, false)?;
        let index_block = drive.read_position()?.block;
        index.self_location = TapeLocation {
            partition: label.partitions.index,
            block: index_block,
        };
        let xml = writer::write_index(&index)?;
        write_records(drive.as_mut(), &xml, opts.blocksize as usize, &cancel)?;
        drive.write_filemarks(1, false)?;

        write_identification_attributes(drive.as_mut(), &label, &opts)?;
        let coherency = Coherency {
            generation: 0,
            partition: label.partitions.index,
            block: index_block,
            uuid: volume_uuid,
        };
        drive.write_attribute(
            0,
            &MamAttribute {
                id: mam_id::COHERENCY,
                data: coherency.pack(),
            },
        )?;

        drive.allow_removal()?;
        info!(uuid = %label.volume_uuid, "format complete");

        Ok(Volume {
            drive: Mutex::new(drive),
            label,
            index: RwLock::new(index),
            read_only: Mutex::new(None),
            missing_filemark: [AtomicBool::new(false), AtomicBool::new(false)],
            cancel,
        })
    }

    /// Remove this format: restore the single-partition layout and drop
    /// the cartridge memory attributes the format owns.
    pub fn unformat(mut drive: Box<dyn TapeDrive>, long_erase: bool) -> Result<()> {
        drive.reserve()?;
        drive.prevent_removal()?;

        if !is_ltfs_formatted(drive.as_mut()) {
            drive.allow_removal()?;
            drive.release()?;
            return Err(LtfsError::NotPartitioned);
        }

        drive.unformat()?;
        if long_erase {
            drive.locate(0, 0)?;
            drive.erase(true)?;
        }
        for id in [
            mam_id::APP_VENDOR,
            mam_id::APP_NAME,
            mam_id::APP_VERSION,
            mam_id::TEXT_LABEL,
            mam_id::BARCODE,
            mam_id::COHERENCY,
            mam_id::APP_FORMAT_VERSION,
            mam_id::VOLUME_UUID,
            mam_id::VOLUME_LOCK_STATE,
        ] {
            drive.clear_attribute(0, id)?;
            let _ = drive.clear_attribute(1, id);
        }
        drive.allow_removal()?;
        drive.release()?;
        info!("unformat complete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mount
    // ------------------------------------------------------------------

    /// Mount a formatted cartridge: validate both labels, find the
    /// newest consistent index, and build the tree.
    pub fn mount(mut drive: Box<dyn TapeDrive>, opts: MountOptions) -> Result<Volume> {
        let cancel = CancelToken::new();

        drive.load(false)?;
        test_unit_ready_with_retry(drive.as_mut())?;
        drive.reserve()?;

        // Labels from both partitions; everything but the partition
        // letter must agree.
        let label_a = read_partition_label(drive.as_mut(), 0)?;
        let label_b = read_partition_label(drive.as_mut(), 1)?;
        label_a.check_consistent(&label_b)?;
        let label = if label_a.this_partition == label_a.partitions.index {
            label_a
        } else {
            label_b
        };
        let blocksize = label.blocksize as usize;

        // Newest index from the index partition.
        let (mut index, saw_filemark) = find_latest_index(drive.as_mut(), &label, &cancel)?;
        if index.volume_uuid != label.volume_uuid {
            return Err(LtfsError::label_mismatch(
                "index volume uuid does not match the labels",
            ));
        }
        let missing_filemark = !saw_filemark;
        if missing_filemark {
            warn!("index construct is missing its trailing filemark; will repair on next commit");
        }

        // Surface symlink/extent conflicts with enough detail for the
        // operator; the dentries themselves are kept.
        for id in &index.symlink_conflicts {
            if let Some(d) = index.tree.get(*id) {
                warn!(
                    uid = d.uid,
                    name = %d.name,
                    "file carries both a symlink target and extents"
                );
            }
        }

        verify_back_pointer(drive.as_mut(), &label, &index, blocksize)?;

        // Mount-time policy override.
        if let Some(rules) = &opts.rules_override {
            if drive.is_worm() {
                return Err(LtfsError::PolicyImmutable);
            }
            let criteria = IndexCriteria::parse(rules)?;
            index.override_criteria(criteria)?;
            info!("data placement policy overridden for this mount");
        }

        // Read-only demotion cases.
        let mut read_only = None;
        if drive.is_write_protected() {
            read_only = Some(ReadOnlyReason::WriteProtect);
        } else if index.volume_lock_state != VolumeLockState::Unlocked {
            read_only = Some(ReadOnlyReason::VolumeLocked);
        } else if opts.rollback {
            read_only = Some(ReadOnlyReason::Rollback);
        } else if drive.read_position()?.early_warning {
            read_only = Some(ReadOnlyReason::EarlyWarning);
        }
        if let Some(reason) = read_only {
            warn!(?reason, "volume mounted read-only");
        }

        index.tree.report_open_for_write();
        info!(
            uuid = %label.volume_uuid,
            generation = index.generation,
            dentries = index.tree.len(),
            "volume mounted"
        );

        let volume = Volume {
            drive: Mutex::new(drive),
            label,
            index: RwLock::new(index),
            read_only: Mutex::new(read_only),
            missing_filemark: [
                AtomicBool::new(missing_filemark),
                AtomicBool::new(false),
            ],
            cancel,
        };
        Ok(volume)
    }

    /// Release the drive and hand it back for reuse. Uncommitted
    /// changes are lost, as after a crash; callers commit first.
    pub fn unmount(self) -> Result<Box<dyn TapeDrive>> {
        let mut drive = self.drive.into_inner();
        drive.release()?;
        drive.unload(true)?;
        Ok(drive)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn label(&self) -> &LtfsLabel {
        &self.label
    }

    pub fn partitions(&self) -> PartitionMap {
        self.label.partitions
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.lock().is_some()
    }

    pub fn read_only_reason(&self) -> Option<ReadOnlyReason> {
        *self.read_only.lock()
    }

    pub fn set_read_only(&self, reason: ReadOnlyReason) {
        let mut state = self.read_only.lock();
        if state.is_none() {
            *state = Some(reason);
        }
    }

    /// True when the last index construct on a partition lacked its
    /// trailing filemark at mount time; the next commit repairs it.
    pub fn missing_trailing_filemark(&self, partition: u8) -> bool {
        self.missing_filemark
            .get(partition as usize)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            Err(LtfsError::WriteProtect)
        } else {
            Ok(())
        }
    }

    /// True when this file's payload should be duplicated on the index
    /// partition: the policy matches its name and its size fits the
    /// policy bound.
    pub fn qualifies_for_index_partition(&self, name: &str, size: u64) -> bool {
        let index = self.index.read();
        index.criteria.matches(name) && size <= index.criteria.max_filesize
    }

    // ------------------------------------------------------------------
    // File I/O
    // ------------------------------------------------------------------

    /// Append file data on the data partition and record the extent.
    /// Qualifying payloads are duplicated onto the index partition.
    pub fn write_file(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.cancel.check()?;
        if data.is_empty() {
            return Ok(());
        }
        let blocksize = self.label.blocksize as usize;
        let data_letter = self.label.partitions.data;

        let mut index = self.index.write();
        let id = index
            .tree
            .lookup_path(path)
            .ok_or_else(|| LtfsError::invalid_path(path))?;
        {
            let d = index.tree.get(id).unwrap();
            if d.is_directory || d.is_symlink {
                return Err(LtfsError::invalid_path(path));
            }
            if d.is_immutable {
                return Err(LtfsError::WriteProtect);
            }
            if d.is_appendonly && offset < d.size {
                return Err(LtfsError::WriteProtect);
            }
        }

        let mut drive = self.drive.lock();
        drive.seek_eod(1)?;
        let start_block = drive.read_position()?.block;
        let status = write_records(drive.as_mut(), data, blocksize, &self.cancel)?;
        if status.early_warning || status.prog_early_warning {
            warn!("data partition early warning during file write");
        }

        index.tree.add_extent(
            id,
            crate::dentry::ExtentInfo {
                partition: data_letter,
                start_block,
                byte_offset: 0,
                byte_count: data.len() as u64,
                file_offset: offset,
            },
        )?;
        let d = index.tree.get_mut(id).unwrap();
        d.size = d.size.max(offset + data.len() as u64);
        d.modify_time = crate::utils::LtfsTime::now();
        d.change_time = d.modify_time;
        let name = d.name.clone();
        let size = d.size;
        index.dirty = true;

        // Policy-qualified payloads also land on the index partition for
        // fast access.
        let qualifies = index.criteria.matches(&name) && size <= index.criteria.max_filesize;
        if qualifies {
            drive.seek_eod(0)?;
            write_records(drive.as_mut(), data, blocksize, &self.cancel)?;
            debug!(file = %name, "payload duplicated on the index partition");
        }
        Ok(())
    }

    /// Read file data by walking the extent list; holes and the tail
    /// past the last extent read as zeros.
    pub fn read_file(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.cancel.check()?;
        let index = self.index.read();
        let id = index
            .tree
            .lookup_path(path)
            .ok_or_else(|| LtfsError::invalid_path(path))?;
        let d = index.tree.get(id).unwrap();
        if d.is_directory {
            return Err(LtfsError::invalid_path(path));
        }

        if offset >= d.size {
            return Ok(0);
        }
        let want = buf.len().min((d.size - offset) as usize);
        let buf = &mut buf[..want];
        buf.fill(0);

        let blocksize = self.label.blocksize as u64;
        let mut drive = self.drive.lock();
        for extent in &d.extents {
            let ext_start = extent.file_offset;
            let ext_end = extent.end();
            let read_start = offset.max(ext_start);
            let read_end = (offset + want as u64).min(ext_end);
            if read_start >= read_end {
                continue;
            }

            let partition = self
                .label
                .partitions
                .number_of(extent.partition)
                .ok_or_else(|| LtfsError::index_invalid("extent on unmapped partition"))?;

            // Position of the wanted range inside the extent's records.
            let mut tape_off = extent.byte_offset + (read_start - ext_start);
            let mut remaining = (read_end - read_start) as usize;
            let mut out_pos = (read_start - offset) as usize;
            let mut block = extent.start_block + tape_off / blocksize;
            tape_off %= blocksize;

            let mut record = vec![0u8; blocksize as usize];
            while remaining > 0 {
                self.cancel.check()?;
                drive.locate(partition, block)?;
                let got = match drive.read(&mut record, false)? {
                    ReadOutcome::Data(n) => n,
                    ReadOutcome::Filemark => {
                        return Err(LtfsError::index_invalid(
                            "filemark inside a file extent",
                        ))
                    }
                    ReadOutcome::EndOfData => return Err(LtfsError::EodDetected),
                };
                if tape_off as usize >= got {
                    return Err(LtfsError::index_invalid("extent past record end"));
                }
                let avail = (got - tape_off as usize).min(remaining);
                buf[out_pos..out_pos + avail]
                    .copy_from_slice(&record[tape_off as usize..tape_off as usize + avail]);
                out_pos += avail;
                remaining -= avail;
                tape_off = 0;
                block += 1;
            }
        }
        Ok(want)
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Write the current tree as a new index generation to both
    /// partitions and update the cartridge memory coherency attribute.
    pub fn commit(&self) -> Result<()> {
        self.check_writable()?;
        self.cancel.check()?;

        let blocksize = self.label.blocksize as usize;
        let mut index = self.index.write();
        let mut drive = self.drive.lock();

        let new_generation = index.generation + 1;
        let previous = index.self_location;

        // Index partition copy: leading filemark, index, trailing
        // filemark. The leading filemark also repairs a construct that
        // lost its trailing filemark in a crash.
        drive.seek_eod(0)?;
        drive.write_filemarks(1, false)?;
        let index_block = drive.read_position()?.block;

        // Rewrites always use the current schema; a legacy index is
        // upgraded the first time it is committed.
        index.version = label::VERSION_MAX;
        index.generation = new_generation;
        index.update_time = crate::utils::LtfsTime::now();
        index.previous_location = Some(previous);
        index.self_location = TapeLocation {
            partition: self.label.partitions.index,
            block: index_block,
        };

        let xml = writer::write_index(&index)?;
        write_records(drive.as_mut(), &xml, blocksize, &self.cancel)?;
        drive.write_filemarks(1, false)?;
        self.missing_filemark[0].store(false, Ordering::SeqCst);

        // Data partition copy: same bytes. Early warning here aborts the
        // copy; the index-partition copy remains authoritative and the
        // volume goes read-only.
        drive.seek_eod(1)?;
        drive.write_filemarks(1, false)?;
        let data_block = drive.read_position()?.block;
        match write_records(drive.as_mut(), &xml, blocksize, &self.cancel) {
            Ok(status) if status.early_warning || status.prog_early_warning => {
                warn!("early warning during data partition index copy; volume goes read-only");
                self.set_read_only(ReadOnlyReason::EarlyWarning);
                index.dirty = false;
                return Ok(());
            }
            Ok(_) => {}
            Err(LtfsError::NoSpace) => {
                warn!("no space for the data partition index copy; volume goes read-only");
                self.set_read_only(ReadOnlyReason::WriteFailure);
                index.dirty = false;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        drive.write_filemarks(1, false)?;
        self.missing_filemark[1].store(false, Ordering::SeqCst);

        // Cartridge memory coherency for both partitions.
        for (partition, letter, block) in [
            (0u8, self.label.partitions.index, index_block),
            (1u8, self.label.partitions.data, data_block),
        ] {
            let coherency = Coherency {
                generation: new_generation,
                partition: letter,
                block,
                uuid: self.label.volume_uuid.clone(),
            };
            drive.write_attribute(
                partition,
                &MamAttribute {
                    id: mam_id::COHERENCY,
                    data: coherency.pack(),
                },
            )?;
        }

        drive.write_attribute(
            0,
            &MamAttribute {
                id: mam_id::VOLUME_LOCK_STATE,
                data: index.volume_lock_state.as_str().as_bytes().to_vec(),
            },
        )?;

        index.dirty = false;
        info!(generation = new_generation, "index committed");
        Ok(())
    }

    /// Enable logical block protection on the drive for this volume.
    pub fn set_lbp(&self, method: LbpMethod) -> Result<()> {
        self.drive.lock().set_lbp(method)
    }

    /// Read the decoded coherency attribute for a partition.
    pub fn read_coherency(&self, partition: u8) -> Result<Option<Coherency>> {
        let data = self.drive.lock().read_attribute(partition, mam_id::COHERENCY)?;
        Ok(data.as_deref().and_then(Coherency::unpack))
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

/// Write a byte stream as a run of block-sized records (short final
/// record allowed). Returns the status of the last write.
fn write_records(
    drive: &mut dyn TapeDrive,
    data: &[u8],
    blocksize: usize,
    cancel: &CancelToken,
) -> Result<WriteStatus> {
    let mut status = WriteStatus {
        written: 0,
        early_warning: false,
        prog_early_warning: false,
    };
    for chunk in data.chunks(blocksize) {
        cancel.check()?;
        let st = drive.write(chunk)?;
        status.written += st.written;
        status.early_warning |= st.early_warning;
        status.prog_early_warning |= st.prog_early_warning;
    }
    Ok(status)
}

/// Retry TEST UNIT READY a few times to ride out unit-attention after a
/// load.
fn test_unit_ready_with_retry(drive: &mut dyn TapeDrive) -> Result<()> {
    let mut last = Ok(());
    for _ in 0..3 {
        last = drive.test_unit_ready();
        match &last {
            Ok(()) => return Ok(()),
            Err(LtfsError::DeviceBusy) | Err(LtfsError::MediumMayBeChanged) => continue,
            Err(_) => break,
        }
    }
    last
}

/// Quick probe: does the medium start with a valid VOL1/LTFS label pair?
fn is_ltfs_formatted(drive: &mut dyn TapeDrive) -> bool {
    read_partition_label(drive, 0).is_ok()
}

/// Read and validate VOL1 + LTFS label at the beginning of a partition.
fn read_partition_label(drive: &mut dyn TapeDrive, partition: u8) -> Result<LtfsLabel> {
    drive.locate(partition, 0)?;

    let mut vol1 = vec![0u8; label::VOL1_LEN];
    match drive.read(&mut vol1, true)? {
        ReadOutcome::Data(n) if n == label::VOL1_LEN => {}
        ReadOutcome::Data(n) => {
            return Err(LtfsError::label_invalid(format!(
                "VOL1 record is {n} bytes"
            )))
        }
        _ => return Err(LtfsError::label_invalid("no VOL1 record")),
    }
    label::parse_vol1(&vol1)?;

    match drive.read(&mut [0u8; 4], true)? {
        ReadOutcome::Filemark => {}
        _ => return Err(LtfsError::label_invalid("missing filemark after VOL1")),
    }

    // The label is small; a generous cap covers any valid one.
    let (blob, _saw_fm) = read_label_blob(drive)?;
    reader::parse_label(&blob)
}

/// Read records up to the next filemark (label area; block size is not
/// yet known, so a fixed cap per record is used).
fn read_label_blob(drive: &mut dyn TapeDrive) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        match drive.read(&mut buf, true)? {
            ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::Filemark => return Ok((out, true)),
            ReadOutcome::EndOfData => return Ok((out, false)),
        }
    }
}

/// Locate and parse the newest valid index on the index partition.
///
/// The scan starts at EOD and walks back over filemarks; the cartridge
/// memory coherency attribute is tried first as a shortcut. Returns the
/// index and whether its trailing filemark was present.
fn find_latest_index(
    drive: &mut dyn TapeDrive,
    label: &LtfsLabel,
    cancel: &CancelToken,
) -> Result<(Index, bool)> {
    let blocksize = label.blocksize as usize;

    // Fast path: the coherency attribute names the newest index block.
    if let Ok(Some(data)) = drive.read_attribute(0, mam_id::COHERENCY) {
        if let Some(coherency) = Coherency::unpack(&data) {
            if coherency.uuid == label.volume_uuid
                && coherency.partition == label.partitions.index
            {
                if let Ok(()) = drive.locate(0, coherency.block) {
                    if let Ok((blob, saw_fm)) = xml::read_tape_blob(drive, blocksize) {
                        if let Ok(idx) = reader::parse_index(&blob, label.blocksize as u64) {
                            if idx.generation == coherency.generation {
                                debug!(
                                    generation = idx.generation,
                                    "index located via cartridge memory coherency"
                                );
                                return Ok((idx, saw_fm));
                            }
                        }
                    }
                }
            }
        }
    }

    // Scan: the newest construct ends at EOD. Each attempt walks one
    // more construct back.
    let mut parse_error: Option<LtfsError> = None;
    for back in 1..=MAX_INDEX_SCAN {
        cancel.check()?;
        match try_read_index_construct(drive, back, blocksize) {
            Ok(Some((blob, saw_fm))) => {
                match reader::parse_index(&blob, label.blocksize as u64) {
                    Ok(idx) => return Ok((idx, saw_fm)),
                    Err(e) => {
                        warn!(attempt = back, error = %e, "index candidate failed to parse");
                        parse_error = Some(e);
                    }
                }
            }
            Ok(None) => continue,
            Err(LtfsError::EodDetected) => break,
            Err(e) => return Err(e),
        }
    }

    Err(parse_error.unwrap_or_else(|| LtfsError::index_invalid("no index found on the index partition")))
}

/// Position before the `back`th filemark from EOD and try to read an
/// index blob there. `None` means the slot held no document (e.g. the
/// trailing filemark of a complete construct).
fn try_read_index_construct(
    drive: &mut dyn TapeDrive,
    back: i64,
    blocksize: usize,
) -> Result<Option<(Vec<u8>, bool)>> {
    drive.seek_eod(0)?;
    drive.space(SpaceKind::Filemarks(-back))?;
    match drive.read(&mut [0u8; 4], true)? {
        ReadOutcome::Filemark => {}
        _ => return Ok(None),
    }
    let (blob, saw_fm) = xml::read_tape_blob(drive, blocksize)?;
    if blob.is_empty() {
        Ok(None)
    } else {
        Ok(Some((blob, saw_fm)))
    }
}

/// One-step back-pointer verification: the previous generation must
/// parse and carry a strictly smaller generation number.
fn verify_back_pointer(
    drive: &mut dyn TapeDrive,
    label: &LtfsLabel,
    index: &Index,
    blocksize: usize,
) -> Result<()> {
    let Some(prev) = index.previous_location else {
        return Ok(());
    };
    let partition = label
        .partitions
        .number_of(prev.partition)
        .ok_or_else(|| LtfsError::index_invalid("back-pointer to unmapped partition"))?;
    drive.locate(partition, prev.block)?;
    let (blob, _) = xml::read_tape_blob(drive, blocksize)?;
    let prev_index = reader::parse_index(&blob, label.blocksize as u64)?;
    if prev_index.generation >= index.generation {
        return Err(LtfsError::index_invalid(format!(
            "generation not monotonic: {} then {}",
            prev_index.generation, index.generation
        )));
    }
    Ok(())
}

/// Identification attributes written at format time.
fn write_identification_attributes(
    drive: &mut dyn TapeDrive,
    label: &LtfsLabel,
    opts: &FormatOptions,
) -> Result<()> {
    let attrs: Vec<(u16, Vec<u8>)> = vec![
        (mam_id::APP_VENDOR, b"OPEN".to_vec()),
        (mam_id::APP_NAME, b"ltfs-format".to_vec()),
        (
            mam_id::APP_VERSION,
            env!("CARGO_PKG_VERSION").as_bytes().to_vec(),
        ),
        (
            mam_id::TEXT_LABEL,
            opts.volume_name.clone().unwrap_or_default().into_bytes(),
        ),
        (mam_id::BARCODE, opts.volume_serial.clone().into_bytes()),
        (
            mam_id::APP_FORMAT_VERSION,
            label.version.to_string().into_bytes(),
        ),
        (mam_id::VOLUME_UUID, label.volume_uuid.clone().into_bytes()),
    ];
    for (id, data) in attrs {
        drive.write_attribute(0, &MamAttribute { id, data })?;
    }
    Ok(())
}
