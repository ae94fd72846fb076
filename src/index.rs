//! Index file manager.
//!
//! The index is a dense array of fixed-size [`crate::layout::IndexRecord`]s,
//! one per stored seqnum, so `seqnum → file offset` is a pure function
//! (spec §9: "sparse indexes were rejected"). This module cross-checks the
//! index against the data file at open time, optionally rebuilding it from
//! scratch, and appends new index entries as the journal grows.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::data::{self, DataScan, RecordOutcome};
use crate::error::JournalError;
use crate::layout::{self, FileHeader, IndexRecord, HEADER_SIZE, INDEX_RECORD_SIZE};

/// The journal's fully recovered in-memory state after open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveredState {
    pub seqnum1: u64,
    pub timestamp1: u64,
    pub seqnum2: u64,
    pub timestamp2: u64,
    pub dat_end: u64,
    pub empty: bool,
}

/// Creates a brand-new index file at `path`. Fails if it already exists.
pub fn create(path: &Path, info: &str) -> Result<(), JournalError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| JournalError::IndexOpen(e.to_string()))?;

    let header = FileHeader::new(info);
    use std::io::Write;
    file.write_all(&header.encode())
        .map_err(|e| JournalError::IndexOpen(e.to_string()))?;
    file.sync_all()?;
    Ok(())
}

/// Finds the last non-zero index record without reading the data file, by
/// walking backward from the last complete 24-byte slot. Used for the fast
/// (`check == false`) path.
fn last_nonzero_backward(idx: &File, idx_len: u64) -> Result<Option<(u64, IndexRecord)>, JournalError> {
    if idx_len <= HEADER_SIZE {
        return Ok(None);
    }
    let slots = (idx_len - HEADER_SIZE) / INDEX_RECORD_SIZE;
    let mut i = slots;
    while i > 0 {
        i -= 1;
        let pos = HEADER_SIZE + i * INDEX_RECORD_SIZE;
        let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
        idx.read_exact_at(&mut buf, pos)?;
        let rec = IndexRecord::decode(&buf);
        if !rec.is_unused() {
            return Ok(Some((i, rec)));
        }
    }
    Ok(None)
}

/// Walks the index forward, verifying each record against its neighbour and
/// (redundantly, for integrity) against the data record it points to. Used
/// for the thorough (`check == true`) path. Stops at the first zero record.
fn last_nonzero_forward(
    idx: &File,
    idx_len: u64,
    dat: &File,
    dat_len: u64,
    seqnum1: u64,
    timestamp1: u64,
) -> Result<Option<(u64, IndexRecord)>, JournalError> {
    let slots = if idx_len <= HEADER_SIZE {
        0
    } else {
        (idx_len - HEADER_SIZE) / INDEX_RECORD_SIZE
    };

    let mut last: Option<(u64, IndexRecord)> = None;

    for i in 0..slots {
        let pos = HEADER_SIZE + i * INDEX_RECORD_SIZE;
        let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
        idx.read_exact_at(&mut buf, pos)?;
        let rec = IndexRecord::decode(&buf);
        if rec.is_unused() {
            break;
        }

        if let Some((_, prev)) = last {
            if rec.seqnum != prev.seqnum + 1
                || rec.timestamp < prev.timestamp
                || rec.pos < prev.pos + layout::DATA_RECORD_SIZE
            {
                return Err(JournalError::InvalidIndexFormat(format!(
                    "non-monotonic index record at slot {i}"
                )));
            }
        } else if rec.seqnum != seqnum1 || rec.timestamp != timestamp1 || rec.pos != HEADER_SIZE {
            return Err(JournalError::InvalidIndexFormat(
                "first index record does not match data file".to_string(),
            ));
        }

        match data::try_read_record(dat, rec.pos, dat_len)? {
            RecordOutcome::Valid { header, .. }
                if header.seqnum == rec.seqnum && header.timestamp == rec.timestamp => {}
            _ => {
                return Err(JournalError::InvalidIndexFormat(format!(
                    "index slot {i} does not match its data record"
                )));
            }
        }

        last = Some((i, rec));
    }

    Ok(last)
}

/// Appends one index record at the dense slot for `rec.seqnum`.
pub fn append_record(idx: &File, seqnum1: u64, rec: IndexRecord) -> Result<(), JournalError> {
    let pos = layout::index_slot_pos(seqnum1, rec.seqnum);
    idx.write_all_at(&rec.encode(), pos)
        .map_err(|e| JournalError::IndexWrite(e.to_string()))?;
    Ok(())
}

/// Opens the index, cross-checks it against the data file, and catches the
/// index up with any data records written after the last index flush
/// (the crash window between a durable data append and its index append).
pub fn open_and_cross_check(
    idx: &File,
    dat: &File,
    data_scan: &DataScan,
    check: bool,
) -> Result<RecoveredState, JournalError> {
    let idx_len = layout::file_len(idx)?;
    if idx_len < HEADER_SIZE {
        return Err(JournalError::InvalidIndexFormat(
            "file shorter than header".to_string(),
        ));
    }
    let mut header_buf = vec![0u8; HEADER_SIZE as usize];
    idx.read_exact_at(&mut header_buf, 0)?;
    FileHeader::decode(&header_buf).map_err(|e| JournalError::InvalidIndexFormat(e.to_string()))?;

    let (seqnum1, timestamp1) = match data_scan {
        DataScan::Empty => {
            // Data is empty; the index must be empty too.
            if idx_len > HEADER_SIZE {
                let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
                idx.read_exact_at(&mut buf, HEADER_SIZE)?;
                if !IndexRecord::decode(&buf).is_unused() {
                    return Err(JournalError::InvalidIndexFormat(
                        "index is non-empty but data file is empty".to_string(),
                    ));
                }
            }
            return Ok(RecoveredState {
                empty: true,
                ..RecoveredState::default()
            });
        }
        DataScan::FirstOnly {
            seqnum1,
            timestamp1,
        } => (*seqnum1, *timestamp1),
        DataScan::Full {
            seqnum1,
            timestamp1,
            ..
        } => (*seqnum1, *timestamp1),
    };

    let dat_len = layout::file_len(dat)?;

    let last = if check {
        last_nonzero_forward(idx, idx_len, dat, dat_len, seqnum1, timestamp1)?
    } else {
        match last_nonzero_backward(idx, idx_len)? {
            Some((slot, rec)) if slot == 0 && (rec.seqnum != seqnum1 || rec.pos != HEADER_SIZE) => {
                return Err(JournalError::InvalidIndexFormat(
                    "first index record does not match data file".to_string(),
                ));
            }
            other => other,
        }
    };

    // Zero-fill the index tail after the last non-zero record.
    let tail_start = match last {
        Some((slot, _)) => HEADER_SIZE + (slot + 1) * INDEX_RECORD_SIZE,
        None => HEADER_SIZE,
    };
    layout::zero_fill(idx, tail_start, idx_len)?;

    // Determine where data catch-up should resume from: right after the
    // last record the index already covers (learning its span by reading
    // that one data record), or at the very start if the index has nothing.
    let (mut seqnum2, mut timestamp2, mut dat_end) = match last {
        Some((_, rec)) => match data::try_read_record(dat, rec.pos, dat_len)? {
            RecordOutcome::Valid { header, span } => {
                (header.seqnum, header.timestamp, rec.pos + span)
            }
            RecordOutcome::Truncated => {
                return Err(JournalError::InvalidIndexFormat(
                    "index points past end of data file".to_string(),
                ));
            }
        },
        // Index has nothing yet; catch-up starts at the very first record.
        None => (seqnum1, timestamp1, HEADER_SIZE),
    };

    let mut next_slot = match last {
        Some((slot, _)) => slot + 1,
        None => 0,
    };

    loop {
        match data::try_read_record(dat, dat_end, dat_len)? {
            RecordOutcome::Truncated => {
                if dat_end < dat_len {
                    warn!(offset = dat_end, "data file tail truncated, zero-filling");
                    layout::zero_fill(dat, dat_end, dat_len)?;
                    dat.sync_all()?;
                }
                break;
            }
            RecordOutcome::Valid { header, span } => {
                if next_slot > 0 && (header.seqnum != seqnum2 + 1 || header.timestamp < timestamp2) {
                    return Err(JournalError::InvalidDataFormat(format!(
                        "non-monotonic record at offset {dat_end}"
                    )));
                }
                info!(seqnum = header.seqnum, "index catching up a durable record");
                append_record(
                    idx,
                    seqnum1,
                    IndexRecord {
                        seqnum: header.seqnum,
                        timestamp: header.timestamp,
                        pos: dat_end,
                    },
                )?;
                seqnum2 = header.seqnum;
                timestamp2 = header.timestamp;
                dat_end += span;
                next_slot += 1;
            }
        }
    }
    idx.sync_all()?;

    debug!(seqnum1, seqnum2, dat_end, "index cross-check complete");

    Ok(RecoveredState {
        seqnum1,
        timestamp1,
        seqnum2,
        timestamp2,
        dat_end,
        empty: false,
    })
}

/// Reads a single index record for `seqnum`, given the journal's `seqnum1`.
pub fn read_record(idx: &File, seqnum1: u64, seqnum: u64) -> Result<IndexRecord, JournalError> {
    let pos = layout::index_slot_pos(seqnum1, seqnum);
    let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
    idx.read_exact_at(&mut buf, pos)?;
    Ok(IndexRecord::decode(&buf))
}
