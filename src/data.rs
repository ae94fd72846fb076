//! Data file manager.
//!
//! Owns the `.dat` file's header validation and the record-level scan used
//! both at open time (to recover from a crash) and by [`crate::index`]'s
//! catch-up pass. See the crate-level docs for the on-disk layout.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::JournalError;
use crate::layout::{self, DataRecordHeader, FileHeader, HEADER_SIZE};

/// Outcome of reading one candidate record at a given offset.
pub enum RecordOutcome {
    /// A structurally valid, checksum-verified record.
    Valid {
        header: DataRecordHeader,
        /// Total on-disk size: header + payload + padding.
        span: u64,
    },
    /// Not enough bytes remained for a full record, or the slot is unused
    /// (`seqnum == 0`). Callers treat this as "end of valid data here".
    Truncated,
}

/// Attempts to read one data record at `pos`. Returns [`RecordOutcome`] for
/// anything that looks like a torn write or an unused slot, and propagates
/// [`JournalError::ChecksumMismatch`] for a record whose length is
/// plausible but whose checksum does not match — this is real corruption,
/// not a torn write, and callers must not silently repair it.
pub fn try_read_record(file: &File, pos: u64, file_len: u64) -> Result<RecordOutcome, JournalError> {
    if pos + layout::DATA_RECORD_SIZE > file_len {
        return Ok(RecordOutcome::Truncated);
    }
    let mut hdr_buf = [0u8; layout::DATA_RECORD_SIZE as usize];
    file.read_exact_at(&mut hdr_buf, pos)?;
    let header = DataRecordHeader::decode(&hdr_buf);

    if header.is_unused() {
        return Ok(RecordOutcome::Truncated);
    }

    let span = layout::record_span(header.data_len);
    if pos + span > file_len {
        return Ok(RecordOutcome::Truncated);
    }

    let mut payload = vec![0u8; header.data_len as usize];
    file.read_exact_at(&mut payload, pos + layout::DATA_RECORD_SIZE)?;

    let expected = layout::record_checksum(header.seqnum, header.timestamp, header.data_len, &payload);
    if expected != header.checksum {
        return Err(JournalError::ChecksumMismatch);
    }

    Ok(RecordOutcome::Valid { header, span })
}

/// Result of the data file's own open-time scan (spec §4.2).
pub enum DataScan {
    /// No valid first record: the journal is empty and `[header, eof)` has
    /// been zero-filled.
    Empty,
    /// `check == false`: only the first record was validated. The caller
    /// (index manager) is responsible for determining `seqnum2`/`dat_end`.
    FirstOnly { seqnum1: u64, timestamp1: u64 },
    /// `check == true`: the whole file was walked and verified.
    Full {
        seqnum1: u64,
        timestamp1: u64,
        seqnum2: u64,
        timestamp2: u64,
        dat_end: u64,
    },
}

/// Creates a brand-new data file at `path`. Fails if the file already
/// exists.
pub fn create(path: &Path, info: &str) -> Result<(), JournalError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| JournalError::DataOpen(e.to_string()))?;

    let header = FileHeader::new(info);
    use std::io::Write;
    file.write_all(&header.encode())
        .map_err(|e| JournalError::DataOpen(e.to_string()))?;
    file.sync_all()?;
    Ok(())
}

/// Opens an existing data file read/write and runs the open-time scan.
pub fn open_and_scan(file: &File, check: bool) -> Result<DataScan, JournalError> {
    let len = layout::file_len(file)?;
    if len < HEADER_SIZE {
        return Err(JournalError::InvalidDataFormat(
            "file shorter than header".to_string(),
        ));
    }
    let mut header_buf = vec![0u8; HEADER_SIZE as usize];
    file.read_exact_at(&mut header_buf, 0)?;
    FileHeader::decode(&header_buf)?;

    if len == HEADER_SIZE {
        debug!("data file has no records");
        return Ok(DataScan::Empty);
    }

    // First record: any kind of invalidity (truncated, bad checksum, or an
    // unused slot) is treated leniently — there is no known-good anchor yet,
    // so the whole tail is zeroed and the journal is considered empty.
    match try_read_record(file, HEADER_SIZE, len) {
        Ok(RecordOutcome::Truncated) => {
            warn!("data file has a damaged first record, zero-filling");
            layout::zero_fill(file, HEADER_SIZE, len)?;
            file.sync_all()?;
            Ok(DataScan::Empty)
        }
        Err(JournalError::ChecksumMismatch) => {
            warn!("data file's first record failed checksum, zero-filling");
            layout::zero_fill(file, HEADER_SIZE, len)?;
            file.sync_all()?;
            Ok(DataScan::Empty)
        }
        Err(e) => Err(e),
        Ok(RecordOutcome::Valid { header, span }) => {
            let seqnum1 = header.seqnum;
            let timestamp1 = header.timestamp;

            if !check {
                return Ok(DataScan::FirstOnly {
                    seqnum1,
                    timestamp1,
                });
            }

            let mut prev_seqnum = seqnum1;
            let mut prev_timestamp = timestamp1;
            let mut pos = HEADER_SIZE + span;

            loop {
                match try_read_record(file, pos, len) {
                    Ok(RecordOutcome::Truncated) => {
                        if pos < len {
                            warn!(offset = pos, "data file tail truncated, zero-filling");
                            layout::zero_fill(file, pos, len)?;
                            file.sync_all()?;
                        }
                        break;
                    }
                    Ok(RecordOutcome::Valid { header, span }) => {
                        if header.seqnum != prev_seqnum + 1 || header.timestamp < prev_timestamp {
                            return Err(JournalError::InvalidDataFormat(format!(
                                "non-monotonic record at offset {pos}: seqnum {} timestamp {}",
                                header.seqnum, header.timestamp
                            )));
                        }
                        prev_seqnum = header.seqnum;
                        prev_timestamp = header.timestamp;
                        pos += span;
                    }
                    Err(e) => return Err(e),
                }
            }

            Ok(DataScan::Full {
                seqnum1,
                timestamp1,
                seqnum2: prev_seqnum,
                timestamp2: prev_timestamp,
                dat_end: pos,
            })
        }
    }
}

/// Appends one record to the data file at `dat_end`. Returns the span
/// written so the caller can advance its `dat_end` bookkeeping.
pub fn append_record(
    file: &File,
    dat_end: u64,
    seqnum: u64,
    timestamp: u64,
    payload: &[u8],
) -> Result<u64, JournalError> {
    let data_len =
        u32::try_from(payload.len()).map_err(|_| JournalError::DataWrite("payload too large".to_string()))?;
    let checksum = layout::record_checksum(seqnum, timestamp, data_len, payload);
    let header = DataRecordHeader {
        seqnum,
        timestamp,
        data_len,
        checksum,
    };

    file.write_all_at(&header.encode(), dat_end)
        .map_err(|e| JournalError::DataWrite(e.to_string()))?;
    if !payload.is_empty() {
        file.write_all_at(payload, dat_end + layout::DATA_RECORD_SIZE)
            .map_err(|e| JournalError::DataWrite(e.to_string()))?;
    }
    let pad = layout::pad_len(data_len);
    if pad > 0 {
        let zeros = [0u8; layout::WORD as usize];
        file.write_all_at(&zeros[..pad as usize], dat_end + layout::DATA_RECORD_SIZE + u64::from(data_len))
            .map_err(|e| JournalError::DataWrite(e.to_string()))?;
    }

    Ok(layout::record_span(data_len))
}
