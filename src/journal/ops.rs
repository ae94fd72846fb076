//! Append/read/search/stats/rollback/purge — the journal's public
//! operations, split out of [`super`] to keep the lifecycle code separate
//! from the per-call logic.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt as _;
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use tracing::{debug, info};

use super::{open_locked, Journal, JournalState};
use crate::data;
use crate::error::JournalError;
use crate::index;
use crate::layout::{self, DataRecordHeader, IndexRecord, DATA_RECORD_SIZE, HEADER_SIZE, INDEX_RECORD_SIZE};

/// A journal entry, as returned by the allocating read and accepted by
/// [`Journal::append`].
///
/// On input to `append`, `seqnum = 0` means "assign the next one" and
/// `timestamp = 0` means "assign the current wall-clock time in
/// milliseconds"; `append` writes the assigned values back into the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub seqnum: u64,
    pub timestamp: u64,
    pub data: Vec<u8>,
}

impl Entry {
    /// Builds an entry that will have its seqnum and timestamp auto-assigned
    /// by `append`.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            seqnum: 0,
            timestamp: 0,
            data,
        }
    }
}

/// A borrowed view of one entry, returned by the zero-copy [`Journal::read`].
///
/// `data` is `None` for an entry whose payload didn't fit in the caller's
/// buffer — see [`Journal::read`] for the exact truncation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef<'a> {
    pub seqnum: u64,
    pub timestamp: u64,
    pub data: Option<&'a [u8]>,
}

/// Which end of a run of equal timestamps [`Journal::search`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// The least seqnum whose timestamp is `>= ts`.
    Lower,
    /// The least seqnum whose timestamp is `> ts`.
    Upper,
}

/// Snapshot statistics over a seqnum range, clamped to what the journal
/// actually holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub min_seqnum: u64,
    pub max_seqnum: u64,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    pub num_entries: u64,
    pub index_size: u64,
    pub data_size: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn lock_poisoned() -> JournalError {
    JournalError::Internal("lock poisoned".to_string())
}

impl Journal {
    /// Appends `entries` in order, assigning `seqnum`/`timestamp` in place
    /// where the caller left them at 0.
    ///
    /// Returns `(number_written, status)`: on the first error, whatever was
    /// already durably written is flushed and counted, and `status` carries
    /// that first error. The call is not atomic across entries.
    pub fn append(&self, entries: &mut [Entry]) -> (usize, Result<(), JournalError>) {
        let dat = match self.inner.dat.read() {
            Ok(g) => g,
            Err(_) => return (0, Err(lock_poisoned())),
        };
        let idx = match self.inner.idx.read() {
            Ok(g) => g,
            Err(_) => return (0, Err(lock_poisoned())),
        };

        let mut local = match self.inner.state.lock() {
            Ok(s) => *s,
            Err(_) => return (0, Err(lock_poisoned())),
        };

        let mut written = 0usize;
        let mut error = None;

        for entry in entries.iter_mut() {
            let was_empty = local.is_empty();

            let seqnum = if entry.seqnum == 0 {
                if was_empty { 1 } else { local.seqnum2 + 1 }
            } else {
                if !was_empty && entry.seqnum != local.seqnum2 + 1 {
                    error = Some(JournalError::BrokenSeqnum {
                        expected: local.seqnum2 + 1,
                        got: entry.seqnum,
                    });
                    break;
                }
                entry.seqnum
            };

            let timestamp = if entry.timestamp == 0 {
                now_ms().max(local.timestamp2)
            } else {
                if !was_empty && entry.timestamp < local.timestamp2 {
                    error = Some(JournalError::InvalidTimestamp {
                        got: entry.timestamp,
                        last: local.timestamp2,
                    });
                    break;
                }
                entry.timestamp
            };

            if let Some(max) = self.max_record_size() {
                if entry.data.len() as u64 > u64::from(max) {
                    error = Some(JournalError::InvalidArgument(format!(
                        "payload of {} bytes exceeds max_record_size {max}",
                        entry.data.len()
                    )));
                    break;
                }
            }

            let span = match data::append_record(&dat, local.dat_end, seqnum, timestamp, &entry.data) {
                Ok(span) => span,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            };

            let seqnum1 = if was_empty { seqnum } else { local.seqnum1 };
            let rec = IndexRecord {
                seqnum,
                timestamp,
                pos: local.dat_end,
            };
            if let Err(e) = index::append_record(&idx, seqnum1, rec) {
                error = Some(e);
                break;
            }

            entry.seqnum = seqnum;
            entry.timestamp = timestamp;

            if was_empty {
                local.seqnum1 = seqnum;
                local.timestamp1 = timestamp;
            }
            local.seqnum2 = seqnum;
            local.timestamp2 = timestamp;
            local.dat_end += span;
            written += 1;
        }

        if written > 0 {
            if let Err(e) = dat.sync_all() {
                if error.is_none() {
                    error = Some(e.into());
                }
            }
            if self.fsync_enabled() {
                if let Err(e) = dat.sync_data() {
                    if error.is_none() {
                        error = Some(e.into());
                    }
                }
            }
            if let Err(e) = idx.sync_all() {
                if error.is_none() {
                    error = Some(e.into());
                }
            }
            match self.inner.state.lock() {
                Ok(mut s) => *s = local,
                Err(_) => {
                    if error.is_none() {
                        error = Some(lock_poisoned());
                    }
                }
            }
        }

        debug!(written, error = ?error, "append batch complete");
        (written, error.map_or(Ok(()), Err))
    }

    /// Zero-copy, buffer-bounded read starting at `seqnum`.
    ///
    /// Returns as many entries as fit in `buf`. If the next record's payload
    /// would overrun `buf`, the previously returned entry is invalidated
    /// (its `data` set to `None`) and a final entry with `data: None` is
    /// appended describing that record's header, so the caller can size a
    /// larger buffer and retry.
    pub fn read<'buf>(&self, seqnum: u64, buf: &'buf mut [u8]) -> Result<Vec<EntryRef<'buf>>, JournalError> {
        let dat = self.inner.dat.read().map_err(|_| lock_poisoned())?;
        let idx = self.inner.idx.read().map_err(|_| lock_poisoned())?;
        let state = *self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if seqnum == 0 || state.is_empty() || seqnum < state.seqnum1 || seqnum > state.seqnum2 {
            return Err(JournalError::NotFound);
        }

        let start = index::read_record(&idx, state.seqnum1, seqnum)?;
        let want = buf.len().min((state.dat_end - start.pos) as usize);
        if want == 0 {
            return Ok(Vec::new());
        }
        dat.read_exact_at(&mut buf[..want], start.pos)?;

        let mut out: Vec<EntryRef<'buf>> = Vec::new();
        let mut off = 0usize;
        let buf = &buf[..want];

        loop {
            if off + DATA_RECORD_SIZE as usize > buf.len() {
                break;
            }
            let header = DataRecordHeader::decode(&buf[off..off + DATA_RECORD_SIZE as usize]);
            if header.is_unused() {
                break;
            }
            let span = layout::record_span(header.data_len) as usize;
            if off + span > buf.len() {
                if let Some(last) = out.last_mut() {
                    last.data = None;
                }
                out.push(EntryRef {
                    seqnum: header.seqnum,
                    timestamp: header.timestamp,
                    data: None,
                });
                break;
            }
            let payload_start = off + DATA_RECORD_SIZE as usize;
            let payload = &buf[payload_start..payload_start + header.data_len as usize];
            out.push(EntryRef {
                seqnum: header.seqnum,
                timestamp: header.timestamp,
                data: Some(payload),
            });
            off += span;
        }

        Ok(out)
    }

    /// Allocating read: same seqnum-range contract as [`Journal::read`], but
    /// copies up to `n` entries' payloads into freshly owned [`Entry`]s.
    pub fn read_alloc(&self, seqnum: u64, n: usize) -> Result<Vec<Entry>, JournalError> {
        let dat = self.inner.dat.read().map_err(|_| lock_poisoned())?;
        let idx = self.inner.idx.read().map_err(|_| lock_poisoned())?;
        let state = *self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if seqnum == 0 || state.is_empty() || seqnum < state.seqnum1 || seqnum > state.seqnum2 {
            return Err(JournalError::NotFound);
        }

        let mut pos = index::read_record(&idx, state.seqnum1, seqnum)?.pos;
        let dat_len = layout::file_len(&dat)?;
        let mut out = Vec::with_capacity(n);

        for _ in 0..n {
            if pos >= state.dat_end {
                break;
            }
            let mut hdr_buf = [0u8; DATA_RECORD_SIZE as usize];
            dat.read_exact_at(&mut hdr_buf, pos)?;
            let header = DataRecordHeader::decode(&hdr_buf);
            if header.is_unused() {
                break;
            }
            let mut payload = vec![0u8; header.data_len as usize];
            if header.data_len > 0 {
                dat.read_exact_at(&mut payload, pos + DATA_RECORD_SIZE)?;
            }
            let span = layout::record_span(header.data_len);
            if pos + span > dat_len {
                return Err(JournalError::InvalidDataFormat(
                    "record overruns end of file".to_string(),
                ));
            }
            out.push(Entry {
                seqnum: header.seqnum,
                timestamp: header.timestamp,
                data: payload,
            });
            pos += span;
        }

        Ok(out)
    }

    /// Binary search over `[seqnum1, seqnum2]` for the least seqnum whose
    /// timestamp satisfies `mode` relative to `ts`.
    pub fn search(&self, ts: u64, mode: SearchMode) -> Result<u64, JournalError> {
        let idx = self.inner.idx.read().map_err(|_| lock_poisoned())?;
        let state = *self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if state.is_empty() {
            return Err(JournalError::NotFound);
        }

        let out_of_range = match mode {
            SearchMode::Lower => state.timestamp2 < ts,
            SearchMode::Upper => state.timestamp2 <= ts,
        };
        if out_of_range {
            return Err(JournalError::NotFound);
        }

        let before_first = match mode {
            SearchMode::Lower => ts <= state.timestamp1,
            SearchMode::Upper => ts < state.timestamp1,
        };
        if before_first {
            return Ok(state.seqnum1);
        }

        let mut lo = state.seqnum1;
        let mut hi = state.seqnum2;
        let read_ts = |s: u64| -> Result<u64, JournalError> {
            Ok(index::read_record(&idx, state.seqnum1, s)?.timestamp)
        };

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let t = read_ts(mid)?;
            let satisfies = match mode {
                SearchMode::Lower => t >= ts,
                SearchMode::Upper => t > ts,
            };
            if satisfies {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        let t = read_ts(lo)?;
        let satisfies = match mode {
            SearchMode::Lower => t >= ts,
            SearchMode::Upper => t > ts,
        };
        if satisfies {
            Ok(lo)
        } else {
            Err(JournalError::NotFound)
        }
    }

    /// Statistics over `[sn1, sn2]`, clamped to what's actually stored.
    /// Returns all-zero [`Stats`] if the ranges don't overlap.
    pub fn stats(&self, sn1: u64, sn2: u64) -> Result<Stats, JournalError> {
        let dat = self.inner.dat.read().map_err(|_| lock_poisoned())?;
        let idx = self.inner.idx.read().map_err(|_| lock_poisoned())?;
        let state = *self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if state.is_empty() || sn1 > sn2 || sn2 < state.seqnum1 || sn1 > state.seqnum2 {
            return Ok(Stats::default());
        }

        let lo = sn1.max(state.seqnum1);
        let hi = sn2.min(state.seqnum2);

        let rec_lo = index::read_record(&idx, state.seqnum1, lo)?;
        let rec_hi = index::read_record(&idx, state.seqnum1, hi)?;

        let mut hdr_buf = [0u8; DATA_RECORD_SIZE as usize];
        dat.read_exact_at(&mut hdr_buf, rec_hi.pos)?;
        let header_hi = DataRecordHeader::decode(&hdr_buf);
        let span_hi = layout::record_span(header_hi.data_len);

        let num_entries = hi - lo + 1;
        Ok(Stats {
            min_seqnum: lo,
            max_seqnum: hi,
            min_timestamp: rec_lo.timestamp,
            max_timestamp: rec_hi.timestamp,
            num_entries,
            index_size: num_entries * INDEX_RECORD_SIZE,
            data_size: rec_hi.pos - rec_lo.pos + span_hi,
        })
    }

    /// Removes every entry with seqnum greater than `seqnum`. Takes the file
    /// mutex in write mode to exclude readers while the tail is cleared.
    pub fn rollback(&self, seqnum: u64) -> Result<u64, JournalError> {
        let dat = self.inner.dat.write().map_err(|_| lock_poisoned())?;
        let idx = self.inner.idx.write().map_err(|_| lock_poisoned())?;
        let mut state = self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if state.is_empty() || seqnum >= state.seqnum2 {
            return Ok(0);
        }

        if seqnum < state.seqnum1 {
            let removed = state.seqnum2 - state.seqnum1 + 1;
            let idx_len = layout::file_len(&idx)?;
            layout::zero_fill(&idx, HEADER_SIZE, idx_len)?;
            idx.sync_all()?;
            let dat_len = layout::file_len(&dat)?;
            layout::zero_fill(&dat, HEADER_SIZE, dat_len)?;
            dat.sync_all()?;
            if self.fsync_enabled() {
                dat.sync_data()?;
            }
            *state = JournalState::from(index::RecoveredState {
                empty: true,
                ..Default::default()
            });
            info!(removed, "rollback cleared entire journal");
            return Ok(removed);
        }

        let removed = state.seqnum2 - seqnum;
        let rec_keep = index::read_record(&idx, state.seqnum1, seqnum)?;
        let rec_next = index::read_record(&idx, state.seqnum1, seqnum + 1)?;

        let idx_len = layout::file_len(&idx)?;
        let tail_start = layout::index_slot_pos(state.seqnum1, seqnum + 1);
        layout::zero_fill(&idx, tail_start, idx_len)?;
        idx.sync_all()?;

        let new_dat_end = rec_next.pos;
        let dat_len = layout::file_len(&dat)?;
        layout::zero_fill(&dat, new_dat_end, dat_len)?;
        dat.sync_all()?;
        if self.fsync_enabled() {
            dat.sync_data()?;
        }

        state.seqnum2 = seqnum;
        state.timestamp2 = rec_keep.timestamp;
        state.dat_end = new_dat_end;

        info!(removed, new_seqnum2 = seqnum, "rollback complete");
        Ok(removed)
    }

    /// Removes every entry with seqnum less than `seqnum`, rewriting the
    /// data file through a temp file under the file mutex.
    pub fn purge(&self, seqnum: u64) -> Result<u64, JournalError> {
        let mut dat = self.inner.dat.write().map_err(|_| lock_poisoned())?;
        let mut idx = self.inner.idx.write().map_err(|_| lock_poisoned())?;
        let mut state = self.inner.state.lock().map_err(|_| lock_poisoned())?;

        if state.is_empty() || seqnum <= state.seqnum1 {
            return Ok(0);
        }

        if seqnum > state.seqnum2 {
            let removed = state.seqnum2 - state.seqnum1 + 1;
            self.recreate_empty_files(&mut dat, &mut idx)?;
            *state = JournalState::from(index::RecoveredState {
                empty: true,
                ..Default::default()
            });
            info!(removed, "purge removed entire journal");
            return Ok(removed);
        }

        let removed = seqnum - state.seqnum1;
        let start = index::read_record(&idx, state.seqnum1, seqnum)?;

        let tmp_path = self.inner.dir.join(format!("{}.tmp", self.inner.name));
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }
        data::create(&tmp_path, &format!("seqjournal data file '{}'", self.inner.name))?;
        {
            let tmp_file = OpenOptions::new()
                .write(true)
                .open(&tmp_path)
                .map_err(|e| JournalError::TempFile(e.to_string()))?;
            layout::copy_range(&dat, start.pos, state.dat_end, &tmp_file, HEADER_SIZE)
                .map_err(|e| JournalError::TempFile(e.to_string()))?;
            tmp_file
                .sync_all()
                .map_err(|e| JournalError::TempFile(e.to_string()))?;
        }

        let _ = FileExt::unlock(&*dat);
        let _ = FileExt::unlock(&*idx);

        fs::remove_file(&self.inner.idx_path)?;
        fs::rename(&tmp_path, &self.inner.dat_path).map_err(|e| JournalError::TempFile(e.to_string()))?;
        index::create(
            &self.inner.idx_path,
            &format!("seqjournal index file '{}'", self.inner.name),
        )?;

        let new_dat = open_locked(&self.inner.dat_path, JournalError::DataOpen)?;
        let new_idx = open_locked(&self.inner.idx_path, JournalError::IndexOpen)?;

        let data_scan = data::open_and_scan(&new_dat, false)?;
        let recovered = index::open_and_cross_check(&new_idx, &new_dat, &data_scan, false)?;

        *dat = new_dat;
        *idx = new_idx;
        *state = JournalState::from(recovered);

        info!(removed, new_seqnum1 = seqnum, "purge complete");
        Ok(removed)
    }

    /// Shared by the full-removal paths of rollback and purge: drops the
    /// advisory locks, deletes both files, and recreates them empty and
    /// locked in their place.
    fn recreate_empty_files(&self, dat: &mut fs::File, idx: &mut fs::File) -> Result<(), JournalError> {
        let _ = FileExt::unlock(&*dat);
        let _ = FileExt::unlock(&*idx);

        fs::remove_file(&self.inner.dat_path)?;
        fs::remove_file(&self.inner.idx_path)?;

        data::create(
            &self.inner.dat_path,
            &format!("seqjournal data file '{}'", self.inner.name),
        )?;
        index::create(
            &self.inner.idx_path,
            &format!("seqjournal index file '{}'", self.inner.name),
        )?;

        *dat = open_locked(&self.inner.dat_path, JournalError::DataOpen)?;
        *idx = open_locked(&self.inner.idx_path, JournalError::IndexOpen)?;
        Ok(())
    }
}
