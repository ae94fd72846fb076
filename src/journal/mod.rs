//! # Journal façade and lifecycle
//!
//! [`Journal`] is the public handle: it owns the data and index file pair,
//! the recovered in-memory [`JournalState`], and the two-mutex concurrency
//! discipline described in the crate-level docs.
//!
//! ## Concurrency model
//!
//! - `state: Mutex<JournalState>` — narrow, held only to snapshot or publish
//!   the four-field state, never across I/O.
//! - `dat` / `idx`: `RwLock<File>` — the "file mutex" from the design, with
//!   the dual role of coordination lock and owner of the `File` handle
//!   itself (so [`Journal::purge`] can swap in a freshly rewritten file
//!   without `unsafe`). Appends and reads take a **read** guard — positional
//!   I/O (`read_at`/`write_at`) on a monotonically extending file suffix is
//!   safe to interleave — while rollback/purge take a **write** guard to
//!   exclude everyone else.
//! - Cross-process exclusion is layered on top with an advisory
//!   [`fs2::FileExt`] lock per file, acquired at open time.
//!
//! ## On-disk layout
//!
//! See [`crate::layout`] for the binary format and [`crate::data`] /
//! [`crate::index`] for the per-file managers this façade orchestrates.

#[cfg(test)]
mod tests;

mod ops;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use fs2::FileExt;
use tracing::{info, warn};

use crate::data;
use crate::error::JournalError;
use crate::index::{self, RecoveredState};
use crate::layout::HEADER_SIZE;

pub use ops::{Entry, EntryRef, SearchMode, Stats};

const MAX_NAME_LEN: usize = 32;

/// Options controlling how a [`Journal`] is opened and how it flushes.
#[derive(Debug, Clone, Copy)]
pub struct JournalOptions {
    /// Thorough (`true`) vs fast (`false`) open-time verification — see
    /// [`crate::data::open_and_scan`] and [`crate::index::open_and_cross_check`].
    pub check: bool,
    /// When set, [`Journal::append`] and the destructive operations
    /// `fdatasync` the data file after writing.
    pub fsync: bool,
    /// Caps an appended entry's payload length. `None` leaves it bounded
    /// only by `u32::MAX`, the on-disk `data_len` field's width.
    pub max_record_size: Option<u32>,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            check: false,
            fsync: false,
            max_record_size: None,
        }
    }
}

/// The journal's recovered in-memory state: `{seqnum1, timestamp1, seqnum2,
/// timestamp2, dat_end}`. All four seqnum/timestamp fields are 0 iff the
/// journal is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JournalState {
    pub seqnum1: u64,
    pub timestamp1: u64,
    pub seqnum2: u64,
    pub timestamp2: u64,
    pub dat_end: u64,
}

impl JournalState {
    pub(crate) fn is_empty(&self) -> bool {
        self.seqnum1 == 0 && self.seqnum2 == 0
    }

    fn empty() -> Self {
        Self {
            seqnum1: 0,
            timestamp1: 0,
            seqnum2: 0,
            timestamp2: 0,
            dat_end: HEADER_SIZE,
        }
    }
}

impl From<RecoveredState> for JournalState {
    fn from(r: RecoveredState) -> Self {
        if r.empty {
            Self::empty()
        } else {
            Self {
                seqnum1: r.seqnum1,
                timestamp1: r.timestamp1,
                seqnum2: r.seqnum2,
                timestamp2: r.timestamp2,
                dat_end: r.dat_end,
            }
        }
    }
}

struct JournalInner {
    name: String,
    dir: PathBuf,
    dat_path: PathBuf,
    idx_path: PathBuf,
    state: Mutex<JournalState>,
    dat: RwLock<fs::File>,
    idx: RwLock<fs::File>,
    fsync: AtomicBool,
    max_record_size: Option<u32>,
}

/// A handle to an open, append-only journal.
///
/// Cheap to clone — clones share the same underlying files, locks, and
/// state via an internal `Arc`.
pub struct Journal {
    inner: std::sync::Arc<JournalInner>,
}

impl Clone for Journal {
    fn clone(&self) -> Self {
        Self {
            inner: std::sync::Arc::clone(&self.inner),
        }
    }
}

/// Validates `path`: either empty (meaning the current directory) or an
/// existing directory.
fn validate_path(path: &Path) -> Result<PathBuf, JournalError> {
    if path.as_os_str().is_empty() {
        return Ok(PathBuf::from("."));
    }
    if !path.is_dir() {
        return Err(JournalError::InvalidPath(format!(
            "{} is not an existing directory",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Validates `name`: non-empty, at most 32 characters, alphanumerics or
/// underscore only.
fn validate_name(name: &str) -> Result<(), JournalError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(JournalError::InvalidName(format!(
            "name must be 1-{MAX_NAME_LEN} characters, got {}",
            name.len()
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(JournalError::InvalidName(
            "name must contain only [A-Za-z0-9_]".to_string(),
        ));
    }
    Ok(())
}

fn open_locked(path: &Path, open_err: impl Fn(String) -> JournalError) -> Result<fs::File, JournalError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| open_err(e.to_string()))?;
    file.try_lock_exclusive()
        .map_err(|e| JournalError::Lock(format!("{}: {e}", path.display())))?;
    Ok(file)
}

impl Journal {
    /// Opens (creating if necessary) the journal named `name` under `path`.
    ///
    /// Runs the data file's open+scan, then the index file's open+cross-check;
    /// an inconsistent index is rebuilt from scratch exactly once before the
    /// error is allowed to propagate. Both files are guarded by a
    /// non-blocking exclusive advisory lock, so a second concurrent opener of
    /// the same journal fails with [`JournalError::Lock`].
    pub fn open(
        path: impl AsRef<Path>,
        name: impl AsRef<str>,
        options: JournalOptions,
    ) -> Result<Self, JournalError> {
        let dir = validate_path(path.as_ref())?;
        let name = name.as_ref();
        validate_name(name)?;

        let dat_path = dir.join(format!("{name}.dat"));
        let idx_path = dir.join(format!("{name}.idx"));

        if !dat_path.exists() {
            if idx_path.exists() {
                warn!(path = %idx_path.display(), "removing stale index, data file is missing");
                fs::remove_file(&idx_path)?;
            }
            data::create(&dat_path, &format!("seqjournal data file '{name}'"))?;
        }
        if !idx_path.exists() {
            index::create(&idx_path, &format!("seqjournal index file '{name}'"))?;
        }

        let dat_file = open_locked(&dat_path, JournalError::DataOpen)?;
        let mut idx_file = match open_locked(&idx_path, JournalError::IndexOpen) {
            Ok(f) => f,
            Err(e) => {
                let _ = FileExt::unlock(&dat_file);
                return Err(e);
            }
        };

        let recovered = match Self::recover(&dat_file, &mut idx_file, &idx_path, name, options.check) {
            Ok(r) => r,
            Err(e) => {
                let _ = FileExt::unlock(&dat_file);
                let _ = FileExt::unlock(&idx_file);
                return Err(e);
            }
        };

        info!(
            name,
            seqnum1 = recovered.seqnum1,
            seqnum2 = recovered.seqnum2,
            "journal opened"
        );

        Ok(Self {
            inner: std::sync::Arc::new(JournalInner {
                name: name.to_string(),
                dir,
                dat_path,
                idx_path,
                state: Mutex::new(JournalState::from(recovered)),
                dat: RwLock::new(dat_file),
                idx: RwLock::new(idx_file),
                fsync: AtomicBool::new(options.fsync),
                max_record_size: options.max_record_size,
            }),
        })
    }

    /// Runs the data scan and the index cross-check, rebuilding the index
    /// exactly once if it comes back in the "invalid idx" error class. On a
    /// rebuild, `*idx_file` is replaced with the freshly created, locked
    /// file — the caller's variable always ends up pointing at the file
    /// that backs the returned state.
    fn recover(
        dat_file: &fs::File,
        idx_file: &mut fs::File,
        idx_path: &Path,
        name: &str,
        check: bool,
    ) -> Result<RecoveredState, JournalError> {
        let data_scan = data::open_and_scan(dat_file, check)?;

        match index::open_and_cross_check(idx_file, dat_file, &data_scan, check) {
            Ok(r) => Ok(r),
            Err(e) if e.is_rebuildable_index_error() => {
                warn!(error = %e, "index inconsistent at open, rebuilding from data file");
                let _ = FileExt::unlock(&*idx_file);
                fs::remove_file(idx_path)?;
                index::create(idx_path, &format!("seqjournal index file '{name}'"))?;
                let rebuilt = open_locked(idx_path, JournalError::IndexOpen)?;
                let result = index::open_and_cross_check(&rebuilt, dat_file, &data_scan, true);
                *idx_file = rebuilt;
                result
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the journal: releases both advisory locks. Idempotent and
    /// infallible — repeated calls, or calls after the handle is dropped,
    /// are harmless since the locks are released when the files close.
    pub fn close(&self) -> Result<(), JournalError> {
        let dat = self
            .inner
            .dat
            .read()
            .map_err(|_| JournalError::Internal("file lock poisoned".to_string()))?;
        let idx = self
            .inner
            .idx
            .read()
            .map_err(|_| JournalError::Internal("file lock poisoned".to_string()))?;
        let _ = FileExt::unlock(&*dat);
        let _ = FileExt::unlock(&*idx);
        info!(name = %self.inner.name, "journal closed");
        Ok(())
    }

    /// Enables or disables `fdatasync`-on-write for subsequent operations.
    pub fn set_fsync(&self, enabled: bool) {
        self.inner.fsync.store(enabled, Ordering::Relaxed);
    }

    fn fsync_enabled(&self) -> bool {
        self.inner.fsync.load(Ordering::Relaxed)
    }

    fn max_record_size(&self) -> Option<u32> {
        self.inner.max_record_size
    }

    /// The crate's version string, as recorded at build time.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// This journal's name, as passed to [`Journal::open`].
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}
