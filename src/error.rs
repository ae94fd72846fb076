//! Error types returned by journal operations.
//!
//! [`JournalError`] is the closed error-kind set from the on-disk format
//! specification, expressed as a Rust enum instead of the C ABI's negative
//! error codes + `strerror` lookup table: `Display` gives the short English
//! message, and `#[from] std::io::Error` folds unexpected OS failures into
//! the same type the rest of the crate already threads through `?`.

use std::io;

use thiserror::Error;

/// Errors returned by [`crate::journal::Journal`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    /// Underlying I/O error not otherwise classified below.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An argument failed basic validation (e.g. a zero-length read buffer).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `path` is neither empty (cwd) nor an existing directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// `name` is empty, too long, or contains characters outside
    /// `[A-Za-z0-9_]`.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The data file could not be created or opened.
    #[error("data file open error: {0}")]
    DataOpen(String),

    /// The data file header is malformed or a record fails validation in a
    /// way that is not a simple checksum mismatch (bad magic/format,
    /// non-monotonic seqnum/timestamp after the first record).
    #[error("invalid data file format: {0}")]
    InvalidDataFormat(String),

    /// Writing to the data file failed partway through.
    #[error("data file write error: {0}")]
    DataWrite(String),

    /// The index file could not be created or opened.
    #[error("index file open error: {0}")]
    IndexOpen(String),

    /// The index file is missing, unreadable, or internally inconsistent
    /// with the data file. Causes the journal facade to attempt exactly one
    /// rebuild.
    #[error("invalid index file format: {0}")]
    InvalidIndexFormat(String),

    /// Writing to the index file failed partway through.
    #[error("index file write error: {0}")]
    IndexWrite(String),

    /// A provided seqnum was neither 0 (assign next) nor `state.seqnum2 + 1`.
    #[error("broken sequence: expected seqnum {expected}, got {got}")]
    BrokenSeqnum {
        /// The seqnum that would have continued the sequence.
        expected: u64,
        /// The seqnum actually supplied.
        got: u64,
    },

    /// A provided timestamp was less than `state.timestamp2`.
    #[error("invalid timestamp: {got} is less than last timestamp {last}")]
    InvalidTimestamp {
        /// The timestamp actually supplied.
        got: u64,
        /// The journal's current last timestamp.
        last: u64,
    },

    /// `data_len > 0` but no payload bytes were supplied, or vice versa.
    #[error("missing data")]
    MissingData,

    /// The requested seqnum or timestamp does not resolve to a stored entry.
    #[error("not found")]
    NotFound,

    /// The temporary file used by `purge` could not be created, written, or
    /// renamed into place.
    #[error("temp file error: {0}")]
    TempFile(String),

    /// A stored record's checksum did not match its recomputed value.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The advisory file lock on the data or index file could not be
    /// acquired (another handle already has the journal open).
    #[error("lock error: {0}")]
    Lock(String),

    /// Internal invariant violation (poisoned lock, unreachable state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl JournalError {
    /// Whether this error belongs to the "invalid idx" class from the
    /// open-time recovery protocol: these, and only these, cause the
    /// journal facade to remove and rebuild the index file once before
    /// giving up.
    pub(crate) fn is_rebuildable_index_error(&self) -> bool {
        matches!(
            self,
            JournalError::InvalidIndexFormat(_) | JournalError::IndexOpen(_)
        )
    }
}
