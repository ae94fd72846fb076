//! # seqjournal
//!
//! An embeddable, append-only journal engine for event-driven applications.
//! Records are variable-length, identified by a monotonically increasing
//! sequence number (`seqnum`) and indexed by a non-decreasing `timestamp`.
//!
//! ## On-disk layout
//!
//! A journal named `N` under directory `D` owns two files, `D/N.dat` and
//! `D/N.idx`, plus a transient `D/N.tmp` used by [`journal::Journal::purge`]:
//!
//! ```text
//! N.dat: [128-byte header][seqnum,timestamp,data_len,checksum][data][pad]...
//! N.idx: [128-byte header][seqnum,timestamp,pos (24 bytes)]...
//! ```
//!
//! Both headers share the same 128-byte layout (`magic`, `format`, and 116
//! bytes of informational text). Data records are 24-byte headers followed
//! by `data_len` payload bytes padded with zeros to the next pointer-size
//! boundary. The index is dense: `index[s]` lives at a pure function of `s`,
//! so there is no sparse lookup structure to maintain.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crc`] | Composable CRC-32 checksum primitive |
//! | [`layout`] | Packed on-disk structures and positional I/O helpers |
//! | [`data`] | Data file manager: create, open+scan, append |
//! | [`index`] | Index file manager: create, open+cross-check, append |
//! | [`journal`] | Public façade: lifecycle, append/read/search/stats/rollback/purge |
//! | [`error`] | The crate's closed [`error::JournalError`] error set |
//!
//! ## Concurrency
//!
//! A single writer is expected (multi-writer coordination is out of scope).
//! Appends take the file lock in read mode alongside readers — positional
//! I/O on a monotonically extending file suffix is safe to interleave —
//! while rollback/purge take it in write mode to exclude everyone else. A
//! narrow state mutex guards the four-field `{seqnum1, timestamp1, seqnum2,
//! timestamp2}` snapshot and is never held across I/O. Cross-process
//! exclusion is an advisory, non-blocking, per-file lock acquired at open
//! time; a second opener of the same journal fails with
//! [`error::JournalError::Lock`].
//!
//! ## Crash recovery
//!
//! At open time the data file is scanned forward from its header,
//! verifying checksums and monotonicity; a torn tail write is detected and
//! zero-filled, never guessed at. The index is then cross-checked against
//! the data file and, if inconsistent, rebuilt from scratch exactly once.
//! Any data records written after the last index flush (the crash window
//! between a durable append and its index entry) are replayed back into the
//! index during this pass.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use seqjournal::journal::{Entry, Journal, JournalOptions, SearchMode};
//!
//! let journal = Journal::open("/tmp", "events", JournalOptions::default()).unwrap();
//!
//! let mut entries = vec![Entry::new(b"hello".to_vec())];
//! let (written, status) = journal.append(&mut entries);
//! status.unwrap();
//! assert_eq!(written, 1);
//!
//! let seqnum = entries[0].seqnum;
//! let found = journal.read_alloc(seqnum, 1).unwrap();
//! assert_eq!(found[0].data, b"hello");
//!
//! journal.close().unwrap();
//! ```

pub mod crc;
pub mod data;
pub mod error;
pub mod index;
pub mod journal;
pub mod layout;
