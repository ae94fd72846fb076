#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::os::unix::fs::FileExt;

    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::error::JournalError;
    use crate::journal::{Entry, Journal, JournalOptions, SearchMode};
    use crate::layout::{self, HEADER_SIZE};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::DEBUG)
            .try_init();
    }

    fn entries(seqnums: impl IntoIterator<Item = u64>) -> Vec<Entry> {
        seqnums
            .into_iter()
            .map(|s| Entry {
                seqnum: s,
                timestamp: s - (s % 10),
                data: vec![0u8; 4],
            })
            .collect()
    }

    /// # Scenario
    /// Append 295 entries with seqnums 20..314 and the timestamp rule from
    /// the spec, then check the reported stats.
    #[test]
    fn stats_over_full_range() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();

        let mut batch = entries(20..314 + 1);
        let (written, status) = journal.append(&mut batch);
        status.unwrap();
        assert_eq!(written, 295);

        let stats = journal.stats(0, 10_000_000).unwrap();
        assert_eq!(stats.min_seqnum, 20);
        assert_eq!(stats.max_seqnum, 314);
        assert_eq!(stats.num_entries, 295);
        assert_eq!(stats.index_size, 295 * 24);
    }

    /// # Scenario
    /// On the journal built in [`stats_over_full_range`], `search` with
    /// LOWER/UPPER modes around the decade boundaries at 25 and 30.
    #[test]
    fn search_lower_upper_duals() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();

        let mut batch = entries(20..314 + 1);
        journal.append(&mut batch).1.unwrap();

        assert_eq!(journal.search(25, SearchMode::Lower).unwrap(), 30);
        assert_eq!(journal.search(25, SearchMode::Upper).unwrap(), 30);
        assert_eq!(journal.search(30, SearchMode::Lower).unwrap(), 30);
        assert_eq!(journal.search(30, SearchMode::Upper).unwrap(), 40);
        assert!(matches!(
            journal.search(311, SearchMode::Lower),
            Err(JournalError::NotFound)
        ));
    }

    /// # Scenario
    /// A fresh journal gets one valid record, injected directly at the byte
    /// level, followed by 10 bytes of unrelated garbage appended past it.
    ///
    /// # Expected behavior
    /// Reopening recovers exactly the one valid record and zero-fills the
    /// garbage.
    #[test]
    fn reopen_repairs_trailing_garbage_after_first_record() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let dat_path = tmp.path().join("j.dat");
        let idx_path = tmp.path().join("j.idx");

        crate::data::create(&dat_path, "test").unwrap();
        crate::index::create(&idx_path, "test").unwrap();

        let payload = vec![0u8; 21640];
        let dat = OpenOptions::new().write(true).open(&dat_path).unwrap();
        let span = crate::data::append_record(&dat, HEADER_SIZE, 10, 3, &payload).unwrap();
        dat.write_all_at(&[0xAAu8; 10], HEADER_SIZE + span).unwrap();

        let journal = Journal::open(
            tmp.path(),
            "j",
            JournalOptions {
                check: true,
                ..JournalOptions::default()
            },
        )
        .unwrap();

        let stats = journal.stats(0, u64::MAX).unwrap();
        assert_eq!(stats.min_seqnum, 10);
        assert_eq!(stats.max_seqnum, 10);
        assert_eq!(stats.min_timestamp, 3);
        assert_eq!(stats.max_timestamp, 3);

        let recovered = journal.read_alloc(10, 1).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].data, payload);
    }

    /// # Scenario
    /// Append seqnums 10..13, then zero-pad past the real tail of both
    /// files (simulating a crash mid-write that the OS already zeroed).
    ///
    /// # Expected behavior
    /// A `check=true` reopen recovers the same state as before the padding.
    #[test]
    fn reopen_with_check_ignores_zero_padded_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();
        let mut batch = entries(10..13 + 1);
        journal.append(&mut batch).1.unwrap();
        let stats_before = journal.stats(0, u64::MAX).unwrap();
        journal.close().unwrap();
        drop(journal);

        let dat = OpenOptions::new()
            .write(true)
            .open(tmp.path().join("j.dat"))
            .unwrap();
        let dat_len = layout::file_len(&dat).unwrap();
        dat.set_len(dat_len + 60).unwrap();

        let idx = OpenOptions::new()
            .write(true)
            .open(tmp.path().join("j.idx"))
            .unwrap();
        let idx_len = layout::file_len(&idx).unwrap();
        idx.set_len(idx_len + 37).unwrap();

        let journal = Journal::open(
            tmp.path(),
            "j",
            JournalOptions {
                check: true,
                ..JournalOptions::default()
            },
        )
        .unwrap();
        let stats_after = journal.stats(0, u64::MAX).unwrap();
        assert_eq!(stats_before, stats_after);
    }

    /// # Scenario
    /// Append 20..314, then roll back to 100.
    #[test]
    fn rollback_shrinks_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();
        let mut batch = entries(20..314 + 1);
        journal.append(&mut batch).1.unwrap();

        let stats_before = journal.stats(0, u64::MAX).unwrap();
        let removed = journal.rollback(100).unwrap();
        assert_eq!(removed, 214);

        let stats_after = journal.stats(0, u64::MAX).unwrap();
        assert_eq!(stats_after.min_seqnum, 20);
        assert_eq!(stats_after.max_seqnum, 100);
        assert_eq!(stats_after.max_timestamp, 100);
        assert!(stats_after.data_size < stats_before.data_size);

        let mut buf = vec![0u8; 64];
        assert!(matches!(
            journal.read(101, &mut buf),
            Err(JournalError::NotFound)
        ));
    }

    /// # Scenario
    /// Append 20..314, then purge everything below 100.
    #[test]
    fn purge_shifts_head_and_preserves_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();
        let mut batch = entries(20..314 + 1);
        journal.append(&mut batch).1.unwrap();

        let removed = journal.purge(100).unwrap();
        assert_eq!(removed, 80);

        let stats = journal.stats(0, u64::MAX).unwrap();
        assert_eq!(stats.min_seqnum, 100);
        assert_eq!(stats.max_seqnum, 314);

        let mut buf = vec![0u8; 64];
        assert!(journal.read(101, &mut buf).is_ok());
    }

    /// # Scenario
    /// A second handle attempts to open the same journal while the first is
    /// still open.
    #[test]
    fn concurrent_open_fails_with_lock_error() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let first = Journal::open(tmp.path(), "j", JournalOptions::default()).unwrap();

        let second = Journal::open(tmp.path(), "j", JournalOptions::default());
        assert!(matches!(second, Err(JournalError::Lock(_))));

        first.close().unwrap();
    }

    /// # Scenario
    /// `max_record_size` is set to 8 bytes; an append with a 9-byte payload
    /// is offered.
    #[test]
    fn append_rejects_payload_over_max_record_size() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(
            tmp.path(),
            "j",
            JournalOptions {
                max_record_size: Some(8),
                ..JournalOptions::default()
            },
        )
        .unwrap();

        let mut batch = vec![Entry::new(vec![0u8; 9])];
        let (written, status) = journal.append(&mut batch);
        assert_eq!(written, 0);
        assert!(matches!(status, Err(JournalError::InvalidArgument(_))));
    }

    /// A deliberately wrong checksum on the second record of an otherwise
    /// valid data file must surface as a hard error, never be silently
    /// repaired.
    #[test]
    fn checksum_mismatch_after_valid_first_record_is_a_hard_error() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let dat_path = tmp.path().join("j.dat");
        let idx_path = tmp.path().join("j.idx");
        crate::data::create(&dat_path, "test").unwrap();
        crate::index::create(&idx_path, "test").unwrap();

        let dat = OpenOptions::new().write(true).open(&dat_path).unwrap();
        let span1 = crate::data::append_record(&dat, HEADER_SIZE, 10, 3, b"a").unwrap();

        // Hand-craft a second record with a checksum that doesn't match.
        let mut header = layout::DataRecordHeader {
            seqnum: 11,
            timestamp: 4,
            data_len: 1,
            checksum: 0,
        };
        header.checksum = layout::record_checksum(11, 4, 1, b"a") ^ 0xFFFF_FFFF;
        dat.write_all_at(&header.encode(), HEADER_SIZE + span1)
            .unwrap();
        dat.write_all_at(b"a", HEADER_SIZE + span1 + 24).unwrap();

        let result = Journal::open(
            tmp.path(),
            "j",
            JournalOptions {
                check: true,
                ..JournalOptions::default()
            },
        );
        assert!(matches!(result, Err(JournalError::ChecksumMismatch)));
    }
}
