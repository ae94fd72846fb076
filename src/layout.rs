//! On-disk binary layout and low-level I/O helpers.
//!
//! Every structure here is a fixed-size, tightly packed, little-endian
//! layout as required by the format (see module docs on [`crate`]):
//!
//! ```text
//! [HEADER 128 bytes][RECORD][RECORD]...
//! ```
//!
//! `FileHeader` is shared by the data and index files (same layout,
//! different informational text). `DataRecordHeader` and `IndexRecord` are
//! the two 24-byte record shapes.
//!
//! The copy/zero-fill helpers use positional I/O (`read_at`/`write_at`)
//! rather than a shared seek cursor, so they are safe to call from a
//! reader thread while a writer thread is appending past the range being
//! read — see the crate-level concurrency notes.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::crc::crc32;
use crate::error::JournalError;

/// Magic constant identifying both data and index files.
pub const MAGIC: u64 = 0x211A_BF1A_6264_6C00;

/// Current on-disk format version.
pub const FORMAT: u32 = 1;

/// Length of the informational text field inside [`FileHeader`].
pub const HEADER_TEXT_LEN: usize = 116;

/// Total on-disk size of a [`FileHeader`]: `magic(8) + format(4) + text(116)`.
pub const HEADER_SIZE: u64 = 8 + 4 + HEADER_TEXT_LEN as u64;

/// On-disk size of a data record header (excludes payload and padding):
/// `seqnum(8) + timestamp(8) + data_len(4) + checksum(4)`.
pub const DATA_RECORD_SIZE: u64 = 8 + 8 + 4 + 4;

/// On-disk size of an index record: `seqnum(8) + timestamp(8) + pos(8)`.
pub const INDEX_RECORD_SIZE: u64 = 8 + 8 + 8;

/// Word size used to pad record payloads up to the next boundary, per the
/// format's "pointer-size boundary" requirement. This couples the on-disk
/// layout to the pointer width of the platform that wrote it, mirroring the
/// source library's `sizeof(void*)` padding — see `DESIGN.md`.
pub const WORD: u64 = std::mem::size_of::<usize>() as u64;

/// Number of zero-padding bytes following a payload of `data_len` bytes.
pub fn pad_len(data_len: u32) -> u64 {
    let data_len = u64::from(data_len);
    let rem = data_len % WORD;
    if rem == 0 { 0 } else { WORD - rem }
}

/// Total on-disk footprint of a data record: header + payload + padding.
pub fn record_span(data_len: u32) -> u64 {
    DATA_RECORD_SIZE + u64::from(data_len) + pad_len(data_len)
}

/// Byte offset within the index file of the slot for `seqnum`, given the
/// journal's first stored seqnum `seqnum1`.
pub fn index_slot_pos(seqnum1: u64, seqnum: u64) -> u64 {
    HEADER_SIZE + (seqnum - seqnum1) * INDEX_RECORD_SIZE
}

/// Header shared by the `.dat` and `.idx` files.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub magic: u64,
    pub format: u32,
    pub text: [u8; HEADER_TEXT_LEN],
}

impl FileHeader {
    /// Builds a fresh header, copying as much of `info` as fits into the
    /// informational text field (zero-padded if shorter).
    pub fn new(info: &str) -> Self {
        let mut text = [0u8; HEADER_TEXT_LEN];
        let bytes = info.as_bytes();
        let n = bytes.len().min(HEADER_TEXT_LEN);
        text[..n].copy_from_slice(&bytes[..n]);
        Self {
            magic: MAGIC,
            format: FORMAT,
            text,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.format.to_le_bytes());
        buf[12..12 + HEADER_TEXT_LEN].copy_from_slice(&self.text);
        buf
    }

    /// Decodes and validates magic + format. Does not compare `format`
    /// against a sibling file's format; callers do that cross-check.
    pub fn decode(buf: &[u8]) -> Result<Self, JournalError> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(JournalError::InvalidDataFormat(
                "header truncated".to_string(),
            ));
        }
        let magic = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let format = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let mut text = [0u8; HEADER_TEXT_LEN];
        text.copy_from_slice(&buf[12..12 + HEADER_TEXT_LEN]);

        if magic != MAGIC {
            return Err(JournalError::InvalidDataFormat(format!(
                "bad magic: {magic:#x}"
            )));
        }
        if format != FORMAT {
            return Err(JournalError::InvalidDataFormat(format!(
                "unsupported format version {format}"
            )));
        }

        Ok(Self {
            magic,
            format,
            text,
        })
    }
}

/// An on-disk data record header (the fixed part; payload follows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRecordHeader {
    pub seqnum: u64,
    pub timestamp: u64,
    pub data_len: u32,
    pub checksum: u32,
}

impl DataRecordHeader {
    pub fn encode(&self) -> [u8; DATA_RECORD_SIZE as usize] {
        let mut buf = [0u8; DATA_RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.seqnum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.data_len.to_le_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            seqnum: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            data_len: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            checksum: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        }
    }

    /// An all-zero header marks an unused slot (never checksum-verified).
    pub fn is_unused(&self) -> bool {
        self.seqnum == 0
    }
}

/// Computes the checksum of a data record: CRC-32 chained over
/// `seqnum ‖ timestamp ‖ data_len ‖ payload` (padding bytes excluded).
pub fn record_checksum(seqnum: u64, timestamp: u64, data_len: u32, payload: &[u8]) -> u32 {
    let c = crc32(&seqnum.to_le_bytes(), 0);
    let c = crc32(&timestamp.to_le_bytes(), c);
    let c = crc32(&data_len.to_le_bytes(), c);
    crc32(payload, c)
}

/// An on-disk index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub seqnum: u64,
    pub timestamp: u64,
    pub pos: u64,
}

impl IndexRecord {
    pub fn encode(&self) -> [u8; INDEX_RECORD_SIZE as usize] {
        let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.seqnum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..24].copy_from_slice(&self.pos.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            seqnum: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            pos: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }

    pub fn is_unused(&self) -> bool {
        self.seqnum == 0
    }
}

// ------------------------------------------------------------------------
// I/O helpers
// ------------------------------------------------------------------------

/// Current on-disk length of `file`.
pub fn file_len(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.len())
}

/// Zero-fills the byte range `[from, to)` of `file` in place. `to` must not
/// exceed the file's current length; this never changes the file's size.
pub fn zero_fill(file: &File, from: u64, to: u64) -> io::Result<()> {
    if to <= from {
        return Ok(());
    }
    const CHUNK: usize = 64 * 1024;
    let zeros = [0u8; CHUNK];
    let mut offset = from;
    while offset < to {
        let want = std::cmp::min(CHUNK as u64, to - offset) as usize;
        file.write_at(&zeros[..want], offset)?;
        offset += want as u64;
    }
    Ok(())
}

/// Copies the byte range `[src_start, src_end)` of `src` to `dst` starting
/// at `dst_start`, via positional reads/writes (no shared seek cursor).
pub fn copy_range(
    src: &File,
    src_start: u64,
    src_end: u64,
    dst: &File,
    dst_start: u64,
) -> io::Result<()> {
    const CHUNK: usize = 64 * 1024;
    let mut buf = [0u8; CHUNK];
    let mut soff = src_start;
    let mut doff = dst_start;
    while soff < src_end {
        let want = std::cmp::min(CHUNK as u64, src_end - soff) as usize;
        src.read_exact_at(&mut buf[..want], soff)?;
        dst.write_all_at(&buf[..want], doff)?;
        soff += want as u64;
        doff += want as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_len_rounds_up_to_word() {
        assert_eq!(pad_len(0), 0);
        for n in 1..=WORD as u32 {
            let expected = (WORD - u64::from(n) % WORD) % WORD;
            assert_eq!(pad_len(n), expected, "n={n}");
        }
    }

    #[test]
    fn record_span_includes_header_payload_and_pad() {
        assert_eq!(record_span(0), DATA_RECORD_SIZE);
        let span = record_span(3);
        assert_eq!(span, DATA_RECORD_SIZE + 3 + pad_len(3));
        assert_eq!(span % WORD, 0);
    }

    #[test]
    fn header_round_trip() {
        let header = FileHeader::new("hello");
        let encoded = header.encode();
        let decoded = FileHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.magic, MAGIC);
        assert_eq!(decoded.format, FORMAT);
        assert_eq!(&decoded.text[..5], b"hello");
        assert!(decoded.text[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut encoded = FileHeader::new("x").encode();
        encoded[0] ^= 0xFF;
        assert!(FileHeader::decode(&encoded).is_err());
    }

    #[test]
    fn data_record_round_trip() {
        let hdr = DataRecordHeader {
            seqnum: 42,
            timestamp: 100,
            data_len: 7,
            checksum: 0xDEAD_BEEF,
        };
        let encoded = hdr.encode();
        assert_eq!(DataRecordHeader::decode(&encoded), hdr);
    }

    #[test]
    fn index_record_round_trip() {
        let rec = IndexRecord {
            seqnum: 1,
            timestamp: 2,
            pos: 128,
        };
        assert_eq!(IndexRecord::decode(&rec.encode()), rec);
    }

    #[test]
    fn index_slot_pos_is_dense() {
        assert_eq!(index_slot_pos(10, 10), HEADER_SIZE);
        assert_eq!(index_slot_pos(10, 11), HEADER_SIZE + INDEX_RECORD_SIZE);
        assert_eq!(index_slot_pos(10, 15), HEADER_SIZE + 5 * INDEX_RECORD_SIZE);
    }
}
