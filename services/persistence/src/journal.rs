//! Journal Writer: append-only record log with checksums
//!
//! Every store record is written as one framed entry:
//!
//! ```text
//! [body_len:     u32]
//! [sequence:     u64]
//! [timestamp_ms: i64]
//! [kind_len:     u16][kind: utf-8]
//! [payload_len:  u32][payload: json]
//! [checksum:     u32]  // CRC32C over sequence+timestamp+kind+payload
//! ```
//!
//! Segments are named `segment-NNNNNN.wal`. A writer never appends to a
//! segment written by an earlier process: it always opens a fresh one, so a
//! torn tail left by a crash cannot swallow entries written after restart.

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on a single frame body; anything larger is corruption
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// 8 (seq) + 8 (ts) + 2 (kind_len) + 4 (payload_len) + 4 (crc)
const MIN_BODY_LEN: usize = 26;

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".wal";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One persisted record
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Journal-wide sequence, gapless from 1
    pub sequence: u64,
    /// Wall-clock time of the write, Unix milliseconds
    pub timestamp_ms: i64,
    /// Record kind, e.g. `OrderUpserted`
    pub kind: String,
    /// JSON-encoded record
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp_ms: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp_ms, &kind, &payload);
        Self {
            sequence,
            timestamp_ms,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp_ms: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp_ms.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.timestamp_ms, &self.kind, &self.payload)
    }

    /// Encode into the framed on-disk format
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let kind = self.kind.as_bytes();
        let kind_len = u16::try_from(kind.len())
            .map_err(|_| JournalError::Malformed(format!("record kind too long: {} bytes", kind.len())))?;
        let payload_len = u32::try_from(self.payload.len())
            .map_err(|_| JournalError::Malformed(format!("payload too long: {} bytes", self.payload.len())))?;

        let body_len = MIN_BODY_LEN + kind.len() + self.payload.len();
        if body_len > MAX_FRAME_LEN {
            return Err(JournalError::Malformed(format!(
                "frame of {} bytes exceeds limit {}",
                body_len, MAX_FRAME_LEN
            )));
        }

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&kind_len.to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        Ok(buf)
    }

    /// Decode one frame from the front of `data`
    ///
    /// Returns the entry and the number of bytes consumed. The checksum is
    /// not verified here; readers decide what to do with a mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let mut frame = FrameCursor::new(data);
        let body_len = frame.u32()? as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(JournalError::Malformed(format!(
                "implausible body length {}",
                body_len
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Malformed(format!(
                "body of {} bytes is below the minimum {}",
                body_len, MIN_BODY_LEN
            )));
        }

        let mut body = FrameCursor::new(frame.take(body_len)?);
        let sequence = body.u64()?;
        let timestamp_ms = body.i64()?;
        let kind_len = body.u16()? as usize;
        let kind = String::from_utf8(body.take(kind_len)?.to_vec())
            .map_err(|e| JournalError::Malformed(e.to_string()))?;
        let payload_len = body.u32()? as usize;
        let payload = body.take(payload_len)?.to_vec();
        let checksum = body.u32()?;
        if body.remaining() != 0 {
            return Err(JournalError::Malformed(format!(
                "{} trailing bytes inside frame",
                body.remaining()
            )));
        }

        let entry = Self {
            sequence,
            timestamp_ms,
            kind,
            payload,
            checksum,
        };
        Ok((entry, 4 + body_len))
    }
}

/// Bounds-checked little-endian reader over a byte slice
struct FrameCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], JournalError> {
        if n > self.remaining() {
            return Err(JournalError::Malformed(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JournalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, JournalError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, JournalError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, JournalError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, JournalError> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// When buffered bytes are handed to the OS
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// When `fsync` is called
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    /// Only when a segment is closed
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Segment size that triggers rotation (default 64 MiB)
    pub max_file_size: u64,
    /// Total journal size cap in bytes (0 = unlimited)
    pub max_total_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only writer with checksums, rotation and fsync control
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
}

impl JournalWriter {
    /// Open a writer on a fresh segment, creating the directory if needed
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = segment_indices(&config.dir)?.last().map_or(0, |latest| latest + 1);
        let current_file = segment_path(&config.dir, file_index);
        let file = OpenOptions::new().create(true).append(true).open(&current_file)?;
        let total_size = Self::compute_total_size(&config.dir)?;

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size: 0,
            next_sequence: 1,
            writes_since_flush: 0,
            writes_since_fsync: 0,
            file_index,
            total_size,
        })
    }

    /// Continue numbering after a replayed journal
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append a prepared entry; its sequence must be the next one
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = entry.to_bytes()?;
        self.writer.write_all(&bytes)?;

        let written = bytes.len() as u64;
        self.current_file_size += written;
        self.total_size += written;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;
        Ok(())
    }

    /// Stamp the next sequence onto a record and append it
    pub fn append_record(
        &mut self,
        timestamp_ms: i64,
        kind: &str,
        payload: Vec<u8>,
    ) -> Result<JournalEntry, JournalError> {
        let entry = JournalEntry::new(self.next_sequence, timestamp_ms, kind, payload);
        self.append(&entry)?;
        Ok(entry)
    }

    /// Force flush + fsync
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Cheap writability check for health reporting
    pub fn probe(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().metadata()?;
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = segment_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new().create(true).append(true).open(&self.current_file)?;

        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }

    fn compute_total_size(dir: &Path) -> Result<u64, JournalError> {
        let mut total = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", SEGMENT_PREFIX, index, SEGMENT_SUFFIX))
}

/// Segment indices present in `dir`, ascending
pub(crate) fn segment_indices(dir: &Path) -> io::Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut indices: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.strip_prefix(SEGMENT_PREFIX)?
                .strip_suffix(SEGMENT_SUFFIX)?
                .parse::<u64>()
                .ok()
        })
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry(seq: u64) -> JournalEntry {
        JournalEntry::new(
            seq,
            1_700_000_000_000 + seq as i64,
            "TradeRecorded",
            format!("{{\"n\":{}}}", seq).into_bytes(),
        )
    }

    #[test]
    fn test_checksum_detects_tamper() {
        let mut entry = sample_entry(1);
        assert!(entry.verify_checksum());
        entry.payload[0] ^= 0xFF;
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_frame_decodes_what_was_encoded() {
        let entry = sample_entry(7);
        let bytes = entry.to_bytes().unwrap();
        let (decoded, consumed) = JournalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_truncated_frame_is_an_error_not_a_panic() {
        let bytes = sample_entry(1).to_bytes().unwrap();
        for cut in 0..bytes.len() {
            assert!(JournalEntry::from_bytes(&bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_lying_inner_length_rejected() {
        let mut bytes = sample_entry(1).to_bytes().unwrap();
        // kind_len sits after body_len(4) + seq(8) + ts(8)
        bytes[20] = 0xFF;
        bytes[21] = 0xFF;
        assert!(matches!(
            JournalEntry::from_bytes(&bytes),
            Err(JournalError::Malformed(_))
        ));
    }

    #[test]
    fn test_append_assigns_sequences() {
        let dir = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(dir.path())).unwrap();

        let first = writer.append_record(0, "A", b"{}".to_vec()).unwrap();
        let second = writer.append_record(0, "B", b"{}".to_vec()).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(writer.next_sequence(), 3);
    }

    #[test]
    fn test_sequence_error_on_gap() {
        let dir = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(dir.path())).unwrap();
        writer.append(&sample_entry(1)).unwrap();

        let err = writer.append(&sample_entry(3)).unwrap_err();
        assert!(matches!(err, JournalError::SequenceError { expected: 2, got: 3 }));
    }

    #[test]
    fn test_reopen_starts_fresh_segment() {
        let dir = TempDir::new().unwrap();
        let first_path = {
            let mut writer = JournalWriter::open(JournalConfig::new(dir.path())).unwrap();
            writer.append(&sample_entry(1)).unwrap();
            writer.current_file_path().to_path_buf()
        };

        let writer = JournalWriter::open(JournalConfig::new(dir.path())).unwrap();
        assert_ne!(writer.current_file_path(), first_path.as_path());
        assert!(writer
            .current_file_path()
            .to_string_lossy()
            .ends_with("segment-000001.wal"));
    }

    #[test]
    fn test_rotation_on_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = JournalConfig::new(dir.path());
        config.max_file_size = 100;
        let mut writer = JournalWriter::open(config).unwrap();

        for seq in 1..=10 {
            writer.append(&sample_entry(seq)).unwrap();
        }
        assert!(segment_indices(dir.path()).unwrap().len() > 1);
    }

    #[test]
    fn test_total_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = JournalConfig::new(dir.path());
        config.max_total_size = 120;
        let mut writer = JournalWriter::open(config).unwrap();

        let mut result = Ok(());
        for seq in 1..=10 {
            result = writer.append(&sample_entry(seq));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(JournalError::SizeLimitExceeded { .. })));
    }

    #[test]
    fn test_fsync_every_n_and_probe() {
        let dir = TempDir::new().unwrap();
        let mut config = JournalConfig::new(dir.path());
        config.flush_policy = FlushPolicy::EveryN(2);
        config.fsync_policy = FsyncPolicy::EveryN(3);
        let mut writer = JournalWriter::open(config).unwrap();

        for seq in 1..=5 {
            writer.append(&sample_entry(seq)).unwrap();
        }
        writer.probe().unwrap();
        writer.sync().unwrap();

        let len = fs::metadata(writer.current_file_path()).unwrap().len();
        assert!(len > 0);
    }
}
