//! Journal Reader: sequential reader with corruption detection
//!
//! Reads segments in index order and validates every checksum. A frame
//! whose checksum fails is skipped (its length prefix is still trusted);
//! a frame that cannot be parsed at all ends that segment, since nothing
//! after a torn write can be located reliably.

use crate::journal::{segment_indices, segment_path, JournalEntry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch in {file} at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch {
        file: String,
        offset: u64,
        sequence: u64,
    },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Sequence not monotonic: prev={prev}, current={current}")]
    NotMonotonic { prev: u64, current: u64 },
}

// ── Corruption Log Entry ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    pub file: PathBuf,
    /// Byte offset within `file`
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over every segment in `dir`; a missing dir reads empty
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = segment_indices(dir)?
            .into_iter()
            .map(|idx| segment_path(dir, idx))
            .collect();
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Next entry with a valid checksum, or `None` at the end
    ///
    /// A checksum failure is returned as an error after the bad frame has
    /// been stepped over, so the caller may keep reading.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }

            let offset = self.pos as u64;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    self.pos += consumed;
                    if !entry.verify_checksum() {
                        let file = self.current_file();
                        self.corruption_log.push(CorruptionRecord {
                            file: file.clone(),
                            byte_offset: offset,
                            kind: CorruptionKind::ChecksumMismatch,
                            detail: format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        });
                        return Err(ReaderError::ChecksumMismatch {
                            file: file.display().to_string(),
                            offset,
                            sequence: entry.sequence,
                        });
                    }
                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(e) => {
                    let remaining = self.data.len() - self.pos;
                    self.corruption_log.push(CorruptionRecord {
                        file: self.current_file(),
                        byte_offset: offset,
                        kind: CorruptionKind::TruncatedEntry,
                        detail: format!("{} bytes unreadable: {}", remaining, e),
                    });
                    self.pos = self.data.len();
                }
            }
        }
    }

    /// Read every entry, stopping at the first checksum failure
    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read as many valid entries as possible, skipping corrupted frames
    pub fn recover_entries(&mut self) -> Result<(Vec<JournalEntry>, Vec<CorruptionRecord>), ReaderError> {
        let mut entries = Vec::new();
        loop {
            match self.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(ReaderError::ChecksumMismatch { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok((entries, self.corruption_log.clone()))
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    /// Check that entries are gapless and strictly increasing
    pub fn validate_sequences(entries: &[JournalEntry]) -> Result<(), ReaderError> {
        for window in entries.windows(2) {
            let (prev, curr) = (&window[0], &window[1]);
            if curr.sequence <= prev.sequence {
                return Err(ReaderError::NotMonotonic {
                    prev: prev.sequence,
                    current: curr.sequence,
                });
            }
            if curr.sequence != prev.sequence + 1 {
                return Err(ReaderError::SequenceGap {
                    expected: prev.sequence + 1,
                    got: curr.sequence,
                });
            }
        }
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn current_file(&self) -> PathBuf {
        self.files
            .get(self.current_file_idx)
            .cloned()
            .unwrap_or_default()
    }

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data = match self.files.get(self.current_file_idx) {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        self.pos = 0;
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        // Empty segments are skipped until one with data is found
        while self.current_file_idx + 1 < self.files.len() {
            self.current_file_idx += 1;
            self.load_current_file()?;
            if !self.data.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_entries(dir: &Path, count: u64) -> PathBuf {
        let mut writer = JournalWriter::open(JournalConfig::new(dir)).unwrap();
        for i in 0..count {
            writer
                .append_record(i as i64, "OrderUpserted", format!("{{\"i\":{}}}", i).into_bytes())
                .unwrap();
        }
        writer.sync().unwrap();
        writer.current_file_path().to_path_buf()
    }

    #[test]
    fn test_sequential_read() {
        let dir = TempDir::new().unwrap();
        write_entries(dir.path(), 5);

        let mut reader = JournalReader::open(dir.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(reader.last_sequence(), Some(5));
        JournalReader::validate_sequences(&entries).unwrap();
    }

    #[test]
    fn test_empty_or_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut reader = JournalReader::open(&dir.path().join("absent")).unwrap();
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_checksum_failure_is_skipped_during_recovery() {
        let dir = TempDir::new().unwrap();
        let path = write_entries(dir.path(), 3);

        // Flip a payload byte of the second frame
        let mut data = fs::read(&path).unwrap();
        let (_, first_len) = JournalEntry::from_bytes(&data).unwrap();
        let target = first_len + 4 + 8 + 8 + 2 + "OrderUpserted".len() + 4;
        data[target] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let mut reader = JournalReader::open(dir.path()).unwrap();
        let (entries, corruption) = reader.recover_entries().unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert_eq!(corruption.len(), 1);
        assert_eq!(corruption[0].kind, CorruptionKind::ChecksumMismatch);
        assert_eq!(corruption[0].byte_offset, first_len as u64);
    }

    #[test]
    fn test_torn_tail_ends_segment_but_not_journal() {
        let dir = TempDir::new().unwrap();
        let path = write_entries(dir.path(), 2);
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0x30, 0x00, 0x00])
            .unwrap();

        // A restarted writer continues in a new segment
        let mut writer = JournalWriter::open(JournalConfig::new(dir.path())).unwrap();
        writer.set_next_sequence(3);
        writer.append_record(0, "OrderUpserted", b"{}".to_vec()).unwrap();
        writer.sync().unwrap();

        let mut reader = JournalReader::open(dir.path()).unwrap();
        let (entries, corruption) = reader.recover_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(corruption.len(), 1);
        assert_eq!(corruption[0].kind, CorruptionKind::TruncatedEntry);
    }

    #[test]
    fn test_sequence_validation() {
        let entries = vec![
            JournalEntry::new(1, 0, "A", vec![]),
            JournalEntry::new(2, 0, "A", vec![]),
            JournalEntry::new(4, 0, "A", vec![]),
        ];
        assert!(matches!(
            JournalReader::validate_sequences(&entries),
            Err(ReaderError::SequenceGap { expected: 3, got: 4 })
        ));

        let entries = vec![JournalEntry::new(2, 0, "A", vec![]), JournalEntry::new(2, 0, "A", vec![])];
        assert!(matches!(
            JournalReader::validate_sequences(&entries),
            Err(ReaderError::NotMonotonic { prev: 2, current: 2 })
        ));
    }
}
