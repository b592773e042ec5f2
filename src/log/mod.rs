//! # Redo Log
//!
//! This module implements the append-only commit log for recoverable
//! virtual memory. Every committed transaction that produced redo records is
//! appended as one self-delimited frame; on open the log is scanned to
//! rebuild the committed-transaction list, and `truncate_log` folds it into
//! the segment backing files.
//!
//! ## File Layout
//!
//! ```text
//! engine_dir/
//! ├── seg_<name>.rvm      # segment backing files (checkpointed bytes)
//! ├── redo_log.rvm        # concatenated transaction frames
//! └── redo_log.rvm.tmp    # checkpoint / truncation staging file
//! ```
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+-------------+------------------+-------------+-----------+
//! | trans_id  | num_records | record ...       | num_records | trans_id  |
//! | (u64)     | (u64)       | (variable)       | (u64)       | (u64)     |
//! +-----------+-------------+------------------+-------------+-----------+
//! ```
//!
//! A record is a `u32` tag (1 = Write, 2 = Destroy) followed by the segment
//! name, and for writes the offset and post-image bytes, all length-prefixed
//! with `u64` fields. See [`codec`] for the exact layout.
//!
//! ## Write Protocol
//!
//! 1. Encode header + records + trailer into one buffer
//! 2. Append the buffer to the log with a single `write_all`
//! 3. Sync to disk when the engine runs with `SyncMode::Full`
//!
//! ## Read Protocol
//!
//! 1. Memory-map the log read-only
//! 2. Parse frames sequentially
//! 3. Accept a frame only when the trailer repeats the header exactly and
//!    every record parsed
//! 4. On the first failure, stop: the remainder is a torn tail
//!
//! ## Torn-Tail Tolerance
//!
//! The repeated header fields in the trailer act as the commit marker. A
//! crash mid-append leaves a frame without a matching trailer; the scan
//! discards that frame and everything after it, and the engine rewrites the
//! log to the clean prefix through the tmp-file swap. A transaction is
//! therefore durable exactly when its trailer bytes reached disk.

pub mod codec;

pub use codec::{FrameParser, FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE};

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use memmap2::Mmap;

use crate::txn::{CommittedTransaction, RedoRecord, TransId};

pub const LOG_FILE_NAME: &str = "redo_log.rvm";

/// Path of the redo log under an engine directory.
pub fn log_path(directory: &Path) -> PathBuf {
    directory.join(LOG_FILE_NAME)
}

/// Path of the truncation staging file: the log path plus `.tmp`.
pub fn tmp_log_path(directory: &Path) -> PathBuf {
    let mut path = log_path(directory).into_os_string();
    path.push(".tmp");
    PathBuf::from(path)
}

/// Append-only writer over a redo-log file.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    sync: bool,
}

impl LogWriter {
    /// Opens the log for appending, creating it when absent.
    pub fn append_to(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open redo log at {:?}", path))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            sync,
        })
    }

    /// Creates an empty log file, truncating any previous content. Used for
    /// staging a replacement log during truncation.
    pub fn create(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create redo log at {:?}", path))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            sync,
        })
    }

    /// Appends one framed transaction and makes it durable according to the
    /// sync policy. The frame is written with a single `write_all` so a
    /// crash tears at most one frame.
    pub fn append(&mut self, trans_id: TransId, records: &[RedoRecord]) -> Result<()> {
        let frame = codec::encode_frame(trans_id, records);

        self.file
            .write_all(&frame)
            .wrap_err_with(|| format!("failed to append transaction frame to {:?}", self.path))?;

        if self.sync {
            self.file
                .sync_all()
                .wrap_err_with(|| format!("failed to sync redo log {:?}", self.path))?;
        }

        Ok(())
    }

    /// Forces the file to stable storage regardless of the sync policy.
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync redo log {:?}", self.path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of scanning a redo log on open.
pub struct LogScan {
    /// Cleanly parsed transactions, in log order.
    pub transactions: Vec<CommittedTransaction>,
    /// Byte length of the valid frame prefix.
    pub clean_len: u64,
    /// True when bytes after the valid prefix were discarded.
    pub torn: bool,
}

/// Scans a redo log, stopping cleanly at the first corruption.
///
/// A missing or empty log is a normal empty scan, not an error.
pub fn scan(path: &Path) -> Result<LogScan> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(LogScan {
                transactions: Vec::new(),
                clean_len: 0,
                torn: false,
            });
        }
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("failed to open redo log at {:?}", path));
        }
    };

    let len = file
        .metadata()
        .wrap_err_with(|| format!("failed to stat redo log at {:?}", path))?
        .len();
    if len == 0 {
        return Ok(LogScan {
            transactions: Vec::new(),
            clean_len: 0,
            torn: false,
        });
    }

    let mmap = unsafe {
        Mmap::map(&file).wrap_err_with(|| format!("failed to mmap redo log at {:?}", path))?
    };

    let mut parser = FrameParser::new(&mmap);
    let mut transactions = Vec::new();
    while let Some(frame) = parser.next_frame() {
        transactions.push(frame);
    }

    Ok(LogScan {
        transactions,
        clean_len: parser.clean_len() as u64,
        torn: !parser.at_end(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_log_scans_to_empty() {
        let dir = tempdir().unwrap();
        let scan = scan(&log_path(dir.path())).unwrap();
        assert!(scan.transactions.is_empty());
        assert!(!scan.torn);
    }

    #[test]
    fn appended_frames_scan_back_in_order() {
        let dir = tempdir().unwrap();
        let path = log_path(dir.path());

        let mut writer = LogWriter::append_to(&path, false).unwrap();
        writer
            .append(
                3,
                &[RedoRecord::Write {
                    segment: "a".to_owned(),
                    offset: 0,
                    data: b"one".to_vec(),
                }],
            )
            .unwrap();
        writer.append(4, &[RedoRecord::destroy("a")]).unwrap();

        let scan = scan(&path).unwrap();
        assert_eq!(scan.transactions.len(), 2);
        assert_eq!(scan.transactions[0].id, 3);
        assert_eq!(scan.transactions[1].id, 4);
        assert!(!scan.torn);
        assert_eq!(scan.clean_len, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn torn_tail_is_reported_with_the_clean_prefix_length() {
        let dir = tempdir().unwrap();
        let path = log_path(dir.path());

        let mut writer = LogWriter::append_to(&path, false).unwrap();
        writer
            .append(
                1,
                &[RedoRecord::Write {
                    segment: "s".to_owned(),
                    offset: 8,
                    data: b"payload".to_vec(),
                }],
            )
            .unwrap();
        let clean = std::fs::metadata(&path).unwrap().len();

        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(b"\xde\xad\xbe\xef torn tail").unwrap();

        let scan = scan(&path).unwrap();
        assert_eq!(scan.transactions.len(), 1);
        assert!(scan.torn, "garbage after the frame SHOULD mark the log torn");
        assert_eq!(scan.clean_len, clean);
    }
}
