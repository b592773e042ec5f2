//! # Open-Time Recovery
//!
//! Opening an engine reconstructs the committed-transaction list from the
//! redo log and repairs whatever a crash left behind:
//!
//! 1. Create the directory when absent (mode 0700 on unix).
//! 2. If the log is absent but the staging file exists, a crash interrupted
//!    a truncation after the old log was removed; the rename is completed.
//! 3. Scan the log, frame by frame, keeping every transaction that parsed
//!    cleanly in log order.
//! 4. If the scan stopped before EOF the tail is torn: the log is rewritten
//!    to the clean prefix through the tmp-file swap, so the next append
//!    lands on a well-formed file.
//!
//! Re-applying redo records is idempotent, so it is also fine for a crash
//! to leave the old log in place after some backing files were folded; the
//! replay reproduces the same bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{Rvm, SyncMode};
use crate::log::{self, LogWriter};

impl Rvm {
    pub(crate) fn open_with(directory: PathBuf, sync_mode: SyncMode) -> Result<Self> {
        create_engine_dir(&directory)?;

        let log_path = log::log_path(&directory);
        let tmp_log_path = log::tmp_log_path(&directory);

        if !log_path.exists() && tmp_log_path.exists() {
            // A truncation crashed between removing the old log and
            // renaming the staging file into place.
            fs::rename(&tmp_log_path, &log_path).wrap_err_with(|| {
                format!(
                    "failed to complete interrupted truncation {:?} -> {:?}",
                    tmp_log_path, log_path
                )
            })?;
        } else if tmp_log_path.exists() {
            // Stale staging file from a truncation that never swapped; the
            // existing log is authoritative.
            fs::remove_file(&tmp_log_path).wrap_err_with(|| {
                format!("failed to remove stale staging file {:?}", tmp_log_path)
            })?;
        }

        let scan = log::scan(&log_path)?;
        if scan.torn {
            eprintln!(
                "[recovery] redo log {:?} has a torn tail; keeping {} committed transaction(s) ({} bytes)",
                log_path,
                scan.transactions.len(),
                scan.clean_len
            );
            rewrite_clean_prefix(&log_path, &tmp_log_path, scan.clean_len)?;
        }

        let writer = LogWriter::append_to(&log_path, sync_mode == SyncMode::Full)?;

        Ok(Self {
            directory,
            log_path,
            tmp_log_path,
            sync_mode,
            next_segment_id: 1,
            segments: HashMap::new(),
            by_name: HashMap::new(),
            active: HashMap::new(),
            committed: scan.transactions,
            log: Mutex::new(writer),
        })
    }
}

fn create_engine_dir(directory: &Path) -> Result<()> {
    if directory.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(directory)
            .wrap_err_with(|| format!("failed to create engine directory {:?}", directory))
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(directory)
            .wrap_err_with(|| format!("failed to create engine directory {:?}", directory))
    }
}

/// Rewrites the log to its first `clean_len` bytes via the staging file, so
/// torn bytes never precede a future append.
fn rewrite_clean_prefix(log_path: &Path, tmp_log_path: &Path, clean_len: u64) -> Result<()> {
    let src = File::open(log_path)
        .wrap_err_with(|| format!("failed to open redo log {:?} for rewrite", log_path))?;
    let mut dst = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_log_path)
        .wrap_err_with(|| format!("failed to create staging file {:?}", tmp_log_path))?;

    io::copy(&mut src.take(clean_len), &mut dst)
        .wrap_err("failed to copy the clean log prefix into the staging file")?;
    dst.sync_all()
        .wrap_err_with(|| format!("failed to sync staging file {:?}", tmp_log_path))?;

    fs::remove_file(log_path)
        .wrap_err_with(|| format!("failed to remove torn redo log {:?}", log_path))?;
    fs::rename(tmp_log_path, log_path).wrap_err_with(|| {
        format!(
            "failed to swap staging file {:?} into place at {:?}",
            tmp_log_path, log_path
        )
    })
}
