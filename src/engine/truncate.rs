//! # Log Truncation (Checkpoint)
//!
//! Truncation folds the committed redo records into the segment backing
//! files and rewrites the log so it no longer carries what the files now
//! hold. The observable state of every segment — backing file plus
//! remaining log — is identical before and after, which also makes the
//! operation idempotent.
//!
//! ## Protocol
//!
//! 1. Group all committed redo writes by segment name, preserving log
//!    order; a destroy tombstone clears that name's group and later writes
//!    re-accumulate.
//! 2. Fold each group into `seg_<name>.rvm`: zero-extend the file up to the
//!    write offset when it is shorter, then write the post-image. Writes
//!    are applied in log order so later writes over the same range win.
//!    Folded files are synced before the log is touched.
//! 3. Records of any group that failed to fold survive as a single fresh
//!    transaction in the staging file; everything folded is dropped.
//! 4. Swap atomically: remove the log, rename the staging file into place.
//!    A crash before the rename leaves the old log authoritative (folding
//!    is idempotent re-application); a crash after leaves the new one.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{Result, WrapErr};
use hashbrown::{HashMap, HashSet};

use super::Rvm;
use crate::log::LogWriter;
use crate::segment::Segment;
use crate::txn::{next_trans_id, CommittedTransaction, RedoRecord};

impl Rvm {
    /// Folds the committed log into segment backing files and rewrites the
    /// log to hold only records that could not be applied.
    pub fn truncate_log(&mut self) -> Result<()> {
        let mut failed: HashSet<String> = HashSet::new();

        {
            let mut groups: HashMap<&str, Vec<(usize, &[u8])>> = HashMap::new();
            for txn in &self.committed {
                for record in &txn.records {
                    match record {
                        RedoRecord::Write {
                            segment,
                            offset,
                            data,
                        } => groups
                            .entry(segment.as_str())
                            .or_default()
                            .push((*offset, data.as_slice())),
                        RedoRecord::Destroy { segment } => {
                            groups.remove(segment.as_str());
                        }
                    }
                }
            }

            for (name, writes) in &groups {
                if let Err(err) = fold_into_backing(&self.directory, name, writes) {
                    eprintln!(
                        "[truncate] keeping {} redo record(s) for segment {:?} in the log: {:#}",
                        writes.len(),
                        name,
                        err
                    );
                    failed.insert((*name).to_owned());
                }
            }
        }

        // Second pass with the same tombstone-clearing rule, restricted to
        // names that failed to fold, preserving log order.
        let mut unbacked: Vec<RedoRecord> = Vec::new();
        if !failed.is_empty() {
            for txn in &self.committed {
                for record in &txn.records {
                    match record {
                        RedoRecord::Write { segment, .. } if failed.contains(segment) => {
                            unbacked.push(record.clone());
                        }
                        RedoRecord::Destroy { segment } if failed.contains(segment) => {
                            unbacked.retain(|kept| kept.segment() != segment);
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut staging = LogWriter::create(&self.tmp_log_path, false)?;
        let fresh_id = (!unbacked.is_empty()).then(next_trans_id);
        if let Some(id) = fresh_id {
            staging
                .append(id, &unbacked)
                .wrap_err("failed to stage unbacked records during truncation")?;
        }
        staging.sync()?;
        drop(staging);

        match std::fs::remove_file(&self.log_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .wrap_err_with(|| format!("failed to remove redo log {:?}", self.log_path));
            }
        }
        std::fs::rename(&self.tmp_log_path, &self.log_path).wrap_err_with(|| {
            format!(
                "failed to swap staging file {:?} into place at {:?}",
                self.tmp_log_path, self.log_path
            )
        })?;

        self.committed.clear();
        if let Some(id) = fresh_id {
            self.committed.push(CommittedTransaction {
                id,
                records: unbacked,
            });
        }

        let sync = self.sync_mode == super::SyncMode::Full;
        *self.log.lock() = LogWriter::append_to(&self.log_path, sync)?;
        Ok(())
    }
}

/// Applies one segment's redo writes to its backing file in log order.
fn fold_into_backing(directory: &Path, name: &str, writes: &[(usize, &[u8])]) -> Result<()> {
    let path = Segment::backing_path(directory, name);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(&path)
        .wrap_err_with(|| format!("failed to open segment backing file {:?}", path))?;

    let mut len = file
        .metadata()
        .wrap_err_with(|| format!("failed to stat segment backing file {:?}", path))?
        .len();

    for &(offset, data) in writes {
        let offset = offset as u64;
        if len < offset {
            // Zero padding up to the write offset.
            file.set_len(offset)
                .wrap_err_with(|| format!("failed to extend backing file {:?}", path))?;
            len = offset;
        }
        file.seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek in backing file {:?}", path))?;
        file.write_all(data)
            .wrap_err_with(|| format!("failed to write backing file {:?}", path))?;
        len = len.max(offset + data.len() as u64);
    }

    file.sync_all()
        .wrap_err_with(|| format!("failed to sync backing file {:?}", path))
}
