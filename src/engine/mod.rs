//! # RVM Engine
//!
//! The engine owns one recoverable-memory directory: its mapped segments,
//! its redo log, and the committed transactions decoded from that log. All
//! operations are methods on [`Rvm`] and assume exclusive, serialized access
//! from one thread of control; state mutations are linearizable in call
//! order and nothing blocks except synchronous filesystem I/O.
//!
//! ## Control Flow
//!
//! ```text
//!  open(dir) ──> scan redo_log.rvm ──> committed list (log order)
//!                                          │
//!  map(name, size) ──> Segment::load ◄─────┘ records_for(name)
//!       │
//!  begin_trans([ids]) ──> claim ownership ──> TransId
//!       │
//!  about_to_modify ──> UndoRecord (pre-image snapshot)
//!       │
//!       ├─ commit_trans ──> post-images ──> log frame ──> committed list
//!       └─ abort_trans  ──> LIFO rollback ──> transaction discarded
//!
//!  truncate_log ──> fold committed records into seg_<name>.rvm,
//!                   rewrite the log through redo_log.rvm.tmp
//! ```
//!
//! ## Error Classes
//!
//! Recoverable misuse (double map, begin on an owned segment, empty name,
//! zero size) returns an error and leaves the engine untouched. Programmer
//! bugs the library cannot recover from (unknown transaction id, window out
//! of bounds, modifying a segment the transaction does not own, unmapping
//! an owned segment) panic; no partial state is unwound. Log corruption
//! found at open is not an error at all — the torn tail is discarded.

mod builder;
mod recovery;
mod truncate;

pub use builder::{RvmBuilder, SyncMode};

use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::log::LogWriter;
use crate::segment::{Segment, SegmentId};
use crate::txn::{
    next_trans_id, CommittedTransaction, RedoRecord, TransId, TransState, Transaction, UndoRecord,
};

/// A recoverable-virtual-memory engine rooted at one directory.
pub struct Rvm {
    directory: PathBuf,
    log_path: PathBuf,
    tmp_log_path: PathBuf,
    sync_mode: SyncMode,
    next_segment_id: u64,
    segments: HashMap<SegmentId, Segment>,
    by_name: HashMap<String, SegmentId>,
    active: HashMap<TransId, Transaction>,
    committed: Vec<CommittedTransaction>,
    log: Mutex<LogWriter>,
}

impl Rvm {
    /// Opens (or creates) an engine directory with default settings.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        Self::builder().directory(directory).open()
    }

    /// Returns a builder for configuring and opening an engine.
    pub fn builder() -> RvmBuilder {
        RvmBuilder::new()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of committed transactions currently held in memory (and in
    /// the log, minus anything already folded by truncation).
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    pub fn is_mapped(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Maps a named segment of exactly `size` bytes.
    ///
    /// The backing file is read if present (short reads zero-filled), then
    /// every committed redo write for `name` is replayed in log order.
    /// Fails recoverably when the name is already mapped, empty, unsafe for
    /// a filename, or when `size` is zero.
    pub fn map(&mut self, name: &str, size: usize) -> Result<SegmentId> {
        validate_name(name)?;
        ensure!(size > 0, "segment size must be positive");
        ensure!(
            !self.by_name.contains_key(name),
            "segment {:?} is already mapped",
            name
        );

        let redo = self.records_for(name);
        let segment = Segment::load(&self.directory, name, size, &redo)
            .wrap_err_with(|| format!("failed to map segment {:?}", name))?;

        let id = SegmentId::from_raw(self.next_segment_id);
        self.next_segment_id += 1;
        self.by_name.insert(name.to_owned(), id);
        self.segments.insert(id, segment);
        Ok(id)
    }

    /// Unmaps a segment and releases its memory.
    ///
    /// # Panics
    ///
    /// Panics when the handle is unknown or the segment is owned by a live
    /// transaction.
    pub fn unmap(&mut self, id: SegmentId) {
        let Some(segment) = self.segments.get(&id) else {
            panic!("unmap: unknown segment handle {:?}", id);
        };
        if let Some(owner) = segment.owner() {
            panic!(
                "unmap: segment {:?} is owned by transaction {}",
                segment.name(),
                owner
            );
        }

        let name = segment.name().to_owned();
        self.segments.remove(&id);
        self.by_name.remove(&name);
    }

    /// Read access to a mapped segment's resident bytes.
    ///
    /// # Panics
    ///
    /// Panics when the handle is unknown.
    pub fn segment(&self, id: SegmentId) -> &[u8] {
        match self.segments.get(&id) {
            Some(segment) => segment.bytes(),
            None => panic!("segment: unknown segment handle {:?}", id),
        }
    }

    /// Write access to a mapped segment's resident bytes. This is how the
    /// application mutates segment memory; only windows declared through
    /// [`Rvm::about_to_modify`] are recoverable.
    ///
    /// # Panics
    ///
    /// Panics when the handle is unknown.
    pub fn segment_mut(&mut self, id: SegmentId) -> &mut [u8] {
        match self.segments.get_mut(&id) {
            Some(segment) => segment.bytes_mut(),
            None => panic!("segment_mut: unknown segment handle {:?}", id),
        }
    }

    pub fn segment_name(&self, id: SegmentId) -> &str {
        match self.segments.get(&id) {
            Some(segment) => segment.name(),
            None => panic!("segment_name: unknown segment handle {:?}", id),
        }
    }

    pub fn segment_size(&self, id: SegmentId) -> usize {
        match self.segments.get(&id) {
            Some(segment) => segment.size(),
            None => panic!("segment_size: unknown segment handle {:?}", id),
        }
    }

    /// Destroys a segment by name: logs a tombstone erasing every earlier
    /// write and removes the backing file.
    ///
    /// A segment that is currently mapped is left untouched; the call
    /// returns silently.
    pub fn destroy(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.by_name.contains_key(name) {
            return Ok(());
        }

        let id = next_trans_id();
        let records = vec![RedoRecord::destroy(name)];
        self.log
            .lock()
            .append(id, &records)
            .wrap_err_with(|| format!("failed to log destroy of segment {:?}", name))?;
        self.committed.push(CommittedTransaction { id, records });

        let backing = Segment::backing_path(&self.directory, name);
        match std::fs::remove_file(&backing) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("failed to remove segment backing file {:?}", backing)
                });
            }
        }
        Ok(())
    }

    /// Begins a transaction over the listed segments, claiming exclusive
    /// ownership of each.
    ///
    /// Fails recoverably when any handle is unknown, already owned by
    /// another transaction, or listed twice.
    pub fn begin_trans(&mut self, segments: &[SegmentId]) -> Result<TransId> {
        for (i, id) in segments.iter().enumerate() {
            let Some(segment) = self.segments.get(id) else {
                bail!("begin_trans: unknown segment handle {:?}", id);
            };
            if let Some(owner) = segment.owner() {
                bail!(
                    "begin_trans: segment {:?} is already owned by transaction {}",
                    segment.name(),
                    owner
                );
            }
            ensure!(
                !segments[..i].contains(id),
                "begin_trans: segment {:?} listed more than once",
                segment.name()
            );
        }

        let tid = next_trans_id();
        for id in segments {
            if let Some(segment) = self.segments.get_mut(id) {
                segment.set_owner(Some(tid));
            }
        }
        self.active.insert(tid, Transaction::new(tid, segments));
        Ok(tid)
    }

    /// Declares that the application is about to modify
    /// `segment[offset .. offset + size]`, snapshotting the pre-image.
    ///
    /// A window identical to one already captured by this transaction is a
    /// no-op; overlapping-but-unequal windows each capture their own
    /// snapshot.
    ///
    /// # Panics
    ///
    /// Panics on an unknown transaction id, a segment the transaction does
    /// not own, a zero-size window, or a window past the segment end.
    pub fn about_to_modify(&mut self, tid: TransId, segment: SegmentId, offset: usize, size: usize) {
        let Some(txn) = self.active.get_mut(&tid) else {
            panic!("about_to_modify: unknown transaction id {}", tid);
        };
        if !txn.owns(segment) {
            panic!(
                "about_to_modify: segment handle {:?} is not owned by transaction {}",
                segment, tid
            );
        }
        let seg = self
            .segments
            .get(&segment)
            .expect("owned segment is always mapped");
        if size == 0 {
            panic!("about_to_modify: zero-size window on segment {:?}", seg.name());
        }
        if offset + size > seg.size() {
            panic!(
                "about_to_modify: window {}..{} exceeds segment {:?} of {} bytes",
                offset,
                offset + size,
                seg.name(),
                seg.size()
            );
        }

        if txn.has_window(segment, offset, size) {
            return;
        }
        txn.push_undo(UndoRecord::capture(
            segment,
            offset,
            &seg.bytes()[offset..offset + size],
        ));
    }

    /// Commits a transaction: captures post-images over every declared
    /// window, appends them to the log as one frame, releases segment
    /// ownership, and retains the transaction on the committed list.
    ///
    /// The log append completes (and under [`SyncMode::Full`] reaches
    /// stable storage) before this returns. A transaction that declared no
    /// windows writes nothing.
    ///
    /// # Panics
    ///
    /// Panics on an unknown transaction id.
    pub fn commit_trans(&mut self, tid: TransId) -> Result<()> {
        let Some(mut txn) = self.active.remove(&tid) else {
            panic!("commit_trans: unknown transaction id {}", tid);
        };

        let mut records = Vec::with_capacity(txn.undo_count());
        for undo in txn.drain_undo() {
            let seg = self
                .segments
                .get(&undo.segment())
                .expect("owned segment is always mapped");
            records.push(RedoRecord::capture(seg, &undo));
        }

        if !records.is_empty() {
            self.log
                .lock()
                .append(tid, &records)
                .wrap_err_with(|| format!("failed to log commit of transaction {}", tid))?;
        }

        for id in txn.segments() {
            if let Some(segment) = self.segments.get_mut(id) {
                segment.set_owner(None);
            }
        }
        txn.set_state(TransState::Committed);
        self.committed.push(CommittedTransaction { id: tid, records });
        Ok(())
    }

    /// Aborts a transaction: restores every captured pre-image in reverse
    /// capture order, releases segment ownership, and discards the
    /// transaction.
    ///
    /// Reverse order matters: overlapping windows must be undone in the
    /// opposite order they were captured so the earliest snapshot wins.
    ///
    /// # Panics
    ///
    /// Panics on an unknown transaction id.
    pub fn abort_trans(&mut self, tid: TransId) {
        let Some(mut txn) = self.active.remove(&tid) else {
            panic!("abort_trans: unknown transaction id {}", tid);
        };

        while let Some(undo) = txn.pop_undo() {
            let seg = self
                .segments
                .get_mut(&undo.segment())
                .expect("owned segment is always mapped");
            undo.rollback_into(seg.bytes_mut());
        }

        for id in txn.segments() {
            if let Some(segment) = self.segments.get_mut(id) {
                segment.set_owner(None);
            }
        }
        txn.set_state(TransState::Aborted);
    }

    /// The filtered, ordered list of committed redo writes for `name`.
    ///
    /// Scanning the committed list in log order, every destroy tombstone
    /// for `name` empties the accumulator and subsequent writes
    /// re-accumulate; the survivors are what a fresh mapping replays.
    pub(crate) fn records_for(&self, name: &str) -> Vec<(usize, &[u8])> {
        let mut acc: Vec<(usize, &[u8])> = Vec::new();
        for txn in &self.committed {
            for record in &txn.records {
                match record {
                    RedoRecord::Write {
                        segment,
                        offset,
                        data,
                    } if segment == name => acc.push((*offset, data.as_slice())),
                    RedoRecord::Destroy { segment } if segment == name => acc.clear(),
                    _ => {}
                }
            }
        }
        acc
    }
}

fn validate_name(name: &str) -> Result<()> {
    ensure!(!name.is_empty(), "segment name must not be empty");
    ensure!(
        !name.contains(['/', '\\', '\0']),
        "segment name {:?} is not filesystem-safe",
        name
    );
    Ok(())
}
