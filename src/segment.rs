//! # Resident Segments
//!
//! A segment is a named, fixed-size byte region that lives both in process
//! memory and on disk. The in-memory image is the authority while the
//! segment is mapped; the backing file `seg_<name>.rvm` holds the last
//! checkpointed bytes and is only rewritten by `truncate_log`.
//!
//! ## Loading
//!
//! Mapping a segment reads up to `size` bytes from the backing file into a
//! freshly zeroed buffer (a missing file or a short read is normal; the
//! remainder stays zero), then replays the committed redo writes for that
//! name in log order. Writes extending past `size` are clipped and writes
//! starting at or beyond `size` are skipped, so remapping at a smaller size
//! than a previous incarnation is well defined.
//!
//! ## Ownership
//!
//! At most one transaction owns a segment at a time. The owner field is a
//! plain `TransId` back-reference used for access control only; the engine
//! owns both lifetimes.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::txn::TransId;

pub const SEGMENT_FILE_PREFIX: &str = "seg_";
pub const SEGMENT_FILE_EXTENSION: &str = "rvm";

/// Opaque handle naming a mapped segment.
///
/// Issued by the engine at `map` time and stable until `unmap`. Plays the
/// role a raw base pointer plays in an address-exposing runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(u64);

impl SegmentId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        SegmentId(raw)
    }
}

#[derive(Debug)]
pub struct Segment {
    name: String,
    size: usize,
    buf: Vec<u8>,
    backing_path: PathBuf,
    owner: Option<TransId>,
}

impl Segment {
    /// Backing file path for a segment name under an engine directory.
    pub fn backing_path(directory: &Path, name: &str) -> PathBuf {
        directory.join(format!(
            "{}{}.{}",
            SEGMENT_FILE_PREFIX, name, SEGMENT_FILE_EXTENSION
        ))
    }

    /// Loads a segment image: backing file bytes first (zero-filled past
    /// EOF), then the filtered redo writes for this name in log order.
    pub fn load(
        directory: &Path,
        name: &str,
        size: usize,
        redo_writes: &[(usize, &[u8])],
    ) -> Result<Self> {
        let backing_path = Self::backing_path(directory, name);
        let mut buf = vec![0u8; size];

        match File::open(&backing_path) {
            Ok(mut file) => {
                let mut filled = 0;
                while filled < size {
                    let n = file.read(&mut buf[filled..]).wrap_err_with(|| {
                        format!("failed to read segment backing file {:?}", backing_path)
                    })?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("failed to open segment backing file {:?}", backing_path)
                });
            }
        }

        let mut segment = Self {
            name: name.to_owned(),
            size,
            buf,
            backing_path,
            owner: None,
        };

        for &(offset, data) in redo_writes {
            segment.apply(offset, data);
        }

        Ok(segment)
    }

    /// Applies a redo write to the in-memory image, clipping at the segment
    /// boundary.
    fn apply(&mut self, offset: usize, data: &[u8]) {
        if offset >= self.size {
            return;
        }
        let len = data.len().min(self.size - offset);
        self.buf[offset..offset + len].copy_from_slice(&data[..len]);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn owner(&self) -> Option<TransId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<TransId>) {
        self.owner = owner;
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }
}
