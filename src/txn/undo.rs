//! Pre-image snapshots supporting transaction abort.
//!
//! An `UndoRecord` captures the bytes of a segment window at the moment the
//! application declares its intent to modify that window. Rollback restores
//! the snapshot byte-for-byte at the same offset. Undo records live only in
//! memory and are owned by their transaction; they never reach the log.

use crate::segment::SegmentId;

/// Snapshot of `segment[offset .. offset + len]` taken before modification.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    segment: SegmentId,
    offset: usize,
    pre_image: Vec<u8>,
}

impl UndoRecord {
    /// Captures the current bytes of the window eagerly.
    pub fn capture(segment: SegmentId, offset: usize, window: &[u8]) -> Self {
        Self {
            segment,
            offset,
            pre_image: window.to_vec(),
        }
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.pre_image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_image.is_empty()
    }

    /// True when this record covers exactly the given window.
    ///
    /// Overlapping-but-unequal windows do not match; each captures its own
    /// snapshot.
    pub fn covers(&self, segment: SegmentId, offset: usize, size: usize) -> bool {
        self.segment == segment && self.offset == offset && self.pre_image.len() == size
    }

    /// Restores the snapshot into the segment buffer.
    pub fn rollback_into(&self, buf: &mut [u8]) {
        buf[self.offset..self.offset + self.pre_image.len()].copy_from_slice(&self.pre_image);
    }
}
