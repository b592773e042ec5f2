//! Transaction-frame and record codec for the redo log.
//!
//! Integers are fixed-width and host-endian; the log is a single-host file,
//! not a portable wire format. The frame header and trailer are `repr(C)`
//! structs serialized with zerocopy, so the writer and reader agree on
//! widths by construction.
//!
//! The parser never errors: any short read, unknown record tag, non-UTF-8
//! name, or header/trailer mismatch means the remaining bytes are a torn
//! tail and scanning stops at the last cleanly parsed frame.

use std::mem;

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::txn::{CommittedTransaction, RedoRecord, TransId};

pub const RECORD_WRITE: u32 = 1;
pub const RECORD_DESTROY: u32 = 2;

pub const FRAME_HEADER_SIZE: usize = mem::size_of::<FrameHeader>();
pub const FRAME_TRAILER_SIZE: usize = mem::size_of::<FrameTrailer>();

/// Leading fields of a transaction frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable)]
pub struct FrameHeader {
    pub trans_id: u64,
    pub num_records: u64,
}

/// Trailing committed-transaction marker. A frame is accepted only when
/// both fields exactly equal the header values.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable)]
pub struct FrameTrailer {
    pub num_records: u64,
    pub trans_id: u64,
}

/// Serializes one committed transaction as a self-delimited frame.
pub fn encode_frame(trans_id: TransId, records: &[RedoRecord]) -> Vec<u8> {
    let header = FrameHeader {
        trans_id,
        num_records: records.len() as u64,
    };
    let trailer = FrameTrailer {
        num_records: records.len() as u64,
        trans_id,
    };

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE + 64);
    buf.extend_from_slice(header.as_bytes());
    for record in records {
        encode_record(&mut buf, record);
    }
    buf.extend_from_slice(trailer.as_bytes());
    buf
}

fn encode_record(buf: &mut Vec<u8>, record: &RedoRecord) {
    match record {
        RedoRecord::Write {
            segment,
            offset,
            data,
        } => {
            buf.extend_from_slice(&RECORD_WRITE.to_ne_bytes());
            buf.extend_from_slice(&(segment.len() as u64).to_ne_bytes());
            buf.extend_from_slice(segment.as_bytes());
            buf.extend_from_slice(&(*offset as u64).to_ne_bytes());
            buf.extend_from_slice(&(data.len() as u64).to_ne_bytes());
            buf.extend_from_slice(data);
        }
        RedoRecord::Destroy { segment } => {
            buf.extend_from_slice(&RECORD_DESTROY.to_ne_bytes());
            buf.extend_from_slice(&(segment.len() as u64).to_ne_bytes());
            buf.extend_from_slice(segment.as_bytes());
        }
    }
}

/// Sequential frame parser over a log byte image.
pub struct FrameParser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameParser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Byte length of the prefix of cleanly parsed frames.
    pub fn clean_len(&self) -> usize {
        self.pos
    }

    /// True when the whole image parsed without a torn tail.
    pub fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Parses the next transaction frame. Returns `None` at end of input or
    /// at the first malformed byte, leaving `clean_len` at the end of the
    /// last accepted frame.
    pub fn next_frame(&mut self) -> Option<CommittedTransaction> {
        let start = self.pos;
        match self.parse_frame() {
            Some(frame) => Some(frame),
            None => {
                self.pos = start;
                None
            }
        }
    }

    fn parse_frame(&mut self) -> Option<CommittedTransaction> {
        let header = FrameHeader::read_from_bytes(self.take(FRAME_HEADER_SIZE)?).ok()?;

        let mut records = Vec::new();
        for _ in 0..header.num_records {
            records.push(self.parse_record()?);
        }

        let trailer = FrameTrailer::read_from_bytes(self.take(FRAME_TRAILER_SIZE)?).ok()?;
        if trailer.num_records != header.num_records || trailer.trans_id != header.trans_id {
            return None;
        }

        Some(CommittedTransaction {
            id: header.trans_id,
            records,
        })
    }

    fn parse_record(&mut self) -> Option<RedoRecord> {
        let tag = self.take_u32()?;
        if tag != RECORD_WRITE && tag != RECORD_DESTROY {
            return None;
        }

        let name_len = self.take_u64()? as usize;
        let segment = String::from_utf8(self.take(name_len)?.to_vec()).ok()?;

        match tag {
            RECORD_WRITE => {
                let offset = self.take_u64()? as usize;
                let data_len = self.take_u64()? as usize;
                let data = self.take(data_len)?.to_vec();
                Some(RedoRecord::Write {
                    segment,
                    offset,
                    data,
                })
            }
            _ => Some(RedoRecord::Destroy { segment }),
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn take_u32(&mut self) -> Option<u32> {
        Some(u32::from_ne_bytes(self.take(4)?.try_into().ok()?))
    }

    fn take_u64(&mut self) -> Option<u64> {
        Some(u64::from_ne_bytes(self.take(8)?.try_into().ok()?))
    }
}
