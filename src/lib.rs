//! # RVM - Recoverable Virtual Memory
//!
//! RVM lets a single-process application persist in-memory byte regions
//! ("segments") with transactional, crash-consistent updates. The
//! application reads and mutates segment bytes directly; windows it
//! declares before modifying become durable at commit, so after a crash a
//! fresh process re-attaches the segments and observes exactly the union of
//! all committed transactions.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rvm::Rvm;
//!
//! let mut rvm = Rvm::open("./rvm_segments")?;
//! let seg = rvm.map("counter", 4096)?;
//!
//! let trans = rvm.begin_trans(&[seg])?;
//! rvm.about_to_modify(trans, seg, 0, 8);
//! rvm.segment_mut(seg)[..8].copy_from_slice(&1u64.to_ne_bytes());
//! rvm.commit_trans(trans)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │         Engine (Rvm)                │   map / transactions / recovery
//! ├──────────────────┬──────────────────┤
//! │  Segments        │  Transactions    │   resident buffers, undo records
//! ├──────────────────┴──────────────────┤
//! │  Redo Log (writer / reader / codec) │   framed commits, torn-tail scan
//! ├─────────────────────────────────────┤
//! │  Segment backing files              │   checkpointed bytes
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! rvm_segments/
//! ├── seg_<name>.rvm      # backing file per segment
//! ├── redo_log.rvm        # append-only commit log
//! └── redo_log.rvm.tmp    # checkpoint staging (transient)
//! ```
//!
//! ## Durability Model
//!
//! Commit appends one self-delimited frame to the redo log; the trailing
//! committed-transaction marker makes a crash mid-append discard the torn
//! frame and everything after it on the next open. `truncate_log` folds
//! committed records into the backing files and rewrites the log through an
//! atomic tmp-file swap.
//!
//! The engine assumes exclusive, serialized access from one thread of
//! control in one process. Two processes mutating the same directory is
//! undefined behavior.
//!
//! ## Module Overview
//!
//! - [`engine`]: the [`Rvm`] engine, builder, recovery, truncation
//! - [`segment`]: resident segment buffers and backing files
//! - [`txn`]: transactions, undo and redo records
//! - [`log`]: the redo-log writer, scanner, and frame codec

pub mod engine;
pub mod log;
pub mod segment;
pub mod txn;

pub use engine::{Rvm, RvmBuilder, SyncMode};
pub use segment::SegmentId;
pub use txn::{RedoRecord, TransId, TransState};
