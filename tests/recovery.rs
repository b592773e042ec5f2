//! # Crash Recovery Tests
//!
//! This module tests open-time recovery:
//!
//! 1. A torn log tail (garbage or a partially written frame) is discarded;
//!    the clean prefix of committed transactions survives and the log file
//!    is rewritten to exactly that prefix
//! 2. An interrupted truncation (staging file present, log absent) is
//!    completed by renaming the staging file into place
//! 3. Destroy tombstones erase earlier writes across reopen
//!
//! Crashes are simulated by dropping the engine and mutilating the log
//! file directly, the same way an interrupted `write` would leave it.

use std::fs::OpenOptions;
use std::io::Write;

use tempfile::tempdir;
use rvm::{Rvm, SyncMode};

const TEST_STRING: &[u8] = b"hello, world";
const OFFSET2: usize = 1000;

fn write_at(rvm: &mut Rvm, seg: rvm::SegmentId, offset: usize, bytes: &[u8]) {
    rvm.segment_mut(seg)[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn commit_test_writes(dir: &std::path::Path, name: &str) {
    let mut rvm = Rvm::open(dir).unwrap();
    let seg = rvm.map(name, 10_000).unwrap();
    let trans = rvm.begin_trans(&[seg]).unwrap();
    rvm.about_to_modify(trans, seg, 0, TEST_STRING.len());
    write_at(&mut rvm, seg, 0, TEST_STRING);
    rvm.about_to_modify(trans, seg, OFFSET2, TEST_STRING.len());
    write_at(&mut rvm, seg, OFFSET2, TEST_STRING);
    rvm.commit_trans(trans).unwrap();
}

mod torn_log_tests {
    use super::*;

    #[test]
    fn garbage_tail_is_discarded_and_the_log_rewritten() {
        let dir = tempdir().unwrap();
        commit_test_writes(dir.path(), "testseg");

        let log_path = dir.path().join("redo_log.rvm");
        let clean_len = std::fs::metadata(&log_path).unwrap().len();

        let mut raw = OpenOptions::new().append(true).open(&log_path).unwrap();
        raw.write_all(b"\x07\x00\x00\x00 torn garbage from a crashed append")
            .unwrap();
        drop(raw);

        let mut rvm = Rvm::open(dir.path()).unwrap();
        let seg = rvm.map("testseg", 10_000).unwrap();

        assert_eq!(&rvm.segment(seg)[..TEST_STRING.len()], TEST_STRING);
        assert_eq!(
            &rvm.segment(seg)[OFFSET2..OFFSET2 + TEST_STRING.len()],
            TEST_STRING
        );
        assert_eq!(rvm.segment(seg)[300], 0, "unwritten offset SHOULD be zero");
        assert_eq!(rvm.segment(seg)[700], 0, "unwritten offset SHOULD be zero");

        assert_eq!(
            std::fs::metadata(&log_path).unwrap().len(),
            clean_len,
            "the log SHOULD be rewritten to exactly the valid prefix"
        );
    }

    #[test]
    fn partially_written_frame_keeps_only_earlier_commits() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("redo_log.rvm");

        let first_len;
        {
            let mut rvm = Rvm::builder()
                .directory(dir.path())
                .sync_mode(SyncMode::Off)
                .open()
                .unwrap();
            let seg = rvm.map("s", 4096).unwrap();

            let t1 = rvm.begin_trans(&[seg]).unwrap();
            rvm.about_to_modify(t1, seg, 0, 5);
            write_at(&mut rvm, seg, 0, b"first");
            rvm.commit_trans(t1).unwrap();
            first_len = std::fs::metadata(&log_path).unwrap().len();

            let t2 = rvm.begin_trans(&[seg]).unwrap();
            rvm.about_to_modify(t2, seg, 100, 6);
            write_at(&mut rvm, seg, 100, b"second");
            rvm.commit_trans(t2).unwrap();
        }

        // Tear the second frame: keep its header and a few record bytes.
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(first_len + 20).unwrap();
        drop(file);

        let mut rvm = Rvm::open(dir.path()).unwrap();
        assert_eq!(rvm.committed_count(), 1, "only the first commit SHOULD survive");
        let seg = rvm.map("s", 4096).unwrap();
        assert_eq!(&rvm.segment(seg)[..5], b"first");
        assert_eq!(&rvm.segment(seg)[100..106], &[0u8; 6][..]);
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), first_len);
    }

    #[test]
    fn fully_garbage_log_recovers_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("redo_log.rvm"), b"not a log at all").unwrap();

        let mut rvm = Rvm::open(dir.path()).unwrap();
        assert_eq!(rvm.committed_count(), 0);
        let seg = rvm.map("anything", 128).unwrap();
        assert!(rvm.segment(seg).iter().all(|&b| b == 0));
    }
}

mod interrupted_truncation_tests {
    use super::*;

    #[test]
    fn staging_file_without_a_log_is_renamed_into_place() {
        let dir = tempdir().unwrap();
        commit_test_writes(dir.path(), "testseg");

        let log_path = dir.path().join("redo_log.rvm");
        let tmp_path = dir.path().join("redo_log.rvm.tmp");
        std::fs::rename(&log_path, &tmp_path).unwrap();

        let mut rvm = Rvm::open(dir.path()).unwrap();
        assert!(log_path.exists(), "the staging file SHOULD become the log");
        assert!(!tmp_path.exists());

        let seg = rvm.map("testseg", 10_000).unwrap();
        assert_eq!(&rvm.segment(seg)[..TEST_STRING.len()], TEST_STRING);
    }

    #[test]
    fn stale_staging_file_next_to_a_log_is_ignored() {
        let dir = tempdir().unwrap();
        commit_test_writes(dir.path(), "testseg");

        let tmp_path = dir.path().join("redo_log.rvm.tmp");
        std::fs::write(&tmp_path, b"half-written staging leftovers").unwrap();

        let mut rvm = Rvm::open(dir.path()).unwrap();
        assert!(!tmp_path.exists(), "stale staging file SHOULD be removed");

        let seg = rvm.map("testseg", 10_000).unwrap();
        assert_eq!(&rvm.segment(seg)[..TEST_STRING.len()], TEST_STRING);
    }
}

mod destroy_tombstone_tests {
    use super::*;

    #[test]
    fn destroy_erases_earlier_writes_for_the_name() {
        let dir = tempdir().unwrap();

        {
            let mut rvm = Rvm::open(dir.path()).unwrap();
            let seg = rvm.map("s", 1000).unwrap();
            let trans = rvm.begin_trans(&[seg]).unwrap();
            rvm.about_to_modify(trans, seg, 0, 7);
            write_at(&mut rvm, seg, 0, b"payload");
            rvm.commit_trans(trans).unwrap();
            rvm.unmap(seg);
            rvm.destroy("s").unwrap();

            let seg = rvm.map("s", 1000).unwrap();
            assert!(
                rvm.segment(seg).iter().all(|&b| b == 0),
                "a remap after destroy SHOULD start from zero"
            );
        }

        {
            let mut rvm = Rvm::open(dir.path()).unwrap();
            let seg = rvm.map("s", 1000).unwrap();
            assert!(rvm.segment(seg).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn writes_after_a_destroy_re_accumulate() {
        let dir = tempdir().unwrap();

        {
            let mut rvm = Rvm::open(dir.path()).unwrap();
            let seg = rvm.map("s", 1000).unwrap();
            let trans = rvm.begin_trans(&[seg]).unwrap();
            rvm.about_to_modify(trans, seg, 0, 3);
            write_at(&mut rvm, seg, 0, b"old");
            rvm.commit_trans(trans).unwrap();
            rvm.unmap(seg);

            rvm.destroy("s").unwrap();

            let seg = rvm.map("s", 1000).unwrap();
            let trans = rvm.begin_trans(&[seg]).unwrap();
            rvm.about_to_modify(trans, seg, 0, 3);
            write_at(&mut rvm, seg, 0, b"new");
            rvm.commit_trans(trans).unwrap();
        }

        {
            let mut rvm = Rvm::open(dir.path()).unwrap();
            let seg = rvm.map("s", 1000).unwrap();
            assert_eq!(&rvm.segment(seg)[..3], b"new");
        }
    }
}

mod multi_engine_tests {
    use super::*;

    #[test]
    fn engines_on_distinct_directories_coexist() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();

        let mut rvm_a = Rvm::open(dir_a.path()).unwrap();
        let mut rvm_b = Rvm::open(dir_b.path()).unwrap();

        let seg_a = rvm_a.map("shared_name", 256).unwrap();
        let seg_b = rvm_b.map("shared_name", 256).unwrap();

        let ta = rvm_a.begin_trans(&[seg_a]).unwrap();
        let tb = rvm_b.begin_trans(&[seg_b]).unwrap();
        assert_ne!(ta, tb, "transaction ids SHOULD be unique process-wide");

        rvm_a.about_to_modify(ta, seg_a, 0, 1);
        rvm_a.segment_mut(seg_a)[0] = b'a';
        rvm_a.commit_trans(ta).unwrap();

        rvm_b.about_to_modify(tb, seg_b, 0, 1);
        rvm_b.segment_mut(seg_b)[0] = b'b';
        rvm_b.commit_trans(tb).unwrap();

        drop(rvm_a);
        drop(rvm_b);

        let mut rvm_a = Rvm::open(dir_a.path()).unwrap();
        let mut rvm_b = Rvm::open(dir_b.path()).unwrap();
        let seg_a = rvm_a.map("shared_name", 256).unwrap();
        let seg_b = rvm_b.map("shared_name", 256).unwrap();
        assert_eq!(rvm_a.segment(seg_a)[0], b'a');
        assert_eq!(rvm_b.segment(seg_b)[0], b'b');
    }
}
