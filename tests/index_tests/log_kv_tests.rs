//! Tests for the durable log-backed sorted store
//!
//! These tests verify:
//! - Entries survive close and reopen
//! - A damaged log tail is truncated and the store stays writable
//! - Compaction shrinks the log without changing contents

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use blobpack::config::SyncStrategy;
use blobpack::index::{LogKv, SortedKv};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.kvlog");
    (temp_dir, path)
}

fn file_len(path: &PathBuf) -> u64 {
    fs::metadata(path).unwrap().len()
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_log_kv_creates_file_and_parent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("index.kvlog");

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert!(path.exists());
    assert!(kv.is_empty().unwrap());
    assert_eq!(kv.path(), path.as_path());
}

#[test]
fn test_log_kv_persists_across_reopen() {
    let (_temp, path) = setup_temp_log();

    {
        let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
        kv.set(b"b", b"2").unwrap();
        kv.set(b"a", b"1").unwrap();
        kv.set(b"c", b"3").unwrap();
        kv.set(b"a", b"1-new").unwrap();
        kv.delete(b"c").unwrap();
        kv.close().unwrap();
    }

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.len(), 2);
    assert_eq!(kv.get(b"a").unwrap(), Some(b"1-new".to_vec()));
    assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(kv.get(b"c").unwrap(), None);

    let keys: Vec<Vec<u8>> = kv
        .scan_from(b"", 10)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn test_log_kv_batched_sync_persists_after_close() {
    let (_temp, path) = setup_temp_log();

    {
        let kv = LogKv::open(&path, SyncStrategy::EveryNEntries { count: 16 }).unwrap();
        for i in 0..40u32 {
            kv.set(&i.to_be_bytes(), b"v").unwrap();
        }
        kv.close().unwrap();
    }

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.len(), 40);
}

#[test]
fn test_log_kv_delete_missing_key_writes_nothing() {
    let (_temp, path) = setup_temp_log();
    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    kv.set(b"k", b"v").unwrap();
    let before = file_len(&path);

    kv.delete(b"missing").unwrap();
    assert_eq!(file_len(&path), before);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_log_kv_truncates_torn_tail() {
    let (_temp, path) = setup_temp_log();

    {
        let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
        kv.set(b"a", b"1").unwrap();
        kv.set(b"b", b"2").unwrap();
    }
    let good_len = file_len(&path);

    // Half a frame header, as if a crash hit mid-append
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9u8; 7]).unwrap();
    }

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(file_len(&path), good_len);
    assert_eq!(kv.len(), 2);

    kv.set(b"c", b"3").unwrap();
    drop(kv);

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.get(b"c").unwrap(), Some(b"3".to_vec()));
    assert_eq!(kv.len(), 3);
}

#[test]
fn test_log_kv_drops_frames_after_corruption() {
    let (_temp, path) = setup_temp_log();

    {
        let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
        kv.set(b"a", b"1").unwrap();
    }
    let first_len = file_len(&path);
    {
        let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
        kv.set(b"b", b"2").unwrap();
    }

    // Flip the last byte of the second frame's data
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(kv.get(b"b").unwrap(), None);
    assert_eq!(file_len(&path), first_len);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_log_kv_compact_shrinks_log() {
    let (_temp, path) = setup_temp_log();
    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();

    for round in 0..50u32 {
        for key in 0..4u32 {
            kv.set(&key.to_be_bytes(), &round.to_be_bytes()).unwrap();
        }
    }
    kv.delete(&3u32.to_be_bytes()).unwrap();
    let before = file_len(&path);

    kv.compact().unwrap();
    let after = file_len(&path);
    assert!(after < before / 10, "{} -> {}", before, after);

    // Still writable after the file swap
    kv.set(b"late", b"x").unwrap();
    drop(kv);

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.len(), 4);
    assert_eq!(kv.get(&0u32.to_be_bytes()).unwrap(), Some(49u32.to_be_bytes().to_vec()));
    assert_eq!(kv.get(&3u32.to_be_bytes()).unwrap(), None);
    assert_eq!(kv.get(b"late").unwrap(), Some(b"x".to_vec()));
}

#[test]
fn test_log_kv_close_compacts_mostly_dead_log() {
    let (_temp, path) = setup_temp_log();
    let kv = LogKv::open(&path, SyncStrategy::EveryNEntries { count: 256 }).unwrap();

    for round in 0..1100u32 {
        kv.set(b"hot", &round.to_be_bytes()).unwrap();
    }
    let before = file_len(&path);
    kv.close().unwrap();
    assert!(file_len(&path) < before);
    drop(kv);

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    assert_eq!(kv.get(b"hot").unwrap(), Some(1099u32.to_be_bytes().to_vec()));
}
