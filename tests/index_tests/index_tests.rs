//! Tests for the blob index
//!
//! These tests verify:
//! - Lookup/put/tombstone semantics
//! - Ordered, exclusive, resumable enumeration
//! - Stat reports only live blobs
//! - Any SortedKv implementation can back the index

use std::sync::Arc;

use blobpack::index::{BlobIndex, Location, LogKv, MemoryKv, SortedKv};
use blobpack::config::SyncStrategy;
use blobpack::{BlobRef, Result};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Lets a test keep a handle on the store behind an index
struct SharedKv(Arc<MemoryKv>);

impl SortedKv for SharedKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.0.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.0.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.0.delete(key)
    }

    fn scan_from(&self, start: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.0.scan_from(start, limit)
    }
}

fn setup_memory_index() -> BlobIndex {
    BlobIndex::new(Box::new(MemoryKv::new()))
}

fn loc(pack_id: u32, offset: u64, size: u32) -> Location {
    Location {
        pack_id,
        offset,
        size,
    }
}

/// `n` refs in ascending order
fn sorted_refs(n: usize) -> Vec<BlobRef> {
    let mut refs: Vec<BlobRef> = (0..n)
        .map(|i| BlobRef::sha1(format!("blob-{}", i).as_bytes()))
        .collect();
    refs.sort();
    refs
}

fn enumerate_refs(index: &BlobIndex, after: Option<&BlobRef>, limit: usize) -> Vec<BlobRef> {
    index
        .enumerate(after, limit)
        .unwrap()
        .into_iter()
        .map(|(blob, _)| blob)
        .collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_index_put_lookup_tombstone() {
    let index = setup_memory_index();
    let blob = BlobRef::sha1(b"a");

    assert_eq!(index.lookup(&blob).unwrap(), None);

    index.put(&blob, loc(0, 49, 1)).unwrap();
    assert_eq!(index.lookup(&blob).unwrap(), Some(loc(0, 49, 1)));

    index.put(&blob, loc(2, 100, 1)).unwrap();
    assert_eq!(index.lookup(&blob).unwrap(), Some(loc(2, 100, 1)));

    index.tombstone(&blob).unwrap();
    assert_eq!(index.lookup(&blob).unwrap(), None);
    assert!(index.is_empty().unwrap());

    // Tombstoning an unknown ref is harmless
    index.tombstone(&BlobRef::sha1(b"never")).unwrap();
}

#[test]
fn test_index_stat_only_live_in_input_order() {
    let index = setup_memory_index();
    let a = BlobRef::sha1(b"a");
    let b = BlobRef::sha1(b"b");
    let c = BlobRef::sha1(b"c");
    index.put(&a, loc(0, 10, 1)).unwrap();
    index.put(&c, loc(0, 60, 3)).unwrap();

    let stat = index.stat(&[c.clone(), b, a.clone()]).unwrap();
    assert_eq!(stat.len(), 2);
    assert_eq!(stat[0].blob_ref, c);
    assert_eq!(stat[0].size, 3);
    assert_eq!(stat[1].blob_ref, a);
}

// =============================================================================
// Enumeration Tests
// =============================================================================

#[test]
fn test_enumerate_is_sorted() {
    let index = setup_memory_index();
    let refs = sorted_refs(20);
    for (i, blob) in refs.iter().rev().enumerate() {
        index.put(blob, loc(0, i as u64, 1)).unwrap();
    }

    assert_eq!(enumerate_refs(&index, None, 100), refs);
    assert!(enumerate_refs(&index, None, 0).is_empty());
}

#[test]
fn test_enumerate_pagination_resumes_after_cursor() {
    let index = setup_memory_index();
    let refs = sorted_refs(25);
    for blob in &refs {
        index.put(blob, loc(0, 0, 1)).unwrap();
    }

    let mut pages = Vec::new();
    let mut after: Option<BlobRef> = None;
    loop {
        let page = enumerate_refs(&index, after.as_ref(), 7);
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();
        pages.push(page);
    }

    assert_eq!(pages.len(), 4);
    assert_eq!(pages[3].len(), 4);
    let all: Vec<BlobRef> = pages.into_iter().flatten().collect();
    assert_eq!(all, refs);
}

#[test]
fn test_enumerate_after_unknown_ref() {
    let index = setup_memory_index();
    let refs = sorted_refs(10);
    for blob in refs.iter().step_by(2) {
        index.put(blob, loc(0, 0, 1)).unwrap();
    }

    // refs[3] was never stored; enumeration continues from its position
    let page = enumerate_refs(&index, Some(&refs[3]), 10);
    assert_eq!(page, vec![refs[4].clone(), refs[6].clone(), refs[8].clone()]);
}

#[test]
fn test_enumerate_skips_tombstones() {
    let index = setup_memory_index();
    let refs = sorted_refs(5);
    for blob in &refs {
        index.put(blob, loc(0, 0, 1)).unwrap();
    }
    index.tombstone(&refs[1]).unwrap();
    index.tombstone(&refs[3]).unwrap();

    assert_eq!(
        enumerate_refs(&index, None, 10),
        vec![refs[0].clone(), refs[2].clone(), refs[4].clone()]
    );

    // Re-adding brings it back
    index.put(&refs[1], loc(1, 0, 1)).unwrap();
    assert_eq!(enumerate_refs(&index, Some(&refs[0]), 1), vec![refs[1].clone()]);
}

#[test]
fn test_enumerate_skips_foreign_keys() {
    let kv = Arc::new(MemoryKv::new());
    let index = BlobIndex::new(Box::new(SharedKv(Arc::clone(&kv))));
    let refs = sorted_refs(3);
    for blob in &refs {
        index.put(blob, loc(0, 0, 1)).unwrap();
    }
    kv.set(b"meta:version", b"1").unwrap();
    kv.set(b"sha1-zzzz", &loc(0, 0, 1).encode()).unwrap();

    assert_eq!(enumerate_refs(&index, None, 10), refs);
    assert_eq!(kv.len(), 5);
}

#[test]
fn test_index_values_are_fixed_width() {
    let kv = Arc::new(MemoryKv::new());
    let index = BlobIndex::new(Box::new(SharedKv(Arc::clone(&kv))));
    let blob = BlobRef::sha1(b"value");
    index.put(&blob, loc(7, 1 << 33, 42)).unwrap();

    let raw = kv.get(blob.as_bytes()).unwrap().unwrap();
    assert_eq!(raw.len(), Location::ENCODED_LEN);
    assert_eq!(Location::decode(&raw).unwrap(), loc(7, 1 << 33, 42));
}

// =============================================================================
// Durable Backing Tests
// =============================================================================

#[test]
fn test_index_over_log_kv_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.kvlog");
    let refs = sorted_refs(4);

    {
        let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
        let index = BlobIndex::new(Box::new(kv));
        for (i, blob) in refs.iter().enumerate() {
            index.put(blob, loc(0, i as u64 * 100, 10)).unwrap();
        }
        index.tombstone(&refs[2]).unwrap();
        index.close().unwrap();
    }

    let kv = LogKv::open(&path, SyncStrategy::EveryWrite).unwrap();
    let index = BlobIndex::new(Box::new(kv));
    assert_eq!(
        enumerate_refs(&index, None, 10),
        vec![refs[0].clone(), refs[1].clone(), refs[3].clone()]
    );
    assert_eq!(index.lookup(&refs[3]).unwrap(), Some(loc(0, 300, 10)));
}
