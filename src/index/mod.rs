//! Index Module
//!
//! Sorted mapping from blob ref to physical location, layered over a
//! pluggable sorted key-value store.
//!
//! ## Responsibilities
//! - Define the narrow store contract (`SortedKv`)
//! - Encode keys (ref strings) and values (`Location`)
//! - Lookup, upsert, tombstone and ordered enumeration of blobs
//!
//! ## Value Format
//! ```text
//! ┌───────────────┬───────────────┬─────────────┐
//! │ PackID u32 LE │ Offset u64 LE │ Size u32 LE │
//! └───────────────┴───────────────┴─────────────┘
//! ```
//! Keys are the ref's string bytes, so byte order is ref order.
//! A tombstone removes the key from the store.

mod log;
mod memory;

use tracing::warn;

use crate::blob::{BlobRef, SizedRef};
use crate::error::{BlobError, Result};

pub use log::LogKv;
pub use memory::MemoryKv;

/// Sorted key-value store the index is built on
///
/// Any implementation honoring this contract can back the index.
pub trait SortedKv: Send + Sync {
    /// Value for `key`, if present
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or replace `key`
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Up to `limit` entries with keys `>= start`, ascending
    fn scan_from(&self, start: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.scan_from(&[], 1)?.is_empty())
    }

    /// Flush and release resources
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Where a blob's body lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub pack_id: u32,
    /// Position of the body within the pack's backing handle
    pub offset: u64,
    pub size: u32,
}

impl Location {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.pack_id.to_le_bytes());
        out[4..12].copy_from_slice(&self.offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; Self::ENCODED_LEN] = bytes.try_into().map_err(|_| {
            BlobError::Index(format!(
                "location value must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            ))
        })?;
        let mut pack_id = [0u8; 4];
        let mut offset = [0u8; 8];
        let mut size = [0u8; 4];
        pack_id.copy_from_slice(&bytes[0..4]);
        offset.copy_from_slice(&bytes[4..12]);
        size.copy_from_slice(&bytes[12..16]);
        Ok(Self {
            pack_id: u32::from_le_bytes(pack_id),
            offset: u64::from_le_bytes(offset),
            size: u32::from_le_bytes(size),
        })
    }
}

/// Blob-location index over an injected sorted store
pub struct BlobIndex {
    kv: Box<dyn SortedKv>,
}

impl BlobIndex {
    pub fn new(kv: Box<dyn SortedKv>) -> Self {
        Self { kv }
    }

    /// Location of a live blob
    pub fn lookup(&self, blob: &BlobRef) -> Result<Option<Location>> {
        match self.kv.get(blob.as_bytes())? {
            Some(value) => Ok(Some(Location::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Upsert a blob's location; the last writer wins
    pub fn put(&self, blob: &BlobRef, location: Location) -> Result<()> {
        self.kv.set(blob.as_bytes(), &location.encode())
    }

    /// Logically delete a blob
    pub fn tombstone(&self, blob: &BlobRef) -> Result<()> {
        self.kv.delete(blob.as_bytes())
    }

    /// Up to `limit` live blobs with refs strictly greater than `after`,
    /// in ascending ref order
    pub fn enumerate(
        &self,
        after: Option<&BlobRef>,
        limit: usize,
    ) -> Result<Vec<(BlobRef, Location)>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }

        let mut cursor: Vec<u8> = after.map(|r| r.as_bytes().to_vec()).unwrap_or_default();
        let mut exclusive = after.is_some();

        loop {
            // One extra in case the cursor key itself comes back
            let want = (limit - out.len()).saturating_add(1);
            let batch = self.kv.scan_from(&cursor, want)?;
            let exhausted = batch.len() < want;
            let last = match batch.last() {
                Some((key, _)) => key.clone(),
                None => break,
            };

            for (key, value) in batch {
                if exclusive && key == cursor {
                    continue;
                }
                let Some(blob) = std::str::from_utf8(&key).ok().and_then(BlobRef::parse) else {
                    warn!(key = %String::from_utf8_lossy(&key), "Skipping non-ref index key");
                    continue;
                };
                out.push((blob, Location::decode(&value)?));
                if out.len() == limit {
                    return Ok(out);
                }
            }

            if exhausted {
                break;
            }
            cursor = last;
            exclusive = true;
        }
        Ok(out)
    }

    /// Sized refs of the given blobs that are live, in input order
    pub fn stat(&self, blobs: &[BlobRef]) -> Result<Vec<SizedRef>> {
        let mut out = Vec::with_capacity(blobs.len());
        for blob in blobs {
            if let Some(loc) = self.lookup(blob)? {
                out.push(SizedRef::new(blob.clone(), loc.size));
            }
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.kv.is_empty()
    }

    pub fn close(&self) -> Result<()> {
        self.kv.close()
    }
}
