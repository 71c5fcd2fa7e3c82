//! Blob storage contract
//!
//! The surface callers use, independent of how a backend lays out its
//! bytes. Callers never see packs or index internals.

use std::io::Read;

use bytes::Bytes;

use crate::blob::{BlobRef, SizedRef};
use crate::error::Result;

/// Content-addressed blob storage.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable: a ref always names the same bytes.
/// - Receiving a blob that is already stored is a no-op.
/// - A removed blob is indistinguishable from one never received.
/// - Writes either fully succeed or leave no observable trace.
pub trait BlobStorage: Send + Sync {
    /// Store the blob read from `source`, verifying it hashes to `blob`
    fn receive(&self, blob: &BlobRef, source: &mut dyn Read) -> Result<SizedRef>;

    /// Contents of a blob; `BlobError::NotFound` if it is not stored
    fn fetch(&self, blob: &BlobRef) -> Result<Bytes>;

    /// The subset of `blobs` that are stored, with their sizes
    fn stat(&self, blobs: &[BlobRef]) -> Result<Vec<SizedRef>>;

    /// Up to `limit` stored blobs with refs strictly after `after`,
    /// ascending
    fn enumerate(&self, after: Option<&BlobRef>, limit: usize) -> Result<Vec<SizedRef>>;

    /// Remove blobs; unknown refs are ignored
    fn remove(&self, blobs: &[BlobRef]) -> Result<()>;

    /// Receive an in-memory blob, computing nothing beyond verification
    fn receive_bytes(&self, blob: &BlobRef, data: &[u8]) -> Result<SizedRef> {
        let mut source = data;
        self.receive(blob, &mut source)
    }
}
