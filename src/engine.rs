//! Engine Module
//!
//! The pack storage engine that coordinates packs and the index.
//!
//! ## Responsibilities
//! - Append blobs to the current pack and index them
//! - Deduplicate by ref so each blob's bytes are written once
//! - Roll back appends whose index write fails
//! - Rotate packs on size/capacity or on request
//! - Rebuild and audit the index from raw pack bytes

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::blob::{BlobRef, SizedRef};
use crate::config::{Config, IndexKind};
use crate::error::{BlobError, Result};
use crate::index::{BlobIndex, Location, LogKv, MemoryKv, SortedKv};
use crate::pack::{
    encode_header, open_pack_source, walk, walk_pack, PackBounds, PackScan, PackSource, ScanStop,
    WalkEntry, WalkSummary,
};
use crate::storage::BlobStorage;

/// Body bytes copied per write
const COPY_CHUNK: usize = 64 * 1024;

/// Index entries fetched per batch while auditing
const AUDIT_BATCH: usize = 1024;

/// Largest body a record header can describe
const MAX_BLOB_SIZE: u64 = u32::MAX as u64;

/// Append position in the current pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WriterState {
    pack_id: u32,
    pos: u64,
}

/// Result of rebuilding the index from packs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Records found in the packs
    pub records: u64,
    /// Records written to the index
    pub indexed: u64,
    /// Records skipped because their ref was invalid
    pub invalid: u64,
    /// Packs whose scan stopped early
    pub damaged: Vec<PackScan>,
}

/// Result of comparing the index against the packs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub records: u64,
    pub invalid: u64,
    /// Refs whose newest pack copy is what the index points at
    pub matched: u64,
    /// Refs present in packs but absent from the index (includes
    /// logically deleted blobs)
    pub missing: Vec<BlobRef>,
    /// Refs the index places somewhere other than their newest copy
    pub mismatched: Vec<BlobRef>,
    /// Index entries that point at no scanned record
    pub dangling: Vec<BlobRef>,
    pub damaged: Vec<PackScan>,
}

impl AuditReport {
    /// No index entry disagrees with the packs and every pack scanned cleanly
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty() && self.dangling.is_empty() && self.damaged.is_empty()
    }
}

/// The pack storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/rotate/reindex): Serialized by `writer`
///   - Only ONE mutation at a time
///   - Must acquire: writer → packs (read, or write to open a pack)
///
/// - **Reads** (get/stat/enumerate): Never take `writer`
///   - Pack reads are positional, so they share `packs` read access
///   - An index entry is only written after its bytes are synced,
///     so readers never see a half-written record
pub struct PackEngine {
    /// Engine configuration
    config: Config,

    /// Pack files or device regions
    packs: RwLock<Box<dyn PackSource>>,

    /// Ref → location index
    index: BlobIndex,

    /// Serializes mutations; holds the current append position
    writer: Mutex<WriterState>,
}

impl PackEngine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open the index backing store
    /// 2. Open/discover packs
    /// 3. Recover the current pack's append position
    /// 4. Rebuild the index if asked to, or if it is volatile and empty
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Open the configured index store
        let kv: Box<dyn SortedKv> = match config.index {
            IndexKind::Memory => Box::new(MemoryKv::new()),
            IndexKind::Log => Box::new(LogKv::open(
                &config.resolved_index_path()?,
                config.index_sync,
            )?),
        };

        Self::open_with_index(config, kv)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with packs and index under `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().root(path).build())
    }

    /// Open with an injected index store
    pub fn open_with_index(config: Config, kv: Box<dyn SortedKv>) -> Result<Self> {
        config.validate_packs()?;

        // Step 2: Open packs
        let mut packs = open_pack_source(&config)?;

        // Step 3: Find where appends continue
        let writer = Self::recover_current(packs.as_mut())?;

        let engine = Self {
            config,
            packs: RwLock::new(packs),
            index: BlobIndex::new(kv),
            writer: Mutex::new(writer),
        };

        // Step 4: Rebuild the index from packs when needed
        let volatile_and_empty =
            engine.config.index == IndexKind::Memory && engine.index.is_empty()?;
        if engine.config.reindex_on_open || volatile_and_empty {
            engine.reindex()?;
        }

        info!(
            root = %engine.config.root.display(),
            pack_id = writer.pack_id,
            offset = writer.pos,
            "Pack engine ready"
        );
        Ok(engine)
    }

    /// Scan the highest pack to find its clean end
    ///
    /// A torn tail is cut away. After a corrupt record the pack is
    /// abandoned for appends so new records stay reachable by scans.
    fn recover_current(packs: &mut dyn PackSource) -> Result<WriterState> {
        let pack_id = packs.pack_count().saturating_sub(1);
        let scan = walk_pack(&*packs, pack_id, |_| Ok(()))?;

        match scan.stop {
            ScanStop::Clean => {
                let end = packs.bounds(pack_id)?.end;
                if packs.capacity().is_none() && scan.end < end {
                    warn!(
                        pack = %packs.describe(pack_id),
                        end = scan.end,
                        fill = end - scan.end,
                        "Trimming zero fill at pack tail"
                    );
                    packs.rollback(pack_id, scan.end)?;
                }
            }
            ScanStop::TornTail => {
                warn!(
                    pack = %packs.describe(pack_id),
                    end = scan.end,
                    "Rolling back torn record at pack tail"
                );
                packs.rollback(pack_id, scan.end)?;
            }
            ScanStop::Corrupt(reason) => {
                warn!(
                    pack = %packs.describe(pack_id),
                    end = scan.end,
                    reason = %reason,
                    "Current pack is corrupt, starting a new one"
                );
                let next = packs.open_next()?;
                return Ok(WriterState {
                    pack_id: next,
                    pos: packs.bounds(next)?.start,
                });
            }
        }

        Ok(WriterState {
            pack_id,
            pos: scan.end,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `size` bytes read from `body` under `blob`
    ///
    /// Steps:
    /// 1. Acquire the writer lock
    /// 2. Return the stored size if the blob is indexed and its pack still holds it
    /// 3. Rotate if the record would not fit the current pack
    /// 4. Append header and body, then sync
    /// 5. Index the location; on failure truncate the append away
    ///
    /// The ref is not checked against the body here; see `receive`.
    pub fn put(&self, blob: &BlobRef, size: u32, body: &mut dyn Read) -> Result<u32> {
        let mut writer = self.writer.lock();

        // Step 2: Dedup, unless the indexed copy has gone missing
        if let Some(existing) = self.index.lookup(blob)? {
            let end = existing.offset + u64::from(existing.size);
            if self.packs.read().holds(existing.pack_id, end)? {
                debug!(blob = %blob, pack_id = existing.pack_id, "Blob already stored");
                return Ok(existing.size);
            }
            warn!(
                blob = %blob,
                pack_id = existing.pack_id,
                offset = existing.offset,
                "Indexed copy is no longer in its pack, storing again"
            );
        }

        // Step 3: Make room
        let header = encode_header(blob.as_str(), size);
        let record_len = header.len() as u64 + u64::from(size);
        self.make_room(&mut writer, record_len)?;

        // Step 4: Append
        let packs = self.packs.read();
        let WriterState { pack_id, pos: prior } = *writer;
        if let Err(e) = Self::append_record(&**packs, pack_id, prior, &header, size, body) {
            warn!(blob = %blob, pack_id, offset = prior, error = %e, "Append failed, rolling back");
            Self::undo_append(&**packs, pack_id, prior);
            return Err(e);
        }

        // Step 5: Commit to the index
        let location = Location {
            pack_id,
            offset: prior + header.len() as u64,
            size,
        };
        if let Err(e) = self.index.put(blob, location) {
            warn!(blob = %blob, pack_id, offset = prior, error = %e, "Index write failed, rolling back");
            Self::undo_append(&**packs, pack_id, prior);
            return Err(e);
        }

        writer.pos = prior + record_len;
        debug!(blob = %blob, pack_id, offset = location.offset, size, "Stored blob");
        Ok(size)
    }

    /// Logically delete blobs; pack bytes are left untouched
    pub fn delete(&self, blobs: &[BlobRef]) -> Result<()> {
        let _writer = self.writer.lock();
        for blob in blobs {
            self.index.tombstone(blob)?;
            debug!(blob = %blob, "Deleted blob from index");
        }
        Ok(())
    }

    /// Seal the current pack and direct appends to a new one
    ///
    /// Returns the new pack's ID.
    pub fn next_pack(&self) -> Result<u32> {
        let mut writer = self.writer.lock();
        self.rotate(&mut writer)
    }

    /// Rotate when `record_len` more bytes would overflow the current pack
    fn make_room(&self, writer: &mut WriterState, record_len: u64) -> Result<()> {
        let (bounds, capacity) = {
            let packs = self.packs.read();
            (packs.bounds(writer.pack_id)?, packs.capacity())
        };
        let limit = match capacity {
            Some(cap) if record_len > cap => {
                return Err(BlobError::CapacityExceeded(format!(
                    "record of {} bytes exceeds pack capacity of {} bytes",
                    record_len, cap
                )));
            }
            Some(cap) => cap,
            None => self.config.max_pack_size,
        };

        let used = writer.pos - bounds.start;
        if used > 0 && used + record_len > limit {
            self.rotate(writer)?;
        }
        Ok(())
    }

    fn rotate(&self, writer: &mut WriterState) -> Result<u32> {
        let mut packs = self.packs.write();
        packs.sync(writer.pack_id)?;
        let sealed = writer.pack_id;
        let pack_id = packs.open_next()?;
        *writer = WriterState {
            pack_id,
            pos: packs.bounds(pack_id)?.start,
        };
        info!(sealed, pack_id, "Rotated to new pack");
        Ok(pack_id)
    }

    fn append_record(
        packs: &dyn PackSource,
        pack_id: u32,
        at: u64,
        header: &[u8],
        size: u32,
        body: &mut dyn Read,
    ) -> Result<()> {
        packs.write_at(pack_id, at, header)?;
        let mut pos = at + header.len() as u64;

        let mut remaining = u64::from(size);
        let mut buf = vec![0u8; COPY_CHUNK.min(size as usize)];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match body.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(BlobError::SizeMismatch {
                        expected: u64::from(size),
                        actual: u64::from(size) - remaining,
                    });
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            packs.write_at(pack_id, pos, &buf[..n])?;
            pos += n as u64;
            remaining -= n as u64;
        }

        packs.mark_end(pack_id, pos)?;
        packs.sync(pack_id)
    }

    fn undo_append(packs: &dyn PackSource, pack_id: u32, prior: u64) {
        if let Err(e) = packs.rollback(pack_id, prior) {
            error!(
                pack = %packs.describe(pack_id),
                offset = prior,
                error = %e,
                "Rollback failed; pack holds unindexed bytes until overwritten"
            );
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Contents of a live blob
    pub fn get(&self, blob: &BlobRef) -> Result<Option<Bytes>> {
        let Some(location) = self.index.lookup(blob)? else {
            return Ok(None);
        };
        let mut data = vec![0u8; location.size as usize];
        self.packs
            .read()
            .read_exact_at(location.pack_id, location.offset, &mut data)?;
        Ok(Some(Bytes::from(data)))
    }

    /// Index location of a live blob
    pub fn locate(&self, blob: &BlobRef) -> Result<Option<Location>> {
        self.index.lookup(blob)
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Walk every record in every pack, in pack then offset order
    pub fn walk<F>(&self, f: F) -> Result<WalkSummary>
    where
        F: FnMut(&WalkEntry) -> Result<()>,
    {
        let packs = self.packs.read();
        walk(&**packs, f)
    }

    /// Rebuild the index from the packs
    ///
    /// Every valid record is upserted in scan order, so the newest copy
    /// of a ref wins. Nothing is removed from the index.
    pub fn reindex(&self) -> Result<ReindexReport> {
        let _writer = self.writer.lock();
        let packs = self.packs.read();

        let mut indexed = 0u64;
        let summary = walk(&**packs, |entry| {
            if let Some(blob) = entry.blob.valid() {
                self.index.put(
                    blob,
                    Location {
                        pack_id: entry.pack_id,
                        offset: entry.offset,
                        size: entry.size,
                    },
                )?;
                indexed += 1;
            }
            Ok(())
        })?;

        let report = ReindexReport {
            records: summary.records,
            indexed,
            invalid: summary.invalid,
            damaged: summary.damaged().cloned().collect(),
        };
        info!(
            records = report.records,
            indexed = report.indexed,
            invalid = report.invalid,
            damaged = report.damaged.len(),
            "Reindexed from packs"
        );
        Ok(report)
    }

    /// Compare the index with the packs without changing anything
    pub fn audit(&self) -> Result<AuditReport> {
        let _writer = self.writer.lock();

        // Newest copy of each ref, as reindexing would see it
        let mut newest: HashMap<BlobRef, Location> = HashMap::new();
        let summary = {
            let packs = self.packs.read();
            walk(&**packs, |entry| {
                if let Some(blob) = entry.blob.valid() {
                    newest.insert(
                        blob.clone(),
                        Location {
                            pack_id: entry.pack_id,
                            offset: entry.offset,
                            size: entry.size,
                        },
                    );
                }
                Ok(())
            })?
        };

        let mut report = AuditReport {
            records: summary.records,
            invalid: summary.invalid,
            damaged: summary.damaged().cloned().collect(),
            ..AuditReport::default()
        };

        let mut in_index: HashMap<BlobRef, Location> = HashMap::new();
        let mut after: Option<BlobRef> = None;
        loop {
            let batch = self.index.enumerate(after.as_ref(), AUDIT_BATCH)?;
            let done = batch.len() < AUDIT_BATCH;
            after = batch.last().map(|(blob, _)| blob.clone());
            in_index.extend(batch);
            if done {
                break;
            }
        }

        for (blob, location) in &newest {
            match in_index.get(blob) {
                Some(indexed) if indexed == location => report.matched += 1,
                Some(_) => report.mismatched.push(blob.clone()),
                None => report.missing.push(blob.clone()),
            }
        }
        report.dangling = in_index
            .keys()
            .filter(|blob| !newest.contains_key(*blob))
            .cloned()
            .collect();

        report.missing.sort();
        report.mismatched.sort();
        report.dangling.sort();
        Ok(report)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the engine gracefully
    ///
    /// Syncs the current pack and flushes the index
    pub fn close(self) -> Result<()> {
        let writer = *self.writer.lock();
        self.packs.read().sync(writer.pack_id)?;
        self.index.close()?;
        info!(pack_id = writer.pack_id, offset = writer.pos, "Pack engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of packs
    pub fn pack_count(&self) -> u32 {
        self.packs.read().pack_count()
    }

    /// Current pack ID and append position
    pub fn current_position(&self) -> (u32, u64) {
        let writer = *self.writer.lock();
        (writer.pack_id, writer.pos)
    }

    /// Address range of a pack
    pub fn pack_bounds(&self, pack_id: u32) -> Result<PackBounds> {
        self.packs.read().bounds(pack_id)
    }
}

impl BlobStorage for PackEngine {
    fn receive(&self, blob: &BlobRef, source: &mut dyn Read) -> Result<SizedRef> {
        let data = read_limited(source, MAX_BLOB_SIZE)?;
        let size = u32::try_from(data.len()).map_err(|_| {
            BlobError::CapacityExceeded(format!("blob of {} bytes is too large", data.len()))
        })?;
        blob.verify(&data)?;

        let stored = self.put(blob, size, &mut data.as_slice())?;
        Ok(SizedRef::new(blob.clone(), stored))
    }

    fn fetch(&self, blob: &BlobRef) -> Result<Bytes> {
        self.get(blob)?
            .ok_or_else(|| BlobError::NotFound(blob.to_string()))
    }

    fn stat(&self, blobs: &[BlobRef]) -> Result<Vec<SizedRef>> {
        self.index.stat(blobs)
    }

    fn enumerate(&self, after: Option<&BlobRef>, limit: usize) -> Result<Vec<SizedRef>> {
        Ok(self
            .index
            .enumerate(after, limit)?
            .into_iter()
            .map(|(blob, location)| SizedRef::new(blob, location.size))
            .collect())
    }

    fn remove(&self, blobs: &[BlobRef]) -> Result<()> {
        self.delete(blobs)
    }
}

/// Read `source` to the end, failing once it yields more than `limit` bytes
fn read_limited(source: &mut dyn Read, limit: u64) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    source.take(limit.saturating_add(1)).read_to_end(&mut data)?;
    if data.len() as u64 > limit {
        return Err(BlobError::CapacityExceeded(format!(
            "blob is larger than {} bytes",
            limit
        )));
    }
    Ok(data)
}
