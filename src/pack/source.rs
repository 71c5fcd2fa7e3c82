//! Pack sources
//!
//! One abstraction over where pack bytes live, so the engine and the
//! scanner never branch on the medium beyond its capacity.
//!
//! Offsets passed to a source are absolute positions in the pack's
//! backing handle: byte 0 of the file for ordinary packs, a device
//! offset for raw-device regions.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{Config, PackMedium};
use crate::error::{BlobError, Result};

use super::RawDevice;

/// Address range a pack may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackBounds {
    /// First byte of the pack
    pub start: u64,
    /// One past the last readable byte (file length, or region end)
    pub end: u64,
}

/// Read/append surface shared by ordinary pack files and raw devices
pub trait PackSource: Send + Sync {
    /// Number of packs that exist (IDs `0..pack_count()`)
    fn pack_count(&self) -> u32;

    /// Current address range of a pack
    fn bounds(&self, pack_id: u32) -> Result<PackBounds>;

    /// Fixed byte capacity of every pack, if the medium has one
    fn capacity(&self) -> Option<u64>;

    /// Read into `buf` starting at `offset`; returns fewer bytes only
    /// at the end of the pack
    fn read_at(&self, pack_id: u32, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` at `offset`
    fn write_at(&self, pack_id: u32, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush a pack's data to stable storage
    fn sync(&self, pack_id: u32) -> Result<()>;

    /// Record that valid data in the pack now ends at `offset`
    fn mark_end(&self, pack_id: u32, offset: u64) -> Result<()>;

    /// Discard everything written at or after `offset`
    fn rollback(&self, pack_id: u32, offset: u64) -> Result<()>;

    /// Open the next pack (ID `pack_count()`) and return its ID
    fn open_next(&mut self) -> Result<u32>;

    /// Human-readable location of a pack, for logs
    fn describe(&self, pack_id: u32) -> String;

    /// Whether the pack still holds data up to `end` on the medium
    fn holds(&self, pack_id: u32, end: u64) -> Result<bool> {
        if pack_id >= self.pack_count() {
            return Ok(false);
        }
        Ok(self.bounds(pack_id)?.end >= end)
    }

    /// Fill `buf` completely or fail
    fn read_exact_at(&self, pack_id: u32, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(pack_id, offset, buf)?;
        if n < buf.len() {
            return Err(BlobError::CorruptPack(format!(
                "{}: wanted {} bytes at offset {}, only {} available",
                self.describe(pack_id),
                buf.len(),
                offset,
                n
            )));
        }
        Ok(())
    }
}

/// Open the pack source described by `config`
pub fn open_pack_source(config: &Config) -> Result<Box<dyn PackSource>> {
    match config.medium {
        PackMedium::Files => Ok(Box::new(FilePacks::open(&config.root)?)),
        PackMedium::RawDevice { region_size } => {
            Ok(Box::new(RawDevice::open(&config.root, region_size)?))
        }
    }
}

/// Path of pack `id` inside `dir`
pub fn pack_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("pack-{:05}.blobs", id))
}

/// Parse a pack ID from its filename
/// "pack-00042.blobs" → Some(42)
fn parse_pack_id(path: &Path) -> Option<u32> {
    if path.extension()? != "blobs" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("pack-")?.parse().ok()
}

/// Fill as much of `buf` as the file allows
pub(crate) fn read_full_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// =============================================================================
// Ordinary pack files
// =============================================================================

/// Packs stored as `pack-NNNNN.blobs` files in one directory
pub struct FilePacks {
    dir: PathBuf,
    /// Open handles, index = pack ID
    files: Vec<File>,
}

impl FilePacks {
    /// Open or create pack storage in `dir`
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing pack files
    /// 3. Check the IDs are dense from 0
    /// 4. Create pack 0 if there are none
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u32> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = parse_pack_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();

        if let Some((expected, found)) = ids
            .iter()
            .enumerate()
            .find(|(i, id)| **id as usize != *i)
        {
            return Err(BlobError::CorruptPack(format!(
                "pack IDs in {} are not dense: expected {}, found {}",
                dir.display(),
                expected,
                found
            )));
        }

        let mut packs = Self {
            dir: dir.to_path_buf(),
            files: Vec::with_capacity(ids.len().max(1)),
        };
        for id in ids {
            packs.files.push(Self::open_file(&pack_path(dir, id))?);
        }
        if packs.files.is_empty() {
            packs.open_next()?;
        }

        info!(dir = %dir.display(), packs = packs.files.len(), "Opened pack files");
        Ok(packs)
    }

    /// Directory holding the packs
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path of a pack
    pub fn path(&self, pack_id: u32) -> PathBuf {
        pack_path(&self.dir, pack_id)
    }

    fn open_file(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn file(&self, pack_id: u32) -> Result<&File> {
        self.files.get(pack_id as usize).ok_or_else(|| {
            BlobError::CorruptPack(format!("pack {} does not exist", pack_id))
        })
    }
}

impl PackSource for FilePacks {
    fn pack_count(&self) -> u32 {
        self.files.len() as u32
    }

    fn bounds(&self, pack_id: u32) -> Result<PackBounds> {
        let len = self.file(pack_id)?.metadata()?.len();
        Ok(PackBounds { start: 0, end: len })
    }

    fn capacity(&self) -> Option<u64> {
        None
    }

    fn read_at(&self, pack_id: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(read_full_at(self.file(pack_id)?, offset, buf)?)
    }

    fn write_at(&self, pack_id: u32, offset: u64, data: &[u8]) -> Result<()> {
        self.file(pack_id)?.write_all_at(data, offset)?;
        Ok(())
    }

    fn sync(&self, pack_id: u32) -> Result<()> {
        self.file(pack_id)?.sync_data()?;
        Ok(())
    }

    fn mark_end(&self, _pack_id: u32, _offset: u64) -> Result<()> {
        // End of file is the end marker
        Ok(())
    }

    fn rollback(&self, pack_id: u32, offset: u64) -> Result<()> {
        let file = self.file(pack_id)?;
        file.set_len(offset)?;
        file.sync_all()?;
        Ok(())
    }

    fn open_next(&mut self) -> Result<u32> {
        let id = self.files.len() as u32;
        let path = pack_path(&self.dir, id);
        let file = Self::open_file(&path)?;
        debug!(pack_id = id, path = %path.display(), "Created pack file");
        self.files.push(file);
        Ok(id)
    }

    fn describe(&self, pack_id: u32) -> String {
        pack_path(&self.dir, pack_id).display().to_string()
    }

    fn holds(&self, pack_id: u32, end: u64) -> Result<bool> {
        if pack_id >= self.pack_count() {
            return Ok(false);
        }
        // Stat by name: an open handle outlives an unlinked file
        match fs::metadata(pack_path(&self.dir, pack_id)) {
            Ok(meta) => Ok(meta.len() >= end),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
