//! Raw block device adapter
//!
//! Presents one block device as a row of fixed-capacity pack regions.
//!
//! ## Layout
//! ```text
//! ┌──────────────┬─────────────────┬─────────────────┬─────
//! │ superblock   │ pack region 0   │ pack region 1   │ ...
//! │ (512 bytes)  │ (region_size)   │ (region_size)   │
//! └──────────────┴─────────────────┴─────────────────┴─────
//! ```
//!
//! Each region holds records back to back. Unwritten space reads as
//! zero bytes, and a zero byte always follows the last record of a
//! region so stale contents from earlier use are never scanned.
//!
//! ## Superblock Format
//! ```text
//! ┌────────────────┬────────────────────┬────────────────┬──────────────┐
//! │ Magic (8)      │ RegionSize u64 LE  │ Opened u32 LE  │ CRC32 u32 LE │
//! │ "BLOBPACK"     │                    │                │ of bytes 0-19│
//! └────────────────┴────────────────────┴────────────────┴──────────────┘
//! ```
//! `Opened` is rewritten before a new region takes appends, so an empty
//! region stays in use across reopen.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{BlobError, Result};

use super::source::{read_full_at, PackBounds, PackSource};

/// Bytes reserved at the start of the device for a superblock
pub const SUPERBLOCK_SIZE: u64 = 512;

const SUPERBLOCK_MAGIC: &[u8; 8] = b"BLOBPACK";
const SUPERBLOCK_LEN: usize = 24;

fn encode_superblock(region_size: u64, opened: u32) -> [u8; SUPERBLOCK_LEN] {
    let mut out = [0u8; SUPERBLOCK_LEN];
    out[0..8].copy_from_slice(SUPERBLOCK_MAGIC);
    out[8..16].copy_from_slice(&region_size.to_le_bytes());
    out[16..20].copy_from_slice(&opened.to_le_bytes());
    let crc = crc32fast::hash(&out[0..20]);
    out[20..24].copy_from_slice(&crc.to_le_bytes());
    out
}

/// `(region_size, opened)` from a valid superblock, `None` for a blank
/// or damaged one
fn decode_superblock(bytes: &[u8; SUPERBLOCK_LEN]) -> Option<(u64, u32)> {
    if &bytes[0..8] != SUPERBLOCK_MAGIC {
        return None;
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[20..24]);
    if crc32fast::hash(&bytes[0..20]) != u32::from_le_bytes(crc) {
        return None;
    }
    let mut region_size = [0u8; 8];
    let mut opened = [0u8; 4];
    region_size.copy_from_slice(&bytes[8..16]);
    opened.copy_from_slice(&bytes[16..20]);
    Some((u64::from_le_bytes(region_size), u32::from_le_bytes(opened)))
}

/// A block device (or any fixed-size file) split into pack regions
pub struct RawDevice {
    path: PathBuf,
    file: File,
    region_size: u64,
    /// Regions that fit on the device
    region_count: u32,
    /// Regions in use (IDs `0..opened`)
    opened: u32,
}

impl RawDevice {
    /// Open a device and work out how many regions are already in use
    ///
    /// The superblock's count is authoritative; regions past it that
    /// start with a record header also count. Region 0 is always in use.
    pub fn open(path: &Path, region_size: u64) -> Result<Self> {
        if region_size == 0 {
            return Err(BlobError::Config("region_size must be positive".to_string()));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        // Block devices report a zero metadata length; seeking gives the real size.
        let device_len = file.seek(SeekFrom::End(0))?;

        let usable = device_len.saturating_sub(SUPERBLOCK_SIZE);
        let region_count = u32::try_from(usable / region_size).unwrap_or(u32::MAX);
        if region_count == 0 {
            return Err(BlobError::Config(format!(
                "{} ({} bytes) cannot hold one region of {} bytes after the superblock",
                path.display(),
                device_len,
                region_size
            )));
        }

        let mut device = Self {
            path: path.to_path_buf(),
            file,
            region_size,
            region_count,
            opened: 1,
        };
        let recorded = match device.read_superblock()? {
            Some((stored_size, _)) if stored_size != region_size => {
                return Err(BlobError::Config(format!(
                    "{} was formatted with {} byte regions, not {}",
                    path.display(),
                    stored_size,
                    region_size
                )));
            }
            Some((_, opened)) => Some(opened),
            None => None,
        };
        device.opened = recorded.unwrap_or(1).clamp(1, region_count);
        for id in device.opened..region_count {
            if !device.region_in_use(id)? {
                break;
            }
            device.opened = id + 1;
        }
        if recorded != Some(device.opened) {
            device.write_superblock(device.opened)?;
        }

        info!(
            device = %path.display(),
            region_size,
            region_count,
            in_use = device.opened,
            "Opened raw device"
        );
        Ok(device)
    }

    /// Device offset where region `id` begins
    pub fn region_start(&self, id: u32) -> u64 {
        SUPERBLOCK_SIZE + u64::from(id) * self.region_size
    }

    /// Number of regions that fit on the device
    pub fn region_count(&self) -> u32 {
        self.region_count
    }

    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_superblock(&self) -> Result<Option<(u64, u32)>> {
        let mut bytes = [0u8; SUPERBLOCK_LEN];
        let n = read_full_at(&self.file, 0, &mut bytes)?;
        if n < SUPERBLOCK_LEN {
            return Ok(None);
        }
        let decoded = decode_superblock(&bytes);
        if decoded.is_none() && bytes.iter().any(|&b| b != 0) {
            warn!(device = %self.path.display(), "Ignoring unreadable superblock");
        }
        Ok(decoded)
    }

    fn write_superblock(&self, opened: u32) -> Result<()> {
        self.file
            .write_all_at(&encode_superblock(self.region_size, opened), 0)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn region_in_use(&self, id: u32) -> Result<bool> {
        let mut first = [0u8; 1];
        let n = read_full_at(&self.file, self.region_start(id), &mut first)?;
        Ok(n == 1 && first[0] == b'[')
    }

    fn check_region(&self, pack_id: u32) -> Result<PackBounds> {
        if pack_id >= self.opened {
            return Err(BlobError::CorruptPack(format!(
                "region {} of {} is not in use",
                pack_id,
                self.path.display()
            )));
        }
        let start = self.region_start(pack_id);
        Ok(PackBounds {
            start,
            end: start + self.region_size,
        })
    }
}

impl PackSource for RawDevice {
    fn pack_count(&self) -> u32 {
        self.opened
    }

    fn bounds(&self, pack_id: u32) -> Result<PackBounds> {
        self.check_region(pack_id)
    }

    fn capacity(&self) -> Option<u64> {
        Some(self.region_size)
    }

    fn read_at(&self, pack_id: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let bounds = self.check_region(pack_id)?;
        if offset < bounds.start || offset >= bounds.end {
            return Ok(0);
        }
        // Never read across into the next region
        let available = (bounds.end - offset).min(buf.len() as u64) as usize;
        Ok(read_full_at(&self.file, offset, &mut buf[..available])?)
    }

    fn write_at(&self, pack_id: u32, offset: u64, data: &[u8]) -> Result<()> {
        let bounds = self.check_region(pack_id)?;
        if offset < bounds.start || offset + data.len() as u64 > bounds.end {
            return Err(BlobError::CapacityExceeded(format!(
                "write of {} bytes at {} overruns region {} [{}, {})",
                data.len(),
                offset,
                pack_id,
                bounds.start,
                bounds.end
            )));
        }
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn sync(&self, _pack_id: u32) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn mark_end(&self, pack_id: u32, offset: u64) -> Result<()> {
        let bounds = self.check_region(pack_id)?;
        if offset < bounds.end {
            self.file.write_all_at(&[0u8], offset)?;
        }
        Ok(())
    }

    fn rollback(&self, pack_id: u32, offset: u64) -> Result<()> {
        // A device cannot shrink; clobbering the '[' of the abandoned
        // header makes the scanner stop there.
        self.mark_end(pack_id, offset)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn open_next(&mut self) -> Result<u32> {
        let id = self.opened;
        if id >= self.region_count {
            return Err(BlobError::CapacityExceeded(format!(
                "all {} regions of {} are used",
                self.region_count,
                self.path.display()
            )));
        }
        // Clear the region before the superblock makes it part of the store
        self.file.write_all_at(&[0u8], self.region_start(id))?;
        self.write_superblock(id + 1)?;
        self.opened = id + 1;
        info!(pack_id = id, start = self.region_start(id), "Opened device region");
        Ok(id)
    }

    fn describe(&self, pack_id: u32) -> String {
        format!("{}#region{}", self.path.display(), pack_id)
    }
}
