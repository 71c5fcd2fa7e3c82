//! Durable sorted store
//!
//! Every mutation is appended to a log file before it is applied to an
//! in-memory BTreeMap; opening the store replays the log.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Frame 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Frame 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is a bincode-encoded `KvOp`; the CRC covers `Data`. All
//! integers are little-endian.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SyncStrategy;
use crate::error::{BlobError, Result};

use super::SortedKv;

/// Frame header: LSN (8) + CRC (4) + Len (4)
const FRAME_HEADER_SIZE: usize = 16;

/// Don't bother compacting logs shorter than this many frames
const COMPACT_MIN_FRAMES: u64 = 1024;

/// A logged mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
enum KvOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Append side of the log
struct LogWriter {
    file: File,
    /// Current file length; writes that fail are cut back to this
    len: u64,
    next_lsn: u64,
    /// Frames written since the last fsync
    unsynced: usize,
    /// Frames in the file
    frames: u64,
}

/// What replaying a log found
#[derive(Debug, Default)]
struct Replay {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    frames: u64,
    last_lsn: u64,
    valid_len: u64,
    corrupted: bool,
}

/// Sorted key-value store persisted as an append-only operation log
pub struct LogKv {
    path: PathBuf,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<LogWriter>,
    sync_strategy: SyncStrategy,
}

impl LogKv {
    /// Open or create the log at `path`
    ///
    /// A torn or corrupt tail left by a crash is truncated away.
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let replay = if path.exists() {
            let mut bytes = Vec::new();
            File::open(path)?.read_to_end(&mut bytes)?;
            Self::replay(&bytes)
        } else {
            Replay::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if replay.corrupted {
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                "Truncating damaged index log tail"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        info!(
            path = %path.display(),
            entries = replay.map.len(),
            frames = replay.frames,
            last_lsn = replay.last_lsn,
            "Opened index log"
        );

        Ok(Self {
            path: path.to_path_buf(),
            map: RwLock::new(replay.map),
            log: Mutex::new(LogWriter {
                file,
                len: replay.valid_len,
                next_lsn: replay.last_lsn + 1,
                unsynced: 0,
                frames: replay.frames,
            }),
            sync_strategy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Rewrite the log so it holds one frame per live key
    pub fn compact(&self) -> Result<()> {
        let mut log = self.log.lock();
        let map = self.map.read();

        let tmp_path = self.path.with_extension("kvlog.tmp");
        let mut tmp = File::create(&tmp_path)?;
        let mut lsn = log.next_lsn;
        let mut len = 0u64;
        for (key, value) in map.iter() {
            let frame = encode_frame(
                lsn,
                &KvOp::Set {
                    key: key.clone(),
                    value: value.clone(),
                },
            )?;
            tmp.write_all(&frame)?;
            len += frame.len() as u64;
            lsn += 1;
        }
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        debug!(
            path = %self.path.display(),
            before = log.frames,
            after = map.len(),
            "Compacted index log"
        );
        *log = LogWriter {
            file,
            len,
            next_lsn: lsn,
            unsynced: 0,
            frames: map.len() as u64,
        };
        Ok(())
    }

    /// Force pending frames to disk
    pub fn sync(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.file.sync_data()?;
        log.unsynced = 0;
        Ok(())
    }

    fn replay(bytes: &[u8]) -> Replay {
        let mut replay = Replay::default();
        let mut pos = 0usize;

        while pos < bytes.len() {
            let Some(header) = bytes.get(pos..pos + FRAME_HEADER_SIZE) else {
                replay.corrupted = true;
                break;
            };
            let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
            let crc = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default());
            let len = u32::from_le_bytes(header[12..16].try_into().unwrap_or_default()) as usize;

            let start = pos + FRAME_HEADER_SIZE;
            let Some(data) = bytes.get(start..start + len) else {
                replay.corrupted = true;
                break;
            };
            if crc32fast::hash(data) != crc || lsn <= replay.last_lsn {
                replay.corrupted = true;
                break;
            }
            let Ok(op) = bincode::deserialize::<KvOp>(data) else {
                replay.corrupted = true;
                break;
            };

            match op {
                KvOp::Set { key, value } => {
                    replay.map.insert(key, value);
                }
                KvOp::Delete { key } => {
                    replay.map.remove(&key);
                }
            }
            replay.last_lsn = lsn;
            replay.frames += 1;
            pos = start + len;
            replay.valid_len = pos as u64;
        }
        replay
    }

    /// Append one operation; the map is updated by the caller only
    /// after this succeeds
    fn append(&self, log: &mut LogWriter, op: &KvOp) -> Result<()> {
        self.append_with(log, op, File::sync_data)
    }

    /// Append with an explicit sync step
    ///
    /// A failed write or sync cuts the file back to where the frame
    /// began, so replay never resurrects an entry the caller saw fail.
    fn append_with(
        &self,
        log: &mut LogWriter,
        op: &KvOp,
        sync: fn(&File) -> std::io::Result<()>,
    ) -> Result<()> {
        let frame = encode_frame(log.next_lsn, op)?;
        let start = log.len;

        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => log.unsynced + 1 >= count,
        };
        let written = write_frame(&log.file, start, &frame).and_then(|()| {
            if due {
                sync(&log.file)?;
            }
            Ok(())
        });
        if let Err(e) = written {
            self.cut_back(&log.file, start);
            return Err(e);
        }

        log.len = start + frame.len() as u64;
        log.next_lsn += 1;
        log.frames += 1;
        log.unsynced = if due { 0 } else { log.unsynced + 1 };
        Ok(())
    }

    /// Drop a frame that was not committed
    fn cut_back(&self, file: &File, len: u64) {
        if let Err(e) = file.set_len(len) {
            error!(
                path = %self.path.display(),
                len,
                error = %e,
                "Failed to cut uncommitted frame from index log"
            );
        }
    }

    fn should_compact(&self, frames: u64) -> bool {
        frames >= COMPACT_MIN_FRAMES && frames > 2 * self.len() as u64
    }
}

impl SortedKv for LogKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        self.append(
            &mut log,
            &KvOp::Set {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )?;
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        if !self.map.read().contains_key(key) {
            return Ok(());
        }
        self.append(&mut log, &KvOp::Delete { key: key.to_vec() })?;
        self.map.write().remove(key);
        Ok(())
    }

    fn scan_from(&self, start: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .read()
            .range(start.to_vec()..)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.map.read().is_empty())
    }

    fn close(&self) -> Result<()> {
        let frames = self.log.lock().frames;
        if self.should_compact(frames) {
            self.compact()?;
        }
        self.sync()
    }
}

fn encode_frame(lsn: u64, op: &KvOp) -> Result<Vec<u8>> {
    let data = bincode::serialize(op)?;
    let len = u32::try_from(data.len())
        .map_err(|_| BlobError::Serialization(format!("index entry of {} bytes", data.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + data.len());
    frame.extend_from_slice(&lsn.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

fn write_frame(file: &File, at: u64, frame: &[u8]) -> Result<()> {
    file.write_all_at(frame, at)?;
    Ok(())
}
