//! Pack scanner
//!
//! Walks the raw records of one or more packs, independent of what the
//! index claims. Used to rebuild the index and to audit packs.
//!
//! ## Per-pack termination
//! - no bytes left: clean end
//! - a zero byte: clean end in a fixed-size region (the end marker), or
//!   in a file when only zeros follow; corrupt otherwise
//! - fewer bytes left than the smallest header: torn tail in a file,
//!   clean end in a fixed-size region
//! - header cut short at the end of the pack, or a body that runs past
//!   it: torn tail (the record is not reported)
//! - any other undecodable header: corrupt, the rest of the pack is
//!   left unscanned

use std::fmt;

use tracing::{debug, warn};

use crate::blob::BlobRef;
use crate::error::Result;

use super::header::{decode_header, is_truncated_header, MAX_HEADER_SIZE, MIN_HEADER_SIZE};
use super::source::PackSource;

/// Identity of a scanned record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    /// Header named a syntactically valid ref
    Valid(BlobRef),
    /// Header decoded but its name is not a ref; holds the raw name
    Invalid(String),
}

impl RecordRef {
    pub fn valid(&self) -> Option<&BlobRef> {
        match self {
            RecordRef::Valid(r) => Some(r),
            RecordRef::Invalid(_) => None,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Valid(r) => write!(f, "{}", r),
            RecordRef::Invalid(_) => f.write_str("<invalid-blob-ref>"),
        }
    }
}

/// One record found by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub pack_id: u32,
    pub blob: RecordRef,
    /// Position of the body (first byte after the header)
    pub offset: u64,
    /// Declared body size
    pub size: u32,
}

/// Why scanning a pack stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStop {
    /// Reached the end of written data
    Clean,
    /// A record was cut short by the end of the pack
    TornTail,
    /// A header could not be decoded; holds the reason
    Corrupt(String),
}

/// Outcome of scanning one pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackScan {
    pub pack_id: u32,
    /// Position just past the last complete record
    pub end: u64,
    pub stop: ScanStop,
}

/// Totals for a whole walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Records reported to the callback
    pub records: u64,
    /// Of those, records whose ref was invalid
    pub invalid: u64,
    pub packs: Vec<PackScan>,
}

impl WalkSummary {
    /// Packs whose scan ended anywhere but a clean end
    pub fn damaged(&self) -> impl Iterator<Item = &PackScan> {
        self.packs.iter().filter(|p| p.stop != ScanStop::Clean)
    }
}

/// Walk every pack in ID order, calling `f` for each record
///
/// A callback error aborts the walk and is returned unchanged.
pub fn walk<F>(source: &dyn PackSource, mut f: F) -> Result<WalkSummary>
where
    F: FnMut(&WalkEntry) -> Result<()>,
{
    let mut summary = WalkSummary::default();
    for pack_id in 0..source.pack_count() {
        let scan = walk_pack(source, pack_id, |entry| {
            summary.records += 1;
            if entry.blob.valid().is_none() {
                summary.invalid += 1;
            }
            f(entry)
        })?;
        summary.packs.push(scan);
    }
    Ok(summary)
}

/// True when every byte in `[from, end)` is zero
fn zero_to_end(source: &dyn PackSource, pack_id: u32, from: u64, end: u64) -> Result<bool> {
    let mut chunk = vec![0u8; 64 * 1024];
    let mut pos = from;
    while pos < end {
        let want = (end - pos).min(chunk.len() as u64) as usize;
        let n = source.read_at(pack_id, pos, &mut chunk[..want])?;
        if n == 0 {
            break;
        }
        if chunk[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
        pos += n as u64;
    }
    Ok(true)
}

/// Walk the records of a single pack in offset order
pub fn walk_pack<F>(source: &dyn PackSource, pack_id: u32, mut f: F) -> Result<PackScan>
where
    F: FnMut(&WalkEntry) -> Result<()>,
{
    let bounds = source.bounds(pack_id)?;
    let fixed_capacity = source.capacity().is_some();
    let mut pos = bounds.start;
    let mut buf = vec![0u8; MAX_HEADER_SIZE];

    let stop = loop {
        let remaining = bounds.end.saturating_sub(pos);
        if remaining == 0 {
            break ScanStop::Clean;
        }

        let want = remaining.min(MAX_HEADER_SIZE as u64) as usize;
        let n = source.read_at(pack_id, pos, &mut buf[..want])?;
        let window = &buf[..n];
        if window.is_empty() {
            break ScanStop::Clean;
        }
        if window[0] == 0 {
            // Regions end at a zero marker; a file pack only at zero fill to EOF
            if fixed_capacity || zero_to_end(source, pack_id, pos, bounds.end)? {
                break ScanStop::Clean;
            }
            break ScanStop::Corrupt(format!("zero byte inside pack data at {}", pos));
        }
        if window.len() < MIN_HEADER_SIZE {
            break if fixed_capacity { ScanStop::Clean } else { ScanStop::TornTail };
        }

        let header = match decode_header(window) {
            Ok(header) => header,
            Err(_) if is_truncated_header(window) && remaining < MAX_HEADER_SIZE as u64 => {
                break ScanStop::TornTail;
            }
            Err(e) => break ScanStop::Corrupt(e.to_string()),
        };

        let offset = pos + header.consumed as u64;
        let next = offset + u64::from(header.size);
        if next > bounds.end {
            break ScanStop::TornTail;
        }

        let blob = match BlobRef::parse(header.name) {
            Some(r) => RecordRef::Valid(r),
            None => {
                debug!(pack_id, offset, name = header.name, "Record with invalid ref");
                RecordRef::Invalid(header.name.to_string())
            }
        };
        f(&WalkEntry {
            pack_id,
            blob,
            offset,
            size: header.size,
        })?;
        pos = next;
    };

    if stop != ScanStop::Clean {
        warn!(pack = %source.describe(pack_id), end = pos, stop = ?stop, "Pack scan stopped early");
    }
    Ok(PackScan {
        pack_id,
        end: pos,
        stop,
    })
}
