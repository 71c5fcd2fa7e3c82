//! Pack Module
//!
//! Append-only pack files of framed blob records.
//!
//! ## Responsibilities
//! - Encode/decode record headers
//! - Address packs on ordinary files or raw device regions
//! - Scan raw pack bytes, tolerating damaged records
//!
//! ## Record Format
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Record 1                                    │
//! │ ┌──────────────────────────┬──────────────┐ │
//! │ │ [<ref> <decimal size>]   │ body (size)  │ │
//! │ └──────────────────────────┴──────────────┘ │
//! ├─────────────────────────────────────────────┤
//! │ Record 2                                    │
//! │ ┌──────────────────────────┬──────────────┐ │
//! │ │ [<ref> <decimal size>]   │ body (size)  │ │
//! │ └──────────────────────────┴──────────────┘ │
//! └─────────────────────────────────────────────┘
//! ```
//! No padding or separators between records.

mod device;
mod header;
mod source;
mod walk;

pub use device::{RawDevice, SUPERBLOCK_SIZE};
pub use header::{
    decode_header, encode_header, header_len, is_truncated_header, Header, MAX_HEADER_SIZE,
    MIN_HEADER_SIZE,
};
pub use source::{open_pack_source, pack_path, FilePacks, PackBounds, PackSource};
pub use walk::{walk, walk_pack, PackScan, RecordRef, ScanStop, WalkEntry, WalkSummary};
