//! Record header codec
//!
//! Encoding and decoding of the bracketed text frame that precedes every
//! blob body in a pack.
//!
//! ## Wire Format
//! ```text
//! ┌─────┬──────────────┬───────┬──────────────┬─────┐
//! │ '[' │ ref (UTF-8)  │  ' '  │ decimal size │ ']' │
//! └─────┴──────────────┴───────┴──────────────┴─────┘
//! e.g. [sha1-f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0 5]
//! ```

use crate::error::{BlobError, Result};

/// Shortest possible header: `[b-c 0]`
pub const MIN_HEADER_SIZE: usize = 7;

/// A header must close within this many bytes
pub const MAX_HEADER_SIZE: usize = 512;

/// A decoded header borrowing its name from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Bytes taken by the frame, including both brackets
    pub consumed: usize,
    /// Ref text between '[' and the space; not validated as a ref
    pub name: &'a str,
    /// Declared body length
    pub size: u32,
}

/// Encode a record header
pub fn encode_header(name: &str, size: u32) -> Vec<u8> {
    format!("[{} {}]", name, size).into_bytes()
}

/// Length of the header `encode_header(name, size)` would produce
pub fn header_len(name: &str, size: u32) -> usize {
    // brackets + space + name + digits
    3 + name.len() + size.to_string().len()
}

/// Decode the header at the start of `bytes`
///
/// Only the leading frame is examined; anything after the closing
/// bracket is left for the caller (it is the blob body).
pub fn decode_header(bytes: &[u8]) -> Result<Header<'_>> {
    if bytes.len() < MIN_HEADER_SIZE {
        return Err(malformed(format!(
            "need at least {} bytes, got {}",
            MIN_HEADER_SIZE,
            bytes.len()
        )));
    }
    if bytes[0] != b'[' {
        return Err(malformed(format!("expected '[', found byte 0x{:02x}", bytes[0])));
    }

    let window = &bytes[..bytes.len().min(MAX_HEADER_SIZE)];
    let close = window
        .iter()
        .position(|&b| b == b']')
        .ok_or_else(|| malformed(format!("no ']' within {} bytes", window.len())))?;
    if close + 1 < MIN_HEADER_SIZE {
        return Err(malformed(format!("frame of {} bytes is too short", close + 1)));
    }

    let inner = &bytes[1..close];
    let space = inner
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| malformed("missing space between ref and size".to_string()))?;

    let name = std::str::from_utf8(&inner[..space])
        .map_err(|_| malformed("ref is not valid UTF-8".to_string()))?;
    if name.is_empty() {
        return Err(malformed("empty ref".to_string()));
    }

    let digits = &inner[space + 1..];
    let size = parse_decimal(digits)
        .ok_or_else(|| malformed(format!("bad size field {:?}", String::from_utf8_lossy(digits))))?;

    Ok(Header {
        consumed: close + 1,
        name,
        size,
    })
}

/// Whether `bytes` could still become a valid header if more bytes
/// followed, i.e. it looks like a frame cut short at end of input.
pub fn is_truncated_header(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes[0] == b'['
        && bytes.len() < MAX_HEADER_SIZE
        && !bytes.contains(&b']')
}

/// Parse ASCII digits into a u32; no sign, no whitespace, no overflow
fn parse_decimal(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u32, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u32::from(b - b'0'))
    })
}

fn malformed(reason: String) -> BlobError {
    BlobError::MalformedHeader(reason)
}
