//! Tests for the record header codec
//!
//! These tests verify:
//! - Encoding produces the bracketed text frame
//! - Decoding reports the bytes consumed by the frame
//! - Every malformed shape is rejected with a header error

use blobpack::pack::{decode_header, encode_header, header_len, is_truncated_header};
use blobpack::{BlobError, BlobRef};

// =============================================================================
// Helper Functions
// =============================================================================

fn assert_malformed(input: &[u8]) {
    match decode_header(input) {
        Err(BlobError::MalformedHeader(_)) => {}
        other => panic!("expected malformed header for {:?}, got {:?}", input, other),
    }
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_header_format() {
    assert_eq!(encode_header("foo-123", 234), b"[foo-123 234]".to_vec());
    assert_eq!(encode_header("a-b", 0), b"[a-b 0]".to_vec());
}

#[test]
fn test_header_len_for_sha1_ref() {
    let blob = BlobRef::sha1(b"hello");
    // '[' + 45 byte ref + ' ' + "5" + ']'
    assert_eq!(header_len(blob.as_str(), 5), 49);
    assert_eq!(header_len(blob.as_str(), 15), 50);
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_simple_header() {
    let header = decode_header(b"[foo-123 234]").unwrap();
    assert_eq!(header.consumed, 13);
    assert_eq!(header.name, "foo-123");
    assert_eq!(header.size, 234);
}

#[test]
fn test_decode_real_ref_with_body_following() {
    let blob = BlobRef::sha1(b"hello");
    let mut bytes = encode_header(blob.as_str(), 5);
    let header_size = bytes.len();
    bytes.extend_from_slice(b"hello");

    let header = decode_header(&bytes).unwrap();
    assert_eq!(header.consumed, header_size);
    assert_eq!(header.name, blob.as_str());
    assert_eq!(header.size, 5);
    assert_eq!(&bytes[header.consumed..], b"hello");
}

#[test]
fn test_encode_decode_preserves_fields() {
    let blob = BlobRef::sha1(b"x");
    for size in [0u32, 1, 9, 10, 99, 100, 65_536, u32::MAX] {
        let bytes = encode_header(blob.as_str(), size);
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.name, blob.as_str());
        assert_eq!(header.size, size);
        assert_eq!(header.consumed, bytes.len());
    }
}

#[test]
fn test_decode_size_overflow_rejected() {
    assert_malformed(b"[foo-123 4294967296]");
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_decode_empty_input() {
    assert_malformed(b"");
}

#[test]
fn test_decode_lone_open_bracket() {
    assert_malformed(b"[");
}

#[test]
fn test_decode_empty_brackets() {
    assert_malformed(b"[]");
}

#[test]
fn test_decode_missing_close_bracket() {
    assert_malformed(b"[foo-123 234");
}

#[test]
fn test_decode_missing_open_bracket() {
    assert_malformed(b"foo-123 234]");
}

#[test]
fn test_decode_non_numeric_size() {
    assert_malformed(b"[foo-123 23x]");
    assert_malformed(b"[foo-123 -12]");
    assert_malformed(b"[foo-123 ]");
}

#[test]
fn test_decode_missing_space() {
    assert_malformed(b"[foo-123234]");
}

#[test]
fn test_decode_close_bracket_past_cutoff() {
    let mut bytes = b"[".to_vec();
    bytes.extend(std::iter::repeat(b'a').take(600));
    bytes.extend_from_slice(b" 5]");
    assert_malformed(&bytes);
}

// =============================================================================
// Truncation Detection Tests
// =============================================================================

#[test]
fn test_truncated_header_detection() {
    assert!(is_truncated_header(b"[sha1-abc"));
    assert!(!is_truncated_header(b"[foo-123 234]"));
    assert!(!is_truncated_header(b"foo"));
    assert!(!is_truncated_header(b""));
}
