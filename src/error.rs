//! Error types for blobpack
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BlobError
pub type Result<T> = std::result::Result<T, BlobError>;

/// Unified error type for blobpack operations
#[derive(Debug, Error)]
pub enum BlobError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Pack Format Errors
    // -------------------------------------------------------------------------
    #[error("Malformed record header: {0}")]
    MalformedHeader(String),

    #[error("Corrupt pack data: {0}")]
    CorruptPack(String),

    #[error("Blob size mismatch: header declares {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Pack capacity exceeded: {0}")]
    CapacityExceeded(String),

    // -------------------------------------------------------------------------
    // Blob Identity Errors
    // -------------------------------------------------------------------------
    #[error("Invalid blob ref: {0}")]
    InvalidRef(String),

    #[error("Blob hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Blob not found: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Index error: {0}")]
    Index(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlobError {
    /// True for the ordinary "no live index entry" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}

impl From<bincode::Error> for BlobError {
    fn from(err: bincode::Error) -> Self {
        BlobError::Serialization(err.to_string())
    }
}
