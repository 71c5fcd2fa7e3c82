//! Blob refs and sized refs

use std::fmt;
use std::str::FromStr;

use crate::error::{BlobError, Result};

use super::{BlobHasher, HashAlgorithm};

/// A validated content hash naming one blob, e.g. `sha1-<40 hex>`
///
/// Stored in its canonical string form so that `Ord` is the
/// byte-lexicographic ordering the index relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobRef {
    repr: String,
}

impl BlobRef {
    /// Parse a ref, returning `None` if it is not syntactically valid
    pub fn parse(s: &str) -> Option<Self> {
        let (name, digest) = s.split_once('-')?;
        let algo = HashAlgorithm::from_name(name)?;
        let well_formed = digest.len() == algo.hex_len()
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self { repr: s.to_string() })
    }

    /// Hash `data` with `algo` and return its ref
    pub fn compute(algo: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = BlobHasher::new(algo);
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    /// SHA-1 ref of `data`
    pub fn sha1(data: &[u8]) -> Self {
        Self::compute(HashAlgorithm::Sha1, data)
    }

    /// Build the ref from a finished hasher
    pub fn from_hasher(hasher: BlobHasher) -> Self {
        let algo = hasher.algorithm();
        Self {
            repr: format!("{}-{}", algo.name(), hasher.finish_hex()),
        }
    }

    /// Fresh hasher for the algorithm this ref uses
    pub fn hasher(&self) -> BlobHasher {
        BlobHasher::new(self.algorithm())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        // Only constructed through parse/compute, so the prefix is known.
        let name = self.repr.split('-').next().unwrap_or_default();
        HashAlgorithm::from_name(name).unwrap_or(HashAlgorithm::Sha1)
    }

    /// Check that `data` hashes to this ref
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(self.algorithm(), data);
        if actual != *self {
            return Err(BlobError::HashMismatch {
                expected: self.repr.clone(),
                actual: actual.repr,
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.repr.as_bytes()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for BlobRef {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| BlobError::InvalidRef(s.to_string()))
    }
}

/// A ref together with the blob's size in bytes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizedRef {
    pub blob_ref: BlobRef,
    pub size: u32,
}

impl SizedRef {
    pub fn new(blob_ref: BlobRef, size: u32) -> Self {
        Self { blob_ref, size }
    }
}

impl fmt::Display for SizedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.blob_ref, self.size)
    }
}
