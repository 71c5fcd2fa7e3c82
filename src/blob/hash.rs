//! Hash algorithms for blob refs

use std::fmt;

use sha1::{Digest, Sha1};
use sha2::Sha224;

/// Hash algorithms a ref may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
}

impl HashAlgorithm {
    /// All supported algorithms
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha1, HashAlgorithm::Sha224];

    /// Name used as the ref prefix
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
        }
    }

    /// Length of the hex digest that follows the prefix
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha224 => 56,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.name() == name)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hasher producing a ref's hex digest
pub enum BlobHasher {
    Sha1(Sha1),
    Sha224(Sha224),
}

impl BlobHasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Sha1 => BlobHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha224 => BlobHasher::Sha224(Sha224::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            BlobHasher::Sha1(_) => HashAlgorithm::Sha1,
            BlobHasher::Sha224(_) => HashAlgorithm::Sha224,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            BlobHasher::Sha1(h) => h.update(data),
            BlobHasher::Sha224(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the lowercase hex digest
    pub fn finish_hex(self) -> String {
        match self {
            BlobHasher::Sha1(h) => hex::encode(h.finalize()),
            BlobHasher::Sha224(h) => hex::encode(h.finalize()),
        }
    }
}
