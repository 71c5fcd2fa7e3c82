//! Blob Identity Module
//!
//! Content hashes that name blobs.
//!
//! ## Ref Format
//! ```text
//! sha1-f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0
//! └┬─┘ └──────────────────┬───────────────────┘
//!  algo          lowercase hex digest
//! ```
//!
//! Refs order byte-lexicographically on their string form, which is
//! also the order the index enumerates them in.

mod blob_ref;
mod hash;

pub use blob_ref::{BlobRef, SizedRef};
pub use hash::{BlobHasher, HashAlgorithm};
