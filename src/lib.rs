//! # blobpack
//!
//! Content-addressed blob storage with:
//! - Append-only pack files of self-describing records
//! - A sorted ref → location index over a pluggable key-value store
//! - Index rebuild and audit straight from pack bytes
//! - Packs on ordinary files or fixed-size regions of a raw device
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BlobStorage (trait)                       │
//! │          receive / fetch / stat / enumerate / remove         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      PackEngine                              │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Packs    │          │  BlobIndex  │
//!   │  (Append)   │          │  (Sorted)   │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Files / Raw │          │  MemoryKv   │
//!   │   Device    │          │   / LogKv   │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod blob;
pub mod pack;
pub mod index;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use blob::{BlobRef, SizedRef};
pub use config::Config;
pub use engine::PackEngine;
pub use error::{BlobError, Result};
pub use storage::BlobStorage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blobpack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
