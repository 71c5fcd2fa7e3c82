//! Configuration for blobpack
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{BlobError, Result};

/// Main configuration for a pack storage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Pack Configuration
    // -------------------------------------------------------------------------
    /// Root of the pack storage.
    ///
    /// For `PackMedium::Files` this is a directory:
    ///   {root}/
    ///     ├── pack-00000.blobs
    ///     ├── pack-00001.blobs
    ///     └── index.kvlog      (default LogKv index location)
    ///
    /// For `PackMedium::RawDevice` this is the device path itself.
    pub root: PathBuf,

    /// Backing medium for the packs
    pub medium: PackMedium,

    /// Rotate to a new pack file once appending would grow the current
    /// one past this many bytes (file mode only)
    pub max_pack_size: u64,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Which sorted key-value store backs the index
    pub index: IndexKind,

    /// Location of the `Log` index file. Defaults to `{root}/index.kvlog`
    /// in file mode; must be set explicitly for raw devices.
    pub index_path: Option<PathBuf>,

    /// How often the `Log` index fsyncs
    pub index_sync: SyncStrategy,

    /// Rebuild the index from pack contents while opening
    pub reindex_on_open: bool,
}

/// Where pack bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackMedium {
    /// One ordinary, unbounded file per pack under `root`
    Files,

    /// Fixed-size regions of a single block device at `root`
    RawDevice { region_size: u64 },
}

/// Backing store for the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Volatile BTreeMap, rebuilt from the packs at every open
    Memory,

    /// Durable append-only log replayed into memory at open
    Log,
}

/// Index log sync strategy
#[derive(Debug, Clone, Copy)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./blobpack_data"),
            medium: PackMedium::Files,
            max_pack_size: 512 * 1024 * 1024, // 512 MB
            index: IndexKind::Log,
            index_path: None,
            index_sync: SyncStrategy::EveryWrite,
            reindex_on_open: false,
        }
    }
}

impl Config {
    /// File name of the default LogKv index inside `root`
    pub const INDEX_FILENAME: &'static str = "index.kvlog";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolve where the `Log` index lives
    pub fn resolved_index_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.index_path {
            return Ok(path.clone());
        }
        match self.medium {
            PackMedium::Files => Ok(self.root.join(Self::INDEX_FILENAME)),
            PackMedium::RawDevice { .. } => Err(BlobError::Config(
                "a raw device needs an explicit index_path for the log index".to_string(),
            )),
        }
    }

    /// Check the combination of settings before opening anything
    pub fn validate(&self) -> Result<()> {
        self.validate_packs()?;
        if self.index == IndexKind::Log {
            self.resolved_index_path()?;
        }
        Ok(())
    }

    /// Check only the pack settings (used when the index is injected)
    pub fn validate_packs(&self) -> Result<()> {
        if self.max_pack_size == 0 {
            return Err(BlobError::Config("max_pack_size must be positive".to_string()));
        }
        if let PackMedium::RawDevice { region_size } = self.medium {
            if region_size == 0 {
                return Err(BlobError::Config("region_size must be positive".to_string()));
            }
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.index_sync {
            return Err(BlobError::Config("index sync count must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage root (pack directory or device path)
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root = path.into();
        self
    }

    /// Store packs as ordinary files
    pub fn files(mut self) -> Self {
        self.config.medium = PackMedium::Files;
        self
    }

    /// Store packs in fixed-size regions of a raw device
    pub fn raw_device(mut self, region_size: u64) -> Self {
        self.config.medium = PackMedium::RawDevice { region_size };
        self
    }

    /// Set the pack rotation threshold (in bytes)
    pub fn max_pack_size(mut self, size: u64) -> Self {
        self.config.max_pack_size = size;
        self
    }

    /// Choose the index backing store
    pub fn index(mut self, kind: IndexKind) -> Self {
        self.config.index = kind;
        self
    }

    /// Set the location of the log index
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = Some(path.into());
        self
    }

    /// Set the index sync strategy
    pub fn index_sync(mut self, strategy: SyncStrategy) -> Self {
        self.config.index_sync = strategy;
        self
    }

    /// Rebuild the index from packs while opening
    pub fn reindex_on_open(mut self, enabled: bool) -> Self {
        self.config.reindex_on_open = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
