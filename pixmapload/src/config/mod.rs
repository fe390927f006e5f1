//! Configuration for [`PixmapLoader`](crate::loader::PixmapLoader).
//!
//! # Example
//!
//! ```
//! use pixmapload::config::LoaderConfig;
//! use pixmapload::converter::MemoCapacity;
//!
//! // Using defaults
//! let config = LoaderConfig::default();
//! assert_eq!(config.workers(), 10);
//! assert_eq!(config.memo_capacity().limit(), Some(64));
//!
//! // Custom configuration
//! let config = LoaderConfig::new()
//!     .with_workers(4)
//!     .with_memo_capacity(MemoCapacity::Unbounded)
//!     .with_image_root("/var/cache/images");
//! assert!(config.image_root().is_some());
//! ```

mod defaults;
mod file;
mod parser;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};

use crate::converter::MemoCapacity;
use std::path::{Path, PathBuf};

/// Pixmap loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Number of concurrent conversion workers
    workers: usize,
    /// Memo table capacity
    memo_capacity: MemoCapacity,
    /// Root directory where the image loader persists saved images
    image_root: Option<PathBuf>,
}

impl LoaderConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of conversion workers.
    ///
    /// Only used when the loader creates its own worker pool.
    /// Default: 10 workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the memo table capacity.
    ///
    /// Default: 64 conversions, least recently used evicted first.
    pub fn with_memo_capacity(mut self, capacity: MemoCapacity) -> Self {
        self.memo_capacity = capacity;
        self
    }

    /// Set the directory under which saved images are persisted.
    ///
    /// When set, saved requests carry their expected path and are built
    /// from that file if it exists.
    pub fn with_image_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.image_root = Some(root.into());
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn memo_capacity(&self) -> MemoCapacity {
        self.memo_capacity
    }

    pub fn image_root(&self) -> Option<&Path> {
        self.image_root.as_deref()
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            memo_capacity: MemoCapacity::default(),
            image_root: None,
        }
    }
}
