//! Error types for pixmap loading.
//!
//! Errors are split by where they originate: the upstream image loader,
//! the pixmap conversion, or the facade itself. Every type is `Clone`
//! because a single failed conversion is broadcast to all coalesced
//! waiters for the same key.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by an [`ImageLoader`](crate::image_loader::ImageLoader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No image exists for the request
    #[error("image not found: {0}")]
    NotFound(String),

    /// Request was cache-only and the image is not available locally
    #[error("image not cached: {0}")]
    NotCached(String),

    /// Network or disk fetch failed
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Fetched bytes could not be decoded
    #[error("decode failed: {0}")]
    Decode(String),

    /// The loader has been stopped
    #[error("image loader stopped")]
    Stopped,
}

/// Errors produced while turning a raw image into a pixmap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The raw image has no pixels
    #[error("cannot convert empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// The persisted image could not be read
    #[error("failed to read pixmap from {path}: {reason}")]
    ReadPath { path: PathBuf, reason: String },

    /// Backend-specific failure
    #[error("backend error: {0}")]
    Backend(String),

    /// The converting caller went away without publishing a result
    #[error("conversion abandoned before a result was published")]
    Abandoned,
}

/// Errors surfaced to callers of [`PixmapLoader`](crate::loader::PixmapLoader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PixmapError {
    /// Upstream image loading failed
    #[error("image load failed: {0}")]
    Load(#[from] LoadError),

    /// Pixmap conversion failed
    #[error("pixmap conversion failed: {0}")]
    Convert(#[from] ConvertError),

    /// Request made after `stop()`
    #[error("pixmap loader stopped")]
    Stopped,

    /// Conversion task panicked or was cancelled by the runtime
    #[error("conversion task failed: {0}")]
    TaskPanicked(String),

    /// No tokio runtime to run conversions on
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Loader settings that cannot be honoured
    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),
}
