//! Pixmap loading with request coalescing and conversion memoization.
//!
//! Turns image requests into display-ready pixmaps. Raw images come from an
//! [`ImageLoader`] supplied by the application; conversion runs on a bounded
//! pool of blocking workers. Concurrent requests for the same image share a
//! single fetch and a single conversion, and converted pixmaps are memoized
//! so repeat requests return the same shared instance.
//!
//! # Usage
//!
//! ```ignore
//! use pixmapload::{LoaderConfig, PixmapLoader, RequestArgs, SizeSlug, SkiaBackend};
//!
//! let config = LoaderConfig::load()?;
//! let loader = PixmapLoader::new(image_loader, SkiaBackend, config)?;
//!
//! let pixmap = loader
//!     .get_pixmap(RequestArgs::subject("Bolt").with_size(SizeSlug::Small))
//!     .await?;
//! let placeholder = loader.get_default_pixmap(SizeSlug::Small);
//! ```

pub mod backend;
pub mod config;
pub mod converter;
pub mod error;
pub mod image_loader;
pub mod loader;
pub mod logging;
pub mod pool;
pub mod request;
pub mod stats;

pub use backend::{PixmapBackend, SkiaBackend};
pub use config::{ConfigFileError, LoaderConfig};
pub use converter::{
    Claim, ConversionKey, ConversionResult, Joiner, Leader, MemoCapacity, PixmapConverter,
};
pub use error::{ConvertError, LoadError, PixmapError};
pub use image_loader::{ImageFuture, ImageLoader, RawImage};
pub use loader::{PixmapFuture, PixmapKey, PixmapLoader};
pub use pool::{WorkerPermit, WorkerPool};
pub use request::{ImageRequest, RequestArgs, SizeSlug, Subject, SubjectKind};
pub use stats::ConverterStats;

/// Version of the pixmapload library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
