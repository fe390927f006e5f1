//! Upstream image loading interface.
//!
//! The pixmap loader does not fetch or decode images itself. It consumes an
//! [`ImageLoader`] that resolves requests to raw RGBA images asynchronously,
//! typically backed by its own download and decode pool.

use crate::error::LoadError;
use crate::request::{ImageRequest, SizeSlug};
use std::future::Future;
use std::pin::Pin;

/// Decoded image in a toolkit-neutral format.
pub type RawImage = image::RgbaImage;

/// Future returned by [`ImageLoader::get_image`].
pub type ImageFuture = Pin<Box<dyn Future<Output = Result<RawImage, LoadError>> + Send>>;

/// Asynchronous source of raw images.
///
/// Implementations must be `Send + Sync` so a single loader can be shared
/// between pixmap loaders and conversion tasks.
pub trait ImageLoader: Send + Sync + 'static {
    /// Fetch and decode the image for `request`.
    fn get_image(&self, request: &ImageRequest) -> ImageFuture;

    /// Resident placeholder image for a size class.
    fn get_default_image(&self, size_slug: SizeSlug) -> RawImage;

    /// Release the loader's own resources.
    fn stop(&self);
}
