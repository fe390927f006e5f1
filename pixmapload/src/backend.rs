//! Pixmap construction backends.
//!
//! A [`PixmapBackend`] knows how to build the renderable bitmap type of a
//! particular toolkit, either from an in-memory [`RawImage`] or straight
//! from an image file that the upstream loader has already persisted.
//!
//! [`SkiaBackend`] builds premultiplied [`tiny_skia::Pixmap`]s.

use crate::error::ConvertError;
use crate::image_loader::RawImage;
use std::path::Path;
use tiny_skia::{ColorU8, Pixmap};

/// Toolkit-native pixmap construction.
pub trait PixmapBackend: Send + Sync + 'static {
    /// Renderable bitmap produced by this backend.
    type Pixmap: Send + Sync + 'static;

    /// Convert a decoded image.
    fn image_to_pixmap(&self, image: &RawImage) -> Result<Self::Pixmap, ConvertError>;

    /// Build a pixmap directly from an image file.
    fn path_to_pixmap(&self, path: &Path) -> Result<Self::Pixmap, ConvertError>;
}

/// Backend producing `tiny_skia` pixmaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkiaBackend;

impl SkiaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PixmapBackend for SkiaBackend {
    type Pixmap = Pixmap;

    fn image_to_pixmap(&self, image: &RawImage) -> Result<Pixmap, ConvertError> {
        let (width, height) = image.dimensions();
        let mut pixmap =
            Pixmap::new(width, height).ok_or(ConvertError::EmptyImage { width, height })?;

        // tiny-skia stores premultiplied RGBA
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
            let [r, g, b, a] = src.0;
            *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
        }

        Ok(pixmap)
    }

    fn path_to_pixmap(&self, path: &Path) -> Result<Pixmap, ConvertError> {
        let image = image::open(path).map_err(|e| ConvertError::ReadPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.image_to_pixmap(&image.to_rgba8())
    }
}
