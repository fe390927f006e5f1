//! Image request keys.
//!
//! An [`ImageRequest`] is the normalized identity of "what to load and how".
//! It is the key used for memoization and request coalescing, so two
//! requests compare equal exactly when every normalized field matches.
//!
//! Callers usually build requests from loose arguments via [`RequestArgs`]:
//!
//! ```
//! use pixmapload::request::{RequestArgs, SizeSlug};
//!
//! let request = RequestArgs::subject("Lightning Bolt")
//!     .with_size(SizeSlug::Small)
//!     .with_crop(true)
//!     .into_request();
//!
//! assert_eq!(request.size_slug(), SizeSlug::Small);
//! assert!(request.crop());
//! ```

use crate::converter::ConversionKey;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Size class of a requested image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SizeSlug {
    /// Full resolution
    #[default]
    Original,
    /// Half resolution
    Medium,
    /// Quarter resolution
    Small,
    /// Eighth resolution
    Thumbnail,
}

impl SizeSlug {
    /// Every size class, largest first.
    pub const ALL: [SizeSlug; 4] = [
        SizeSlug::Original,
        SizeSlug::Medium,
        SizeSlug::Small,
        SizeSlug::Thumbnail,
    ];

    /// Position of this size class in [`SizeSlug::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Short code used in persisted paths and configuration.
    pub fn code(&self) -> &'static str {
        match self {
            SizeSlug::Original => "original",
            SizeSlug::Medium => "medium",
            SizeSlug::Small => "small",
            SizeSlug::Thumbnail => "thumbnail",
        }
    }

    /// Scale factor relative to the original image.
    pub fn scale(&self) -> f32 {
        match self {
            SizeSlug::Original => 1.0,
            SizeSlug::Medium => 0.5,
            SizeSlug::Small => 0.25,
            SizeSlug::Thumbnail => 0.125,
        }
    }
}

impl fmt::Display for SizeSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SizeSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        SizeSlug::ALL
            .into_iter()
            .find(|slug| slug.code() == s)
            .ok_or_else(|| format!("unknown size slug '{}'", s))
    }
}

/// Kind of thing being pictured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubjectKind {
    /// A card printing
    #[default]
    Printing,
    /// Any other imageable object
    Imageable,
}

impl SubjectKind {
    fn code(&self) -> &'static str {
        match self {
            SubjectKind::Printing => "printing",
            SubjectKind::Imageable => "imageable",
        }
    }
}

/// Identity of the pictured subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    /// Subject kind
    pub kind: SubjectKind,
    /// Stable identifier within the kind
    pub id: String,
}

impl Subject {
    /// Create a subject of the given kind.
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Create a printing subject.
    pub fn printing(id: impl Into<String>) -> Self {
        Self::new(SubjectKind::Printing, id)
    }
}

/// Normalized, immutable request key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    subject: Option<Subject>,
    picture_name: Option<String>,
    back: bool,
    crop: bool,
    size_slug: SizeSlug,
    save: bool,
    cache_only: bool,
    persisted_path: Option<PathBuf>,
}

impl ImageRequest {
    /// Create a request for `subject` with default options.
    pub fn new(subject: Option<Subject>) -> Self {
        Self {
            subject,
            picture_name: None,
            back: false,
            crop: false,
            size_slug: SizeSlug::Original,
            save: true,
            cache_only: false,
            persisted_path: None,
        }
    }

    pub fn with_picture_name(mut self, name: Option<String>) -> Self {
        self.picture_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }

    pub fn with_back(mut self, back: bool) -> Self {
        self.back = back;
        self
    }

    pub fn with_crop(mut self, crop: bool) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_size(mut self, size_slug: SizeSlug) -> Self {
        self.size_slug = size_slug;
        self
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn with_cache_only(mut self, cache_only: bool) -> Self {
        self.cache_only = cache_only;
        self
    }

    /// Attach the path where the loader persists this image.
    pub fn with_persisted_path(mut self, path: Option<PathBuf>) -> Self {
        self.persisted_path = path;
        self
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn picture_name(&self) -> Option<&str> {
        self.picture_name.as_deref()
    }

    pub fn back(&self) -> bool {
        self.back
    }

    pub fn crop(&self) -> bool {
        self.crop
    }

    pub fn size_slug(&self) -> SizeSlug {
        self.size_slug
    }

    pub fn save(&self) -> bool {
        self.save
    }

    pub fn cache_only(&self) -> bool {
        self.cache_only
    }

    pub fn persisted_path(&self) -> Option<&Path> {
        self.persisted_path.as_deref()
    }

    /// Path under `root` where a saved image for this request lives.
    ///
    /// Layout: `<root>/<kind>/<id>[-<picture name>][-back][-crop]/<size>.png`.
    /// Returns `None` for unsaved requests and requests without a subject.
    pub fn expected_path(&self, root: &Path) -> Option<PathBuf> {
        if !self.save {
            return None;
        }
        let subject = self.subject.as_ref()?;

        let mut stem = sanitize(&subject.id);
        if let Some(name) = &self.picture_name {
            stem.push('-');
            stem.push_str(&sanitize(name));
        }
        if self.back {
            stem.push_str("-back");
        }
        if self.crop {
            stem.push_str("-crop");
        }

        Some(
            root.join(subject.kind.code())
                .join(stem)
                .join(format!("{}.png", self.size_slug.code())),
        )
    }
}

impl ConversionKey for ImageRequest {
    fn persisted_path(&self) -> Option<&Path> {
        self.persisted_path.as_deref()
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// Loosely typed request arguments.
///
/// Mirrors the keyword arguments a UI layer passes around. A pre-built
/// [`ImageRequest`] overrides every other field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestArgs {
    pub subject: Option<String>,
    pub subject_kind: SubjectKind,
    pub picture_name: Option<String>,
    pub back: bool,
    pub crop: bool,
    pub size_slug: SizeSlug,
    pub save: bool,
    pub cache_only: bool,
    pub image_request: Option<ImageRequest>,
}

impl Default for RequestArgs {
    fn default() -> Self {
        Self {
            subject: None,
            subject_kind: SubjectKind::Printing,
            picture_name: None,
            back: false,
            crop: false,
            size_slug: SizeSlug::Original,
            save: true,
            cache_only: false,
            image_request: None,
        }
    }
}

impl RequestArgs {
    /// Arguments for a printing identified by `id`.
    pub fn subject(id: impl Into<String>) -> Self {
        Self {
            subject: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: SubjectKind) -> Self {
        self.subject_kind = kind;
        self
    }

    pub fn with_picture_name(mut self, name: impl Into<String>) -> Self {
        self.picture_name = Some(name.into());
        self
    }

    pub fn with_back(mut self, back: bool) -> Self {
        self.back = back;
        self
    }

    pub fn with_crop(mut self, crop: bool) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_size(mut self, size_slug: SizeSlug) -> Self {
        self.size_slug = size_slug;
        self
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn with_cache_only(mut self, cache_only: bool) -> Self {
        self.cache_only = cache_only;
        self
    }

    /// Normalize into exactly one request key.
    pub fn into_request(self) -> ImageRequest {
        if let Some(request) = self.image_request {
            return request;
        }

        let subject = self
            .subject
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(|id| Subject::new(self.subject_kind, id));

        ImageRequest::new(subject)
            .with_picture_name(self.picture_name)
            .with_back(self.back)
            .with_crop(self.crop)
            .with_size(self.size_slug)
            .with_save(self.save)
            .with_cache_only(self.cache_only)
    }
}

impl From<ImageRequest> for RequestArgs {
    fn from(request: ImageRequest) -> Self {
        Self {
            image_request: Some(request),
            ..Self::default()
        }
    }
}

impl From<Subject> for RequestArgs {
    fn from(subject: Subject) -> Self {
        Self {
            subject: Some(subject.id),
            subject_kind: subject.kind,
            ..Self::default()
        }
    }
}

impl From<&str> for RequestArgs {
    fn from(id: &str) -> Self {
        Self::subject(id)
    }
}
