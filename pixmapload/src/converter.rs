//! Pixmap conversion with memoization and request coalescing.
//!
//! [`PixmapConverter`] guarantees that a raw image is converted to a pixmap
//! at most once per key, no matter how many callers ask for it at the same
//! time.
//!
//! # Architecture
//!
//! ```text
//! Caller A ─┐
//!           │                                    Backend
//! Caller B ─┼──► claim(key) ──► Lead ──convert──► image_to_pixmap
//!           │        │                                │
//! Caller C ─┘        ├──► Join (subscribe)            │
//!                    │        ▲                       │
//!                    └──► Ready (memo hit)            │
//!                             └───── publish ◄────────┘
//! ```
//!
//! # Implementation
//!
//! One mutex guards two tables:
//!
//! - `resolved`: an [`LruCache`] of memoized pixmaps
//! - `in_flight`: the broadcast sender of every key a leader is converting;
//!   joiners subscribe while still holding the lock
//!
//! A key in neither table is absent and the next claimant becomes the
//! leader. Publishing moves the key from `in_flight` into `resolved` (or
//! just drops it on failure) and broadcasts the result inside the same
//! critical section, so a joiner can never miss the wakeup or observe a
//! missing memo entry.
//! A [`Leader`] dropped without publishing releases its joiners with
//! [`ConvertError::Abandoned`].

use crate::backend::PixmapBackend;
use crate::config::DEFAULT_MEMO_CAPACITY;
use crate::error::{ConvertError, PixmapError};
use crate::image_loader::RawImage;
use crate::stats::ConverterStats;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Result shared between a leader and its joiners.
pub type ConversionResult<P> = Result<Arc<P>, PixmapError>;

/// Key usable for memoization and coalescing.
pub trait ConversionKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {
    /// Path where the upstream loader persisted this image, if any.
    ///
    /// When the file exists the pixmap is built from it directly instead of
    /// converting the in-memory raw image.
    fn persisted_path(&self) -> Option<&Path> {
        None
    }
}

/// Memo table capacity.
///
/// The eviction unit is one resolved conversion, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoCapacity {
    /// Never evict
    Unbounded,
    /// Evict the least recently used conversion beyond this many entries
    Bounded(NonZeroUsize),
}

impl MemoCapacity {
    /// Bounded capacity, or `None` for zero.
    pub fn bounded(entries: usize) -> Option<Self> {
        NonZeroUsize::new(entries).map(Self::Bounded)
    }

    /// Maximum number of memoized conversions, `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n.get()),
        }
    }
}

impl Default for MemoCapacity {
    fn default() -> Self {
        NonZeroUsize::new(DEFAULT_MEMO_CAPACITY).map_or(Self::Unbounded, Self::Bounded)
    }
}

struct State<K: ConversionKey, P> {
    resolved: LruCache<K, Arc<P>>,
    in_flight: HashMap<K, broadcast::Sender<ConversionResult<P>>>,
    stats: ConverterStats,
}

/// Where a published result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Converted from an in-memory raw image
    Image,
    /// Built from the persisted file
    Persisted,
    /// Failed before conversion, e.g. the fetch
    Upstream,
}

struct Inner<K: ConversionKey, B: PixmapBackend> {
    backend: B,
    capacity: MemoCapacity,
    state: Mutex<State<K, B::Pixmap>>,
}

/// Memoizing, coalescing pixmap converter.
///
/// Cloning is cheap and every clone shares the same memo table.
pub struct PixmapConverter<K: ConversionKey, B: PixmapBackend> {
    inner: Arc<Inner<K, B>>,
}

impl<K: ConversionKey, B: PixmapBackend> Clone for PixmapConverter<K, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: ConversionKey, B: PixmapBackend> PixmapConverter<K, B> {
    /// Create a converter around `backend`.
    pub fn new(backend: B, capacity: MemoCapacity) -> Self {
        let resolved = match capacity {
            MemoCapacity::Unbounded => LruCache::unbounded(),
            MemoCapacity::Bounded(limit) => LruCache::new(limit),
        };

        Self {
            inner: Arc::new(Inner {
                backend,
                capacity,
                state: Mutex::new(State {
                    resolved,
                    in_flight: HashMap::new(),
                    stats: ConverterStats::default(),
                }),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn capacity(&self) -> MemoCapacity {
        self.inner.capacity
    }

    /// Claim `key`.
    ///
    /// Returns the memoized pixmap, a [`Joiner`] for the in-flight
    /// conversion, or a [`Leader`] that must produce the result. The
    /// check and the registration happen under one lock.
    pub fn claim(&self, key: &K) -> Claim<K, B> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        state.stats.total_requests += 1;

        if let Some(pixmap) = state.resolved.get(key) {
            state.stats.hits += 1;
            return Claim::Ready(Arc::clone(pixmap));
        }

        if let Some(tx) = state.in_flight.get(key) {
            let rx = tx.subscribe();
            state.stats.coalesced += 1;
            debug!(
                key = ?key,
                waiters = tx.receiver_count(),
                "Joining in-flight conversion"
            );
            return Claim::Join(Joiner { rx });
        }

        // One message is ever sent per channel
        let (tx, _rx) = broadcast::channel(1);
        state.in_flight.insert(key.clone(), tx);
        state.stats.leaders += 1;
        debug!(
            key = ?key,
            in_flight = state.in_flight.len(),
            "Starting conversion"
        );
        Claim::Lead(Leader {
            converter: self.clone(),
            key: key.clone(),
            published: false,
        })
    }

    /// Resolve `key` to a pixmap, blocking the calling thread if another
    /// caller is already converting it.
    ///
    /// `supplier` is only invoked when this call leads the conversion and
    /// no usable persisted image exists for the key.
    ///
    /// Joining blocks the thread, so call this from a plain thread or a
    /// blocking task, never from inside an async task.
    pub fn resolve<F>(&self, key: K, supplier: F) -> ConversionResult<B::Pixmap>
    where
        F: FnOnce() -> Result<RawImage, PixmapError>,
    {
        match self.claim(&key) {
            Claim::Ready(pixmap) => Ok(pixmap),
            Claim::Join(joiner) => joiner.wait(),
            Claim::Lead(leader) => leader.convert(supplier),
        }
    }

    /// Memoized pixmap for `key`, without claiming it.
    ///
    /// Counts as a use for eviction purposes.
    pub fn get(&self, key: &K) -> Option<Arc<B::Pixmap>> {
        self.inner.state.lock().resolved.get(key).cloned()
    }

    /// Returns true if `key` has a memoized pixmap.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.lock().resolved.contains(key)
    }

    /// Number of memoized pixmaps.
    pub fn len(&self) -> usize {
        self.inner.state.lock().resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of conversions currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Snapshot of the converter statistics.
    pub fn stats(&self) -> ConverterStats {
        self.inner.state.lock().stats.clone()
    }

    /// Logs current statistics.
    pub fn log_stats(&self) {
        let (stats, memoized, in_flight) = {
            let state = self.inner.state.lock();
            (
                state.stats.clone(),
                state.resolved.len(),
                state.in_flight.len(),
            )
        };

        info!(
            total_requests = stats.total_requests,
            hits = stats.hits,
            coalesced = stats.coalesced,
            conversions = stats.conversions,
            failures = stats.failures,
            upstream_failures = stats.upstream_failures,
            evictions = stats.evictions,
            memoized,
            in_flight,
            hit_ratio = format!("{:.1}%", stats.hit_ratio() * 100.0),
            "Pixmap converter statistics"
        );
    }

    /// Publish a leader's result and wake every joiner.
    fn finish(&self, key: &K, result: &ConversionResult<B::Pixmap>, source: Source) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(tx) = state.in_flight.remove(key) else {
            return;
        };

        match result {
            Ok(pixmap) => {
                state.stats.conversions += 1;
                if source == Source::Persisted {
                    state.stats.direct_path_conversions += 1;
                }
                if let Some((evicted, _)) = state.resolved.push(key.clone(), Arc::clone(pixmap)) {
                    if evicted != *key {
                        state.stats.evictions += 1;
                        debug!(key = ?evicted, "Evicted memoized pixmap");
                    }
                }
            }
            Err(e) if source == Source::Upstream => {
                state.stats.upstream_failures += 1;
                debug!(key = ?key, error = %e, "Publishing upstream failure");
            }
            Err(e) => {
                state.stats.failures += 1;
                warn!(key = ?key, error = %e, "Pixmap conversion failed");
            }
        }

        // Receivers may have been dropped
        let waiters = tx.receiver_count();
        let _ = tx.send(result.clone());

        if waiters > 0 {
            debug!(key = ?key, waiters, "Broadcast conversion result to joiners");
        }
    }
}

/// Outcome of [`PixmapConverter::claim`].
pub enum Claim<K: ConversionKey, B: PixmapBackend> {
    /// Memo hit
    Ready(Arc<B::Pixmap>),
    /// Another caller is converting; wait on the joiner
    Join(Joiner<B::Pixmap>),
    /// This caller must produce the result
    Lead(Leader<K, B>),
}

impl<K: ConversionKey, B: PixmapBackend> Claim<K, B> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_join(&self) -> bool {
        matches!(self, Self::Join(_))
    }

    pub fn is_lead(&self) -> bool {
        matches!(self, Self::Lead(_))
    }
}

/// Handle for waiting on another caller's conversion.
pub struct Joiner<P> {
    rx: broadcast::Receiver<ConversionResult<P>>,
}

impl<P> Joiner<P> {
    /// Block the current thread until the leader publishes.
    pub fn wait(mut self) -> ConversionResult<P> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(ConvertError::Abandoned.into()))
    }

    /// Wait asynchronously until the leader publishes.
    pub async fn recv(mut self) -> ConversionResult<P> {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|_| Err(ConvertError::Abandoned.into()))
    }
}

/// Exclusive right to convert one key.
///
/// Must end in one of the converting or publishing methods. Dropping it
/// earlier publishes [`ConvertError::Abandoned`].
pub struct Leader<K: ConversionKey, B: PixmapBackend> {
    converter: PixmapConverter<K, B>,
    key: K,
    published: bool,
}

impl<K: ConversionKey, B: PixmapBackend> Leader<K, B> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Convert and publish.
    ///
    /// Builds the pixmap from the key's persisted file when it is readable,
    /// otherwise converts the image returned by `supplier`.
    pub fn convert<F>(self, supplier: F) -> ConversionResult<B::Pixmap>
    where
        F: FnOnce() -> Result<RawImage, PixmapError>,
    {
        match self.convert_persisted() {
            Ok(result) => result,
            Err(leader) => match supplier() {
                Ok(raw) => leader.convert_image(&raw),
                Err(e) => leader.complete(Err(e), Source::Upstream),
            },
        }
    }

    /// Build the pixmap from the key's persisted file and publish it.
    ///
    /// Hands the leader back unpublished when the key has no persisted
    /// file or the file cannot be read, so the caller can fall back to the
    /// raw image. Touches the filesystem; run it on a blocking thread.
    pub fn convert_persisted(self) -> Result<ConversionResult<B::Pixmap>, Self> {
        let path = self
            .key
            .persisted_path()
            .filter(|path| path.exists())
            .map(Path::to_path_buf);
        let Some(path) = path else {
            return Err(self);
        };

        match self.converter.backend().path_to_pixmap(&path) {
            Ok(pixmap) => {
                debug!(key = ?self.key, path = %path.display(), "Built pixmap from persisted image");
                Ok(self.complete(Ok(Arc::new(pixmap)), Source::Persisted))
            }
            Err(e) => {
                debug!(key = ?self.key, error = %e, "Persisted image unusable, falling back");
                Err(self)
            }
        }
    }

    /// Convert an in-memory image and publish the result.
    pub fn convert_image(self, raw: &RawImage) -> ConversionResult<B::Pixmap> {
        let result = self
            .converter
            .backend()
            .image_to_pixmap(raw)
            .map(Arc::new)
            .map_err(PixmapError::from);
        self.complete(result, Source::Image)
    }

    /// Publish a failure produced before conversion, e.g. by the fetch.
    pub fn publish(self, result: ConversionResult<B::Pixmap>) -> ConversionResult<B::Pixmap> {
        self.complete(result, Source::Upstream)
    }

    fn complete(
        mut self,
        result: ConversionResult<B::Pixmap>,
        source: Source,
    ) -> ConversionResult<B::Pixmap> {
        self.published = true;
        self.converter.finish(&self.key, &result, source);
        result
    }
}

impl<K: ConversionKey, B: PixmapBackend> Drop for Leader<K, B> {
    fn drop(&mut self) {
        if !self.published {
            self.published = true;
            self.converter
                .finish(&self.key, &Err(ConvertError::Abandoned.into()), Source::Image);
        }
    }
}
