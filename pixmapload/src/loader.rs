//! Pixmap loader facade.
//!
//! [`PixmapLoader`] is the public entry point for UI code. It turns loose
//! request arguments into an [`ImageRequest`], fetches the raw image from
//! the upstream [`ImageLoader`], and converts it on a bounded
//! [`WorkerPool`] through a shared [`PixmapConverter`].
//!
//! # Flow
//!
//! ```text
//! get_pixmap(args)
//!     │
//!     ▼
//! request_for ──► claim ──┬── Ready ─────────────────────────────► PixmapFuture
//!                         ├── Join ──► await leader ─────────────► PixmapFuture
//!                         └── Lead ──► persisted file? ──yes──► worker: path_to_pixmap
//!                                          │ no / unreadable            │
//!                                          ▼                            ▼
//!                                 get_image ──► worker ──► publish ─► PixmapFuture
//! ```
//!
//! Joiners wait asynchronously and never hold a worker slot, so heavy
//! fan-in on one key cannot starve the pool.
//!
//! # Example
//!
//! ```ignore
//! use pixmapload::{LoaderConfig, PixmapLoader, RequestArgs, SizeSlug, SkiaBackend};
//!
//! let loader = PixmapLoader::new(image_loader, SkiaBackend, LoaderConfig::default())?;
//! let pixmap = loader
//!     .get_pixmap(RequestArgs::subject("Lightning Bolt").with_size(SizeSlug::Small))
//!     .await?;
//! let placeholder = loader.get_default_pixmap(SizeSlug::Small);
//! loader.stop();
//! ```

use crate::backend::{PixmapBackend, SkiaBackend};
use crate::config::LoaderConfig;
use crate::converter::{Claim, ConversionKey, ConversionResult, Leader, PixmapConverter};
use crate::error::PixmapError;
use crate::image_loader::ImageLoader;
use crate::pool::WorkerPool;
use crate::request::{ImageRequest, RequestArgs, SizeSlug};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Converter key used by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PixmapKey {
    /// A regular image request
    Request(ImageRequest),
    /// The placeholder image for a size class
    Default(SizeSlug),
}

impl ConversionKey for PixmapKey {
    fn persisted_path(&self) -> Option<&Path> {
        match self {
            PixmapKey::Request(request) => request.persisted_path(),
            PixmapKey::Default(_) => None,
        }
    }
}

/// Asynchronous pixmap loader.
pub struct PixmapLoader<B: PixmapBackend = SkiaBackend> {
    image_loader: Arc<dyn ImageLoader>,
    converter: PixmapConverter<PixmapKey, B>,
    pool: WorkerPool,
    /// Whether `stop` closes the pool; shared pools stay open
    owns_pool: bool,
    /// Placeholder pixmaps indexed by `SizeSlug::index`
    defaults: [Arc<B::Pixmap>; 4],
    config: LoaderConfig,
    shutdown: CancellationToken,
}

impl<B: PixmapBackend> PixmapLoader<B> {
    /// Create a loader with its own worker pool on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PixmapError::NoRuntime`] outside a tokio runtime,
    /// [`PixmapError::InvalidConfig`] for zero workers, or the conversion
    /// error of a default image.
    pub fn new(
        image_loader: Arc<dyn ImageLoader>,
        backend: B,
        config: LoaderConfig,
    ) -> Result<Self, PixmapError> {
        let pool = WorkerPool::new(config.workers())?;
        Self::build(image_loader, backend, pool, true, config)
    }

    /// Create a loader on an explicit, possibly shared, worker pool.
    ///
    /// The worker count in `config` is ignored, and [`stop`](Self::stop)
    /// leaves the pool open for its other users. Default pixmaps for every
    /// size class are converted here, on the calling thread.
    pub fn with_pool(
        image_loader: Arc<dyn ImageLoader>,
        backend: B,
        pool: WorkerPool,
        config: LoaderConfig,
    ) -> Result<Self, PixmapError> {
        Self::build(image_loader, backend, pool, false, config)
    }

    fn build(
        image_loader: Arc<dyn ImageLoader>,
        backend: B,
        pool: WorkerPool,
        owns_pool: bool,
        config: LoaderConfig,
    ) -> Result<Self, PixmapError> {
        let converter = PixmapConverter::new(backend, config.memo_capacity());

        let resolve_default = |size: SizeSlug| {
            converter.resolve(PixmapKey::Default(size), || {
                Ok(image_loader.get_default_image(size))
            })
        };
        let defaults = [
            resolve_default(SizeSlug::Original)?,
            resolve_default(SizeSlug::Medium)?,
            resolve_default(SizeSlug::Small)?,
            resolve_default(SizeSlug::Thumbnail)?,
        ];

        info!(
            workers = pool.workers(),
            memo_capacity = ?config.memo_capacity(),
            image_root = ?config.image_root(),
            shared_pool = !owns_pool,
            "Pixmap loader started"
        );

        Ok(Self {
            image_loader,
            converter,
            pool,
            owns_pool,
            defaults,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn image_loader(&self) -> &Arc<dyn ImageLoader> {
        &self.image_loader
    }

    pub fn converter(&self) -> &PixmapConverter<PixmapKey, B> {
        &self.converter
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Normalize loose arguments into the request key used for caching.
    ///
    /// Saved requests get their expected persisted path when an image root
    /// is configured and the request does not already carry one.
    pub fn request_for(&self, args: impl Into<RequestArgs>) -> ImageRequest {
        let request = args.into().into_request();
        if request.persisted_path().is_some() {
            return request;
        }
        match self.config.image_root() {
            Some(root) => {
                let path = request.expected_path(root);
                request.with_persisted_path(path)
            }
            None => request,
        }
    }

    /// Request a pixmap.
    ///
    /// The returned future resolves once the pixmap is available. Work
    /// continues in the background if the future is dropped.
    ///
    /// After [`stop`](Self::stop) the future fails immediately with
    /// [`PixmapError::Stopped`].
    pub fn get_pixmap(&self, args: impl Into<RequestArgs>) -> PixmapFuture<B::Pixmap> {
        if self.is_stopped() {
            return PixmapFuture::ready(Err(PixmapError::Stopped));
        }

        let request = self.request_for(args);
        let key = PixmapKey::Request(request.clone());

        match self.converter.claim(&key) {
            Claim::Ready(pixmap) => {
                trace!(request = ?request, "Pixmap memo hit");
                PixmapFuture::ready(Ok(pixmap))
            }
            Claim::Join(joiner) => PixmapFuture::spawned(self.pool.spawn(joiner.recv())),
            Claim::Lead(leader) => PixmapFuture::spawned(self.pool.spawn(lead(
                leader,
                request,
                Arc::clone(&self.image_loader),
                self.pool.clone(),
                self.shutdown.clone(),
            ))),
        }
    }

    /// Placeholder pixmap for a size class.
    ///
    /// Never touches the image fetch path, always returns the same
    /// instance, and keeps working after [`stop`](Self::stop).
    pub fn get_default_pixmap(&self, size_slug: SizeSlug) -> Arc<B::Pixmap> {
        Arc::clone(&self.defaults[size_slug.index()])
    }

    /// Stop the loader.
    ///
    /// Stops the upstream image loader and closes the worker pool if this
    /// loader created it. Leaders still fetching or waiting for a worker
    /// slot fail their joiners with [`PixmapError::Stopped`]. Calling
    /// `stop` again has no effect.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        if self.owns_pool {
            self.pool.close();
        }
        self.image_loader.stop();
        self.converter.log_stats();
        info!("Pixmap loader stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Fetch, convert and publish as the leader for one request.
///
/// A persisted image is tried first, on a worker, and the fetch only
/// happens when it is missing or unreadable.
async fn lead<B: PixmapBackend>(
    leader: Leader<PixmapKey, B>,
    request: ImageRequest,
    image_loader: Arc<dyn ImageLoader>,
    pool: WorkerPool,
    shutdown: CancellationToken,
) -> ConversionResult<B::Pixmap> {
    let leader = if request.persisted_path().is_some() {
        let permit = match unless_stopped(&shutdown, pool.acquire()).await {
            Ok(permit) => permit,
            Err(e) => return leader.publish(Err(e)),
        };
        match pool.execute(permit, move || leader.convert_persisted()).await? {
            Ok(result) => return result,
            Err(leader) => leader,
        }
    } else {
        leader
    };

    let fetch = async {
        image_loader
            .get_image(&request)
            .await
            .map_err(PixmapError::from)
    };
    let raw = match unless_stopped(&shutdown, fetch).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!(request = ?request, error = %e, "Image fetch failed");
            return leader.publish(Err(e));
        }
    };

    let permit = match unless_stopped(&shutdown, pool.acquire()).await {
        Ok(permit) => permit,
        Err(e) => return leader.publish(Err(e)),
    };

    pool.execute(permit, move || leader.convert_image(&raw))
        .await
        .and_then(|result| result)
}

/// Resolve `future`, or fail with [`PixmapError::Stopped`] once the loader
/// stops.
async fn unless_stopped<T>(
    shutdown: &CancellationToken,
    future: impl Future<Output = Result<T, PixmapError>>,
) -> Result<T, PixmapError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(PixmapError::Stopped),
        result = future => result,
    }
}

/// Future resolving to a converted pixmap.
pub struct PixmapFuture<P> {
    state: FutureState<P>,
}

enum FutureState<P> {
    Ready(Option<ConversionResult<P>>),
    Pending(JoinHandle<ConversionResult<P>>),
}

impl<P> PixmapFuture<P> {
    fn ready(result: ConversionResult<P>) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }

    fn spawned(handle: JoinHandle<ConversionResult<P>>) -> Self {
        Self {
            state: FutureState::Pending(handle),
        }
    }

    /// Returns true if awaiting would not wait.
    pub fn is_ready(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => true,
            FutureState::Pending(handle) => handle.is_finished(),
        }
    }

    /// Block the current thread until the pixmap is available.
    ///
    /// For non-async callers such as a UI thread. Must not be called from
    /// inside an async task.
    pub fn blocking_wait(self) -> ConversionResult<P> {
        futures::executor::block_on(self)
    }
}

impl<P> Future for PixmapFuture<P> {
    type Output = ConversionResult<P>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Ready(result) => {
                Poll::Ready(result.take().expect("PixmapFuture polled after completion"))
            }
            FutureState::Pending(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| Err(PixmapError::TaskPanicked(e.to_string())))
            }),
        }
    }
}
