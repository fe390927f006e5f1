//! Integration tests for the pixmap loader.
//!
//! These tests drive the public facade end to end:
//! - Request coalescing (one fetch, one conversion per key)
//! - Memoization and shared pixmap instances
//! - Failure propagation and retry
//! - Default pixmaps
//! - Conversion straight from persisted images
//! - Stop behaviour

use image::{Rgba, RgbaImage};
use pixmapload::{
    ConvertError, ImageFuture, ImageLoader, ImageRequest, LoadError, LoaderConfig, MemoCapacity,
    PixmapBackend, PixmapError, PixmapLoader, RawImage, RequestArgs, SizeSlug, SkiaBackend,
    WorkerPool,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::Pixmap;

// =============================================================================
// Test Helpers
// =============================================================================

/// Image loader that counts fetches and can be told to fail.
struct MockImageLoader {
    fetches: AtomicUsize,
    default_images: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
    stopped: AtomicBool,
}

impl MockImageLoader {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            default_images: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
            fail: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ImageLoader for MockImageLoader {
    fn get_image(&self, request: &ImageRequest) -> ImageFuture {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let fail = self.fail.load(Ordering::SeqCst);
        let side = (64.0 * request.size_slug().scale()) as u32;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                Err(LoadError::Fetch("connection reset".to_string()))
            } else {
                Ok(RgbaImage::from_pixel(side, side, Rgba([200, 100, 50, 255])))
            }
        })
    }

    fn get_default_image(&self, size_slug: SizeSlug) -> RawImage {
        self.default_images.fetch_add(1, Ordering::SeqCst);
        let side = (32.0 * size_slug.scale()) as u32;
        RgbaImage::from_pixel(side, side, Rgba([128, 128, 128, 255]))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Counters shared between a test and its spy backend.
#[derive(Default)]
struct BackendCounters {
    image_conversions: AtomicUsize,
    path_conversions: AtomicUsize,
    fail: AtomicBool,
}

/// Skia backend wrapper that counts conversions.
struct SpyBackend {
    inner: SkiaBackend,
    counters: Arc<BackendCounters>,
}

impl SpyBackend {
    fn new() -> (Self, Arc<BackendCounters>) {
        let counters = Arc::new(BackendCounters::default());
        let backend = Self {
            inner: SkiaBackend,
            counters: Arc::clone(&counters),
        };
        (backend, counters)
    }
}

impl PixmapBackend for SpyBackend {
    type Pixmap = Pixmap;

    fn image_to_pixmap(&self, image: &RawImage) -> Result<Pixmap, ConvertError> {
        self.counters.image_conversions.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which other requests can join
        std::thread::sleep(Duration::from_millis(10));
        if self.counters.fail.load(Ordering::SeqCst) {
            return Err(ConvertError::Backend("out of video memory".to_string()));
        }
        self.inner.image_to_pixmap(image)
    }

    fn path_to_pixmap(&self, path: &Path) -> Result<Pixmap, ConvertError> {
        self.counters.path_conversions.fetch_add(1, Ordering::SeqCst);
        self.inner.path_to_pixmap(path)
    }
}

fn image_conversions(counters: &BackendCounters) -> usize {
    counters.image_conversions.load(Ordering::SeqCst)
}

/// Loader with a spy backend. Default pixmap conversions are already counted.
fn spy_loader(
    image_loader: Arc<MockImageLoader>,
    config: LoaderConfig,
) -> (PixmapLoader<SpyBackend>, Arc<BackendCounters>) {
    let (backend, counters) = SpyBackend::new();
    let loader = PixmapLoader::new(image_loader, backend, config).unwrap();
    (loader, counters)
}

// =============================================================================
// Coalescing and Memoization
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_conversion() {
    let image_loader = MockImageLoader::new(50);
    let (loader, counters) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    let baseline = image_conversions(&counters);
    let before = loader.converter().stats();

    let futures: Vec<_> = (0..16).map(|_| loader.get_pixmap("Bolt")).collect();
    let pixmaps = futures::future::join_all(futures).await;

    let first = pixmaps[0].as_ref().unwrap();
    for pixmap in &pixmaps {
        assert!(Arc::ptr_eq(first, pixmap.as_ref().unwrap()));
    }
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(image_conversions(&counters) - baseline, 1);

    let stats = loader.converter().stats();
    assert_eq!(stats.leaders - before.leaders, 1);
    assert_eq!(stats.coalesced - before.coalesced, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memo_hit_does_not_fetch_again() {
    let image_loader = MockImageLoader::new(0);
    let (loader, counters) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    let baseline = image_conversions(&counters);

    let first = loader.get_pixmap("Bolt").await.unwrap();
    let second = loader.get_pixmap("Bolt").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(image_conversions(&counters) - baseline, 1);
    assert_eq!(loader.converter().stats().hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_requests_are_distinct_pixmaps() {
    let image_loader = MockImageLoader::new(0);
    let (loader, _) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());

    let original = loader.get_pixmap("Bolt").await.unwrap();
    let small = loader
        .get_pixmap(RequestArgs::subject("Bolt").with_size(SizeSlug::Small))
        .await
        .unwrap();

    assert_eq!(original.width(), 64);
    assert_eq!(small.width(), 16);
    assert_eq!(image_loader.fetches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_memo_evicts_and_refetches() {
    let image_loader = MockImageLoader::new(0);
    let capacity = MemoCapacity::bounded(1).unwrap();
    let (loader, _) = spy_loader(
        Arc::clone(&image_loader),
        LoaderConfig::new().with_memo_capacity(capacity),
    );

    loader.get_pixmap("Bolt").await.unwrap();
    loader.get_pixmap("Shock").await.unwrap();
    loader.get_pixmap("Bolt").await.unwrap();

    assert_eq!(image_loader.fetches(), 3);
    assert_eq!(loader.converter().len(), 1);

    // Default pixmaps stay resident in the loader even when evicted
    let placeholder = loader.get_default_pixmap(SizeSlug::Original);
    assert_eq!(placeholder.width(), 32);
}

#[tokio::test(start_paused = true)]
async fn test_two_callers_wait_for_one_fetch() {
    let image_loader = MockImageLoader::new(50);
    let (loader, counters) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    let baseline = image_conversions(&counters);

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(loader.get_pixmap("Bolt"), loader.get_pixmap("Bolt"));
    let elapsed = start.elapsed();

    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(image_conversions(&counters) - baseline, 1);
    assert!(elapsed < Duration::from_millis(60), "took {:?}", elapsed);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_failure_reaches_all_callers_then_retries() {
    let image_loader = MockImageLoader::new(30);
    let (loader, _) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    image_loader.set_fail(true);

    let (a, b) = tokio::join!(loader.get_pixmap("Bolt"), loader.get_pixmap("Bolt"));
    let expected = PixmapError::Load(LoadError::Fetch("connection reset".to_string()));
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);
    assert_eq!(image_loader.fetches(), 1);
    assert!(!loader.converter().contains(&pixmapload::PixmapKey::Request(
        loader.request_for("Bolt")
    )));

    image_loader.set_fail(false);
    let pixmap = loader.get_pixmap("Bolt").await.unwrap();
    assert_eq!(pixmap.width(), 64);
    assert_eq!(image_loader.fetches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conversion_failure_reaches_joiners_then_retries() {
    let image_loader = MockImageLoader::new(30);
    let (loader, counters) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    counters.fail.store(true, Ordering::SeqCst);

    let futures: Vec<_> = (0..4).map(|_| loader.get_pixmap("Bolt")).collect();
    let results = futures::future::join_all(futures).await;

    for result in results {
        assert_eq!(
            result.unwrap_err(),
            PixmapError::Convert(ConvertError::Backend("out of video memory".to_string()))
        );
    }
    assert_eq!(loader.converter().stats().failures, 1);
    assert_eq!(loader.converter().in_flight_count(), 0);

    counters.fail.store(false, Ordering::SeqCst);
    assert!(loader.get_pixmap("Bolt").await.is_ok());
    assert_eq!(image_loader.fetches(), 2);
}

// =============================================================================
// Default Pixmaps
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_pixmap_is_resident() {
    let image_loader = MockImageLoader::new(0);
    let (loader, counters) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());
    let conversions = image_conversions(&counters);

    let a = loader.get_default_pixmap(SizeSlug::Thumbnail);
    let b = loader.get_default_pixmap(SizeSlug::Thumbnail);

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.width(), 4);
    assert_eq!(image_loader.fetches(), 0);
    assert_eq!(
        image_loader.default_images.load(Ordering::SeqCst),
        SizeSlug::ALL.len()
    );
    assert_eq!(image_conversions(&counters), conversions);
}

// =============================================================================
// Persisted Images
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persisted_image_skips_fetch_and_image_conversion() {
    let root = tempfile::tempdir().unwrap();
    let image_loader = MockImageLoader::new(0);
    let (loader, counters) = spy_loader(
        Arc::clone(&image_loader),
        LoaderConfig::new().with_image_root(root.path()),
    );
    let baseline = image_conversions(&counters);

    let request = loader.request_for(RequestArgs::subject("Bolt").with_size(SizeSlug::Medium));
    let path = request.persisted_path().unwrap().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_pixel(5, 7, Rgba([1, 2, 3, 255]))
        .save(&path)
        .unwrap();

    let pixmap = loader.get_pixmap(request).await.unwrap();

    assert_eq!((pixmap.width(), pixmap.height()), (5, 7));
    assert_eq!(image_loader.fetches(), 0);
    assert_eq!(image_conversions(&counters), baseline);
    assert_eq!(counters.path_conversions.load(Ordering::SeqCst), 1);
    assert_eq!(loader.converter().stats().direct_path_conversions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_persisted_image_falls_back_to_fetch() {
    let root = tempfile::tempdir().unwrap();
    let image_loader = MockImageLoader::new(0);
    let (loader, counters) = spy_loader(
        Arc::clone(&image_loader),
        LoaderConfig::new().with_image_root(root.path()),
    );

    let pixmap = loader.get_pixmap("Bolt").await.unwrap();

    assert_eq!(pixmap.width(), 64);
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(counters.path_conversions.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreadable_persisted_image_falls_back_to_fetch() {
    let root = tempfile::tempdir().unwrap();
    let image_loader = MockImageLoader::new(0);
    let (loader, counters) = spy_loader(
        Arc::clone(&image_loader),
        LoaderConfig::new().with_image_root(root.path()),
    );

    let request = loader.request_for("Bolt");
    let path = request.persisted_path().unwrap().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"half-written download").unwrap();

    let pixmap = loader.get_pixmap(request).await.unwrap();

    assert_eq!(pixmap.width(), 64);
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(counters.path_conversions.load(Ordering::SeqCst), 1);
    assert_eq!(loader.converter().stats().direct_path_conversions, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persisted_image_removed_while_queued_falls_back_to_fetch() {
    let root = tempfile::tempdir().unwrap();
    let image_loader = MockImageLoader::new(0);
    let pool = WorkerPool::new(1).unwrap();
    let (backend, counters) = SpyBackend::new();
    let loader = PixmapLoader::with_pool(
        Arc::clone(&image_loader) as Arc<dyn ImageLoader>,
        backend,
        pool.clone(),
        LoaderConfig::new().with_image_root(root.path()),
    )
    .unwrap();

    let request = loader.request_for("Bolt");
    let path = request.persisted_path().unwrap().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_pixel(5, 7, Rgba([1, 2, 3, 255]))
        .save(&path)
        .unwrap();

    // Occupy the only worker, then remove the file while the leader queues
    let held = pool.acquire().await.unwrap();
    let pending = loader.get_pixmap(request);
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::remove_file(&path).unwrap();
    drop(held);

    let pixmap = pending.await.unwrap();

    assert_eq!(pixmap.width(), 64);
    assert_eq!(image_loader.fetches(), 1);
    assert_eq!(counters.path_conversions.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Stop
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_rejects_new_requests_but_keeps_defaults() {
    let image_loader = MockImageLoader::new(0);
    let (loader, _) = spy_loader(Arc::clone(&image_loader), LoaderConfig::default());

    loader.stop();

    assert!(image_loader.stopped.load(Ordering::SeqCst));
    assert_eq!(
        loader.get_pixmap("Bolt").await.unwrap_err(),
        PixmapError::Stopped
    );
    assert_eq!(image_loader.fetches(), 0);
    assert_eq!(loader.get_default_pixmap(SizeSlug::Small).width(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_fails_requests_waiting_for_a_worker() {
    let image_loader = MockImageLoader::new(0);
    let pool = WorkerPool::new(1).unwrap();
    let (backend, _) = SpyBackend::new();
    let loader = PixmapLoader::with_pool(
        Arc::clone(&image_loader) as Arc<dyn ImageLoader>,
        backend,
        pool.clone(),
        LoaderConfig::default(),
    )
    .unwrap();

    // Occupy the only worker so the leader queues
    let held = pool.acquire().await.unwrap();
    let leader = loader.get_pixmap("Bolt");
    let joiner = loader.get_pixmap("Bolt");
    tokio::time::sleep(Duration::from_millis(20)).await;

    loader.stop();

    assert_eq!(leader.await.unwrap_err(), PixmapError::Stopped);
    assert_eq!(joiner.await.unwrap_err(), PixmapError::Stopped);
    assert_eq!(loader.converter().in_flight_count(), 0);
    drop(held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_does_not_affect_loaders_sharing_the_pool() {
    let pool = WorkerPool::new(2).unwrap();
    let shared = |image_loader: &Arc<MockImageLoader>| {
        let (backend, _) = SpyBackend::new();
        PixmapLoader::with_pool(
            Arc::clone(image_loader) as Arc<dyn ImageLoader>,
            backend,
            pool.clone(),
            LoaderConfig::default(),
        )
        .unwrap()
    };
    let first_images = MockImageLoader::new(0);
    let second_images = MockImageLoader::new(0);
    let first = shared(&first_images);
    let second = shared(&second_images);

    first.stop();

    assert!(first_images.stopped.load(Ordering::SeqCst));
    assert!(!second_images.stopped.load(Ordering::SeqCst));
    assert!(!pool.is_closed());
    assert!(!second.is_stopped());
    assert_eq!(second.get_pixmap("Bolt").await.unwrap().width(), 64);
    assert_eq!(
        first.get_pixmap("Bolt").await.unwrap_err(),
        PixmapError::Stopped
    );
}
