//! Bounded worker pool for pixmap conversion.
//!
//! Conversions are CPU-bound, so they run on tokio's blocking thread pool.
//! A semaphore bounds how many run at once, independently of how many
//! upstream image fetches are in flight.
//!
//! # Usage
//!
//! ```ignore
//! use pixmapload::pool::WorkerPool;
//!
//! // Inside a tokio runtime
//! let pool = WorkerPool::new(4)?;
//! let sum = pool.run_blocking(|| (0..1000u64).sum::<u64>()).await?;
//! ```

use crate::error::PixmapError;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Permit for one conversion worker.
///
/// The worker slot is released when the permit is dropped.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded pool of blocking conversion workers.
///
/// Cloning shares the same workers, so one pool can serve several loaders.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Semaphore bounding concurrent conversions
    semaphore: Arc<Semaphore>,
    /// Maximum concurrent conversions
    workers: usize,
    /// Runtime that runs tasks and blocking work
    runtime: Handle,
}

impl WorkerPool {
    /// Creates a pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PixmapError::NoRuntime`] outside a tokio runtime and
    /// [`PixmapError::InvalidConfig`] if `workers` is 0.
    pub fn new(workers: usize) -> Result<Self, PixmapError> {
        let runtime = Handle::try_current().map_err(|e| PixmapError::NoRuntime(e.to_string()))?;
        Self::with_runtime(workers, runtime)
    }

    /// Creates a pool on an explicit runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PixmapError::InvalidConfig`] if `workers` is 0.
    pub fn with_runtime(workers: usize, runtime: Handle) -> Result<Self, PixmapError> {
        if workers == 0 {
            return Err(PixmapError::InvalidConfig(
                "workers must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
            runtime,
        })
    }

    /// Maximum number of concurrent conversions.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of idle worker slots.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free worker slot.
    ///
    /// Returns [`PixmapError::Stopped`] once the pool is closed, including
    /// for callers already waiting.
    pub async fn acquire(&self) -> Result<WorkerPermit, PixmapError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PixmapError::Stopped)?;
        Ok(WorkerPermit { _permit: permit })
    }

    /// Runs `f` on the blocking pool while holding `permit`.
    pub async fn execute<F, R>(&self, permit: WorkerPermit, f: F) -> Result<R, PixmapError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime
            .spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await
            .map_err(|e| PixmapError::TaskPanicked(e.to_string()))
    }

    /// Acquires a worker slot and runs `f` on it.
    pub async fn run_blocking<F, R>(&self, f: F) -> Result<R, PixmapError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self.acquire().await?;
        self.execute(permit, f).await
    }

    /// Spawns an async task on the pool's runtime.
    ///
    /// Tasks do not take a worker slot.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Closes the pool. Pending and future acquisitions fail.
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            self.semaphore.close();
            debug!(workers = self.workers, "Worker pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(WorkerPool::new(2), Err(PixmapError::NoRuntime(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = WorkerPool::with_runtime(0, runtime.handle().clone());
        assert!(matches!(result, Err(PixmapError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        let value = pool.run_blocking(|| 6 * 7).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available_workers(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounds_concurrent_work() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.run_blocking(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1).unwrap();
        pool.close();

        assert!(pool.is_closed());
        assert_eq!(pool.run_blocking(|| ()).await, Err(PixmapError::Stopped));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_acquirers() {
        let pool = WorkerPool::new(1).unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        pool.close();

        assert_eq!(waiter.await.unwrap(), Err(PixmapError::Stopped));
        drop(held);
    }

    #[tokio::test]
    async fn test_panicking_work_is_reported() {
        let pool = WorkerPool::new(1).unwrap();
        let result = pool.run_blocking(|| -> u32 { panic!("boom") }).await;
        assert!(matches!(result, Err(PixmapError::TaskPanicked(_))));
        // Permit released despite the panic
        assert_eq!(pool.available_workers(), 1);
    }
}
