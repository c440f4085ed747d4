//! # Worker Pool Module
//!
//! Bounded execution context for service invocations.
//!
//! Invocations run on a dedicated multi-thread tokio runtime, so a slow or
//! blocking method never occupies the threads that drive sockets.
//!
//! ## Admission
//!
//! - `workers` invocations run at once (concurrency semaphore)
//! - up to `queue_capacity` more wait for a slot
//! - anything beyond that is shed immediately: [`WorkerPool::try_submit`]
//!   returns [`PoolSaturated`] and the caller answers `ServerBusy`

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NetwireError, Result};

/// Default number of queued invocations beyond the running ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration for a worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Worker threads, also the number of invocations running at once
    pub workers: usize,
    /// Invocations allowed to wait for a worker
    pub queue_capacity: usize,
    /// Thread name prefix
    pub thread_name: String,
}

impl WorkerPoolConfig {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Self::default()
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: "netwire-worker".to_string(),
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Invocations rejected because the pool was saturated
    shed_count: AtomicU64,
    /// Invocations admitted
    dispatched_count: AtomicU64,
    /// Invocations finished, including panics and cancellations
    completed_count: AtomicU64,
    /// Admitted and not yet finished
    in_flight: AtomicUsize,
}

impl WorkerPoolMetrics {
    fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Records completion when the job finishes or unwinds.
struct CompletionGuard(Arc<WorkerPoolMetrics>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.record_completion();
    }
}

/// Returned by [`WorkerPool::try_submit`] when no admission slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSaturated;

impl std::fmt::Display for PoolSaturated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("worker pool saturated")
    }
}

impl std::error::Error for PoolSaturated {}

/// Worker pool with bounded admission and load shedding
pub struct WorkerPool {
    config: WorkerPoolConfig,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    admission: Arc<Semaphore>,
    concurrency: Arc<Semaphore>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    /// Start the pool's runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let admitted = workers
            .checked_add(config.queue_capacity)
            .filter(|n| *n <= Semaphore::MAX_PERMITS && *n <= u32::MAX as usize)
            .ok_or_else(|| {
                NetwireError::Runtime(format!(
                    "queue capacity {} is too large",
                    config.queue_capacity
                ))
            })?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| NetwireError::Runtime(format!("failed to start worker pool: {}", e)))?;

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            admission: Arc::new(Semaphore::new(admitted)),
            concurrency: Arc::new(Semaphore::new(workers)),
            metrics: Arc::new(WorkerPoolMetrics::default()),
            config: WorkerPoolConfig { workers, ..config },
        })
    }

    /// Submit a job, or fail at once if the pool is saturated.
    ///
    /// The returned handle resolves to the job's output, or to a
    /// `JoinError` if the job panicked or the pool shut down first.
    pub fn try_submit<F, T>(&self, job: F) -> std::result::Result<JoinHandle<T>, PoolSaturated>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let admitted = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_shed();
                return Err(PoolSaturated);
            }
        };

        self.metrics.record_dispatch();
        let concurrency = Arc::clone(&self.concurrency);
        let guard = CompletionGuard(Arc::clone(&self.metrics));

        Ok(self.handle.spawn(async move {
            let _guard = guard;
            let _admitted = admitted;
            let _running = concurrency.acquire_owned().await.ok();
            job.await
        }))
    }

    /// Wait up to `grace` for admitted jobs, then stop the runtime.
    ///
    /// Later submissions are rejected. Jobs still running after the grace
    /// window are cancelled.
    pub async fn shutdown(&self, grace: Duration) {
        let total = self.config.workers + self.config.queue_capacity;
        // Holding every admission permit means nothing is in flight
        let drained = tokio::time::timeout(
            grace,
            self.admission.acquire_many(total as u32),
        )
        .await;

        match drained {
            Ok(Ok(permits)) => permits.forget(),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                in_flight = self.metrics.in_flight(),
                "Worker pool grace period elapsed, cancelling remaining invocations"
            ),
        }
        self.admission.close();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!("Worker pool stopped");
        }
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// True once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a Runtime inside async context panics
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_job_runs_on_worker_thread() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(2, 4)).unwrap();

        let name = pool
            .try_submit(async { std::thread::current().name().map(str::to_string) })
            .unwrap()
            .await
            .unwrap();

        assert_eq!(name.as_deref(), Some("netwire-worker"));
        assert_eq!(pool.metrics().dispatched_count(), 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_sheds() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 1)).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = pool
            .try_submit(async move {
                let _ = release_rx.await;
                1
            })
            .unwrap();
        let queued = pool.try_submit(async { 2 }).unwrap();

        assert_eq!(pool.try_submit(async { 3 }).unwrap_err(), PoolSaturated);
        assert_eq!(pool.metrics().shed_count(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap(), 1);
        assert_eq!(queued.await.unwrap(), 2);

        // Capacity is available again
        assert_eq!(pool.try_submit(async { 4 }).unwrap().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_panic_releases_slot() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 0)).unwrap();

        let result = pool
            .try_submit(async {
                panic!("handler bug");
            })
            .unwrap()
            .await;

        assert!(result.unwrap_err().is_panic());
        assert_eq!(pool.metrics().completed_count(), 1);
        assert_eq!(pool.metrics().in_flight(), 0);
        assert_eq!(pool.try_submit(async { 7 }).unwrap().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 4)).unwrap();

        let job = pool
            .try_submit(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "done"
            })
            .unwrap();

        pool.shutdown(Duration::from_secs(5)).await;

        assert_eq!(job.await.unwrap(), "done");
        assert!(pool.is_shut_down());
        assert!(pool.try_submit(async {}).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_grace_cancels_stuck_job() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 0)).unwrap();

        let job = pool
            .try_submit(std::future::pending::<()>())
            .unwrap();

        pool.shutdown(Duration::from_millis(20)).await;

        assert!(job.await.unwrap_err().is_cancelled());
    }
}
