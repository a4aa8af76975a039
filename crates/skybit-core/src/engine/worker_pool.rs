//! Bounded worker pool serving dispatched runs.
//!
//! A fixed number of workers pull jobs from a shared queue, so at most
//! `worker_count` runs execute at once no matter how many tasks fire.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    /// Number of workers, i.e. the maximum number of concurrent runs.
    pub worker_count: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { worker_count: 20 }
    }
}

/// Returned by [`WorkerPool::submit`] once the pool is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolClosed;

/// Worker pool.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            handles: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start all workers. Calling it again is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        let worker_count = self.config.worker_count.max(1);
        info!(count = worker_count, "Starting worker pool");
        for worker_id in 0..worker_count {
            let receiver = self.receiver.clone();
            let active = self.active.clone();
            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, active).await;
            }));
        }
    }

    /// Queue a job. Jobs queued before [`WorkerPool::start`] run once the
    /// workers are up.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PoolClosed)?;
        sender.send(Box::pin(job)).map_err(|_| PoolClosed)
    }

    /// Number of jobs currently executing.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.config.worker_count.max(1)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting jobs, let the workers drain the queue and wait for
    /// every worker to exit.
    pub async fn shutdown(&self) {
        info!("Stopping worker pool");
        self.sender.lock().take();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
        active: Arc<AtomicUsize>,
    ) {
        debug!(worker_id, "Worker started");
        loop {
            let job = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else {
                debug!(worker_id, "Worker shutting down");
                break;
            };

            active.fetch_add(1, Ordering::SeqCst);
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!(worker_id, "Job panicked");
            }
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_jobs_run_and_shutdown_drains_queue() {
        let pool = WorkerPool::new(WorkerPoolConfig { worker_count: 2 });
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.start();
        pool.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(pool.is_closed());
        assert_eq!(pool.submit(async {}), Err(PoolClosed));
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let pool = WorkerPool::new(WorkerPoolConfig { worker_count: 3 });
        pool.start();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let current = current.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig { worker_count: 1 });
        pool.start();
        let barrier = Arc::new(Barrier::new(2));

        pool.submit(async {
            panic!("boom");
        })
        .unwrap();
        let b = barrier.clone();
        pool.submit(async move {
            b.wait().await;
        })
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .unwrap();
        pool.shutdown().await;
    }
}
