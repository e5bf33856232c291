//! Bounded worker pool.
//!
//! A worker is a tokio task that runs one connection job at a time. Between
//! jobs it parks on the idle list by handing the pool a `oneshot::Sender`
//! through which the next job arrives.
//!
//! # Design Decisions
//! - `total` counts parked and busy workers and never exceeds `max_workers`
//! - A reservation is taken with a CAS loop before a worker is spawned
//! - Jobs are never queued: with no idle worker and no headroom, `submit` fails

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use super::PoolExhausted;

/// A connection job.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Inner {
    idle: Mutex<Vec<oneshot::Sender<Job>>>,
    total: AtomicUsize,
    busy: AtomicUsize,
    max_workers: usize,
    max_idle: usize,
    closed: AtomicBool,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .field("max_workers", &self.max_workers)
            .field("max_idle", &self.max_idle)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Spawns, parks and reuses worker tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::new()),
                total: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                max_workers,
                max_idle,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn up to `count` workers that park immediately.
    pub fn prestart(&self, count: usize) -> usize {
        let mut started = 0;
        while started < count && self.try_reserve() {
            tokio::spawn(run_worker(Arc::clone(&self.inner), None));
            started += 1;
        }
        tracing::debug!(started, "Pre-started workers");
        started
    }

    /// Hand `job` to a parked worker, or spawn one if below the cap.
    pub fn submit(&self, job: Job) -> Result<(), PoolExhausted> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolExhausted {
                max_workers: self.inner.max_workers,
            });
        }

        let mut job = job;
        loop {
            let parked = self.lock_idle().pop();
            match parked {
                Some(worker) => match worker.send(job) {
                    Ok(()) => return Ok(()),
                    Err(returned) => job = returned,
                },
                None => break,
            }
        }

        if !self.try_reserve() {
            return Err(PoolExhausted {
                max_workers: self.inner.max_workers,
            });
        }
        tokio::spawn(run_worker(Arc::clone(&self.inner), Some(job)));
        Ok(())
    }

    fn try_reserve(&self) -> bool {
        let total = &self.inner.total;
        let mut prev = total.load(Ordering::Relaxed);
        loop {
            if prev >= self.inner.max_workers {
                return false;
            }
            match total.compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<oneshot::Sender<Job>>> {
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers alive (parked or busy).
    pub fn total_workers(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Workers currently running a job.
    pub fn busy_workers(&self) -> usize {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Workers parked on the idle list.
    pub fn idle_workers(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Stop accepting jobs and release every parked worker.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let parked = std::mem::take(&mut *self.lock_idle());
        tracing::debug!(parked = parked.len(), "Releasing parked workers");
    }
}

struct WorkerGuard(Arc<Inner>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.total.fetch_sub(1, Ordering::AcqRel);
    }
}

struct BusyGuard<'a>(&'a Inner);

impl<'a> BusyGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        let busy = inner.busy.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("connector_busy_workers").set(busy as f64);
        Self(inner)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let busy = self.0.busy.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("connector_busy_workers").set(busy as f64);
    }
}

async fn run_worker(inner: Arc<Inner>, first: Option<Job>) {
    let _guard = WorkerGuard(Arc::clone(&inner));
    let mut next = first;
    loop {
        if let Some(job) = next.take() {
            let _busy = BusyGuard::new(&inner);
            job.await;
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut idle = inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed.load(Ordering::Acquire) || idle.len() >= inner.max_idle {
                return;
            }
            idle.push(tx);
        }

        match rx.await {
            Ok(job) => next = Some(job),
            Err(_) => return,
        }
    }
}
