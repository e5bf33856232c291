//! Dispatch pool subsystem.
//!
//! # Data Flow
//! ```text
//! acceptor ──submit(job)──▶ WorkerPool ──▶ parked worker | new worker | PoolExhausted
//!                                            │
//!                 session ──acquire/release──┴─▶ ObjectPool<Request>
//!                                              ▶ ObjectPool<Response>
//! ```
//!
//! # Design Decisions
//! - Three independent locks: idle workers, free requests, free responses
//! - Rejection instead of queueing keeps overload visible at the acceptor
//! - Request and Response are cleaned on release, so an acquired object is
//!   always in its default state

pub mod objects;
pub mod workers;

use thiserror::Error;

use crate::config::schema::{PoolConfig, ResponseConfig};
use crate::request::Request;
use crate::response::Response;

pub use objects::ObjectPool;
pub use workers::{Job, WorkerPool};

/// Objects that can be reset to their default state for reuse.
pub trait Recycle {
    /// Reset every field.
    fn clean(&mut self);
}

/// Every worker is busy and the pool is at `max_workers`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("worker pool exhausted (max {max_workers} workers)")]
pub struct PoolExhausted {
    pub max_workers: usize,
}

/// Workers plus the Request/Response free lists.
#[derive(Debug)]
pub struct DispatchPool {
    workers: WorkerPool,
    requests: ObjectPool<Request>,
    responses: ObjectPool<Response>,
    startup_workers: usize,
    max_parameters: usize,
}

impl DispatchPool {
    pub fn new(pool: &PoolConfig, response: &ResponseConfig) -> Self {
        let buffer_size = response.buffer_size;
        let encoding = response.default_encoding.clone();
        Self {
            workers: WorkerPool::new(pool.max_workers, pool.max_idle_workers),
            requests: ObjectPool::new(pool.max_idle_requests, Request::default),
            responses: ObjectPool::new(pool.max_idle_responses, move || Response::new(buffer_size, &encoding)),
            startup_workers: pool.startup_workers,
            max_parameters: pool.max_parameters,
        }
    }

    /// Pre-warm `startup_workers` parked workers. Requires a runtime.
    pub fn start(&self) {
        self.workers.prestart(self.startup_workers);
    }

    pub fn submit(&self, job: Job) -> Result<(), PoolExhausted> {
        self.workers.submit(job)
    }

    pub fn acquire_request(&self) -> Request {
        let mut req = self.requests.acquire();
        req.set_max_parameters(self.max_parameters);
        req
    }

    pub fn release_request(&self, req: Request) {
        self.requests.release(req);
    }

    pub fn acquire_response(&self) -> Response {
        self.responses.acquire()
    }

    pub fn release_response(&self, resp: Response) {
        self.responses.release(resp);
    }

    pub fn total_workers(&self) -> usize {
        self.workers.total_workers()
    }

    pub fn busy_workers(&self) -> usize {
        self.workers.busy_workers()
    }

    pub fn idle_workers(&self) -> usize {
        self.workers.idle_workers()
    }

    pub fn idle_requests(&self) -> usize {
        self.requests.idle_count()
    }

    pub fn idle_responses(&self) -> usize {
        self.responses.idle_count()
    }

    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}
