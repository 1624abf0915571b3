//! Creates and recycles jobs, one [`SyncPool`] per [`JobKind`].
//!
//! Pools come into existence the first time their kind is asked for and live
//! until [`JobFactory::truncate`] drops them.

use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobKind, JobState};
use crate::pool::SyncPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_JOBS_PER_POOL: usize = 1024;

pub struct JobFactory {
    pools: [OnceLock<SyncPool<Job>>; JobKind::COUNT],
    capacity: usize,
    next_id: AtomicU64,
}

impl JobFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            pools: std::array::from_fn(|_| OnceLock::new()),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    fn pool(&self, kind: JobKind) -> &SyncPool<Job> {
        self.pools[kind.index()].get_or_init(|| {
            debug!(?kind, capacity = self.capacity, "creating job pool");
            SyncPool::new(self.capacity)
        })
    }

    /// A fresh job in state `Init`. Falls back to the heap when the pool of
    /// `kind` is exhausted.
    pub fn create(&self, kind: JobKind) -> Box<Job> {
        let mut job = self.pool(kind).retrieve();
        job.id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        job.kind = kind;
        job.state = JobState::Init;
        job
    }

    /// Returns a finished job to its pool. The job must no longer be reachable
    /// from any queue or parent.
    pub fn release(&self, job: Box<Job>) {
        debug_assert!(job.is_terminal(), "{} released in state {:?}", job.id, job.state);
        match self.pools[job.kind.index()].get() {
            Some(pool) => pool.recycle(job),
            None => drop(job),
        }
    }

    /// Drops the pool of `kind`. Fails if any job of that kind is still out.
    pub fn truncate(&mut self, kind: JobKind) -> Result<()> {
        let outstanding = self.outstanding(kind);
        if outstanding > 0 {
            return Err(Error::Invariant(format!(
                "cannot truncate {kind:?} pool with {outstanding} outstanding jobs"
            )));
        }
        if self.pools[kind.index()].take().is_some() {
            debug!(?kind, "truncated job pool");
        }
        Ok(())
    }

    pub fn outstanding(&self, kind: JobKind) -> usize {
        self.pools[kind.index()]
            .get()
            .map(|p| p.outstanding())
            .unwrap_or(0)
    }

    pub fn available(&self, kind: JobKind) -> usize {
        self.pools[kind.index()]
            .get()
            .map(|p| p.available())
            .unwrap_or(0)
    }

    pub fn is_pooled(&self, kind: JobKind) -> bool {
        self.pools[kind.index()].get().is_some()
    }

    pub fn fallback_count(&self) -> usize {
        self.pools
            .iter()
            .filter_map(|p| p.get())
            .map(|p| p.fallback_count())
            .sum()
    }

    /// Ids handed out so far.
    pub fn jobs_created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl Default for JobFactory {
    fn default() -> Self {
        Self::new(DEFAULT_JOBS_PER_POOL)
    }
}
