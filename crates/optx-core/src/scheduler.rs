//! # Scheduler
//!
//! A fixed set of worker threads shares one ready queue. A worker pops a job,
//! runs one step of it and acts on the outcome:
//!
//! - **Complete**: the job finishes. Jobs parked behind it in the
//!   [`JobQueue`] finish with the same result, its parent's outstanding-child
//!   count drops, and the job goes back to its pool.
//! - **Spawn**: the job is parked in the suspended table with its child count
//!   set, *then* its children are submitted. The child that brings the count to
//!   zero puts the parent back on the ready queue.
//!
//! Nothing ever blocks on another job. A run ends when no job is live.
//! Workers with nothing to do sleep on a condition variable that is signalled
//! whenever a job becomes ready and once the last job retires.
//!
//! A panic inside a step is caught and turned into an error for that job. A
//! panicking rule only loses its rewrite; a panic anywhere else aborts the run.
//!
//! The first fatal error, a cancellation or an expired timeout raises the
//! shared abort flag. From then on every job that reaches a worker is aborted
//! without running. Aborts propagate to parked jobs and parents exactly like
//! completions, so the live count still drains to zero.

use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobResult, JobState, JobWork};
use crate::job_factory::JobFactory;
use crate::job_queue::{Admission, JobQueue};
use crate::jobs::{self, JobContext, Step};
use crossbeam::queue::SegQueue;
use crossbeam::utils::Backoff;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on one idle wait, in case a wakeup is missed.
const IDLE_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub max_live_jobs: usize,
    pub max_job_steps: u64,
    pub timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_live_jobs: 1_000_000,
            max_job_steps: 1_000_000,
            timeout: None,
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub job_steps: u64,
    pub jobs_submitted: u64,
    pub jobs_deduplicated: usize,
}

pub struct Scheduler<'a> {
    ctx: &'a JobContext<'a>,
    factory: &'a JobFactory,
    config: SchedulerConfig,
    ready: SegQueue<Box<Job>>,
    suspended: DashMap<JobId, Box<Job>>,
    queue: JobQueue,
    live: AtomicUsize,
    idle: Mutex<()>,
    wakeup: Condvar,
    sleepers: AtomicUsize,
    steps: AtomicU64,
    submitted: AtomicU64,
    abort: Arc<AtomicBool>,
    first_error: Mutex<Option<Error>>,
    root: Mutex<Option<(JobId, Option<JobResult>)>>,
    started: Instant,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        ctx: &'a JobContext<'a>,
        factory: &'a JobFactory,
        config: SchedulerConfig,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            factory,
            config,
            ready: SegQueue::new(),
            suspended: DashMap::new(),
            queue: JobQueue::new(),
            live: AtomicUsize::new(0),
            idle: Mutex::new(()),
            wakeup: Condvar::new(),
            sleepers: AtomicUsize::new(0),
            steps: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            abort,
            first_error: Mutex::new(None),
            root: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Runs `root` and everything it spawns to the end.
    ///
    /// Returns the root's result, or the reason the run was aborted.
    pub fn run(&self, root: JobWork) -> Result<JobResult> {
        let kind = root
            .kind()
            .ok_or_else(|| Error::Invariant("root job has no work".into()))?;
        let mut job = self.factory.create(kind);
        job.assign(root, None);
        *self.root.lock() = Some((job.id, None));
        debug!(root = %job.id, ?kind, workers = self.config.workers, "scheduler started");
        self.submit(job);

        thread::scope(|scope| {
            for i in 1..self.config.workers.max(1) {
                let spawned = thread::Builder::new()
                    .name(format!("optx-worker-{i}"))
                    .spawn_scoped(scope, || self.worker_loop());
                if let Err(e) = spawned {
                    warn!(worker = i, error = %e, "could not start worker thread");
                }
            }
            self.worker_loop();
        });

        debug!(
            steps = self.steps.load(Ordering::Relaxed),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "scheduler finished"
        );
        if let Some(e) = self.first_error.lock().clone() {
            return Err(e);
        }
        if self.abort.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        match self.root.lock().take() {
            Some((_, Some(result))) => Ok(result),
            _ => Err(Error::Invariant("root job finished without a result".into())),
        }
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            job_steps: self.steps.load(Ordering::Relaxed),
            jobs_submitted: self.submitted.load(Ordering::Relaxed),
            jobs_deduplicated: self.queue.deduplicated(),
        }
    }

    /// Jobs created and not yet finished.
    pub fn live_jobs(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn worker_loop(&self) {
        let backoff = Backoff::new();
        loop {
            if let Some(job) = self.ready.pop() {
                backoff.reset();
                self.execute(job);
                continue;
            }
            if self.live.load(Ordering::Acquire) == 0 {
                return;
            }
            if backoff.is_completed() {
                self.sleep();
            } else {
                backoff.snooze();
            }
        }
    }

    fn sleep(&self) {
        let mut guard = self.idle.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);
        if self.ready.is_empty() && self.live.load(Ordering::SeqCst) != 0 {
            self.wakeup.wait_for(&mut guard, IDLE_WAIT);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake(&self, all: bool) {
        atomic::fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.idle.lock();
        if all {
            self.wakeup.notify_all();
        } else {
            self.wakeup.notify_one();
        }
    }

    fn make_ready(&self, mut job: Box<Job>) {
        job.state = JobState::Queued;
        self.ready.push(job);
        self.wake(false);
    }

    fn submit(&self, mut job: Box<Job>) {
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if live > self.config.max_live_jobs {
            self.fail(Error::ResourceExhausted {
                resource: "live jobs",
                limit: self.config.max_live_jobs,
            });
            self.finish(job, JobState::Aborted, None);
            return;
        }
        job.state = JobState::Queued;
        match self.queue.enqueue(job) {
            Admission::Run(job) => self.make_ready(job),
            Admission::Wait => {}
        }
    }

    fn execute(&self, mut job: Box<Job>) {
        if self.abort.load(Ordering::Acquire) {
            self.finish(job, JobState::Aborted, None);
            return;
        }
        if let Some(limit) = self.config.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > limit {
                self.fail(Error::Timeout { elapsed });
                self.finish(job, JobState::Aborted, None);
                return;
            }
        }
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if steps > self.config.max_job_steps {
            self.fail(Error::ResourceExhausted {
                resource: "job steps",
                limit: self.config.max_job_steps as usize,
            });
            self.finish(job, JobState::Aborted, None);
            return;
        }

        job.state = JobState::Running;
        trace!(job = %job.id, kind = ?job.kind, "step");
        let stepped = panic::catch_unwind(AssertUnwindSafe(|| jobs::step(&mut job, self.ctx)));
        let outcome = stepped.unwrap_or_else(|payload| Err(self.panicked(&job, payload.as_ref())));
        match outcome {
            Ok(Step::Complete(result)) => self.finish(job, JobState::Completed, Some(result)),
            Ok(Step::Spawn(children)) if children.is_empty() => self.make_ready(job),
            Ok(Step::Spawn(children)) => {
                let parent = job.id;
                job.state = JobState::Suspended;
                job.pending_children = children.len();
                self.suspended.insert(parent, job);
                for work in children {
                    let Some(kind) = work.kind() else {
                        self.fail(Error::Invariant(format!("{parent} spawned an idle job")));
                        self.child_finished(parent);
                        continue;
                    };
                    let mut child = self.factory.create(kind);
                    child.assign(work, Some(parent));
                    self.submit(child);
                }
            }
            Err(e) => {
                if e.is_fatal() {
                    self.fail(e);
                } else {
                    warn!(job = %job.id, error = %e, "job failed");
                }
                self.finish(job, JobState::Aborted, None);
            }
        }
    }

    /// Error standing in for a step that panicked.
    fn panicked(&self, job: &Job, payload: &(dyn Any + Send)) -> Error {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        match &job.work {
            JobWork::Transform { rule, .. } => Error::rule(
                self.ctx.engine.registry().rule(*rule).name(),
                format!("panicked: {message}"),
            ),
            _ => Error::Invariant(format!("{} panicked: {message}", job.id)),
        }
    }

    fn fail(&self, error: Error) {
        let mut first = self.first_error.lock();
        if first.is_none() {
            warn!(error = %error, "aborting search");
            *first = Some(error);
        }
        self.abort.store(true, Ordering::Release);
    }

    fn finish(&self, mut job: Box<Job>, state: JobState, result: Option<JobResult>) {
        job.state = state;
        job.result = result;
        self.retire(job);
    }

    /// Final bookkeeping of a job in a terminal state.
    fn retire(&self, job: Box<Job>) {
        jobs::on_finish(&job);

        if let Some(key) = &job.queue_key {
            let parked = match (&job.state, &job.result) {
                (JobState::Completed, Some(result)) => {
                    self.queue.notify_complete(key, job.id, result)
                }
                _ => self.queue.notify_abort(key, job.id),
            };
            for dependent in parked {
                self.retire(dependent);
            }
        }

        match job.parent {
            Some(parent) => self.child_finished(parent),
            None => {
                let mut root = self.root.lock();
                if let Some((id, slot)) = root.as_mut() {
                    if *id == job.id && job.state == JobState::Completed {
                        *slot = job.result.clone();
                    }
                }
            }
        }

        self.factory.release(job);
        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.wake(true);
        }
    }

    fn child_finished(&self, parent: JobId) {
        let resumed = match self.suspended.entry(parent) {
            Entry::Occupied(mut entry) => {
                let job = entry.get_mut();
                job.pending_children = job.pending_children.saturating_sub(1);
                if job.pending_children == 0 {
                    Some(entry.remove())
                } else {
                    None
                }
            }
            Entry::Vacant(_) => {
                warn!(%parent, "child finished for a parent that is not suspended");
                None
            }
        };
        if let Some(job) = resumed {
            self.make_ready(job);
        }
    }
}
