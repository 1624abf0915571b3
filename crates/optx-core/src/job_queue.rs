//! # Per-target Job Queue
//!
//! The same target is reached from many places during a search: a group is
//! optimized for the same requirement by every parent that uses it. The queue
//! makes sure only the first job that asks for a target does the work. Later
//! jobs for a target with an active entry are parked in that entry and finished
//! with the first job's result.
//!
//! An entry exists from the moment its first job is admitted until that job
//! finishes. The first job marks its target done in the memo before it
//! finishes, so a job arriving after the entry is gone sees the mark and
//! completes on its first step.

use crate::job::{Job, JobId, JobResult, JobState, QueueKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct QueueEntry {
    first: JobId,
    waiting: Vec<Box<Job>>,
}

/// Outcome of [`JobQueue::enqueue`].
#[derive(Debug)]
pub enum Admission {
    /// The job owns its target (or has none) and should be scheduled.
    Run(Box<Job>),
    /// The job was parked behind the first job of its target.
    Wait,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    entries: DashMap<QueueKey, QueueEntry>,
    deduplicated: AtomicUsize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, mut job: Box<Job>) -> Admission {
        let Some(key) = job.queue_key.clone() else {
            return Admission::Run(job);
        };
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(QueueEntry {
                    first: job.id,
                    waiting: Vec::new(),
                });
                Admission::Run(job)
            }
            Entry::Occupied(mut entry) => {
                job.state = JobState::Queued;
                entry.get_mut().waiting.push(job);
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                Admission::Wait
            }
        }
    }

    /// Called when `first` completed `key`. Removes the entry and returns the
    /// parked jobs, completed with a copy of `result`.
    pub fn notify_complete(
        &self,
        key: &QueueKey,
        first: JobId,
        result: &JobResult,
    ) -> Vec<Box<Job>> {
        self.drain(key, first, JobState::Completed, Some(result))
    }

    /// Called when `first` aborted. The parked jobs come back aborted.
    pub fn notify_abort(&self, key: &QueueKey, first: JobId) -> Vec<Box<Job>> {
        self.drain(key, first, JobState::Aborted, None)
    }

    fn drain(
        &self,
        key: &QueueKey,
        first: JobId,
        state: JobState,
        result: Option<&JobResult>,
    ) -> Vec<Box<Job>> {
        let Some((_, entry)) = self.entries.remove_if(key, |_, e| e.first == first) else {
            return Vec::new();
        };
        entry
            .waiting
            .into_iter()
            .map(|mut job| {
                job.state = state;
                job.result = result.cloned();
                job
            })
            .collect()
    }

    /// Targets with a first job still active.
    pub fn active_targets(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Jobs parked behind another job since the queue was created.
    pub fn deduplicated(&self) -> usize {
        self.deduplicated.load(Ordering::Relaxed)
    }
}
