//! # Jobs
//!
//! A [`Job`] is one schedulable unit of search work. Its [`JobWork`] payload is
//! a closed set of variants, one per [`JobKind`], each carrying the target it
//! works on and how far it has got. The scheduler drives a job by calling its
//! step function repeatedly; between steps the job may wait for children it
//! spawned without holding a worker.
//!
//! ```text
//! Init -> Queued -> Running -> Completed
//!                      |  ^
//!                      v  |
//!                   Suspended       (any state) -> Aborted
//! ```
//!
//! Jobs are pooled per kind by the [`JobFactory`](crate::job_factory::JobFactory)
//! and recycled after reaching a terminal state.

use crate::cost::Cost;
use crate::memo::{ExprId, GroupId};
use crate::pool::Poolable;
use crate::properties::PhysicalPropertySet;
use crate::rule::RuleId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobKind {
    GroupExploration,
    GroupExpressionExploration,
    GroupImplementation,
    GroupExpressionImplementation,
    #[default]
    GroupOptimization,
    GroupExpressionOptimization,
    Transformation,
    Test,
}

impl JobKind {
    pub const COUNT: usize = 8;

    pub const ALL: [JobKind; JobKind::COUNT] = [
        JobKind::GroupExploration,
        JobKind::GroupExpressionExploration,
        JobKind::GroupImplementation,
        JobKind::GroupExpressionImplementation,
        JobKind::GroupOptimization,
        JobKind::GroupExpressionOptimization,
        JobKind::Transformation,
        JobKind::Test,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Init,
    Queued,
    Running,
    Suspended,
    Completed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Identity of the work a job does. At most one job per key runs at a time;
/// the rest wait for its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    ExploreGroup(GroupId),
    ImplementGroup(GroupId),
    OptimizeGroup(GroupId, PhysicalPropertySet),
    ExploreExpr(ExprId),
    ImplementExpr(ExprId),
    OptimizeExpr(ExprId, PhysicalPropertySet),
    Test(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Done,
    /// Best cost found, `None` if no plan satisfies the requirement.
    Cost(Option<Cost>),
    Value(u64),
}

/// Resume point of a phase job. Each job kind uses the subset it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Start,
    AwaitChildren,
    AwaitRules,
    AwaitAlternatives,
    AwaitEnforcer,
}

/// Shared record of what happened to a family of test jobs.
///
/// It also plays the part the memo plays for search jobs: once a target's
/// value is computed it is remembered, and later jobs for it reuse it.
#[derive(Debug, Default)]
pub struct TestProbe {
    executions: AtomicUsize,
    computed: Mutex<HashMap<u64, u64>>,
    observed: Mutex<Vec<Option<JobResult>>>,
}

impl TestProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Times the underlying computation actually ran.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Acquire)
    }

    pub(crate) fn computed(&self, target: u64) -> Option<u64> {
        self.computed.lock().get(&target).copied()
    }

    pub(crate) fn record_execution(&self, target: u64, value: u64) {
        self.computed.lock().insert(target, value);
        self.executions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_outcome(&self, result: Option<JobResult>) {
        self.observed.lock().push(result);
    }

    /// One entry per finished job: its result, or `None` if it was aborted.
    pub fn observed(&self) -> Vec<Option<JobResult>> {
        self.observed.lock().clone()
    }
}

/// Synthetic job used to exercise the scheduler without a search.
#[derive(Debug, Clone)]
pub struct TestWork {
    pub target: u64,
    pub value: u64,
    pub probe: Arc<TestProbe>,
    pub children: Vec<TestWork>,
    /// Fail with a fatal error instead of completing.
    pub fail: bool,
    pub panics: bool,
    pub spawned: bool,
}

impl TestWork {
    pub fn new(target: u64, value: u64, probe: &Arc<TestProbe>) -> Self {
        Self {
            target,
            value,
            probe: Arc::clone(probe),
            children: Vec::new(),
            fail: false,
            panics: false,
            spawned: false,
        }
    }

    pub fn with_children(mut self, children: Vec<TestWork>) -> Self {
        self.children = children;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub enum JobWork {
    /// Pooled job with nothing assigned.
    #[default]
    Idle,
    ExploreGroup {
        group: GroupId,
        cursor: usize,
        stage: Stage,
    },
    ExploreExpr {
        expr: ExprId,
        stage: Stage,
    },
    ImplementGroup {
        group: GroupId,
        cursor: usize,
        stage: Stage,
    },
    ImplementExpr {
        expr: ExprId,
        stage: Stage,
    },
    OptimizeGroup {
        group: GroupId,
        required: PhysicalPropertySet,
        stage: Stage,
    },
    OptimizeExpr {
        expr: ExprId,
        required: PhysicalPropertySet,
        stage: Stage,
    },
    Transform {
        expr: ExprId,
        rule: RuleId,
    },
    Test(TestWork),
}

impl JobWork {
    pub fn explore_group(group: GroupId) -> Self {
        JobWork::ExploreGroup {
            group,
            cursor: 0,
            stage: Stage::Start,
        }
    }

    pub fn explore_expr(expr: ExprId) -> Self {
        JobWork::ExploreExpr {
            expr,
            stage: Stage::Start,
        }
    }

    pub fn implement_group(group: GroupId) -> Self {
        JobWork::ImplementGroup {
            group,
            cursor: 0,
            stage: Stage::Start,
        }
    }

    pub fn implement_expr(expr: ExprId) -> Self {
        JobWork::ImplementExpr {
            expr,
            stage: Stage::Start,
        }
    }

    pub fn optimize_group(group: GroupId, required: PhysicalPropertySet) -> Self {
        JobWork::OptimizeGroup {
            group,
            required,
            stage: Stage::Start,
        }
    }

    pub fn optimize_expr(expr: ExprId, required: PhysicalPropertySet) -> Self {
        JobWork::OptimizeExpr {
            expr,
            required,
            stage: Stage::Start,
        }
    }

    pub fn transform(expr: ExprId, rule: RuleId) -> Self {
        JobWork::Transform { expr, rule }
    }

    /// `None` only for [`JobWork::Idle`].
    pub fn kind(&self) -> Option<JobKind> {
        let kind = match self {
            JobWork::Idle => return None,
            JobWork::ExploreGroup { .. } => JobKind::GroupExploration,
            JobWork::ExploreExpr { .. } => JobKind::GroupExpressionExploration,
            JobWork::ImplementGroup { .. } => JobKind::GroupImplementation,
            JobWork::ImplementExpr { .. } => JobKind::GroupExpressionImplementation,
            JobWork::OptimizeGroup { .. } => JobKind::GroupOptimization,
            JobWork::OptimizeExpr { .. } => JobKind::GroupExpressionOptimization,
            JobWork::Transform { .. } => JobKind::Transformation,
            JobWork::Test(_) => JobKind::Test,
        };
        Some(kind)
    }

    /// Transformations are not deduplicated through the queue; the memo's
    /// per-expression rule marks already keep them from repeating.
    pub fn queue_key(&self) -> Option<QueueKey> {
        match self {
            JobWork::Idle | JobWork::Transform { .. } => None,
            JobWork::ExploreGroup { group, .. } => Some(QueueKey::ExploreGroup(*group)),
            JobWork::ExploreExpr { expr, .. } => Some(QueueKey::ExploreExpr(*expr)),
            JobWork::ImplementGroup { group, .. } => Some(QueueKey::ImplementGroup(*group)),
            JobWork::ImplementExpr { expr, .. } => Some(QueueKey::ImplementExpr(*expr)),
            JobWork::OptimizeGroup {
                group, required, ..
            } => Some(QueueKey::OptimizeGroup(*group, required.clone())),
            JobWork::OptimizeExpr { expr, required, .. } => {
                Some(QueueKey::OptimizeExpr(*expr, required.clone()))
            }
            JobWork::Test(t) => Some(QueueKey::Test(t.target)),
        }
    }
}

#[derive(Debug, Default)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub parent: Option<JobId>,
    pub pending_children: usize,
    pub queue_key: Option<QueueKey>,
    pub result: Option<JobResult>,
    pub work: JobWork,
    slot: Option<u32>,
}

impl Job {
    /// Hands `work` to a freshly created job.
    pub fn assign(&mut self, work: JobWork, parent: Option<JobId>) {
        debug_assert_eq!(work.kind(), Some(self.kind), "work assigned to a job of another kind");
        self.queue_key = work.queue_key();
        self.work = work;
        self.parent = parent;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Poolable for Job {
    fn slot(&self) -> Option<u32> {
        self.slot
    }

    fn set_slot(&mut self, slot: Option<u32>) {
        self.slot = slot;
    }

    fn reset(&mut self) {
        *self = Job {
            slot: self.slot,
            ..Job::default()
        };
    }
}
