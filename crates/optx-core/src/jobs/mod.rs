//! Step functions of the search jobs.
//!
//! The search runs in three phases per group, each a pair of jobs working
//! on a group and on one of its expressions:
//!
//! | phase | group job | expression job |
//! |---|---|---|
//! | exploration | [`explore::explore_group`] | [`explore::explore_expr`] |
//! | implementation | [`implement::implement_group`] | [`implement::implement_expr`] |
//! | optimization | [`optimize::optimize_group`] | [`optimize::optimize_expr`] |
//!
//! Implementation starts by exploring and optimization starts by implementing.
//! Rules run in separate transformation jobs. [`step`] dispatches on the job's
//! payload and never blocks: work that depends on other jobs is spawned, and the
//! job resumes at its recorded stage once they are all done.

pub mod explore;
pub mod implement;
pub mod optimize;

use crate::catalog::Catalog;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::job::{Job, JobResult, JobState, JobWork, TestWork};
use crate::memo::Memo;
use crate::xform::TransformationEngine;

/// Everything a job step may touch besides its own payload.
pub struct JobContext<'a> {
    pub memo: &'a Memo,
    pub engine: TransformationEngine<'a>,
    pub cost_model: &'a dyn CostModel,
    pub catalog: &'a dyn Catalog,
}

/// What a job asks the scheduler to do after a step.
#[derive(Debug)]
pub enum Step {
    Complete(JobResult),
    /// Suspend until all of these children have finished, then step again.
    Spawn(Vec<JobWork>),
}

pub fn step(job: &mut Job, ctx: &JobContext) -> Result<Step> {
    match &mut job.work {
        JobWork::Idle => Err(Error::Invariant(format!("{} has no work assigned", job.id))),
        JobWork::ExploreGroup {
            group,
            cursor,
            stage,
        } => explore::explore_group(*group, cursor, stage, ctx),
        JobWork::ExploreExpr { expr, stage } => explore::explore_expr(*expr, stage, ctx),
        JobWork::ImplementGroup {
            group,
            cursor,
            stage,
        } => implement::implement_group(*group, cursor, stage, ctx),
        JobWork::ImplementExpr { expr, stage } => implement::implement_expr(*expr, stage, ctx),
        JobWork::OptimizeGroup {
            group,
            required,
            stage,
        } => optimize::optimize_group(*group, required, stage, ctx),
        JobWork::OptimizeExpr {
            expr,
            required,
            stage,
        } => optimize::optimize_expr(*expr, required, stage, ctx),
        JobWork::Transform { expr, rule } => {
            let expr = ctx.memo.expr(*expr);
            ctx.engine.apply(ctx.memo, &expr, *rule)?;
            Ok(Step::Complete(JobResult::Done))
        }
        JobWork::Test(work) => test_step(work),
    }
}

fn test_step(work: &mut TestWork) -> Result<Step> {
    if work.fail {
        return Err(Error::Invariant(format!("test job {} failed", work.target)));
    }
    if work.panics {
        panic!("test job {} blew up", work.target);
    }
    if !work.spawned && !work.children.is_empty() {
        work.spawned = true;
        let children = work.children.drain(..).map(JobWork::Test).collect();
        return Ok(Step::Spawn(children));
    }
    if let Some(value) = work.probe.computed(work.target) {
        return Ok(Step::Complete(JobResult::Value(value)));
    }
    work.probe.record_execution(work.target, work.value);
    Ok(Step::Complete(JobResult::Value(work.value)))
}

/// Hook run once per job when it reaches a terminal state, whether it did the
/// work itself or was finished by the queue.
pub fn on_finish(job: &Job) {
    if let JobWork::Test(work) = &job.work {
        let outcome = match job.state {
            JobState::Completed => job.result.clone(),
            _ => None,
        };
        work.probe.record_outcome(outcome);
    }
}
