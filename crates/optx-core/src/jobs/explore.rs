//! Exploration: fill groups with logically equivalent expressions.

use super::{JobContext, Step};
use crate::error::Result;
use crate::job::{JobResult, JobWork, Stage};
use crate::memo::{ExprId, GroupId};
use crate::rule::RuleType;
use std::collections::BTreeSet;
use tracing::trace;

/// Explores every logical expression of `group` until no new ones appear.
///
/// Transformation jobs of one expression add siblings to the same group, so the
/// job keeps a cursor into the group's logical expressions and goes around
/// again after each batch.
pub fn explore_group(
    group_id: GroupId,
    cursor: &mut usize,
    stage: &mut Stage,
    ctx: &JobContext,
) -> Result<Step> {
    let group = ctx.memo.group(group_id);
    if *stage == Stage::Start && group.is_explored() {
        return Ok(Step::Complete(JobResult::Done));
    }
    *stage = Stage::AwaitAlternatives;

    loop {
        let exprs = group.logical_exprs();
        if *cursor >= exprs.len() {
            break;
        }
        let batch: Vec<JobWork> = exprs[*cursor..]
            .iter()
            .filter(|&&e| !ctx.memo.expr(e).is_self_referencing())
            .map(|&e| JobWork::explore_expr(e))
            .collect();
        *cursor = exprs.len();
        if !batch.is_empty() {
            return Ok(Step::Spawn(batch));
        }
    }

    group.set_explored();
    trace!(group = group_id, exprs = *cursor, "group explored");
    Ok(Step::Complete(JobResult::Done))
}

/// Explores the child groups of `expr_id`, then runs every promising
/// exploration rule on it.
pub fn explore_expr(expr_id: ExprId, stage: &mut Stage, ctx: &JobContext) -> Result<Step> {
    let expr = ctx.memo.expr(expr_id);
    if *stage == Stage::Start {
        if expr.is_explored() {
            return Ok(Step::Complete(JobResult::Done));
        }
        *stage = Stage::AwaitChildren;
        let children: BTreeSet<GroupId> = expr
            .children
            .iter()
            .copied()
            .filter(|&c| c != expr.group_id)
            .collect();
        if !children.is_empty() {
            return Ok(Step::Spawn(
                children.into_iter().map(JobWork::explore_group).collect(),
            ));
        }
    }

    if *stage == Stage::AwaitChildren {
        *stage = Stage::AwaitRules;
        let rules = ctx
            .engine
            .applicable_rules(ctx.memo, &expr, RuleType::Transformation, None);
        if !rules.is_empty() {
            return Ok(Step::Spawn(
                rules
                    .into_iter()
                    .map(|(rule, _)| JobWork::transform(expr_id, rule))
                    .collect(),
            ));
        }
    }

    expr.set_explored();
    Ok(Step::Complete(JobResult::Done))
}
