//! Implementation: add physical alternatives for the logical expressions of a
//! fully explored group.

use super::{JobContext, Step};
use crate::error::Result;
use crate::job::{JobResult, JobWork, Stage};
use crate::memo::{ExprId, GroupId};
use crate::rule::RuleType;

pub fn implement_group(
    group_id: GroupId,
    cursor: &mut usize,
    stage: &mut Stage,
    ctx: &JobContext,
) -> Result<Step> {
    let group = ctx.memo.group(group_id);
    if *stage == Stage::Start {
        if group.is_implemented() {
            return Ok(Step::Complete(JobResult::Done));
        }
        *stage = Stage::AwaitChildren;
        if !group.is_explored() {
            return Ok(Step::Spawn(vec![JobWork::explore_group(group_id)]));
        }
    }
    *stage = Stage::AwaitAlternatives;

    let exprs = group.logical_exprs();
    if *cursor < exprs.len() {
        let batch = exprs[*cursor..]
            .iter()
            .map(|&e| JobWork::implement_expr(e))
            .collect();
        *cursor = exprs.len();
        return Ok(Step::Spawn(batch));
    }

    group.set_implemented();
    Ok(Step::Complete(JobResult::Done))
}

pub fn implement_expr(expr_id: ExprId, stage: &mut Stage, ctx: &JobContext) -> Result<Step> {
    let expr = ctx.memo.expr(expr_id);
    if *stage == Stage::Start {
        if expr.is_implemented() {
            return Ok(Step::Complete(JobResult::Done));
        }
        *stage = Stage::AwaitRules;
        let rules = ctx
            .engine
            .applicable_rules(ctx.memo, &expr, RuleType::Implementation, None);
        if !rules.is_empty() {
            return Ok(Step::Spawn(
                rules
                    .into_iter()
                    .map(|(rule, _)| JobWork::transform(expr_id, rule))
                    .collect(),
            ));
        }
    }

    expr.set_implemented();
    Ok(Step::Complete(JobResult::Done))
}
