//! Costed optimization of a group under a required property set.
//!
//! A group job implements the group, costs each physical alternative under the
//! requirement and, when the requirement asks for a sort order or a
//! distribution, also costs an enforcer placed on top of the group itself. The
//! cheapest alternative whose delivered properties satisfy the requirement
//! becomes the group's winner for it.

use super::{JobContext, Step};
use crate::cost::Cost;
use crate::error::Result;
use crate::expr::{Operator, PhysicalOp};
use crate::job::{JobResult, JobWork, Stage};
use crate::memo::{ExprId, GroupId, Winner};
use crate::properties::{child_requirements, delivered_by, PhysicalPropertySet};
use crate::stats::Statistics;
use std::sync::Arc;
use tracing::trace;

pub fn optimize_group(
    group_id: GroupId,
    required: &PhysicalPropertySet,
    stage: &mut Stage,
    ctx: &JobContext,
) -> Result<Step> {
    let group = ctx.memo.group(group_id);
    let best = || JobResult::Cost(group.winner(required).map(|w| w.cost));

    if *stage == Stage::Start {
        if group.is_optimized(required) {
            return Ok(Step::Complete(best()));
        }
        *stage = Stage::AwaitChildren;
        if !group.is_implemented() {
            return Ok(Step::Spawn(vec![JobWork::implement_group(group_id)]));
        }
    }

    if *stage == Stage::AwaitChildren {
        ctx.memo.ensure_stats(group_id, ctx.catalog);
        *stage = Stage::AwaitAlternatives;
        let alternatives: Vec<JobWork> = group
            .physical_exprs()
            .into_iter()
            .filter(|&e| !ctx.memo.expr(e).is_self_referencing())
            .map(|e| JobWork::optimize_expr(e, required.clone()))
            .collect();
        if !alternatives.is_empty() {
            return Ok(Step::Spawn(alternatives));
        }
    }

    if *stage == Stage::AwaitAlternatives {
        *stage = Stage::AwaitEnforcer;
        if let Some(enforcer) = enforcer_for(required) {
            let (expr_id, _) =
                ctx.memo
                    .add_expr_to_group(Operator::Physical(enforcer), vec![group_id], group_id);
            return Ok(Step::Spawn(vec![JobWork::optimize_expr(
                expr_id,
                required.clone(),
            )]));
        }
    }

    group.set_optimized(required);
    trace!(group = group_id, %required, "group optimized");
    Ok(Step::Complete(best()))
}

/// Sort when an order is required; otherwise Exchange when a distribution is.
fn enforcer_for(required: &PhysicalPropertySet) -> Option<PhysicalOp> {
    if let Some(order) = &required.sort_order {
        return Some(PhysicalOp::SortOp {
            order: order.clone(),
        });
    }
    required
        .distribution
        .as_ref()
        .map(|distribution| PhysicalOp::Exchange {
            distribution: distribution.clone(),
        })
}

/// Optimizes the inputs of one physical expression, then costs it and offers
/// it as the winner of its group.
pub fn optimize_expr(
    expr_id: ExprId,
    required: &PhysicalPropertySet,
    stage: &mut Stage,
    ctx: &JobContext,
) -> Result<Step> {
    let expr = ctx.memo.expr(expr_id);
    let Some(op) = expr.op.as_physical() else {
        return Ok(Step::Complete(JobResult::Cost(None)));
    };
    let child_reqs = child_requirements(op, expr.children.len(), required);

    if *stage == Stage::Start {
        *stage = Stage::AwaitChildren;
        if !expr.children.is_empty() {
            return Ok(Step::Spawn(
                expr.children
                    .iter()
                    .zip(child_reqs.iter())
                    .map(|(&child, req)| JobWork::optimize_group(child, req.clone()))
                    .collect(),
            ));
        }
    }

    let mut child_winners = Vec::with_capacity(expr.children.len());
    for (&child, req) in expr.children.iter().zip(child_reqs.iter()) {
        match ctx.memo.group(child).winner(req) {
            Some(w) => child_winners.push(w),
            None => return Ok(Step::Complete(JobResult::Cost(None))),
        }
    }

    let inputs: Vec<Arc<Statistics>> = if expr.children.is_empty() {
        vec![ctx.memo.ensure_stats(expr.group_id, ctx.catalog)]
    } else {
        expr.children
            .iter()
            .map(|&c| ctx.memo.ensure_stats(c, ctx.catalog))
            .collect()
    };
    let input_refs: Vec<&Statistics> = inputs.iter().map(|s| s.as_ref()).collect();
    let child_costs: Vec<Cost> = child_winners.iter().map(|w| w.cost).collect();
    let cost = ctx
        .cost_model
        .compute_cost(op, &input_refs, &child_costs, required);

    let any = PhysicalPropertySet::any();
    let pass_through = child_winners.first().map(|w| &w.delivered).unwrap_or(&any);
    let delivered = delivered_by(op, pass_through);
    if !required.satisfied_by(&delivered) {
        return Ok(Step::Complete(JobResult::Cost(None)));
    }

    let won = ctx.memo.group(expr.group_id).offer_winner(
        required,
        Winner {
            expr_id,
            cost,
            delivered,
        },
    );
    trace!(expr = expr_id, cost = cost.total, won, "costed alternative");
    Ok(Step::Complete(JobResult::Cost(Some(cost))))
}
