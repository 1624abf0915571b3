//! # Join Implementation Rules
//!
//! Three physical joins with different costs and preconditions:
//!
//! | rule | needs | cost | promise |
//! |---|---|---|---|
//! | [`ImplHashJoinRule`] | an equi-join conjunct | build memory + one pass over both inputs | high |
//! | [`ImplMergeJoinRule`] | inner join, equi-join conjunct, sorted inputs | one pass over both inputs | medium |
//! | [`ImplNestedLoopJoinRule`] | nothing | product of the input sizes | low |
//!
//! The hash join comes in both build orientations so the cost model can build
//! on the smaller input. Merge join inputs are rarely sorted already in a
//! lakehouse, so it usually pays for two Sort enforcers; it wins when an order
//! is needed above it anyway.

use crate::{group_tables, orient_condition};
use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

fn join_parts(expr: &MemoExpr) -> Option<(JoinType, &Expr)> {
    match &expr.op {
        Operator::Logical(LogicalOp::Join {
            join_type,
            condition,
        }) => Some((*join_type, condition)),
        _ => None,
    }
}

pub struct ImplHashJoinRule;

impl Rule for ImplHashJoinRule {
    fn name(&self) -> &str {
        "ImplHashJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match join_parts(expr) {
            Some((_, condition)) if condition.has_equi_predicate() => Promise::High,
            _ => Promise::None,
        }
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Some((join_type, condition)) = join_parts(expr) else {
            return Ok(vec![]);
        };

        Ok([BuildSide::Right, BuildSide::Left]
            .into_iter()
            .map(|build_side| {
                RuleResult::Substitution(
                    Operator::Physical(PhysicalOp::HashJoin {
                        join_type,
                        build_side,
                        condition: condition.clone(),
                    }),
                    expr.children.clone(),
                )
            })
            .collect())
    }
}

/// The condition is rewritten so every equi-join conjunct names the left
/// input's column first, which is the order the inputs get sorted in.
pub struct ImplMergeJoinRule;

impl Rule for ImplMergeJoinRule {
    fn name(&self) -> &str {
        "ImplMergeJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match join_parts(expr) {
            Some((JoinType::Inner, condition)) if condition.has_equi_predicate() => Promise::Medium,
            _ => Promise::None,
        }
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Some((join_type, condition)) = join_parts(expr) else {
            return Ok(vec![]);
        };

        let left_tables = group_tables(memo, expr.children[0]);
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::MergeJoin {
                join_type,
                condition: orient_condition(condition, &left_tables),
            }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplNestedLoopJoinRule;

impl Rule for ImplNestedLoopJoinRule {
    fn name(&self) -> &str {
        "ImplNestedLoopJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::Low
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Some((join_type, condition)) = join_parts(expr) else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::NestedLoopJoin {
                join_type,
                condition: condition.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
