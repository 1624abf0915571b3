//! # Aggregate Implementation Rules
//!
//! - **Hash aggregate**: one hash table entry per group. Works on any input
//!   order; memory grows with the number of groups.
//! - **Stream aggregate**: finishes a group when the group-by key changes, so
//!   it needs its input sorted on the group-by columns and keeps only the
//!   current group in memory. Its output stays sorted on those columns.
//!
//! Both are always produced; the sort a stream aggregate may need is added by
//! group optimization and costed with it.

use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

fn aggregate_parts(expr: &MemoExpr) -> Option<(&Vec<Expr>, &Vec<AggExpr>)> {
    match &expr.op {
        Operator::Logical(LogicalOp::Aggregate {
            group_by,
            aggregates,
        }) => Some((group_by, aggregates)),
        _ => None,
    }
}

pub struct ImplHashAggregateRule;

impl Rule for ImplHashAggregateRule {
    fn name(&self) -> &str {
        "ImplHashAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Some((group_by, aggregates)) = aggregate_parts(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::HashAggregate {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplStreamAggregateRule;

impl Rule for ImplStreamAggregateRule {
    fn name(&self) -> &str {
        "ImplStreamAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    /// More worthwhile when the caller wants the output ordered anyway.
    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, ctx: &OptContext) -> Promise {
        match ctx.required {
            Some(required) if required.sort_order.is_some() => Promise::High,
            _ => Promise::Medium,
        }
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Some((group_by, aggregates)) = aggregate_parts(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::StreamAggregate {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
