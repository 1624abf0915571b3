//! # Sort Implementation Rule
//!
//! Maps an explicit logical Sort (ORDER BY) onto a physical SortOp over the
//! same input.
//!
//! Sorts that only exist to satisfy a requirement, such as the sorted inputs
//! of a MergeJoin, never appear as logical operators. Group optimization adds
//! those itself as enforcers: a SortOp whose input is its own group, costed
//! against the group's best plan without the ordering.

use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

pub struct ImplSortRule;

impl Rule for ImplSortRule {
    fn name(&self) -> &str {
        "ImplSort"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::sort()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Sort { order }) = &expr.op else {
            return Ok(vec![]);
        };

        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::SortOp {
                order: order.clone(),
            }),
            expr.children.clone(),
        )])
    }
}
