//! # Join Commutativity Rule
//!
//! `A JOIN B = B JOIN A` for the symmetric join types (inner and cross).
//!
//! Both orientations end up in the same group, so the cost model can pick the
//! hash join build side and the merge join input order freely. Left, right,
//! semi and anti joins keep their sides and never match.
//!
//! The condition is mirrored along with the inputs, keeping every equi-join
//! conjunct written as `left input column = right input column`.

use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match &expr.op {
            Operator::Logical(LogicalOp::Join { join_type, .. }) if join_type.is_commutative() => {
                Promise::Medium
            }
            _ => Promise::None,
        }
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Join {
            join_type,
            condition,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };

        let swapped = Operator::Logical(LogicalOp::Join {
            join_type: *join_type,
            condition: mirror_condition(condition),
        });
        Ok(vec![RuleResult::Substitution(
            swapped,
            vec![expr.children[1], expr.children[0]],
        )])
    }
}

/// Swaps the operands of every equality conjunct.
pub(crate) fn mirror_condition(expr: &Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: right.clone(),
            right: left.clone(),
        },
        Expr::And(conjuncts) => Expr::And(conjuncts.iter().map(mirror_condition).collect()),
        other => other.clone(),
    }
}
