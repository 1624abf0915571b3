//! # Predicate Pushdown Rule
//!
//! Merges a filter sitting on an inner join into the join condition:
//!
//! ```text
//! Before: Filter(pred, Join(A, B, cond))
//! After:  Join(A, B, cond AND pred)
//! ```
//!
//! The merged join goes into the filter's group next to the original
//! `Filter(Join)`, and the cost model picks between them. A cross join picks up
//! the predicate and becomes an inner join. Outer, semi and anti joins are left
//! alone: moving a filter into their condition changes which rows survive.

use crate::{group_tables, orient_condition};
use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

pub struct PredicatePushdownRule;

impl Rule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_join()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };

        let mut results = Vec::new();
        for join_id in memo.group(expr.children[0]).logical_exprs() {
            let join = memo.expr(join_id);
            let Operator::Logical(LogicalOp::Join {
                join_type,
                condition,
            }) = &join.op
            else {
                continue;
            };
            if !join_type.is_commutative() {
                continue;
            }

            let mut conjuncts: Vec<Expr> = match join_type {
                JoinType::Cross => Vec::new(),
                _ => condition.conjuncts().into_iter().cloned().collect(),
            };
            for pred in predicate.conjuncts() {
                if !conjuncts.contains(pred) {
                    conjuncts.push(pred.clone());
                }
            }
            let Some(merged) = Expr::conjunction(conjuncts) else {
                continue;
            };
            let left_tables = group_tables(memo, join.children[0]);
            results.push(RuleResult::Substitution(
                Operator::Logical(LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition: orient_condition(&merged, &left_tables),
                }),
                join.children.clone(),
            ));
        }
        Ok(results)
    }
}
