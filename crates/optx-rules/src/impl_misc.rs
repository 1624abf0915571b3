//! Implementation rules for the operators with exactly one physical form:
//! Filter, Project and Limit. Each keeps its input and its arguments.

use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

pub struct ImplFilterRule;

impl Rule for ImplFilterRule {
    fn name(&self) -> &str {
        "ImplFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::Filter {
                predicate: predicate.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplProjectRule;

impl Rule for ImplProjectRule {
    fn name(&self) -> &str {
        "ImplProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Project { exprs, aliases }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::Project {
                exprs: exprs.clone(),
                aliases: aliases.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

pub struct ImplLimitRule;

impl Rule for ImplLimitRule {
    fn name(&self) -> &str {
        "ImplLimit"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit()
    }

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::High
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Limit { offset, count }) = &expr.op else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::Limit {
                offset: *offset,
                count: *count,
            }),
            expr.children.clone(),
        )])
    }
}
