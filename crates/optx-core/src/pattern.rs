//! # Rule Patterns
//!
//! A rule declares the shape it rewrites as a [`Pattern`] and the engine checks
//! it before asking the rule anything else.
//!
//! - `Operator(matcher, children)` matches an operator kind and, positionally,
//!   its child groups.
//! - `Any` matches anything.
//! - `Leaf` matches expressions without children.
//!
//! A non-`Any` child pattern matches a child group when *any* expression of that
//! group matches, since all of them are equivalent. Groups grow while the search
//! runs, so a child pattern only sees the expressions present at the time of the
//! check; exploration explores children before their parents to make that set
//! complete.

use crate::expr::{LogicalOpKind, Operator, PhysicalOpKind};
use crate::memo::{ExprId, Memo};

#[derive(Debug, Clone)]
pub enum Pattern {
    Operator(OpMatcher, Vec<Pattern>),
    Any,
    Leaf,
}

#[derive(Debug, Clone)]
pub enum OpMatcher {
    LogicalOp(LogicalOpKind),
    PhysicalOp(PhysicalOpKind),
    AnyLogical,
    AnyPhysical,
}

impl OpMatcher {
    fn accepts(&self, op: &Operator) -> bool {
        match (op, self) {
            (Operator::Logical(l), OpMatcher::LogicalOp(kind)) => l.kind() == *kind,
            (Operator::Physical(p), OpMatcher::PhysicalOp(kind)) => p.kind() == *kind,
            (Operator::Logical(_), OpMatcher::AnyLogical) => true,
            (Operator::Physical(_), OpMatcher::AnyPhysical) => true,
            _ => false,
        }
    }
}

impl Pattern {
    pub fn logical(kind: LogicalOpKind, children: Vec<Pattern>) -> Self {
        Pattern::Operator(OpMatcher::LogicalOp(kind), children)
    }

    pub fn join() -> Self {
        Self::logical(LogicalOpKind::Join, vec![Pattern::Any, Pattern::Any])
    }

    /// `(A ⋈ B) ⋈ C`
    pub fn join_join_left() -> Self {
        Self::logical(LogicalOpKind::Join, vec![Pattern::join(), Pattern::Any])
    }

    pub fn scan() -> Self {
        Self::logical(LogicalOpKind::Scan, vec![])
    }

    pub fn filter() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Pattern::Any])
    }

    pub fn filter_join() -> Self {
        Self::logical(LogicalOpKind::Filter, vec![Pattern::join()])
    }

    pub fn project() -> Self {
        Self::logical(LogicalOpKind::Project, vec![Pattern::Any])
    }

    pub fn aggregate() -> Self {
        Self::logical(LogicalOpKind::Aggregate, vec![Pattern::Any])
    }

    pub fn sort() -> Self {
        Self::logical(LogicalOpKind::Sort, vec![Pattern::Any])
    }

    pub fn limit() -> Self {
        Self::logical(LogicalOpKind::Limit, vec![Pattern::Any])
    }
}

pub fn matches(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> bool {
    let expr = memo.expr(expr_id);
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => expr.children.is_empty(),
        Pattern::Operator(matcher, child_patterns) => {
            if !matcher.accepts(&expr.op) || expr.children.len() != child_patterns.len() {
                return false;
            }
            expr.children
                .iter()
                .zip(child_patterns)
                .all(|(&child, child_pattern)| match child_pattern {
                    Pattern::Any => true,
                    _ => memo
                        .group(child)
                        .exprs()
                        .into_iter()
                        .filter(|&e| e != expr_id)
                        .any(|e| matches(memo, e, child_pattern)),
                })
        }
    }
}
