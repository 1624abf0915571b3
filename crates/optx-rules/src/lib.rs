//! # Built-in Optimization Rules
//!
//! The default rule set of the optimizer, registered through the
//! [`Rule`](optx_core::rule::Rule) contract.
//!
//! ## Transformation Rules (Logical -> Logical)
//!
//! - **`JoinCommutativityRule`**: `A ⋈ B → B ⋈ A` for inner and cross joins.
//! - **`JoinAssociativityRule`**: `(A ⋈ B) ⋈ C → A ⋈ (B ⋈ C)` for inner joins.
//! - **`PredicatePushdownRule`**: merges a filter into the inner join below it.
//! - **`ProjectionPushdownRule`**: narrows a scan to the columns a projection uses.
//!
//! ## Implementation Rules (Logical -> Physical)
//!
//! - **`ImplHashJoinRule`**, **`ImplMergeJoinRule`**, **`ImplNestedLoopJoinRule`**
//! - **`ImplSeqScanRule`**
//! - **`ImplHashAggregateRule`**, **`ImplStreamAggregateRule`**
//! - **`ImplSortRule`**
//! - **`ImplFilterRule`**, **`ImplProjectRule`**, **`ImplLimitRule`**

pub mod enforcer;
pub mod impl_agg;
pub mod impl_join;
pub mod impl_misc;
pub mod impl_scan;
pub mod join_associativity;
pub mod join_commutativity;
pub mod predicate_pushdown;
pub mod projection_pushdown;

use optx_core::expr::{BinaryOp, Expr, LogicalOp, Operator};
use optx_core::memo::{GroupId, Memo};
use optx_core::rule::RuleRegistry;
use std::collections::HashSet;

/// Create a default rule registry with all built-in rules.
///
/// Connector-specific rules can be added to the returned registry with
/// `add_source_rule_set()`.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    registry.add_rule(Box::new(join_commutativity::JoinCommutativityRule));
    registry.add_rule(Box::new(join_associativity::JoinAssociativityRule));
    registry.add_rule(Box::new(predicate_pushdown::PredicatePushdownRule));
    registry.add_rule(Box::new(projection_pushdown::ProjectionPushdownRule));

    registry.add_rule(Box::new(impl_join::ImplHashJoinRule));
    registry.add_rule(Box::new(impl_join::ImplMergeJoinRule));
    registry.add_rule(Box::new(impl_join::ImplNestedLoopJoinRule));
    registry.add_rule(Box::new(impl_scan::ImplSeqScanRule));
    registry.add_rule(Box::new(impl_agg::ImplHashAggregateRule));
    registry.add_rule(Box::new(impl_agg::ImplStreamAggregateRule));
    registry.add_rule(Box::new(enforcer::ImplSortRule));
    registry.add_rule(Box::new(impl_misc::ImplFilterRule));
    registry.add_rule(Box::new(impl_misc::ImplProjectRule));
    registry.add_rule(Box::new(impl_misc::ImplLimitRule));

    registry
}

/// Names of the tables scanned anywhere below `group`.
pub(crate) fn group_tables(memo: &Memo, group: GroupId) -> HashSet<String> {
    let mut tables = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack = vec![group];
    while let Some(g) = stack.pop() {
        if !visited.insert(g) {
            continue;
        }
        for id in memo.group(g).logical_exprs() {
            let expr = memo.expr(id);
            match &expr.op {
                Operator::Logical(LogicalOp::Scan { table, .. }) => {
                    tables.insert(table.name.clone());
                }
                _ => stack.extend(expr.children.iter().copied()),
            }
        }
    }
    tables
}

/// Rewrites each `col = col` conjunct so its left operand comes from
/// `left_tables` whenever only the right one does.
pub(crate) fn orient_condition(condition: &Expr, left_tables: &HashSet<String>) -> Expr {
    let from_left = |e: &Expr| match e {
        Expr::Column(c) => c.table.as_ref().is_some_and(|t| left_tables.contains(t)),
        _ => false,
    };
    let orient = |conjunct: &Expr| match conjunct {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } if !from_left(left) && from_left(right) => Expr::eq(*right.clone(), *left.clone()),
        other => other.clone(),
    };
    match condition {
        Expr::And(conjuncts) => Expr::And(conjuncts.iter().map(orient).collect()),
        other => orient(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{JoinType, TableRef};
    use optx_core::rule::RuleType;

    #[test]
    fn test_default_registry_covers_every_logical_operator() {
        let registry = default_rule_registry();
        let described = registry.describe();
        let names: Vec<&str> = described.iter().map(|(_, r, _)| r.name()).collect();
        for expected in [
            "ImplSeqScan",
            "ImplFilter",
            "ImplProject",
            "ImplHashJoin",
            "ImplHashAggregate",
            "ImplSort",
            "ImplLimit",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        let transformations = described
            .iter()
            .filter(|(_, r, _)| r.rule_type() == RuleType::Transformation)
            .count();
        assert_eq!(transformations, 4);
    }

    #[test]
    fn test_group_tables_walks_joins() {
        let memo = Memo::new();
        let scan = |name: &str| {
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("s", name),
                columns: vec![],
                predicate: None,
            })
        };
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (ab, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: Expr::eq(Expr::column("a", "k"), Expr::column("b", "k")),
            }),
            vec![a, b],
        );

        let tables = group_tables(&memo, ab);
        assert_eq!(tables, HashSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(group_tables(&memo, a), HashSet::from(["a".to_string()]));
    }

    #[test]
    fn test_orient_condition() {
        let left = HashSet::from(["a".to_string()]);
        let backwards = Expr::And(vec![
            Expr::eq(Expr::column("b", "x"), Expr::column("a", "x")),
            Expr::eq(Expr::column("a", "y"), Expr::column("b", "y")),
        ]);
        assert_eq!(
            orient_condition(&backwards, &left),
            Expr::And(vec![
                Expr::eq(Expr::column("a", "x"), Expr::column("b", "x")),
                Expr::eq(Expr::column("a", "y"), Expr::column("b", "y")),
            ])
        );
    }
}
