//! # Join Associativity Rule
//!
//! `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)` for inner joins.
//!
//! Together with commutativity this reaches every bushy join order. The new
//! inner join `B ⋈ C` has no group yet, so the rule returns it as a
//! [`RuleChild::NewExpr`] and the engine inserts it, reusing the group of an
//! identical join if some other rewrite already produced one.
//!
//! ## Condition Handling
//!
//! The conjuncts of `cond₂` that only mention tables of `B` and `C`, and
//! mention both, move to the new inner join. Everything else, together with
//! `cond₁`, stays on the outer join. The rewrite is skipped when nothing moves,
//! since the new inner join would then be a cross product.
//!
//! Both inputs of the inner join are tried as the one that moves, so
//! `(A ⋈ B) ⋈ C → B ⋈ (A ⋈ C)` is produced too when `cond₂` links `A` and `C`.
//!
//! Outer joins have reordering constraints this rule does not check; it never
//! matches them.

use crate::{group_tables, orient_condition};
use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{GroupId, Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleChild, RuleResult, RuleType};
use std::collections::HashSet;

pub struct JoinAssociativityRule;

impl Rule for JoinAssociativityRule {
    fn name(&self) -> &str {
        "JoinAssociativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_join_left()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match &expr.op {
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                ..
            }) => Promise::High,
            _ => Promise::None,
        }
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        let Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: outer_cond,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };
        let (inner_group, c_group) = (expr.children[0], expr.children[1]);
        let c_tables = group_tables(memo, c_group);

        let inner_joins: Vec<(GroupId, GroupId, Expr)> = memo
            .group(inner_group)
            .logical_exprs()
            .into_iter()
            .map(|id| memo.expr(id))
            .filter_map(|e| match &e.op {
                Operator::Logical(LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition,
                }) => Some((e.children[0], e.children[1], condition.clone())),
                _ => None,
            })
            .collect();

        let mut results = Vec::new();
        for (left, right, inner_cond) in inner_joins {
            let left_tables = group_tables(memo, left);
            let right_tables = group_tables(memo, right);
            let sides = [
                (left, &left_tables, right, &right_tables),
                (right, &right_tables, left, &left_tables),
            ];
            for (stay, stay_tables, moving, moving_tables) in sides {
                let shape = Reassociation {
                    stay,
                    moving,
                    c: c_group,
                };
                if let Some(result) = shape.rewrite(
                    outer_cond,
                    &inner_cond,
                    stay_tables,
                    moving_tables,
                    &c_tables,
                ) {
                    results.push(result);
                }
            }
        }
        Ok(results)
    }
}

/// `(stay ⋈ moving) ⋈ c → stay ⋈ (moving ⋈ c)`
struct Reassociation {
    stay: GroupId,
    moving: GroupId,
    c: GroupId,
}

impl Reassociation {
    fn rewrite(
        &self,
        outer_cond: &Expr,
        inner_cond: &Expr,
        stay_tables: &HashSet<String>,
        moving_tables: &HashSet<String>,
        c_tables: &HashSet<String>,
    ) -> Option<RuleResult> {
        let (pushed, kept): (Vec<Expr>, Vec<Expr>) = outer_cond
            .conjuncts()
            .into_iter()
            .cloned()
            .partition(|pred| links(pred, moving_tables, c_tables));
        let new_inner = Expr::conjunction(pushed)?;

        let mut outer_parts: Vec<Expr> = inner_cond.conjuncts().into_iter().cloned().collect();
        outer_parts.extend(kept);
        let new_outer = Expr::conjunction(outer_parts)?;

        Some(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: orient_condition(&new_outer, stay_tables),
            }),
            vec![
                RuleChild::Group(self.stay),
                RuleChild::NewExpr(
                    Operator::Logical(LogicalOp::Join {
                        join_type: JoinType::Inner,
                        condition: orient_condition(&new_inner, moving_tables),
                    }),
                    vec![RuleChild::Group(self.moving), RuleChild::Group(self.c)],
                ),
            ],
        ))
    }
}

/// True when `pred` mentions both sides and nothing else.
fn links(pred: &Expr, left: &HashSet<String>, right: &HashSet<String>) -> bool {
    let tables: HashSet<String> = pred.columns().into_iter().filter_map(|c| c.table.clone()).collect();
    let within = tables.iter().all(|t| left.contains(t) || right.contains(t));
    within && tables.iter().any(|t| left.contains(t)) && tables.iter().any(|t| right.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    fn eq_cond(lt: &str, lc: &str, rt: &str, rc: &str) -> Expr {
        Expr::eq(Expr::column(lt, lc), Expr::column(rt, rc))
    }

    fn tables(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scan(name: &str) -> Operator {
        Operator::Logical(LogicalOp::Scan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    fn inner(condition: Expr) -> Operator {
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition,
        })
    }

    #[test]
    fn test_moves_linking_predicate_inward() {
        // (A ⋈ B) ⋈_{B.z = C.w} C  →  A ⋈_{A.x = B.y} (B ⋈_{B.z = C.w} C)
        let shape = Reassociation {
            stay: 0,
            moving: 1,
            c: 2,
        };
        let result = shape
            .rewrite(
                &eq_cond("B", "z", "C", "w"),
                &eq_cond("A", "x", "B", "y"),
                &tables(&["A"]),
                &tables(&["B"]),
                &tables(&["C"]),
            )
            .expect("B links to C");

        let RuleResult::NewChildren(Operator::Logical(LogicalOp::Join { condition, .. }), children) =
            result
        else {
            panic!("expected a new join with a new child");
        };
        assert_eq!(condition, eq_cond("A", "x", "B", "y"));
        assert!(matches!(children[0], RuleChild::Group(0)));
        match &children[1] {
            RuleChild::NewExpr(Operator::Logical(LogicalOp::Join { condition, .. }), kids) => {
                assert_eq!(*condition, eq_cond("B", "z", "C", "w"));
                assert!(matches!(kids[..], [RuleChild::Group(1), RuleChild::Group(2)]));
            }
            other => panic!("unexpected child {other:?}"),
        }
    }

    #[test]
    fn test_no_cross_products() {
        // The outer condition links A and C, so B cannot move next to C.
        let shape = Reassociation {
            stay: 0,
            moving: 1,
            c: 2,
        };
        let result = shape.rewrite(
            &eq_cond("A", "z", "C", "w"),
            &eq_cond("A", "x", "B", "y"),
            &tables(&["A"]),
            &tables(&["B"]),
            &tables(&["C"]),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_links() {
        let ab = tables(&["A", "B"]);
        let c = tables(&["C"]);
        assert!(links(&eq_cond("B", "x", "C", "y"), &ab, &c));
        assert!(!links(&eq_cond("A", "x", "B", "y"), &ab, &c));
        assert!(!links(&eq_cond("D", "x", "C", "y"), &ab, &c));
    }

    #[test]
    fn test_both_orientations_from_memo() {
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("A"), vec![]);
        let (b, _) = memo.add_expr(scan("B"), vec![]);
        let (c, _) = memo.add_expr(scan("C"), vec![]);
        let (ab, _) = memo.add_expr(inner(eq_cond("A", "x", "B", "y")), vec![a, b]);
        let outer = Expr::And(vec![eq_cond("A", "z", "C", "w"), eq_cond("B", "q", "C", "r")]);
        let (_, top) = memo.add_expr(inner(outer), vec![ab, c]);

        let catalog = InMemoryCatalog::new();
        let ctx = OptContext {
            catalog: &catalog,
            required: None,
        };
        let results = JoinAssociativityRule
            .apply(&memo.expr(top), &memo, &ctx)
            .unwrap();
        assert_eq!(results.len(), 2);
    }
}
