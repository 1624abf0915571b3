//! # Projection Pushdown Rule
//!
//! Column pruning for a Project directly over a Scan: the scan is narrowed to
//! the columns the projection (and the scan's own predicate) reference.
//!
//! ```text
//! Before: Project(exprs, Scan(t, all columns))
//! After:  Project(exprs, Scan(t, referenced columns))
//! ```
//!
//! The narrow scan is a new expression with its own group. A projection that
//! already sits on a scan of exactly its columns has nothing to prune, so the
//! rule is not promising there and the rewrite cannot repeat.

use optx_core::error::Result;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleChild, RuleResult, RuleType};
use std::collections::HashSet;

pub struct ProjectionPushdownRule;

impl Rule for ProjectionPushdownRule {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Project, vec![Pattern::scan()])
    }

    fn promise(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Promise {
        if narrowed_scans(expr, memo).is_empty() {
            Promise::None
        } else {
            Promise::Low
        }
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Result<Vec<RuleResult>> {
        Ok(narrowed_scans(expr, memo)
            .into_iter()
            .map(|scan| {
                RuleResult::NewChildren(expr.op.clone(), vec![RuleChild::NewExpr(scan, vec![])])
            })
            .collect())
    }
}

/// A narrower copy of every scan below the projection that reads more than
/// the projection needs.
fn narrowed_scans(expr: &MemoExpr, memo: &Memo) -> Vec<Operator> {
    let Operator::Logical(LogicalOp::Project { exprs, .. }) = &expr.op else {
        return vec![];
    };

    memo.group(expr.children[0])
        .logical_exprs()
        .into_iter()
        .filter_map(|id| {
            let scan = memo.expr(id);
            let Operator::Logical(LogicalOp::Scan {
                table,
                columns,
                predicate,
            }) = &scan.op
            else {
                return None;
            };
            let needed = referenced_columns(exprs.iter().chain(predicate.iter()));
            if needed.is_empty() || same_columns(&needed, columns) {
                return None;
            }
            Some(Operator::Logical(LogicalOp::Scan {
                table: table.clone(),
                columns: needed,
                predicate: predicate.clone(),
            }))
        })
        .collect()
}

/// Distinct columns in first-seen order.
fn referenced_columns<'a>(exprs: impl Iterator<Item = &'a Expr>) -> Vec<ColumnRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for e in exprs {
        for c in e.columns() {
            if seen.insert((c.table.clone(), c.name.clone())) {
                out.push(c.clone());
            }
        }
    }
    out
}

fn same_columns(a: &[ColumnRef], b: &[ColumnRef]) -> bool {
    let names = |cols: &[ColumnRef]| -> HashSet<(Option<String>, String)> {
        cols.iter().map(|c| (c.table.clone(), c.name.clone())).collect()
    };
    names(a) == names(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    fn col(name: &str) -> ColumnRef {
        ColumnRef::new("t", name, 0)
    }

    #[test]
    fn test_prunes_once() {
        let memo = Memo::new();
        let (scan, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("s", "t"),
                columns: vec![col("a"), col("b"), col("c")],
                predicate: Some(Expr::eq(Expr::column("t", "c"), Expr::column("t", "c"))),
            }),
            vec![],
        );
        let project = Operator::Logical(LogicalOp::Project {
            exprs: vec![Expr::column("t", "a")],
            aliases: vec!["a".into()],
        });
        let (_, wide) = memo.add_expr(project.clone(), vec![scan]);

        let catalog = InMemoryCatalog::new();
        let ctx = OptContext {
            catalog: &catalog,
            required: None,
        };
        let rule = ProjectionPushdownRule;
        assert_eq!(rule.promise(&memo.expr(wide), &memo, &ctx), Promise::Low);

        let results = rule.apply(&memo.expr(wide), &memo, &ctx).unwrap();
        let [RuleResult::NewChildren(_, children)] = &results[..] else {
            panic!("expected one rewrite");
        };
        let [RuleChild::NewExpr(narrow_scan, _)] = &children[..] else {
            panic!("expected a new scan");
        };
        let Operator::Logical(LogicalOp::Scan { columns, .. }) = narrow_scan else {
            panic!("expected a narrowed scan");
        };
        assert_eq!(columns, &vec![col("a"), col("c")]);

        // The pruned projection has nothing left to prune.
        let (narrow, _) = memo.add_expr(narrow_scan.clone(), vec![]);
        let (_, pruned) = memo.add_expr(project, vec![narrow]);
        assert_eq!(rule.promise(&memo.expr(pruned), &memo, &ctx), Promise::None);
    }
}
