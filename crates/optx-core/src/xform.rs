//! # Transformation Engine
//!
//! Runs registered rules against memo expressions and inserts what they produce.
//!
//! For an expression the engine first lists the rules worth trying
//! ([`TransformationEngine::applicable_rules`]): rules of the wanted type that
//! have not fired on it yet, whose pattern matches and whose promise is not
//! [`Promise::None`]. Each is then run on its own
//! ([`TransformationEngine::apply`]), normally from a transformation job.
//!
//! A rule that fails or produces something malformed costs only that rewrite:
//! the failure is logged and the search carries on. Growing the memo past its
//! configured limit is fatal.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::expr::Operator;
use crate::memo::{ExprId, GroupId, Memo, MemoExpr};
use crate::pattern::matches;
use crate::properties::PhysicalPropertySet;
use crate::rule::{OptContext, Promise, RuleChild, RuleId, RuleRegistry, RuleResult, RuleType};
use tracing::{trace, warn};

pub struct TransformationEngine<'a> {
    registry: &'a RuleRegistry,
    active: Vec<RuleId>,
    catalog: &'a dyn Catalog,
    max_groups: usize,
}

impl<'a> TransformationEngine<'a> {
    pub fn new(
        registry: &'a RuleRegistry,
        source_type: Option<&str>,
        catalog: &'a dyn Catalog,
        max_groups: usize,
    ) -> Self {
        Self {
            registry,
            active: registry.active_rules(source_type),
            catalog,
            max_groups,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.registry
    }

    /// Rules of `rule_type` worth running on `expr`, most promising first.
    /// Ties keep registry order.
    pub fn applicable_rules(
        &self,
        memo: &Memo,
        expr: &MemoExpr,
        rule_type: RuleType,
        required: Option<&PhysicalPropertySet>,
    ) -> Vec<(RuleId, Promise)> {
        let ctx = OptContext {
            catalog: self.catalog,
            required,
        };
        let mut rules: Vec<(RuleId, Promise)> = self
            .active
            .iter()
            .copied()
            .filter(|&id| {
                let rule = self.registry.rule(id);
                rule.rule_type() == rule_type
                    && !expr.rule_applied(id)
                    && matches(memo, expr.id, &rule.pattern())
            })
            .filter_map(|id| {
                let promise = self.registry.rule(id).promise(expr, memo, &ctx);
                (promise != Promise::None).then_some((id, promise))
            })
            .collect();
        rules.sort_by(|a, b| b.1.cmp(&a.1));
        rules
    }

    /// Runs `rule_id` on `expr` and inserts the rewrites into its group.
    ///
    /// Returns the ids of expressions that were new to the memo. Running the
    /// same rule on the same expression a second time does nothing.
    pub fn apply(&self, memo: &Memo, expr: &MemoExpr, rule_id: RuleId) -> Result<Vec<ExprId>> {
        if !expr.try_mark_rule(rule_id) {
            return Ok(Vec::new());
        }
        let rule = self.registry.rule(rule_id);
        let ctx = OptContext {
            catalog: self.catalog,
            required: None,
        };

        let results = match rule.apply(expr, memo, &ctx) {
            Ok(results) => results,
            Err(e) if !e.is_fatal() => {
                warn!(rule = rule.name(), expr = expr.id, error = %e, "rule failed, skipping");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut inserted = Vec::new();
        for result in results {
            match self.materialize(memo, expr.group_id, result) {
                Ok(Some(id)) => inserted.push(id),
                Ok(None) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(rule = rule.name(), expr = expr.id, error = %e, "dropping rewrite");
                }
                Err(e) => return Err(e),
            }
        }

        if memo.num_groups() > self.max_groups {
            return Err(Error::ResourceExhausted {
                resource: "memo groups",
                limit: self.max_groups,
            });
        }
        trace!(
            rule = rule.name(),
            expr = expr.id,
            new = inserted.len(),
            "applied rule"
        );
        Ok(inserted)
    }

    fn materialize(&self, memo: &Memo, group: GroupId, result: RuleResult) -> Result<Option<ExprId>> {
        let (op, children) = match result {
            RuleResult::Substitution(op, children) => {
                self.check_children(memo, &children)?;
                (op, children)
            }
            RuleResult::NewChildren(op, children) => {
                let children = children
                    .into_iter()
                    .map(|c| self.resolve(memo, c))
                    .collect::<Result<Vec<_>>>()?;
                (op, children)
            }
        };
        if children.contains(&group) {
            return Err(Error::rule(
                op_name(&op),
                format!("rewrite of group {group} refers to itself"),
            ));
        }
        let (id, inserted) = memo.add_expr_to_group(op, children, group);
        Ok(inserted.then_some(id))
    }

    fn resolve(&self, memo: &Memo, child: RuleChild) -> Result<GroupId> {
        match child {
            RuleChild::Group(g) => {
                self.check_children(memo, &[g])?;
                Ok(g)
            }
            RuleChild::NewExpr(op, kids) => {
                let kids = kids
                    .into_iter()
                    .map(|k| self.resolve(memo, k))
                    .collect::<Result<Vec<_>>>()?;
                Ok(memo.add_expr(op, kids).0)
            }
        }
    }

    fn check_children(&self, memo: &Memo, children: &[GroupId]) -> Result<()> {
        let groups = memo.num_groups();
        match children.iter().find(|&&g| g as usize >= groups) {
            Some(g) => Err(Error::rule("rewrite", format!("unknown child group {g}"))),
            None => Ok(()),
        }
    }
}

fn op_name(op: &Operator) -> String {
    match op {
        Operator::Logical(l) => format!("{:?}", l.kind()),
        Operator::Physical(p) => format!("{:?}", p.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::expr::{Expr, JoinType, LogicalOp, TableRef};
    use crate::pattern::Pattern;
    use crate::rule::Rule;

    fn scan(name: &str) -> Operator {
        Operator::Logical(LogicalOp::Scan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    fn join() -> Operator {
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: Expr::eq(Expr::column("a", "k"), Expr::column("b", "k")),
        })
    }

    /// Swaps join inputs; promise is configurable.
    struct Swap(Promise);

    impl Rule for Swap {
        fn name(&self) -> &str {
            "Swap"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }
        fn pattern(&self) -> Pattern {
            Pattern::join()
        }
        fn promise(&self, _: &MemoExpr, _: &Memo, _: &OptContext) -> Promise {
            self.0
        }
        fn apply(&self, expr: &MemoExpr, _: &Memo, _: &OptContext) -> Result<Vec<RuleResult>> {
            Ok(vec![RuleResult::Substitution(
                expr.op.clone(),
                vec![expr.children[1], expr.children[0]],
            )])
        }
    }

    struct Broken;

    impl Rule for Broken {
        fn name(&self) -> &str {
            "Broken"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }
        fn pattern(&self) -> Pattern {
            Pattern::Any
        }
        fn apply(&self, expr: &MemoExpr, _: &Memo, _: &OptContext) -> Result<Vec<RuleResult>> {
            Ok(vec![
                RuleResult::Substitution(expr.op.clone(), vec![999]),
                RuleResult::Substitution(expr.op.clone(), vec![expr.group_id]),
            ])
        }
    }

    fn setup() -> (Memo, GroupId, ExprId) {
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (g, e) = memo.add_expr(join(), vec![a, b]);
        (memo, g, e)
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (memo, g, e) = setup();
        let mut registry = RuleRegistry::new();
        let swap = registry.add_rule(Box::new(Swap(Promise::High)));
        let catalog = InMemoryCatalog::new();
        let engine = TransformationEngine::new(&registry, None, &catalog, 100);

        let expr = memo.expr(e);
        assert_eq!(engine.apply(&memo, &expr, swap).unwrap().len(), 1);
        assert!(engine.apply(&memo, &expr, swap).unwrap().is_empty());

        // The swapped copy swaps back into the original, which is already there.
        let swapped = memo.expr(memo.group(g).logical_exprs()[1]);
        assert!(engine.apply(&memo, &swapped, swap).unwrap().is_empty());
        assert_eq!(memo.group(g).num_exprs(), 2);
    }

    #[test]
    fn test_no_promise_means_not_applicable() {
        let (memo, g, e) = setup();
        let mut registry = RuleRegistry::new();
        registry.add_rule(Box::new(Swap(Promise::None)));
        let catalog = InMemoryCatalog::new();
        let engine = TransformationEngine::new(&registry, None, &catalog, 100);

        let rules = engine.applicable_rules(&memo, &memo.expr(e), RuleType::Transformation, None);
        assert!(rules.is_empty());
        assert_eq!(memo.group(g).num_exprs(), 1);
    }

    #[test]
    fn test_promise_orders_rules() {
        let (memo, _, e) = setup();
        let mut registry = RuleRegistry::new();
        let low = registry.add_rule(Box::new(Swap(Promise::Low)));
        let high = registry.add_rule(Box::new(Swap(Promise::High)));
        let catalog = InMemoryCatalog::new();
        let engine = TransformationEngine::new(&registry, None, &catalog, 100);

        let rules = engine.applicable_rules(&memo, &memo.expr(e), RuleType::Transformation, None);
        assert_eq!(rules, vec![(high, Promise::High), (low, Promise::Low)]);
        assert!(engine
            .applicable_rules(&memo, &memo.expr(e), RuleType::Implementation, None)
            .is_empty());
    }

    #[test]
    fn test_malformed_rewrites_are_dropped() {
        let (memo, g, e) = setup();
        let mut registry = RuleRegistry::new();
        let broken = registry.add_rule(Box::new(Broken));
        let catalog = InMemoryCatalog::new();
        let engine = TransformationEngine::new(&registry, None, &catalog, 100);

        let inserted = engine.apply(&memo, &memo.expr(e), broken).unwrap();
        assert!(inserted.is_empty());
        assert_eq!(memo.group(g).num_exprs(), 1);
    }

    #[test]
    fn test_memo_limit_is_fatal() {
        let (memo, _, e) = setup();
        let mut registry = RuleRegistry::new();
        let swap = registry.add_rule(Box::new(Swap(Promise::High)));
        let catalog = InMemoryCatalog::new();
        let engine = TransformationEngine::new(&registry, None, &catalog, 2);

        let err = engine.apply(&memo, &memo.expr(e), swap).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { resource: "memo groups", .. }));
    }
}
