//! # Memo
//!
//! The memo is the search space: a DAG of groups, each an equivalence class of
//! expressions, where every expression is one operator over child *groups*.
//! It only grows during a search. Nothing is removed until the memo is dropped.
//!
//! All workers of a search share one memo, so every method takes `&self`:
//!
//! - The expression index (`(operator, children)` to expression id) is a
//!   `DashMap`. Insertion goes through its entry API, which makes
//!   "insert unless present" atomic per signature. Enforcers are also keyed by
//!   the group they enforce: `Sort(c)` enforcing `c` and the implementation of
//!   a logical `ORDER BY` over `c` are the same operator over the same input,
//!   but belong to different groups.
//! - Group and expression tables are append-only vectors of `Arc`s behind
//!   `RwLock`s; readers clone the `Arc` and let go of the lock.
//! - Everything that changes inside a group (its expression lists, phase flags,
//!   statistics and winners) sits behind that group's own mutex.
//!
//! Locks are taken in the order index shard, table lock, group mutex, and never
//! the other way round.

use crate::catalog::Catalog;
use crate::cost::Cost;
use crate::expr::{Operator, PhysicalOp};
use crate::properties::{child_requirements, PhysicalPropertySet};
use crate::rule::RuleId;
use crate::stats::{derive_stats, Statistics};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type GroupId = u32;
pub type ExprId = u32;

/// `(operator, children, enforced group)`. The last part is only set for
/// self-referencing expressions.
type Signature = (Operator, Vec<GroupId>, Option<GroupId>);

fn signature(op: &Operator, children: &[GroupId], group: Option<GroupId>) -> Signature {
    let enforces = group.filter(|g| children.contains(g));
    (op.clone(), children.to_vec(), enforces)
}

/// One operator over child groups, owned by exactly one group.
#[derive(Debug)]
pub struct MemoExpr {
    pub id: ExprId,
    pub group_id: GroupId,
    pub op: Operator,
    pub children: Vec<GroupId>,
    applied_rules: Mutex<HashSet<RuleId>>,
    explored: AtomicBool,
    implemented: AtomicBool,
}

impl MemoExpr {
    fn new(id: ExprId, group_id: GroupId, op: Operator, children: Vec<GroupId>) -> Self {
        Self {
            id,
            group_id,
            op,
            children,
            applied_rules: Mutex::new(HashSet::new()),
            explored: AtomicBool::new(false),
            implemented: AtomicBool::new(false),
        }
    }

    pub fn rule_applied(&self, rule: RuleId) -> bool {
        self.applied_rules.lock().contains(&rule)
    }

    /// Records `rule` as applied. Returns false if it already was.
    pub fn try_mark_rule(&self, rule: RuleId) -> bool {
        self.applied_rules.lock().insert(rule)
    }

    /// Enforcers sit in the group they enforce and list it as their input.
    pub fn is_self_referencing(&self) -> bool {
        self.children.contains(&self.group_id)
    }

    pub fn is_explored(&self) -> bool {
        self.explored.load(Ordering::Acquire)
    }

    pub fn set_explored(&self) {
        self.explored.store(true, Ordering::Release);
    }

    pub fn is_implemented(&self) -> bool {
        self.implemented.load(Ordering::Acquire)
    }

    pub fn set_implemented(&self) {
        self.implemented.store(true, Ordering::Release);
    }
}

/// Cheapest known plan of a group under one requirement.
#[derive(Debug, Clone)]
pub struct Winner {
    pub expr_id: ExprId,
    pub cost: Cost,
    /// What the winning plan actually provides; at least the requirement.
    pub delivered: PhysicalPropertySet,
}

#[derive(Debug, Default)]
struct GroupState {
    logical_exprs: Vec<ExprId>,
    physical_exprs: Vec<ExprId>,
    explored: bool,
    implemented: bool,
    optimized: HashSet<PhysicalPropertySet>,
    stats: Option<Arc<Statistics>>,
    winners: HashMap<PhysicalPropertySet, Winner>,
}

#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    state: Mutex<GroupState>,
}

impl Group {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn logical_exprs(&self) -> Vec<ExprId> {
        self.state.lock().logical_exprs.clone()
    }

    pub fn physical_exprs(&self) -> Vec<ExprId> {
        self.state.lock().physical_exprs.clone()
    }

    /// Logical expressions followed by physical ones.
    pub fn exprs(&self) -> Vec<ExprId> {
        let state = self.state.lock();
        state
            .logical_exprs
            .iter()
            .chain(state.physical_exprs.iter())
            .copied()
            .collect()
    }

    pub fn num_exprs(&self) -> usize {
        let state = self.state.lock();
        state.logical_exprs.len() + state.physical_exprs.len()
    }

    pub fn is_explored(&self) -> bool {
        self.state.lock().explored
    }

    pub fn set_explored(&self) {
        self.state.lock().explored = true;
    }

    pub fn is_implemented(&self) -> bool {
        self.state.lock().implemented
    }

    pub fn set_implemented(&self) {
        self.state.lock().implemented = true;
    }

    pub fn is_optimized(&self, required: &PhysicalPropertySet) -> bool {
        self.state.lock().optimized.contains(required)
    }

    pub fn set_optimized(&self, required: &PhysicalPropertySet) {
        self.state.lock().optimized.insert(required.clone());
    }

    pub fn stats(&self) -> Option<Arc<Statistics>> {
        self.state.lock().stats.clone()
    }

    pub fn winner(&self, required: &PhysicalPropertySet) -> Option<Winner> {
        self.state.lock().winners.get(required).cloned()
    }

    /// Keeps `candidate` if it beats the current winner for `required`.
    /// Returns whether it was kept.
    pub fn offer_winner(&self, required: &PhysicalPropertySet, candidate: Winner) -> bool {
        let mut state = self.state.lock();
        match state.winners.get(required) {
            Some(current) if current.cost <= candidate.cost => false,
            _ => {
                state.winners.insert(required.clone(), candidate);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: RwLock<Vec<Arc<Group>>>,
    exprs: RwLock<Vec<Arc<MemoExpr>>>,
    index: DashMap<Signature, ExprId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.read().len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.read().len()
    }

    /// # Panics
    ///
    /// If no group has id `id`.
    pub fn group(&self, id: GroupId) -> Arc<Group> {
        Arc::clone(&self.groups.read()[id as usize])
    }

    /// # Panics
    ///
    /// If no expression has id `id`.
    pub fn expr(&self, id: ExprId) -> Arc<MemoExpr> {
        Arc::clone(&self.exprs.read()[id as usize])
    }

    pub fn find_expr(&self, op: &Operator, children: &[GroupId]) -> Option<ExprId> {
        self.index
            .get(&signature(op, children, None))
            .map(|e| *e.value())
    }

    /// Inserts an expression in a fresh group, or returns the existing copy.
    pub fn add_expr(&self, op: Operator, children: Vec<GroupId>) -> (GroupId, ExprId) {
        match self.index.entry(signature(&op, &children, None)) {
            Entry::Occupied(e) => {
                let id = *e.get();
                (self.expr(id).group_id, id)
            }
            Entry::Vacant(slot) => {
                let group_id = {
                    let mut groups = self.groups.write();
                    let id = groups.len() as GroupId;
                    groups.push(Arc::new(Group::new(id)));
                    id
                };
                let expr_id = self.push_expr(group_id, op, children);
                slot.insert(expr_id);
                (group_id, expr_id)
            }
        }
    }

    /// Inserts an expression into `group_id`.
    ///
    /// Returns the expression id and whether it was newly inserted. A
    /// structurally identical expression already in the memo makes this a
    /// no-op that returns the existing id. An enforcer of `group_id` only
    /// matches an enforcer of the same group.
    pub fn add_expr_to_group(
        &self,
        op: Operator,
        children: Vec<GroupId>,
        group_id: GroupId,
    ) -> (ExprId, bool) {
        match self.index.entry(signature(&op, &children, Some(group_id))) {
            Entry::Occupied(e) => (*e.get(), false),
            Entry::Vacant(slot) => {
                let expr_id = self.push_expr(group_id, op, children);
                slot.insert(expr_id);
                (expr_id, true)
            }
        }
    }

    fn push_expr(&self, group_id: GroupId, op: Operator, children: Vec<GroupId>) -> ExprId {
        let logical = op.is_logical();
        let expr_id = {
            let mut exprs = self.exprs.write();
            let id = exprs.len() as ExprId;
            exprs.push(Arc::new(MemoExpr::new(id, group_id, op, children)));
            id
        };
        let group = self.group(group_id);
        let mut state = group.state.lock();
        if logical {
            state.logical_exprs.push(expr_id);
        } else {
            state.physical_exprs.push(expr_id);
        }
        expr_id
    }

    /// Statistics of a group, derived and cached on first use.
    ///
    /// The first expression that is not an enforcer represents the group; every
    /// expression of a group describes the same rows. Two threads racing here
    /// derive the same numbers and the first to store wins.
    pub fn ensure_stats(&self, group_id: GroupId, catalog: &dyn Catalog) -> Arc<Statistics> {
        let group = self.group(group_id);
        if let Some(stats) = group.stats() {
            return stats;
        }
        let representative = group
            .exprs()
            .into_iter()
            .map(|id| self.expr(id))
            .find(|e| !e.is_self_referencing());
        let derived = match representative {
            Some(expr) => {
                let inputs: Vec<Statistics> = expr
                    .children
                    .iter()
                    .map(|&c| self.ensure_stats(c, catalog).as_ref().clone())
                    .collect();
                derive_stats(&expr.op, &inputs, catalog)
            }
            None => Statistics::unknown(),
        };
        let mut state = group.state.lock();
        Arc::clone(state.stats.get_or_insert_with(|| Arc::new(derived)))
    }

    /// Rebuilds the winning plan of `root` under `required`.
    pub fn extract_best_plan(
        &self,
        root: GroupId,
        required: &PhysicalPropertySet,
    ) -> Option<PlanNode> {
        let winner = self.group(root).winner(required)?;
        let expr = self.expr(winner.expr_id);
        let op = expr.op.as_physical()?.clone();
        let child_reqs = child_requirements(&op, expr.children.len(), required);
        let children = expr
            .children
            .iter()
            .zip(child_reqs.iter())
            .map(|(&child, req)| self.extract_best_plan(child, req))
            .collect::<Option<Vec<_>>>()?;
        Some(PlanNode {
            group_id: root,
            op,
            cost: winner.cost,
            delivered: winner.delivered,
            children,
        })
    }
}

/// A fully physical plan, one node per chosen expression.
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub group_id: GroupId,
    pub op: PhysicalOp,
    pub cost: Cost,
    pub delivered: PhysicalPropertySet,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a PlanNode>) {
        out.push(self);
        for c in &self.children {
            c.walk(out);
        }
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} [group={} cost={:.2}]",
            "",
            self.op,
            self.group_id,
            self.cost.total,
            indent = indent * 2
        )?;
        for c in &self.children {
            c.write_indented(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::expr::{Expr, JoinType, LogicalOp, SortKey, TableRef};
    use std::thread;

    fn scan(name: &str) -> Operator {
        Operator::Logical(LogicalOp::Scan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    fn join(l: &str, r: &str) -> Operator {
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: Expr::eq(Expr::column(l, "k"), Expr::column(r, "k")),
        })
    }

    #[test]
    fn test_dedup_by_signature() {
        let memo = Memo::new();
        let (a, ea) = memo.add_expr(scan("a"), vec![]);
        let (a2, ea2) = memo.add_expr(scan("a"), vec![]);
        assert_eq!((a, ea), (a2, ea2));

        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (ab, _) = memo.add_expr(join("a", "b"), vec![a, b]);
        let (id, inserted) = memo.add_expr_to_group(join("a", "b"), vec![b, a], ab);
        assert!(inserted);
        let (again, inserted) = memo.add_expr_to_group(join("a", "b"), vec![b, a], ab);
        assert!(!inserted);
        assert_eq!(id, again);
        assert_eq!(memo.group(ab).logical_exprs().len(), 2);
        assert_eq!(memo.num_groups(), 3);
    }

    #[test]
    fn test_enforcer_and_sort_implementation_stay_apart() {
        let order = vec![SortKey::asc(Expr::column("a", "k"))];
        let sort_op = Operator::Physical(PhysicalOp::SortOp {
            order: order.clone(),
        });

        // ORDER BY implemented first, enforcer second.
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (sorted, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Sort {
                order: order.clone(),
            }),
            vec![a],
        );
        let (implemented, inserted) = memo.add_expr_to_group(sort_op.clone(), vec![a], sorted);
        assert!(inserted);
        let (enforcer, inserted) = memo.add_expr_to_group(sort_op.clone(), vec![a], a);
        assert!(inserted);
        assert_ne!(implemented, enforcer);
        assert_eq!(memo.expr(enforcer).group_id, a);
        assert!(memo.expr(enforcer).is_self_referencing());
        assert_eq!(memo.group(a).physical_exprs(), vec![enforcer]);
        assert_eq!(memo.group(sorted).physical_exprs(), vec![implemented]);

        // Enforcer first.
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (enforcer, _) = memo.add_expr_to_group(sort_op.clone(), vec![a], a);
        let (sorted, _) = memo.add_expr(Operator::Logical(LogicalOp::Sort { order }), vec![a]);
        let (implemented, inserted) = memo.add_expr_to_group(sort_op.clone(), vec![a], sorted);
        assert!(inserted);
        assert_eq!(memo.expr(implemented).group_id, sorted);

        // Both still deduplicate within their own group.
        assert_eq!(memo.add_expr_to_group(sort_op.clone(), vec![a], a), (enforcer, false));
        assert_eq!(memo.add_expr_to_group(sort_op, vec![a], sorted), (implemented, false));
    }

    #[test]
    fn test_concurrent_insert_same_expression() {
        let memo = Arc::new(Memo::new());
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (ab, _) = memo.add_expr(join("a", "b"), vec![a, b]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let memo = Arc::clone(&memo);
                thread::spawn(move || memo.add_expr_to_group(join("a", "b"), vec![b, a], ab))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, inserted)| *inserted).count(), 1);
        assert!(results.iter().all(|(id, _)| *id == results[0].0));
        assert_eq!(memo.group(ab).num_exprs(), 2);
    }

    #[test]
    fn test_offer_winner_keeps_cheapest() {
        let memo = Memo::new();
        let (g, e) = memo.add_expr(scan("a"), vec![]);
        let group = memo.group(g);
        let any = PhysicalPropertySet::any();
        let win = |cost: f64| Winner {
            expr_id: e,
            cost: Cost::new(cost),
            delivered: PhysicalPropertySet::any(),
        };

        assert!(group.offer_winner(&any, win(10.0)));
        assert!(!group.offer_winner(&any, win(12.0)));
        assert!(group.offer_winner(&any, win(3.0)));
        assert_eq!(group.winner(&any).map(|w| w.cost), Some(Cost::new(3.0)));

        let sorted = PhysicalPropertySet::with_sort(vec![SortKey::asc(Expr::column("a", "k"))]);
        assert!(group.winner(&sorted).is_none());
    }

    #[test]
    fn test_stats_cached_once() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let first = memo.ensure_stats(a, &catalog);
        let second = memo.ensure_stats(a, &catalog);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_rule_marks() {
        let memo = Memo::new();
        let (_, e) = memo.add_expr(scan("a"), vec![]);
        let expr = memo.expr(e);
        assert!(expr.try_mark_rule(RuleId(3)));
        assert!(!expr.try_mark_rule(RuleId(3)));
        assert!(expr.rule_applied(RuleId(3)));
        assert!(!expr.rule_applied(RuleId(4)));
    }
}
