//! # Rule Contract
//!
//! Rules are the pluggable rewrites of the search. Two kinds exist:
//!
//! - **Transformation** rules rewrite a logical expression into equivalent
//!   logical expressions (join commutativity, predicate pushdown).
//! - **Implementation** rules map a logical expression onto physical
//!   alternatives (Join to HashJoin, MergeJoin, NestedLoopJoin).
//!
//! Applying a rule to an expression goes through three gates, cheapest first:
//!
//! 1. the rule's structural [`Pattern`] must match,
//! 2. [`Rule::promise`] must return something better than [`Promise::None`],
//! 3. [`Rule::apply`] produces the rewrites.
//!
//! Rules are registered once in a [`RuleRegistry`] and identified by the
//! [`RuleId`] they were assigned. They hold no execution state; the memo
//! remembers which rules already fired on which expression.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::expr::Operator;
use crate::memo::{GroupId, Memo, MemoExpr};
use crate::pattern::Pattern;
use crate::properties::PhysicalPropertySet;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Transformation,
    Implementation,
}

/// Index of a rule in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u16);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How worthwhile a rule looks for one expression. `None` means the rule does
/// not apply at all; the rest order the transformation jobs of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Promise {
    None,
    Low,
    Medium,
    High,
}

/// What a rule may look at besides the expression and the memo.
pub struct OptContext<'a> {
    pub catalog: &'a dyn Catalog,
    /// The requirement being pursued, when the caller is optimizing for one.
    pub required: Option<&'a PhysicalPropertySet>,
}

/// A child of a rewritten expression.
///
/// `NewExpr` lets a rule describe an intermediate expression that has no group
/// yet, as join associativity does for the inner join of `A ⋈ (B ⋈ C)`. The
/// engine inserts such children bottom-up, reusing an existing group when an
/// identical expression is already in the memo.
#[derive(Debug, Clone)]
pub enum RuleChild {
    Group(GroupId),
    NewExpr(Operator, Vec<RuleChild>),
}

/// One rewrite produced by a rule, to be added to the group of the matched
/// expression.
#[derive(Debug, Clone)]
pub enum RuleResult {
    Substitution(Operator, Vec<GroupId>),
    NewChildren(Operator, Vec<RuleChild>),
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    fn pattern(&self) -> Pattern;

    /// Cheap applicability check, only called on pattern matches. It is
    /// evaluated afresh every time and must not depend on having been called
    /// before.
    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::Medium
    }

    /// Rewrites of `expr`. An `Err` from here is logged and the rewrite dropped;
    /// it does not stop the search.
    fn apply(&self, expr: &MemoExpr, memo: &Memo, ctx: &OptContext) -> Result<Vec<RuleResult>>;
}

/// A named set of rules that only fire for one connector.
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Immutable after construction; shared across searches behind an `Arc`.
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
    base: Vec<RuleId>,
    source_rules: HashMap<String, Vec<RuleId>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            base: Vec::new(),
            source_rules: HashMap::new(),
        }
    }

    fn register(&mut self, rule: Box<dyn Rule>) -> RuleId {
        let id = RuleId(self.rules.len() as u16);
        self.rules.push(rule);
        id
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) -> RuleId {
        let id = self.register(rule);
        self.base.push(id);
        id
    }

    pub fn add_source_rule_set(&mut self, rule_set: RuleSet) {
        let ids = rule_set
            .rules
            .into_iter()
            .map(|r| self.register(r))
            .collect::<Vec<_>>();
        self.source_rules
            .entry(rule_set.name)
            .or_default()
            .extend(ids);
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this registry.
    pub fn rule(&self, id: RuleId) -> &dyn Rule {
        self.rules[id.0 as usize].as_ref()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Base rules followed by the rule set registered for `source`, if any.
    pub fn active_rules(&self, source: Option<&str>) -> Vec<RuleId> {
        let mut ids = self.base.clone();
        if let Some(extra) = source.and_then(|s| self.source_rules.get(s)) {
            ids.extend(extra.iter().copied());
        }
        ids
    }

    /// Every registered rule with the rule set it belongs to (`None` for base rules).
    pub fn describe(&self) -> Vec<(RuleId, &dyn Rule, Option<&str>)> {
        let mut owner: HashMap<RuleId, &str> = HashMap::new();
        for (name, ids) in &self.source_rules {
            for id in ids {
                owner.insert(*id, name.as_str());
            }
        }
        self.rules
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let id = RuleId(i as u16);
                (id, r.as_ref(), owner.get(&id).copied())
            })
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
