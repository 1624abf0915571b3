//! # Required and Delivered Properties
//!
//! A [`PhysicalPropertySet`] plays two roles. As a *requirement* it keys the
//! per-group optimization record: a group optimized for `ORDER BY a` and the same
//! group optimized with no requirement are two separate targets, each with its own
//! winner. As a *delivery* it describes what a concrete physical alternative
//! produces, see [`delivered_by`].
//!
//! When nothing in a group delivers a requirement natively, the search may add an
//! enforcer (Sort, Exchange) on top of the group's unconstrained plan. Enforcers
//! compete on cost with native alternatives like MergeJoin.

use crate::expr::{BinaryOp, ColumnRef, Distribution, Expr, PhysicalOp, SortKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Properties shared by every expression of a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalProperties {
    pub output_columns: Vec<ColumnRef>,
    pub row_count: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalPropertySet {
    pub sort_order: Option<Vec<SortKey>>,
    pub distribution: Option<Distribution>,
}

impl PhysicalPropertySet {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_sort(order: Vec<SortKey>) -> Self {
        Self {
            sort_order: Some(order),
            distribution: None,
        }
    }

    pub fn with_distribution(dist: Distribution) -> Self {
        Self {
            sort_order: None,
            distribution: Some(dist),
        }
    }

    pub fn is_any(&self) -> bool {
        self.sort_order.is_none() && self.distribution.is_none()
    }

    /// The same requirement with the ordering dropped. A Sort enforcer asks its
    /// input for this.
    pub fn without_sort(&self) -> Self {
        Self {
            sort_order: None,
            distribution: self.distribution.clone(),
        }
    }

    /// Whether `provided` meets this requirement.
    ///
    /// A sort requirement is met when it is a prefix of the provided order, so
    /// output sorted on `(a, b, c)` satisfies `ORDER BY a, b`. Distributions must
    /// match exactly. An absent requirement is always met.
    pub fn satisfied_by(&self, provided: &PhysicalPropertySet) -> bool {
        let sort_ok = match (&self.sort_order, &provided.sort_order) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => {
                required.len() <= provided.len()
                    && required.iter().zip(provided.iter()).all(|(r, p)| r == p)
            }
        };
        let dist_ok = match (&self.distribution, &provided.distribution) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => required == provided,
        };
        sort_ok && dist_ok
    }
}

impl fmt::Display for PhysicalPropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }
        if let Some(order) = &self.sort_order {
            write!(f, "sort[")?;
            for (i, k) in order.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}{}", k.expr, if k.ascending { "" } else { " desc" })?;
            }
            write!(f, "]")?;
        }
        if let Some(dist) = &self.distribution {
            if self.sort_order.is_some() {
                write!(f, " ")?;
            }
            write!(f, "dist[{dist:?}]")?;
        }
        Ok(())
    }
}

/// Properties a physical operator produces on its own output, given that its
/// inputs were optimized for whatever the operator asked of them.
///
/// Operators that pass their input through unchanged (Filter, Project, Limit)
/// deliver `pass_through`, the delivery of their single input.
pub fn delivered_by(op: &PhysicalOp, pass_through: &PhysicalPropertySet) -> PhysicalPropertySet {
    match op {
        PhysicalOp::SortOp { order } => PhysicalPropertySet {
            sort_order: Some(order.clone()),
            distribution: pass_through.distribution.clone(),
        },
        PhysicalOp::Exchange { distribution } => {
            PhysicalPropertySet::with_distribution(distribution.clone())
        }
        PhysicalOp::MergeJoin { condition, .. } => sorted_on(join_sort_keys(condition)),
        PhysicalOp::StreamAggregate { group_by, .. } => {
            sorted_on(group_by.iter().cloned().map(SortKey::asc).collect())
        }
        PhysicalOp::Filter { .. } | PhysicalOp::Project { .. } | PhysicalOp::Limit { .. } => {
            pass_through.clone()
        }
        _ => PhysicalPropertySet::any(),
    }
}

/// What a physical operator asks of each of its `arity` inputs when it is
/// itself optimized for `required`.
pub fn child_requirements(
    op: &PhysicalOp,
    arity: usize,
    required: &PhysicalPropertySet,
) -> Vec<PhysicalPropertySet> {
    match op {
        PhysicalOp::MergeJoin { condition, .. } => {
            let pairs = equi_join_pairs(condition);
            let left = pairs.iter().map(|(l, _)| SortKey::asc(l.clone())).collect();
            let right = pairs.into_iter().map(|(_, r)| SortKey::asc(r)).collect();
            vec![sorted_on(left), sorted_on(right)]
        }
        PhysicalOp::StreamAggregate { group_by, .. } => {
            vec![sorted_on(group_by.iter().cloned().map(SortKey::asc).collect())]
        }
        PhysicalOp::SortOp { .. } => vec![required.without_sort(); arity],
        PhysicalOp::Filter { .. } | PhysicalOp::Project { .. } => vec![required.clone(); arity],
        _ => vec![PhysicalPropertySet::any(); arity],
    }
}

fn sorted_on(keys: Vec<SortKey>) -> PhysicalPropertySet {
    if keys.is_empty() {
        PhysicalPropertySet::any()
    } else {
        PhysicalPropertySet::with_sort(keys)
    }
}

/// Left-side columns of the equi-join conjuncts, ascending. MergeJoin requires
/// its left input in this order and delivers it.
pub fn join_sort_keys(condition: &Expr) -> Vec<SortKey> {
    equi_join_pairs(condition)
        .into_iter()
        .map(|(l, _)| SortKey::asc(l))
        .collect()
}

/// `(left, right)` column expressions of every `col = col` conjunct.
pub fn equi_join_pairs(condition: &Expr) -> Vec<(Expr, Expr)> {
    condition
        .conjuncts()
        .into_iter()
        .filter_map(|c| match c {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } if matches!(left.as_ref(), Expr::Column(_))
                && matches!(right.as_ref(), Expr::Column(_)) =>
            {
                Some((left.as_ref().clone(), right.as_ref().clone()))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::JoinType;

    fn key(col: &str) -> SortKey {
        SortKey::asc(Expr::column("t", col))
    }

    #[test]
    fn test_sort_prefix_satisfaction() {
        let required = PhysicalPropertySet::with_sort(vec![key("a")]);
        let provided = PhysicalPropertySet::with_sort(vec![key("a"), key("b")]);
        assert!(required.satisfied_by(&provided));
        assert!(!provided.satisfied_by(&required));
        assert!(!required.satisfied_by(&PhysicalPropertySet::any()));
        assert!(PhysicalPropertySet::any().satisfied_by(&provided));
    }

    #[test]
    fn test_without_sort_keeps_distribution() {
        let req = PhysicalPropertySet {
            sort_order: Some(vec![key("a")]),
            distribution: Some(Distribution::Single),
        };
        let stripped = req.without_sort();
        assert_eq!(stripped.sort_order, None);
        assert_eq!(stripped.distribution, Some(Distribution::Single));
    }

    #[test]
    fn test_merge_join_delivers_left_keys() {
        let op = PhysicalOp::MergeJoin {
            join_type: JoinType::Inner,
            condition: Expr::eq(Expr::column("l", "k"), Expr::column("r", "k")),
        };
        let delivered = delivered_by(&op, &PhysicalPropertySet::any());
        let required = PhysicalPropertySet::with_sort(vec![SortKey::asc(Expr::column("l", "k"))]);
        assert!(required.satisfied_by(&delivered));
    }

    #[test]
    fn test_merge_join_sorts_each_side_on_its_own_keys() {
        let op = PhysicalOp::MergeJoin {
            join_type: JoinType::Inner,
            condition: Expr::eq(Expr::column("l", "k"), Expr::column("r", "k")),
        };
        let reqs = child_requirements(&op, 2, &PhysicalPropertySet::any());
        assert_eq!(reqs[0], PhysicalPropertySet::with_sort(vec![SortKey::asc(Expr::column("l", "k"))]));
        assert_eq!(reqs[1], PhysicalPropertySet::with_sort(vec![SortKey::asc(Expr::column("r", "k"))]));

        let global = PhysicalOp::StreamAggregate {
            group_by: vec![],
            aggregates: vec![],
        };
        assert!(child_requirements(&global, 1, &PhysicalPropertySet::any())[0].is_any());
    }

    #[test]
    fn test_filter_passes_through() {
        let op = PhysicalOp::Filter {
            predicate: Expr::Literal(crate::expr::ScalarValue::Bool(true)),
        };
        let child = PhysicalPropertySet::with_sort(vec![key("a")]);
        assert_eq!(delivered_by(&op, &child), child);
    }
}
