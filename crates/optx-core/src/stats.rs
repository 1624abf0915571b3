//! # Statistics
//!
//! Table statistics come from the [`Catalog`]; statistics of every other group
//! are derived bottom-up from its children with the usual textbook formulas:
//!
//! - **Filter**: `rows * selectivity`, column NDVs scaled by the same ratio.
//! - **Join**: `|L| * |R| / max(NDV(l.key), NDV(r.key))` per equi-join key.
//! - **Aggregate**: product of group-by NDVs, capped by input rows.
//!
//! Selectivity uses `1 / NDV` for equality, a flat third for ranges, products for
//! AND and inclusion-exclusion for OR. Missing numbers fall back to
//! [`DEFAULT_FILTER_SELECTIVITY`].
//!
//! Group statistics are derived lazily, once, when costing first needs them;
//! see [`Memo::ensure_stats`](crate::memo::Memo::ensure_stats).

use crate::catalog::Catalog;
use crate::expr::{BinaryOp, Expr, LogicalOp, Operator, PhysicalOp, ScalarValue};
use crate::properties::equi_join_pairs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;
pub const RANGE_SELECTIVITY: f64 = 0.33;

const UNKNOWN_TABLE_ROWS: f64 = 1000.0;
const DEFAULT_ROW_BYTES: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    #[serde(default)]
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    /// Stand-in for tables the catalog does not know.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_TABLE_ROWS, UNKNOWN_TABLE_ROWS * DEFAULT_ROW_BYTES)
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    fn avg_row_size(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            DEFAULT_ROW_BYTES
        }
    }

    fn ndv(&self, column: &str) -> f64 {
        self.column_stats
            .get(column)
            .map(|c| c.distinct_count)
            .unwrap_or(self.row_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub distinct_count: f64,
    /// In `[0, 1]`.
    pub null_fraction: f64,
    #[serde(default)]
    pub min_value: Option<ScalarValue>,
    #[serde(default)]
    pub max_value: Option<ScalarValue>,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
        }
    }
}

/// Statistics of an operator's output given its children's statistics.
///
/// Logical and physical operators of the same shape derive identically, so a
/// group seeded with only physical expressions still gets numbers.
pub fn derive_stats(op: &Operator, children: &[Statistics], catalog: &dyn Catalog) -> Statistics {
    let child = |i: usize| children.get(i).cloned().unwrap_or_else(Statistics::unknown);
    match op {
        Operator::Logical(LogicalOp::Scan {
            table, predicate, ..
        })
        | Operator::Physical(PhysicalOp::SeqScan {
            table, predicate, ..
        }) => {
            let base = catalog
                .get_table_stats(table)
                .unwrap_or_else(Statistics::unknown);
            match predicate {
                Some(p) => derive_filter_stats(&base, estimate_selectivity(p, &base)),
                None => base,
            }
        }
        Operator::Logical(LogicalOp::Filter { predicate })
        | Operator::Physical(PhysicalOp::Filter { predicate }) => {
            let input = child(0);
            derive_filter_stats(&input, estimate_selectivity(predicate, &input))
        }
        Operator::Logical(LogicalOp::Join { condition, .. })
        | Operator::Physical(PhysicalOp::HashJoin { condition, .. })
        | Operator::Physical(PhysicalOp::MergeJoin { condition, .. })
        | Operator::Physical(PhysicalOp::NestedLoopJoin { condition, .. }) => {
            derive_join_stats(&child(0), &child(1), &equi_join_columns(condition))
        }
        Operator::Logical(LogicalOp::Aggregate { group_by, .. })
        | Operator::Physical(PhysicalOp::HashAggregate { group_by, .. })
        | Operator::Physical(PhysicalOp::StreamAggregate { group_by, .. }) => {
            let cols: Vec<String> = group_by
                .iter()
                .filter_map(|e| match e {
                    Expr::Column(c) => Some(c.name.clone()),
                    _ => None,
                })
                .collect();
            derive_aggregate_stats(&child(0), &cols)
        }
        Operator::Logical(LogicalOp::Limit { count, .. })
        | Operator::Physical(PhysicalOp::Limit { count, .. }) => {
            let input = child(0);
            let rows = input.row_count.min(*count as f64).max(1.0);
            derive_filter_stats(&input, rows / input.row_count.max(1.0))
        }
        _ => child(0),
    }
}

/// `|A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))`, multiplied across
/// keys. Column NDVs are capped at the output row count.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_columns: &[(String, String)],
) -> Statistics {
    let selectivity = join_columns
        .iter()
        .map(|(l, r)| 1.0 / left.ndv(l).max(right.ndv(r)).max(1.0))
        .product::<f64>();
    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);

    let column_stats = left
        .column_stats
        .iter()
        .chain(right.column_stats.iter())
        .map(|(name, cs)| {
            let mut cs = cs.clone();
            cs.distinct_count = cs.distinct_count.min(row_count);
            (name.clone(), cs)
        })
        .collect();

    Statistics {
        row_count,
        total_size_bytes: row_count * (left.avg_row_size() + right.avg_row_size()),
        column_stats,
    }
}

pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };
    let column_stats = input
        .column_stats
        .iter()
        .map(|(name, cs)| {
            let mut cs = cs.clone();
            cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
            (name.clone(), cs)
        })
        .collect();

    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// One row for a global aggregate; otherwise the product of group-by NDVs,
/// never more than the input.
pub fn derive_aggregate_stats(input: &Statistics, group_by_cols: &[String]) -> Statistics {
    let groups = group_by_cols
        .iter()
        .map(|c| input.ndv(c))
        .product::<f64>()
        .min(input.row_count)
        .max(1.0);
    Statistics::new(groups, groups * DEFAULT_ROW_BYTES)
}

pub fn equality_selectivity(stats: &Statistics, col_name: &str) -> f64 {
    stats
        .column_stats
        .get(col_name)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Fraction of rows in `[0, 1]` expected to pass `expr`.
pub fn estimate_selectivity(expr: &Expr, stats: &Statistics) -> f64 {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), _) | (_, Expr::Column(c)) => equality_selectivity(stats, &c.name),
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::BinaryOp {
            op: BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq,
            ..
        } => RANGE_SELECTIVITY,
        Expr::And(conjuncts) => conjuncts
            .iter()
            .map(|c| estimate_selectivity(c, stats))
            .product(),
        Expr::Or(disjuncts) => {
            1.0 - disjuncts
                .iter()
                .map(|d| 1.0 - estimate_selectivity(d, stats))
                .product::<f64>()
        }
        Expr::Literal(ScalarValue::Bool(true)) => 1.0,
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

/// Column-name pairs of the `col = col` conjuncts in a join condition.
pub fn equi_join_columns(condition: &Expr) -> Vec<(String, String)> {
    equi_join_pairs(condition)
        .into_iter()
        .filter_map(|(l, r)| match (l, r) {
            (Expr::Column(l), Expr::Column(r)) => Some((l.name, r.name)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::expr::{JoinType, TableRef};

    fn orders() -> Statistics {
        Statistics::new(1_500_000.0, 150_000_000.0)
            .with_column("o_custkey", ColumnStatistics::new(150_000.0, 0.0))
    }

    fn customer() -> Statistics {
        Statistics::new(150_000.0, 15_000_000.0)
            .with_column("c_custkey", ColumnStatistics::new(150_000.0, 0.0))
    }

    #[test]
    fn test_join_cardinality() {
        let joined = derive_join_stats(
            &orders(),
            &customer(),
            &[("o_custkey".into(), "c_custkey".into())],
        );
        assert!((joined.row_count - 1_500_000.0).abs() < 1.0);
    }

    #[test]
    fn test_selectivity_combinators() {
        let stats = customer();
        let eq = Expr::eq(
            Expr::column("customer", "c_custkey"),
            Expr::Literal(ScalarValue::Int64(7)),
        );
        let range = Expr::BinaryOp {
            op: BinaryOp::Gt,
            left: Box::new(Expr::column("customer", "c_custkey")),
            right: Box::new(Expr::Literal(ScalarValue::Int64(7))),
        };
        let and = estimate_selectivity(&Expr::And(vec![eq.clone(), range.clone()]), &stats);
        assert!((and - RANGE_SELECTIVITY / 150_000.0).abs() < 1e-12);

        let or = estimate_selectivity(&Expr::Or(vec![range.clone(), range]), &stats);
        assert!(or > RANGE_SELECTIVITY && or < 2.0 * RANGE_SELECTIVITY);
    }

    #[test]
    fn test_global_aggregate_is_one_row() {
        assert_eq!(derive_aggregate_stats(&orders(), &[]).row_count, 1.0);
        let by_cust = derive_aggregate_stats(&orders(), &["o_custkey".to_string()]);
        assert_eq!(by_cust.row_count, 150_000.0);
    }

    #[test]
    fn test_scan_and_join_derivation() {
        let mut catalog = InMemoryCatalog::new();
        let o = TableRef::new("tpch", "orders");
        let c = TableRef::new("tpch", "customer");
        catalog.add_table(&o, vec![], orders());
        catalog.add_table(&c, vec![], customer());

        let scan = |t: &TableRef| {
            Operator::Logical(LogicalOp::Scan {
                table: t.clone(),
                columns: vec![],
                predicate: None,
            })
        };
        let left = derive_stats(&scan(&o), &[], &catalog);
        let right = derive_stats(&scan(&c), &[], &catalog);
        assert_eq!(left.row_count, 1_500_000.0);

        let join = Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: Expr::eq(
                Expr::column("orders", "o_custkey"),
                Expr::column("customer", "c_custkey"),
            ),
        });
        let out = derive_stats(&join, &[left, right], &catalog);
        assert!((out.row_count - 1_500_000.0).abs() < 1.0);

        let unknown = derive_stats(&scan(&TableRef::new("x", "y")), &[], &catalog);
        assert_eq!(unknown.row_count, 1000.0);
    }
}
