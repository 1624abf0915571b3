//! Shared builders for the end-to-end tests.

#![allow(dead_code)]

use optx_core::catalog::InMemoryCatalog;
use optx_core::cost::DefaultCostModel;
use optx_core::expr::*;
use optx_core::memo::{GroupId, Memo};
use optx_core::rule::RuleRegistry;
use optx_core::search::{CascadesSearch, SearchConfig};
use optx_core::stats::{ColumnStatistics, Statistics};
use std::sync::Arc;

pub fn equi(lt: &str, lc: &str, rt: &str, rc: &str) -> Expr {
    Expr::eq(Expr::column(lt, lc), Expr::column(rt, rc))
}

pub fn scan(name: &str) -> Operator {
    Operator::Logical(LogicalOp::Scan {
        table: TableRef::new("tpch", name),
        columns: vec![],
        predicate: None,
    })
}

pub fn join(condition: Expr) -> Operator {
    Operator::Logical(LogicalOp::Join {
        join_type: JoinType::Inner,
        condition,
    })
}

/// Registers `name` with `rows` rows and the given `(column, ndv)` pairs.
pub fn add_table(catalog: &mut InMemoryCatalog, name: &str, rows: f64, cols: &[(&str, f64)]) {
    let columns = cols
        .iter()
        .enumerate()
        .map(|(i, (col, _))| ColumnRef::new(name, *col, i as u32))
        .collect();
    let stats = cols.iter().fold(Statistics::new(rows, rows * 100.0), |s, (col, ndv)| {
        s.with_column(*col, ColumnStatistics::new(*ndv, 0.0))
    });
    catalog.add_table(&TableRef::new("tpch", name), columns, stats);
}

/// The six TPC-H tables of Q5 at scale factor 1.
pub fn tpch_catalog() -> InMemoryCatalog {
    let mut c = InMemoryCatalog::new();
    add_table(&mut c, "region", 5.0, &[("r_regionkey", 5.0), ("r_name", 5.0)]);
    add_table(
        &mut c,
        "nation",
        25.0,
        &[("n_nationkey", 25.0), ("n_regionkey", 5.0), ("n_name", 25.0)],
    );
    add_table(&mut c, "supplier", 10_000.0, &[("s_suppkey", 10_000.0), ("s_nationkey", 25.0)]);
    add_table(&mut c, "customer", 150_000.0, &[("c_custkey", 150_000.0), ("c_nationkey", 25.0)]);
    add_table(
        &mut c,
        "orders",
        1_500_000.0,
        &[("o_orderkey", 1_500_000.0), ("o_custkey", 150_000.0), ("o_orderdate", 2_500.0)],
    );
    add_table(
        &mut c,
        "lineitem",
        6_001_215.0,
        &[("l_orderkey", 1_500_000.0), ("l_suppkey", 10_000.0), ("l_discount", 11.0)],
    );
    c
}

/// Q5 joined left-deep in query text order:
/// `((((customer ⋈ orders) ⋈ lineitem) ⋈ supplier) ⋈ nation) ⋈ region`.
pub fn tpch_q5_left_deep(memo: &Memo) -> GroupId {
    let (customer, _) = memo.add_expr(scan("customer"), vec![]);
    let (orders, _) = memo.add_expr(scan("orders"), vec![]);
    let (lineitem, _) = memo.add_expr(scan("lineitem"), vec![]);
    let (supplier, _) = memo.add_expr(scan("supplier"), vec![]);
    let (nation, _) = memo.add_expr(scan("nation"), vec![]);
    let (region, _) = memo.add_expr(scan("region"), vec![]);

    let (co, _) = memo.add_expr(
        join(equi("customer", "c_custkey", "orders", "o_custkey")),
        vec![customer, orders],
    );
    let (col, _) = memo.add_expr(
        join(equi("orders", "o_orderkey", "lineitem", "l_orderkey")),
        vec![co, lineitem],
    );
    let (cols, _) = memo.add_expr(
        join(Expr::And(vec![
            equi("lineitem", "l_suppkey", "supplier", "s_suppkey"),
            equi("customer", "c_nationkey", "supplier", "s_nationkey"),
        ])),
        vec![col, supplier],
    );
    let (colsn, _) = memo.add_expr(
        join(equi("supplier", "s_nationkey", "nation", "n_nationkey")),
        vec![cols, nation],
    );
    let (root, _) = memo.add_expr(
        join(equi("nation", "n_regionkey", "region", "r_regionkey")),
        vec![colsn, region],
    );
    root
}

/// Only the implementation rules of the default set: the join order stays
/// as written.
pub fn implementation_only_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.add_rule(Box::new(optx_rules::impl_join::ImplHashJoinRule));
    registry.add_rule(Box::new(optx_rules::impl_join::ImplMergeJoinRule));
    registry.add_rule(Box::new(optx_rules::impl_join::ImplNestedLoopJoinRule));
    registry.add_rule(Box::new(optx_rules::impl_scan::ImplSeqScanRule));
    registry.add_rule(Box::new(optx_rules::impl_agg::ImplHashAggregateRule));
    registry.add_rule(Box::new(optx_rules::impl_agg::ImplStreamAggregateRule));
    registry.add_rule(Box::new(optx_rules::enforcer::ImplSortRule));
    registry.add_rule(Box::new(optx_rules::impl_misc::ImplFilterRule));
    registry.add_rule(Box::new(optx_rules::impl_misc::ImplProjectRule));
    registry.add_rule(Box::new(optx_rules::impl_misc::ImplLimitRule));
    registry
}

pub fn search_with(
    registry: RuleRegistry,
    catalog: InMemoryCatalog,
    config: SearchConfig,
) -> CascadesSearch {
    CascadesSearch::new(
        Arc::new(registry),
        Arc::new(DefaultCostModel::default()),
        Arc::new(catalog),
        config,
    )
}

pub fn default_search(catalog: InMemoryCatalog, workers: usize) -> CascadesSearch {
    search_with(
        optx_rules::default_rule_registry(),
        catalog,
        SearchConfig {
            workers,
            ..SearchConfig::default()
        },
    )
}

pub fn relative_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(1.0)
}
