//! Join reordering over whole queries: TPC-H Q5 and smaller chains and stars.

mod common;

use common::*;
use optx_core::catalog::InMemoryCatalog;
use optx_core::expr::PhysicalOp;
use optx_core::memo::{GroupId, Memo, PlanNode};
use optx_core::properties::PhysicalPropertySet;
use optx_core::search::SearchConfig;

fn joins(plan: &PlanNode) -> usize {
    let mut nodes = Vec::new();
    plan.walk(&mut nodes);
    nodes
        .iter()
        .filter(|n| {
            matches!(
                n.op,
                PhysicalOp::HashJoin { .. }
                    | PhysicalOp::MergeJoin { .. }
                    | PhysicalOp::NestedLoopJoin { .. }
            )
        })
        .count()
}

fn scans(plan: &PlanNode) -> Vec<String> {
    let mut nodes = Vec::new();
    plan.walk(&mut nodes);
    let mut names: Vec<String> = nodes
        .iter()
        .filter_map(|n| match &n.op {
            PhysicalOp::SeqScan { table, .. } => Some(table.name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

/// `a ⋈ b ⋈ c` over a chain `a.k = b.k`, `b.j = c.j`, grouped as written.
fn chain_catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    add_table(&mut catalog, "a", 1_000_000.0, &[("k", 1_000_000.0)]);
    add_table(&mut catalog, "b", 1_000.0, &[("k", 1_000.0), ("j", 10.0)]);
    add_table(&mut catalog, "c", 10.0, &[("j", 10.0)]);
    catalog
}

fn chain_left_deep(memo: &Memo) -> GroupId {
    let (a, _) = memo.add_expr(scan("a"), vec![]);
    let (b, _) = memo.add_expr(scan("b"), vec![]);
    let (c, _) = memo.add_expr(scan("c"), vec![]);
    let (ab, _) = memo.add_expr(join(equi("a", "k", "b", "k")), vec![a, b]);
    let (root, _) = memo.add_expr(join(equi("b", "j", "c", "j")), vec![ab, c]);
    root
}

fn chain_right_deep(memo: &Memo) -> GroupId {
    let (a, _) = memo.add_expr(scan("a"), vec![]);
    let (b, _) = memo.add_expr(scan("b"), vec![]);
    let (c, _) = memo.add_expr(scan("c"), vec![]);
    let (bc, _) = memo.add_expr(join(equi("b", "j", "c", "j")), vec![b, c]);
    let (root, _) = memo.add_expr(join(equi("a", "k", "b", "k")), vec![a, bc]);
    root
}

#[test]
fn test_tpch_q5_finds_complete_plan() {
    let search = default_search(tpch_catalog(), 4);
    let memo = Memo::new();
    let root = tpch_q5_left_deep(&memo);

    let optimized = search
        .optimize(memo, root, &PhysicalPropertySet::any())
        .expect("Q5 optimizes");
    let plan = &optimized.plan;

    assert_eq!(joins(plan), 5, "plan:\n{plan}");
    assert_eq!(
        scans(plan),
        vec!["customer", "lineitem", "nation", "orders", "region", "supplier"]
    );
    assert!(plan.cost.total.is_finite() && plan.cost.total > 0.0);
    assert!(optimized.stats.job_steps > 0);
}

#[test]
fn test_tpch_q5_reordering_never_costs_more() {
    let naive = {
        let search = search_with(
            implementation_only_registry(),
            tpch_catalog(),
            SearchConfig::default(),
        );
        let memo = Memo::new();
        let root = tpch_q5_left_deep(&memo);
        search
            .optimize(memo, root, &PhysicalPropertySet::any())
            .expect("naive Q5 optimizes")
    };
    let reordered = {
        let search = default_search(tpch_catalog(), 4);
        let memo = Memo::new();
        let root = tpch_q5_left_deep(&memo);
        search
            .optimize(memo, root, &PhysicalPropertySet::any())
            .expect("Q5 optimizes")
    };

    assert!(
        reordered.plan.cost.total <= naive.plan.cost.total * (1.0 + 1e-9),
        "reordered {} > naive {}",
        reordered.plan.cost.total,
        naive.plan.cost.total
    );
    // Reordering creates groups for join subsets the query text never wrote.
    assert!(reordered.stats.memo_groups > naive.stats.memo_groups);
}

#[test]
fn test_chain_groupings_converge() {
    let search = default_search(chain_catalog(), 2);

    let left = Memo::new();
    let left_root = chain_left_deep(&left);
    let from_left = search
        .optimize(left, left_root, &PhysicalPropertySet::any())
        .unwrap();

    let right = Memo::new();
    let right_root = chain_right_deep(&right);
    let from_right = search
        .optimize(right, right_root, &PhysicalPropertySet::any())
        .unwrap();

    assert!(
        relative_diff(from_left.plan.cost.total, from_right.plan.cost.total) < 1e-6,
        "left-deep start {} vs right-deep start {}",
        from_left.plan.cost.total,
        from_right.plan.cost.total
    );
    assert_eq!(joins(&from_left.plan), 2);
    assert_eq!(from_left.stats.memo_groups, from_right.stats.memo_groups);
}

#[test]
fn test_star_join_covers_every_dimension() {
    let mut catalog = InMemoryCatalog::new();
    add_table(
        &mut catalog,
        "sales",
        2_000_000.0,
        &[("d", 365.0), ("s", 50.0), ("h", 7_000.0)],
    );
    add_table(&mut catalog, "date_dim", 365.0, &[("d", 365.0)]);
    add_table(&mut catalog, "store", 50.0, &[("s", 50.0)]);
    add_table(&mut catalog, "household", 7_000.0, &[("h", 7_000.0)]);

    let memo = Memo::new();
    let (sales, _) = memo.add_expr(scan("sales"), vec![]);
    let (date, _) = memo.add_expr(scan("date_dim"), vec![]);
    let (store, _) = memo.add_expr(scan("store"), vec![]);
    let (house, _) = memo.add_expr(scan("household"), vec![]);
    let (sd, _) = memo.add_expr(join(equi("sales", "d", "date_dim", "d")), vec![sales, date]);
    let (sds, _) = memo.add_expr(join(equi("sales", "s", "store", "s")), vec![sd, store]);
    let (root, _) = memo.add_expr(join(equi("sales", "h", "household", "h")), vec![sds, house]);

    let optimized = default_search(catalog, 4)
        .optimize(memo, root, &PhysicalPropertySet::any())
        .unwrap();
    assert_eq!(joins(&optimized.plan), 3);
    assert_eq!(
        scans(&optimized.plan),
        vec!["date_dim", "household", "sales", "store"]
    );
}

#[test]
fn test_worker_count_does_not_change_the_winner() {
    let cost_with = |workers: usize| {
        let memo = Memo::new();
        let root = tpch_q5_left_deep(&memo);
        let optimized = default_search(tpch_catalog(), workers)
            .optimize(memo, root, &PhysicalPropertySet::any())
            .unwrap();
        (optimized.plan.cost.total, optimized.stats.memo_groups)
    };

    let (single_cost, single_groups) = cost_with(1);
    for workers in [2, 8] {
        let (cost, groups) = cost_with(workers);
        assert!(
            relative_diff(single_cost, cost) < 1e-6,
            "{workers} workers: {cost} vs {single_cost}"
        );
        assert_eq!(groups, single_groups);
    }
}
