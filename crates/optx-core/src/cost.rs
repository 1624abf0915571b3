//! # Cost Model
//!
//! Plans are compared by a single scalar [`Cost`]. The [`DefaultCostModel`] folds
//! three resource dimensions into it with configurable weights:
//!
//! ```text
//! local = cpu_weight * cpu + memory_weight * memory + network_weight * network
//! total = local + sum(children totals)
//! ```
//!
//! Network is weighted ten times CPU by default since shuffles dominate
//! distributed execution. The search treats the model as an opaque scoring
//! function behind `Arc<dyn CostModel>`.

use crate::expr::{BuildSide, PhysicalOp};
use crate::properties::PhysicalPropertySet;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Add;

/// Lower is better. `f64::MAX` stands for "not costed yet".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        if self.is_infinite() || rhs.is_infinite() {
            return Cost::infinite();
        }
        Cost::new(self.total + rhs.total)
    }
}

pub trait CostModel: Send + Sync {
    /// Total cost of `op` on top of children that cost `children_costs`.
    ///
    /// `input_stats` holds one entry per child group. Leaf operators receive the
    /// statistics of their own group instead.
    fn compute_cost(
        &self,
        op: &PhysicalOp,
        input_stats: &[&Statistics],
        children_costs: &[Cost],
        required_props: &PhysicalPropertySet,
    ) -> Cost;
}

pub struct DefaultCostModel {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub network_weight: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
        }
    }
}

const FALLBACK_ROWS: f64 = 1000.0;
const HASH_ENTRY_BYTES: f64 = 100.0;

impl DefaultCostModel {
    fn local_cost(&self, op: &PhysicalOp, input: &[&Statistics]) -> f64 {
        let rows = |i: usize| input.get(i).map(|s| s.row_count).unwrap_or(FALLBACK_ROWS);
        match op {
            PhysicalOp::SeqScan { .. } => self.cpu_weight * rows(0),
            // Both pass over their input once.
            PhysicalOp::Filter { .. } | PhysicalOp::Project { .. } => self.cpu_weight * rows(0),
            PhysicalOp::Limit { count, .. } => self.cpu_weight * rows(0).min(*count as f64),
            PhysicalOp::HashJoin { build_side, .. } => {
                let (build, probe) = match build_side {
                    BuildSide::Left => (0, 1),
                    BuildSide::Right => (1, 0),
                };
                let build_bytes = input
                    .get(build)
                    .map(|s| s.total_size_bytes)
                    .unwrap_or(FALLBACK_ROWS * HASH_ENTRY_BYTES);
                self.cpu_weight * (rows(build) + rows(probe)) + self.memory_weight * build_bytes
            }
            PhysicalOp::MergeJoin { .. } => self.cpu_weight * (rows(0) + rows(1)),
            PhysicalOp::NestedLoopJoin { .. } => self.cpu_weight * rows(0) * rows(1),
            PhysicalOp::HashAggregate { .. } => {
                self.cpu_weight * rows(0) + self.memory_weight * rows(0) * HASH_ENTRY_BYTES
            }
            PhysicalOp::StreamAggregate { .. } => self.cpu_weight * rows(0),
            PhysicalOp::SortOp { .. } => {
                let n = rows(0);
                let n_log_n = if n > 1.0 { n * n.log2() } else { 1.0 };
                self.cpu_weight * n_log_n + self.memory_weight * n * HASH_ENTRY_BYTES
            }
            PhysicalOp::Exchange { .. } => {
                let bytes = input
                    .first()
                    .map(|s| s.total_size_bytes)
                    .unwrap_or(FALLBACK_ROWS * HASH_ENTRY_BYTES);
                self.network_weight * bytes
            }
        }
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(
        &self,
        op: &PhysicalOp,
        input_stats: &[&Statistics],
        children_costs: &[Cost],
        _required_props: &PhysicalPropertySet,
    ) -> Cost {
        children_costs
            .iter()
            .fold(Cost::new(self.local_cost(op, input_stats)), |acc, c| acc + *c)
    }
}
