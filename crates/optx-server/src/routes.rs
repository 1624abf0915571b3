//! # HTTP Route Handlers
//!
//! `POST /optimize` takes a logical plan as a JSON tree plus the statistics of
//! the tables it scans:
//!
//! ```text
//! { "tables": [{ "schema", "name", "rowCount", "sizeBytes", "columns": [...] }],
//!   "plan":   { "op": <LogicalOp>, "children": [<plan>, ...] },
//!   "required": <PhysicalPropertySet>?  }
//! ```
//!
//! The tree is loaded into a fresh memo, searched, and answered with the best
//! physical plan tree, its cost and the search counters.
//!
//! Errors come back as a status code and a message:
//! - 400 Bad Request: malformed plan tree (wrong number of inputs, bad JSON)
//! - 500 Internal Server Error: the search failed (limit hit, timeout, no plan)

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use optx_core::catalog::InMemoryCatalog;
use optx_core::error::Error;
use optx_core::expr::{ColumnRef, LogicalOp, Operator, TableRef};
use optx_core::memo::{GroupId, Memo, PlanNode};
use optx_core::properties::PhysicalPropertySet;
use optx_core::search::{CascadesSearch, SearchStats};
use optx_core::stats::{ColumnStatistics, Statistics};

use crate::state::AppState;

type ApiError = (StatusCode, String);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: u16,
    pub name: String,
    pub rule_type: String,
    /// Connector rule set the rule belongs to; absent for base rules.
    pub source: Option<String>,
    pub active: bool,
}

/// GET /rules
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<RuleInfo>> {
    Json(rule_infos(&state))
}

fn rule_infos(state: &AppState) -> Vec<RuleInfo> {
    let registry = &state.rule_registry;
    let active = registry.active_rules(state.config.search.source_type.as_deref());
    registry
        .describe()
        .into_iter()
        .map(|(id, rule, source)| RuleInfo {
            id: id.0,
            name: rule.name().to_string(),
            rule_type: format!("{:?}", rule.rule_type()),
            source: source.map(str::to_string),
            active: active.contains(&id),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    pub plan: PlanTree,
    #[serde(default)]
    pub required: PhysicalPropertySet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub row_count: f64,
    pub size_bytes: f64,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub ndv: f64,
    #[serde(default)]
    pub null_fraction: f64,
}

#[derive(Debug, Deserialize)]
pub struct PlanTree {
    pub op: LogicalOp,
    #[serde(default)]
    pub children: Vec<PlanTree>,
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub cost: f64,
    pub plan: PlanNode,
    pub stats: SearchStats,
}

/// POST /optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    // The search blocks its calling thread until every worker is done.
    tokio::task::spawn_blocking(move || run_optimization(&state, req))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("search task failed: {e}")))?
        .map(Json)
}

fn run_optimization(state: &AppState, req: OptimizeRequest) -> Result<OptimizeResponse, ApiError> {
    let memo = Memo::new();
    let root = load_plan(&memo, &req.plan)?;

    let search = CascadesSearch::new(
        Arc::clone(&state.rule_registry),
        Arc::clone(&state.cost_model),
        Arc::new(build_catalog(&req.tables)),
        state.config.search.clone(),
    );
    let optimized = search
        .optimize(memo, root, &req.required)
        .map_err(|e| match e {
            Error::InvalidPlan(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("optimization failed: {e}")),
        })?;

    Ok(OptimizeResponse {
        cost: optimized.plan.cost.total,
        plan: optimized.plan,
        stats: optimized.stats,
    })
}

fn build_catalog(tables: &[TableInfo]) -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for info in tables {
        let mut stats = Statistics::new(info.row_count, info.size_bytes);
        let mut columns = Vec::with_capacity(info.columns.len());
        for (idx, col) in info.columns.iter().enumerate() {
            stats = stats.with_column(&col.name, ColumnStatistics::new(col.ndv, col.null_fraction));
            columns.push(ColumnRef::new(&info.name, &col.name, idx as u32));
        }
        catalog.add_table(&TableRef::new(&info.schema, &info.name), columns, stats);
    }
    catalog
}

/// Inserts `tree` bottom-up and returns its root group. Identical subtrees
/// share a group.
fn load_plan(memo: &Memo, tree: &PlanTree) -> Result<GroupId, ApiError> {
    let expected = match &tree.op {
        LogicalOp::Scan { .. } => 0,
        LogicalOp::Join { .. } => 2,
        _ => 1,
    };
    if tree.children.len() != expected {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "{:?} takes {expected} input(s), got {}",
                tree.op.kind(),
                tree.children.len()
            ),
        ));
    }
    let children = tree
        .children
        .iter()
        .map(|child| load_plan(memo, child))
        .collect::<Result<Vec<_>, _>>()?;
    let (group, _) = memo.add_expr(Operator::Logical(tree.op.clone()), children);
    Ok(group)
}
