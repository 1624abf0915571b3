//! # Application State
//!
//! Created once at startup and shared by every request handler through `Arc`.
//! The rule registry and cost model are stateless and shared as is; each
//! request brings its own table statistics, so the catalog is built per
//! request (see [`crate::routes`]).

use optx_core::cost::{CostModel, DefaultCostModel};
use optx_core::rule::RuleRegistry;
use optx_core::search::SearchConfig;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Server-level configuration: where to listen and the limits every search
/// runs under.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub addr: String,
    pub search: SearchConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            search: SearchConfig {
                timeout: Some(Duration::from_secs(5)),
                ..SearchConfig::default()
            },
        }
    }
}

impl OptimizerConfig {
    /// Defaults overridden by `OPTX_ADDR`, `OPTX_WORKERS`, `OPTX_TIMEOUT_MS`
    /// and `OPTX_SOURCE_TYPE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("OPTX_ADDR") {
            config.addr = addr;
        }
        if let Some(workers) = parsed::<usize>(&lookup, "OPTX_WORKERS") {
            config.search.workers = workers.max(1);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "OPTX_TIMEOUT_MS") {
            // 0 turns the timeout off.
            config.search.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(source) = lookup("OPTX_SOURCE_TYPE") {
            config.search.source_type = Some(source);
        }
        config
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

pub struct AppState {
    pub rule_registry: Arc<RuleRegistry>,
    pub cost_model: Arc<dyn CostModel>,
    pub config: OptimizerConfig,
}

impl AppState {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            rule_registry: Arc::new(optx_rules::default_rule_registry()),
            cost_model: Arc::new(DefaultCostModel::default()),
            config,
        }
    }
}
