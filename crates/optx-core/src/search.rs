//! # Cascades Search
//!
//! The driver of one optimization. The caller builds a [`Memo`] holding the
//! initial logical plan, hands it over with the root group and the properties
//! the result must have, and gets back the cheapest physical plan.
//!
//! ```text
//! submit(memo, root, required) -> SearchHandle
//! run(&mut handle)                 scheduler runs OptimizeGroup(root, required)
//! best_plan(&handle) -> PlanNode   rebuilt from the winners in the memo
//! ```
//!
//! All searches started from one [`CascadesSearch`] share its rule registry,
//! cost model, catalog and job pools, so several may run at once on different
//! threads. A run either produces a plan or fails with one reason: a partly
//! searched memo is never turned into a plan.

use crate::catalog::Catalog;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::job::{JobKind, JobResult, JobWork};
use crate::job_factory::{JobFactory, DEFAULT_JOBS_PER_POOL};
use crate::jobs::JobContext;
use crate::memo::{GroupId, Memo, PlanNode};
use crate::properties::PhysicalPropertySet;
use crate::rule::RuleRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::xform::TransformationEngine;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Limits and knobs of a search.
///
/// These limits keep pathologically large queries from running away:
/// `max_job_steps` bounds the work, `max_memo_groups` bounds memory.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Upper bound on the number of groups the memo may contain.
    pub max_memo_groups: usize,
    /// Upper bound on job steps executed in one run.
    pub max_job_steps: u64,
    /// Connector whose rule set is switched on in addition to the base rules.
    pub source_type: Option<String>,
    pub workers: usize,
    /// Jobs kept in each per-kind pool before falling back to the heap.
    pub jobs_per_pool: usize,
    pub max_live_jobs: usize,
    pub timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_memo_groups: 100_000,
            max_job_steps: 1_000_000,
            source_type: None,
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            jobs_per_pool: DEFAULT_JOBS_PER_POOL,
            max_live_jobs: 1_000_000,
            timeout: None,
        }
    }
}

impl SearchConfig {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            max_live_jobs: self.max_live_jobs,
            max_job_steps: self.max_job_steps,
            timeout: self.timeout,
        }
    }
}

/// Counters of one finished run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchStats {
    pub job_steps: u64,
    pub jobs_created: u64,
    pub jobs_deduplicated: usize,
    pub pool_fallbacks: usize,
    pub memo_groups: usize,
    pub memo_exprs: usize,
    pub elapsed_ms: u64,
}

/// Stops a run from any thread. Cancelling a run that has finished does nothing.
#[derive(Debug, Clone)]
pub struct Canceller {
    abort: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// One optimization request: its memo, its goal and, once run, its outcome.
pub struct SearchHandle {
    memo: Memo,
    root: GroupId,
    required: PhysicalPropertySet,
    abort: Arc<AtomicBool>,
    outcome: Option<Result<JobResult>>,
    stats: SearchStats,
}

impl SearchHandle {
    pub fn canceller(&self) -> Canceller {
        Canceller {
            abort: Arc::clone(&self.abort),
        }
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn root(&self) -> GroupId {
        self.root
    }

    pub fn required(&self) -> &PhysicalPropertySet {
        &self.required
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }
}

/// A best plan together with what it took to find it.
#[derive(Debug, Clone, Serialize)]
pub struct Optimized {
    pub plan: PlanNode,
    pub stats: SearchStats,
}

pub struct CascadesSearch {
    pub rule_registry: Arc<RuleRegistry>,
    pub cost_model: Arc<dyn CostModel>,
    pub catalog: Arc<dyn Catalog>,
    pub config: SearchConfig,
    factory: JobFactory,
}

impl CascadesSearch {
    pub fn new(
        rule_registry: Arc<RuleRegistry>,
        cost_model: Arc<dyn CostModel>,
        catalog: Arc<dyn Catalog>,
        config: SearchConfig,
    ) -> Self {
        let factory = JobFactory::new(config.jobs_per_pool);
        Self {
            rule_registry,
            cost_model,
            catalog,
            config,
            factory,
        }
    }

    pub fn submit(&self, memo: Memo, root: GroupId, required: PhysicalPropertySet) -> SearchHandle {
        SearchHandle {
            memo,
            root,
            required,
            abort: Arc::new(AtomicBool::new(false)),
            outcome: None,
            stats: SearchStats::default(),
        }
    }

    /// Runs the search of `handle` to the end. A handle runs once; running it
    /// again returns the first outcome.
    pub fn run(&self, handle: &mut SearchHandle) -> Result<()> {
        if let Some(outcome) = &handle.outcome {
            return outcome.clone().map(|_| ());
        }
        if handle.root as usize >= handle.memo.num_groups() {
            let err = Error::InvalidPlan(format!("root group {} is not in the memo", handle.root));
            handle.outcome = Some(Err(err.clone()));
            return Err(err);
        }

        debug!(
            root = handle.root,
            required = %handle.required,
            groups = handle.memo.num_groups(),
            exprs = handle.memo.num_exprs(),
            "starting search"
        );
        let started = Instant::now();
        let created_before = self.factory.jobs_created();
        let fallbacks_before = self.factory.fallback_count();

        let ctx = JobContext {
            memo: &handle.memo,
            engine: TransformationEngine::new(
                &self.rule_registry,
                self.config.source_type.as_deref(),
                self.catalog.as_ref(),
                self.config.max_memo_groups,
            ),
            cost_model: self.cost_model.as_ref(),
            catalog: self.catalog.as_ref(),
        };
        let scheduler = Scheduler::new(
            &ctx,
            &self.factory,
            self.config.scheduler_config(),
            Arc::clone(&handle.abort),
        );
        let outcome = scheduler.run(JobWork::optimize_group(handle.root, handle.required.clone()));
        let run = scheduler.stats();

        handle.stats = SearchStats {
            job_steps: run.job_steps,
            jobs_created: self.factory.jobs_created() - created_before,
            jobs_deduplicated: run.jobs_deduplicated,
            pool_fallbacks: self.factory.fallback_count().saturating_sub(fallbacks_before),
            memo_groups: handle.memo.num_groups(),
            memo_exprs: handle.memo.num_exprs(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        match &outcome {
            Ok(result) => debug!(?result, stats = ?handle.stats, "search finished"),
            Err(e) => debug!(error = %e, stats = ?handle.stats, "search failed"),
        }
        handle.outcome = Some(outcome.clone());
        outcome.map(|_| ())
    }

    pub fn best_plan(&self, handle: &SearchHandle) -> Result<PlanNode> {
        match &handle.outcome {
            None => Err(Error::Invariant("best plan requested before the search ran".into())),
            Some(Err(e)) => Err(e.clone()),
            Some(Ok(_)) => handle
                .memo
                .extract_best_plan(handle.root, &handle.required)
                .ok_or(Error::NoPlan { group: handle.root }),
        }
    }

    /// Submits, runs and extracts in one go.
    pub fn optimize(
        &self,
        memo: Memo,
        root: GroupId,
        required: &PhysicalPropertySet,
    ) -> Result<Optimized> {
        let mut handle = self.submit(memo, root, required.clone());
        self.run(&mut handle)?;
        let plan = self.best_plan(&handle)?;
        Ok(Optimized {
            plan,
            stats: handle.stats(),
        })
    }

    /// Frees the job pools of every kind. Pools are rebuilt on the next run.
    pub fn truncate_job_pools(&mut self) -> Result<()> {
        for kind in JobKind::ALL {
            self.factory.truncate(kind)?;
        }
        Ok(())
    }

    pub fn job_factory(&self) -> &JobFactory {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::cost::DefaultCostModel;
    use crate::expr::{Operator, PhysicalOp, TableRef};
    use crate::stats::Statistics;

    fn search(config: SearchConfig) -> CascadesSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(&TableRef::new("s", "t"), vec![], Statistics::new(500.0, 5000.0));
        CascadesSearch::new(
            Arc::new(RuleRegistry::new()),
            Arc::new(DefaultCostModel::default()),
            Arc::new(catalog),
            config,
        )
    }

    fn physical_scan() -> (Memo, GroupId) {
        let memo = Memo::new();
        let (g, _) = memo.add_expr(
            Operator::Physical(PhysicalOp::SeqScan {
                table: TableRef::new("s", "t"),
                columns: vec![],
                predicate: None,
            }),
            vec![],
        );
        (memo, g)
    }

    #[test]
    fn test_config_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.max_memo_groups, 100_000);
        assert_eq!(config.max_job_steps, 1_000_000);
        assert_eq!(config.jobs_per_pool, DEFAULT_JOBS_PER_POOL);
        assert!(config.workers >= 1);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_physical_input_without_rules() {
        let engine = search(SearchConfig {
            workers: 2,
            ..SearchConfig::default()
        });
        let (memo, root) = physical_scan();
        let optimized = engine
            .optimize(memo, root, &PhysicalPropertySet::any())
            .unwrap();

        assert!(matches!(optimized.plan.op, PhysicalOp::SeqScan { .. }));
        assert_eq!(optimized.plan.cost.total, 500.0);
        assert!(optimized.stats.job_steps > 0);
        assert_eq!(optimized.stats.memo_groups, 1);
    }

    #[test]
    fn test_best_plan_before_run() {
        let engine = search(SearchConfig::default());
        let (memo, root) = physical_scan();
        let handle = engine.submit(memo, root, PhysicalPropertySet::any());
        assert!(matches!(engine.best_plan(&handle), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_cancelled_before_run() {
        let engine = search(SearchConfig::default());
        let (memo, root) = physical_scan();
        let mut handle = engine.submit(memo, root, PhysicalPropertySet::any());
        handle.canceller().cancel();

        assert!(matches!(engine.run(&mut handle), Err(Error::Cancelled)));
        assert!(matches!(engine.best_plan(&handle), Err(Error::Cancelled)));
        // The outcome sticks.
        assert!(matches!(engine.run(&mut handle), Err(Error::Cancelled)));
    }

    #[test]
    fn test_unknown_root() {
        let engine = search(SearchConfig::default());
        let (memo, _) = physical_scan();
        let err = engine
            .optimize(memo, 7, &PhysicalPropertySet::any())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(_)));
    }

    #[test]
    fn test_truncate_between_runs() {
        let mut engine = search(SearchConfig {
            workers: 1,
            ..SearchConfig::default()
        });
        let (memo, root) = physical_scan();
        engine.optimize(memo, root, &PhysicalPropertySet::any()).unwrap();
        assert!(engine.job_factory().is_pooled(JobKind::GroupOptimization));

        engine.truncate_job_pools().unwrap();
        assert!(!engine.job_factory().is_pooled(JobKind::GroupOptimization));

        let (memo, root) = physical_scan();
        assert!(engine.optimize(memo, root, &PhysicalPropertySet::any()).is_ok());
    }
}
