//! # optx-core: Parallel Cascades Optimizer Core
//!
//! A cost-based query optimizer whose search runs as a graph of small jobs on a
//! pool of worker threads.
//!
//! ## Module Overview
//!
//! - **`expr`**, **`properties`**, **`stats`**, **`catalog`**, **`cost`**: the plan
//!   data model, physical properties, cardinality estimation and costing.
//! - **`memo`**: the shared search space of groups and expressions.
//! - **`rule`**, **`pattern`**: the contract pluggable rules implement.
//! - **`xform`**: runs rules on memo expressions and inserts their rewrites.
//! - **`pool`**, **`job`**, **`job_factory`**: pooled, typed jobs.
//! - **`job_queue`**: lets at most one job work on a target at a time.
//! - **`jobs`**: the exploration, implementation and optimization step functions.
//! - **`scheduler`**: worker threads driving the job graph to completion.
//! - **`search`**: the driver; submit a memo, run it, take the best plan.
//! - **`error`**: the crate error type.

pub mod catalog;
pub mod cost;
pub mod error;
pub mod expr;
pub mod job;
pub mod job_factory;
pub mod job_queue;
pub mod jobs;
pub mod memo;
pub mod pattern;
pub mod pool;
pub mod properties;
pub mod rule;
pub mod scheduler;
pub mod search;
pub mod stats;
pub mod xform;

pub use error::{Error, Result};
