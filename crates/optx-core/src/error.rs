//! # Search Errors
//!
//! A single error type covers everything that can end an optimization run.
//! Only two families are fatal to a run: resource exhaustion and cancellation
//! (explicit, or via timeout). Rule failures are reported through
//! [`Error::Rule`] but are absorbed by the transformation engine, which logs
//! them and skips the offending alternative.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A hard search limit was hit (memo size, job count, step budget).
    #[error("resource exhausted: {resource} exceeded limit of {limit}")]
    ResourceExhausted { resource: &'static str, limit: usize },

    /// A rule produced a malformed rewrite.
    #[error("rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },

    /// The caller cancelled the run.
    #[error("optimization cancelled")]
    Cancelled,

    #[error("optimization timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The search finished but the root group has no plan for the requirement.
    #[error("no valid plan found for group {group}")]
    NoPlan { group: u32 },

    /// The driver was handed input it cannot search over.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A programming contract was broken.
    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Rule {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Rule { .. })
    }
}
