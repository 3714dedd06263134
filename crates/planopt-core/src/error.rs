//! # Optimizer Errors
//!
//! Every fatal condition aborts the optimization session and surfaces to the caller
//! as an [`OptimizerError`]. No partial plan is ever returned alongside an error; the
//! caller decides whether to fall back to the unoptimized plan or fail the query.
//!
//! Two conditions are deliberately *not* errors:
//!
//! - Missing statistics are represented as unknown estimates and propagated.
//! - Running out of time is a normal terminal state of the driver.

use crate::memo::GroupId;
use crate::plan::PlanNodeId;

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizerError {
    /// Two rules of the same partition matched the same node in the same pass.
    #[error("rule conflict on node {node} (group {group}): rules {rules:?} all match")]
    RuleConflict {
        node: PlanNodeId,
        group: GroupId,
        rules: Vec<String>,
    },
    /// A cost component is negative or not a number.
    #[error("invalid {component} cost: {value}")]
    InvalidCost { component: &'static str, value: f64 },
    /// Canonicalizing an already canonical expression changed it again.
    #[error("canonicalization is not idempotent: {original} -> {first} -> {second}")]
    CanonicalizationNonIdempotent {
        original: String,
        first: String,
        second: String,
    },
    /// A rule hit an internal invariant violation it cannot resolve safely.
    #[error("rule {rule} failed: {message}")]
    RuleFailure { rule: String, message: String },
    /// The plan (input, intermediate or output) violates a structural invariant.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    /// The session was cancelled by the caller.
    #[error("optimization cancelled")]
    Cancelled,
}

impl OptimizerError {
    pub fn rule_failure(rule: impl Into<String>, message: impl Into<String>) -> Self {
        OptimizerError::RuleFailure {
            rule: rule.into(),
            message: message.into(),
        }
    }
}
