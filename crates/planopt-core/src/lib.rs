//! # planopt-core: Iterative Plan Optimizer Core
//!
//! This crate implements the data structures and algorithms of a rule-driven, cost-based
//! optimizer for logical query plans. Rules rewrite a memoized plan until a fixed point,
//! consulting statistics and cost estimates along the way.
//!
//! ## Module Overview
//!
//! - **`plan`**: Plan nodes, operators and their payloads.
//! - **`expr`** / **`symbol`**: Scalar expressions, symbols and the symbol type map.
//! - **`canonicalize`**: Idempotent normalization of scalar expressions.
//! - **`memo`**: Groups of equivalent expressions with cached statistics and cost.
//! - **`pattern`**: Declarative pattern matching for rule applicability checks.
//! - **`rule`**: The Rule trait and the partitioned rule registry.
//! - **`optimizer`**: The fixed-point driver.
//! - **`stats`** / **`stats_calculator`** / **`selectivity`**: Estimates and their derivation.
//! - **`cost`** / **`cost_calculator`**: Cost vectors, comparison and local cost models.
//! - **`catalog`**: Table statistics and cluster topology sources.
//! - **`session`**: Per-query configuration.
//! - **`sanity`**: Structural validation of input and output plans.

pub mod canonicalize;
pub mod catalog;
pub mod cost;
pub mod cost_calculator;
pub mod error;
pub mod expr;
pub mod memo;
pub mod optimizer;
pub mod pattern;
pub mod plan;
pub mod rule;
pub mod sanity;
pub mod selectivity;
pub mod session;
pub mod stats;
pub mod stats_calculator;
pub mod symbol;

pub use error::{OptimizerError, Result};
pub use optimizer::{CancellationFlag, DriverState, IterativeOptimizer, OptimizerOutcome};
