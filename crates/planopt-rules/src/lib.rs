//! # Built-in Optimization Rules
//!
//! This crate provides the default rule set for the iterative optimizer. Rules are
//! grouped into partitions (rule families) that the driver tries in order; the first
//! partition whose rule fires on a node wins for that pass.
//!
//! ## Expression Normalization
//!
//! - **`canonicalize_expressions`**: Canonicalizes filter predicates, projection
//!   assignments, join conditions and pushed-down scan predicates.
//!
//! ## Structural Simplification
//!
//! - **`remove_trivial_filters`**: `Filter(true)` disappears, `Filter(false)` becomes an
//!   empty values node.
//! - **`merge_filters`**: Collapses stacked filters into one conjunction.
//! - **`predicate_pushdown`**: Moves filter conjuncts below inner and cross joins, and
//!   filters below identity projections such as the one a join flip leaves behind.
//! - **`evaluate_zero_limit`**: `Limit 0` becomes an empty values node.
//! - **`limit_pushdown`**: Merges stacked limits and pushes limits below projections.
//! - **`remove_redundant_identity_projections`**: Drops projections that change nothing.
//!
//! ## Cost-Based
//!
//! - **`flip_join_sides`**: Puts the smaller input of an inner join on the build side.

pub mod canonicalize_expressions;
pub mod evaluate_zero_limit;
pub mod flip_join_sides;
pub mod limit_pushdown;
pub mod merge_filters;
pub mod predicate_pushdown;
pub mod remove_identity_projections;
pub mod remove_trivial_filters;

use planopt_core::rule::{RulePartition, RuleRegistry};

/// Create the default rule registry with all built-in rule families.
///
/// Extra families can be appended to the returned registry with
/// [`RuleRegistry::add_partition`].
pub fn default_rule_registry() -> RuleRegistry {
    RuleRegistry::new()
        .with_partition(
            RulePartition::new("canonicalize_expressions")
                .with_rule(Box::new(canonicalize_expressions::CanonicalizeFilterExpressions))
                .with_rule(Box::new(canonicalize_expressions::CanonicalizeProjectExpressions))
                .with_rule(Box::new(canonicalize_expressions::CanonicalizeJoinExpressions))
                .with_rule(Box::new(canonicalize_expressions::CanonicalizeTableScanPredicate)),
        )
        .with_partition(
            RulePartition::new("remove_trivial_filters")
                .with_rule(Box::new(remove_trivial_filters::RemoveTrivialFilters)),
        )
        .with_partition(
            RulePartition::new("merge_filters").with_rule(Box::new(merge_filters::MergeFilters)),
        )
        .with_partition(
            RulePartition::new("predicate_pushdown")
                .with_rule(Box::new(predicate_pushdown::PredicatePushdownRule))
                .with_rule(Box::new(predicate_pushdown::PushFilterThroughIdentityProjection)),
        )
        .with_partition(
            RulePartition::new("evaluate_zero_limit")
                .with_rule(Box::new(evaluate_zero_limit::EvaluateZeroLimit)),
        )
        .with_partition(
            RulePartition::new("limit_pushdown")
                .with_rule(Box::new(limit_pushdown::MergeLimits))
                .with_rule(Box::new(limit_pushdown::PushLimitThroughProject)),
        )
        .with_partition(
            RulePartition::new("remove_redundant_identity_projections")
                .with_rule(Box::new(remove_identity_projections::RemoveRedundantIdentityProjections)),
        )
        .with_partition(
            RulePartition::new("flip_join_sides")
                .with_rule(Box::new(flip_join_sides::FlipJoinSides)),
        )
}

#[cfg(test)]
pub(crate) mod testing {
    use planopt_core::catalog::{InMemoryCatalog, StaticClusterTopology};
    use planopt_core::cost::CachingCostProvider;
    use planopt_core::cost_calculator::CostCalculatorUsingExchanges;
    use planopt_core::memo::{Lookup, Memo};
    use planopt_core::plan::{PlanNode, Source, TableRef};
    use planopt_core::rule::{OptContext, Rule};
    use planopt_core::session::Session;
    use planopt_core::stats::{ColumnStatistics, TableStatistics};
    use planopt_core::stats_calculator::{CachingStatsProvider, ComposableStatsCalculator};
    use planopt_core::symbol::{DataType, TypeProvider};

    /// Applies single rules to concrete trees.
    pub struct Harness {
        pub memo: Memo,
        pub session: Session,
        pub types: TypeProvider,
        pub catalog: InMemoryCatalog,
        stats: ComposableStatsCalculator,
        cost: CostCalculatorUsingExchanges,
    }

    impl Harness {
        pub fn new() -> Self {
            let types = ["a", "b", "c", "x", "y", "z"]
                .into_iter()
                .fold(TypeProvider::new(), |t, s| t.with(s, DataType::Bigint));
            Self {
                memo: Memo::new(),
                session: Session::new(),
                types,
                catalog: InMemoryCatalog::new(),
                stats: ComposableStatsCalculator::with_default_rules(),
                cost: CostCalculatorUsingExchanges::new(&StaticClusterTopology(1)),
            }
        }

        pub fn with_table(mut self, name: &str, rows: f64) -> Self {
            self.catalog.add_table(
                TableRef::new("tpch", name),
                TableStatistics::new(rows).with_column("k", ColumnStatistics::new(rows, 0.0)),
            );
            self
        }

        /// Apply `rule` if its pattern matches, returning the resolved replacement.
        pub fn apply(&self, rule: &dyn Rule, node: &PlanNode) -> Option<PlanNode> {
            if !rule.pattern().matches(node, &self.memo) {
                return None;
            }
            let stats =
                CachingStatsProvider::new(&self.stats, &self.memo, &self.session, &self.types, &self.catalog);
            let cost = CachingCostProvider::new(&self.cost, &stats, &self.memo, &self.session, &self.types);
            let ctx = OptContext {
                lookup: &self.memo,
                session: &self.session,
                types: &self.types,
                stats: &stats,
                cost: &cost,
            };
            let replacement = rule.apply(node, &ctx).unwrap()?;
            Some(match replacement {
                Source::Node(n) => *n,
                group @ Source::Group(_) => self.memo.resolve(&group).clone(),
            })
        }
    }

    pub fn scan(table: &str, symbol: &str) -> PlanNode {
        PlanNode::table_scan(TableRef::new("tpch", table), &[(symbol, "k")])
    }
}
