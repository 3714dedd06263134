//! # Rule System
//!
//! This module defines the rule trait and the partitioned rule registry that drive the
//! iterative optimizer.
//!
//! ## Rules
//!
//! A rule is a pure rewrite: given a node that matched its [`Pattern`] and a read-only
//! [`OptContext`], it returns either nothing or a replacement [`Source`] that produces
//! the same set of symbols. A rule must return nothing when the replacement would be
//! identical to the input; that is how the driver recognizes a fixed point. A rule
//! that hits an internal invariant violation returns an error, which fails the whole
//! optimization rather than risking a wrong plan.
//!
//! ## Partitions
//!
//! Rules are grouped into named [`RulePartition`]s (rule families). For each node, the
//! driver walks partitions in registration order:
//!
//! 1. A partition disabled by the session (`<name>_enabled = false`) or by its runtime
//!    guard is skipped.
//! 2. Within a partition, at most one rule pattern may match the node. Two matches are
//!    a configuration error ([`OptimizerError::RuleConflict`]).
//! 3. The first partition whose matching rule actually fires wins; later partitions
//!    are shadowed for that node in that pass.

use crate::cost::{CostProvider, PlanNodeCostEstimate};
use crate::error::{OptimizerError, Result};
use crate::memo::{GroupId, Lookup};
use crate::pattern::Pattern;
use crate::plan::{PlanNode, Source};
use crate::session::Session;
use crate::stats::PlanNodeStatsEstimate;
use crate::stats_calculator::StatsProvider;
use crate::symbol::TypeProvider;

/// Read-only environment passed to rules.
pub struct OptContext<'a> {
    pub lookup: &'a dyn Lookup,
    pub session: &'a Session,
    pub types: &'a TypeProvider,
    pub stats: &'a dyn StatsProvider,
    pub cost: &'a dyn CostProvider,
}

impl OptContext<'_> {
    pub fn resolve<'s>(&'s self, source: &'s Source) -> &'s PlanNode {
        self.lookup.resolve(source)
    }

    pub fn stats(&self, source: &Source) -> Result<PlanNodeStatsEstimate> {
        self.stats.stats(source)
    }

    pub fn cumulative_cost(&self, source: &Source) -> Result<PlanNodeCostEstimate> {
        self.cost.cumulative_cost(source)
    }
}

/// A rewrite rule.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Rewrite a matching node.
    ///
    /// `Ok(None)` means the rule does not apply or would not change anything.
    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>>;
}

/// Runtime condition deciding whether a partition participates.
pub type PartitionGuard = fn(&Session) -> bool;

/// A named family of mutually exclusive rules.
pub struct RulePartition {
    name: String,
    guard: Option<PartitionGuard>,
    rules: Vec<(Pattern, Box<dyn Rule>)>,
}

impl RulePartition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guard: None,
            rules: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: PartitionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        let pattern = rule.pattern();
        self.rules.push((pattern, rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|(_, r)| r.as_ref())
    }

    pub fn is_enabled(&self, session: &Session) -> bool {
        session.is_rule_family_enabled(&self.name) && self.guard.map_or(true, |g| g(session))
    }

    /// The single rule of this partition whose pattern matches `node`.
    pub fn matching_rule(
        &self,
        node: &PlanNode,
        group: GroupId,
        lookup: &dyn Lookup,
    ) -> Result<Option<&dyn Rule>> {
        let mut matched = self
            .rules
            .iter()
            .filter(|(pattern, _)| pattern.matches(node, lookup))
            .map(|(_, rule)| rule.as_ref());
        let Some(first) = matched.next() else {
            return Ok(None);
        };
        let others: Vec<&dyn Rule> = matched.collect();
        if others.is_empty() {
            return Ok(Some(first));
        }
        Err(OptimizerError::RuleConflict {
            node: node.id,
            group,
            rules: std::iter::once(first)
                .chain(others)
                .map(|r| r.name().to_string())
                .collect(),
        })
    }
}

/// Ordered set of rule partitions.
#[derive(Default)]
pub struct RuleRegistry {
    partitions: Vec<RulePartition>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_partition(&mut self, partition: RulePartition) {
        self.partitions.push(partition);
    }

    pub fn with_partition(mut self, partition: RulePartition) -> Self {
        self.add_partition(partition);
        self
    }

    pub fn partitions(&self) -> &[RulePartition] {
        &self.partitions
    }

    /// Partitions that participate under `session`, in order.
    pub fn active_partitions<'a>(
        &'a self,
        session: &'a Session,
    ) -> impl Iterator<Item = &'a RulePartition> + 'a {
        self.partitions.iter().filter(move |p| p.is_enabled(session))
    }

    pub fn num_rules(&self) -> usize {
        self.partitions.iter().map(|p| p.rules.len()).sum()
    }
}
