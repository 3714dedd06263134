//! # Cost Model
//!
//! This module defines the cost abstraction used to compare alternative plans.
//!
//! ## Multi-Dimensional Cost
//!
//! Query execution cost is not a single number: it depends on CPU time, memory
//! consumption and network transfer. A [`PlanNodeCostEstimate`] keeps the three
//! dimensions separate. Each component is a non-negative number, `+∞`, or unknown.
//! Building a cost with a negative or NaN component fails with
//! [`OptimizerError::InvalidCost`]; such a value always indicates a calculator bug.
//!
//! ## Cost Accumulation
//!
//! Costs are **additive**: the cumulative cost of a plan is the local cost of its root
//! operator plus the cumulative costs of its sources, component-wise.
//! [`ZERO_COST`](PlanNodeCostEstimate::ZERO_COST) is the identity,
//! [`INFINITE_COST`](PlanNodeCostEstimate::INFINITE_COST) saturates, and an unknown
//! component makes the sum's component unknown.
//!
//! ## Comparison
//!
//! [`CostComparator`] collapses a cost into one scalar with the session's weights:
//!
//! ```text
//! scalar = cpu_weight * cpu + memory_weight * memory + network_weight * network
//! ```
//!
//! Two costs with any unknown component are incomparable.

use crate::error::{OptimizerError, Result};
use crate::memo::{Lookup, Memo};
use crate::plan::{PlanNode, Source};
use crate::session::{CostWeights, Session};
use crate::stats::Estimate;
use crate::stats_calculator::StatsProvider;
use crate::symbol::TypeProvider;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Add;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanNodeCostEstimate {
    cpu_cost: Estimate,
    memory_cost: Estimate,
    network_cost: Estimate,
}

impl PlanNodeCostEstimate {
    pub const ZERO_COST: PlanNodeCostEstimate = PlanNodeCostEstimate {
        cpu_cost: Estimate::ZERO,
        memory_cost: Estimate::ZERO,
        network_cost: Estimate::ZERO,
    };

    pub const UNKNOWN_COST: PlanNodeCostEstimate = PlanNodeCostEstimate {
        cpu_cost: Estimate::UNKNOWN,
        memory_cost: Estimate::UNKNOWN,
        network_cost: Estimate::UNKNOWN,
    };

    pub const INFINITE_COST: PlanNodeCostEstimate = PlanNodeCostEstimate {
        cpu_cost: Estimate::INFINITE,
        memory_cost: Estimate::INFINITE,
        network_cost: Estimate::INFINITE,
    };

    pub fn new(cpu_cost: f64, memory_cost: f64, network_cost: f64) -> Result<Self> {
        for (component, value) in [
            ("cpu", cpu_cost),
            ("memory", memory_cost),
            ("network", network_cost),
        ] {
            if value.is_nan() {
                return Err(OptimizerError::InvalidCost { component, value });
            }
        }
        Self::from_estimates(cpu_cost.into(), memory_cost.into(), network_cost.into())
    }

    /// Build from possibly-unknown components. Known components must be `>= 0`.
    pub fn from_estimates(cpu: Estimate, memory: Estimate, network: Estimate) -> Result<Self> {
        check_component("cpu", cpu)?;
        check_component("memory", memory)?;
        check_component("network", network)?;
        Ok(Self {
            cpu_cost: cpu,
            memory_cost: memory,
            network_cost: network,
        })
    }

    pub fn cpu_cost(cpu: impl Into<Estimate>) -> Result<Self> {
        Self::from_estimates(cpu.into(), Estimate::ZERO, Estimate::ZERO)
    }

    pub fn memory_cost(memory: impl Into<Estimate>) -> Result<Self> {
        Self::from_estimates(Estimate::ZERO, memory.into(), Estimate::ZERO)
    }

    pub fn network_cost(network: impl Into<Estimate>) -> Result<Self> {
        Self::from_estimates(Estimate::ZERO, Estimate::ZERO, network.into())
    }

    pub fn builder() -> PlanNodeCostEstimateBuilder {
        PlanNodeCostEstimateBuilder::default()
    }

    pub fn cpu(&self) -> Estimate {
        self.cpu_cost
    }

    pub fn memory(&self) -> Estimate {
        self.memory_cost
    }

    pub fn network(&self) -> Estimate {
        self.network_cost
    }

    pub fn has_unknown_components(&self) -> bool {
        self.cpu_cost.is_unknown() || self.memory_cost.is_unknown() || self.network_cost.is_unknown()
    }

    pub fn is_unknown(&self) -> bool {
        self.cpu_cost.is_unknown() && self.memory_cost.is_unknown() && self.network_cost.is_unknown()
    }
}

fn check_component(component: &'static str, value: Estimate) -> Result<()> {
    match value.value() {
        Some(v) if v.is_nan() || v < 0.0 => Err(OptimizerError::InvalidCost { component, value: v }),
        _ => Ok(()),
    }
}

impl Add for PlanNodeCostEstimate {
    type Output = PlanNodeCostEstimate;

    fn add(self, rhs: PlanNodeCostEstimate) -> PlanNodeCostEstimate {
        // Non-negative operands keep the sum non-negative.
        PlanNodeCostEstimate {
            cpu_cost: self.cpu_cost + rhs.cpu_cost,
            memory_cost: self.memory_cost + rhs.memory_cost,
            network_cost: self.network_cost + rhs.network_cost,
        }
    }
}

impl std::iter::Sum for PlanNodeCostEstimate {
    fn sum<I: Iterator<Item = PlanNodeCostEstimate>>(iter: I) -> Self {
        iter.fold(PlanNodeCostEstimate::ZERO_COST, Add::add)
    }
}

/// Raw components accepted on the wire; validated on conversion.
#[derive(Deserialize)]
struct RawCost {
    cpu_cost: Estimate,
    memory_cost: Estimate,
    network_cost: Estimate,
}

impl<'de> Deserialize<'de> for PlanNodeCostEstimate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawCost::deserialize(deserializer)?;
        PlanNodeCostEstimate::from_estimates(raw.cpu_cost, raw.memory_cost, raw.network_cost)
            .map_err(serde::de::Error::custom)
    }
}

/// Checked builder. Unset components are zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanNodeCostEstimateBuilder {
    cpu_cost: f64,
    memory_cost: f64,
    network_cost: f64,
}

impl PlanNodeCostEstimateBuilder {
    pub fn set_cpu_cost(mut self, cpu_cost: f64) -> Self {
        self.cpu_cost = cpu_cost;
        self
    }

    pub fn set_memory_cost(mut self, memory_cost: f64) -> Self {
        self.memory_cost = memory_cost;
        self
    }

    pub fn set_network_cost(mut self, network_cost: f64) -> Self {
        self.network_cost = network_cost;
        self
    }

    pub fn build(self) -> Result<PlanNodeCostEstimate> {
        PlanNodeCostEstimate::new(self.cpu_cost, self.memory_cost, self.network_cost)
    }
}

/// Ranks costs by a weighted sum of their components.
#[derive(Debug, Clone, Copy)]
pub struct CostComparator {
    weights: CostWeights,
}

impl CostComparator {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }

    pub fn from_session(session: &Session) -> Self {
        Self::new(session.cost_weights())
    }

    /// Weighted scalar, `None` if any component is unknown.
    pub fn scalar(&self, cost: &PlanNodeCostEstimate) -> Option<f64> {
        let weighted = |weight: f64, value: Estimate| -> Option<f64> {
            let v = value.value()?;
            // A zero weight ignores the component, even when it is infinite.
            Some(if weight == 0.0 { 0.0 } else { weight * v })
        };
        Some(
            weighted(self.weights.cpu, cost.cpu_cost)?
                + weighted(self.weights.memory, cost.memory_cost)?
                + weighted(self.weights.network, cost.network_cost)?,
        )
    }

    /// `None` when the costs are incomparable.
    pub fn compare(&self, a: &PlanNodeCostEstimate, b: &PlanNodeCostEstimate) -> Option<Ordering> {
        let (a, b) = (self.scalar(a)?, self.scalar(b)?);
        if a == b {
            return Some(Ordering::Equal);
        }
        a.partial_cmp(&b)
    }
}

/// Local cost of one operator.
///
/// Implementations return only the node's own incremental cost; sources' cumulative
/// costs are added by [`CachingCostProvider`].
pub trait CostCalculator: Send + Sync {
    fn calculate_cost(
        &self,
        node: &PlanNode,
        stats: &dyn StatsProvider,
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate>;
}

/// Cumulative cost of sources, as seen by rules and the driver.
pub trait CostProvider {
    fn cumulative_cost(&self, source: &Source) -> Result<PlanNodeCostEstimate>;
}

/// Memo-backed provider: `cumulative(node) = local(node) + Σ cumulative(source)`, cached
/// per group.
pub struct CachingCostProvider<'a> {
    calculator: &'a dyn CostCalculator,
    stats: &'a dyn StatsProvider,
    memo: &'a Memo,
    session: &'a Session,
    types: &'a TypeProvider,
}

impl<'a> CachingCostProvider<'a> {
    pub fn new(
        calculator: &'a dyn CostCalculator,
        stats: &'a dyn StatsProvider,
        memo: &'a Memo,
        session: &'a Session,
        types: &'a TypeProvider,
    ) -> Self {
        Self {
            calculator,
            stats,
            memo,
            session,
            types,
        }
    }

    /// Cost of `node` alone.
    pub fn local_cost(&self, node: &PlanNode) -> Result<PlanNodeCostEstimate> {
        self.calculator
            .calculate_cost(node, self.stats, self.memo, self.session, self.types)
    }

    /// Cumulative cost of `node`; its group sources contribute their cached cost.
    pub fn node_cost(&self, node: &PlanNode) -> Result<PlanNodeCostEstimate> {
        let local = self.local_cost(node)?;
        let mut total = local;
        for source in &node.sources {
            total = total + self.cumulative_cost(source)?;
        }
        trace!(node = %node.id, ?local, ?total, "costed node");
        Ok(total)
    }
}

impl CostProvider for CachingCostProvider<'_> {
    fn cumulative_cost(&self, source: &Source) -> Result<PlanNodeCostEstimate> {
        match source {
            Source::Group(group) => {
                if let Some(cached) = self.memo.cached_cost(*group) {
                    return Ok(cached);
                }
                let cost = self.node_cost(self.memo.resolve_group(*group))?;
                self.memo.store_cost(*group, cost);
                Ok(cost)
            }
            Source::Node(node) => self.node_cost(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost(cpu: f64, memory: f64, network: f64) -> PlanNodeCostEstimate {
        PlanNodeCostEstimate::new(cpu, memory, network).unwrap()
    }

    #[test]
    fn test_negative_component_is_rejected() {
        let err = PlanNodeCostEstimate::builder().set_cpu_cost(-1.0).build().unwrap_err();
        assert_eq!(
            err,
            OptimizerError::InvalidCost {
                component: "cpu",
                value: -1.0
            }
        );
        assert!(PlanNodeCostEstimate::new(0.0, f64::NAN, 0.0).is_err());
        assert!(PlanNodeCostEstimate::network_cost(-0.5).is_err());
    }

    #[test]
    fn test_additivity_and_sentinels() {
        let a = cost(1.0, 2.0, 3.0);
        let b = cost(10.0, 20.0, 30.0);
        assert_eq!(a + b, cost(11.0, 22.0, 33.0));
        assert_eq!(a + PlanNodeCostEstimate::ZERO_COST, a);
        assert_eq!(PlanNodeCostEstimate::ZERO_COST + a, a);
        assert_eq!(a + PlanNodeCostEstimate::INFINITE_COST, PlanNodeCostEstimate::INFINITE_COST);
        assert!((a + PlanNodeCostEstimate::UNKNOWN_COST).is_unknown());
        let sum: PlanNodeCostEstimate = [a, b, a].into_iter().sum();
        assert_eq!(sum, cost(12.0, 24.0, 36.0));
    }

    #[test]
    fn test_comparator_weights() {
        let comparator = CostComparator::new(CostWeights::default());
        let cpu_heavy = cost(10.0, 0.0, 0.0);
        let network_heavy = cost(0.0, 0.0, 10.0);
        assert_eq!(comparator.compare(&network_heavy, &cpu_heavy), Some(Ordering::Less));
        assert_eq!(
            comparator.compare(&cpu_heavy, &PlanNodeCostEstimate::UNKNOWN_COST),
            None
        );
        assert_eq!(
            comparator.compare(&PlanNodeCostEstimate::INFINITE_COST, &PlanNodeCostEstimate::INFINITE_COST),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"cpu_cost": -2.0, "memory_cost": 0.0, "network_cost": null}"#;
        assert!(serde_json::from_str::<PlanNodeCostEstimate>(bad).is_err());
        let ok = r#"{"cpu_cost": 2.0, "memory_cost": 0.0, "network_cost": null}"#;
        let parsed: PlanNodeCostEstimate = serde_json::from_str(ok).unwrap();
        assert!(parsed.network().is_unknown());
    }
}
