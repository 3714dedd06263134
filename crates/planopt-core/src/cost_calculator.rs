//! # Cost Calculators
//!
//! Two implementations of [`CostCalculator`]:
//!
//! - [`CostCalculatorUsingExchanges`] derives each operator's local cost from the
//!   statistics of its input and output: CPU from bytes processed, memory from bytes
//!   materialized, network from bytes crossing a remote exchange. Projections are
//!   charged only for the columns they compute.
//! - [`CostCalculatorWithEstimatedExchanges`] is used while the distribution of
//!   operators onto workers is not yet decided. It reports every cost as unknown
//!   rather than guessing exchange costs.
//!
//! Both read the cluster size once, at construction. A stale count only affects the
//! relative ranking of broadcast exchanges.

use crate::catalog::ClusterTopology;
use crate::cost::{CostCalculator, PlanNodeCostEstimate};
use crate::error::Result;
use crate::memo::Lookup;
use crate::plan::{Distribution, ExchangeScope, Operator, PlanNode};
use crate::session::Session;
use crate::stats::Estimate;
use crate::stats_calculator::StatsProvider;
use crate::symbol::{Symbol, TypeProvider};

/// Statistics-aware cost calculator.
#[derive(Debug, Clone, Copy)]
pub struct CostCalculatorUsingExchanges {
    node_count: usize,
}

impl CostCalculatorUsingExchanges {
    pub fn new(topology: &dyn ClusterTopology) -> Self {
        Self {
            node_count: topology.active_node_count().max(1),
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

/// Byte sizes of a node's sources and output.
struct Sizes<'a> {
    node: &'a PlanNode,
    stats: &'a dyn StatsProvider,
    lookup: &'a dyn Lookup,
    types: &'a TypeProvider,
}

impl Sizes<'_> {
    fn input(&self, index: usize) -> Result<Estimate> {
        let Some(source) = self.node.sources.get(index) else {
            return Ok(Estimate::UNKNOWN);
        };
        let stats = self.stats.stats(source)?;
        Ok(stats.output_size_in_bytes(&source.output_symbols(self.lookup), self.types))
    }

    fn input_rows(&self, index: usize) -> Result<Estimate> {
        match self.node.sources.get(index) {
            Some(source) => Ok(self.stats.stats(source)?.output_row_count),
            None => Ok(Estimate::UNKNOWN),
        }
    }

    fn output(&self) -> Result<Estimate> {
        self.output_of(&self.node.output_symbols(self.lookup))
    }

    fn output_of(&self, symbols: &[Symbol]) -> Result<Estimate> {
        let stats = self.stats.node_stats(self.node)?;
        Ok(stats.output_size_in_bytes(symbols, self.types))
    }
}

impl CostCalculator for CostCalculatorUsingExchanges {
    fn calculate_cost(
        &self,
        node: &PlanNode,
        stats: &dyn StatsProvider,
        lookup: &dyn Lookup,
        _session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let sizes = Sizes {
            node,
            stats,
            lookup,
            types,
        };
        match &node.op {
            Operator::Values { .. } => Ok(PlanNodeCostEstimate::ZERO_COST),
            Operator::TableScan { .. } | Operator::Limit { .. } => {
                PlanNodeCostEstimate::cpu_cost(sizes.output()?)
            }
            Operator::Filter { .. } => PlanNodeCostEstimate::cpu_cost(sizes.input(0)?),
            // Identity assignments only rename or reorder columns.
            Operator::Project { assignments } => {
                let computed: Vec<Symbol> = assignments
                    .iter()
                    .filter(|a| !a.is_identity())
                    .map(|a| a.symbol.clone())
                    .collect();
                if computed.is_empty() {
                    return Ok(PlanNodeCostEstimate::ZERO_COST);
                }
                PlanNodeCostEstimate::cpu_cost(sizes.output_of(&computed)?)
            }
            Operator::Join { .. } => {
                let (probe, build) = (sizes.input(0)?, sizes.input(1)?);
                PlanNodeCostEstimate::from_estimates(probe + build, build, Estimate::ZERO)
            }
            Operator::Aggregate { .. } => {
                PlanNodeCostEstimate::from_estimates(sizes.input(0)?, sizes.output()?, Estimate::ZERO)
            }
            Operator::Sort { .. } => {
                let bytes = sizes.input(0)?;
                let comparisons = sizes.input_rows(0)?.map(|rows| rows.max(2.0).log2());
                PlanNodeCostEstimate::from_estimates(bytes * comparisons, bytes, Estimate::ZERO)
            }
            Operator::Exchange {
                distribution,
                scope,
            } => {
                let bytes = sizes.input(0)?;
                match scope {
                    ExchangeScope::Local => PlanNodeCostEstimate::cpu_cost(bytes),
                    ExchangeScope::Remote => {
                        let copies = match distribution {
                            Distribution::Broadcast => self.node_count as f64,
                            Distribution::Single
                            | Distribution::Hash(_)
                            | Distribution::RoundRobin => 1.0,
                        };
                        PlanNodeCostEstimate::from_estimates(bytes, Estimate::ZERO, bytes * copies)
                    }
                }
            }
        }
    }
}

/// Exchange-uncertain calculator: every cost is [`PlanNodeCostEstimate::UNKNOWN_COST`].
#[derive(Debug, Clone, Copy)]
pub struct CostCalculatorWithEstimatedExchanges {
    number_of_nodes: usize,
}

impl CostCalculatorWithEstimatedExchanges {
    pub fn new(topology: &dyn ClusterTopology) -> Self {
        Self {
            number_of_nodes: topology.active_node_count(),
        }
    }

    pub fn number_of_nodes(&self) -> usize {
        self.number_of_nodes
    }
}

impl CostCalculator for CostCalculatorWithEstimatedExchanges {
    fn calculate_cost(
        &self,
        _node: &PlanNode,
        _stats: &dyn StatsProvider,
        _lookup: &dyn Lookup,
        _session: &Session,
        _types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        Ok(PlanNodeCostEstimate::UNKNOWN_COST)
    }
}
