//! # Application State
//!
//! This module defines the shared state that is available to all HTTP request handlers.
//! The state is created once at server startup and shared via `Arc` across all
//! concurrent requests.
//!
//! ## Components
//!
//! - **Rule Registry**: The default rule families. Shared (not cloned per request)
//!   because rules are stateless.
//! - **Stats and Cost Calculators**: Stateless; the cost calculator reads the cluster
//!   size once at startup.
//! - **Catalog**: Table statistics. Requests may bring their own statistics, in which
//!   case a per-request catalog is used instead.

use planopt_core::catalog::{Catalog, InMemoryCatalog, StaticClusterTopology};
use planopt_core::cost::CostCalculator;
use planopt_core::cost_calculator::CostCalculatorUsingExchanges;
use planopt_core::optimizer::IterativeOptimizer;
use planopt_core::rule::RuleRegistry;
use planopt_core::stats_calculator::{ComposableStatsCalculator, StatsCalculator};
use std::sync::Arc;
use tracing::warn;

pub const LISTEN_ADDR_ENV: &str = "PLANOPT_LISTEN_ADDR";
pub const ACTIVE_NODES_ENV: &str = "PLANOPT_ACTIVE_NODES";

/// Server-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: String,
    /// Number of workers the cost model assumes for broadcast exchanges.
    pub active_nodes: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            active_nodes: 1,
        }
    }
}

impl OptimizerConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unusable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(LISTEN_ADDR_ENV) {
            config.listen_addr = addr;
        }
        if let Some(raw) = lookup(ACTIVE_NODES_ENV) {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.active_nodes = n,
                _ => warn!(key = ACTIVE_NODES_ENV, value = %raw, "ignoring invalid worker count"),
            }
        }
        config
    }
}

/// Shared application state, accessible by all request handlers via Axum's State extractor.
pub struct AppState {
    pub rule_registry: Arc<RuleRegistry>,
    pub stats_calculator: Arc<dyn StatsCalculator>,
    pub cost_calculator: Arc<dyn CostCalculator>,
    /// Used when a request carries no table statistics.
    pub catalog: Arc<dyn Catalog>,
    pub config: OptimizerConfig,
}

impl AppState {
    pub fn new(config: OptimizerConfig) -> Self {
        let topology = StaticClusterTopology(config.active_nodes);
        Self {
            rule_registry: Arc::new(planopt_rules::default_rule_registry()),
            stats_calculator: Arc::new(ComposableStatsCalculator::with_default_rules()),
            cost_calculator: Arc::new(CostCalculatorUsingExchanges::new(&topology)),
            catalog: Arc::new(InMemoryCatalog::new()),
            config,
        }
    }

    /// Optimizer over the shared rules and calculators, reading `catalog` if given.
    pub fn optimizer(&self, catalog: Option<Arc<dyn Catalog>>) -> IterativeOptimizer {
        IterativeOptimizer::new(
            self.rule_registry.clone(),
            self.stats_calculator.clone(),
            self.cost_calculator.clone(),
            catalog.unwrap_or_else(|| self.catalog.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = OptimizerConfig::from_lookup(|_| None);
        assert_eq!(config, OptimizerConfig::default());
    }

    #[test]
    fn test_config_overrides() {
        let env: HashMap<&str, &str> =
            [(LISTEN_ADDR_ENV, "127.0.0.1:8080"), (ACTIVE_NODES_ENV, "16")].into();
        let config = OptimizerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.active_nodes, 16);
    }

    #[test]
    fn test_invalid_worker_count_keeps_default() {
        for raw in ["zero", "0", "-3"] {
            let config = OptimizerConfig::from_lookup(|k| {
                (k == ACTIVE_NODES_ENV).then(|| raw.to_string())
            });
            assert_eq!(config.active_nodes, 1);
        }
    }
}
