//! # Session Properties
//!
//! Session configuration arrives as opaque `key → value` strings that were validated
//! upstream. The optimizer only reads it, through typed accessors with defaults. A
//! value that does not parse is logged and replaced by the default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ITERATIVE_OPTIMIZER_TIMEOUT_MS: &str = "iterative_optimizer_timeout_ms";
pub const CPU_COST_WEIGHT: &str = "cpu_cost_weight";
pub const MEMORY_COST_WEIGHT: &str = "memory_cost_weight";
pub const NETWORK_COST_WEIGHT: &str = "network_cost_weight";

/// Three minutes.
pub const DEFAULT_ITERATIVE_OPTIMIZER_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_CPU_COST_WEIGHT: f64 = 75.0;
pub const DEFAULT_MEMORY_COST_WEIGHT: f64 = 10.0;
pub const DEFAULT_NETWORK_COST_WEIGHT: f64 = 15.0;

/// Coefficients used to collapse a three-dimensional cost into one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU_COST_WEIGHT,
            memory: DEFAULT_MEMORY_COST_WEIGHT,
            network: DEFAULT_NETWORK_COST_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    properties: HashMap<String, String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.properties.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(key, value = raw.as_str(), "unparsable session property, using default");
                    default
                }
            },
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.parsed(key, default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.parsed(key, default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        let value = self.parsed(key, default);
        if value.is_finite() && value >= 0.0 {
            value
        } else {
            warn!(key, value, "out-of-range session property, using default");
            default
        }
    }

    pub fn optimizer_timeout(&self) -> Duration {
        Duration::from_millis(self.get_u64(
            ITERATIVE_OPTIMIZER_TIMEOUT_MS,
            DEFAULT_ITERATIVE_OPTIMIZER_TIMEOUT_MS,
        ))
    }

    pub fn cost_weights(&self) -> CostWeights {
        CostWeights {
            cpu: self.get_f64(CPU_COST_WEIGHT, DEFAULT_CPU_COST_WEIGHT),
            memory: self.get_f64(MEMORY_COST_WEIGHT, DEFAULT_MEMORY_COST_WEIGHT),
            network: self.get_f64(NETWORK_COST_WEIGHT, DEFAULT_NETWORK_COST_WEIGHT),
        }
    }

    /// `<family>_enabled`, default true.
    pub fn is_rule_family_enabled(&self, family: &str) -> bool {
        self.get_bool(&format!("{family}_enabled"), true)
    }
}

impl FromIterator<(String, String)> for Session {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}
