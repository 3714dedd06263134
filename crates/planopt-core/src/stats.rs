//! # Statistics for Cost-Based Optimization
//!
//! This module defines the statistics structures used by the cost model to estimate
//! the expense of query plans. Accurate statistics are crucial for the optimizer to make
//! good decisions (e.g., choosing which input to use as the build side of a hash join).
//!
//! ## Unknown Values
//!
//! Every numeric field is an [`Estimate`]: either a known number or *unknown*. Unknown
//! is a distinct state, never encoded as zero (a valid and different estimate) and never
//! as NaN. Arithmetic with an unknown operand yields unknown, so a missing input
//! statistic propagates to everything derived from it.
//!
//! ## Statistics Hierarchy
//!
//! - **Table-level** ([`TableStatistics`]): what the catalog knows about a base table,
//!   keyed by column name.
//! - **Plan-level** ([`PlanNodeStatsEstimate`]): output row count of a plan node plus
//!   per-symbol statistics ([`SymbolStatsEstimate`]): distinct values, null fraction,
//!   low/high value and average width.

use crate::symbol::{Symbol, TypeProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::{Add, Div, Mul, Sub};

/// Assumed width in bytes of a variable-width value without statistics.
pub const DEFAULT_VARIABLE_WIDTH: f64 = 50.0;

/// A number or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Estimate(Option<f64>);

impl Estimate {
    pub const UNKNOWN: Estimate = Estimate(None);
    pub const ZERO: Estimate = Estimate(Some(0.0));
    pub const INFINITE: Estimate = Estimate(Some(f64::INFINITY));

    /// NaN is treated as unknown.
    pub fn known(value: f64) -> Self {
        if value.is_nan() {
            Estimate(None)
        } else {
            Estimate(Some(value))
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_none()
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        self.0.map(f).map_or(Estimate::UNKNOWN, Estimate::known)
    }

    pub fn zip_with(self, other: Estimate, f: impl FnOnce(f64, f64) -> f64) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Estimate::known(f(a, b)),
            _ => Estimate::UNKNOWN,
        }
    }

    pub fn min(self, other: Estimate) -> Self {
        self.zip_with(other, f64::min)
    }

    pub fn max(self, other: Estimate) -> Self {
        self.zip_with(other, f64::max)
    }

    /// Known value or `default`.
    pub fn or(self, default: f64) -> f64 {
        self.0.unwrap_or(default)
    }
}

impl From<f64> for Estimate {
    fn from(value: f64) -> Self {
        Estimate::known(value)
    }
}

impl Add for Estimate {
    type Output = Estimate;
    fn add(self, rhs: Estimate) -> Estimate {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl Sub for Estimate {
    type Output = Estimate;
    fn sub(self, rhs: Estimate) -> Estimate {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl Mul for Estimate {
    type Output = Estimate;
    fn mul(self, rhs: Estimate) -> Estimate {
        self.zip_with(rhs, |a, b| a * b)
    }
}

impl Mul<f64> for Estimate {
    type Output = Estimate;
    fn mul(self, rhs: f64) -> Estimate {
        self.map(|a| a * rhs)
    }
}

/// Division by zero is unknown.
impl Div for Estimate {
    type Output = Estimate;
    fn div(self, rhs: Estimate) -> Estimate {
        match (self.0, rhs.0) {
            (Some(a), Some(b)) if b != 0.0 => Estimate::known(a / b),
            _ => Estimate::UNKNOWN,
        }
    }
}

/// Per-symbol statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SymbolStatsEstimate {
    pub low_value: Estimate,
    pub high_value: Estimate,
    /// Fraction of rows that are NULL, in [0, 1].
    pub nulls_fraction: Estimate,
    pub distinct_values_count: Estimate,
    /// Average width of a non-null value in bytes.
    pub average_row_size: Estimate,
}

impl SymbolStatsEstimate {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.low_value = low.into();
        self.high_value = high.into();
        self
    }

    pub fn with_nulls_fraction(mut self, fraction: f64) -> Self {
        self.nulls_fraction = fraction.into();
        self
    }

    pub fn with_distinct_values(mut self, count: f64) -> Self {
        self.distinct_values_count = count.into();
        self
    }

    pub fn with_average_row_size(mut self, size: f64) -> Self {
        self.average_row_size = size.into();
        self
    }

    /// Cap the distinct count at `rows`.
    pub fn capped_at(mut self, rows: Estimate) -> Self {
        if let (Some(ndv), Some(rows)) = (self.distinct_values_count.value(), rows.value()) {
            self.distinct_values_count = Estimate::known(ndv.min(rows));
        }
        self
    }
}

/// Derived statistics of a plan node's output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanNodeStatsEstimate {
    pub output_row_count: Estimate,
    pub symbol_statistics: BTreeMap<Symbol, SymbolStatsEstimate>,
}

impl PlanNodeStatsEstimate {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn builder() -> PlanNodeStatsEstimateBuilder {
        PlanNodeStatsEstimateBuilder::default()
    }

    pub fn with_row_count(row_count: impl Into<Estimate>) -> Self {
        Self {
            output_row_count: row_count.into(),
            symbol_statistics: BTreeMap::new(),
        }
    }

    pub fn is_output_row_count_unknown(&self) -> bool {
        self.output_row_count.is_unknown()
    }

    /// Statistics of `symbol`, unknown if absent.
    pub fn symbol_stats(&self, symbol: &Symbol) -> SymbolStatsEstimate {
        self.symbol_statistics
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    /// `rows × Σ width(symbol)` over `outputs`.
    ///
    /// A symbol's width is its average row size when known, else the fixed width of
    /// its type, else [`DEFAULT_VARIABLE_WIDTH`]. A symbol without a type makes the
    /// result unknown.
    pub fn output_size_in_bytes(&self, outputs: &[Symbol], types: &TypeProvider) -> Estimate {
        let mut row_width = 0.0;
        for symbol in outputs {
            let width = match self.symbol_stats(symbol).average_row_size.value() {
                Some(width) => width,
                None => match types.get(symbol) {
                    Some(data_type) => data_type.fixed_width().unwrap_or(DEFAULT_VARIABLE_WIDTH),
                    None => return Estimate::UNKNOWN,
                },
            };
            row_width += width;
        }
        self.output_row_count * row_width
    }

    /// Keep only statistics for `outputs`.
    pub fn restricted_to(&self, outputs: &[Symbol]) -> Self {
        Self {
            output_row_count: self.output_row_count,
            symbol_statistics: outputs
                .iter()
                .filter_map(|s| self.symbol_statistics.get(s).map(|st| (s.clone(), *st)))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PlanNodeStatsEstimateBuilder {
    output_row_count: Estimate,
    symbol_statistics: BTreeMap<Symbol, SymbolStatsEstimate>,
}

impl PlanNodeStatsEstimateBuilder {
    pub fn output_row_count(mut self, rows: impl Into<Estimate>) -> Self {
        self.output_row_count = rows.into();
        self
    }

    pub fn symbol(mut self, symbol: impl Into<Symbol>, stats: SymbolStatsEstimate) -> Self {
        self.symbol_statistics.insert(symbol.into(), stats);
        self
    }

    pub fn build(self) -> PlanNodeStatsEstimate {
        PlanNodeStatsEstimate {
            output_row_count: self.output_row_count,
            symbol_statistics: self.symbol_statistics,
        }
    }
}

/// Per-column statistics stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub distinct_values_count: Estimate,
    pub nulls_fraction: Estimate,
    pub low_value: Estimate,
    pub high_value: Estimate,
    pub average_row_size: Estimate,
}

impl ColumnStatistics {
    pub fn new(distinct_values_count: f64, nulls_fraction: f64) -> Self {
        Self {
            distinct_values_count: distinct_values_count.into(),
            nulls_fraction: nulls_fraction.into(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.low_value = low.into();
        self.high_value = high.into();
        self
    }

    pub fn with_average_row_size(mut self, size: f64) -> Self {
        self.average_row_size = size.into();
        self
    }

    pub fn to_symbol_stats(&self) -> SymbolStatsEstimate {
        SymbolStatsEstimate {
            low_value: self.low_value,
            high_value: self.high_value,
            nulls_fraction: self.nulls_fraction,
            distinct_values_count: self.distinct_values_count,
            average_row_size: self.average_row_size,
        }
    }
}

/// Statistics for a base table, as provided by the catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: Estimate,
    #[serde(default)]
    pub columns: HashMap<String, ColumnStatistics>,
}

impl TableStatistics {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(row_count: f64) -> Self {
        Self {
            row_count: row_count.into(),
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.columns.insert(name.into(), stats);
        self
    }
}
