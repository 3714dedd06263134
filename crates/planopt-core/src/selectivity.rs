//! # Selectivity Estimation
//!
//! Estimates the fraction of input rows that satisfy a predicate, using the input's
//! per-symbol statistics where they exist and fixed heuristics otherwise.
//!
//! - **Equality** (`x = c`): 1 / NDV (uniform distribution assumption).
//! - **Equality between symbols**: 1 / max(NDV).
//! - **Range** (`x < c`, ...): linear interpolation between low and high when both are
//!   known, else 1/3.
//! - **AND**: product (independence assumption). **OR**: inclusion–exclusion.
//!   **NOT**: complement.
//! - **IS NULL / IS NOT NULL**: the null fraction and its complement.
//! - **Literals**: `true` is 1, `false` and NULL are 0.
//! - **Default**: 0.1 (10%) when no better estimate is available.

use crate::expr::{BinaryOp, Expr, ScalarValue, UnaryOp};
use crate::stats::{Estimate, PlanNodeStatsEstimate, SymbolStatsEstimate};
use crate::symbol::Symbol;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Range predicate selectivity without low/high statistics.
pub const DEFAULT_RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Estimate the fraction of rows of `input` for which `predicate` is true.
pub fn estimate_selectivity(predicate: &Expr, input: &PlanNodeStatsEstimate) -> f64 {
    let selectivity = match predicate {
        Expr::Literal(ScalarValue::Bool(true)) => 1.0,
        Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null) => 0.0,
        Expr::And(terms) => terms
            .iter()
            .map(|t| estimate_selectivity(t, input))
            .product(),
        Expr::Or(terms) => terms.iter().fold(0.0, |acc, t| {
            let s = estimate_selectivity(t, input);
            acc + s - acc * s
        }),
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => 1.0 - estimate_selectivity(operand, input),
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            operand,
        } => null_fraction(operand, input).unwrap_or(DEFAULT_FILTER_SELECTIVITY),
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            operand,
        } => 1.0 - null_fraction(operand, input).unwrap_or(DEFAULT_FILTER_SELECTIVITY),
        Expr::BinaryOp { op, left, right } if op.is_comparison() => {
            comparison_selectivity(*op, left, right, input)
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    };
    selectivity.clamp(0.0, 1.0)
}

fn null_fraction(operand: &Expr, input: &PlanNodeStatsEstimate) -> Option<f64> {
    let symbol = operand.as_symbol()?;
    input.symbol_stats(symbol).nulls_fraction.value()
}

fn comparison_selectivity(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    input: &PlanNodeStatsEstimate,
) -> f64 {
    match (left, right) {
        (Expr::Symbol(a), Expr::Symbol(b)) => symbol_comparison(op, a, b, input),
        (Expr::Symbol(s), Expr::Literal(value)) => literal_comparison(op, s, value, input),
        (Expr::Literal(value), Expr::Symbol(s)) => match op.flip() {
            Some(flipped) => literal_comparison(flipped, s, value, input),
            None => DEFAULT_FILTER_SELECTIVITY,
        },
        _ => match op {
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                DEFAULT_RANGE_SELECTIVITY
            }
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
    }
}

fn non_null(stats: &SymbolStatsEstimate) -> f64 {
    1.0 - stats.nulls_fraction.or(0.0)
}

fn inverse_ndv(ndv: Estimate) -> Option<f64> {
    ndv.value().filter(|n| *n > 0.0).map(|n| 1.0 / n)
}

fn symbol_comparison(op: BinaryOp, a: &Symbol, b: &Symbol, input: &PlanNodeStatsEstimate) -> f64 {
    let (sa, sb) = (input.symbol_stats(a), input.symbol_stats(b));
    let eq = inverse_ndv(sa.distinct_values_count.max(sb.distinct_values_count))
        .map(|s| s * non_null(&sa) * non_null(&sb));
    match op {
        BinaryOp::Eq => eq.unwrap_or(DEFAULT_FILTER_SELECTIVITY),
        BinaryOp::NotEq => eq.map_or(1.0 - DEFAULT_FILTER_SELECTIVITY, |s| 1.0 - s),
        _ => DEFAULT_RANGE_SELECTIVITY,
    }
}

fn literal_comparison(
    op: BinaryOp,
    symbol: &Symbol,
    value: &ScalarValue,
    input: &PlanNodeStatsEstimate,
) -> f64 {
    if value.is_null() {
        return 0.0;
    }
    let stats = input.symbol_stats(symbol);
    match op {
        BinaryOp::Eq => {
            if out_of_range(&stats, value) {
                return 0.0;
            }
            inverse_ndv(stats.distinct_values_count)
                .map_or(DEFAULT_FILTER_SELECTIVITY, |s| s * non_null(&stats))
        }
        BinaryOp::NotEq => inverse_ndv(stats.distinct_values_count)
            .map_or(1.0 - DEFAULT_FILTER_SELECTIVITY, |s| (1.0 - s) * non_null(&stats)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            range_fraction(op, &stats, value)
                .map_or(DEFAULT_RANGE_SELECTIVITY, |f| f * non_null(&stats))
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

fn out_of_range(stats: &SymbolStatsEstimate, value: &ScalarValue) -> bool {
    match (value.as_f64(), stats.low_value.value(), stats.high_value.value()) {
        (Some(v), Some(low), Some(high)) => v < low || v > high,
        _ => false,
    }
}

/// Fraction of `[low, high]` satisfying `symbol op value`.
fn range_fraction(op: BinaryOp, stats: &SymbolStatsEstimate, value: &ScalarValue) -> Option<f64> {
    let v = value.as_f64()?;
    let low = stats.low_value.value()?;
    let high = stats.high_value.value()?;
    if !(low.is_finite() && high.is_finite()) || high < low {
        return None;
    }
    let below = if high == low {
        if v > low {
            1.0
        } else {
            0.0
        }
    } else {
        ((v - low) / (high - low)).clamp(0.0, 1.0)
    };
    Some(match op {
        BinaryOp::Lt | BinaryOp::LtEq => below,
        _ => 1.0 - below,
    })
}

/// Narrow `x`'s statistics after a `x op literal` conjunct was applied.
pub fn narrow_symbol_stats(
    stats: SymbolStatsEstimate,
    op: BinaryOp,
    value: &ScalarValue,
) -> SymbolStatsEstimate {
    let Some(v) = value.as_f64() else {
        if op == BinaryOp::Eq {
            return SymbolStatsEstimate {
                distinct_values_count: Estimate::known(1.0),
                nulls_fraction: Estimate::ZERO,
                ..stats
            };
        }
        return stats;
    };
    match op {
        BinaryOp::Eq => SymbolStatsEstimate {
            low_value: v.into(),
            high_value: v.into(),
            distinct_values_count: Estimate::known(1.0),
            nulls_fraction: Estimate::ZERO,
            average_row_size: stats.average_row_size,
        },
        BinaryOp::Lt | BinaryOp::LtEq => SymbolStatsEstimate {
            high_value: stats.high_value.min(v.into()),
            nulls_fraction: Estimate::ZERO,
            ..stats
        },
        BinaryOp::Gt | BinaryOp::GtEq => SymbolStatsEstimate {
            low_value: stats.low_value.max(v.into()),
            nulls_fraction: Estimate::ZERO,
            ..stats
        },
        _ => stats,
    }
}
