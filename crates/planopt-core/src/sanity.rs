//! Structural checks run on the optimizer's input and output plans.
//!
//! A plan is valid when every node has the number of sources its operator expects,
//! every expression only references symbols produced by the node's sources, output
//! symbols are unique and typed, and literal rows match their declared width.

use crate::error::{OptimizerError, Result};
use crate::memo::Lookup;
use crate::plan::{Distribution, Operator, PlanNode, Source};
use crate::symbol::{Symbol, TypeProvider};
use std::collections::BTreeSet;

pub fn validate_plan(plan: &PlanNode, types: &TypeProvider, lookup: &dyn Lookup) -> Result<()> {
    let expected = plan.kind().arity();
    if plan.sources.len() != expected {
        return invalid(format!(
            "{} expects {expected} sources, got {}",
            plan.op,
            plan.sources.len()
        ));
    }
    for source in &plan.sources {
        if let Source::Node(child) = source {
            validate_plan(child, types, lookup)?;
        }
    }

    let available: BTreeSet<Symbol> = match &plan.op {
        // A scan predicate ranges over the scan's own outputs.
        Operator::TableScan { .. } => plan.output_symbols(lookup).into_iter().collect(),
        _ => plan
            .sources
            .iter()
            .flat_map(|s| s.output_symbols(lookup))
            .collect(),
    };
    for expr in plan.op.expressions() {
        if let Some(missing) = expr.symbols().into_iter().find(|s| !available.contains(*s)) {
            return invalid(format!("{} references unknown symbol {missing}", plan.op));
        }
    }
    for symbol in referenced_symbols(&plan.op) {
        if !available.contains(symbol) {
            return invalid(format!("{} references unknown symbol {symbol}", plan.op));
        }
    }

    if let Operator::Values { outputs, rows } = &plan.op {
        if let Some(row) = rows.iter().find(|r| r.len() != outputs.len()) {
            return invalid(format!(
                "values row has {} columns, expected {}",
                row.len(),
                outputs.len()
            ));
        }
    }

    let outputs = plan.output_symbols(lookup);
    let mut seen = BTreeSet::new();
    for symbol in &outputs {
        if !seen.insert(symbol) {
            return invalid(format!("{} produces {symbol} twice", plan.op));
        }
        if !types.contains(symbol) {
            return invalid(format!("{} produces untyped symbol {symbol}", plan.op));
        }
    }
    Ok(())
}

/// Reject trees that still refer to memo groups.
pub fn ensure_concrete(plan: &PlanNode) -> Result<()> {
    for source in &plan.sources {
        match source {
            Source::Node(child) => ensure_concrete(child)?,
            Source::Group(g) => return invalid(format!("{} refers to memo {g}", plan.op)),
        }
    }
    Ok(())
}

/// Symbols referenced by the payload outside of scalar expressions.
fn referenced_symbols(op: &Operator) -> Vec<&Symbol> {
    match op {
        Operator::Aggregate { group_by, .. } => group_by.iter().collect(),
        Operator::Sort { order } => order.iter().map(|k| &k.symbol).collect(),
        Operator::Exchange {
            distribution: Distribution::Hash(keys),
            ..
        } => keys.iter().collect(),
        _ => vec![],
    }
}

fn invalid(message: String) -> Result<()> {
    Err(OptimizerError::InvalidPlan(message))
}
