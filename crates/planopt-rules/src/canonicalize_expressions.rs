//! # Expression Canonicalization Rules
//!
//! One rule per operator that carries scalar expressions. Each rewrites the node with
//! canonical expressions and reports no change when they already are canonical, so the
//! family reaches a fixed point after one application per node.
//!
//! ```text
//! Before: Filter(1 = 1 AND 5 < x)
//! After:  Filter(x > 5)
//! ```

use planopt_core::canonicalize::canonicalize_checked;
use planopt_core::error::Result;
use planopt_core::expr::Expr;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Assignment, Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

/// Canonical form of `expr`, or `None` when it already is canonical.
fn canonicalize(expr: &Expr) -> Result<Option<Expr>> {
    let canonical = canonicalize_checked(expr)?;
    Ok((canonical != *expr).then_some(canonical))
}

fn rebuilt(node: &PlanNode, op: Operator) -> Option<Source> {
    Some(PlanNode::new(op, node.sources.clone()).into())
}

pub struct CanonicalizeFilterExpressions;

impl Rule for CanonicalizeFilterExpressions {
    fn name(&self) -> &str {
        "CanonicalizeFilterExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Filter { predicate } = &node.op else {
            return Ok(None);
        };
        Ok(canonicalize(predicate)?
            .and_then(|predicate| rebuilt(node, Operator::Filter { predicate })))
    }
}

pub struct CanonicalizeProjectExpressions;

impl Rule for CanonicalizeProjectExpressions {
    fn name(&self) -> &str {
        "CanonicalizeProjectExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Project { assignments } = &node.op else {
            return Ok(None);
        };
        let mut changed = false;
        let mut canonical = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            match canonicalize(&assignment.expr)? {
                Some(expr) => {
                    changed = true;
                    canonical.push(Assignment::new(assignment.symbol.clone(), expr));
                }
                None => canonical.push(assignment.clone()),
            }
        }
        if !changed {
            return Ok(None);
        }
        Ok(rebuilt(
            node,
            Operator::Project {
                assignments: canonical,
            },
        ))
    }
}

pub struct CanonicalizeJoinExpressions;

impl Rule for CanonicalizeJoinExpressions {
    fn name(&self) -> &str {
        "CanonicalizeJoinExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Join {
            join_type,
            condition,
        } = &node.op
        else {
            return Ok(None);
        };
        Ok(canonicalize(condition)?.and_then(|condition| {
            rebuilt(
                node,
                Operator::Join {
                    join_type: *join_type,
                    condition,
                },
            )
        }))
    }
}

/// Canonicalizes a predicate that was pushed into a table scan.
pub struct CanonicalizeTableScanPredicate;

impl Rule for CanonicalizeTableScanPredicate {
    fn name(&self) -> &str {
        "CanonicalizeTableScanPredicate"
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan().matching("has pushed predicate", |op| {
            matches!(op, Operator::TableScan { predicate: Some(_), .. })
        })
    }

    fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::TableScan {
            table,
            assignments,
            predicate: Some(predicate),
        } = &node.op
        else {
            return Ok(None);
        };
        let Some(canonical) = canonicalize(predicate)? else {
            return Ok(None);
        };
        // A scan predicate that keeps every row is no predicate at all.
        let predicate = (!canonical.is_true()).then_some(canonical);
        Ok(rebuilt(
            node,
            Operator::TableScan {
                table: table.clone(),
                assignments: assignments.clone(),
                predicate,
            },
        ))
    }
}
