//! Collapse stacked filters.
//!
//! ```text
//! Before: Filter(p1, Filter(p2, X))
//! After:  Filter(p2 AND p1, X)
//! ```
//!
//! The inner predicate comes first so evaluation order is unchanged.

use planopt_core::error::Result;
use planopt_core::expr::Expr;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

pub struct MergeFilters;

impl Rule for MergeFilters {
    fn name(&self) -> &str {
        "MergeFilters"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter().with_sources(vec![Pattern::filter()])
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Filter { predicate: outer } = &node.op else {
            return Ok(None);
        };
        let child = ctx.resolve(&node.sources[0]);
        let Operator::Filter { predicate: inner } = &child.op else {
            return Ok(None);
        };
        let conjuncts = inner
            .conjuncts()
            .into_iter()
            .chain(outer.conjuncts())
            .cloned()
            .collect();
        Ok(Some(
            PlanNode::filter(Expr::and_all(conjuncts), child.sources[0].clone()).into(),
        ))
    }
}
