//! Filters whose predicate is a literal.
//!
//! ```text
//! Filter(true, X)        -> X
//! Filter(false|null, X)  -> Values(outputs(X), no rows)
//! ```

use planopt_core::error::Result;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

pub struct RemoveTrivialFilters;

impl Rule for RemoveTrivialFilters {
    fn name(&self) -> &str {
        "RemoveTrivialFilters"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter().matching("literal predicate", |op| {
            matches!(op, Operator::Filter { predicate } if predicate.as_literal().is_some())
        })
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Filter { predicate } = &node.op else {
            return Ok(None);
        };
        let source = &node.sources[0];
        if predicate.is_true() {
            return Ok(Some(source.clone()));
        }
        if predicate.rejects_all() {
            let outputs = source.output_symbols(ctx.lookup);
            return Ok(Some(PlanNode::values(outputs, vec![]).into()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scan, Harness};
    use planopt_core::expr::Expr;
    use planopt_core::plan::OperatorKind;
    use planopt_core::symbol::Symbol;

    #[test]
    fn test_true_filter_is_removed() {
        let h = Harness::new();
        let source = scan("t", "x");
        let rewritten = h
            .apply(&RemoveTrivialFilters, &PlanNode::filter(Expr::TRUE, source.clone()))
            .unwrap();
        assert_eq!(rewritten, source);
    }

    #[test]
    fn test_false_and_null_filters_become_empty_values() {
        let h = Harness::new();
        for predicate in [Expr::FALSE, Expr::NULL] {
            let rewritten = h
                .apply(&RemoveTrivialFilters, &PlanNode::filter(predicate, scan("t", "x")))
                .unwrap();
            assert_eq!(
                rewritten.op,
                Operator::Values {
                    outputs: vec![Symbol::new("x")],
                    rows: vec![],
                }
            );
        }
    }

    #[test]
    fn test_non_literal_predicate_does_not_match() {
        let h = Harness::new();
        let filter = PlanNode::filter(Expr::symbol("x"), scan("t", "x"));
        assert!(h.apply(&RemoveTrivialFilters, &filter).is_none());
        assert_eq!(filter.kind(), OperatorKind::Filter);
    }
}
