//! `Limit 0` over anything is an empty relation.

use planopt_core::error::Result;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

pub struct EvaluateZeroLimit;

impl Rule for EvaluateZeroLimit {
    fn name(&self) -> &str {
        "EvaluateZeroLimit"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().matching("count is zero", |op| {
            matches!(op, Operator::Limit { count: 0, .. })
        })
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let outputs = node.output_symbols(ctx.lookup);
        Ok(Some(PlanNode::values(outputs, vec![]).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scan, Harness};
    use planopt_core::symbol::Symbol;

    #[test]
    fn test_zero_limit_is_empty_values() {
        let h = Harness::new();
        let rewritten = h.apply(&EvaluateZeroLimit, &PlanNode::limit(0, scan("t", "x"))).unwrap();
        assert_eq!(
            rewritten.op,
            Operator::Values {
                outputs: vec![Symbol::new("x")],
                rows: vec![],
            }
        );
        assert!(h.apply(&EvaluateZeroLimit, &PlanNode::limit(1, scan("t", "x"))).is_none());
    }
}
