//! Drop projections that pass their source's symbols through unchanged and in order.

use planopt_core::error::Result;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

pub struct RemoveRedundantIdentityProjections;

impl Rule for RemoveRedundantIdentityProjections {
    fn name(&self) -> &str {
        "RemoveRedundantIdentityProjections"
    }

    fn pattern(&self) -> Pattern {
        Pattern::project().matching("all identity", |op| {
            matches!(op, Operator::Project { assignments } if assignments.iter().all(|a| a.is_identity()))
        })
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let source = &node.sources[0];
        // Reordering projections are kept; they define the column order above them.
        if node.output_symbols(ctx.lookup) != source.output_symbols(ctx.lookup) {
            return Ok(None);
        }
        Ok(Some(source.clone()))
    }
}
