//! # Flip Join Sides
//!
//! This rule uses the algebraic identity `A JOIN B = B JOIN A` for inner joins to put
//! the smaller input on the build (right) side.
//!
//! ## Why It Matters
//!
//! The right input of a join is materialized into a hash table, so its size drives the
//! join's memory cost. When statistics show the right input is larger than the left,
//! the inputs are swapped.
//!
//! ## Applicability
//!
//! Only inner joins are flipped; the other join types have fixed left/right semantics.
//! Nothing happens when either side's size is unknown: a guess could undo a good order.
//!
//! ## Output Order
//!
//! Swapping the inputs also swaps the order of the join's output symbols. The flipped
//! join is wrapped in an identity projection listing the original order, so parents see
//! the same columns in the same positions.
//!
//! ```text
//! Before: Join(A, B, a = b)                     with |B| > |A|
//! After:  Project(a, b; Join(B, A, b = a))
//! ```

use planopt_core::error::Result;
use planopt_core::expr::Expr;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Assignment, JoinType, Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};
use planopt_core::stats::Estimate;
use tracing::trace;

/// Inner join commutativity, driven by estimated input sizes.
pub struct FlipJoinSides;

impl Rule for FlipJoinSides {
    fn name(&self) -> &str {
        "FlipJoinSides"
    }

    fn pattern(&self) -> Pattern {
        Pattern::join().matching("inner", |op| {
            matches!(
                op,
                Operator::Join {
                    join_type: JoinType::Inner,
                    ..
                }
            )
        })
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Join {
            join_type,
            condition,
        } = &node.op
        else {
            return Ok(None);
        };
        let (left, right) = (&node.sources[0], &node.sources[1]);
        let (Some(probe), Some(build)) = (size(left, ctx)?.value(), size(right, ctx)?.value())
        else {
            return Ok(None);
        };
        if build <= probe {
            return Ok(None);
        }
        trace!(node = %node.id, probe, build, "flipping join sides");

        let flipped = PlanNode::join(
            *join_type,
            swap_condition_sides(condition),
            right.clone(),
            left.clone(),
        );
        let order = node
            .output_symbols(ctx.lookup)
            .into_iter()
            .map(Assignment::identity)
            .collect();
        Ok(Some(PlanNode::project(order, flipped).into()))
    }
}

fn size(source: &Source, ctx: &OptContext) -> Result<Estimate> {
    let stats = ctx.stats(source)?;
    Ok(stats.output_size_in_bytes(&source.output_symbols(ctx.lookup), ctx.types))
}

/// Swap the sides of each comparison in a join condition.
/// For a.x = b.y, produce b.y = a.x; for a < b, produce b > a.
fn swap_condition_sides(expr: &Expr) -> Expr {
    match expr {
        Expr::BinaryOp { op, left, right } if op.is_comparison() => match op.flip() {
            Some(flipped) => Expr::BinaryOp {
                op: flipped,
                left: right.clone(),
                right: left.clone(),
            },
            None => expr.clone(),
        },
        Expr::And(conjuncts) => Expr::And(conjuncts.iter().map(swap_condition_sides).collect()),
        other => other.clone(),
    }
}
