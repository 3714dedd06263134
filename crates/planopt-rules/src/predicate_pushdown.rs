//! # Predicate Pushdown Rule
//!
//! Predicate pushdown reduces the amount of data flowing through the plan as early as
//! possible.
//!
//! ## What It Does
//!
//! When a Filter sits on top of an inner or cross Join, each conjunct of the filter is
//! placed as low as it can go:
//!
//! - conjuncts that only reference symbols of one side become a filter on that side;
//! - conjuncts that reference both sides merge into the join condition;
//! - non-deterministic conjuncts stay in a filter above the join.
//!
//! ```text
//! Before: Filter(a > 1 AND a = b, Join(A, B, true))
//! After:  Join(Filter(a > 1, A), B, a = b)
//! ```
//!
//! A cross join that receives a condition becomes an inner join. Outer, semi and anti
//! joins are left alone since moving a predicate across them changes which rows are
//! null-extended or kept.
//!
//! A projection that only passes columns through, possibly reordered, is transparent to a
//! filter, so the filter moves below it and can then reach a join underneath:
//!
//! ```text
//! Before: Filter(a > 1, Project[b := b, a := a](Join(A, B)))
//! After:  Project[b := b, a := a](Filter(a > 1, Join(A, B)))
//! ```

use planopt_core::error::Result;
use planopt_core::expr::Expr;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{JoinType, Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};
use planopt_core::symbol::Symbol;
use std::collections::BTreeSet;

/// Push filter conjuncts through inner and cross joins.
pub struct PredicatePushdownRule;

impl Rule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn pattern(&self) -> Pattern {
        // Match: Filter(Join[inner|cross](A, B))
        Pattern::filter().with_sources(vec![Pattern::join().matching("inner or cross", |op| {
            matches!(
                op,
                Operator::Join {
                    join_type: JoinType::Inner | JoinType::Cross,
                    ..
                }
            )
        })])
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Filter { predicate } = &node.op else {
            return Ok(None);
        };
        let join = ctx.resolve(&node.sources[0]);
        let Operator::Join { condition, .. } = &join.op else {
            return Ok(None);
        };
        let (left, right) = (&join.sources[0], &join.sources[1]);
        let left_symbols: BTreeSet<Symbol> = left.output_symbols(ctx.lookup).into_iter().collect();
        let right_symbols: BTreeSet<Symbol> = right.output_symbols(ctx.lookup).into_iter().collect();

        let mut split = Split::default();
        for conjunct in predicate.conjuncts() {
            if conjunct.is_true() {
                continue;
            }
            if !conjunct.is_deterministic() {
                split.remaining.push(conjunct.clone());
                continue;
            }
            let symbols = conjunct.referenced_symbols();
            if symbols.is_subset(&left_symbols) {
                split.left.push(conjunct.clone());
            } else if symbols.is_subset(&right_symbols) {
                split.right.push(conjunct.clone());
            } else {
                split.join.push(conjunct.clone());
            }
        }
        if split.left.is_empty() && split.right.is_empty() && split.join.is_empty() {
            return Ok(None);
        }

        let mut join_conjuncts: Vec<Expr> = condition
            .conjuncts()
            .into_iter()
            .filter(|c| !c.is_true())
            .cloned()
            .collect();
        join_conjuncts.extend(split.join);
        let condition = Expr::and_all(join_conjuncts);
        let join_type = if condition.is_true() {
            JoinType::Cross
        } else {
            JoinType::Inner
        };

        let new_join = PlanNode::join(
            join_type,
            condition,
            filtered(left, split.left),
            filtered(right, split.right),
        );
        if split.remaining.is_empty() {
            return Ok(Some(new_join.into()));
        }
        Ok(Some(
            PlanNode::filter(Expr::and_all(split.remaining), new_join).into(),
        ))
    }
}

/// Move a filter below a projection made only of identity assignments.
pub struct PushFilterThroughIdentityProjection;

impl Rule for PushFilterThroughIdentityProjection {
    fn name(&self) -> &str {
        "PushFilterThroughIdentityProjection"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter().with_sources(vec![Pattern::project().matching("all identity", |op| {
            matches!(op, Operator::Project { assignments } if assignments.iter().all(|a| a.is_identity()))
        })])
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let project = ctx.resolve(&node.sources[0]);
        let filter = PlanNode::new(node.op.clone(), project.sources.clone());
        Ok(Some(PlanNode::new(project.op.clone(), vec![filter.into()]).into()))
    }
}

/// Destination of each filter conjunct.
#[derive(Default)]
struct Split {
    left: Vec<Expr>,
    right: Vec<Expr>,
    join: Vec<Expr>,
    remaining: Vec<Expr>,
}

fn filtered(source: &Source, conjuncts: Vec<Expr>) -> Source {
    if conjuncts.is_empty() {
        return source.clone();
    }
    PlanNode::filter(Expr::and_all(conjuncts), source.clone()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scan, Harness};
    use planopt_core::expr::BinaryOp;
    use planopt_core::plan::{Assignment, OperatorKind};

    fn a_gt_1() -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::symbol("a"), Expr::int(1))
    }

    fn a_eq_b() -> Expr {
        Expr::binary(BinaryOp::Eq, Expr::symbol("a"), Expr::symbol("b"))
    }

    fn as_node(source: &Source) -> &PlanNode {
        match source {
            Source::Node(n) => n,
            Source::Group(g) => panic!("unexpected {g}"),
        }
    }

    #[test]
    fn test_splits_conjuncts_across_join() {
        let h = Harness::new();
        let join = PlanNode::join(JoinType::Cross, Expr::TRUE, scan("t", "a"), scan("u", "b"));
        let plan = PlanNode::filter(Expr::and_all(vec![a_gt_1(), a_eq_b()]), join);

        let rewritten = h.apply(&PredicatePushdownRule, &plan).unwrap();
        assert_eq!(
            rewritten.op,
            Operator::Join {
                join_type: JoinType::Inner,
                condition: a_eq_b(),
            }
        );
        let left = as_node(&rewritten.sources[0]);
        assert_eq!(left.op, Operator::Filter { predicate: a_gt_1() });
        assert_eq!(as_node(&rewritten.sources[1]).kind(), OperatorKind::TableScan);
    }

    #[test]
    fn test_non_deterministic_conjunct_stays_above() {
        let h = Harness::new();
        let random = Expr::binary(
            BinaryOp::Lt,
            Expr::function("random", vec![]),
            Expr::symbol("a"),
        );
        let join = PlanNode::join(JoinType::Inner, a_eq_b(), scan("t", "a"), scan("u", "b"));
        let plan = PlanNode::filter(random.clone(), join.clone());
        assert!(h.apply(&PredicatePushdownRule, &plan).is_none());

        let plan = PlanNode::filter(Expr::and_all(vec![random.clone(), a_gt_1()]), join);
        let rewritten = h.apply(&PredicatePushdownRule, &plan).unwrap();
        assert_eq!(rewritten.op, Operator::Filter { predicate: random });
        assert_eq!(as_node(&rewritten.sources[0]).kind(), OperatorKind::Join);
    }

    #[test]
    fn test_filter_moves_below_reordering_projection() {
        let h = Harness::new();
        let join = PlanNode::join(JoinType::Inner, a_eq_b(), scan("t", "a"), scan("u", "b"));
        let project = PlanNode::project(
            vec![Assignment::identity("b".into()), Assignment::identity("a".into())],
            join,
        );
        let plan = PlanNode::filter(a_gt_1(), project.clone());

        let rewritten = h.apply(&PushFilterThroughIdentityProjection, &plan).unwrap();
        assert_eq!(rewritten.op, project.op);
        let filter = as_node(&rewritten.sources[0]);
        assert_eq!(filter.op, Operator::Filter { predicate: a_gt_1() });
        assert_eq!(as_node(&filter.sources[0]).kind(), OperatorKind::Join);
        assert!(h.apply(&PredicatePushdownRule, &plan).is_none());
    }

    #[test]
    fn test_computing_projection_is_not_matched() {
        let h = Harness::new();
        let project = PlanNode::project(
            vec![Assignment::new("a", Expr::binary(BinaryOp::Add, Expr::symbol("x"), Expr::int(1)))],
            scan("t", "x"),
        );
        let plan = PlanNode::filter(a_gt_1(), project);
        assert!(h.apply(&PushFilterThroughIdentityProjection, &plan).is_none());
    }

    #[test]
    fn test_outer_join_is_not_matched() {
        let h = Harness::new();
        let join = PlanNode::join(JoinType::Left, a_eq_b(), scan("t", "a"), scan("u", "b"));
        let plan = PlanNode::filter(a_gt_1(), join);
        assert!(h.apply(&PredicatePushdownRule, &plan).is_none());
    }
}
