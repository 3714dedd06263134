//! # Limit Pushdown
//!
//! Two rules in one family; their patterns never overlap.
//!
//! ```text
//! MergeLimits:              Limit(o1, c1, Limit(o2, c2, X)) -> Limit(o2 + o1, min(c1, c2 - o1), X)
//! PushLimitThroughProject:  Limit(Project(X))               -> Project(Limit(X))
//! ```
//!
//! A projection computes one row per input row, so limiting before it is equivalent
//! and cheaper.

use planopt_core::error::Result;
use planopt_core::pattern::Pattern;
use planopt_core::plan::{Operator, PlanNode, Source};
use planopt_core::rule::{OptContext, Rule};

pub struct MergeLimits;

impl Rule for MergeLimits {
    fn name(&self) -> &str {
        "MergeLimits"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().with_sources(vec![Pattern::limit()])
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let Operator::Limit {
            offset: outer_offset,
            count: outer_count,
        } = node.op
        else {
            return Ok(None);
        };
        let child = ctx.resolve(&node.sources[0]);
        let Operator::Limit {
            offset: inner_offset,
            count: inner_count,
        } = child.op
        else {
            return Ok(None);
        };
        let merged = Operator::Limit {
            offset: inner_offset.saturating_add(outer_offset),
            count: outer_count.min(inner_count.saturating_sub(outer_offset)),
        };
        Ok(Some(PlanNode::new(merged, child.sources.clone()).into()))
    }
}

pub struct PushLimitThroughProject;

impl Rule for PushLimitThroughProject {
    fn name(&self) -> &str {
        "PushLimitThroughProject"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().with_sources(vec![Pattern::project()])
    }

    fn apply(&self, node: &PlanNode, ctx: &OptContext) -> Result<Option<Source>> {
        let project = ctx.resolve(&node.sources[0]);
        let limit = PlanNode::new(node.op.clone(), project.sources.clone());
        Ok(Some(PlanNode::new(project.op.clone(), vec![limit.into()]).into()))
    }
}
