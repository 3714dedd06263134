//! # Declarative Pattern Matching for Optimization Rules
//!
//! Each optimization rule declares a `Pattern` that describes the shape of nodes it
//! can transform. Before applying a rule, the driver checks the pattern so `apply()`
//! is only called on nodes that have the expected structure.
//!
//! ## Pattern Language
//!
//! - `Pattern::Operator(matcher, children)`: matches a node whose operator satisfies
//!   `matcher` and whose sources match the given child patterns. The matcher checks the
//!   operator kind and any attribute predicates (e.g., "a limit with count zero").
//!
//! - `Pattern::Any`: matches any source. Used as a wildcard for children the rule
//!   doesn't inspect. This is the most common child pattern.
//!
//! - `Pattern::Leaf`: matches only nodes without sources (scans and values).
//!
//! ## Group-Level Matching
//!
//! Child patterns are tested against the *current* expression of the child group, as
//! returned by the [`Lookup`]. Only the pattern's own depth is ever visited, so matching
//! cost does not depend on the size of the tree.

use crate::memo::Lookup;
use crate::plan::{Operator, OperatorKind, PlanNode};
use std::fmt;
use std::sync::Arc;

/// Pattern for matching plan nodes.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Match an operator with child patterns.
    Operator(OpMatcher, Vec<Pattern>),
    /// Match any source.
    Any,
    /// Match a node with no sources.
    Leaf,
}

/// Matcher for an operator kind plus optional attribute predicates.
#[derive(Debug, Clone)]
pub struct OpMatcher {
    pub kind: OperatorKind,
    pub predicates: Vec<AttributePredicate>,
}

/// Named predicate over an operator's payload.
#[derive(Clone)]
pub struct AttributePredicate {
    pub name: &'static str,
    check: Arc<dyn Fn(&Operator) -> bool + Send + Sync>,
}

impl AttributePredicate {
    pub fn test(&self, op: &Operator) -> bool {
        (self.check)(op)
    }
}

impl fmt::Debug for AttributePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributePredicate({})", self.name)
    }
}

impl Pattern {
    /// Match any node of `kind`, with wildcard sources.
    pub fn of(kind: OperatorKind) -> Self {
        Pattern::Operator(
            OpMatcher {
                kind,
                predicates: vec![],
            },
            vec![Pattern::Any; kind.arity()],
        )
    }

    /// Replace the child patterns.
    pub fn with_sources(self, sources: Vec<Pattern>) -> Self {
        match self {
            Pattern::Operator(matcher, _) => Pattern::Operator(matcher, sources),
            other => other,
        }
    }

    /// Add an attribute predicate to the root matcher.
    pub fn matching<F>(self, name: &'static str, check: F) -> Self
    where
        F: Fn(&Operator) -> bool + Send + Sync + 'static,
    {
        match self {
            Pattern::Operator(mut matcher, sources) => {
                matcher.predicates.push(AttributePredicate {
                    name,
                    check: Arc::new(check),
                });
                Pattern::Operator(matcher, sources)
            }
            other => other,
        }
    }

    /// Operator kind at the root, if constrained.
    pub fn root_kind(&self) -> Option<OperatorKind> {
        match self {
            Pattern::Operator(matcher, _) => Some(matcher.kind),
            Pattern::Any | Pattern::Leaf => None,
        }
    }

    pub fn scan() -> Self {
        Pattern::of(OperatorKind::TableScan)
    }

    pub fn values() -> Self {
        Pattern::of(OperatorKind::Values)
    }

    pub fn filter() -> Self {
        Pattern::of(OperatorKind::Filter)
    }

    pub fn project() -> Self {
        Pattern::of(OperatorKind::Project)
    }

    pub fn join() -> Self {
        Pattern::of(OperatorKind::Join)
    }

    pub fn aggregate() -> Self {
        Pattern::of(OperatorKind::Aggregate)
    }

    pub fn sort() -> Self {
        Pattern::of(OperatorKind::Sort)
    }

    pub fn limit() -> Self {
        Pattern::of(OperatorKind::Limit)
    }

    pub fn exchange() -> Self {
        Pattern::of(OperatorKind::Exchange)
    }

    /// Match a filter on top of a join.
    pub fn filter_join() -> Self {
        Pattern::filter().with_sources(vec![Pattern::join()])
    }

    /// Check `node` against this pattern.
    pub fn matches(&self, node: &PlanNode, lookup: &dyn Lookup) -> bool {
        matches(lookup, node, self)
    }
}

/// Check if a node matches a pattern.
pub fn matches(lookup: &dyn Lookup, node: &PlanNode, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => node.sources.is_empty(),
        Pattern::Operator(matcher, child_patterns) => {
            if node.kind() != matcher.kind {
                return false;
            }
            if !matcher.predicates.iter().all(|p| p.test(&node.op)) {
                return false;
            }
            if node.sources.len() != child_patterns.len() {
                return false;
            }
            node.sources
                .iter()
                .zip(child_patterns)
                .all(|(source, child_pattern)| match child_pattern {
                    Pattern::Any => true,
                    _ => matches(lookup, lookup.resolve(source), child_pattern),
                })
        }
    }
}
