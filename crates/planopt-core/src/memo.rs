//! # Memo
//!
//! The memo owns the plan being optimized. Every operator instance lives in a *group*
//! and refers to its children only through [`GroupId`]s, so a sub-plan is stored once
//! no matter how many parents share it.
//!
//! ## Groups
//!
//! A group records the expressions that have been accepted for it, oldest first. One
//! of them is the group's *current* expression, which is what rules see. Older
//! alternatives are kept so the final extraction can fall back to one of them when the
//! cost model shows that a rewrite made things worse.
//!
//! A rewrite to an expression the group already holds does not grow the group: the
//! current expression is moved back to it and the replacement reports no change. Rules
//! that undo each other therefore reach a fixed point instead of cycling.
//!
//! ## Invalidation
//!
//! Each group caches its derived statistics and cumulative cost. Replacing a group's
//! expression clears both caches for the group and, transitively, for every group that
//! (directly or indirectly) has it as a source.
//!
//! ## Structural Deduplication
//!
//! `(operator, child groups)` is hashed on insert. Inserting a node that is
//! structurally identical to one already memoized returns the existing group.

use crate::cost::PlanNodeCostEstimate;
use crate::error::{OptimizerError, Result};
use crate::plan::{Operator, PlanNode, PlanNodeId, Source};
use crate::stats::PlanNodeStatsEstimate;
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::trace;

/// Index of a group in the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({})", self.0)
    }
}

/// Read-only view used by rules and estimators to see through group references.
pub trait Lookup {
    /// Current expression of a group.
    fn resolve_group(&self, group: GroupId) -> &PlanNode;

    fn group_outputs(&self, group: GroupId) -> &[Symbol];

    fn resolve<'a>(&'a self, source: &'a Source) -> &'a PlanNode {
        match source {
            Source::Group(g) => self.resolve_group(*g),
            Source::Node(n) => n,
        }
    }
}

/// Lookup for trees built entirely from concrete nodes.
///
/// Resolving a group reference through it is a programming error.
pub struct NoLookup;

impl Lookup for NoLookup {
    fn resolve_group(&self, group: GroupId) -> &PlanNode {
        panic!("NoLookup cannot resolve {group}")
    }

    fn group_outputs(&self, group: GroupId) -> &[Symbol] {
        panic!("NoLookup cannot resolve {group}")
    }
}

#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    expressions: Vec<PlanNode>,
    current: usize,
    outputs: Vec<Symbol>,
    parents: BTreeSet<GroupId>,
    stats: RefCell<Option<PlanNodeStatsEstimate>>,
    cost: RefCell<Option<PlanNodeCostEstimate>>,
}

impl Group {
    fn new(id: GroupId, expression: PlanNode, outputs: Vec<Symbol>) -> Self {
        Self {
            id,
            expressions: vec![expression],
            current: 0,
            outputs,
            parents: BTreeSet::new(),
            stats: RefCell::new(None),
            cost: RefCell::new(None),
        }
    }

    pub fn current(&self) -> &PlanNode {
        &self.expressions[self.current]
    }

    /// Position of the current expression in [`expressions`](Self::expressions).
    pub fn current_index(&self) -> usize {
        self.current
    }

    fn position(&self, op: &Operator, children: &[GroupId]) -> Option<usize> {
        self.expressions.iter().position(|expr| {
            expr.op == *op
                && expr.sources.len() == children.len()
                && expr
                    .sources
                    .iter()
                    .zip(children)
                    .all(|(source, child)| source.as_group() == Some(*child))
        })
    }

    /// All accepted expressions, oldest first.
    pub fn expressions(&self) -> &[PlanNode] {
        &self.expressions
    }

    pub fn outputs(&self) -> &[Symbol] {
        &self.outputs
    }

    pub fn parents(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.parents.iter().copied()
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    index: HashMap<(Operator, Vec<GroupId>), GroupId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Total number of expressions over all groups.
    pub fn num_expressions(&self) -> usize {
        self.groups.iter().map(|g| g.expressions.len()).sum()
    }

    pub fn contains(&self, id: GroupId) -> bool {
        id.0 < self.groups.len()
    }

    /// Memoize a tree bottom-up and return the group of its root.
    pub fn insert(&mut self, node: PlanNode) -> Result<GroupId> {
        let PlanNode { id, op, sources } = node;
        check_arity(&op, sources.len())?;
        let children = self.insert_sources(sources)?;
        let key = (op, children);
        if let Some(&existing) = self.index.get(&key) {
            return Ok(existing);
        }
        let (op, children) = key;
        let node = PlanNode {
            id,
            op: op.clone(),
            sources: children.iter().map(|g| Source::Group(*g)).collect(),
        };
        let outputs = node.output_symbols(&*self);
        let group_id = GroupId(self.groups.len());
        for child in &children {
            self.groups[child.0].parents.insert(group_id);
        }
        self.groups.push(Group::new(group_id, node, outputs));
        self.index.insert((op, children), group_id);
        trace!(group = group_id.0, "memoized new group");
        Ok(group_id)
    }

    fn insert_sources(&mut self, sources: Vec<Source>) -> Result<Vec<GroupId>> {
        sources
            .into_iter()
            .map(|source| match source {
                Source::Group(g) => {
                    self.check_group(g)?;
                    Ok(g)
                }
                Source::Node(n) => self.insert(*n),
            })
            .collect()
    }

    fn check_group(&self, id: GroupId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(OptimizerError::InvalidPlan(format!("unknown {id}")))
        }
    }

    /// Make `replacement` the current expression of `group`.
    ///
    /// A replacement that is a bare group reference copies that group's current
    /// expression. The replacement must produce the same set of symbols as the group
    /// and must not reach back into the group.
    ///
    /// Returns `false` when the group already held an equal expression; that
    /// expression becomes current again and nothing is added.
    pub fn replace(&mut self, group: GroupId, replacement: Source) -> Result<bool> {
        self.check_group(group)?;
        let node = match replacement {
            Source::Group(g) => {
                self.check_group(g)?;
                if g == group {
                    return Err(OptimizerError::InvalidPlan(format!(
                        "{group} replaced by itself"
                    )));
                }
                let current = self.group(g).current();
                PlanNode {
                    id: PlanNodeId::next(),
                    op: current.op.clone(),
                    sources: current.sources.clone(),
                }
            }
            Source::Node(n) => *n,
        };
        let PlanNode { id, op, sources } = node;
        check_arity(&op, sources.len())?;
        let children = self.insert_sources(sources)?;
        for &child in &children {
            if self.reaches(child, group) {
                return Err(OptimizerError::InvalidPlan(format!(
                    "replacing {group} would create a cycle through {child}"
                )));
            }
        }

        let node = PlanNode {
            id,
            op: op.clone(),
            sources: children.iter().map(|g| Source::Group(*g)).collect(),
        };
        let outputs = node.output_symbols(&*self);
        let expected: BTreeSet<_> = self.group(group).outputs.iter().collect();
        let actual: BTreeSet<_> = outputs.iter().collect();
        if expected != actual {
            return Err(OptimizerError::InvalidPlan(format!(
                "replacement for {group} outputs {actual:?}, expected {expected:?}"
            )));
        }

        if let Some(known) = self.groups[group.0].position(&op, &children) {
            let entry = &mut self.groups[group.0];
            if entry.current != known {
                entry.current = known;
                self.invalidate(group);
            }
            trace!(group = group.0, expression = known, "replacement already memoized");
            return Ok(false);
        }

        for child in &children {
            self.groups[child.0].parents.insert(group);
        }
        self.index.entry((op, children)).or_insert(group);
        let entry = &mut self.groups[group.0];
        entry.expressions.push(node);
        entry.current = entry.expressions.len() - 1;
        self.invalidate(group);
        Ok(true)
    }

    /// Whether `target` is reachable from `from` through any accepted expression.
    pub fn reaches(&self, from: GroupId, target: GroupId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(g) = stack.pop() {
            if g == target {
                return true;
            }
            if !seen.insert(g) {
                continue;
            }
            for expr in &self.groups[g.0].expressions {
                stack.extend(expr.sources.iter().filter_map(Source::as_group));
            }
        }
        false
    }

    /// Clear cached statistics and cost for `group` and all of its ancestors.
    pub fn invalidate(&self, group: GroupId) {
        let mut queue = VecDeque::from([group]);
        let mut seen = HashSet::new();
        while let Some(g) = queue.pop_front() {
            if !seen.insert(g) {
                continue;
            }
            let entry = &self.groups[g.0];
            entry.stats.replace(None);
            entry.cost.replace(None);
            queue.extend(entry.parents.iter().copied());
        }
        trace!(group = group.0, invalidated = seen.len(), "invalidated derived estimates");
    }

    pub fn cached_stats(&self, group: GroupId) -> Option<PlanNodeStatsEstimate> {
        self.group(group).stats.borrow().clone()
    }

    pub fn store_stats(&self, group: GroupId, stats: PlanNodeStatsEstimate) {
        self.group(group).stats.replace(Some(stats));
    }

    pub fn cached_cost(&self, group: GroupId) -> Option<PlanNodeCostEstimate> {
        *self.group(group).cost.borrow()
    }

    pub fn store_cost(&self, group: GroupId, cost: PlanNodeCostEstimate) {
        self.group(group).cost.replace(Some(cost));
    }

    /// Rebuild a concrete tree from `root`, taking the expression chosen by `choose`
    /// in every group.
    pub fn extract_with<F>(&self, root: GroupId, choose: &mut F) -> PlanNode
    where
        F: FnMut(&Memo, GroupId) -> usize,
    {
        let index = choose(self, root);
        let group = self.group(root);
        let expr = group
            .expressions
            .get(index)
            .unwrap_or_else(|| group.current());
        let sources = expr
            .sources
            .iter()
            .map(|s| match s {
                Source::Group(g) => Source::from(self.extract_with(*g, choose)),
                Source::Node(n) => Source::Node(n.clone()),
            })
            .collect();
        PlanNode {
            id: expr.id,
            op: expr.op.clone(),
            sources,
        }
    }

    /// Rebuild the tree of current expressions.
    pub fn extract(&self, root: GroupId) -> PlanNode {
        self.extract_with(root, &mut |memo, g| memo.group(g).current)
    }
}

impl Lookup for Memo {
    fn resolve_group(&self, group: GroupId) -> &PlanNode {
        self.group(group).current()
    }

    fn group_outputs(&self, group: GroupId) -> &[Symbol] {
        &self.group(group).outputs
    }
}

fn check_arity(op: &Operator, sources: usize) -> Result<()> {
    let expected = op.kind().arity();
    if expected == sources {
        Ok(())
    } else {
        Err(OptimizerError::InvalidPlan(format!(
            "{op} expects {expected} sources, got {sources}"
        )))
    }
}
