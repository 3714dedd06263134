//! # Plan Tree Model
//!
//! A [`PlanNode`] is an immutable operator instance: a process-unique identifier, an
//! [`Operator`] payload and an ordered list of [`Source`]s. A source is either a
//! concrete child node or a reference to a memo group, which is how the memo shares
//! sub-plans between alternatives without copying them.
//!
//! Rewrites never mutate a node. Rules build new nodes with [`PlanNode::new`], which
//! always allocates a fresh [`PlanNodeId`].
//!
//! ## Operator Kinds
//!
//! [`OperatorKind`] is the closed, payload-free discriminant of [`Operator`]. Pattern
//! matching, statistics rules and cost rules all dispatch on it with exhaustive
//! `match`es, so adding an operator is a compile error everywhere a handler is missing.

use crate::expr::Expr;
use crate::memo::{GroupId, Lookup};
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PLAN_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(u64);

impl PlanNodeId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        PlanNodeId(NEXT_PLAN_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Binds an output symbol of a table scan to a catalog column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnAssignment {
    pub symbol: Symbol,
    pub column: String,
}

/// `symbol := expr` in a projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Assignment {
    pub symbol: Symbol,
    pub expr: Expr,
}

impl Assignment {
    pub fn new(symbol: impl Into<Symbol>, expr: Expr) -> Self {
        Self {
            symbol: symbol.into(),
            expr,
        }
    }

    pub fn identity(symbol: Symbol) -> Self {
        Self {
            expr: Expr::Symbol(symbol.clone()),
            symbol,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.expr.as_symbol() == Some(&self.symbol)
    }
}

/// SQL join types.
///
/// Only inner and cross joins are symmetric; every other type has fixed left/right
/// semantics, which limits the rewrites that may be applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JoinType {
    /// Inner join: only matching rows from both sides.
    Inner,
    /// Left outer join: all rows from left, matching from right (or NULLs).
    Left,
    /// Right outer join: all rows from right, matching from left (or NULLs).
    Right,
    /// Full outer join: all rows from both sides, NULLs where no match.
    Full,
    /// Semi join: left rows that have at least one match on the right (no right columns).
    Semi,
    /// Anti join: left rows that have no match on the right.
    Anti,
    /// Cross join: Cartesian product of both sides.
    Cross,
}

impl JoinType {
    /// Whether the right side's symbols are part of the join output.
    pub fn outputs_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate computed by an aggregation node: `output := func(argument)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aggregation {
    pub output: Symbol,
    pub func: AggFunc,
    /// `None` for `count(*)`.
    pub argument: Option<Expr>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey {
    pub symbol: Symbol,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// Data distribution produced by an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Distribution {
    /// All data gathered on a single node.
    Single,
    /// Every row replicated to all nodes. Cost grows with the cluster size.
    Broadcast,
    /// Hash-partitioned on the given symbols.
    Hash(Vec<Symbol>),
    /// Round-robin distribution for load balancing.
    RoundRobin,
}

/// Whether an exchange crosses the network or only redistributes within a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExchangeScope {
    Local,
    Remote,
}

/// Relational operator payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    /// Leaf: reads a base table. `predicate` is a filter already pushed into the scan.
    TableScan {
        table: TableRef,
        assignments: Vec<ColumnAssignment>,
        predicate: Option<Expr>,
    },
    /// Leaf: literal rows. Every row has one expression per output symbol.
    Values {
        outputs: Vec<Symbol>,
        rows: Vec<Vec<Expr>>,
    },
    /// Discards rows of its single source for which `predicate` is not true.
    Filter { predicate: Expr },
    /// Computes one expression per output symbol from its single source.
    Project { assignments: Vec<Assignment> },
    /// Combines two sources. `condition` is `true` for a plain cross product.
    Join { join_type: JoinType, condition: Expr },
    /// Groups by `group_by` and computes `aggregates` per group.
    Aggregate {
        group_by: Vec<Symbol>,
        aggregates: Vec<Aggregation>,
    },
    Sort { order: Vec<SortKey> },
    /// Skips `offset` rows and returns at most `count` rows.
    Limit { offset: u64, count: u64 },
    /// Redistributes rows of its single source.
    Exchange {
        distribution: Distribution,
        scope: ExchangeScope,
    },
}

/// Payload-free discriminant of [`Operator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    TableScan,
    Values,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
    Exchange,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 9] = [
        OperatorKind::TableScan,
        OperatorKind::Values,
        OperatorKind::Filter,
        OperatorKind::Project,
        OperatorKind::Join,
        OperatorKind::Aggregate,
        OperatorKind::Sort,
        OperatorKind::Limit,
        OperatorKind::Exchange,
    ];

    /// Number of sources an operator of this kind takes.
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::TableScan | OperatorKind::Values => 0,
            OperatorKind::Join => 2,
            OperatorKind::Filter
            | OperatorKind::Project
            | OperatorKind::Aggregate
            | OperatorKind::Sort
            | OperatorKind::Limit
            | OperatorKind::Exchange => 1,
        }
    }
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::TableScan { .. } => OperatorKind::TableScan,
            Operator::Values { .. } => OperatorKind::Values,
            Operator::Filter { .. } => OperatorKind::Filter,
            Operator::Project { .. } => OperatorKind::Project,
            Operator::Join { .. } => OperatorKind::Join,
            Operator::Aggregate { .. } => OperatorKind::Aggregate,
            Operator::Sort { .. } => OperatorKind::Sort,
            Operator::Limit { .. } => OperatorKind::Limit,
            Operator::Exchange { .. } => OperatorKind::Exchange,
        }
    }

    /// Scalar expressions embedded in the payload.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Operator::TableScan { predicate, .. } => predicate.iter().collect(),
            Operator::Values { rows, .. } => rows.iter().flatten().collect(),
            Operator::Filter { predicate } => vec![predicate],
            Operator::Project { assignments } => assignments.iter().map(|a| &a.expr).collect(),
            Operator::Join { condition, .. } => vec![condition],
            Operator::Aggregate { aggregates, .. } => {
                aggregates.iter().filter_map(|a| a.argument.as_ref()).collect()
            }
            Operator::Sort { .. } | Operator::Limit { .. } | Operator::Exchange { .. } => vec![],
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::TableScan {
                table,
                assignments,
                predicate,
            } => {
                let cols: Vec<_> = assignments.iter().map(|a| a.symbol.name()).collect();
                write!(f, "TableScan[{table}, {cols:?}")?;
                if let Some(p) = predicate {
                    write!(f, ", {p}")?;
                }
                write!(f, "]")
            }
            Operator::Values { outputs, rows } => {
                write!(f, "Values[{} cols, {} rows]", outputs.len(), rows.len())
            }
            Operator::Filter { predicate } => write!(f, "Filter[{predicate}]"),
            Operator::Project { assignments } => {
                write!(f, "Project[")?;
                for (i, a) in assignments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} := {}", a.symbol, a.expr)?;
                }
                write!(f, "]")
            }
            Operator::Join {
                join_type,
                condition,
            } => write!(f, "Join[{join_type:?}, {condition}]"),
            Operator::Aggregate {
                group_by,
                aggregates,
            } => {
                let keys: Vec<_> = group_by.iter().map(Symbol::name).collect();
                write!(f, "Aggregate[{keys:?}, {} aggregates]", aggregates.len())
            }
            Operator::Sort { order } => {
                let keys: Vec<_> = order.iter().map(|k| k.symbol.name()).collect();
                write!(f, "Sort[{keys:?}]")
            }
            Operator::Limit { offset, count } => write!(f, "Limit[{count} offset {offset}]"),
            Operator::Exchange {
                distribution,
                scope,
            } => write!(f, "Exchange[{scope:?}, {distribution:?}]"),
        }
    }
}

/// A child reference: either a memo group or a concrete node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Group(GroupId),
    Node(Box<PlanNode>),
}

impl Source {
    pub fn as_group(&self) -> Option<GroupId> {
        match self {
            Source::Group(g) => Some(*g),
            Source::Node(_) => None,
        }
    }

    pub fn output_symbols(&self, lookup: &dyn Lookup) -> Vec<Symbol> {
        match self {
            Source::Group(g) => lookup.group_outputs(*g).to_vec(),
            Source::Node(n) => n.output_symbols(lookup),
        }
    }
}

impl From<PlanNode> for Source {
    fn from(node: PlanNode) -> Self {
        Source::Node(Box::new(node))
    }
}

impl From<GroupId> for Source {
    fn from(group: GroupId) -> Self {
        Source::Group(group)
    }
}

/// An immutable operator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub op: Operator,
    pub sources: Vec<Source>,
}

impl PlanNode {
    /// Build a node with a fresh identifier.
    pub fn new(op: Operator, sources: Vec<Source>) -> Self {
        Self {
            id: PlanNodeId::next(),
            op,
            sources,
        }
    }

    pub fn kind(&self) -> OperatorKind {
        self.op.kind()
    }

    /// Same operator over different sources, with a fresh identifier.
    pub fn with_sources(&self, sources: Vec<Source>) -> Self {
        PlanNode::new(self.op.clone(), sources)
    }

    pub fn table_scan(table: TableRef, columns: &[(&str, &str)]) -> Self {
        let assignments = columns
            .iter()
            .map(|(symbol, column)| ColumnAssignment {
                symbol: Symbol::new(*symbol),
                column: (*column).to_string(),
            })
            .collect();
        PlanNode::new(
            Operator::TableScan {
                table,
                assignments,
                predicate: None,
            },
            vec![],
        )
    }

    pub fn values(outputs: Vec<Symbol>, rows: Vec<Vec<Expr>>) -> Self {
        PlanNode::new(Operator::Values { outputs, rows }, vec![])
    }

    pub fn filter(predicate: Expr, source: impl Into<Source>) -> Self {
        PlanNode::new(Operator::Filter { predicate }, vec![source.into()])
    }

    pub fn project(assignments: Vec<Assignment>, source: impl Into<Source>) -> Self {
        PlanNode::new(Operator::Project { assignments }, vec![source.into()])
    }

    pub fn join(
        join_type: JoinType,
        condition: Expr,
        left: impl Into<Source>,
        right: impl Into<Source>,
    ) -> Self {
        PlanNode::new(
            Operator::Join {
                join_type,
                condition,
            },
            vec![left.into(), right.into()],
        )
    }

    pub fn limit(count: u64, source: impl Into<Source>) -> Self {
        PlanNode::new(Operator::Limit { offset: 0, count }, vec![source.into()])
    }

    /// Symbols produced by this node, in order.
    pub fn output_symbols(&self, lookup: &dyn Lookup) -> Vec<Symbol> {
        match &self.op {
            Operator::TableScan { assignments, .. } => {
                assignments.iter().map(|a| a.symbol.clone()).collect()
            }
            Operator::Values { outputs, .. } => outputs.clone(),
            Operator::Project { assignments } => {
                assignments.iter().map(|a| a.symbol.clone()).collect()
            }
            Operator::Aggregate {
                group_by,
                aggregates,
            } => group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|a| a.output.clone()))
                .collect(),
            Operator::Join { join_type, .. } => {
                let mut out = self.source_outputs(0, lookup);
                if join_type.outputs_right() {
                    out.extend(self.source_outputs(1, lookup));
                }
                out
            }
            Operator::Filter { .. }
            | Operator::Sort { .. }
            | Operator::Limit { .. }
            | Operator::Exchange { .. } => self.source_outputs(0, lookup),
        }
    }

    fn source_outputs(&self, index: usize, lookup: &dyn Lookup) -> Vec<Symbol> {
        self.sources
            .get(index)
            .map(|s| s.output_symbols(lookup))
            .unwrap_or_default()
    }

    /// Render the tree, one node per line. Group references are printed as-is.
    pub fn display(&self, indent: usize) -> String {
        let mut out = String::new();
        self.write_tree(indent, &mut out);
        out
    }

    fn write_tree(&self, indent: usize, out: &mut String) {
        let _ = writeln!(out, "{:width$}{}", "", self.op, width = indent * 2);
        for source in &self.sources {
            match source {
                Source::Node(n) => n.write_tree(indent + 1, out),
                Source::Group(g) => {
                    let _ = writeln!(out, "{:width$}{}", "", g, width = (indent + 1) * 2);
                }
            }
        }
    }
}
