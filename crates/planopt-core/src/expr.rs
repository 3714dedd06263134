//! # Scalar Expressions
//!
//! Scalar expressions represent computations on individual rows: symbol references,
//! literal values, arithmetic, comparisons, boolean logic and function calls. They
//! appear inside filter predicates, projections, join conditions and pushed-down
//! scan predicates.
//!
//! Every type here is `Eq + Hash + Ord`. Hashing is required for memo deduplication
//! (operators embed expressions) and the total order is what the canonicalizer uses
//! to put commutative operands into a deterministic order.

use crate::symbol::Symbol;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that floating-point literals can take part in
/// Eq/Hash/Ord comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value.
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point.
    Float64(OrderedFloat<f64>),
    /// UTF-8 string.
    Utf8(String),
    /// Date as days since Unix epoch (1970-01-01).
    Date(i32),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Numeric view of the value, used for low/high statistics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(v.0),
            ScalarValue::Date(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn float(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{:?}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE({v})"),
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a symbol produced by a source of the enclosing operator.
    Symbol(Symbol),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `x IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Named function call (e.g., `upper(name)`). Resolution happens upstream.
    Function { name: String, args: Vec<Expr> },
    /// Conjunction stored as a flat list to simplify predicate decomposition.
    And(Vec<Expr>),
    /// Disjunction stored as a flat list.
    Or(Vec<Expr>),
}

/// Functions whose result may differ between two evaluations on the same row.
const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &["random", "rand", "uuid", "shuffle", "now"];

impl Expr {
    pub const TRUE: Expr = Expr::Literal(ScalarValue::Bool(true));
    pub const FALSE: Expr = Expr::Literal(ScalarValue::Bool(false));
    pub const NULL: Expr = Expr::Literal(ScalarValue::Null);

    pub fn symbol(name: impl Into<Symbol>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::Literal(ScalarValue::Bool(v))
    }

    pub fn string(v: impl Into<String>) -> Expr {
        Expr::Literal(ScalarValue::Utf8(v.into()))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// Combine predicates with AND; an empty list is `true`.
    pub fn and_all(mut terms: Vec<Expr>) -> Expr {
        match terms.len() {
            0 => Expr::TRUE,
            1 => terms.swap_remove(0),
            _ => Expr::And(terms),
        }
    }

    /// Combine predicates with OR; an empty list is `false`.
    pub fn or_all(mut terms: Vec<Expr>) -> Expr {
        match terms.len() {
            0 => Expr::FALSE,
            1 => terms.swap_remove(0),
            _ => Expr::Or(terms),
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    /// `false` and NULL both reject every row when used as a predicate.
    pub fn rejects_all(&self) -> bool {
        matches!(
            self,
            Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null)
        )
    }

    /// Return all symbol references in this expression, in visit order.
    pub fn symbols(&self) -> Vec<&Symbol> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    /// Distinct symbols referenced by this expression.
    pub fn referenced_symbols(&self) -> BTreeSet<Symbol> {
        self.symbols().into_iter().cloned().collect()
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a Symbol>) {
        match self {
            Expr::Symbol(s) => out.push(s),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_symbols(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_symbols(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_symbols(out);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Flatten OR-chains: (A OR (B OR C)) → [A, B, C].
    pub fn disjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Or(exprs) => exprs.iter().flat_map(|e| e.disjuncts()).collect(),
            other => vec![other],
        }
    }

    pub fn is_deterministic(&self) -> bool {
        match self {
            Expr::Symbol(_) | Expr::Literal(_) => true,
            Expr::BinaryOp { left, right, .. } => {
                left.is_deterministic() && right.is_deterministic()
            }
            Expr::UnaryOp { operand, .. } => operand.is_deterministic(),
            Expr::Function { name, args } => {
                !NON_DETERMINISTIC_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
                    && args.iter().all(Expr::is_deterministic)
            }
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().all(Expr::is_deterministic),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "(NOT {operand})"),
                UnaryOp::Neg => write!(f, "(-{operand})"),
                UnaryOp::IsNull => write!(f, "({operand} IS NULL)"),
                UnaryOp::IsNotNull => write!(f, "({operand} IS NOT NULL)"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality comparison (`=`). Used heavily in join conditions and filters.
    Eq,
    /// Inequality comparison (`<>`).
    NotEq,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    LtEq,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    GtEq,
    /// Addition (`+`).
    Add,
    /// Subtraction (`-`).
    Sub,
    /// Multiplication (`*`).
    Mul,
    /// Division (`/`).
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    /// Whether `a op b == b op a`.
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Add | BinaryOp::Mul)
    }

    /// Operator to use when the operands are swapped: `a < b` ⇔ `b > a`.
    /// `None` for non-commutative arithmetic.
    pub fn flip(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::LtEq => Some(BinaryOp::GtEq),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::GtEq => Some(BinaryOp::LtEq),
            op if op.is_commutative() => Some(*op),
            _ => None,
        }
    }

    /// Logical complement of a comparison: `NOT (a < b)` ⇔ `a >= b`.
    pub fn negate(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::NotEq),
            BinaryOp::NotEq => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::GtEq),
            BinaryOp::LtEq => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::LtEq),
            BinaryOp::GtEq => Some(BinaryOp::Lt),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation (`NOT`).
    Not,
    /// Arithmetic negation (unary minus).
    Neg,
    /// Null check (`IS NULL`).
    IsNull,
    /// Non-null check (`IS NOT NULL`).
    IsNotNull,
}
