//! # Expression Canonicalization
//!
//! Rewrites a scalar expression into a deterministic, semantically equivalent normal
//! form. Rules compare a node's expression against its canonical form to decide
//! whether they would actually change anything; that comparison is what lets the
//! driver reach a fixed point instead of re-emitting structurally different but
//! equivalent predicates forever.
//!
//! ## Normal Form
//!
//! - Children are canonicalized first (bottom-up).
//! - Nested `AND`/`OR` lists are flattened; neutral literals are dropped (`true` in
//!   `AND`, `false` in `OR`) and absorbing literals short-circuit the whole list.
//! - Duplicate deterministic terms of an `AND`/`OR` are removed and the remaining
//!   terms are sorted by [`canonical_order`].
//! - Binary operators with a flipped form (`=`, `<>`, `+`, `*`, and the ordering
//!   comparisons) are oriented so the lower-keyed operand is on the left. Literals
//!   sort last, so `5 < x` becomes `x > 5`.
//! - Constants are folded with SQL three-valued semantics. Integer overflow and
//!   division by zero are runtime errors in SQL and are never folded away.
//! - `NOT NOT x` becomes `x`; `NOT` is absorbed by comparisons and null checks.
//!
//! The canonical form is a fixed point: canonicalizing it again returns it unchanged.
//! [`canonicalize_checked`] verifies that at runtime.

use crate::error::{OptimizerError, Result};
use crate::expr::{BinaryOp, Expr, ScalarValue, UnaryOp};
use std::cmp::Ordering;

/// Canonicalize `expr`. Pure; never fails.
pub fn canonicalize_expression(expr: &Expr) -> Expr {
    match expr {
        Expr::Symbol(_) | Expr::Literal(_) => expr.clone(),
        Expr::BinaryOp { op, left, right } => canonical_binary(
            *op,
            canonicalize_expression(left),
            canonicalize_expression(right),
        ),
        Expr::UnaryOp { op, operand } => canonical_unary(*op, canonicalize_expression(operand)),
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: args.iter().map(canonicalize_expression).collect(),
        },
        Expr::And(terms) => canonical_connective(
            Connective::And,
            terms.iter().map(canonicalize_expression).collect(),
        ),
        Expr::Or(terms) => canonical_connective(
            Connective::Or,
            terms.iter().map(canonicalize_expression).collect(),
        ),
    }
}

/// Canonicalize and verify that a second pass is a no-op.
pub fn canonicalize_checked(expr: &Expr) -> Result<Expr> {
    let first = canonicalize_expression(expr);
    let second = canonicalize_expression(&first);
    if first != second {
        return Err(OptimizerError::CanonicalizationNonIdempotent {
            original: expr.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        });
    }
    Ok(first)
}

pub fn is_canonical(expr: &Expr) -> bool {
    canonicalize_expression(expr) == *expr
}

/// Deterministic total order used for operand placement.
///
/// Symbols first, then calls and compound expressions, literals last; ties are broken
/// by the structural order of the expressions themselves.
pub fn canonical_order(a: &Expr, b: &Expr) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

fn rank(expr: &Expr) -> u8 {
    match expr {
        Expr::Symbol(_) => 0,
        Expr::Function { .. } => 1,
        Expr::UnaryOp { .. } => 2,
        Expr::BinaryOp { .. } => 3,
        Expr::And(_) => 4,
        Expr::Or(_) => 5,
        Expr::Literal(_) => 6,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

fn canonical_connective(connective: Connective, terms: Vec<Expr>) -> Expr {
    // (neutral, absorbing) literal for the connective
    let (neutral, absorbing) = match connective {
        Connective::And => (true, false),
        Connective::Or => (false, true),
    };

    let mut flat = Vec::with_capacity(terms.len());
    for term in terms {
        match (connective, term) {
            (Connective::And, Expr::And(inner)) | (Connective::Or, Expr::Or(inner)) => {
                flat.extend(inner)
            }
            (_, other) => flat.push(other),
        }
    }

    let mut kept = Vec::with_capacity(flat.len());
    for term in flat {
        match term {
            Expr::Literal(ScalarValue::Bool(b)) if b == neutral => {}
            Expr::Literal(ScalarValue::Bool(b)) if b == absorbing => return Expr::boolean(absorbing),
            other => kept.push(other),
        }
    }

    kept.sort_by(canonical_order);
    kept.dedup_by(|next, prev| next == prev && next.is_deterministic());

    match connective {
        Connective::And => Expr::and_all(kept),
        Connective::Or => Expr::or_all(kept),
    }
}

fn canonical_unary(op: UnaryOp, operand: Expr) -> Expr {
    match (op, operand) {
        (UnaryOp::Not, Expr::Literal(ScalarValue::Bool(b))) => Expr::boolean(!b),
        (UnaryOp::Not, Expr::UnaryOp { op: UnaryOp::Not, operand }) => *operand,
        (UnaryOp::Not, Expr::UnaryOp { op: UnaryOp::IsNull, operand }) => {
            Expr::unary(UnaryOp::IsNotNull, *operand)
        }
        (UnaryOp::Not, Expr::UnaryOp { op: UnaryOp::IsNotNull, operand }) => {
            Expr::unary(UnaryOp::IsNull, *operand)
        }
        (UnaryOp::Not, Expr::BinaryOp { op, left, right }) => match op.negate() {
            Some(negated) => Expr::BinaryOp {
                op: negated,
                left,
                right,
            },
            None => Expr::not(Expr::BinaryOp { op, left, right }),
        },
        (UnaryOp::Neg, Expr::Literal(ScalarValue::Int64(v))) => match v.checked_neg() {
            Some(n) => Expr::int(n),
            None => Expr::unary(UnaryOp::Neg, Expr::int(v)),
        },
        (UnaryOp::Neg, Expr::Literal(ScalarValue::Float64(v))) => {
            Expr::Literal(ScalarValue::float(-v.0))
        }
        (UnaryOp::Not | UnaryOp::Neg, Expr::Literal(ScalarValue::Null)) => Expr::NULL,
        (UnaryOp::IsNull, Expr::Literal(v)) => Expr::boolean(v.is_null()),
        (UnaryOp::IsNotNull, Expr::Literal(v)) => Expr::boolean(!v.is_null()),
        (op, operand) => Expr::unary(op, operand),
    }
}

fn canonical_binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    if let (Expr::Literal(l), Expr::Literal(r)) = (&left, &right) {
        if let Some(folded) = fold_binary(op, l, r) {
            return Expr::Literal(folded);
        }
    }
    let null_operand = matches!(left, Expr::Literal(ScalarValue::Null))
        || matches!(right, Expr::Literal(ScalarValue::Null));
    if null_operand {
        return Expr::NULL;
    }

    match op.flip() {
        Some(flipped) if canonical_order(&left, &right) == Ordering::Greater => {
            Expr::binary(flipped, right, left)
        }
        _ => Expr::binary(op, left, right),
    }
}

fn fold_binary(op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> Option<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Some(ScalarValue::Null);
    }
    if op.is_comparison() {
        let ordering = compare_literals(left, right)?;
        let result = match op {
            BinaryOp::Eq => ordering == Ordering::Equal,
            BinaryOp::NotEq => ordering != Ordering::Equal,
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::LtEq => ordering != Ordering::Greater,
            BinaryOp::Gt => ordering == Ordering::Greater,
            BinaryOp::GtEq => ordering != Ordering::Less,
            _ => return None,
        };
        return Some(ScalarValue::Bool(result));
    }
    match (left, right) {
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => {
            let v = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => a.checked_div(*b),
                _ => None,
            }?;
            Some(ScalarValue::Int64(v))
        }
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => {
            let v = match op {
                BinaryOp::Add => a.0 + b.0,
                BinaryOp::Sub => a.0 - b.0,
                BinaryOp::Mul => a.0 * b.0,
                BinaryOp::Div => a.0 / b.0,
                _ => return None,
            };
            v.is_finite().then(|| ScalarValue::float(v))
        }
        _ => None,
    }
}

/// Compare two non-null literals of the same type.
fn compare_literals(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    match (left, right) {
        (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Some(a.cmp(b)),
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => Some(a.cmp(b)),
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
        (ScalarValue::Date(a), ScalarValue::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::binary(op, l, r)
    }

    fn x() -> Expr {
        Expr::symbol("x")
    }

    fn y() -> Expr {
        Expr::symbol("y")
    }

    #[test]
    fn test_tautology_conjunct_is_dropped() {
        // 1 = 1 AND x > 5  ->  x > 5
        let e = Expr::And(vec![
            cmp(BinaryOp::Eq, Expr::int(1), Expr::int(1)),
            cmp(BinaryOp::Gt, x(), Expr::int(5)),
        ]);
        assert_eq!(
            canonicalize_expression(&e),
            cmp(BinaryOp::Gt, x(), Expr::int(5))
        );
    }

    #[test]
    fn test_literal_moves_right_and_operator_flips() {
        let e = cmp(BinaryOp::Lt, Expr::int(5), x());
        assert_eq!(canonicalize_expression(&e), cmp(BinaryOp::Gt, x(), Expr::int(5)));
    }

    #[test]
    fn test_commutative_operands_are_ordered() {
        let a = cmp(BinaryOp::Eq, y(), x());
        let b = cmp(BinaryOp::Eq, x(), y());
        assert_eq!(canonicalize_expression(&a), canonicalize_expression(&b));
    }

    #[test]
    fn test_conjunct_order_does_not_matter() {
        let p = cmp(BinaryOp::Gt, x(), Expr::int(1));
        let q = cmp(BinaryOp::Lt, y(), Expr::int(2));
        let a = Expr::And(vec![p.clone(), q.clone()]);
        let b = Expr::And(vec![q, Expr::And(vec![p.clone(), p])]);
        assert_eq!(canonicalize_expression(&a), canonicalize_expression(&b));
    }

    #[test]
    fn test_double_negation_removed() {
        let e = Expr::not(Expr::not(x()));
        assert_eq!(canonicalize_expression(&e), x());
    }

    #[test]
    fn test_not_absorbed_by_comparison() {
        let e = Expr::not(cmp(BinaryOp::Gt, x(), Expr::int(5)));
        assert_eq!(canonicalize_expression(&e), cmp(BinaryOp::LtEq, x(), Expr::int(5)));
        let e = Expr::not(Expr::unary(UnaryOp::IsNull, x()));
        assert_eq!(canonicalize_expression(&e), Expr::unary(UnaryOp::IsNotNull, x()));
    }

    #[test]
    fn test_null_semantics() {
        assert_eq!(
            canonicalize_expression(&cmp(BinaryOp::Eq, x(), Expr::NULL)),
            Expr::NULL
        );
        // NULL AND false is false, NULL AND true is NULL
        assert_eq!(
            canonicalize_expression(&Expr::And(vec![Expr::NULL, Expr::FALSE])),
            Expr::FALSE
        );
        assert_eq!(
            canonicalize_expression(&Expr::And(vec![Expr::NULL, Expr::TRUE])),
            Expr::NULL
        );
        assert_eq!(
            canonicalize_expression(&Expr::unary(UnaryOp::IsNull, Expr::NULL)),
            Expr::TRUE
        );
    }

    #[test]
    fn test_overflow_and_division_by_zero_are_not_folded() {
        let overflow = cmp(BinaryOp::Add, Expr::int(i64::MAX), Expr::int(1));
        assert_eq!(canonicalize_expression(&overflow), overflow);
        let div = cmp(BinaryOp::Div, Expr::int(1), Expr::int(0));
        assert_eq!(canonicalize_expression(&div), div);
        assert_eq!(
            canonicalize_expression(&cmp(BinaryOp::Mul, Expr::int(6), Expr::int(7))),
            Expr::int(42)
        );
    }

    #[test]
    fn test_non_deterministic_terms_are_kept() {
        let r = cmp(
            BinaryOp::Gt,
            Expr::function("random", vec![]),
            Expr::Literal(ScalarValue::float(0.5)),
        );
        let e = Expr::And(vec![r.clone(), r.clone()]);
        assert_eq!(canonicalize_expression(&e), Expr::And(vec![r.clone(), r]));
    }

    #[test]
    fn test_absorbing_literal_short_circuits() {
        let e = Expr::Or(vec![x(), Expr::TRUE]);
        assert_eq!(canonicalize_expression(&e), Expr::TRUE);
        assert_eq!(canonicalize_expression(&Expr::And(vec![])), Expr::TRUE);
        assert_eq!(canonicalize_expression(&Expr::Or(vec![])), Expr::FALSE);
    }

    #[test]
    fn test_idempotent_for_many_shapes() {
        let shapes = vec![
            Expr::And(vec![
                cmp(BinaryOp::Eq, Expr::int(1), Expr::int(1)),
                cmp(BinaryOp::Gt, x(), Expr::int(5)),
            ]),
            Expr::Or(vec![
                Expr::And(vec![y(), x()]),
                Expr::not(Expr::not(Expr::And(vec![x(), y()]))),
                Expr::FALSE,
            ]),
            cmp(
                BinaryOp::Add,
                Expr::int(3),
                cmp(BinaryOp::Mul, y(), Expr::int(2)),
            ),
            Expr::not(Expr::Or(vec![x(), Expr::unary(UnaryOp::IsNotNull, y())])),
            cmp(BinaryOp::Sub, Expr::int(1), x()),
            Expr::function("lower", vec![Expr::string("A"), cmp(BinaryOp::Lt, Expr::int(2), x())]),
            Expr::unary(UnaryOp::Neg, Expr::int(i64::MIN)),
            cmp(BinaryOp::Div, Expr::int(i64::MIN), Expr::int(-1)),
        ];
        for shape in shapes {
            let once = canonicalize_expression(&shape);
            let twice = canonicalize_expression(&once);
            assert_eq!(once, twice, "not idempotent for {shape}");
            assert!(canonicalize_checked(&shape).is_ok());
            assert!(is_canonical(&once));
        }
    }
}
