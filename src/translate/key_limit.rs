//! Key-limit extraction from instance-number and order-by-number
//! predicates.
//!
//! Bounds follow the engine-wide convention `lower < n ≤ upper`:
//! `rownum = V` therefore extracts `(V−1, V]`. Conjunctions merge upper
//! bounds with LEAST and lower bounds with GREATEST.

use crate::expr::{CompOp, Expr, ExprArena, ExprId, LimitExpr};
use crate::plan::{JoinType, Plan, PlanKind};
use crate::xasl::{KeyLimit, PredList, XaslNode};

/// Which numbering pseudo-column an extraction is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numbering {
    InstNum,
    OrderByNum,
}

fn is_numbering_ref(arena: &ExprArena, id: ExprId, numbering: Numbering) -> bool {
    matches!(
        (arena.get(id), numbering),
        (Expr::RowNum, Numbering::InstNum) | (Expr::OrderByNum, Numbering::OrderByNum)
    )
}

/// Extract bound contributions from one comparison leaf.
///
/// Handles `n op V` and `V op n` (reversed into canonical form first).
/// Returns false when the leaf does not fit the accepted shapes.
fn limits_from_comparison(
    arena: &ExprArena,
    expr: ExprId,
    numbering: Numbering,
    lowers: &mut Vec<LimitExpr>,
    uppers: &mut Vec<LimitExpr>,
) -> bool {
    match arena.get(expr) {
        Expr::Comparison { op, lhs, rhs } => {
            // Canonicalize into `n op value`.
            let (op, value) = if is_numbering_ref(arena, *lhs, numbering) {
                (*op, *rhs)
            } else if is_numbering_ref(arena, *rhs, numbering) {
                (op.reversed(), *lhs)
            } else {
                return false;
            };

            let Some(value) = LimitExpr::from_expr(arena, value) else {
                return false;
            };

            match op {
                CompOp::Eq => {
                    // Remember the decremented value for lower, the
                    // original for upper.
                    lowers.push(value.clone().minus_one());
                    uppers.push(value);
                }
                CompOp::Le => uppers.push(value),
                CompOp::Lt => uppers.push(value.minus_one()),
                CompOp::Ge => lowers.push(value.minus_one()),
                CompOp::Gt => lowers.push(value),
            }
            true
        }
        Expr::Between { arg, lo, hi } => {
            if !is_numbering_ref(arena, *arg, numbering) {
                return false;
            }
            let (Some(lo), Some(hi)) = (
                LimitExpr::from_expr(arena, *lo),
                LimitExpr::from_expr(arena, *hi),
            ) else {
                return false;
            };
            uppers.push(hi);
            if numbering == Numbering::InstNum {
                lowers.push(lo);
            }
            true
        }
        _ => false,
    }
}

/// Recursive extraction over an AND tree of comparisons.
pub(super) fn limits_from_pred(
    arena: &ExprArena,
    expr: ExprId,
    numbering: Numbering,
    lowers: &mut Vec<LimitExpr>,
    uppers: &mut Vec<LimitExpr>,
) -> bool {
    match arena.get(expr) {
        Expr::And { lhs, rhs } => {
            limits_from_pred(arena, *lhs, numbering, lowers, uppers)
                && limits_from_pred(arena, *rhs, numbering, lowers, uppers)
        }
        _ => limits_from_comparison(arena, expr, numbering, lowers, uppers),
    }
}

fn merge_bounds(lowers: Vec<LimitExpr>, uppers: Vec<LimitExpr>) -> Option<KeyLimit> {
    // Not having an upper limit is not helpful.
    let mut uppers = uppers.into_iter();
    let mut upper = uppers.next()?;
    for u in uppers {
        upper = upper.least(u);
    }

    let mut lowers = lowers.into_iter();
    let lower = lowers.next().map(|first| {
        let mut lower = first;
        for l in lowers {
            lower = lower.greatest(l);
        }
        lower
    });

    Some(KeyLimit { lower, upper })
}

/// Derive a key limit from a plan's instance-number predicate.
///
/// Applies only to index scans with interesting order and to INNER
/// joins; every conjunct must contribute, and an upper bound must exist.
/// Returns `None` when no key limit can be produced (not necessarily an
/// error).
pub fn key_limit_from_instnum(
    arena: &ExprArena,
    plan: &Plan,
    xasl: &XaslNode,
) -> Option<KeyLimit> {
    if xasl.instnum_pred.is_empty() {
        return None;
    }

    match &plan.kind {
        PlanKind::Scan(_) => {
            if !plan.is_interesting_order_scan() {
                return None;
            }
        }
        PlanKind::Join(join) => {
            // Only inner joins keep the instnum/key-limit equivalence.
            if join.join_type != JoinType::Inner {
                return None;
            }
        }
        _ => return None,
    }

    let mut lowers = Vec::new();
    let mut uppers = Vec::new();
    for pred in &xasl.instnum_pred {
        if !limits_from_pred(arena, pred.expr, Numbering::InstNum, &mut lowers, &mut uppers) {
            return None;
        }
    }

    merge_bounds(lowers, uppers)
}

/// Derive a key limit from a node's order-by-number predicate.
///
/// A lower bound rejects the extraction unless `ignore_lower` is set: the
/// ordbynum predicate is applied twice (sort-limit producer and top
/// plan), and a doubly-applied lower bound loses tuples. The returned
/// limit carries the upper bound only.
pub fn key_limit_from_ordbynum(
    arena: &ExprArena,
    xasl: &XaslNode,
    ignore_lower: bool,
) -> Option<KeyLimit> {
    let pred = xasl.ordbynum_pred?;

    let mut lowers = Vec::new();
    let mut uppers = Vec::new();
    if !limits_from_pred(arena, pred, Numbering::OrderByNum, &mut lowers, &mut uppers) {
        return None;
    }
    if !lowers.is_empty() && !ignore_lower {
        return None;
    }

    merge_bounds(Vec::new(), uppers)
}

/// Find the single upper-bound comparison of an `orderby_for`
/// conjunction.
///
/// The walk requires an AND-only chain: a top-level OR rejects, as does a
/// conjunction with more than one upper bound or none at all. A BETWEEN
/// is normalized into `orderby_num ≤ hi` (a new arena node).
pub fn orderby_upper_bound(arena: &mut ExprArena, orderby_for: ExprId) -> Option<ExprId> {
    match arena.get(orderby_for) {
        // orderby_for must be an expression containing only AND
        // predicates.
        Expr::Or { .. } => None,
        Expr::And { lhs, rhs } => {
            let (lhs, rhs) = (*lhs, *rhs);
            let left = orderby_upper_bound(arena, lhs);
            let right = orderby_upper_bound(arena, rhs);
            match (left, right) {
                // There should be exactly one upper bound.
                (Some(_), Some(_)) => None,
                (Some(l), None) => Some(l),
                (None, r) => r,
            }
        }
        Expr::Between { arg, hi, .. } => {
            let (arg, hi) = (*arg, *hi);
            if !is_numbering_ref(arena, arg, Numbering::OrderByNum) {
                return None;
            }
            Some(arena.comparison(CompOp::Le, arg, hi))
        }
        Expr::Comparison { op, lhs, rhs } => {
            let (op, lhs, rhs) = (*op, *lhs, *rhs);
            let op = if is_numbering_ref(arena, lhs, Numbering::OrderByNum) {
                op
            } else if is_numbering_ref(arena, rhs, Numbering::OrderByNum) {
                op.reversed()
            } else {
                // Could not find the orderby_num argument.
                return None;
            };
            match op {
                CompOp::Le | CompOp::Lt => Some(orderby_for),
                // Any other comparison operator is unusable.
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether a failed evaluation of this predicate must not terminate the
/// scan: any lower-bound-inducing comparison (`>`, `≥`, `=`, BETWEEN)
/// means earlier rows fail while later rows may still pass.
pub fn pred_needs_scan_continue(arena: &ExprArena, expr: ExprId) -> bool {
    match arena.get(expr) {
        Expr::And { lhs, rhs } | Expr::Or { lhs, rhs } => {
            pred_needs_scan_continue(arena, *lhs) || pred_needs_scan_continue(arena, *rhs)
        }
        Expr::Between { .. } => true,
        Expr::Comparison { op, lhs, rhs } => {
            let numbering_on_left = matches!(arena.get(*lhs), Expr::RowNum | Expr::OrderByNum);
            let numbering_on_right = matches!(arena.get(*rhs), Expr::RowNum | Expr::OrderByNum);
            if !numbering_on_left && !numbering_on_right {
                return false;
            }
            let op = if numbering_on_left { *op } else { op.reversed() };
            matches!(op, CompOp::Gt | CompOp::Ge | CompOp::Eq)
        }
        _ => false,
    }
}

/// Continuation flag over a whole predicate list.
pub fn pred_list_needs_scan_continue(arena: &ExprArena, preds: &PredList) -> bool {
    preds
        .iter()
        .any(|p| pred_needs_scan_continue(arena, p.expr))
}
