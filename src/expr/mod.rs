//! # Expression Arena
//!
//! Predicate expressions are produced by the parser and shared by the
//! plan tree and the execution tree. Plans never deep-copy them: every
//! consumer holds an `ExprId` into one [`ExprArena`] whose lifetime
//! strictly contains translation and execution. Predicate lists are
//! therefore lists of pointer nodes (id + selectivity + rank), never
//! clones.
//!
//! The arena also hosts the key-limit register expressions
//! ([`LimitExpr`]) derived from `rownum` / `orderby_num` predicates.

use crate::error::{EngineError, EngineResult};
use crate::value::{self, DbValue};

/// Index of an expression in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub usize);

/// Comparison operators appearing in normalized predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompOp {
    /// Mirror the operator across the comparison, turning `V op n` into
    /// `n op' V`.
    pub fn reversed(self) -> CompOp {
        match self {
            CompOp::Eq => CompOp::Eq,
            CompOp::Lt => CompOp::Gt,
            CompOp::Le => CompOp::Ge,
            CompOp::Gt => CompOp::Lt,
            CompOp::Ge => CompOp::Le,
        }
    }
}

/// Arithmetic operators usable inside limit comparands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

/// A parsed predicate or operand expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal constant
    Const(DbValue),
    /// Positional host variable (query parameter)
    HostVar(usize),
    /// Column reference, by segment id
    SegmentRef(usize),
    /// The query's running row counter (`rownum`)
    RowNum,
    /// The order-by row counter
    OrderByNum,
    Comparison {
        op: CompOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// `arg IN (elems…)`
    InList {
        arg: ExprId,
        elems: Vec<ExprId>,
    },
    /// `arg BETWEEN lo AND hi`
    Between {
        arg: ExprId,
        lo: ExprId,
        hi: ExprId,
    },
    /// A range term whose every sub-range collapses to an equality
    /// (`arg RANGE (k1 = , k2 = , …)`); behaves like a key list
    RangeEqList {
        arg: ExprId,
        keys: Vec<ExprId>,
    },
    And {
        lhs: ExprId,
        rhs: ExprId,
    },
    Or {
        lhs: ExprId,
        rhs: ExprId,
    },
    Arith {
        op: ArithOp,
        lhs: ExprId,
        rhs: ExprId,
    },
}

/// Owning store for every expression of one compiled statement.
#[derive(Debug, Default)]
pub struct ExprArena {
    exprs: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena { exprs: Vec::new() }
    }

    pub fn push(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len());
        self.exprs.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    // Convenience constructors used by the planner front end and tests.

    pub fn constant(&mut self, v: DbValue) -> ExprId {
        self.push(Expr::Const(v))
    }

    pub fn host_var(&mut self, pos: usize) -> ExprId {
        self.push(Expr::HostVar(pos))
    }

    pub fn segment(&mut self, seg: usize) -> ExprId {
        self.push(Expr::SegmentRef(seg))
    }

    pub fn comparison(&mut self, op: CompOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(Expr::Comparison { op, lhs, rhs })
    }

    pub fn and(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(Expr::And { lhs, rhs })
    }

    pub fn arith(&mut self, op: ArithOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(Expr::Arith { op, lhs, rhs })
    }

    /// The comparison operator shape of a term expression, used by the
    /// multi-range analyzer to classify leading-column terms.
    pub fn term_shape(&self, id: ExprId) -> TermShape {
        match self.get(id) {
            Expr::Comparison { op: CompOp::Eq, .. } => TermShape::Equality,
            Expr::InList { .. } | Expr::RangeEqList { .. } => TermShape::KeyList,
            _ => TermShape::Other,
        }
    }

    /// True when the expression tree references `rownum` or
    /// `orderby_num` through an IN/RANGE construct anywhere below `id`.
    pub fn is_range_like(&self, id: ExprId) -> bool {
        matches!(
            self.get(id),
            Expr::InList { .. } | Expr::Between { .. } | Expr::RangeEqList { .. }
        )
    }
}

/// Shape classification for multi-range term checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermShape {
    /// Pure `col = value`
    Equality,
    /// `col IN (…)` or an equivalent range-as-equality list
    KeyList,
    /// Anything else; disqualifies the optimization
    Other,
}

/// Operators usable in derived key-limit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOp {
    Add,
    Sub,
    Mul,
    /// Bound merge for upper limits
    Least,
    /// Bound merge for lower limits
    Greatest,
}

/// A register expression describing one key-limit bound.
///
/// Limit registers are built from constants, host variables, and simple
/// arithmetic over those; anything else is rejected at extraction time.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitExpr {
    Const(DbValue),
    HostVar(usize),
    Arith(LimitOp, Box<LimitExpr>, Box<LimitExpr>),
}

impl LimitExpr {
    /// `expr − 1`, the decrement used when converting inclusive bounds to
    /// the engine-wide `lower < n ≤ upper` convention.
    pub fn minus_one(self) -> LimitExpr {
        LimitExpr::Arith(
            LimitOp::Sub,
            Box::new(self),
            Box::new(LimitExpr::Const(DbValue::Int(1))),
        )
    }

    /// Fold `other` into `self` with LEAST (upper bounds).
    pub fn least(self, other: LimitExpr) -> LimitExpr {
        LimitExpr::Arith(LimitOp::Least, Box::new(self), Box::new(other))
    }

    /// Fold `other` into `self` with GREATEST (lower bounds).
    pub fn greatest(self, other: LimitExpr) -> LimitExpr {
        LimitExpr::Arith(LimitOp::Greatest, Box::new(self), Box::new(other))
    }

    /// Validate-and-convert an arena expression into a limit register.
    ///
    /// Returns `None` for any shape other than constant / host variable /
    /// simple arithmetic over such.
    pub fn from_expr(arena: &ExprArena, id: ExprId) -> Option<LimitExpr> {
        match arena.get(id) {
            Expr::Const(v) => Some(LimitExpr::Const(v.clone())),
            Expr::HostVar(pos) => Some(LimitExpr::HostVar(*pos)),
            Expr::Arith { op, lhs, rhs } => {
                let l = LimitExpr::from_expr(arena, *lhs)?;
                let r = LimitExpr::from_expr(arena, *rhs)?;
                let op = match op {
                    ArithOp::Add => LimitOp::Add,
                    ArithOp::Sub => LimitOp::Sub,
                    ArithOp::Mul => LimitOp::Mul,
                };
                Some(LimitExpr::Arith(op, Box::new(l), Box::new(r)))
            }
            _ => None,
        }
    }

    /// Evaluate against bound host variables.
    pub fn evaluate(&self, host_vars: &[DbValue]) -> EngineResult<DbValue> {
        match self {
            LimitExpr::Const(v) => Ok(v.clone()),
            LimitExpr::HostVar(pos) => host_vars
                .get(*pos)
                .cloned()
                .ok_or(EngineError::InvariantViolation("unbound host variable")),
            LimitExpr::Arith(op, lhs, rhs) => {
                let l = lhs.evaluate(host_vars)?;
                let r = rhs.evaluate(host_vars)?;
                match op {
                    LimitOp::Add => value::add_values(&l, &r),
                    LimitOp::Sub => value::subtract_values(&l, &r),
                    LimitOp::Mul => value::multiply_values(&l, &r),
                    LimitOp::Least => {
                        if l.is_null() {
                            return Ok(r);
                        }
                        if r.is_null() {
                            return Ok(l);
                        }
                        Ok(match value::compare(&l, &r)? {
                            std::cmp::Ordering::Greater => r,
                            _ => l,
                        })
                    }
                    LimitOp::Greatest => {
                        if l.is_null() {
                            return Ok(r);
                        }
                        if r.is_null() {
                            return Ok(l);
                        }
                        Ok(match value::compare(&l, &r)? {
                            std::cmp::Ordering::Less => r,
                            _ => l,
                        })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_ops() {
        assert_eq!(CompOp::Lt.reversed(), CompOp::Gt);
        assert_eq!(CompOp::Ge.reversed(), CompOp::Le);
        assert_eq!(CompOp::Eq.reversed(), CompOp::Eq);
    }

    #[test]
    fn test_limit_expr_from_arith() {
        let mut arena = ExprArena::new();
        let ten = arena.constant(DbValue::Int(10));
        let hv = arena.host_var(0);
        let sum = arena.arith(ArithOp::Add, ten, hv);

        let limit = LimitExpr::from_expr(&arena, sum).unwrap();
        let v = limit.evaluate(&[DbValue::Int(5)]).unwrap();
        assert_eq!(v, DbValue::Int(15));
    }

    #[test]
    fn test_limit_expr_rejects_column_ref() {
        let mut arena = ExprArena::new();
        let seg = arena.segment(3);
        assert!(LimitExpr::from_expr(&arena, seg).is_none());

        let one = arena.constant(DbValue::Int(1));
        let mixed = arena.arith(ArithOp::Add, seg, one);
        assert!(LimitExpr::from_expr(&arena, mixed).is_none());
    }

    #[test]
    fn test_least_greatest_evaluation() {
        let a = LimitExpr::Const(DbValue::Int(10));
        let b = LimitExpr::Const(DbValue::Int(7));
        assert_eq!(
            a.clone().least(b.clone()).evaluate(&[]).unwrap(),
            DbValue::Int(7)
        );
        assert_eq!(a.greatest(b).evaluate(&[]).unwrap(), DbValue::Int(10));
    }

    #[test]
    fn test_minus_one() {
        let v = LimitExpr::Const(DbValue::Int(10)).minus_one();
        assert_eq!(v.evaluate(&[]).unwrap(), DbValue::Int(9));
    }
}
