//! # Database Value System
//!
//! Core runtime values: Int, Bigint, Numeric, Double, Varchar, Datetime,
//! Time, Sequence, Null. Domains describe the declared shape of a value
//! (type, precision/scale, collation); list-file columns start with the
//! unresolved `Variable` domain and bind to the first non-null value they
//! observe.
//!
//! ## Usage
//!
//! ```rust
//! use quarrydb::value::{DbValue, Domain, DataType};
//!
//! let v = DbValue::Int(42);
//! let d = Domain::new(DataType::Bigint);
//! let coerced = quarrydb::value::coerce_to_domain(&v, &d).unwrap();
//! assert_eq!(coerced, DbValue::Bigint(42));
//! ```

use crate::error::{EngineError, EngineResult};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// String collations known to the runtime.
///
/// Two character values can only be compared or concatenated under a
/// common runtime collation; `Binary` acts as the universal donor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collation {
    /// Byte-wise comparison, compatible with every other collation
    Binary,
    /// Case-sensitive UTF-8
    Utf8Bin,
    /// Case-insensitive UTF-8
    Utf8GeneralCi,
}

impl Collation {
    /// Resolve the common runtime collation of two string operands.
    ///
    /// Returns `None` when the collations are distinct and neither side
    /// is `Binary`.
    pub fn common(self, other: Collation) -> Option<Collation> {
        if self == other {
            return Some(self);
        }
        match (self, other) {
            (Collation::Binary, c) | (c, Collation::Binary) => Some(c),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Collation::Binary => "binary",
            Collation::Utf8Bin => "utf8_bin",
            Collation::Utf8GeneralCi => "utf8_general_ci",
        }
    }
}

impl Default for Collation {
    fn default() -> Self {
        Collation::Utf8Bin
    }
}

/// Declared value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Int,
    Bigint,
    /// Fixed-point exact numeric (stored as a scaled 128-bit integer)
    Numeric,
    Double,
    Varchar,
    Datetime,
    Time,
    /// Ordered collection; excluded from the tuple-descriptor fast path
    Sequence,
    /// Unresolved domain; bound lazily to the first non-null value seen
    Variable,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Null => "null",
            DataType::Int => "integer",
            DataType::Bigint => "bigint",
            DataType::Numeric => "numeric",
            DataType::Double => "double",
            DataType::Varchar => "varchar",
            DataType::Datetime => "datetime",
            DataType::Time => "time",
            DataType::Sequence => "sequence",
            DataType::Variable => "variable",
        }
    }

    /// True for the exact/approximate numeric tower.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::Bigint | DataType::Numeric | DataType::Double
        )
    }

    pub fn is_char(self) -> bool {
        matches!(self, DataType::Varchar)
    }

    pub fn is_set(self) -> bool {
        matches!(self, DataType::Sequence)
    }
}

/// Default precision used for VARCHAR domains created without an explicit
/// precision (mirrors the storage layer's default string precision).
pub const DEFAULT_VARCHAR_PRECISION: usize = 1_073_741_823;

/// A value domain: declared type plus precision and collation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub data_type: DataType,
    /// Maximum length for character domains; 0 means default
    pub precision: usize,
    pub collation: Collation,
}

impl Domain {
    pub fn new(data_type: DataType) -> Self {
        Domain {
            data_type,
            precision: 0,
            collation: Collation::default(),
        }
    }

    /// The unresolved domain used by fresh list-file columns.
    pub fn variable() -> Self {
        Domain::new(DataType::Variable)
    }

    pub fn varchar(precision: usize, collation: Collation) -> Self {
        Domain {
            data_type: DataType::Varchar,
            precision,
            collation,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.data_type == DataType::Variable
    }
}

/// A runtime value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DbValue {
    Null,
    Int(i32),
    Bigint(i64),
    /// Exact numeric; scale 0, promoted from bigint for overflow headroom
    Numeric(i128),
    Double(f64),
    Varchar(String, Collation),
    Datetime(NaiveDateTime),
    Time(NaiveTime),
    Sequence(Vec<DbValue>),
}

impl Default for DbValue {
    fn default() -> Self {
        DbValue::Null
    }
}

impl DbValue {
    pub fn string(s: impl Into<String>) -> Self {
        DbValue::Varchar(s.into(), Collation::default())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// Runtime type of this value; NULL reports `DataType::Null`.
    pub fn data_type(&self) -> DataType {
        match self {
            DbValue::Null => DataType::Null,
            DbValue::Int(_) => DataType::Int,
            DbValue::Bigint(_) => DataType::Bigint,
            DbValue::Numeric(_) => DataType::Numeric,
            DbValue::Double(_) => DataType::Double,
            DbValue::Varchar(..) => DataType::Varchar,
            DbValue::Datetime(_) => DataType::Datetime,
            DbValue::Time(_) => DataType::Time,
            DbValue::Sequence(_) => DataType::Sequence,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.data_type().name()
    }

    /// Resolve the concrete domain of a non-null value.
    pub fn resolve_domain(&self) -> Domain {
        match self {
            DbValue::Varchar(s, coll) => Domain::varchar(s.len().max(1), *coll),
            other => Domain::new(other.data_type()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DbValue::Int(i) => Some(f64::from(*i)),
            DbValue::Bigint(i) => Some(*i as f64),
            DbValue::Numeric(i) => Some(*i as f64),
            DbValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            DbValue::Int(i) => Some(i128::from(*i)),
            DbValue::Bigint(i) => Some(i128::from(*i)),
            DbValue::Numeric(i) => Some(*i),
            _ => None,
        }
    }
}

impl PartialEq for DbValue {
    fn eq(&self, other: &Self) -> bool {
        matches!(compare(self, other), Ok(Ordering::Equal))
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Int(i) => write!(f, "{i}"),
            DbValue::Bigint(i) => write!(f, "{i}"),
            DbValue::Numeric(i) => write!(f, "{i}"),
            DbValue::Double(d) => write!(f, "{d}"),
            DbValue::Varchar(s, _) => write!(f, "{s}"),
            DbValue::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            DbValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            DbValue::Sequence(vals) => {
                write!(f, "{{")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn coercion_error(from: &DbValue, to: DataType) -> EngineError {
    EngineError::TypeCoercionFailed {
        from: from.type_name(),
        to: to.name(),
    }
}

/// Compare two non-null values.
///
/// Numeric values compare across representations; strings require a
/// common collation. Incomparable types fail with `TypeCoercionFailed`;
/// collation mismatches fail with `IncompatibleCollation`.
pub fn compare(lhs: &DbValue, rhs: &DbValue) -> EngineResult<Ordering> {
    match (lhs, rhs) {
        (DbValue::Null, _) | (_, DbValue::Null) => Err(EngineError::TypeCoercionFailed {
            from: lhs.type_name(),
            to: rhs.type_name(),
        }),
        (DbValue::Double(_), _) | (_, DbValue::Double(_))
            if lhs.data_type().is_numeric() && rhs.data_type().is_numeric() =>
        {
            let a = lhs.as_f64().ok_or_else(|| coercion_error(lhs, DataType::Double))?;
            let b = rhs.as_f64().ok_or_else(|| coercion_error(rhs, DataType::Double))?;
            Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
        _ if lhs.data_type().is_numeric() && rhs.data_type().is_numeric() => {
            let a = lhs.as_i128().ok_or_else(|| coercion_error(lhs, DataType::Numeric))?;
            let b = rhs.as_i128().ok_or_else(|| coercion_error(rhs, DataType::Numeric))?;
            Ok(a.cmp(&b))
        }
        (DbValue::Varchar(a, ca), DbValue::Varchar(b, cb)) => {
            let common = ca
                .common(*cb)
                .ok_or(EngineError::IncompatibleCollation(ca.name(), cb.name()))?;
            match common {
                Collation::Utf8GeneralCi => Ok(a.to_lowercase().cmp(&b.to_lowercase())),
                _ => Ok(a.cmp(b)),
            }
        }
        (DbValue::Datetime(a), DbValue::Datetime(b)) => Ok(a.cmp(b)),
        (DbValue::Time(a), DbValue::Time(b)) => Ok(a.cmp(b)),
        (DbValue::Sequence(a), DbValue::Sequence(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                if x.is_null() || y.is_null() {
                    continue;
                }
                match compare(x, y)? {
                    Ordering::Equal => {}
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(EngineError::TypeCoercionFailed {
            from: lhs.type_name(),
            to: rhs.type_name(),
        }),
    }
}

/// Total ordering for sorting list files: NULL sorts first, and values
/// that `compare` rejects fall back to type-tag order so a sort never
/// fails mid-spill.
pub fn sort_compare(lhs: &DbValue, rhs: &DbValue) -> Ordering {
    match (lhs.is_null(), rhs.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => {
            compare(lhs, rhs).unwrap_or_else(|_| lhs.type_name().cmp(rhs.type_name()))
        }
    }
}

/// Coerce `value` to `target`. NULL coerces to NULL under every domain.
pub fn coerce_to(value: &DbValue, target: DataType) -> EngineResult<DbValue> {
    if value.is_null() {
        return Ok(DbValue::Null);
    }
    if value.data_type() == target {
        return Ok(value.clone());
    }
    match target {
        DataType::Int => match value.as_i128() {
            Some(i) if i >= i128::from(i32::MIN) && i <= i128::from(i32::MAX) => {
                Ok(DbValue::Int(i as i32))
            }
            Some(_) => Err(EngineError::NumericOverflow),
            None => Err(coercion_error(value, target)),
        },
        DataType::Bigint => match value.as_i128() {
            Some(i) if i >= i128::from(i64::MIN) && i <= i128::from(i64::MAX) => {
                Ok(DbValue::Bigint(i as i64))
            }
            Some(_) => Err(EngineError::NumericOverflow),
            None => match value {
                DbValue::Double(d) if d.fract() == 0.0 => Ok(DbValue::Bigint(*d as i64)),
                _ => Err(coercion_error(value, target)),
            },
        },
        DataType::Numeric => match value.as_i128() {
            Some(i) => Ok(DbValue::Numeric(i)),
            None => Err(coercion_error(value, target)),
        },
        DataType::Double => value
            .as_f64()
            .map(DbValue::Double)
            .ok_or_else(|| coercion_error(value, target)),
        DataType::Varchar => match value {
            DbValue::Sequence(_) => Err(coercion_error(value, target)),
            other => Ok(DbValue::Varchar(other.to_string(), Collation::default())),
        },
        DataType::Datetime => Err(coercion_error(value, target)),
        DataType::Time => Err(coercion_error(value, target)),
        DataType::Sequence | DataType::Null | DataType::Variable => {
            Err(coercion_error(value, target))
        }
    }
}

/// Coerce `value` into `domain`, checking collation compatibility for
/// character domains and clamping to the domain precision.
pub fn coerce_to_domain(value: &DbValue, domain: &Domain) -> EngineResult<DbValue> {
    if value.is_null() || domain.is_variable() {
        return Ok(value.clone());
    }
    if let (DbValue::Varchar(s, coll), DataType::Varchar) = (value, domain.data_type) {
        let common = coll
            .common(domain.collation)
            .ok_or(EngineError::IncompatibleCollation(
                coll.name(),
                domain.collation.name(),
            ))?;
        let max = if domain.precision == 0 {
            DEFAULT_VARCHAR_PRECISION
        } else {
            domain.precision
        };
        let mut out = s.clone();
        if out.len() > max {
            out = truncate_on_char_boundary(&out, max).to_string();
        }
        return Ok(DbValue::Varchar(out, common));
    }
    coerce_to(value, domain.data_type)
}

/// Truncate a string to at most `max` bytes without splitting a
/// multibyte character.
pub fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Result type of a binary arithmetic application: the wider operand type.
fn arith_result_type(lhs: &DbValue, rhs: &DbValue) -> EngineResult<DataType> {
    let (a, b) = (lhs.data_type(), rhs.data_type());
    if !a.is_numeric() || !b.is_numeric() {
        return Err(EngineError::TypeCoercionFailed {
            from: lhs.type_name(),
            to: rhs.type_name(),
        });
    }
    Ok(match (a, b) {
        (DataType::Double, _) | (_, DataType::Double) => DataType::Double,
        (DataType::Numeric, _) | (_, DataType::Numeric) => DataType::Numeric,
        (DataType::Bigint, _) | (_, DataType::Bigint) => DataType::Bigint,
        _ => DataType::Int,
    })
}

macro_rules! checked_arith {
    ($name:ident, $checked:ident, $float_op:tt) => {
        /// NULL operands yield NULL; integer overflow raises
        /// `NumericOverflow`.
        pub fn $name(lhs: &DbValue, rhs: &DbValue) -> EngineResult<DbValue> {
            if lhs.is_null() || rhs.is_null() {
                return Ok(DbValue::Null);
            }
            match arith_result_type(lhs, rhs)? {
                DataType::Double => {
                    let a = lhs.as_f64().ok_or(EngineError::NumericOverflow)?;
                    let b = rhs.as_f64().ok_or(EngineError::NumericOverflow)?;
                    Ok(DbValue::Double(a $float_op b))
                }
                DataType::Numeric => {
                    let a = lhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    let b = rhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    a.$checked(b).map(DbValue::Numeric).ok_or(EngineError::NumericOverflow)
                }
                DataType::Bigint => {
                    let a = lhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    let b = rhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    let r = a.$checked(b).ok_or(EngineError::NumericOverflow)?;
                    coerce_to(&DbValue::Numeric(r), DataType::Bigint)
                }
                _ => {
                    let a = lhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    let b = rhs.as_i128().ok_or(EngineError::NumericOverflow)?;
                    let r = a.$checked(b).ok_or(EngineError::NumericOverflow)?;
                    coerce_to(&DbValue::Numeric(r), DataType::Int)
                }
            }
        }
    };
}

checked_arith!(add_values, checked_add, +);
checked_arith!(subtract_values, checked_sub, -);
checked_arith!(multiply_values, checked_mul, *);

/// Division always produces a double (aggregate finalize semantics).
/// NULL operands yield NULL; division by zero yields NULL.
pub fn divide_values(lhs: &DbValue, rhs: &DbValue) -> EngineResult<DbValue> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(DbValue::Null);
    }
    let a = lhs.as_f64().ok_or_else(|| coercion_error(lhs, DataType::Double))?;
    let b = rhs.as_f64().ok_or_else(|| coercion_error(rhs, DataType::Double))?;
    if b == 0.0 {
        return Ok(DbValue::Null);
    }
    Ok(DbValue::Double(a / b))
}

/// Concatenate `rhs` onto the VARCHAR `lhs`, truncating so the result
/// never exceeds `max_allowed_size` bytes. Returns the result and whether
/// truncation occurred. Truncation never splits a multibyte character.
pub fn concatenate_values(
    lhs: &DbValue,
    rhs: &DbValue,
    max_allowed_size: usize,
) -> EngineResult<(DbValue, bool)> {
    if lhs.is_null() || rhs.is_null() {
        return Ok((DbValue::Null, false));
    }
    let (base, base_coll) = match coerce_to(lhs, DataType::Varchar)? {
        DbValue::Varchar(s, c) => (s, c),
        _ => return Err(coercion_error(lhs, DataType::Varchar)),
    };
    let (added, coll) = match coerce_to(rhs, DataType::Varchar)? {
        DbValue::Varchar(s, c) => {
            let common = base_coll
                .common(c)
                .ok_or(EngineError::IncompatibleCollation(base_coll.name(), c.name()))?;
            (s, common)
        }
        _ => return Err(coercion_error(rhs, DataType::Varchar)),
    };

    let res_size = base.len();
    if res_size >= max_allowed_size {
        // Already at the cap; nothing more fits. Not a new truncation.
        return Ok((DbValue::Varchar(base, coll), false));
    }
    if res_size + added.len() > max_allowed_size {
        let kept = truncate_on_char_boundary(&added, max_allowed_size - res_size);
        let mut out = base;
        out.push_str(kept);
        return Ok((DbValue::Varchar(out, coll), true));
    }
    let mut out = base;
    out.push_str(&added);
    Ok((DbValue::Varchar(out, coll), false))
}

/// Trim a string value at the first embedded NUL terminator; other value
/// types pass through unchanged.
pub fn fix_string_size(value: &mut DbValue) {
    if let DbValue::Varchar(s, _) = value {
        if let Some(pos) = s.find('\0') {
            s.truncate(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_type_compare() {
        assert_eq!(
            compare(&DbValue::Int(3), &DbValue::Bigint(3)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare(&DbValue::Double(2.5), &DbValue::Int(3)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&DbValue::Numeric(10), &DbValue::Bigint(9)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_incomparable_types() {
        let err = compare(&DbValue::Int(1), &DbValue::string("x")).unwrap_err();
        assert!(matches!(err, EngineError::TypeCoercionFailed { .. }));
    }

    #[test]
    fn test_collation_mismatch() {
        let a = DbValue::Varchar("a".into(), Collation::Utf8Bin);
        let b = DbValue::Varchar("a".into(), Collation::Utf8GeneralCi);
        assert!(matches!(
            compare(&a, &b),
            Err(EngineError::IncompatibleCollation(..))
        ));

        // Binary is compatible with everything.
        let c = DbValue::Varchar("a".into(), Collation::Binary);
        assert_eq!(compare(&a, &c).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_sum_promotion_coercions() {
        assert_eq!(
            coerce_to(&DbValue::Int(7), DataType::Bigint).unwrap(),
            DbValue::Bigint(7)
        );
        assert_eq!(
            coerce_to(&DbValue::Bigint(i64::MAX), DataType::Numeric).unwrap(),
            DbValue::Numeric(i128::from(i64::MAX))
        );
    }

    #[test]
    fn test_checked_add_overflow() {
        let a = DbValue::Bigint(i64::MAX);
        let b = DbValue::Bigint(1);
        assert!(matches!(
            add_values(&a, &b),
            Err(EngineError::NumericOverflow)
        ));
        // Numeric has the headroom bigint lacks.
        let a = DbValue::Numeric(i128::from(i64::MAX));
        assert_eq!(
            add_values(&a, &b).unwrap(),
            DbValue::Numeric(i128::from(i64::MAX) + 1)
        );
    }

    #[test]
    fn test_null_arithmetic_is_null() {
        assert!(add_values(&DbValue::Null, &DbValue::Int(1)).unwrap().is_null());
        assert!(divide_values(&DbValue::Int(1), &DbValue::Null).unwrap().is_null());
    }

    #[test]
    fn test_concatenate_truncation() {
        let acc = DbValue::string("abc");
        let (out, truncated) = concatenate_values(&acc, &DbValue::string("defg"), 5).unwrap();
        assert_eq!(out, DbValue::string("abcde"));
        assert!(truncated);

        let (out, truncated) = concatenate_values(&out, &DbValue::string("x"), 5).unwrap();
        assert_eq!(out, DbValue::string("abcde"));
        assert!(!truncated);
    }

    #[test]
    fn test_concatenate_multibyte_boundary() {
        let acc = DbValue::string("ab");
        // "é" is two bytes; limit 3 can hold neither byte alone.
        let (out, truncated) = concatenate_values(&acc, &DbValue::string("é"), 3).unwrap();
        assert_eq!(out, DbValue::string("ab"));
        assert!(truncated);
    }

    #[test]
    fn test_variable_domain_resolution() {
        let d = DbValue::string("hello").resolve_domain();
        assert_eq!(d.data_type, DataType::Varchar);
        assert_eq!(d.precision, 5);
    }

    #[test]
    fn test_fix_string_size() {
        let mut v = DbValue::string("ab\0cd");
        fix_string_size(&mut v);
        assert_eq!(v, DbValue::string("ab"));
    }

    #[test]
    fn test_sort_compare_null_first() {
        assert_eq!(sort_compare(&DbValue::Null, &DbValue::Int(0)), Ordering::Less);
        assert_eq!(sort_compare(&DbValue::Int(0), &DbValue::Null), Ordering::Greater);
    }
}
