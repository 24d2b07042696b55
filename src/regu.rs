//! Operand registers and fetch helpers.
//!
//! Execution nodes reference runtime values through register variables.
//! A [`ValueDescriptor`] holds the registers of the row currently being
//! produced; `fetch_peek` borrows the current value, `fetch_copy` clones
//! it for callers that outlive the row.

use crate::error::{EngineError, EngineResult};
use crate::value::DbValue;

/// A register variable: either a positional register filled by the scan
/// driver or an inline constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ReguVar {
    /// Register position in the value descriptor
    Position(usize),
    /// Compile-time constant
    Constant(DbValue),
}

/// The registers of the row currently flowing through an execution node.
#[derive(Debug, Clone, Default)]
pub struct ValueDescriptor {
    pub registers: Vec<DbValue>,
}

impl ValueDescriptor {
    pub fn new(registers: Vec<DbValue>) -> Self {
        ValueDescriptor { registers }
    }

    pub fn set(&mut self, pos: usize, value: DbValue) {
        if pos >= self.registers.len() {
            self.registers.resize(pos + 1, DbValue::Null);
        }
        self.registers[pos] = value;
    }
}

/// Borrow the current value of an operand.
pub fn fetch_peek_dbval<'a>(
    regu: &'a ReguVar,
    vd: &'a ValueDescriptor,
) -> EngineResult<&'a DbValue> {
    match regu {
        ReguVar::Constant(v) => Ok(v),
        ReguVar::Position(pos) => vd
            .registers
            .get(*pos)
            .ok_or(EngineError::InvariantViolation("register out of range")),
    }
}

/// Copy the current value of an operand; the caller owns the result.
pub fn fetch_copy_dbval(regu: &ReguVar, vd: &ValueDescriptor) -> EngineResult<DbValue> {
    fetch_peek_dbval(regu, vd).cloned()
}
