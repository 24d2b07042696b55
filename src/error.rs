//! Engine Error Types

use std::io;
use thiserror::Error;

/// Errors raised or propagated by the translator and aggregation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Internal inconsistency that a valid planner input can never produce
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    /// Allocation or spill-file failure; partial list files are destroyed
    /// before this is returned
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Two values cannot be compared or coerced
    #[error("cannot coerce {from} to {to}")]
    TypeCoercionFailed { from: &'static str, to: &'static str },

    /// Arithmetic overflow during SUM/AVG accumulation
    #[error("numeric value out of range")]
    NumericOverflow,

    /// Cancel/interrupt observed at a row boundary
    #[error("query interrupted")]
    Interrupted,

    /// Two string values whose collations have no common runtime collation
    #[error("incompatible collations: {0} and {1}")]
    IncompatibleCollation(&'static str, &'static str),

    /// Single-tuple fetch found more than one row or too few columns
    #[error("query result is not a single tuple")]
    InvalidSingleTuple,

    /// Spill-file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Row payload encode/decode failure in a list file
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Error surfaced by the external SQL executor (shard catalog,
    /// migration row copy)
    #[error("executor error: {0}")]
    Executor(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
