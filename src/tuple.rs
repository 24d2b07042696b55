//! Tuple copy-out: serializing value-pointer lists into output tuple
//! buffers.
//!
//! Wire shape: an 8-byte total-length header, then per value a 4-byte
//! BOUND/UNBOUND flag, a 4-byte payload size, and the payload padded to
//! the alignment quantum. Hidden registers are skipped both when
//! deriving the output type list and when writing rows. Values with an
//! unresolved output domain bind it on first non-null write; afterwards
//! every value is coerced to the resolved domain.

use crate::error::{EngineError, EngineResult};
use crate::listfile::ListFile;
use crate::value::{self, DbValue, Domain};

/// Payload alignment quantum.
pub const TUPLE_ALIGNMENT: usize = 8;
/// Size of the leading total-length header.
pub const TUPLE_LENGTH_SIZE: usize = 8;
/// Size of one value header (flag + payload size).
pub const TUPLE_VALUE_HEADER_SIZE: usize = 8;
/// Rows at or above this size cannot use the tuple-descriptor fast path.
pub const MAX_TUPLE_SIZE_IN_PAGE: usize = 16 * 1024;

const FLAG_UNBOUND: u32 = 0;
const FLAG_BOUND: u32 = 1;

/// A value-pointer list entry: a borrowed register value plus its
/// hidden-column flag.
#[derive(Debug, Clone, Copy)]
pub struct ValueRef<'a> {
    pub value: &'a DbValue,
    pub hidden: bool,
}

impl<'a> ValueRef<'a> {
    pub fn visible(value: &'a DbValue) -> Self {
        ValueRef {
            value,
            hidden: false,
        }
    }

    pub fn hidden(value: &'a DbValue) -> Self {
        ValueRef {
            value,
            hidden: true,
        }
    }
}

/// Output column domains of a result row or list file.
#[derive(Debug, Clone, Default)]
pub struct TypeList {
    pub domains: Vec<Domain>,
}

/// Derive the output type list of a value-pointer list: one unresolved
/// domain per visible register.
pub fn value_type_list(values: &[ValueRef<'_>]) -> TypeList {
    let domains = values
        .iter()
        .filter(|v| !v.hidden)
        .map(|_| Domain::variable())
        .collect();
    TypeList { domains }
}

fn aligned(size: usize) -> usize {
    size.div_ceil(TUPLE_ALIGNMENT) * TUPLE_ALIGNMENT
}

fn payload_bytes(value: &DbValue) -> EngineResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Tuple value size of one value: header only for NULL, otherwise header
/// plus the pad-aligned payload.
pub fn tuple_value_size(value: &DbValue) -> EngineResult<usize> {
    if value.is_null() {
        return Ok(TUPLE_VALUE_HEADER_SIZE);
    }
    let payload = payload_bytes(value)?;
    Ok(TUPLE_VALUE_HEADER_SIZE + aligned(payload.len()))
}

fn resolve_output_domain(
    domain: &mut Domain,
    value: &DbValue,
) -> EngineResult<Option<DbValue>> {
    if domain.is_variable() {
        if !value.is_null() {
            // Bind the column to the first non-null observed domain; the
            // next tuple gets another chance if this one is null.
            *domain = value.resolve_domain();
        }
        Ok(None)
    } else {
        Ok(Some(value::coerce_to_domain(value, domain)?))
    }
}

/// Serialize the visible registers of a value-pointer list into `out`,
/// resolving output domains as a side effect. Returns the total tuple
/// length in bytes.
pub fn copy_values_to_tuple(
    type_list: &mut TypeList,
    values: &[ValueRef<'_>],
    out: &mut Vec<u8>,
) -> EngineResult<usize> {
    out.clear();
    out.extend_from_slice(&[0u8; TUPLE_LENGTH_SIZE]);

    let mut count = 0usize;
    for vref in values {
        if vref.hidden {
            continue; // skip hidden cols
        }
        let domain = type_list
            .domains
            .get_mut(count)
            .ok_or(EngineError::InvariantViolation("more values than output columns"))?;
        let coerced = resolve_output_domain(domain, vref.value)?;
        let value = coerced.as_ref().unwrap_or(vref.value);
        count += 1;

        if value.is_null() {
            out.extend_from_slice(&FLAG_UNBOUND.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            continue;
        }
        let payload = payload_bytes(value)?;
        out.extend_from_slice(&FLAG_BOUND.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        let padded = aligned(payload.len());
        out.extend_from_slice(&payload);
        out.resize(out.len() - payload.len() + padded, 0);
    }

    let total = out.len();
    out[..TUPLE_LENGTH_SIZE].copy_from_slice(&(total as u64).to_le_bytes());
    Ok(total)
}

/// Read back a tuple buffer produced by [`copy_values_to_tuple`].
pub fn read_tuple(buf: &[u8]) -> EngineResult<Vec<DbValue>> {
    if buf.len() < TUPLE_LENGTH_SIZE {
        return Err(EngineError::InvariantViolation("truncated tuple header"));
    }
    let total = u64::from_le_bytes(
        buf[..TUPLE_LENGTH_SIZE]
            .try_into()
            .map_err(|_| EngineError::InvariantViolation("truncated tuple header"))?,
    ) as usize;
    if total > buf.len() {
        return Err(EngineError::InvariantViolation("tuple length exceeds buffer"));
    }

    let mut values = Vec::new();
    let mut off = TUPLE_LENGTH_SIZE;
    while off < total {
        let flag = u32::from_le_bytes(
            buf[off..off + 4]
                .try_into()
                .map_err(|_| EngineError::InvariantViolation("truncated value header"))?,
        );
        let len = u32::from_le_bytes(
            buf[off + 4..off + 8]
                .try_into()
                .map_err(|_| EngineError::InvariantViolation("truncated value header"))?,
        ) as usize;
        off += TUPLE_VALUE_HEADER_SIZE;

        if flag == FLAG_UNBOUND {
            values.push(DbValue::Null);
            continue;
        }
        let value: DbValue = bincode::deserialize(&buf[off..off + len])?;
        values.push(value);
        off += aligned(len);
    }
    Ok(values)
}

/// Outcome of a tuple-descriptor attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleDescrStatus {
    Success,
    /// SET-typed value present; use the generic serialization path
    RetrySetType,
    /// Row would exceed the per-page limit; use the generic path
    RetryBigRecord,
}

/// Fast-path descriptor: the resolved values and the precomputed tuple
/// size, ready to be written without re-evaluating the registers.
#[derive(Debug, Clone)]
pub struct TupleDescriptor {
    pub values: Vec<DbValue>,
    pub tuple_size: usize,
}

/// Build a tuple descriptor for the visible registers, resolving output
/// domains as a side effect. SET-typed values and oversized rows fall
/// back to the generic path.
pub fn tuple_descriptor(
    type_list: &mut TypeList,
    values: &[ValueRef<'_>],
) -> EngineResult<(TupleDescrStatus, Option<TupleDescriptor>)> {
    let mut tuple_size = TUPLE_LENGTH_SIZE;
    let mut fields = Vec::new();

    let mut count = 0usize;
    for vref in values {
        if vref.hidden {
            continue; // skip hidden cols
        }
        let domain = type_list
            .domains
            .get_mut(count)
            .ok_or(EngineError::InvariantViolation("more values than output columns"))?;
        let coerced = resolve_output_domain(domain, vref.value)?;
        let value = coerced.unwrap_or_else(|| vref.value.clone());
        count += 1;

        // SET data cannot use a tuple descriptor.
        if value.data_type().is_set() {
            return Ok((TupleDescrStatus::RetrySetType, None));
        }

        tuple_size += tuple_value_size(&value)?;
        fields.push(value);
    }

    // Big records cannot use a tuple descriptor.
    if tuple_size >= MAX_TUPLE_SIZE_IN_PAGE {
        return Ok((TupleDescrStatus::RetryBigRecord, None));
    }

    Ok((
        TupleDescrStatus::Success,
        Some(TupleDescriptor {
            values: fields,
            tuple_size,
        }),
    ))
}

/// Re-initialize register outputs to unbound between rows.
pub fn set_values_unbound(registers: &mut [DbValue]) {
    for r in registers.iter_mut() {
        *r = DbValue::Null;
    }
}

/// Read the single tuple of a list file into `out`.
///
/// More than one tuple, or fewer list columns than output values, is an
/// `InvalidSingleTuple` error; an empty list leaves the outputs
/// untouched.
pub fn single_tuple_from_list(list: &mut ListFile, out: &mut [DbValue]) -> EngineResult<()> {
    let tuple_count = list.tuple_count();
    let value_count = list.column_count();

    // The list may carry more columns than requested when the subquery
    // has a hidden column; fewer is an error.
    if tuple_count > 1 || value_count < out.len() {
        return Err(EngineError::InvalidSingleTuple);
    }

    if tuple_count == 1 {
        list.close()?;
        let mut scan = list.scan()?;
        let row = scan
            .next_row()?
            .ok_or(EngineError::InvalidSingleTuple)?;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = row.get(i).cloned().unwrap_or(DbValue::Null);
        }
    }

    Ok(())
}
