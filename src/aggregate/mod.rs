//! # Aggregation Accumulator Engine
//!
//! Evaluates MIN/MAX/SUM/AVG/COUNT/COUNT(*)/STDDEV*/VARIANCE*/
//! GROUP_CONCAT accumulators over a tuple stream. DISTINCT and ordered
//! aggregates spill their operands to a single-column list file and
//! re-run the accumulator over the sorted (and deduplicated) file at
//! finalize time. Cooperates with the translator's index annotations to
//! answer MIN/MAX/COUNT directly from index statistics (see
//! [`optimize`]).
//!
//! ## Pipeline
//!
//! ```text
//! initialize_aggregate_list    → reset accumulators, open spill files
//!     ↓ (per produced row)
//! evaluate_aggregate_list      → update in place, or spill to list file
//!     ↓
//! finalize_aggregate_list      → sort/dedup spills, AVG & variance math
//! ```

pub mod optimize;

use crate::error::{EngineError, EngineResult};
use crate::listfile::{ListFile, SortKey};
use crate::regu::{fetch_copy_dbval, fetch_peek_dbval, ReguVar, ValueDescriptor};
use crate::session::SessionContext;
use crate::value::{
    self, add_values, coerce_to, divide_values, multiply_values, subtract_values, DataType,
    DbValue,
};

/// Aggregate functions supported by the accumulator engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Min,
    Max,
    Count,
    CountStar,
    Sum,
    Avg,
    Stddev,
    StddevPop,
    StddevSamp,
    Variance,
    VarPop,
    VarSamp,
    GroupConcat,
    /// Group-by row counter pseudo-aggregate; its value is maintained by
    /// the group-by predicate evaluation, not by this engine
    GroupByNum,
}

impl AggregateFunction {
    /// Functions maintaining `Σv` and `Σv²` during accumulation.
    pub fn is_variance_family(self) -> bool {
        matches!(
            self,
            AggregateFunction::Stddev
                | AggregateFunction::StddevPop
                | AggregateFunction::StddevSamp
                | AggregateFunction::Variance
                | AggregateFunction::VarPop
                | AggregateFunction::VarSamp
        )
    }

    pub fn is_stddev_family(self) -> bool {
        matches!(
            self,
            AggregateFunction::Stddev | AggregateFunction::StddevPop | AggregateFunction::StddevSamp
        )
    }

    /// Sample-variance functions divide by `n − 1`.
    pub fn uses_sample_divisor(self) -> bool {
        matches!(self, AggregateFunction::StddevSamp | AggregateFunction::VarSamp)
    }
}

/// ALL vs DISTINCT evaluation of the operand stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistinctOption {
    #[default]
    All,
    Distinct,
}

/// The mutable state of one in-flight aggregate for one group.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    pub value: DbValue,
    /// Running sum of squares; variance family only
    pub value2: DbValue,
    /// Rows contributed since the last reset
    pub curr_cnt: i64,
}

/// One aggregate expression of an execution node.
#[derive(Debug)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub option: DistinctOption,
    pub operand: ReguVar,
    /// GROUP_CONCAT ordering; forces spill-and-sort evaluation
    pub sort_list: Option<Vec<SortKey>>,
    /// GROUP_CONCAT separator operand
    pub separator: Option<ReguVar>,
    pub accumulator: Accumulator,
    /// Spill file for DISTINCT/ordered evaluation
    pub list_file: Option<ListFile>,
    /// The planner proved this aggregate is answerable from index
    /// statistics; the per-row path skips it
    pub flag_agg_optimize: bool,
}

impl AggregateSpec {
    pub fn new(function: AggregateFunction, operand: ReguVar) -> Self {
        AggregateSpec {
            function,
            option: DistinctOption::All,
            operand,
            sort_list: None,
            separator: None,
            accumulator: Accumulator::default(),
            list_file: None,
            flag_agg_optimize: false,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.option = DistinctOption::Distinct;
        self
    }

    pub fn with_separator(mut self, separator: ReguVar) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn with_sort(mut self, sort_list: Vec<SortKey>) -> Self {
        self.sort_list = Some(sort_list);
        self
    }

    fn spills(&self) -> bool {
        self.option == DistinctOption::Distinct || self.sort_list.is_some()
    }
}

/// Open the spill file of a DISTINCT or ordered aggregate.
///
/// MIN and MAX are insensitive to duplicates, so their DISTINCT option
/// is coerced to ALL and no file is opened. Ordered aggregates keep all
/// rows; the distinct option is applied by the finalize sort instead.
fn process_distinct_or_sort(
    session: &SessionContext,
    agg: &mut AggregateSpec,
) -> EngineResult<()> {
    if matches!(agg.function, AggregateFunction::Min | AggregateFunction::Max) {
        agg.option = DistinctOption::All;
        return Ok(());
    }

    let distinct_flag = agg.sort_list.is_none();
    let list = ListFile::open_single(distinct_flag, session.spill_dir())?;
    if let Some(old) = agg.list_file.take() {
        let _ = old.destroy();
    }
    agg.list_file = Some(list);
    Ok(())
}

/// Initialize an aggregate expression list: reset every accumulator and
/// open spill files for DISTINCT/ordered aggregates. COUNT and COUNT(*)
/// start at zero so an empty input yields 0, not NULL.
pub fn initialize_aggregate_list(
    session: &SessionContext,
    aggs: &mut [AggregateSpec],
) -> EngineResult<()> {
    for agg in aggs.iter_mut() {
        if agg.function == AggregateFunction::GroupByNum {
            // The value of groupby_num() remains unchanged; it is
            // maintained by group-by predicate evaluation.
            continue;
        }

        agg.accumulator.curr_cnt = 0;
        agg.accumulator.value = DbValue::Null;
        agg.accumulator.value2 = DbValue::Null;

        if matches!(
            agg.function,
            AggregateFunction::Count | AggregateFunction::CountStar
        ) {
            agg.accumulator.value = DbValue::Bigint(0);
        }

        if agg.spills() {
            process_distinct_or_sort(session, agg)?;
        }
    }
    Ok(())
}

/// Fold one non-null value into an accumulator (non-DISTINCT path,
/// GROUP_CONCAT excluded).
fn aggregate_value_to_accumulator(
    acc: &mut Accumulator,
    function: AggregateFunction,
    value: &mut DbValue,
) -> EngineResult<()> {
    if value.is_null() {
        return Ok(());
    }

    match function {
        AggregateFunction::Min => {
            if acc.curr_cnt < 1 {
                acc.value = value.clone();
            } else if value::compare(value, &acc.value)? == std::cmp::Ordering::Less {
                acc.value = value.clone();
            }
        }
        AggregateFunction::Max => {
            if acc.curr_cnt < 1 {
                acc.value = value.clone();
            } else if value::compare(value, &acc.value)? == std::cmp::Ordering::Greater {
                acc.value = value.clone();
            }
        }
        AggregateFunction::Count => {
            let prev = acc.value.as_i128().unwrap_or(0);
            acc.value = DbValue::Bigint((prev + 1) as i64);
        }
        AggregateFunction::Sum | AggregateFunction::Avg => {
            // SUM returns bigint for int arguments and numeric for
            // bigint arguments; promote up front for overflow headroom.
            match value.data_type() {
                DataType::Int => *value = coerce_to(value, DataType::Bigint)?,
                DataType::Bigint => *value = coerce_to(value, DataType::Numeric)?,
                _ => {}
            }
            if acc.curr_cnt < 1 {
                acc.value = value.clone();
            } else {
                let sum = add_values(&acc.value, value)?;
                if !sum.is_null() {
                    acc.value = sum;
                }
            }
        }
        f if f.is_variance_family() => {
            let v = coerce_to(value, DataType::Double)?;
            let squared = multiply_values(&v, &v)?;
            if acc.curr_cnt < 1 {
                acc.value = v;
                acc.value2 = squared;
            } else {
                let sum = add_values(&acc.value, &v)?;
                if !sum.is_null() {
                    acc.value = sum;
                }
                let sum2 = add_values(&acc.value2, &squared)?;
                if !sum2.is_null() {
                    acc.value2 = sum2;
                }
            }
        }
        _ => {
            return Err(EngineError::InvariantViolation(
                "unexpected function in accumulator update",
            ))
        }
    }

    Ok(())
}

/// Concatenate the first GROUP_CONCAT value: initialize the accumulator
/// to an empty VARCHAR, then append.
fn group_concat_first_value(
    session: &SessionContext,
    acc: &mut Accumulator,
    value: &DbValue,
) -> EngineResult<()> {
    acc.value = DbValue::string("");
    let (out, truncated) =
        value::concatenate_values(&acc.value, value, session.group_concat_max_len())?;
    if !out.is_null() {
        acc.value = out;
    }
    if truncated {
        session.warn_concat_truncated("GROUP_CONCAT()");
    }
    Ok(())
}

/// Concatenate a subsequent GROUP_CONCAT value: separator first (when
/// non-null), then the value.
fn group_concat_value(
    session: &SessionContext,
    acc: &mut Accumulator,
    separator: Option<&ReguVar>,
    vd: &ValueDescriptor,
    value: &DbValue,
) -> EngineResult<()> {
    let max_allowed = session.group_concat_max_len();

    if let Some(sep) = separator {
        let sep_val = fetch_peek_dbval(sep, vd)?;
        if !sep_val.is_null() {
            let (out, truncated) = value::concatenate_values(&acc.value, sep_val, max_allowed)?;
            if !out.is_null() {
                acc.value = out;
            }
            if truncated {
                session.warn_concat_truncated("GROUP_CONCAT()");
            }
        }
    }

    let (out, truncated) = value::concatenate_values(&acc.value, value, max_allowed)?;
    if !out.is_null() {
        acc.value = out;
    }
    if truncated {
        session.warn_concat_truncated("GROUP_CONCAT()");
    }
    Ok(())
}

/// Destroy every remaining spill file; the error path of both engine
/// entry points.
fn release_list_files(aggs: &mut [AggregateSpec]) {
    for agg in aggs.iter_mut() {
        if let Some(list) = agg.list_file.take() {
            let _ = list.destroy();
        }
    }
}

/// Evaluate an aggregate expression list against the current row.
///
/// Checks the interrupt flag at the row boundary. NULL operands update
/// nothing, except that COUNT re-materializes its zero when the
/// accumulator was reset to NULL. Any failure releases the owned spill
/// files before it surfaces.
pub fn evaluate_aggregate_list(
    session: &SessionContext,
    aggs: &mut [AggregateSpec],
    vd: &ValueDescriptor,
) -> EngineResult<()> {
    let result = evaluate_aggregate_list_inner(session, aggs, vd);
    if result.is_err() {
        release_list_files(aggs);
    }
    result
}

fn evaluate_aggregate_list_inner(
    session: &SessionContext,
    aggs: &mut [AggregateSpec],
    vd: &ValueDescriptor,
) -> EngineResult<()> {
    session.check_interrupt()?;

    for agg in aggs.iter_mut() {
        if agg.function == AggregateFunction::GroupByNum {
            continue;
        }
        if agg.flag_agg_optimize {
            // Answered from index statistics; the per-row path skips it.
            continue;
        }

        if agg.function == AggregateFunction::CountStar {
            agg.accumulator.curr_cnt += 1;
            continue;
        }

        // The aggregate operand only ever references the current row's
        // registers or constants.
        let mut dbval = fetch_copy_dbval(&agg.operand, vd)?;

        if dbval.is_null() {
            if matches!(
                agg.function,
                AggregateFunction::Count | AggregateFunction::CountStar
            ) && agg.accumulator.value.is_null()
            {
                // We might get a NULL count; correct that.
                agg.accumulator.value = DbValue::Bigint(0);
            }
            continue;
        }

        // DISTINCT/ordered operands go to the list file, to be
        // distinct-ified and folded at finalize.
        if agg.spills() {
            let list = agg
                .list_file
                .as_mut()
                .ok_or(EngineError::InvariantViolation("spilling aggregate without list file"))?;
            let resolved = list.resolve_or_coerce(0, &dbval)?;
            let bytes = bincode::serialize(&vec![resolved])?;
            if let Err(e) = list.add_item(&bytes) {
                if let Some(partial) = agg.list_file.take() {
                    let _ = partial.destroy();
                }
                return Err(e);
            }
            continue;
        }

        let result = if agg.function == AggregateFunction::GroupConcat {
            if agg.accumulator.curr_cnt < 1 {
                group_concat_first_value(session, &mut agg.accumulator, &dbval)
            } else {
                group_concat_value(
                    session,
                    &mut agg.accumulator,
                    agg.separator.as_ref(),
                    vd,
                    &dbval,
                )
            }
        } else {
            aggregate_value_to_accumulator(&mut agg.accumulator, agg.function, &mut dbval)
        };

        agg.accumulator.curr_cnt += 1;
        result?;
    }

    Ok(())
}

/// Fold a sorted spill file back through the accumulator.
fn finalize_spilled(
    session: &SessionContext,
    function: AggregateFunction,
    separator: Option<&ReguVar>,
    vd: Option<&ValueDescriptor>,
    acc: &mut Accumulator,
    list: &mut ListFile,
) -> EngineResult<()> {
    let mut scan = list.scan()?;
    while let Some(row) = scan.next_row()? {
        session.check_interrupt()?;

        let mut v = row.into_iter().next().unwrap_or(DbValue::Null);
        if v.is_null() {
            continue;
        }
        if function.is_variance_family() {
            v = coerce_to(&v, DataType::Double)?;
        }

        if acc.value.is_null() {
            // First iteration: nothing to add to yet.
            if function.is_variance_family() {
                acc.value2 = multiply_values(&v, &v)?;
            }
            if function == AggregateFunction::GroupConcat {
                group_concat_first_value(session, acc, &v)?;
            } else {
                acc.value = v;
            }
        } else {
            if function.is_variance_family() {
                let squared = multiply_values(&v, &v)?;
                let sum2 = add_values(&acc.value2, &squared)?;
                if !sum2.is_null() {
                    acc.value2 = sum2;
                }
            }
            if function == AggregateFunction::GroupConcat {
                let vd = vd.ok_or(EngineError::InvariantViolation(
                    "ordered GROUP_CONCAT finalize without value descriptor",
                ))?;
                group_concat_value(session, acc, separator, vd, &v)?;
            } else {
                let sum = add_values(&acc.value, &v)?;
                if !sum.is_null() {
                    acc.value = sum;
                }
            }
        }
    }

    acc.curr_cnt = list.tuple_count() as i64;
    Ok(())
}

/// Make the final evaluation of an aggregate expression list. Any
/// failure releases the owned spill files before it surfaces.
pub fn finalize_aggregate_list(
    session: &SessionContext,
    aggs: &mut [AggregateSpec],
    vd: Option<&ValueDescriptor>,
    keep_list_file: bool,
) -> EngineResult<()> {
    let result = finalize_aggregate_list_inner(session, aggs, vd, keep_list_file);
    if result.is_err() {
        release_list_files(aggs);
    }
    result
}

fn finalize_aggregate_list_inner(
    session: &SessionContext,
    aggs: &mut [AggregateSpec],
    vd: Option<&ValueDescriptor>,
    keep_list_file: bool,
) -> EngineResult<()> {
    for agg in aggs.iter_mut() {
        session.check_interrupt()?;

        if agg.function == AggregateFunction::GroupByNum {
            continue;
        }

        let agg_val_type = agg.accumulator.value.data_type();

        if agg.function == AggregateFunction::CountStar {
            agg.accumulator.value = DbValue::Bigint(agg.accumulator.curr_cnt);
        } else if agg.function == AggregateFunction::Sum {
            if agg_val_type.is_set() {
                // Left as-is for catalog access compatibility.
            } else if !agg_val_type.is_numeric() && agg_val_type != DataType::Null {
                agg.accumulator.value = coerce_to(&agg.accumulator.value, DataType::Double)?;
            }
        }

        // Process the list file of sum/avg/count distinct (MIN/MAX had
        // their option coerced to ALL at initialization).
        if agg.spills()
            && !matches!(agg.function, AggregateFunction::Min | AggregateFunction::Max)
        {
            if !agg.flag_agg_optimize {
                let mut list = agg.list_file.take().ok_or(
                    EngineError::InvariantViolation("spilling aggregate without list file"),
                )?;

                let result: EngineResult<()> = (|| {
                    list.close()?;
                    list.sort(
                        agg.sort_list.as_deref(),
                        agg.option == DistinctOption::Distinct,
                    )?;
                    if agg.function == AggregateFunction::Count {
                        agg.accumulator.value = DbValue::Bigint(list.tuple_count() as i64);
                        Ok(())
                    } else {
                        finalize_spilled(
                            session,
                            agg.function,
                            agg.separator.as_ref(),
                            vd,
                            &mut agg.accumulator,
                            &mut list,
                        )
                    }
                })();
                if let Err(e) = result {
                    let _ = list.destroy();
                    return Err(e);
                }

                if keep_list_file {
                    agg.list_file = Some(list);
                } else {
                    list.destroy()?;
                }
            } else if !keep_list_file {
                if let Some(list) = agg.list_file.take() {
                    list.destroy()?;
                }
            }
        }

        if agg.function == AggregateFunction::GroupConcat && !agg.accumulator.value.is_null() {
            value::fix_string_size(&mut agg.accumulator.value);
        }

        // Compute averages and variances.
        let n = agg.accumulator.curr_cnt;
        if n > 0
            && (agg.function == AggregateFunction::Avg || agg.function.is_variance_family())
        {
            // AVG(X) = SUM(X) / COUNT(X)
            let count = DbValue::Double(n as f64);
            let xavg = divide_values(&agg.accumulator.value, &count)?;

            if agg.function == AggregateFunction::Avg {
                agg.accumulator.value = coerce_to(&xavg, DataType::Double)?;
                continue;
            }

            let divisor = if agg.function.uses_sample_divisor() {
                if n > 1 {
                    DbValue::Double((n - 1) as f64)
                } else {
                    // Not enough samples.
                    agg.accumulator.value = DbValue::Null;
                    continue;
                }
            } else {
                count
            };

            // VAR(X) = SUM(X²)/d − AVG(X) · (SUM(X)/d), with d = n for
            // population variants and n−1 for sample variants.
            let x2avg = divide_values(&agg.accumulator.value2, &divisor)?;
            let xavg_1 = divide_values(&agg.accumulator.value, &divisor)?;
            let xavg2 = multiply_values(&xavg, &xavg_1)?;
            let varval = subtract_values(&x2avg, &xavg2)?;
            agg.accumulator.value = varval.clone();

            if agg.function.is_stddev_family() {
                // Precision errors can leave a tiny negative variance;
                // clamp before the square root.
                let v = varval.as_f64().unwrap_or(0.0);
                let v = if v < 0.0 { 0.0 } else { v };
                agg.accumulator.value = DbValue::Double(v.sqrt());
            }
        }
    }

    Ok(())
}
