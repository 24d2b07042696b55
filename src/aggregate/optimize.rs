//! Index-only aggregate evaluation.
//!
//! When the planner proves an aggregate's scan contributes no filtering
//! (`flag_agg_optimize`), MIN/MAX can be answered by the index's extreme
//! key and the COUNT family by its statistics, bypassing the per-row
//! path entirely.

use crate::error::{EngineError, EngineResult};
use crate::value::DbValue;

use super::{AggregateFunction, AggregateSpec, DistinctOption};

/// Object, null, and key counts of one index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub oid_count: i64,
    pub null_count: i64,
    pub key_count: i64,
}

/// The slice of the storage layer's index interface the fast path needs.
pub trait IndexAccess {
    /// The full minimum or maximum key of the index, or `None` when the
    /// index is empty.
    fn find_min_or_max_key(&self, is_min: bool) -> EngineResult<Option<Vec<DbValue>>>;

    fn stats(&self) -> EngineResult<IndexStats>;
}

/// Evaluate one aggregate directly from the index.
///
/// Returns `Ok(true)` when the aggregate was answered, `Ok(false)` when
/// this aggregate shape cannot be (the caller falls back to the per-row
/// path). Requires `flag_agg_optimize`.
pub fn evaluate_aggregate_optimize(
    agg: &mut AggregateSpec,
    index: &dyn IndexAccess,
) -> EngineResult<bool> {
    if !agg.flag_agg_optimize {
        return Err(EngineError::InvariantViolation(
            "index-only evaluation without the optimize flag",
        ));
    }

    match agg.function {
        AggregateFunction::Min | AggregateFunction::Max => {
            agg.accumulator.value = DbValue::Null;
            let key = index.find_min_or_max_key(agg.function == AggregateFunction::Min)?;
            if let Some(key) = key {
                // Take the first component of the key.
                match key.into_iter().next() {
                    Some(first) if !first.is_null() => {
                        agg.accumulator.value = first;
                    }
                    // A NULL leading component cannot answer MIN/MAX;
                    // give up this way.
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        AggregateFunction::Count => {
            let stats = index.stats()?;
            agg.accumulator.value = match agg.option {
                DistinctOption::All => DbValue::Bigint(stats.oid_count - stats.null_count),
                DistinctOption::Distinct => DbValue::Bigint(stats.key_count),
            };
            Ok(true)
        }
        AggregateFunction::CountStar => {
            let stats = index.stats()?;
            // The value itself is materialized from curr_cnt at
            // finalize, like the per-row path.
            agg.accumulator.curr_cnt = stats.oid_count;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regu::ReguVar;

    struct MemIndex {
        keys: Vec<Vec<DbValue>>,
        stats: IndexStats,
    }

    impl IndexAccess for MemIndex {
        fn find_min_or_max_key(&self, is_min: bool) -> EngineResult<Option<Vec<DbValue>>> {
            if self.keys.is_empty() {
                return Ok(None);
            }
            let key = if is_min {
                self.keys.first()
            } else {
                self.keys.last()
            };
            Ok(key.cloned())
        }

        fn stats(&self) -> EngineResult<IndexStats> {
            Ok(self.stats)
        }
    }

    fn optimized(function: AggregateFunction) -> AggregateSpec {
        let mut agg = AggregateSpec::new(function, ReguVar::Position(0));
        agg.flag_agg_optimize = true;
        agg
    }

    #[test]
    fn test_min_max_from_index() {
        let index = MemIndex {
            keys: vec![
                vec![DbValue::Int(1), DbValue::Int(100)],
                vec![DbValue::Int(9), DbValue::Int(200)],
            ],
            stats: IndexStats::default(),
        };

        let mut min = optimized(AggregateFunction::Min);
        assert!(evaluate_aggregate_optimize(&mut min, &index).unwrap());
        assert_eq!(min.accumulator.value, DbValue::Int(1));

        let mut max = optimized(AggregateFunction::Max);
        assert!(evaluate_aggregate_optimize(&mut max, &index).unwrap());
        assert_eq!(max.accumulator.value, DbValue::Int(9));
    }

    #[test]
    fn test_empty_index_yields_null() {
        let index = MemIndex {
            keys: Vec::new(),
            stats: IndexStats::default(),
        };
        let mut min = optimized(AggregateFunction::Min);
        assert!(evaluate_aggregate_optimize(&mut min, &index).unwrap());
        assert!(min.accumulator.value.is_null());
    }

    #[test]
    fn test_count_variants_from_stats() {
        let index = MemIndex {
            keys: Vec::new(),
            stats: IndexStats {
                oid_count: 100,
                null_count: 10,
                key_count: 42,
            },
        };

        let mut count = optimized(AggregateFunction::Count);
        assert!(evaluate_aggregate_optimize(&mut count, &index).unwrap());
        assert_eq!(count.accumulator.value, DbValue::Bigint(90));

        let mut count_distinct = optimized(AggregateFunction::Count).distinct();
        count_distinct.flag_agg_optimize = true;
        assert!(evaluate_aggregate_optimize(&mut count_distinct, &index).unwrap());
        assert_eq!(count_distinct.accumulator.value, DbValue::Bigint(42));

        let mut count_star = optimized(AggregateFunction::CountStar);
        assert!(evaluate_aggregate_optimize(&mut count_star, &index).unwrap());
        assert_eq!(count_star.accumulator.curr_cnt, 100);
    }

    #[test]
    fn test_unoptimizable_function_falls_back() {
        let index = MemIndex {
            keys: Vec::new(),
            stats: IndexStats::default(),
        };
        let mut sum = optimized(AggregateFunction::Sum);
        assert!(!evaluate_aggregate_optimize(&mut sum, &index).unwrap());
    }

    #[test]
    fn test_requires_optimize_flag() {
        let index = MemIndex {
            keys: Vec::new(),
            stats: IndexStats::default(),
        };
        let mut agg = AggregateSpec::new(AggregateFunction::Min, ReguVar::Position(0));
        assert!(evaluate_aggregate_optimize(&mut agg, &index).is_err());
    }
}
