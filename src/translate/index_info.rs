//! Index-info builder: maps a scan plan's key-range terms onto the chosen
//! index's column order.

use crate::env::PlanEnv;
use crate::error::{EngineError, EngineResult};
use crate::expr::ExprId;
use crate::plan::{ConstraintType, Plan};

/// Key-range expressions arranged in index definition order. For a
/// multi-column index, a sequence key can be assembled by reading
/// `term_exprs` front to back.
///
/// The info borrows expression ids from the statement arena; it is
/// consumed while the containing execution node is built and dropped
/// afterwards.
#[derive(Debug, Clone)]
pub struct IndexScanInfo {
    pub nterms: usize,
    /// Expression per index position; `None` for positions without a
    /// key-range term
    pub term_exprs: Vec<Option<ExprId>>,
}

/// Build index info for a scan plan, or `None` when the plan cannot (or
/// need not) use an index scan.
///
/// A scan with zero key-range, key-filter, and sarged terms is accepted
/// only when it is group-by-induced, order-by-induced, or a full-range
/// scan of a PRIMARY KEY index.
pub fn index_scan_info(env: &PlanEnv, plan: &Plan) -> EngineResult<Option<IndexScanInfo>> {
    if !plan.is_interesting_order_scan() {
        return Ok(None); // give up
    }

    let scan = plan
        .as_scan()
        .ok_or(EngineError::InvariantViolation("index info on non-scan plan"))?;
    let index = scan
        .index
        .as_ref()
        .ok_or(EngineError::InvariantViolation("index scan without index entry"))?;

    let nterms = scan.terms.cardinality();
    let nkfterms = scan.kf_terms.cardinality();
    let nsegs = index.nsegs();

    // Support full-range index scans.
    if nterms == 0 && nkfterms == 0 && plan.sarged_terms.cardinality() == 0 {
        if scan.iscan_from_groupby || scan.iscan_from_orderby {
            // go ahead
        } else if index.constraint == ConstraintType::PrimaryKey {
            // full-range PK scan
        } else {
            return Ok(None); // give up
        }
    }

    if nterms == 0 {
        return Ok(Some(IndexScanInfo {
            nterms: 0,
            term_exprs: Vec::new(),
        }));
    }

    // Arrange each key-range term's expression at the index position of
    // its first matching index segment.
    let mut term_exprs: Vec<Option<ExprId>> = vec![None; nsegs];

    for t in scan.terms.iter() {
        let term = env.term(t);

        let mut pos = None;
        for i in 0..term.can_use_index {
            let Some(seg) = term.index_segs.get(i) else {
                return Err(EngineError::InvariantViolation(
                    "term index-segment array shorter than can_use_index",
                ));
            };
            if let Some(p) = index.position_of_segment(*seg) {
                pos = Some(p);
                break;
            }
        }

        let Some(pos) = pos else {
            return Err(EngineError::InvariantViolation(
                "key-range term matches no index position",
            ));
        };

        let expr = term
            .expr
            .ok_or(EngineError::InvariantViolation("key-range term without expression"))?;
        term_exprs[pos] = Some(expr);
    }

    Ok(Some(IndexScanInfo { nterms, term_exprs }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::BitSet;
    use crate::env::{EntitySpec, EnvNode, Segment, Term};
    use crate::expr::ExprArena;
    use crate::plan::{IndexEntry, PlanKind, ScanPlan};
    use crate::value::DbValue;

    fn test_env() -> (PlanEnv, ExprArena) {
        let mut env = PlanEnv::new();
        let node = env.add_node(EnvNode {
            entity: EntitySpec {
                class_id: 1,
                heap_id: 1,
                name: "t".into(),
            },
            segments: BitSet::from_ids([0, 1, 2]),
        });
        for name in ["a", "b", "c"] {
            env.add_segment(Segment {
                name: name.into(),
                head_node: node,
            });
        }
        (env, ExprArena::new())
    }

    fn scan_plan(index: IndexEntry, terms: BitSet) -> Plan {
        Plan::new(PlanKind::Scan(ScanPlan {
            node: 0,
            index: Some(index),
            terms,
            kf_terms: BitSet::new(),
            index_cover: false,
            iscan_from_groupby: false,
            iscan_from_orderby: false,
        }))
    }

    #[test]
    fn test_terms_land_on_index_positions() {
        let (mut env, mut arena) = test_env();

        // Term over segment 1, then one over segment 0; index is (0, 1).
        let e1 = arena.constant(DbValue::Int(10));
        let mut t1 = Term::sargable(e1);
        t1.can_use_index = 1;
        t1.index_segs = vec![1];
        let id1 = env.add_term(t1);

        let e0 = arena.constant(DbValue::Int(20));
        let mut t0 = Term::sargable(e0);
        t0.can_use_index = 1;
        t0.index_segs = vec![0];
        let id0 = env.add_term(t0);

        let plan = scan_plan(
            IndexEntry::new("ix_ab", vec![Some(0), Some(1)]),
            BitSet::from_ids([id0, id1]),
        );

        let info = index_scan_info(&env, &plan).unwrap().unwrap();
        assert_eq!(info.nterms, 2);
        assert_eq!(info.term_exprs, vec![Some(e0), Some(e1)]);
    }

    #[test]
    fn test_full_range_pk_scan_accepted() {
        let (env, _) = test_env();
        let mut ix = IndexEntry::new("pk", vec![Some(0)]);
        ix.constraint = ConstraintType::PrimaryKey;
        let plan = scan_plan(ix, BitSet::new());

        let info = index_scan_info(&env, &plan).unwrap().unwrap();
        assert_eq!(info.nterms, 0);
        assert!(info.term_exprs.is_empty());
    }

    #[test]
    fn test_zero_term_non_pk_rejected() {
        let (env, _) = test_env();
        let plan = scan_plan(IndexEntry::new("ix", vec![Some(0)]), BitSet::new());
        assert!(index_scan_info(&env, &plan).unwrap().is_none());
    }

    #[test]
    fn test_zero_term_orderby_induced_accepted() {
        let (env, _) = test_env();
        let mut plan = scan_plan(IndexEntry::new("ix", vec![Some(0)]), BitSet::new());
        if let PlanKind::Scan(s) = &mut plan.kind {
            s.iscan_from_orderby = true;
        }
        assert!(index_scan_info(&env, &plan).unwrap().is_some());
    }

    #[test]
    fn test_unmatched_term_is_invariant_violation() {
        let (mut env, mut arena) = test_env();
        let e = arena.constant(DbValue::Int(1));
        let mut t = Term::sargable(e);
        t.can_use_index = 1;
        t.index_segs = vec![2]; // not in the index below
        let id = env.add_term(t);

        let plan = scan_plan(
            IndexEntry::new("ix_ab", vec![Some(0), Some(1)]),
            BitSet::from_ids([id]),
        );
        assert!(matches!(
            index_scan_info(&env, &plan),
            Err(EngineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_heap_scan_has_no_info() {
        let (env, _) = test_env();
        let plan = Plan::new(PlanKind::Scan(ScanPlan {
            node: 0,
            index: None,
            terms: BitSet::new(),
            kf_terms: BitSet::new(),
            index_cover: false,
            iscan_from_groupby: false,
            iscan_from_orderby: false,
        }));
        assert!(index_scan_info(&env, &plan).unwrap().is_none());
    }
}
