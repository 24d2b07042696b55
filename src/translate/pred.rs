//! Predicate factory: ordered pointer-predicate lists from term bitsets.

use crate::bitset::BitSet;
use crate::env::{self, EligibilityFn, PlanEnv};
use crate::error::{EngineError, EngineResult};
use crate::plan::Plan;
use crate::xasl::{PredList, PredPtr};

/// Build an AND predicate list from a term-id set.
///
/// Terms are emitted as pointer nodes into the expression arena and kept
/// in descending `(selectivity, rank)` order, selectivity compared first.
/// The scan driver evaluates the list in order and may short-circuit, so
/// higher selectivity must come first. Fabricated terms never make it
/// into a predicate list.
pub fn build_pred_list(
    env: &PlanEnv,
    term_ids: &BitSet,
    eligible: EligibilityFn,
) -> EngineResult<PredList> {
    let mut pred_list: PredList = Vec::new();

    for i in term_ids.iter() {
        let term = env.term(i);

        if term.is_fake() || !eligible(term) {
            continue;
        }

        // Pointer predicates only: mutating the WHERE clause in place
        // would leave no way to recompile if translation bails out.
        let expr = term
            .expr
            .ok_or(EngineError::InvariantViolation("term without source expression"))?;

        let pointer = PredPtr {
            expr,
            selectivity: term.selectivity,
            rank: term.rank,
        };

        // Stable insertion: place before the first element with a
        // strictly smaller (selectivity, rank); equal pairs keep input
        // order.
        let pos = pred_list.iter().position(|curr| {
            curr.selectivity < pointer.selectivity
                || (curr.selectivity == pointer.selectivity && curr.rank < pointer.rank)
        });
        match pos {
            Some(p) => pred_list.insert(p, pointer),
            None => pred_list.push(pointer),
        }
    }

    Ok(pred_list)
}

/// Split a scan plan's predicates into key-filter and data-filter lists.
///
/// Re-asserts set disjointness first: key-range terms are removed from
/// the key-filter set, and both are removed from the sarged set. When the
/// scan has no index info, everything lands in the data filter.
pub fn split_scan_preds(
    env: &PlanEnv,
    plan: &mut Plan,
    has_index_info: bool,
) -> EngineResult<(PredList, PredList)> {
    let (range_terms, kf_terms) = {
        let scan = plan
            .as_scan_mut()
            .ok_or(EngineError::InvariantViolation("predicate split on non-scan plan"))?;
        // Exclude key-range terms from key-filter terms.
        let range_terms = scan.terms.clone();
        scan.kf_terms.difference_with(&range_terms);
        (range_terms, scan.kf_terms.clone())
    };
    // Exclude key-range and key-filter terms from sarged terms.
    plan.sarged_terms.difference_with(&range_terms);
    plan.sarged_terms.difference_with(&kf_terms);

    if !has_index_info {
        let data_pred = build_pred_list(env, &plan.sarged_terms, env::is_normal_access_term)?;
        return Ok((Vec::new(), data_pred));
    }

    let key_pred = build_pred_list(env, &kf_terms, env::is_always_true)?;
    let data_pred = build_pred_list(env, &plan.sarged_terms, env::is_normal_access_term)?;
    Ok((key_pred, data_pred))
}

/// If-predicate of a plan: unclassified terms and subquery-bearing terms
/// from the sarged set.
pub fn if_pred_from_plan(env: &PlanEnv, plan: &Plan) -> EngineResult<PredList> {
    build_pred_list(env, &plan.sarged_terms, env::is_normal_if_term)
}

/// Instance-number predicate of a plan: the totally-after-join terms from
/// the sarged set.
pub fn instnum_pred_from_plan(env: &PlanEnv, plan: &Plan) -> EngineResult<PredList> {
    build_pred_list(env, &plan.sarged_terms, env::is_totally_after_join_term)
}
