//! Multi-range key-limit analyzer.
//!
//! Recognizes `WHERE k1=? AND … AND kj IN (…) AND … AND kp-1=? ORDER BY
//! kp [,…] FOR orderby_num ≤ n` over an index whose columns `k1 … kp-1,
//! kp, …` are consecutive, and marks the scan so each enumerated range
//! terminates after contributing its share of the top-N tuples.

use crate::bitset::BitSet;
use crate::env::PlanEnv;
use crate::expr::{ExprArena, TermShape};
use crate::plan::{IndexEntry, JoinType, MultiRangeOpt, Plan, PlanKind, SelectContext};

use super::key_limit::{limits_from_pred, orderby_upper_bound, Numbering};

/// Check a single index scan plan for the multi-range key-limit
/// optimization, and mark the plan on success.
///
/// `upper_limit` is the configured ceiling on the constant bound; a
/// larger LIMIT disables the optimization, while non-constant bounds are
/// admitted and enforced at bind time.
pub fn check_iscan_multi_range_opt(
    env: &PlanEnv,
    arena: &mut ExprArena,
    ctx: &SelectContext,
    upper_limit: Option<u64>,
    plan: &mut Plan,
) -> bool {
    if !plan.is_iscan() {
        return false;
    }
    if ctx.hints.no_multi_range_opt {
        return false;
    }
    if ctx.order_by.is_empty() || ctx.all_distinct {
        return false;
    }
    if ctx.orderby_for.is_none() {
        return false;
    }

    // Every order-by expression must be a name referring to a
    // select-list position.
    let mut names: Vec<(&str, bool)> = Vec::with_capacity(ctx.order_by.len());
    for spec in &ctx.order_by {
        match ctx.select_name_at(spec.pos_no) {
            Some(n) => names.push((n, spec.descending)),
            None => return false,
        }
    }

    let Some((first_col, reverse)) = check_plan_index(env, plan, &names) else {
        return false;
    };
    if !check_terms(env, arena, plan, first_col) {
        return false;
    }
    if !check_subqueries(env, arena, plan, first_col) {
        return false;
    }
    if !check_ordbynum_range(arena, ctx, upper_limit) {
        return false;
    }

    // All conditions were met.
    plan.use_iscan_descending = reverse;
    plan.multi_range_opt = MultiRangeOpt::Use;
    if let Some(scan) = plan.as_scan_mut() {
        if let Some(index) = scan.index.as_mut() {
            index.use_descending = reverse;
            index.first_sort_column = Some(first_col);
        }
    }
    true
}

/// Verify the chosen index contains all order-by columns at consecutive
/// positions with matching (or uniformly reversed) direction. Returns
/// the first sort column position and the reverse flag.
fn check_plan_index(env: &PlanEnv, plan: &Plan, names: &[(&str, bool)]) -> Option<(usize, bool)> {
    let scan = plan.as_scan()?;
    let index = scan.index.as_ref()?;
    let nsegs = index.nsegs();

    let (first_name, first_desc) = names.first()?;

    // Look for the first order-by column.
    let mut reverse = false;
    let mut first = None;
    for i in 0..nsegs {
        let Some(seg_idx) = index.seg_idxs[i] else {
            continue;
        };
        if env.segment(seg_idx).name == *first_name {
            if i == 0 {
                // No leading enumerated columns: nothing to multi-range.
                return None;
            }
            if index.asc_desc[i] != *first_desc {
                // Direction mismatch, but a reversed read may work.
                reverse = true;
            }
            first = Some(i);
            break;
        }
    }
    let first = first?;

    // Remaining order-by columns must occupy the following positions.
    let mut i = first + 1;
    for (name, desc) in &names[1..] {
        if i >= nsegs {
            return None;
        }
        let Some(seg_idx) = index.seg_idxs[i] else {
            return None;
        };
        if env.segment(seg_idx).name != *name {
            return None;
        }
        let dir = if reverse {
            !index.asc_desc[i]
        } else {
            index.asc_desc[i]
        };
        if dir != *desc {
            return None;
        }
        i += 1;
    }

    Some((first, reverse))
}

/// Index position of a term, probing at most the first two usable
/// index-segment candidates.
fn find_term_pos(env: &PlanEnv, index: &IndexEntry, term_id: usize) -> Option<usize> {
    let term = env.term(term_id);
    for i in 0..term.can_use_index.min(2) {
        let seg = *term.index_segs.get(i)?;
        if let Some(pos) = index.position_of_segment(seg) {
            return Some(pos);
        }
    }
    None
}

/// Every index column left of the first sort column must be pinned by an
/// equality or exactly one key-list term, and no term on the scan's node
/// may act as a data filter.
fn check_terms(env: &PlanEnv, arena: &ExprArena, plan: &Plan, first_sort_col: usize) -> bool {
    let Some(scan) = plan.as_scan() else {
        return false;
    };
    let Some(index) = scan.index.as_ref() else {
        return false;
    };

    let mut used_cols = vec![0usize; first_sort_col];
    let mut kl_terms = 0usize;

    // Check all index scan terms.
    for t in scan.terms.iter() {
        let Some(pos) = find_term_pos(env, index, t) else {
            return false;
        };
        if pos < first_sort_col {
            used_cols[pos] += 1;
            // Only helpful if the term is an equality or a key list.
            let Some(expr) = env.term(t).expr else {
                return false;
            };
            match arena.term_shape(expr) {
                TermShape::Equality => {}
                TermShape::KeyList => kl_terms += 1,
                TermShape::Other => return false,
            }
        }
    }

    if kl_terms > 1 {
        return false;
    }

    // Check all key filter terms; only equalities pin a column here.
    for t in scan.kf_terms.iter() {
        match find_term_pos(env, index, t) {
            None => {
                if env.term(t).can_use_index == 0 {
                    continue;
                }
                return false;
            }
            Some(pos) => {
                if pos < first_sort_col {
                    if let Some(expr) = env.term(t).expr {
                        if arena.term_shape(expr) == TermShape::Equality {
                            used_cols[pos] += 1;
                        }
                    }
                }
            }
        }
    }

    if used_cols.iter().any(|c| *c == 0) {
        return false;
    }

    // Check every term in the environment for a data filter on this
    // node: a segment outside the index disqualifies the scan.
    for term in &env.terms {
        for s in term.segments.iter() {
            if env.segment(s).head_node != scan.node {
                continue;
            }
            if index.position_of_segment(s).is_none() {
                return false;
            }
        }
    }

    true
}

/// Correlated subqueries may only touch this node through segments that
/// sit left of the first sort column, and never through a range term:
/// re-filtering after the top-N cut would shrink the result.
fn check_subqueries(env: &PlanEnv, arena: &ExprArena, plan: &Plan, first_sort_col: usize) -> bool {
    let Some(scan) = plan.as_scan() else {
        return false;
    };
    let Some(index) = scan.index.as_ref() else {
        return false;
    };

    for subq in &env.subqueries {
        for t in subq.terms.iter() {
            let term = env.term(t);
            for ts in term.segments.iter() {
                if env.segment(ts).head_node != scan.node {
                    continue;
                }
                let mut found = false;
                for k in 0..first_sort_col {
                    if index.seg_idxs[k] == Some(ts) {
                        if seg_belongs_to_range_term(
                            env,
                            arena,
                            &scan.terms,
                            &scan.kf_terms,
                            &plan.sarged_terms,
                            ts,
                        ) {
                            return false;
                        }
                        found = true;
                        break;
                    }
                }
                if !found {
                    // Segment not found before the first sort column.
                    return false;
                }
            }
        }
    }
    true
}

fn set_has_range_term_on_seg(
    env: &PlanEnv,
    arena: &ExprArena,
    terms: &BitSet,
    seg_idx: usize,
) -> bool {
    for t in terms.iter() {
        let term = env.term(t);
        if !term.segments.contains(seg_idx) {
            continue;
        }
        if let Some(expr) = term.expr {
            if arena.is_range_like(expr) {
                return true;
            }
        }
    }
    false
}

/// Scan terms, key filter terms, and sarged terms must all be checked to
/// cover every placement of a RANGE/IN predicate over the segment.
fn seg_belongs_to_range_term(
    env: &PlanEnv,
    arena: &ExprArena,
    scan_terms: &BitSet,
    kf_terms: &BitSet,
    sarged_terms: &BitSet,
    seg_idx: usize,
) -> bool {
    set_has_range_term_on_seg(env, arena, scan_terms, seg_idx)
        || set_has_range_term_on_seg(env, arena, kf_terms, seg_idx)
        || set_has_range_term_on_seg(env, arena, sarged_terms, seg_idx)
}

/// The orderby_num range must reduce to a single upper bound, with no
/// lower bound, within the configured ceiling.
fn check_ordbynum_range(arena: &mut ExprArena, ctx: &SelectContext, upper_limit: Option<u64>) -> bool {
    let Some(orderby_for) = ctx.orderby_for else {
        return false;
    };
    if orderby_upper_bound(arena, orderby_for).is_none() {
        return false;
    }

    let mut lowers = Vec::new();
    let mut uppers = Vec::new();
    if !limits_from_pred(arena, orderby_for, Numbering::OrderByNum, &mut lowers, &mut uppers) {
        return false;
    }
    if !lowers.is_empty() || uppers.is_empty() {
        return false;
    }

    if let Some(limit) = upper_limit {
        // Only constant bounds can be checked at compile time; host
        // variables pass through for a bind-time check.
        let mut uppers = uppers.into_iter();
        let mut merged = match uppers.next() {
            Some(u) => u,
            None => return false,
        };
        for u in uppers {
            merged = merged.least(u);
        }
        if let Ok(v) = merged.evaluate(&[]) {
            match v.as_i128() {
                Some(bound) if bound >= 0 && (bound as u128) <= u128::from(limit) => {}
                _ => return false,
            }
        }
    }

    true
}

/// Side of a join taken while walking down to a subplan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Outer,
    Inner,
}

/// Locate the (unique) index scan subplan already marked for multi-range
/// optimization, searching outer-first through INNER joins.
pub fn find_multi_range_subplan(plan: &Plan) -> Option<Vec<Side>> {
    match &plan.kind {
        PlanKind::Join(join) if join.join_type == JoinType::Inner => {
            if let Some(mut path) = find_multi_range_subplan(&join.outer) {
                path.insert(0, Side::Outer);
                return Some(path);
            }
            if let Some(mut path) = find_multi_range_subplan(&join.inner) {
                path.insert(0, Side::Inner);
                return Some(path);
            }
            None
        }
        _ => {
            if plan.is_interesting_order_scan() && plan.uses_multi_range_opt() {
                Some(Vec::new())
            } else {
                None
            }
        }
    }
}

/// Everything the join-condition check needs to know about the sort
/// plan, copied out so the plan tree can be walked mutably.
struct SortPlanView {
    node: usize,
    index: IndexEntry,
    first_sort_column: usize,
    terms: BitSet,
    kf_terms: BitSet,
    sarged_terms: BitSet,
}

fn plan_at<'p>(plan: &'p Plan, path: &[Side]) -> &'p Plan {
    match path.split_first() {
        None => plan,
        Some((side, rest)) => match &plan.kind {
            PlanKind::Join(join) => match side {
                Side::Outer => plan_at(&join.outer, rest),
                Side::Inner => plan_at(&join.inner, rest),
            },
            _ => plan,
        },
    }
}

fn sort_view(plan: &Plan, path: &[Side]) -> Option<SortPlanView> {
    let sort_plan = plan_at(plan, path);
    let scan = sort_plan.as_scan()?;
    let index = scan.index.as_ref()?;
    Some(SortPlanView {
        node: scan.node,
        index: index.clone(),
        first_sort_column: index.first_sort_column?,
        terms: scan.terms.clone(),
        kf_terms: scan.kf_terms.clone(),
        sarged_terms: sort_plan.sarged_terms.clone(),
    })
}

/// Check if a join plan can make use of the multi-range optimization:
/// exactly one qualifying index scan, and every scan joined "inner-more"
/// of it touches only index positions before the first sort column, and
/// never through a range term.
pub fn check_join_multi_range_opt(
    env: &PlanEnv,
    arena: &ExprArena,
    ctx: &SelectContext,
    plan: &mut Plan,
) -> bool {
    match &plan.kind {
        PlanKind::Join(join) if join.join_type == JoinType::Inner => {}
        _ => return false,
    }
    if ctx.hints.no_multi_range_opt {
        return false;
    }

    let Some(sort_path) = find_multi_range_subplan(plan) else {
        return false;
    };
    let Some(view) = sort_view(plan, &sort_path) else {
        return false;
    };

    let mut seen = false;
    let mut cur_path = Vec::new();
    check_subplans(
        env,
        arena,
        None,
        plan,
        &mut cur_path,
        &sort_path,
        &view,
        &mut seen,
    )
}

/// Walk the join chain, validating every scan met after the sort plan
/// ("to the right" of the order-by table). Sub-plans to its left can
/// only invalidate the optimization through a data filter, which the
/// single-scan check already rejected. Join nodes cache a negative
/// verdict for later probes.
fn check_subplans(
    env: &PlanEnv,
    arena: &ExprArena,
    parent_join_terms: Option<&BitSet>,
    plan: &mut Plan,
    cur_path: &mut Vec<Side>,
    sort_path: &[Side],
    view: &SortPlanView,
    seen: &mut bool,
) -> bool {
    match &mut plan.kind {
        PlanKind::Scan(scan) => {
            if *seen {
                let Some(parent_terms) = parent_join_terms else {
                    return false;
                };
                let mut join_terms = parent_terms.clone();
                join_terms.union_with(&scan.terms);
                return check_subplan_join_cond(env, arena, &join_terms, scan.node, view);
            }
            if cur_path.as_slice() == sort_path {
                *seen = true;
            }
            true
        }
        PlanKind::Join(join) => {
            if plan.multi_range_opt == MultiRangeOpt::Use {
                // Already checked; the sort plan is in this subtree.
                *seen = true;
                return true;
            }
            if plan.multi_range_opt == MultiRangeOpt::CannotUse {
                return false;
            }

            let join_terms = join.join_terms.clone();

            cur_path.push(Side::Outer);
            let ok = check_subplans(
                env,
                arena,
                Some(&join_terms),
                &mut join.outer,
                cur_path,
                sort_path,
                view,
                seen,
            );
            cur_path.pop();
            if !ok {
                plan.multi_range_opt = MultiRangeOpt::CannotUse;
                return false;
            }

            cur_path.push(Side::Inner);
            let ok = check_subplans(
                env,
                arena,
                Some(&join_terms),
                &mut join.inner,
                cur_path,
                sort_path,
                view,
                seen,
            );
            cur_path.pop();
            if !ok {
                plan.multi_range_opt = MultiRangeOpt::CannotUse;
                return false;
            }

            true
        }
        // A case we have not foreseen; be conservative.
        _ => false,
    }
}

/// Validate the join conditions between a scan and the sort plan: every
/// sort-table segment mentioned by a shared join term must sit before
/// the first sort column and outside any range term.
fn check_subplan_join_cond(
    env: &PlanEnv,
    arena: &ExprArena,
    join_terms: &BitSet,
    subplan_node: usize,
    view: &SortPlanView,
) -> bool {
    for t in join_terms.iter() {
        let jt = env.term(t);
        if !jt.nodes.contains(subplan_node) {
            continue;
        }
        if !jt.nodes.contains(view.node) {
            continue;
        }

        // This join term references both the sub-plan and the sort plan.
        for seg_idx in jt.segments.iter() {
            if env.segment(seg_idx).head_node != view.node {
                continue;
            }
            let mut found = false;
            for k in 0..view.first_sort_column {
                if view.index.seg_idxs[k] == Some(seg_idx) {
                    if !seg_belongs_to_range_term(
                        env,
                        arena,
                        &view.terms,
                        &view.kf_terms,
                        &view.sarged_terms,
                        seg_idx,
                    ) {
                        found = true;
                    }
                    break;
                }
            }
            if !found {
                return false;
            }
        }
    }
    true
}
