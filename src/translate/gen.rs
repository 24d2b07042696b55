//! The outer/inner recursive generator: composes the execution tree and
//! routes every predicate and subquery to its slot.

use crate::bitset::BitSet;
use crate::env::{self, PlanEnv};
use crate::error::{EngineError, EngineResult};
use crate::expr::ExprArena;
use crate::plan::{JoinMethod, Plan, PlanKind, SelectContext, SortType};
use crate::xasl::{XaslArena, XaslId};

/// Cost and size summary preserved from the plan root after translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanSummary {
    pub cost: f64,
    pub cardinality: u64,
    pub xasl: XaslId,
}

/// One statement's translation state: the planner environment, the
/// shared expression arena, the select context, and the execution-node
/// arena being built.
pub struct Translator<'a> {
    pub env: &'a PlanEnv,
    pub exprs: &'a mut ExprArena,
    pub ctx: &'a SelectContext,
    pub xasls: XaslArena,
    pub summary: Option<PlanSummary>,
}

impl<'a> Translator<'a> {
    pub fn new(env: &'a PlanEnv, exprs: &'a mut ExprArena, ctx: &'a SelectContext) -> Self {
        Translator {
            env,
            exprs,
            ctx,
            xasls: XaslArena::new(),
            summary: None,
        }
    }

    /// Translate a plan tree into the execution node `root`.
    ///
    /// Distributes the from-part entities as access specs and the
    /// where-part predicates across them, attaches select-list
    /// subqueries at the last scan of the chain, and preserves the
    /// plan's cost summary on the root node. The caller remains
    /// responsible for select-list expressions and other statement-level
    /// setup.
    pub fn translate(&mut self, plan: &mut Plan, root: XaslId) -> EngineResult<XaslId> {
        let xasl = self.gen_outer(plan, &BitSet::new(), None, None, root)?;

        // Correlated select-list subqueries depend on values produced by
        // the innermost scan, so they hang off the end of the chain.
        let last = self.xasls.last_scan(xasl);
        for s in self.ctx.select_subqueries.iter() {
            let subq = self.env.subquery(s);
            if let Some(sub_xasl) = subq.exec_node {
                if !subq.is_uncorrelated() {
                    self.xasls.add_correlated(last, sub_xasl);
                }
            }
        }

        self.preserve_info(plan, xasl);
        Ok(xasl)
    }

    /// Attach cardinality and projected-size hints to the root node and
    /// keep the plan summary for the statement compiler.
    fn preserve_info(&mut self, plan: &Plan, xasl: XaslId) {
        let node = self.xasls.get_mut(xasl);
        node.projected_size = plan.info.projected_size;
        node.cardinality = plan.info.cardinality;
        self.summary = Some(PlanSummary {
            cost: plan.info.cost,
            cardinality: plan.info.cardinality,
            xasl,
        });
    }

    /// Generate code for `plan` as part of the outer driver, into the
    /// already allocated node `xasl`.
    ///
    /// `subqueries` is the set of subqueries that must be re-evaluated
    /// every time this plan produces a row; `inner_scans` is the chain
    /// of nested inner scans accumulated by enclosing joins.
    pub fn gen_outer(
        &mut self,
        plan: &mut Plan,
        subqueries: &BitSet,
        inner_scans: Option<XaslId>,
        fetches: Option<XaslId>,
        xasl: XaslId,
    ) -> EngineResult<XaslId> {
        let mut new_subqueries = subqueries.union(&plan.subqueries);

        // The predicates this level is responsible for routing.
        let mut predset = plan.sarged_terms.clone();
        if let PlanKind::Join(join) = &plan.kind {
            // Join terms may be empty if this "join" is a cartesian
            // product or was folded into the inner index scan.
            predset.union_with(&join.join_terms);
            if join.join_type.is_outer() {
                predset.union_with(&join.during_join_terms);
                predset.union_with(&join.after_join_terms);
            }
        }

        match &plan.kind {
            PlanKind::Scan(_) => {
                // Only the access spec is attached here; the caller owns
                // the rest of this node's initialization.
                self.add_access_spec(xasl, plan)?;
                self.xasls.append_scan(xasl, inner_scans);
                self.xasls.add_subqueries(self.env, xasl, &new_subqueries);
                Ok(xasl)
            }
            PlanKind::Sort(_) => {
                self.gen_outer_sort(plan, &new_subqueries, inner_scans, fetches, xasl)
            }
            PlanKind::Join(_) => self.gen_outer_join(
                plan,
                &mut new_subqueries,
                &mut predset,
                inner_scans,
                fetches,
                xasl,
            ),
            PlanKind::Worst => Err(EngineError::InvariantViolation(
                "worst plan reached translation",
            )),
        }
    }

    fn gen_outer_sort(
        &mut self,
        plan: &mut Plan,
        subqueries: &BitSet,
        inner_scans: Option<XaslId>,
        fetches: Option<XaslId>,
        xasl: XaslId,
    ) -> EngineResult<XaslId> {
        let sort_type = match &plan.kind {
            PlanKind::Sort(s) => s.sort_type,
            _ => return Err(EngineError::InvariantViolation("sort generation on non-sort")),
        };

        if plan.top_rooted && sort_type != SortType::Temp {
            // SORT-LIMIT plans are never top rooted.
            if sort_type == SortType::Limit {
                return Err(EngineError::InvariantViolation("top-rooted sort-limit plan"));
            }
            let sub = match &mut plan.kind {
                PlanKind::Sort(s) => s.subplan.as_mut(),
                _ => unreachable!(),
            };
            return self.gen_outer(sub, subqueries, inner_scans, fetches, xasl);
        }

        // With inner scans pending, this plan is a subplan of some outer
        // join node and the current node must scan the temp file this
        // plan materializes. Otherwise we are still above every join and
        // can simply recurse, adding the sort spec afterwards. SORT-LIMIT
        // always materializes.
        if inner_scans.is_some() || sort_type == SortType::Limit {
            let namelist: Vec<usize> = plan.info.projected_segs.iter().collect();
            let sarged = plan.sarged_terms.clone();

            let listfile = if sort_type == SortType::Limit {
                self.make_sort_limit_proc(plan, &namelist, xasl)?
            } else {
                let listfile = self.make_buildlist_proc(namelist.clone());
                let sub = match &mut plan.kind {
                    PlanKind::Sort(s) => s.subplan.as_mut(),
                    _ => unreachable!(),
                };
                let listfile = self.gen_outer(sub, &BitSet::new(), None, None, listfile)?;
                let ordbynum_val = self.xasls.get(xasl).ordbynum_val;
                self.add_sort_spec(listfile, plan, ordbynum_val, false)?;
                listfile
            };

            self.xasls.add_uncorrelated(xasl, listfile);
            self.init_list_scan_proc(xasl, listfile, &namelist, &sarged)?;
            self.xasls.append_scan(xasl, inner_scans);
            self.xasls.add_subqueries(self.env, xasl, subqueries);
            Ok(xasl)
        } else {
            let sub = match &mut plan.kind {
                PlanKind::Sort(s) => s.subplan.as_mut(),
                _ => unreachable!(),
            };
            let xasl = self.gen_outer(sub, subqueries, inner_scans, fetches, xasl)?;
            self.add_sort_spec(xasl, plan, None, true)?;
            Ok(xasl)
        }
    }

    fn gen_outer_join(
        &mut self,
        plan: &mut Plan,
        new_subqueries: &mut BitSet,
        predset: &mut BitSet,
        inner_scans: Option<XaslId>,
        fetches: Option<XaslId>,
        xasl: XaslId,
    ) -> EngineResult<XaslId> {
        let sarged_snapshot = plan.sarged_terms.clone();

        let join = match &mut plan.kind {
            PlanKind::Join(j) => j,
            _ => return Err(EngineError::InvariantViolation("join generation on non-join")),
        };

        match join.join_method {
            JoinMethod::NestedLoop | JoinMethod::Index => {}
            JoinMethod::Merge => {
                return Err(EngineError::InvariantViolation(
                    "merge join reached the translator",
                ))
            }
        }

        let join_type = join.join_type;

        // Subqueries referenced only through fabricated join terms must
        // not be installed as ordinary children of the inner scan; they
        // re-attach at the outer driver below.
        let mut fake_subqueries = BitSet::new();
        for i in join.join_terms.iter() {
            let term = self.env.term(i);
            if term.is_fake() {
                fake_subqueries.union_with(&term.subqueries);
            }
        }
        new_subqueries.difference_with(&fake_subqueries);

        let mut taj_terms = BitSet::new();
        let inner = join.inner.as_mut();

        for i in predset.clone().iter() {
            if !predset.contains(i) {
                continue;
            }
            let term = self.env.term(i);
            if env::is_totally_after_join_term(term) {
                taj_terms.add(i);
            } else if env::is_normal_access_term(term) {
                // A join term may move to the inner scan's key filter
                // only when the index is certified to include every
                // term segment that belongs to the inner node.
                if inner.is_index_covering_scan() || inner.uses_multi_range_opt() {
                    if let Some(scan) = inner.as_scan_mut() {
                        scan.kf_terms.add(i);
                        predset.difference_with(&scan.kf_terms);
                    }
                } else if inner.is_iscan() {
                    let inner_node = inner.as_scan().map(|s| s.node);
                    let index_segs = inner
                        .as_scan()
                        .and_then(|s| s.index.as_ref())
                        .map(crate::plan::IndexEntry::segment_set);
                    if let (Some(node), Some(index_segs)) = (inner_node, index_segs) {
                        let mut term_segs = term.segments.clone();
                        term_segs.intersect_with(&self.env.node(node).segments);
                        term_segs.difference_with(&index_segs);
                        if term_segs.is_empty() {
                            if let Some(scan) = inner.as_scan_mut() {
                                scan.kf_terms.add(i);
                                predset.difference_with(&scan.kf_terms);
                            }
                        }
                    }
                }
            }
        }
        // Totally-after-join terms never go to the inner producer.
        predset.difference_with(&taj_terms);

        // For outer joins, sarged terms must not become key-filter terms
        // on the inner side: key filtering during the range search can
        // suppress rows that the outer join is required to NULL-produce.
        let scan = self.gen_inner(inner, predset, new_subqueries, inner_scans, fetches)?;
        if join_type.is_outer() {
            self.xasls.mark_access_fetch_outer(scan);
        }

        // Instnum evaluation belongs to the outermost producer.
        let outer = join.outer.as_mut();
        for t in sarged_snapshot.iter() {
            if env::is_totally_after_join_term(self.env.term(t)) {
                outer.sarged_terms.add(t);
            }
        }

        self.gen_outer(outer, &fake_subqueries, Some(scan), None, xasl)
    }

    /// Generate code for `plan` as an inner producer.
    ///
    /// `predset` carries the predicates pushed down from the enclosing
    /// join; a scan folds them into its sarged set, while materialized
    /// producers apply them as data filters on the temp-file scan.
    pub fn gen_inner(
        &mut self,
        plan: &mut Plan,
        predset: &BitSet,
        subqueries: &BitSet,
        inner_scans: Option<XaslId>,
        _fetches: Option<XaslId>,
    ) -> EngineResult<XaslId> {
        let mut new_subqueries = subqueries.clone();
        new_subqueries.union_with(&plan.subqueries);

        match &plan.kind {
            PlanKind::Scan(_) => {
                // Push the join edge into the inner scan's sarg terms so
                // unsatisfied rows are filtered as early as possible.
                plan.sarged_terms.union_with(predset);

                let scan = self.make_scan_proc();
                self.init_class_scan_proc(scan, plan)?;
                self.xasls.append_scan(scan, inner_scans);
                self.xasls.add_subqueries(self.env, scan, &new_subqueries);
                Ok(scan)
            }
            PlanKind::Sort(_) | PlanKind::Join(_) => {
                // Joins are not supposed to show up here; treat them like
                // a sort by whacking their results into a temporary file
                // and scanning that.
                if let PlanKind::Sort(s) = &plan.kind {
                    if s.sort_type != SortType::Temp {
                        return Err(EngineError::InvariantViolation(
                            "inner sort plan is not a temp sort",
                        ));
                    }
                }

                let namelist: Vec<usize> = plan.info.projected_segs.iter().collect();
                let listfile = self.make_buildlist_proc(namelist.clone());
                let listfile = self.gen_outer(plan, &BitSet::new(), None, None, listfile)?;

                let scan = self.make_scan_proc();
                self.init_list_scan_proc(scan, listfile, &namelist, predset)?;
                self.xasls.append_scan(scan, inner_scans);
                self.xasls.add_subqueries(self.env, scan, &new_subqueries);
                self.xasls.add_uncorrelated(scan, listfile);
                Ok(scan)
            }
            PlanKind::Worst => Err(EngineError::InvariantViolation(
                "worst plan reached inner generation",
            )),
        }
    }
}
