//! Execution-node builders: scan skeletons, list-file procs, access
//! specs, and predicate slotting.

use crate::bitset::BitSet;
use crate::env;
use crate::error::{EngineError, EngineResult};
use crate::plan::{Plan, PlanKind, SortType};
use crate::xasl::{
    AccessMethod, AccessSpec, IndexSpec, PredList, ProcType, SortColumn, XaslId, XaslNode,
};

use super::gen::Translator;
use super::index_info::{index_scan_info, IndexScanInfo};
use super::key_limit::{
    key_limit_from_instnum, key_limit_from_ordbynum, orderby_upper_bound,
    pred_list_needs_scan_continue, pred_needs_scan_continue,
};
use super::pred::{build_pred_list, if_pred_from_plan, instnum_pred_from_plan, split_scan_preds};

impl<'a> Translator<'a> {
    /// Empty scan skeleton, to be fleshed out by an access-spec call.
    pub fn make_scan_proc(&mut self) -> XaslId {
        self.xasls.push(XaslNode::default())
    }

    /// Build-list-file skeleton with the given output name list; used for
    /// sort, group, and temp materialization.
    pub fn make_buildlist_proc(&mut self, namelist: Vec<usize>) -> XaslId {
        let node = XaslNode {
            proc_type: ProcType::BuildList,
            namelist,
            ..XaslNode::default()
        };
        self.xasls.push(node)
    }

    /// Flesh out `xasl` as a class scan over `plan`: heap-or-index access
    /// plus after-join and if predicates. Used for inner scans, which get
    /// their instnum predicate from the enclosing driver instead.
    pub(super) fn init_class_scan_proc(
        &mut self,
        xasl: XaslId,
        plan: &mut Plan,
    ) -> EngineResult<XaslId> {
        let info = index_scan_info(self.env, plan)?;
        let (key_pred, access_pred) = split_scan_preds(self.env, plan, info.is_some())?;
        self.attach_class_access(xasl, plan, info, key_pred, access_pred)?;

        let after_join_pred =
            build_pred_list(self.env, &plan.sarged_terms, env::is_after_join_term)?;
        let if_pred = if_pred_from_plan(self.env, plan)?;
        self.add_after_join_predicate(xasl, after_join_pred);
        self.add_if_predicate(xasl, if_pred);

        Ok(xasl)
    }

    /// Flesh out `xasl` as a scan over a previously built list file,
    /// routing `predset` into access / if / after-join / instnum slots.
    pub(super) fn init_list_scan_proc(
        &mut self,
        xasl: XaslId,
        listfile: XaslId,
        namelist: &[usize],
        predset: &BitSet,
    ) -> EngineResult<XaslId> {
        let access_pred = build_pred_list(self.env, predset, env::is_normal_access_term)?;
        let if_pred = build_pred_list(self.env, predset, env::is_normal_if_term)?;
        let after_join_pred = build_pred_list(self.env, predset, env::is_after_join_term)?;
        let instnum_pred = build_pred_list(self.env, predset, env::is_totally_after_join_term)?;

        let node = self.xasls.get_mut(xasl);
        node.spec_list.push(AccessSpec::list_scan(listfile, access_pred));
        node.val_list = namelist.to_vec();

        self.add_if_predicate(xasl, if_pred);
        self.add_after_join_predicate(xasl, after_join_pred);
        self.add_instnum_predicate(xasl, instnum_pred);

        Ok(xasl)
    }

    /// Wire the access spec, value list, if-pred, and instnum-pred of an
    /// outer scan leaf. Called exactly once per scan leaf of the plan.
    pub(super) fn add_access_spec(&mut self, xasl: XaslId, plan: &mut Plan) -> EngineResult<()> {
        if !plan.is_scan() {
            return Err(EngineError::InvariantViolation("access spec on non-scan plan"));
        }

        let info = index_scan_info(self.env, plan)?;
        let (key_pred, access_pred) = split_scan_preds(self.env, plan, info.is_some())?;
        self.attach_class_access(xasl, plan, info, key_pred, access_pred)?;

        let if_pred = if_pred_from_plan(self.env, plan)?;
        let instnum_pred = instnum_pred_from_plan(self.env, plan)?;
        self.add_if_predicate(xasl, if_pred);
        self.add_instnum_predicate(xasl, instnum_pred);

        // A multi-range scan terminates each enumerated range early; the
        // per-range cutoff comes from the instnum predicate.
        if plan.uses_multi_range_opt() {
            let limit = key_limit_from_instnum(self.exprs, plan, self.xasls.get(xasl));
            if let Some(limit) = limit {
                let node = self.xasls.get_mut(xasl);
                for spec in &mut node.spec_list {
                    if let AccessMethod::Index(index_spec) = &mut spec.access {
                        index_spec.key_limit = Some(limit.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Build the physical access descriptor and value list for a class
    /// scan.
    fn attach_class_access(
        &mut self,
        xasl: XaslId,
        plan: &Plan,
        info: Option<IndexScanInfo>,
        key_pred: PredList,
        access_pred: PredList,
    ) -> EngineResult<()> {
        let scan = plan
            .as_scan()
            .ok_or(EngineError::InvariantViolation("class access on non-scan plan"))?;
        let node_entity = self.env.node(scan.node);

        let access = match info {
            Some(info) => {
                let index = scan
                    .index
                    .as_ref()
                    .ok_or(EngineError::InvariantViolation("index info without index entry"))?;
                AccessMethod::Index(IndexSpec {
                    index_name: index.name.clone(),
                    key_term_exprs: info.term_exprs,
                    use_descending: plan.use_iscan_descending || index.use_descending,
                    multi_range_opt: plan.is_index_mro_scan(),
                    first_sort_column: index.first_sort_column,
                    key_limit: None,
                })
            }
            None => AccessMethod::Heap,
        };

        let node = self.xasls.get_mut(xasl);
        node.spec_list.push(AccessSpec {
            entity: Some(node_entity.entity.clone()),
            access,
            key_pred,
            pred: access_pred,
            fetch_type: Default::default(),
        });
        node.val_list = node_entity.segments.iter().collect();

        Ok(())
    }

    /// Attach the order-by sort list of a sort plan. Only `SORT_LIMIT`
    /// plans carry their own list here; ordinary sorts are ordered by
    /// the enclosing statement machinery.
    pub(super) fn add_sort_spec(
        &mut self,
        xasl: XaslId,
        plan: &Plan,
        ordbynum_val: Option<usize>,
        _use_instnum: bool,
    ) -> EngineResult<()> {
        let is_sort_limit = matches!(
            &plan.kind,
            PlanKind::Sort(s) if s.sort_type == SortType::Limit
        );
        if !is_sort_limit {
            return Ok(());
        }

        let orderby: Vec<SortColumn> = self
            .ctx
            .order_by
            .iter()
            .map(|s| SortColumn {
                pos_no: s.pos_no,
                descending: s.descending,
            })
            .collect();
        self.apply_sort_limit_spec(xasl, ordbynum_val, orderby)
    }

    /// Set up the order-by list, ordbynum predicate, and orderby limit of
    /// a sort-limit list file.
    fn apply_sort_limit_spec(
        &mut self,
        listfile: XaslId,
        ordbynum_val: Option<usize>,
        orderby: Vec<SortColumn>,
    ) -> EngineResult<()> {
        {
            let node = self.xasls.get_mut(listfile);
            node.orderby_list = orderby;
            node.skip_orderby_list = false;
            node.orderby_limit = None;
        }

        // A SORT-LIMIT plan can only handle the upper limit of the
        // orderby_num predicate: the predicate is applied twice, once at
        // the sort-limit producer and once at the top plan, and a
        // doubly-evaluated lower bound loses tuples.
        let orderby_for = self.ctx.orderby_for.ok_or(EngineError::InvariantViolation(
            "sort-limit plan without orderby_for predicate",
        ))?;
        let upper = orderby_upper_bound(self.exprs, orderby_for).ok_or(
            EngineError::InvariantViolation("sort-limit plan without a single upper bound"),
        )?;

        let continue_flag = pred_needs_scan_continue(self.exprs, upper);
        {
            let node = self.xasls.get_mut(listfile);
            node.ordbynum_pred = Some(upper);
            node.ordbynum_continue = continue_flag;
        }

        let limit = key_limit_from_ordbynum(self.exprs, self.xasls.get(listfile), false);
        let node = self.xasls.get_mut(listfile);
        if let Some(limit) = limit {
            node.orderby_limit = Some(limit.upper);
        }
        node.ordbynum_val = ordbynum_val;

        Ok(())
    }

    /// Build the sort-limit list file of a `SORT_LIMIT` plan: a
    /// build-list proc over the sub-plan that materializes only the
    /// top-N tuples.
    pub(super) fn make_sort_limit_proc(
        &mut self,
        plan: &mut Plan,
        namelist: &[usize],
        enclosing: XaslId,
    ) -> EngineResult<XaslId> {
        let ordbynum_val = self
            .xasls
            .get(enclosing)
            .ordbynum_val
            .ok_or(EngineError::InvariantViolation(
                "sort-limit proc without an ordbynum register",
            ))?;

        // Extend the projected name list with order-by columns so the
        // internal list file can be sorted, and remap the sort list onto
        // positions within that extended list.
        let mut node_list = namelist.to_vec();
        let mut orderby = Vec::with_capacity(self.ctx.order_by.len());
        for spec in &self.ctx.order_by {
            let name = self
                .ctx
                .select_name_at(spec.pos_no)
                .ok_or(EngineError::InvariantViolation(
                    "sort-limit order-by column is not a select-list name",
                ))?;
            let pos = match node_list
                .iter()
                .position(|seg| self.env.segment(*seg).name == name)
            {
                Some(p) => p,
                None => {
                    let seg = self
                        .env
                        .segments
                        .iter()
                        .position(|s| s.name == name)
                        .ok_or(EngineError::InvariantViolation(
                            "order-by name resolves to no segment",
                        ))?;
                    node_list.push(seg);
                    node_list.len() - 1
                }
            };
            orderby.push(SortColumn {
                pos_no: pos + 1,
                descending: spec.descending,
            });
        }

        let subplan = match &mut plan.kind {
            PlanKind::Sort(s) if s.sort_type == SortType::Limit => s.subplan.as_mut(),
            _ => {
                return Err(EngineError::InvariantViolation(
                    "sort-limit proc on non-sort-limit plan",
                ))
            }
        };

        let listfile = self.make_buildlist_proc(node_list);
        let listfile = self.gen_outer(subplan, &BitSet::new(), None, None, listfile)?;
        self.apply_sort_limit_spec(listfile, Some(ordbynum_val), orderby)?;

        Ok(listfile)
    }

    /// Slot a predicate list into the if-pred field.
    pub(super) fn add_if_predicate(&mut self, xasl: XaslId, pred: PredList) {
        if !pred.is_empty() {
            self.xasls.get_mut(xasl).if_pred = pred;
        }
    }

    /// Slot a predicate list into the after-join-pred field.
    pub(super) fn add_after_join_predicate(&mut self, xasl: XaslId, pred: PredList) {
        if !pred.is_empty() {
            self.xasls.get_mut(xasl).after_join_pred = pred;
        }
    }

    /// Slot a predicate list into the instnum-pred field, deriving the
    /// scan-continuation flag from the predicate shape.
    pub(super) fn add_instnum_predicate(&mut self, xasl: XaslId, pred: PredList) {
        if pred.is_empty() {
            return;
        }
        let continue_flag = pred_list_needs_scan_continue(self.exprs, &pred);
        let node = self.xasls.get_mut(xasl);
        node.instnum_pred = pred;
        if continue_flag {
            node.instnum_continue = true;
        }
    }
}
