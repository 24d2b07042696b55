//! # Execution Tree Model
//!
//! The translator lowers an optimizer plan into a graph of execution
//! nodes. Nodes live in one [`XaslArena`] per statement and refer to each
//! other through copyable [`XaslId`]s: the `scan_ptr` chain links nested
//! scans of a join, `aptr` lists uncorrelated sub-plans evaluated once
//! before the node, and `dptr` lists correlated subqueries re-evaluated
//! per row. Predicate slots hold pointer-node lists into the expression
//! arena, never copies.

use crate::bitset::BitSet;
use crate::env::{EntitySpec, PlanEnv};
use crate::expr::{ExprId, LimitExpr};

/// Index of an execution node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XaslId(pub usize);

/// What the node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcType {
    /// Row stream from its access specs
    #[default]
    Scan,
    /// Materializes its input into a list file
    BuildList,
}

/// One pointer predicate: a borrowed expression plus the evaluation
/// ordering key the factory sorted it by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredPtr {
    pub expr: ExprId,
    pub selectivity: f64,
    pub rank: i32,
}

/// An AND-list of pointer predicates, highest `(selectivity, rank)`
/// first. The scan driver evaluates in list order and may short-circuit.
pub type PredList = Vec<PredPtr>;

/// Fetch mode of an access spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchType {
    #[default]
    Inner,
    /// Inner side of an outer join: produce a NULL row on miss
    Outer,
}

/// Derived key-limit bounds attached to an index access
/// (`lower < n ≤ upper` convention).
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLimit {
    pub lower: Option<LimitExpr>,
    pub upper: LimitExpr,
}

/// Index access annotation carried by a spec.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub index_name: String,
    /// Key-range expression per index position, in index column order
    pub key_term_exprs: Vec<Option<ExprId>>,
    pub use_descending: bool,
    /// Per-range early termination under ORDER BY + LIMIT
    pub multi_range_opt: bool,
    /// First index position occupied by a sort column (multi-range only)
    pub first_sort_column: Option<usize>,
    pub key_limit: Option<KeyLimit>,
}

/// Physical access method of a spec.
#[derive(Debug, Clone)]
pub enum AccessMethod {
    Heap,
    Index(IndexSpec),
    /// Scan a previously materialized list file
    List { list: XaslId },
}

/// Physical access descriptor attached to a scan node.
#[derive(Debug, Clone)]
pub struct AccessSpec {
    pub entity: Option<EntitySpec>,
    pub access: AccessMethod,
    /// Evaluated inside the index scan against the full key
    pub key_pred: PredList,
    /// Data filter on fetched rows
    pub pred: PredList,
    pub fetch_type: FetchType,
}

impl AccessSpec {
    pub fn list_scan(list: XaslId, pred: PredList) -> Self {
        AccessSpec {
            entity: None,
            access: AccessMethod::List { list },
            key_pred: Vec::new(),
            pred,
            fetch_type: FetchType::Inner,
        }
    }
}

/// One column of an order-by sort list (1-based output position).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortColumn {
    pub pos_no: usize,
    pub descending: bool,
}

/// One execution node.
#[derive(Debug, Default)]
pub struct XaslNode {
    pub proc_type: ProcType,
    pub spec_list: Vec<AccessSpec>,
    /// Segment ids bound into the node's value list
    pub val_list: Vec<usize>,
    /// Output name list of a build-list node (segment ids, in order)
    pub namelist: Vec<usize>,

    pub if_pred: PredList,
    pub after_join_pred: PredList,
    pub instnum_pred: PredList,
    /// Failed instnum rows do not terminate the scan
    pub instnum_continue: bool,
    pub ordbynum_pred: Option<ExprId>,
    pub ordbynum_continue: bool,
    /// Register holding the running orderby_num value
    pub ordbynum_val: Option<usize>,

    pub orderby_list: Vec<SortColumn>,
    /// Upper bound for sort-limit materialization
    pub orderby_limit: Option<LimitExpr>,
    pub skip_orderby_list: bool,

    /// Next nested scan of the enclosing join chain
    pub scan_ptr: Option<XaslId>,
    /// Uncorrelated sub-plans, evaluated before this node
    pub aptr_list: Vec<XaslId>,
    /// Correlated subqueries, re-evaluated per produced row
    pub dptr_list: Vec<XaslId>,

    pub projected_size: u64,
    pub cardinality: u64,
}

/// Owning store for every execution node of one statement.
#[derive(Debug, Default)]
pub struct XaslArena {
    nodes: Vec<XaslNode>,
}

impl XaslArena {
    pub fn new() -> Self {
        XaslArena::default()
    }

    pub fn push(&mut self, node: XaslNode) -> XaslId {
        let id = XaslId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: XaslId) -> &XaslNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: XaslId) -> &mut XaslNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append `scan` (itself possibly heading a chain) to the tail of
    /// `xasl`'s scan-ptr chain.
    pub fn append_scan(&mut self, xasl: XaslId, scan: Option<XaslId>) {
        let Some(scan) = scan else { return };
        let mut tail = xasl;
        while let Some(next) = self.get(tail).scan_ptr {
            tail = next;
        }
        self.get_mut(tail).scan_ptr = Some(scan);
    }

    /// Walk the scan-ptr chain to its last node.
    pub fn last_scan(&self, xasl: XaslId) -> XaslId {
        let mut cur = xasl;
        while let Some(next) = self.get(cur).scan_ptr {
            cur = next;
        }
        cur
    }

    /// Add `sub` to `xasl`'s uncorrelated sub-plan list. A node never
    /// lists itself, and duplicates are dropped.
    pub fn add_uncorrelated(&mut self, xasl: XaslId, sub: XaslId) {
        if sub == xasl {
            return;
        }
        let node = self.get_mut(xasl);
        if !node.aptr_list.contains(&sub) {
            node.aptr_list.push(sub);
        }
    }

    /// Add `sub` to `xasl`'s correlated subquery list, with the same
    /// self/duplicate rules as `add_uncorrelated`.
    pub fn add_correlated(&mut self, xasl: XaslId, sub: XaslId) {
        if sub == xasl {
            return;
        }
        let node = self.get_mut(xasl);
        if !node.dptr_list.contains(&sub) {
            node.dptr_list.push(sub);
        }
    }

    /// Install every subquery of `set` on `xasl`: uncorrelated fragments
    /// go to the aptr chain, correlated ones to the dptr chain.
    /// Fragments without a compiled execution node are skipped.
    pub fn add_subqueries(&mut self, env: &PlanEnv, xasl: XaslId, set: &BitSet) {
        for i in set.iter() {
            let subq = env.subquery(i);
            let Some(sub_xasl) = subq.exec_node else {
                continue;
            };
            if subq.is_uncorrelated() {
                self.add_uncorrelated(xasl, sub_xasl);
            } else {
                self.add_correlated(xasl, sub_xasl);
            }
        }
    }

    /// Flag every access spec of `xasl` as outer-join fetch.
    pub fn mark_access_fetch_outer(&mut self, xasl: XaslId) {
        for spec in &mut self.get_mut(xasl).spec_list {
            spec.fetch_type = FetchType::Outer;
        }
    }

    /// Count how many times each subquery execution node appears on an
    /// aptr or dptr chain anywhere in the graph. Used to check the
    /// single-placement invariant.
    pub fn subquery_placements(&self, sub: XaslId) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                n.aptr_list.iter().filter(|id| **id == sub).count()
                    + n.dptr_list.iter().filter(|id| **id == sub).count()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_chain_append() {
        let mut arena = XaslArena::new();
        let a = arena.push(XaslNode::default());
        let b = arena.push(XaslNode::default());
        let c = arena.push(XaslNode::default());

        arena.append_scan(a, Some(b));
        arena.append_scan(a, Some(c));

        assert_eq!(arena.get(a).scan_ptr, Some(b));
        assert_eq!(arena.get(b).scan_ptr, Some(c));
        assert_eq!(arena.last_scan(a), c);
    }

    #[test]
    fn test_uncorrelated_no_self_no_dup() {
        let mut arena = XaslArena::new();
        let a = arena.push(XaslNode::default());
        let b = arena.push(XaslNode::default());

        arena.add_uncorrelated(a, a);
        assert!(arena.get(a).aptr_list.is_empty());

        arena.add_uncorrelated(a, b);
        arena.add_uncorrelated(a, b);
        assert_eq!(arena.get(a).aptr_list, vec![b]);
    }

    #[test]
    fn test_mark_fetch_outer() {
        let mut arena = XaslArena::new();
        let mut node = XaslNode::default();
        node.spec_list.push(AccessSpec {
            entity: None,
            access: AccessMethod::Heap,
            key_pred: Vec::new(),
            pred: Vec::new(),
            fetch_type: FetchType::Inner,
        });
        let id = arena.push(node);

        arena.mark_access_fetch_outer(id);
        assert_eq!(arena.get(id).spec_list[0].fetch_type, FetchType::Outer);
    }
}
