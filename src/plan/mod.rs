//! # Optimizer Plan Tree
//!
//! The cost-based planner (an external collaborator) hands the translator
//! a plan tree over `{SCAN, JOIN, SORT, WORST}` plus the select context
//! it was compiled from. The translator reads the tree mostly as-is; the
//! single exception is that it may move term ids between a scan plan's
//! key-filter and sarged sets while routing join predicates.

use crate::bitset::BitSet;
use crate::expr::ExprId;

/// Join variants carried by a join plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Correlated-select pseudo join
    Cselect,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Right | JoinType::Full)
    }
}

/// Physical join strategy chosen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    NestedLoop,
    Index,
    Merge,
}

/// What a sort plan materializes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortType {
    OrderBy,
    GroupBy,
    Distinct,
    Temp,
    /// Top-N materialization under `ORDER BY … FOR orderby_num ≤ n`
    Limit,
}

/// Multi-range optimization verdict, cached on the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiRangeOpt {
    #[default]
    Undecided,
    Use,
    CannotUse,
}

/// Constraint backing an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    PrimaryKey,
    Unique,
    Index,
}

/// One candidate index of a scan node, as chosen by the planner.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: String,
    /// Segment id at each index position; `None` for unmapped positions
    pub seg_idxs: Vec<Option<usize>>,
    /// Per-position descending flag, parallel to `seg_idxs`
    pub asc_desc: Vec<bool>,
    pub constraint: ConstraintType,
    /// The index holds every segment the query projects from its node
    pub cover_segments: bool,
    /// First index position occupied by an order-by column, once the
    /// multi-range analyzer has established it
    pub first_sort_column: Option<usize>,
    /// Read the index in reverse to satisfy the order-by
    pub use_descending: bool,
    /// The planner proved group-by can be taken from this index order
    pub groupby_skip: bool,
    /// The planner proved order-by can be taken from this index order
    pub orderby_skip: bool,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, seg_idxs: Vec<Option<usize>>) -> Self {
        let nsegs = seg_idxs.len();
        IndexEntry {
            name: name.into(),
            seg_idxs,
            asc_desc: vec![false; nsegs],
            constraint: ConstraintType::Index,
            cover_segments: false,
            first_sort_column: None,
            use_descending: false,
            groupby_skip: false,
            orderby_skip: false,
        }
    }

    pub fn nsegs(&self) -> usize {
        self.seg_idxs.len()
    }

    /// Index position holding `seg_idx`, if any.
    pub fn position_of_segment(&self, seg_idx: usize) -> Option<usize> {
        self.seg_idxs
            .iter()
            .position(|s| *s == Some(seg_idx))
    }

    /// All mapped segment ids as a set.
    pub fn segment_set(&self) -> BitSet {
        self.seg_idxs.iter().flatten().copied().collect()
    }
}

/// Scan payload.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// From-clause node being scanned
    pub node: usize,
    /// Chosen index; `None` for a heap scan
    pub index: Option<IndexEntry>,
    /// Key-range terms
    pub terms: BitSet,
    /// Key-filter terms
    pub kf_terms: BitSet,
    /// The chosen index covers the projected segments
    pub index_cover: bool,
    /// Index scan induced by GROUP BY rather than the predicate set
    pub iscan_from_groupby: bool,
    /// Index scan induced by ORDER BY rather than the predicate set
    pub iscan_from_orderby: bool,
}

/// Join payload.
#[derive(Debug)]
pub struct JoinPlan {
    pub join_type: JoinType,
    pub join_method: JoinMethod,
    pub outer: Box<Plan>,
    pub inner: Box<Plan>,
    /// Join-edge terms; may be empty for a cartesian product or when the
    /// edge was folded into the inner index scan
    pub join_terms: BitSet,
    pub during_join_terms: BitSet,
    pub after_join_terms: BitSet,
}

/// Sort payload.
#[derive(Debug)]
pub struct SortPlan {
    pub sort_type: SortType,
    pub subplan: Box<Plan>,
}

/// Plan variants.
#[derive(Debug)]
pub enum PlanKind {
    Scan(ScanPlan),
    Join(JoinPlan),
    Sort(SortPlan),
    /// Planner failure sentinel; translation rejects it
    Worst,
}

/// Cost summary the planner attaches to every plan node.
#[derive(Debug, Clone, Default)]
pub struct PlanInfo {
    pub cost: f64,
    pub cardinality: u64,
    pub projected_size: u64,
    /// Segments this plan projects; drives temp-listfile name lists
    pub projected_segs: BitSet,
}

/// One node of the optimizer plan tree.
#[derive(Debug)]
pub struct Plan {
    pub kind: PlanKind,
    /// Terms to be applied as post-access filters at this node
    pub sarged_terms: BitSet,
    /// Subqueries anchored at this node
    pub subqueries: BitSet,
    /// This node sits above every join of the statement
    pub top_rooted: bool,
    pub multi_range_opt: MultiRangeOpt,
    /// Read the chosen index in reverse
    pub use_iscan_descending: bool,
    pub info: PlanInfo,
}

impl Plan {
    pub fn new(kind: PlanKind) -> Self {
        Plan {
            kind,
            sarged_terms: BitSet::new(),
            subqueries: BitSet::new(),
            top_rooted: false,
            multi_range_opt: MultiRangeOpt::Undecided,
            use_iscan_descending: false,
            info: PlanInfo::default(),
        }
    }

    pub fn scan(scan: ScanPlan) -> Self {
        Plan::new(PlanKind::Scan(scan))
    }

    pub fn join(join: JoinPlan) -> Self {
        Plan::new(PlanKind::Join(join))
    }

    pub fn sort(sort_type: SortType, subplan: Plan) -> Self {
        Plan::new(PlanKind::Sort(SortPlan {
            sort_type,
            subplan: Box::new(subplan),
        }))
    }

    pub fn as_scan(&self) -> Option<&ScanPlan> {
        match &self.kind {
            PlanKind::Scan(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_scan_mut(&mut self) -> Option<&mut ScanPlan> {
        match &mut self.kind {
            PlanKind::Scan(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_join(&self) -> Option<&JoinPlan> {
        match &self.kind {
            PlanKind::Join(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_sort(&self) -> Option<&SortPlan> {
        match &self.kind {
            PlanKind::Sort(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_scan(&self) -> bool {
        matches!(self.kind, PlanKind::Scan(_))
    }

    /// Index scan (a scan with a chosen index).
    pub fn is_iscan(&self) -> bool {
        matches!(&self.kind, PlanKind::Scan(s) if s.index.is_some())
    }

    /// Index scan whose key order is meaningful to the result: the
    /// gateway probe for covering/descending/multi-range properties.
    pub fn is_interesting_order_scan(&self) -> bool {
        self.is_iscan()
    }

    /// Covering-index scan: every projected segment is in the index.
    pub fn is_index_covering_scan(&self) -> bool {
        if !self.is_interesting_order_scan() {
            return false;
        }
        match &self.kind {
            PlanKind::Scan(s) => {
                s.index_cover
                    && s.index.as_ref().is_some_and(|ix| ix.cover_segments)
            }
            _ => false,
        }
    }

    /// Multi-range-optimized index scan.
    pub fn is_index_mro_scan(&self) -> bool {
        self.is_interesting_order_scan() && self.multi_range_opt == MultiRangeOpt::Use
    }

    /// Whether this plan (scan or join) adopted multi-range optimization.
    pub fn uses_multi_range_opt(&self) -> bool {
        self.multi_range_opt == MultiRangeOpt::Use
    }

    /// Descending index scan.
    pub fn is_index_desc_scan(&self) -> bool {
        if !self.is_interesting_order_scan() {
            return false;
        }
        self.use_iscan_descending
    }

    /// True when the plan carries no explicit ORDER BY sort node, i.e.
    /// any required order comes from the chosen index.
    pub fn skip_orderby(&self) -> bool {
        !matches!(
            &self.kind,
            PlanKind::Sort(s)
                if matches!(s.sort_type, SortType::Distinct | SortType::OrderBy)
        )
    }

    /// True when GROUP BY can be taken from the chosen index order.
    pub fn skip_groupby(&self) -> bool {
        matches!(
            &self.kind,
            PlanKind::Scan(s)
                if s.index.as_ref().is_some_and(|ix| ix.groupby_skip)
        )
    }
}

/// Positional order-by specification (1-based select-list position).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBySpec {
    pub pos_no: usize,
    pub descending: bool,
}

/// One select-list item as the translator sees it.
#[derive(Debug, Clone)]
pub struct SelectItem {
    /// Column name when the item is a plain name node
    pub name: Option<String>,
    /// Hidden columns are carried for sorting but never copied out
    pub hidden: bool,
}

impl SelectItem {
    pub fn name(n: impl Into<String>) -> Self {
        SelectItem {
            name: Some(n.into()),
            hidden: false,
        }
    }

    pub fn expression() -> Self {
        SelectItem {
            name: None,
            hidden: false,
        }
    }
}

/// Optimizer hints relevant to translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryHints {
    pub no_multi_range_opt: bool,
}

/// Surrogate for the parser tree: the few SELECT fields the translator
/// reads.
#[derive(Debug, Default)]
pub struct SelectContext {
    pub select_list: Vec<SelectItem>,
    pub order_by: Vec<OrderBySpec>,
    /// `ORDER BY … FOR orderby_num op bound` predicate
    pub orderby_for: Option<ExprId>,
    pub hints: QueryHints,
    /// SELECT DISTINCT
    pub all_distinct: bool,
    /// Register holding the running orderby_num value, when bound
    pub ordbynum_val: Option<usize>,
    /// Subqueries referenced by select-list expressions
    pub select_subqueries: BitSet,
}

impl SelectContext {
    /// Name of the select item at 1-based position `pos_no`.
    pub fn select_name_at(&self, pos_no: usize) -> Option<&str> {
        if pos_no == 0 {
            return None;
        }
        self.select_list
            .get(pos_no - 1)
            .and_then(|item| item.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iscan(index: IndexEntry) -> Plan {
        Plan::scan(ScanPlan {
            node: 0,
            index: Some(index),
            terms: BitSet::new(),
            kf_terms: BitSet::new(),
            index_cover: false,
            iscan_from_groupby: false,
            iscan_from_orderby: false,
        })
    }

    #[test]
    fn test_outer_join_types() {
        assert!(JoinType::Left.is_outer());
        assert!(JoinType::Full.is_outer());
        assert!(!JoinType::Inner.is_outer());
        assert!(!JoinType::Cselect.is_outer());
    }

    #[test]
    fn test_index_position_lookup() {
        let ix = IndexEntry::new("ix_abc", vec![Some(3), None, Some(5)]);
        assert_eq!(ix.position_of_segment(3), Some(0));
        assert_eq!(ix.position_of_segment(5), Some(2));
        assert_eq!(ix.position_of_segment(4), None);
        assert_eq!(ix.segment_set().iter().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn test_capability_probes() {
        let mut ix = IndexEntry::new("ix", vec![Some(0)]);
        ix.cover_segments = true;
        let mut plan = iscan(ix);
        assert!(plan.is_iscan());
        assert!(!plan.is_index_covering_scan());

        if let PlanKind::Scan(s) = &mut plan.kind {
            s.index_cover = true;
        }
        assert!(plan.is_index_covering_scan());

        plan.multi_range_opt = MultiRangeOpt::Use;
        assert!(plan.is_index_mro_scan());
    }

    #[test]
    fn test_skip_orderby() {
        let scan = iscan(IndexEntry::new("ix", vec![Some(0)]));
        assert!(scan.skip_orderby());

        let sort = Plan::sort(SortType::OrderBy, iscan(IndexEntry::new("ix", vec![Some(0)])));
        assert!(!sort.skip_orderby());

        let temp = Plan::sort(SortType::Temp, iscan(IndexEntry::new("ix", vec![Some(0)])));
        assert!(temp.skip_orderby());
    }

    #[test]
    fn test_select_name_at() {
        let ctx = SelectContext {
            select_list: vec![SelectItem::name("a"), SelectItem::expression()],
            ..SelectContext::default()
        };
        assert_eq!(ctx.select_name_at(1), Some("a"));
        assert_eq!(ctx.select_name_at(2), None);
        assert_eq!(ctx.select_name_at(0), None);
        assert_eq!(ctx.select_name_at(3), None);
    }
}
