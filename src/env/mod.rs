//! # Planner Environment
//!
//! Read-only view of the planner's output: the term catalog, segments,
//! from-clause nodes, and subqueries, all addressed by dense ids. The
//! translator consumes this environment together with the plan tree; the
//! only mutation it ever performs is moving term ids between a scan
//! plan's key-filter and sarged sets.

use crate::bitset::BitSet;
use crate::expr::ExprId;
use crate::xasl::XaslId;

/// Classification of a predicate term, assigned by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermClass {
    /// Index-usable single-node predicate
    Sargable,
    /// Must run after the join completes (outer-join NULL preservation)
    AfterJoin,
    /// Must run at the outermost driver (`rownum` and friends)
    TotallyAfterJoin,
    /// Evaluated while the join is in flight
    DuringJoin,
    /// Anything the planner could not classify further
    Other,
    /// Synthetic term fabricated by the planner; never appears in any
    /// predicate list
    Fake,
}

/// One normalized predicate fragment.
#[derive(Debug, Clone)]
pub struct Term {
    /// Source expression; `None` only for fabricated terms
    pub expr: Option<ExprId>,
    /// Segments (table columns) this term touches
    pub segments: BitSet,
    /// From-clause nodes this term mentions
    pub nodes: BitSet,
    pub class: TermClass,
    pub selectivity: f64,
    pub rank: i32,
    /// How many leading entries of `index_segs` are usable
    pub can_use_index: usize,
    /// Candidate index segments, in preference order
    pub index_segs: Vec<usize>,
    /// Subqueries contained in this term's expression
    pub subqueries: BitSet,
}

impl Term {
    /// A plain sargable term over one expression, with neutral costs.
    pub fn sargable(expr: ExprId) -> Self {
        Term {
            expr: Some(expr),
            segments: BitSet::new(),
            nodes: BitSet::new(),
            class: TermClass::Sargable,
            selectivity: 0.5,
            rank: 0,
            can_use_index: 0,
            index_segs: Vec::new(),
            subqueries: BitSet::new(),
        }
    }

    pub fn is_fake(&self) -> bool {
        self.class == TermClass::Fake
    }
}

/// A (node, column) pair with the source column name.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Column name as written in the source
    pub name: String,
    /// Owning from-clause node
    pub head_node: usize,
}

/// Physical identity of a from-clause entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub class_id: u32,
    pub heap_id: u32,
    pub name: String,
}

/// A from-clause entity: table, subquery, or derived list.
#[derive(Debug, Clone)]
pub struct EnvNode {
    pub entity: EntitySpec,
    /// Segments owned by this node
    pub segments: BitSet,
}

/// An independently executable query fragment.
#[derive(Debug, Clone)]
pub struct Subquery {
    /// Terms this subquery belongs to
    pub terms: BitSet,
    /// Nodes this subquery references; empty = uncorrelated
    pub nodes: BitSet,
    /// Pre-compiled execution node for the fragment, if any
    pub exec_node: Option<XaslId>,
}

impl Subquery {
    pub fn is_uncorrelated(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The planner's output catalog. Id spaces are dense, assigned at
/// plan-build time, and never reshuffled.
#[derive(Debug, Default)]
pub struct PlanEnv {
    pub terms: Vec<Term>,
    pub segments: Vec<Segment>,
    pub nodes: Vec<EnvNode>,
    pub subqueries: Vec<Subquery>,
}

impl PlanEnv {
    pub fn new() -> Self {
        PlanEnv::default()
    }

    pub fn term(&self, i: usize) -> &Term {
        &self.terms[i]
    }

    pub fn segment(&self, i: usize) -> &Segment {
        &self.segments[i]
    }

    pub fn node(&self, i: usize) -> &EnvNode {
        &self.nodes[i]
    }

    pub fn subquery(&self, i: usize) -> &Subquery {
        &self.subqueries[i]
    }

    pub fn add_term(&mut self, term: Term) -> usize {
        self.terms.push(term);
        self.terms.len() - 1
    }

    pub fn add_segment(&mut self, segment: Segment) -> usize {
        self.segments.push(segment);
        self.segments.len() - 1
    }

    pub fn add_node(&mut self, node: EnvNode) -> usize {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn add_subquery(&mut self, subquery: Subquery) -> usize {
        self.subqueries.push(subquery);
        self.subqueries.len() - 1
    }
}

/// Eligibility filter signature used by the predicate factory.
pub type EligibilityFn = fn(&Term) -> bool;

/// Index-usable term with no subqueries: safe as an access predicate.
pub fn is_normal_access_term(term: &Term) -> bool {
    if !term.subqueries.is_empty() {
        return false;
    }
    !matches!(
        term.class,
        TermClass::Other | TermClass::AfterJoin | TermClass::TotallyAfterJoin
    )
}

/// Terms that must go to the if-predicate slot: unclassified terms and
/// anything carrying a subquery.
pub fn is_normal_if_term(term: &Term) -> bool {
    if !term.subqueries.is_empty() {
        return true;
    }
    term.class == TermClass::Other
}

pub fn is_after_join_term(term: &Term) -> bool {
    term.subqueries.is_empty() && term.class == TermClass::AfterJoin
}

pub fn is_totally_after_join_term(term: &Term) -> bool {
    term.subqueries.is_empty() && term.class == TermClass::TotallyAfterJoin
}

/// Key-filter lists take every non-fake term handed to them.
pub fn is_always_true(_term: &Term) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprArena;
    use crate::value::DbValue;

    fn term_with_class(class: TermClass) -> Term {
        let mut arena = ExprArena::new();
        let e = arena.constant(DbValue::Int(1));
        let mut t = Term::sargable(e);
        t.class = class;
        t
    }

    #[test]
    fn test_normal_access_classification() {
        assert!(is_normal_access_term(&term_with_class(TermClass::Sargable)));
        assert!(is_normal_access_term(&term_with_class(TermClass::DuringJoin)));
        assert!(!is_normal_access_term(&term_with_class(TermClass::Other)));
        assert!(!is_normal_access_term(&term_with_class(TermClass::AfterJoin)));
        assert!(!is_normal_access_term(&term_with_class(
            TermClass::TotallyAfterJoin
        )));
    }

    #[test]
    fn test_subquery_forces_if_slot() {
        let mut t = term_with_class(TermClass::Sargable);
        t.subqueries.add(0);

        assert!(!is_normal_access_term(&t));
        assert!(is_normal_if_term(&t));
        assert!(!is_after_join_term(&t));
        assert!(!is_totally_after_join_term(&t));
    }

    #[test]
    fn test_after_join_classification() {
        assert!(is_after_join_term(&term_with_class(TermClass::AfterJoin)));
        assert!(is_totally_after_join_term(&term_with_class(
            TermClass::TotallyAfterJoin
        )));
        assert!(is_normal_if_term(&term_with_class(TermClass::Other)));
    }
}
