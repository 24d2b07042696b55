//! Translator integration tests: predicate routing, join handling,
//! sort materialization, and key-limit annotation over hand-built plans.

use quarrydb::bitset::BitSet;
use quarrydb::env::{EntitySpec, EnvNode, PlanEnv, Segment, Subquery, Term, TermClass};
use quarrydb::expr::{CompOp, Expr, ExprArena};
use quarrydb::plan::{
    ConstraintType, IndexEntry, JoinMethod, JoinPlan, JoinType, Plan, PlanKind, ScanPlan,
    SelectContext, SelectItem, OrderBySpec, SortType,
};
use quarrydb::translate::Translator;
use quarrydb::value::DbValue;
use quarrydb::xasl::{AccessMethod, FetchType, XaslId, XaslNode};

/// Two-table environment: t(a, b, c) as node 0 and u(x, y) as node 1.
fn two_table_env() -> PlanEnv {
    let mut env = PlanEnv::new();
    let t = env.add_node(EnvNode {
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
            head_node: t,
        });
    }
    let u = env.add_node(EnvNode {
        entity: EntitySpec {
            class_id: 2,
            heap_id: 2,
            name: "u".into(),
        },
        segments: BitSet::from_ids([3, 4]),
    });
    for name in ["x", "y"] {
        env.add_segment(Segment {
            name: name.into(),
            head_node: u,
        });
    }
    env
}

fn heap_scan(node: usize) -> Plan {
    Plan::scan(ScanPlan {
        node,
        index: None,
        terms: BitSet::new(),
        kf_terms: BitSet::new(),
        index_cover: false,
        iscan_from_groupby: false,
        iscan_from_orderby: false,
    })
}

fn index_scan(node: usize, index: IndexEntry) -> Plan {
    Plan::scan(ScanPlan {
        node,
        index: Some(index),
        terms: BitSet::new(),
        kf_terms: BitSet::new(),
        index_cover: false,
        iscan_from_groupby: false,
        iscan_from_orderby: false,
    })
}

fn eq_term(arena: &mut ExprArena, seg: usize, value: i32) -> Term {
    let lhs = arena.segment(seg);
    let rhs = arena.constant(DbValue::Int(value));
    let cmp = arena.comparison(CompOp::Eq, lhs, rhs);
    let mut term = Term::sargable(cmp);
    term.segments.add(seg);
    term.can_use_index = 1;
    term.index_segs = vec![seg];
    term
}

#[test]
fn test_zero_term_scans_choose_access_method() {
    let env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    // Full-range PRIMARY KEY scan keeps the index access.
    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let mut plan = index_scan(0, pk);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut plan, root).unwrap();
    assert!(matches!(
        tr.xasls.get(xasl).spec_list[0].access,
        AccessMethod::Index(_)
    ));

    // A zero-term secondary index without group-by/order-by backing
    // degrades to a heap access.
    let mut exprs = ExprArena::new();
    let mut plan = index_scan(0, IndexEntry::new("ix_b", vec![Some(1)]));
    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut plan, root).unwrap();
    assert!(matches!(
        tr.xasls.get(xasl).spec_list[0].access,
        AccessMethod::Heap
    ));
}

#[test]
fn test_scan_term_sets_disjoint_after_translation() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let range = env.add_term(eq_term(&mut exprs, 0, 1));
    let kf = env.add_term(eq_term(&mut exprs, 1, 2));
    let sarged = env.add_term(eq_term(&mut exprs, 2, 3));

    let mut plan = index_scan(0, IndexEntry::new("ix_ab", vec![Some(0), Some(1)]));
    {
        let scan = plan.as_scan_mut().unwrap();
        scan.terms.add(range);
        // Overlapping placements the translator must repair.
        scan.kf_terms.add(range);
        scan.kf_terms.add(kf);
    }
    plan.sarged_terms.add(range);
    plan.sarged_terms.add(kf);
    plan.sarged_terms.add(sarged);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    tr.translate(&mut plan, root).unwrap();

    let scan = plan.as_scan().unwrap();
    assert!(scan.terms.is_disjoint(&scan.kf_terms));
    assert!(scan.terms.is_disjoint(&plan.sarged_terms));
    assert!(scan.kf_terms.is_disjoint(&plan.sarged_terms));
    assert!(scan.terms.contains(range));
    assert!(scan.kf_terms.contains(kf));
    assert!(plan.sarged_terms.contains(sarged));
}

#[test]
fn test_key_and_data_filters_routed_to_spec() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let range = env.add_term(eq_term(&mut exprs, 0, 1));
    let kf = env.add_term(eq_term(&mut exprs, 1, 2));
    let data = env.add_term(eq_term(&mut exprs, 2, 3));

    let mut plan = index_scan(0, IndexEntry::new("ix_ab", vec![Some(0), Some(1)]));
    {
        let scan = plan.as_scan_mut().unwrap();
        scan.terms.add(range);
        scan.kf_terms.add(kf);
    }
    plan.sarged_terms.add(data);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut plan, root).unwrap();

    let spec = &tr.xasls.get(xasl).spec_list[0];
    match &spec.access {
        AccessMethod::Index(ix) => {
            // The range term lands on its index position.
            assert_eq!(ix.key_term_exprs.len(), 2);
            assert!(ix.key_term_exprs[0].is_some());
            assert!(ix.key_term_exprs[1].is_none());
        }
        other => panic!("expected index access, got {other:?}"),
    }
    assert_eq!(spec.key_pred.len(), 1);
    assert_eq!(spec.pred.len(), 1);
    assert!(tr.xasls.get(xasl).if_pred.is_empty());
}

#[test]
fn test_nl_join_pushes_covered_term_to_inner_kf() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    // Join term over u.x, coverable by the inner covering index.
    let mut jt = eq_term(&mut exprs, 3, 0);
    jt.nodes.add(0);
    jt.nodes.add(1);
    let jt = env.add_term(jt);

    let mut inner_ix = IndexEntry::new("ix_ux", vec![Some(3)]);
    inner_ix.cover_segments = true;
    let mut inner = index_scan(1, inner_ix);
    if let PlanKind::Scan(s) = &mut inner.kind {
        s.index_cover = true;
    }

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let outer = index_scan(0, pk);

    let mut join = Plan::join(JoinPlan {
        join_type: JoinType::Inner,
        join_method: JoinMethod::NestedLoop,
        outer: Box::new(outer),
        inner: Box::new(inner),
        join_terms: BitSet::from_ids([jt]),
        during_join_terms: BitSet::new(),
        after_join_terms: BitSet::new(),
    });

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut join, root).unwrap();

    // The join term moved into the inner scan's key filter.
    let inner_plan = join.as_join().unwrap().inner.as_scan().unwrap();
    assert!(inner_plan.kf_terms.contains(jt));

    // The inner scan hangs off the outer driver's scan chain and
    // carries the pushed term as its key filter.
    let inner_scan = tr.xasls.get(xasl).scan_ptr.expect("inner scan chained");
    let inner_spec = &tr.xasls.get(inner_scan).spec_list[0];
    assert_eq!(inner_spec.key_pred.len(), 1);
    assert_eq!(inner_spec.fetch_type, FetchType::Inner);
}

#[test]
fn test_left_join_marks_inner_fetch_outer_and_routes_instnum() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    // rownum < 10 is totally-after-join: it must fire at the outermost
    // producer.
    let n = exprs.push(Expr::RowNum);
    let ten = exprs.constant(DbValue::Int(10));
    let cmp = exprs.comparison(CompOp::Lt, n, ten);
    let mut taj = Term::sargable(cmp);
    taj.class = TermClass::TotallyAfterJoin;
    let taj = env.add_term(taj);

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let outer = index_scan(0, pk);
    let inner = heap_scan(1);

    let mut join = Plan::join(JoinPlan {
        join_type: JoinType::Left,
        join_method: JoinMethod::NestedLoop,
        outer: Box::new(outer),
        inner: Box::new(inner),
        join_terms: BitSet::new(),
        during_join_terms: BitSet::new(),
        after_join_terms: BitSet::new(),
    });
    join.sarged_terms.add(taj);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut join, root).unwrap();

    // Outer-join inner scans produce NULL rows on miss.
    let inner_scan = tr.xasls.get(xasl).scan_ptr.expect("inner scan chained");
    assert_eq!(
        tr.xasls.get(inner_scan).spec_list[0].fetch_type,
        FetchType::Outer
    );

    // The rownum term surfaced as the outer driver's instnum predicate,
    // and an upper-bound-only predicate does not continue the scan.
    let root_node = tr.xasls.get(xasl);
    assert_eq!(root_node.instnum_pred.len(), 1);
    assert!(!root_node.instnum_continue);

    // The inner scan never sees the totally-after-join term.
    assert!(tr.xasls.get(inner_scan).instnum_pred.is_empty());
}

#[test]
fn test_fake_join_term_subqueries_attach_at_outer_driver() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let sub_xasl = XaslId(0);
    let sq = env.add_subquery(Subquery {
        terms: BitSet::new(),
        nodes: BitSet::new(),
        exec_node: Some(sub_xasl),
    });

    let mut fake = eq_term(&mut exprs, 0, 1);
    fake.class = TermClass::Fake;
    fake.subqueries.add(sq);
    let fake = env.add_term(fake);

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let outer = index_scan(0, pk);
    let inner = heap_scan(1);

    let mut join = Plan::join(JoinPlan {
        join_type: JoinType::Inner,
        join_method: JoinMethod::Index,
        outer: Box::new(outer),
        inner: Box::new(inner),
        join_terms: BitSet::from_ids([fake]),
        during_join_terms: BitSet::new(),
        after_join_terms: BitSet::new(),
    });
    join.subqueries.add(sq);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    assert_eq!(tr.xasls.push(XaslNode::default()), sub_xasl);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut join, root).unwrap();

    // The subquery hangs off the outer driver, not the inner scan, and
    // appears exactly once in the graph.
    assert!(tr.xasls.get(xasl).aptr_list.contains(&sub_xasl));
    let inner_scan = tr.xasls.get(xasl).scan_ptr.expect("inner scan chained");
    assert!(tr.xasls.get(inner_scan).aptr_list.is_empty());
    assert_eq!(tr.xasls.subquery_placements(sub_xasl), 1);
}

#[test]
fn test_inner_sort_materializes_into_listfile() {
    let mut env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let mut sorted = Plan::sort(SortType::Temp, index_scan(0, pk));
    sorted.info.projected_segs = BitSet::from_ids([0, 1]);

    let inner = heap_scan(1);

    let data = env.add_term(eq_term(&mut exprs, 2, 7));
    let mut join = Plan::join(JoinPlan {
        join_type: JoinType::Inner,
        join_method: JoinMethod::NestedLoop,
        outer: Box::new(sorted),
        inner: Box::new(inner),
        join_terms: BitSet::new(),
        during_join_terms: BitSet::new(),
        after_join_terms: BitSet::new(),
    });
    join.sarged_terms.add(data);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut join, root).unwrap();

    // The sort materialized into a build-list node scanned by the root:
    // the list file is an uncorrelated sub-plan, and the root's access
    // is a list scan.
    let node = tr.xasls.get(xasl);
    assert_eq!(node.aptr_list.len(), 1);
    let listfile = node.aptr_list[0];
    assert_eq!(
        tr.xasls.get(listfile).proc_type,
        quarrydb::xasl::ProcType::BuildList
    );
    assert!(matches!(
        node.spec_list[0].access,
        AccessMethod::List { list } if list == listfile
    ));
    assert!(node.scan_ptr.is_some());
}

#[test]
fn test_sort_limit_plan_derives_orderby_limit() {
    let env = two_table_env();
    let mut exprs = ExprArena::new();

    // ORDER BY a FOR orderby_num <= 5 over select list (a).
    let n = exprs.push(Expr::OrderByNum);
    let five = exprs.constant(DbValue::Int(5));
    let upper = exprs.comparison(CompOp::Le, n, five);
    let ctx = SelectContext {
        select_list: vec![SelectItem::name("a")],
        order_by: vec![OrderBySpec {
            pos_no: 1,
            descending: false,
        }],
        orderby_for: Some(upper),
        ..SelectContext::default()
    };

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let mut plan = Plan::sort(SortType::Limit, index_scan(0, pk));
    plan.info.projected_segs = BitSet::from_ids([0]);

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    tr.xasls.get_mut(root).ordbynum_val = Some(0);
    let xasl = tr.translate(&mut plan, root).unwrap();

    let node = tr.xasls.get(xasl);
    assert_eq!(node.aptr_list.len(), 1);
    let listfile = tr.xasls.get(node.aptr_list[0]);

    assert_eq!(listfile.orderby_list.len(), 1);
    assert_eq!(listfile.orderby_list[0].pos_no, 1);
    assert!(listfile.ordbynum_pred.is_some());
    assert_eq!(listfile.ordbynum_val, Some(0));
    let limit = listfile
        .orderby_limit
        .as_ref()
        .expect("orderby limit derived");
    assert_eq!(limit.evaluate(&[]).unwrap(), DbValue::Int(5));
}

#[test]
fn test_top_rooted_sort_limit_is_rejected() {
    let env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let mut plan = Plan::sort(SortType::Limit, index_scan(0, pk));
    plan.top_rooted = true;

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    assert!(tr.translate(&mut plan, root).is_err());
}

#[test]
fn test_top_rooted_orderby_sort_recurses_without_listfile() {
    let env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let mut pk = IndexEntry::new("pk_t", vec![Some(0)]);
    pk.constraint = ConstraintType::PrimaryKey;
    let mut plan = Plan::sort(SortType::OrderBy, index_scan(0, pk));
    plan.top_rooted = true;

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    let xasl = tr.translate(&mut plan, root).unwrap();

    // No materialization: the scan spec lands directly on the root.
    let node = tr.xasls.get(xasl);
    assert!(node.aptr_list.is_empty());
    assert!(matches!(node.spec_list[0].access, AccessMethod::Index(_)));
}

#[test]
fn test_merge_join_rejected() {
    let env = two_table_env();
    let mut exprs = ExprArena::new();
    let ctx = SelectContext::default();

    let mut join = Plan::join(JoinPlan {
        join_type: JoinType::Inner,
        join_method: JoinMethod::Merge,
        outer: Box::new(heap_scan(0)),
        inner: Box::new(heap_scan(1)),
        join_terms: BitSet::new(),
        during_join_terms: BitSet::new(),
        after_join_terms: BitSet::new(),
    });

    let mut tr = Translator::new(&env, &mut exprs, &ctx);
    let root = tr.make_scan_proc();
    assert!(tr.translate(&mut join, root).is_err());
}
