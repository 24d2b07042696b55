//! List-file and tuple copy-out round trips.

use quarrydb::listfile::{ListFile, SortKey};
use quarrydb::tuple::{
    copy_values_to_tuple, read_tuple, single_tuple_from_list, tuple_value_size, value_type_list,
    ValueRef, TUPLE_LENGTH_SIZE,
};
use quarrydb::value::{Collation, DbValue, Domain};

#[test]
fn test_copy_out_then_list_scan_roundtrip() {
    // Serialize rows through the tuple path, park them in a list file,
    // and read them back.
    let rows = vec![
        vec![DbValue::Int(1), DbValue::string("one"), DbValue::Null],
        vec![DbValue::Int(2), DbValue::string("two"), DbValue::Double(2.0)],
    ];

    let mut type_list = {
        let refs: Vec<ValueRef> = rows[0].iter().map(ValueRef::visible).collect();
        value_type_list(&refs)
    };

    let mut list = ListFile::open(
        vec![Domain::variable(), Domain::variable(), Domain::variable()],
        false,
        None,
    )
    .unwrap();

    let mut buf = Vec::new();
    for row in &rows {
        let refs: Vec<ValueRef> = row.iter().map(ValueRef::visible).collect();
        let total = copy_values_to_tuple(&mut type_list, &refs, &mut buf).unwrap();
        assert!(total >= TUPLE_LENGTH_SIZE);
        let decoded = read_tuple(&buf).unwrap();
        list.add_row(decoded).unwrap();
    }
    list.close().unwrap();

    let mut scan = list.scan().unwrap();
    let first = scan.next_row().unwrap().unwrap();
    assert_eq!(first[0], DbValue::Int(1));
    assert_eq!(first[1], DbValue::string("one"));
    assert!(first[2].is_null());
    let second = scan.next_row().unwrap().unwrap();
    assert_eq!(second[2], DbValue::Double(2.0));
    assert!(scan.next_row().unwrap().is_none());
}

#[test]
fn test_spill_rereads_same_multiset() {
    let mut list = ListFile::open_single(false, None).unwrap();
    let values = [5, 1, 5, 3, 1, 5];
    for v in values {
        list.add_value(DbValue::Int(v)).unwrap();
    }
    list.close().unwrap();

    let mut seen = Vec::new();
    let mut scan = list.scan().unwrap();
    while let Some(row) = scan.next_row().unwrap() {
        if let DbValue::Int(i) = row[0] {
            seen.push(i);
        }
    }
    let mut expected = values.to_vec();
    let mut got = seen.clone();
    expected.sort_unstable();
    got.sort_unstable();
    assert_eq!(got, expected);
}

#[test]
fn test_distinct_sort_yields_set() {
    let mut list = ListFile::open_single(true, None).unwrap();
    for v in [5, 1, 5, 3, 1, 5] {
        list.add_value(DbValue::Int(v)).unwrap();
    }
    list.sort(None, true).unwrap();

    let mut scan = list.scan().unwrap();
    let mut got = Vec::new();
    while let Some(row) = scan.next_row().unwrap() {
        got.push(row[0].clone());
    }
    assert_eq!(got, vec![DbValue::Int(1), DbValue::Int(3), DbValue::Int(5)]);
}

#[test]
fn test_sort_limit_materializes_at_most_n_rows() {
    for limit in [0usize, 1, 3, 10] {
        let mut list = ListFile::open(
            vec![Domain::variable(), Domain::variable()],
            false,
            None,
        )
        .unwrap();
        for v in [8, 6, 7, 5, 3, 0, 9] {
            list.add_row(vec![DbValue::Int(v), DbValue::Int(100 - v)]).unwrap();
        }
        list.sort_with_limit(&[SortKey::asc(0)], limit).unwrap();
        assert!(list.tuple_count() <= limit);

        // The survivors are the smallest keys in order.
        let mut scan = list.scan().unwrap();
        let mut prev: Option<i32> = None;
        while let Some(row) = scan.next_row().unwrap() {
            if let DbValue::Int(v) = row[0] {
                if let Some(p) = prev {
                    assert!(p <= v);
                }
                prev = Some(v);
            }
        }
    }
}

#[test]
fn test_tuple_value_sizes_align() {
    let values = [
        DbValue::Null,
        DbValue::Int(1),
        DbValue::Varchar("abcdefgh".into(), Collation::Utf8Bin),
    ];
    for v in &values {
        let size = tuple_value_size(v).unwrap();
        assert_eq!(size % 8, 0, "unaligned size for {v:?}");
    }
}

#[test]
fn test_single_tuple_fetch_after_sort() {
    let mut list = ListFile::open_single(true, None).unwrap();
    for v in [4, 4, 4] {
        list.add_value(DbValue::Int(v)).unwrap();
    }
    list.sort(None, true).unwrap();

    let mut out = vec![DbValue::Null];
    single_tuple_from_list(&mut list, &mut out).unwrap();
    assert_eq!(out[0], DbValue::Int(4));
}
