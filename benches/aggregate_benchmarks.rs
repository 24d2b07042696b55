//! Aggregation engine benchmarks: accumulator hot loop and DISTINCT
//! spill.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quarrydb::aggregate::{
    evaluate_aggregate_list, finalize_aggregate_list, initialize_aggregate_list,
    AggregateFunction, AggregateSpec,
};
use quarrydb::regu::{ReguVar, ValueDescriptor};
use quarrydb::session::SessionContext;
use quarrydb::value::DbValue;

fn run(session: &SessionContext, aggs: &mut [AggregateSpec], rows: usize) {
    initialize_aggregate_list(session, aggs).unwrap();
    let mut vd = ValueDescriptor::new(vec![DbValue::Null]);
    for i in 0..rows {
        vd.set(0, DbValue::Int((i % 1000) as i32));
        evaluate_aggregate_list(session, aggs, &vd).unwrap();
    }
    finalize_aggregate_list(session, aggs, Some(&vd), false).unwrap();
}

fn bench_accumulator_loop(c: &mut Criterion) {
    let session = SessionContext::default();
    let mut group = c.benchmark_group("accumulator_loop");

    for rows in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("sum_avg_minmax", rows), &rows, |b, rows| {
            b.iter(|| {
                let mut aggs = vec![
                    AggregateSpec::new(AggregateFunction::Sum, ReguVar::Position(0)),
                    AggregateSpec::new(AggregateFunction::Avg, ReguVar::Position(0)),
                    AggregateSpec::new(AggregateFunction::Min, ReguVar::Position(0)),
                    AggregateSpec::new(AggregateFunction::Max, ReguVar::Position(0)),
                ];
                run(&session, &mut aggs, *rows);
                black_box(&aggs[0].accumulator.value);
            });
        });

        group.bench_with_input(BenchmarkId::new("variance", rows), &rows, |b, rows| {
            b.iter(|| {
                let mut aggs = vec![
                    AggregateSpec::new(AggregateFunction::VarPop, ReguVar::Position(0)),
                    AggregateSpec::new(AggregateFunction::StddevSamp, ReguVar::Position(0)),
                ];
                run(&session, &mut aggs, *rows);
                black_box(&aggs[0].accumulator.value);
            });
        });
    }
    group.finish();
}

fn bench_distinct_spill(c: &mut Criterion) {
    let session = SessionContext::default();
    let mut group = c.benchmark_group("distinct_spill");
    group.sample_size(20);

    for rows in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("count_distinct", rows), &rows, |b, rows| {
            b.iter(|| {
                let mut aggs = vec![
                    AggregateSpec::new(AggregateFunction::Count, ReguVar::Position(0)).distinct(),
                ];
                run(&session, &mut aggs, *rows);
                black_box(&aggs[0].accumulator.value);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_accumulator_loop, bench_distinct_spill);
criterion_main!(benches);
