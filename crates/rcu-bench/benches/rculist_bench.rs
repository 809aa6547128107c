//! RCU list traversal and mutation benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rcu_core::rculist::RcuList;

fn bench_traverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");

    for &len in &[16usize, 256, 4096] {
        let list = RcuList::new();
        {
            let mut w = list.write();
            for i in 0..len {
                w.push_back(i);
            }
        }
        group.bench_with_input(BenchmarkId::new("elements", len), &len, |b, _| {
            b.iter(|| {
                let r = list.read();
                let sum: usize = r.begin().sum();
                criterion::black_box(sum);
            });
        });
    }
    group.finish();
}

fn bench_push_and_erase(c: &mut Criterion) {
    c.bench_function("push_back_then_erase", |b| {
        b.iter(|| {
            let list = RcuList::new();
            let entry = {
                let mut w = list.write();
                w.push_back(1usize);
                let r = list.read();
                r.find(|&v| v == 1).and_then(|it| it.entry()).unwrap()
            };
            let mut w = list.write();
            w.erase(entry);
        });
    });
}

criterion_group!(benches, bench_traverse, bench_push_and_erase);
criterion_main!(benches);
