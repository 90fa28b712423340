use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use piol::helpers::random_metadata;
use piol::sort::order::offset_order;
use piol::{Rule, SelfComm, SortType};

fn sort_local(c: &mut Criterion) {
    let rule = Arc::new(Rule::default_rule());
    let prm = random_metadata(&rule, 100_000, 0, 42);
    c.bench_function("sort_local_100k", |b| {
        b.iter(|| {
            let comm = SelfComm::new();
            let mut shard = prm.clone();
            piol::sort(&comm, &mut shard, SortType::SrcRcv).unwrap()
        })
    });
}

fn permutation_plumbing(c: &mut Criterion) {
    let perm: Vec<u64> = (0..100_000u64).rev().collect();
    c.bench_function("offset_order_100k", |b| b.iter(|| offset_order(&perm)));
}

criterion_group!(benches, sort_local, permutation_plumbing);
criterion_main!(benches);
