//! Benchmarks the shared-variable bag's `inc`/`get` path under contention,
//! the write path most scripts hit on every routed call.

use criterion::{criterion_group, criterion_main, Criterion};
use pbx_shared::prelude::SharedVarsStore;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn single_threaded_inc(c: &mut Criterion) {
    let store = SharedVarsStore::new();
    c.bench_function("shared_vars/inc_single_threaded", |b| {
        b.iter(|| {
            black_box(store.inc("", "counter", 0));
        });
    });
}

fn contended_inc(c: &mut Criterion) {
    c.bench_function("shared_vars/inc_four_threads", |b| {
        b.iter(|| {
            let store = Arc::new(SharedVarsStore::new());
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            black_box(store.inc("", "counter", 0));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

fn get_after_many_writes(c: &mut Criterion) {
    let store = SharedVarsStore::new();
    for i in 0..1000 {
        store.set("", &format!("key{i}"), i.to_string());
    }
    c.bench_function("shared_vars/get_among_many_keys", |b| {
        b.iter(|| black_box(store.get("", "key500")));
    });
}

criterion_group!(benches, single_threaded_inc, contended_inc, get_after_many_writes);
criterion_main!(benches);
