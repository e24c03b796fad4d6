//! Benchmarks for commit and propagation.
//!
//! Run with: cargo bench -p canopy-runtime

use canopy_runtime::{Container, Path};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;

// ============================================================================
// Fan-out: one root, many leaf readers
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out");

    for readers in [10usize, 100, 1000] {
        let cx = Container::new();
        let items: Vec<Value> = (0..readers).map(|i| json!(i)).collect();
        let root = cx.create_root(json!({ "items": items }));
        for i in 0..readers {
            let path = Path::root().join("items").join_index(i);
            cx.reaction(move |cx| {
                black_box(root.at(cx, &path)?.get(cx)?);
                Ok(())
            })
            .expect("reaction");
        }

        let mut tick = 0i64;
        group.bench_with_input(
            BenchmarkId::new("single_write", readers),
            &readers,
            |b, _| {
                b.iter(|| {
                    tick += 1;
                    cx.transaction(|cx| {
                        root.at(cx, &Path::root().join("items").join_index(0))?
                            .set(cx, json!(tick))
                    })
                    .expect("commit");
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Chain: computed feeding computed feeding a reaction
// ============================================================================

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain");

    for depth in [4usize, 16, 64] {
        let cx = Container::new();
        let root = cx.create_root(json!(0));
        let mut last = cx.computed(move |cx| root.get(cx)).expect("computed");
        for _ in 1..depth {
            let prev = last;
            last = cx
                .computed(move |cx| {
                    let n = prev.get(cx)?.as_i64().unwrap_or(0);
                    Ok(json!(n + 1))
                })
                .expect("computed");
        }
        let tail = last;
        cx.reaction(move |cx| {
            black_box(tail.get(cx)?);
            Ok(())
        })
        .expect("reaction");

        let mut tick = 0i64;
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, _| {
            b.iter(|| {
                tick += 1;
                cx.transaction(|cx| root.set(cx, json!(tick)))
                    .expect("commit");
            })
        });
    }

    group.finish();
}

// ============================================================================
// Rollback of a large array append
// ============================================================================

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction/rollback");

    for len in [100usize, 1000] {
        let cx = Container::new();
        let list = cx.create_root(json!([]));
        let values: Vec<Value> = (0..len).map(|i| json!({ "id": i })).collect();

        group.bench_with_input(BenchmarkId::new("push", len), &len, |b, _| {
            b.iter(|| {
                let result = cx.transaction(|cx| {
                    list.push(cx, values.iter().cloned())?;
                    Err::<(), _>(canopy_runtime::Error::user("abort"))
                });
                black_box(result.is_err());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_rollback);
criterion_main!(benches);
