//! Performance benchmarks for duet-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duet_engine::{
    classify, read_table, MemoryReplica, Reconciler, Row, SyncSchema, Value, Watermark,
    DELETED_AT, LAST_MODIFIED, STABLE_ID,
};

const WATERMARK: &str = "2024-03-01T00:00:00";
const BEFORE: &str = "2024-02-01T00:00:00";
const AFTER: &str = "2024-04-01T00:00:00";

fn card(i: usize, reviews: i64, modified: &str) -> Row {
    Row::new()
        .with(STABLE_ID, format!("card-{:06}", i))
        .with("deck_id", 1)
        .with("question", format!("Question {}", i))
        .with("answer", format!("Answer {}", i))
        .with("total_reviews", reviews)
        .with(LAST_MODIFIED, modified)
        .with(DELETED_AT, Value::Null)
}

/// Half the rows overlap; of those, a third changed remotely, a third
/// locally and a third on both sides.
fn replicas(size: usize) -> (MemoryReplica, MemoryReplica) {
    let mut local = MemoryReplica::new().with_table("flashcards");
    let mut remote = MemoryReplica::new().with_table("flashcards");
    for i in 0..size {
        if i % 2 == 0 {
            let (ours, theirs) = match i % 3 {
                0 => (BEFORE, AFTER),
                1 => (AFTER, BEFORE),
                _ => (AFTER, AFTER),
            };
            local.seed("flashcards", card(i, 3, ours));
            remote.seed("flashcards", card(i, 5, theirs).with("answer", "Remote"));
        } else {
            remote.seed("flashcards", card(i, 0, AFTER));
        }
    }
    (local, remote)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let watermark = Watermark::new(WATERMARK);
    let local = card(1, 3, AFTER);
    let remote = card(1, 5, AFTER).with("answer", "Remote");

    group.bench_function("classify_conflict", |b| {
        b.iter(|| classify(black_box(Some(&local)), black_box(&remote), false, &watermark))
    });

    group.bench_function("classify_in_sync", |b| {
        b.iter(|| classify(black_box(Some(&local)), black_box(&local), false, &watermark))
    });

    group.finish();
}

fn bench_read_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_table");
    let rt = runtime();

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("snapshot", size), size, |b, &size| {
            let (_, mut remote) = replicas(size);
            b.iter(|| rt.block_on(read_table(&mut remote, black_box("flashcards"))))
        });
    }

    group.finish();
}

fn bench_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciliation");
    let rt = runtime();

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("first_pass", size), size, |b, &size| {
            b.iter_batched(
                || replicas(size),
                |(mut local, mut remote)| {
                    rt.block_on(async {
                        Reconciler::new(&mut local, &mut remote, Watermark::new(WATERMARK))
                            .reconcile_all()
                            .await
                    })
                },
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("second_pass", size), size, |b, &size| {
            let (mut local, mut remote) = replicas(size);
            rt.block_on(async {
                Reconciler::new(&mut local, &mut remote, Watermark::new(WATERMARK))
                    .reconcile_all()
                    .await
            })
            .unwrap();

            b.iter(|| {
                rt.block_on(async {
                    Reconciler::new(&mut local, &mut remote, Watermark::new(WATERMARK))
                        .reconcile_all()
                        .await
                })
            })
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    group.bench_function("row_to_json", |b| {
        let row = card(1, 12, AFTER);
        b.iter(|| serde_json::to_string(black_box(&row)))
    });

    group.bench_function("schema_to_json", |b| {
        let schema = SyncSchema::standard();
        b.iter(|| serde_json::to_string(black_box(&schema)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classification,
    bench_read_table,
    bench_reconciliation,
    bench_serialization,
);
criterion_main!(benches);
