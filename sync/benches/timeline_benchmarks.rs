use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use tsync::{Session, SyncConfig, Timeline};

// ---------------------------------------------------------------------------
// Timeline advance
// ---------------------------------------------------------------------------

fn bench_advance_signals_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("advance_signals_all");
    for pending in [16u32, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, &pending| {
            b.iter_batched(
                || {
                    let timeline = Timeline::new("bench");
                    let fences: Vec<_> = (1..=pending)
                        .map(|ts| timeline.create_fence(ts).unwrap())
                        .collect();
                    (timeline, fences)
                },
                |(timeline, fences)| {
                    black_box(timeline.advance(pending));
                    fences
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_advance_step_by_one(c: &mut Criterion) {
    c.bench_function("advance_step_by_one_1024", |b| {
        b.iter_batched(
            || {
                let timeline = Timeline::new("bench");
                let fences: Vec<_> = (1..=1024u32)
                    .map(|ts| timeline.create_fence(ts).unwrap())
                    .collect();
                (timeline, fences)
            },
            |(timeline, fences)| {
                for ts in 1..=1024u32 {
                    timeline.advance(ts);
                }
                fences
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Fence creation
// ---------------------------------------------------------------------------

fn bench_create_reached_fence(c: &mut Criterion) {
    let timeline = Timeline::with_baseline("bench", 1_000);
    c.bench_function("create_reached_fence", |b| {
        b.iter(|| black_box(timeline.create_fence(black_box(500)).unwrap()));
    });
}

fn bench_session_roundtrip(c: &mut Criterion) {
    let session = Session::new(1, SyncConfig::default());
    let id = session.isync_timeline_create(None).unwrap();
    c.bench_function("isync_create_forward_close", |b| {
        b.iter(|| {
            let fd = session.isync_fence_create(id, None).unwrap();
            let ts = session.fence_get(fd).unwrap().fence().target().raw();
            session.isync_forward(id, ts).unwrap();
            session.fence_close(fd).unwrap();
        });
    });
}

criterion_group!(advance, bench_advance_signals_all, bench_advance_step_by_one);
criterion_group!(create, bench_create_reached_fence, bench_session_roundtrip);
criterion_main!(advance, create);
