use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use stratadb::storage::buffer::LruReplacer;

fn replacer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("LruReplacer");

    for size in [64usize, 1024, 16384].iter() {
        group.bench_with_input(BenchmarkId::new("churn", size), size, |b, &size| {
            let replacer = LruReplacer::new(size);
            for frame_id in 0..size {
                replacer.unpin(frame_id);
            }

            let mut rng = StdRng::seed_from_u64(42);
            b.iter(|| {
                let frame_id = rng.gen_range(0..size);
                replacer.pin(frame_id);
                replacer.unpin(frame_id);
                if let Some(victim) = replacer.victim() {
                    replacer.unpin(victim);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, replacer_benchmark);
criterion_main!(benches);
