use criterion::{Criterion, criterion_group, criterion_main};
use fairshare_lib::{
    BinName, BinSet, MemoryCoordinator, ThrottleGroup, ThrottleSpec, Throttler, ThrottlerConfig,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio::time::Instant;

fn throttler() -> Throttler {
    Throttler::new(
        Arc::new(MemoryCoordinator::new()),
        ThrottlerConfig::default(),
    )
}

fn bins(count: usize) -> BinSet {
    (0..count)
        .map(|i| BinName::from(format!("mirror-{i}")))
        .collect()
}

fn benchmark_permits(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let throttler = throttler();
    let group = ThrottleGroup::from("crawl");
    let spec = ThrottleSpec::new(64, u64::MAX / 2);

    for count in [1, 8] {
        let bins = bins(count);
        c.bench_function(&format!("obtain and release ({count} bins)"), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let permit = throttler
                        .obtain_connection_permission(&group, &spec, black_box(&bins), Instant::now())
                        .await
                        .unwrap();
                    black_box(permit.byte_rate());
                    throttler
                        .release_connection_permission(&group, &spec, &bins, Instant::now())
                        .unwrap();
                });
            });
        });
    }

    runtime.block_on(throttler.destroy(Instant::now()));
}

fn benchmark_rebalance(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let throttler = throttler();
    let spec = ThrottleSpec::new(64, 1 << 20);
    let bins = bins(16);

    // 32 pools with 16 bins each
    runtime.block_on(async {
        for i in 0..32 {
            let group = ThrottleGroup::from(format!("group-{i}"));
            throttler
                .obtain_connection_permission(&group, &spec, &bins, Instant::now())
                .await
                .unwrap();
        }
    });

    c.bench_function("poll 32 pools", |b| {
        b.iter(|| runtime.block_on(throttler.poll(Instant::now())));
    });

    runtime.block_on(throttler.destroy(Instant::now()));
}

criterion_group!(benches, benchmark_permits, benchmark_rebalance);
criterion_main!(benches);
