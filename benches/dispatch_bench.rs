//! Dispatch and handle cache benchmarks.
//!
//! Runs against the in-memory mock engine, so the numbers isolate bridge
//! overhead (correlation, channel hops, cache bookkeeping) from native
//! chemistry cost.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use chembridge::engine::MockLoader;
use chembridge::{BridgeConfig, CacheOptions, ChemBridge};

fn bridge(runtime: &Runtime, workers: usize, cache: CacheOptions) -> ChemBridge {
    let config = BridgeConfig::new().with_workers(workers).with_cache(cache);
    runtime
        .block_on(ChemBridge::new(config, MockLoader::new()))
        .expect("bridge setup failed")
}

/// Round trip through the pending table, a worker inbox, the router, and the
/// broadcast relay back to the waiting caller.
fn bench_round_trip(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");

    let mut group = c.benchmark_group("dispatch");
    group.measurement_time(Duration::from_secs(10));

    let single = bridge(&runtime, 1, CacheOptions::enabled(64));
    group.bench_function("round_trip_one_worker", |b| {
        b.iter(|| {
            runtime
                .block_on(single.is_valid_source("CCO"))
                .expect("dispatch failed")
        })
    });

    let pooled = bridge(&runtime, 4, CacheOptions::enabled(64));
    group.bench_function("round_trip_four_workers", |b| {
        b.iter(|| {
            runtime
                .block_on(pooled.is_valid_source("CCO"))
                .expect("dispatch failed")
        })
    });

    group.finish();

    runtime.block_on(single.shutdown());
    runtime.block_on(pooled.shutdown());
}

/// Same render issued repeatedly: with caching the handle survives between
/// jobs, without it every job pays construct and destroy.
fn bench_cache_paths(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");

    let mut group = c.benchmark_group("handle_cache");
    group.measurement_time(Duration::from_secs(10));

    let cached = bridge(&runtime, 1, CacheOptions::enabled(64));
    group.bench_function("svg_cached_handle", |b| {
        b.iter(|| {
            runtime
                .block_on(cached.render_svg("c1ccccc1", None, None))
                .expect("render failed")
        })
    });

    let uncached = bridge(&runtime, 1, CacheOptions::disabled());
    group.bench_function("svg_fresh_handle", |b| {
        b.iter(|| {
            runtime
                .block_on(uncached.render_svg("c1ccccc1", None, None))
                .expect("render failed")
        })
    });

    group.finish();

    runtime.block_on(cached.shutdown());
    runtime.block_on(uncached.shutdown());
}

criterion_group!(benches, bench_round_trip, bench_cache_paths);
criterion_main!(benches);
