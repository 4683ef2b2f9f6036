use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use quantcore::builder::CacheBuilder;
use quantcore::cache::LruDiskCache;
use quantcore::runtime::TaskScheduler;
use quantcore::series::{Bar, TimeSeries};
use quantcore::traits::CacheValue;

fn series(bars: usize) -> TimeSeries {
    let mut s = TimeSeries::with_capacity("BENCH", bars);
    for i in 0..bars {
        let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
        s.push(Bar::new(ts, 1.0, 2.0, 0.5, 1.5, 10));
    }
    s
}

fn bench_get_hit(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache: LruDiskCache = LruDiskCache::open(64 << 20, dir.path()).unwrap();
    for i in 0..256 {
        cache.put(format!("K{i}"), series(16));
    }
    let keys: Vec<String> = (0..256).map(|i| format!("K{i}")).collect();
    c.bench_function("lru_disk_get_hit", |b| {
        b.iter(|| {
            for key in &keys {
                std::hint::black_box(cache.get(std::hint::black_box(key)));
            }
        })
    });
}

fn bench_put_async_eviction(c: &mut Criterion) {
    let scheduler = Arc::new(TaskScheduler::new(4).unwrap());
    let value = Arc::new(series(64));
    let budget = 128 * value.estimated_size();
    c.bench_function("lru_disk_put_async_eviction_churn", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let cache: LruDiskCache = CacheBuilder::new(budget)
                    .cache_dir(dir.path())
                    .scheduler(Arc::clone(&scheduler))
                    .build()
                    .unwrap();
                (cache, dir)
            },
            |(cache, dir)| {
                for i in 0..512 {
                    cache.put_arc(format!("K{i}"), Arc::clone(&value));
                }
                scheduler.wait_all();
                (cache, dir)
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, bench_get_hit, bench_put_async_eviction);
criterion_main!(benches);
