//! Feed handler style pipeline: a producer thread pushes ticks through a
//! lock-free SPSC ring, a consumer aggregates them into one-minute bars in
//! pooled scratch blocks, and finished series are cached with async
//! persistence.

use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use quantcore::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Tick {
    ts: i64,
    price: f64,
    size: i64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (producer, consumer) = BoundedSpscQueue::<Tick>::new(256).split();
    let feed = thread::spawn(move || {
        let mut price = 100.0;
        for i in 0..60 * 30 {
            price += if i % 7 < 4 { 0.01 } else { -0.012 };
            let mut tick = Tick {
                ts: 1_700_000_000 + i,
                price,
                size: 100 + i % 50,
            };
            while let Err(back) = producer.try_push(tick) {
                tick = back;
                thread::yield_now();
            }
        }
    });

    // One scratch block holds the running OHLCV state of the current minute.
    let pool = BlockPool::new(5 * std::mem::size_of::<f64>(), 4)?;
    let scratch = pool.allocate_scoped();
    let mut series = TimeSeries::new("DEMO");
    let mut minute = None;
    let mut received = 0;

    let flush = |minute: i64, state: [f64; 5], series: &mut TimeSeries| {
        if let Some(ts) = Utc.timestamp_opt(minute * 60, 0).single() {
            series.push(Bar::new(ts, state[0], state[1], state[2], state[3], state[4] as i64));
        }
    };
    let read_state = |bytes: &[u8]| -> [f64; 5] {
        let mut state = [0.0; 5];
        for (i, chunk) in bytes.chunks_exact(8).take(5).enumerate() {
            state[i] = f64::from_le_bytes(chunk.try_into().unwrap_or([0; 8]));
        }
        state
    };
    let write_state = |bytes: &mut [u8], state: [f64; 5]| {
        for (i, value) in state.iter().enumerate() {
            bytes[i * 8..i * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
    };

    while received < 60 * 30 {
        let Some(tick) = consumer.try_pop() else {
            thread::yield_now();
            continue;
        };
        received += 1;
        let tick_minute = tick.ts / 60;
        scratch.with_bytes(|bytes| {
            let mut state = read_state(bytes);
            match minute {
                Some(m) if m == tick_minute => {
                    state[1] = state[1].max(tick.price);
                    state[2] = state[2].min(tick.price);
                    state[3] = tick.price;
                    state[4] += tick.size as f64;
                },
                _ => {
                    if let Some(m) = minute {
                        flush(m, state, &mut series);
                    }
                    state = [tick.price, tick.price, tick.price, tick.price, tick.size as f64];
                    minute = Some(tick_minute);
                },
            }
            write_state(bytes, state);
        });
    }
    if let Some(m) = minute {
        let state = scratch.with_bytes(|bytes| read_state(bytes));
        flush(m, state, &mut series);
    }
    feed.join().map_err(|_| "feed thread panicked")?;
    drop(scratch);

    println!("aggregated {} bars, valid: {}", series.len(), series.is_valid());
    println!("pool: {pool:?}");

    let dir = tempfile::tempdir()?;
    let scheduler = Arc::new(TaskScheduler::new(2)?);
    let cache: LruDiskCache = LruDiskCache::open(8 << 20, dir.path())?.with_scheduler(Arc::clone(&scheduler));
    let outcome = cache.put("DEMO_1m", series);
    scheduler.wait_all();
    println!("cached: {outcome:?}, scheduler: {:?}", scheduler.stats());
    Ok(())
}
