//! Opens a disk-backed cache from configuration, stores a few series and
//! reloads them in a second cache instance.
//!
//! ```text
//! RUST_LOG=quantcore=debug cargo run --example basic_cache
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use quantcore::prelude::*;
use tracing_subscriber::EnvFilter;

fn daily_series(symbol: &str, start_price: f64, days: usize) -> TimeSeries {
    let mut series = TimeSeries::with_capacity(symbol, days);
    let mut price = start_price;
    for day in 0..days {
        let ts = Utc.timestamp_opt(1_700_000_000 + day as i64 * 86_400, 0).unwrap();
        let open = price;
        price *= if day % 3 == 0 { 0.99 } else { 1.012 };
        series.push(Bar::new(
            ts,
            open,
            open.max(price) * 1.005,
            open.min(price) * 0.995,
            price,
            1_000_000 + day as i64 * 5_000,
        ));
    }
    series
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let mut config = QuantcoreConfig::from_env()?;
    config.cache.cache_dir = dir.path().to_path_buf();
    config.cache.max_memory_mb = 1;
    config.validate()?;

    let scheduler = Arc::new(TaskScheduler::from_config(&config.scheduler)?);
    {
        let cache: LruDiskCache = CacheBuilder::from_config(&config.cache)
            .scheduler(Arc::clone(&scheduler))
            .build()?;

        for (symbol, price) in [("AAPL", 189.0), ("MSFT", 370.0), ("NVDA", 480.0)] {
            let outcome = cache.put(symbol, daily_series(symbol, price, 250));
            println!("put {symbol}: {outcome:?}");
        }
        if let Some(aapl) = cache.get("AAPL") {
            println!(
                "AAPL: {} bars, last close {:.2}",
                aapl.len(),
                aapl.last().map(|b| b.close).unwrap_or_default()
            );
        }
        let _ = cache.get("TSLA");
        println!("{:#?}", cache.stats());
        scheduler.wait_all();
    }

    let reopened: LruDiskCache = CacheBuilder::from_config(&config.cache).build()?;
    println!("preloaded {} entries", reopened.preload_from_disk());
    println!("recency: {:?}", reopened.keys_by_recency());
    println!("lifetime hit rate: {:.2}", reopened.hit_rate());
    println!(
        "expired: {}",
        reopened.cleanup_expired_entries(Duration::from_secs(24 * 3600))
    );
    Ok(())
}
