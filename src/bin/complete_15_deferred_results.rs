//! Deferred results: start work now, read the value (or the failure) later.
//!
//! Run with: cargo run --bin complete_15_deferred_results

use playground::log::{self, log};
use playground::{await_all, await_all_settled, Deferred, PlaygroundConfig, TaskError, TaskScope};
use std::time::Duration;
use tokio::time::{sleep, Instant};

// =============================================================================
// Milestone 1: Sequential vs concurrent
// =============================================================================

pub async fn fetch_stock(symbol: &'static str, latency: Duration) -> Result<u32, TaskError> {
    sleep(latency).await;
    log(format!("fetched {symbol}"));
    Ok(symbol.bytes().map(u32::from).sum())
}

pub async fn sequential_total(requests: &[(&'static str, Duration)]) -> Result<u32, TaskError> {
    let mut total = 0;
    for &(symbol, latency) in requests {
        total += fetch_stock(symbol, latency).await?;
    }
    Ok(total)
}

pub async fn concurrent_total(
    scope: &TaskScope,
    requests: &[(&'static str, Duration)],
) -> Result<u32, TaskError> {
    let pending: Vec<Deferred<u32>> = requests
        .iter()
        .map(|&(symbol, latency)| scope.spawn(fetch_stock(symbol, latency)))
        .collect();
    Ok(await_all(pending).await?.into_iter().sum())
}

// =============================================================================
// Milestone 2: Operand order, not completion order
// =============================================================================

pub async fn ordered_join(scope: &TaskScope, jobs: &[(u32, Duration)]) -> Result<Vec<u32>, TaskError> {
    let pending = jobs
        .iter()
        .map(|&(value, latency)| {
            scope.spawn(async move {
                sleep(latency).await;
                Ok(value)
            })
        })
        .collect();
    await_all(pending).await
}

// =============================================================================
// Milestone 3: Failures surface where the result is read
// =============================================================================

pub fn parse_later(scope: &TaskScope, raw: &'static str) -> Deferred<i64> {
    scope.spawn(async move {
        sleep(Duration::from_millis(10)).await;
        raw.trim()
            .parse::<i64>()
            .map_err(|e| TaskError::failed(format!("'{raw}' is not a number: {e}")))
    })
}

pub async fn parse_all_settled(inputs: &[&'static str]) -> Vec<Result<i64, TaskError>> {
    let scope = TaskScope::supervised();
    let pending = inputs.iter().map(|&raw| parse_later(&scope, raw)).collect();
    await_all_settled(pending).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    let requests = [
        ("AAPL", config.millis(300)),
        ("GOOG", config.millis(200)),
        ("MSFT", config.millis(100)),
    ];

    println!("=== Sequential ===");
    let start = Instant::now();
    let total = sequential_total(&requests).await?;
    log(format!("total {total} in {:?}", start.elapsed()));

    println!("\n=== Concurrent ===");
    let scope = TaskScope::new();
    let start = Instant::now();
    let total = concurrent_total(&scope, &requests).await?;
    log(format!("total {total} in {:?}", start.elapsed()));

    println!("\n=== Ordered join ===");
    let jobs = [(1, config.millis(100)), (2, config.millis(200)), (3, config.millis(50))];
    let start = Instant::now();
    let values = ordered_join(&scope, &jobs).await?;
    log(format!("{values:?} after {:?}", start.elapsed()));

    println!("\n=== Deferred failures ===");
    let supervised = TaskScope::supervised();
    let broken = parse_later(&supervised, "forty-two");
    log("spawned a parse that will fail; nothing raised yet");
    sleep(config.millis(50)).await;
    match broken.await_result().await {
        Ok(value) => log(format!("parsed {value}")),
        Err(err) => log(format!("failure surfaced on read: {err}")),
    }

    for outcome in parse_all_settled(&["1", "two", " 3 "]).await {
        log(format!("settled: {outcome:?}"));
    }

    Ok(())
}
