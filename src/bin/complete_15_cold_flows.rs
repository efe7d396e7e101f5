//! Cold flows: lazy, restartable producers and their operators.
//!
//! Run with: cargo run --bin complete_15_cold_flows

use playground::log::{self, log};
use playground::{flow, Flow, FlowError, PlaygroundConfig, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// =============================================================================
// Milestone 1: Nothing runs until collected, everything reruns per collector
// =============================================================================

pub fn thermometer(warmups: Arc<AtomicU32>, interval: Duration) -> Flow<f64> {
    flow(move |out| {
        let warmups = warmups.clone();
        async move {
            warmups.fetch_add(1, Ordering::SeqCst);
            log("thermometer warming up");
            for reading in [21.5, 21.7, 22.1, 21.9] {
                sleep(interval).await;
                out.emit(reading).await;
            }
            Ok(())
        }
    })
}

// =============================================================================
// Milestone 2: Operator chains over an infinite producer
// =============================================================================

pub fn naturals() -> Flow<u64> {
    flow(|out| async move {
        let mut n = 0u64;
        while n < u64::MAX {
            n += 1;
            out.emit(n).await;
        }
        Ok(())
    })
}

/// Squares of the first `count` even numbers.
pub fn even_squares(count: usize) -> Flow<u64> {
    naturals().filter(|n| n % 2 == 0).map(|n| n * n).take(count)
}

pub fn fahrenheit(readings: &Flow<f64>) -> Flow<String> {
    readings
        .map(|celsius| celsius * 9.0 / 5.0 + 32.0)
        .map(|f| format!("{f:.1}°F"))
}

// =============================================================================
// Milestone 3: Error handling
// =============================================================================

/// Fails on its first `failures` runs after emitting a partial page.
pub fn flaky_feed(runs: Arc<AtomicU32>, failures: u32) -> Flow<String> {
    flow(move |out| {
        let run = runs.fetch_add(1, Ordering::SeqCst);
        async move {
            out.emit("headline".to_string()).await;
            if run < failures {
                return Err(FlowError::failed(format!("connection reset (run {run})")));
            }
            out.emit("story".to_string()).await;
            Ok(())
        }
    })
}

pub fn feed_with_fallback(feed: &Flow<String>) -> Flow<String> {
    feed.catch(|err| {
        log(format!("feed failed: {err}"));
        Flow::from_iter(vec!["(cached story)".to_string()])
    })
}

pub fn feed_with_backoff(feed: &Flow<String>, base: Duration) -> Flow<String> {
    feed.retry_with(RetryPolicy {
        max_retries: 3,
        initial_backoff: base,
        max_backoff: base * 8,
        jitter: false,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    println!("=== Cold producer ===");
    let warmups = Arc::new(AtomicU32::new(0));
    let readings = thermometer(warmups.clone(), config.millis(50));
    log(format!("flow built, warmups so far: {}", warmups.load(Ordering::SeqCst)));
    let converted = fahrenheit(&readings);
    let (first, second) = tokio::join!(readings.to_vec(), converted.to_vec());
    log(format!("collector 1: {:?}", first?));
    log(format!("collector 2: {:?}", second?));
    log(format!("warmups after two collectors: {}", warmups.load(Ordering::SeqCst)));

    println!("\n=== Operators ===");
    let squares = even_squares(5).to_vec().await?;
    log(format!("first five even squares: {squares:?}"));
    let total = naturals().take(100).fold(0, |acc, n| acc + n).await?;
    log(format!("sum of 1..=100: {total}"));

    println!("\n=== catch ===");
    let runs = Arc::new(AtomicU32::new(0));
    let page = feed_with_fallback(&flaky_feed(runs, 1)).to_vec().await?;
    log(format!("page: {page:?}"));

    println!("\n=== retry ===");
    let runs = Arc::new(AtomicU32::new(0));
    let page = flaky_feed(runs.clone(), 2).retry(2).to_vec().await?;
    log(format!("page after {} runs: {page:?}", runs.load(Ordering::SeqCst)));

    let runs = Arc::new(AtomicU32::new(0));
    let page = feed_with_backoff(&flaky_feed(runs.clone(), 3), config.millis(50))
        .to_vec()
        .await?;
    log(format!("page after {} runs with backoff: {page:?}", runs.load(Ordering::SeqCst)));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_thermometer_is_cold_and_restartable() {
        let warmups = Arc::new(AtomicU32::new(0));
        let readings = thermometer(warmups.clone(), Duration::from_millis(10));
        assert_eq!(warmups.load(Ordering::SeqCst), 0);

        let first = readings.to_vec().await.unwrap();
        let second = readings.to_vec().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(warmups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fahrenheit_conversion() {
        let readings = Flow::from_iter(vec![0.0, 100.0]);
        assert_eq!(
            fahrenheit(&readings).to_vec().await.unwrap(),
            vec!["32.0°F".to_string(), "212.0°F".to_string()]
        );
    }

    #[tokio::test]
    async fn test_even_squares_terminates() {
        assert_eq!(even_squares(4).to_vec().await.unwrap(), vec![4, 16, 36, 64]);
        assert_eq!(even_squares(0).to_vec().await.unwrap(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn test_fallback_after_partial_output() {
        let runs = Arc::new(AtomicU32::new(0));
        let page = feed_with_fallback(&flaky_feed(runs, 5)).to_vec().await.unwrap();
        assert_eq!(page, vec!["headline", "(cached story)"]);
    }

    #[tokio::test]
    async fn test_retry_replays_from_start() {
        let runs = Arc::new(AtomicU32::new(0));
        let page = flaky_feed(runs.clone(), 2).retry(2).to_vec().await.unwrap();
        assert_eq!(page, vec!["headline", "headline", "headline", "story"]);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gives_up_after_max_retries() {
        let runs = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let result = feed_with_backoff(&flaky_feed(runs.clone(), 10), Duration::from_millis(10))
            .to_vec()
            .await;
        assert!(matches!(result, Err(FlowError::Failed(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
