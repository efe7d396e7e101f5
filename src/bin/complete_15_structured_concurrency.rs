//! Structured concurrency: scopes, cancellation, supervision, timeouts and
//! dispatchers.
//!
//! Run with: cargo run --bin complete_15_structured_concurrency

use playground::log::{self, log};
use playground::{
    coroutine_scope, run_on, with_timeout, with_timeout_or_none, Dispatcher, PlaygroundConfig,
    TaskError, TaskScope,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

// =============================================================================
// Milestone 1: Launch and join
// =============================================================================

/// Brew every order concurrently; the scope returns once all are served.
pub async fn brew_orders(orders: &[(&'static str, Duration)]) -> Result<Vec<String>, TaskError> {
    let served = Arc::new(Mutex::new(Vec::new()));

    coroutine_scope(|scope| {
        let served = served.clone();
        async move {
            for &(drink, brew_time) in orders {
                let served = served.clone();
                scope.launch(async move {
                    sleep(brew_time).await;
                    log(format!("served {drink}"));
                    served.lock().unwrap_or_else(|p| p.into_inner()).push(drink.to_string());
                    Ok(())
                });
            }
            Ok(())
        }
    })
    .await?;

    let served = served.lock().unwrap_or_else(|p| p.into_inner()).clone();
    Ok(served)
}

// =============================================================================
// Milestone 2: Cooperative cancellation
// =============================================================================

/// Never returns on its own; it is stopped at one of its `sleep`s when the
/// owning scope is cancelled.
pub async fn heartbeat(period: Duration, beats: Arc<AtomicUsize>) -> Result<(), TaskError> {
    loop {
        sleep(period).await;
        beats.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn run_heartbeats_for(run_for: Duration, period: Duration) -> (usize, usize) {
    let parent = TaskScope::new();
    let child = parent.child();
    let parent_beats = Arc::new(AtomicUsize::new(0));
    let child_beats = Arc::new(AtomicUsize::new(0));

    parent.launch(heartbeat(period, parent_beats.clone()));
    child.launch(heartbeat(period, child_beats.clone()));

    sleep(run_for).await;
    parent.cancel();
    let stopped = parent.join().await;
    log(format!("parent scope joined with {stopped:?}"));

    (
        parent_beats.load(Ordering::SeqCst),
        child_beats.load(Ordering::SeqCst),
    )
}

// =============================================================================
// Milestone 3: Fail-fast vs supervised scopes
// =============================================================================

async fn upload(
    name: &'static str,
    fail: bool,
    delay: Duration,
    done: Arc<AtomicUsize>,
) -> Result<(), TaskError> {
    sleep(delay).await;
    if fail {
        return Err(TaskError::failed(format!("upload of {name} rejected")));
    }
    done.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

/// Returns the scope outcome and how many uploads completed.
pub async fn upload_batch(supervised: bool) -> (Result<(), TaskError>, usize, Vec<String>) {
    let done = Arc::new(AtomicUsize::new(0));
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();

    let scope = if supervised {
        TaskScope::supervised()
    } else {
        TaskScope::new()
    }
    .with_handler(move |err| {
        sink.lock().unwrap_or_else(|p| p.into_inner()).push(err.to_string());
    });

    scope.launch(upload("a.txt", false, Duration::from_millis(100), done.clone()));
    scope.launch(upload("b.exe", true, Duration::from_millis(50), done.clone()));
    scope.launch(upload("c.txt", false, Duration::from_millis(150), done.clone()));

    let outcome = scope.join().await;
    let reported = reported.lock().unwrap_or_else(|p| p.into_inner()).clone();
    (outcome, done.load(Ordering::SeqCst), reported)
}

// =============================================================================
// Milestone 4: Timeouts
// =============================================================================

pub async fn lookup_price(item: &str, latency: Duration) -> Result<u32, TaskError> {
    sleep(latency).await;
    Ok(item.len() as u32 * 100)
}

pub async fn price_or_default(item: &str, latency: Duration, deadline: Duration) -> u32 {
    with_timeout_or_none(deadline, lookup_price(item, latency))
        .await
        .and_then(Result::ok)
        .unwrap_or(0)
}

// =============================================================================
// Milestone 5: Dispatchers
// =============================================================================

/// CPU-bound checksum moved off the async workers.
pub async fn checksum(data: Vec<u8>) -> Result<u64, TaskError> {
    run_on(Dispatcher::Blocking, move || {
        data.iter()
            .fold(0u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(*byte as u64))
    })
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    println!("=== Launch and Join ===");
    let served = brew_orders(&[
        ("espresso", config.millis(300)),
        ("tea", config.millis(100)),
        ("latte", config.millis(200)),
    ])
    .await?;
    log(format!("all served in completion order: {served:?}"));

    println!("\n=== Cooperative Cancellation ===");
    let (parent, child) = run_heartbeats_for(config.millis(550), config.tick()).await;
    log(format!("parent beats: {parent}, child beats: {child}"));

    println!("\n=== Fail-fast Scope ===");
    let (outcome, completed, _) = upload_batch(false).await;
    log(format!("outcome: {outcome:?}, completed uploads: {completed}"));

    println!("\n=== Supervised Scope ===");
    let (outcome, completed, reported) = upload_batch(true).await;
    log(format!("outcome: {outcome:?}, completed uploads: {completed}, handler saw: {reported:?}"));

    println!("\n=== Timeouts ===");
    match with_timeout(config.millis(100), lookup_price("laptop", config.millis(500))).await {
        Ok(price) => log(format!("price: {price}")),
        Err(err) => log(format!("lookup failed: {err}")),
    }
    let fallback = price_or_default("laptop", config.millis(500), config.millis(100)).await;
    log(format!("price with fallback: {fallback}"));

    println!("\n=== Dispatchers ===");
    let sum = checksum(b"structured concurrency".to_vec()).await?;
    log(format!("checksum computed on the blocking pool: {sum}"));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_brew_orders_waits_for_every_order() {
        let served = brew_orders(&[
            ("espresso", Duration::from_millis(300)),
            ("tea", Duration::from_millis(100)),
            ("latte", Duration::from_millis(200)),
        ])
        .await
        .unwrap();
        assert_eq!(served, vec!["tea", "latte", "espresso"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_parent_stops_child_heartbeat() {
        let (parent, child) =
            run_heartbeats_for(Duration::from_millis(550), Duration::from_millis(100)).await;
        assert_eq!(parent, 5);
        assert_eq!(child, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_batch_cancels_other_uploads() {
        let (outcome, completed, reported) = upload_batch(false).await;
        assert_eq!(outcome, Err(TaskError::failed("upload of b.exe rejected")));
        assert_eq!(completed, 0);
        assert_eq!(reported, vec!["Task failed: upload of b.exe rejected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervised_batch_keeps_other_uploads() {
        let (outcome, completed, reported) = upload_batch(true).await;
        assert_eq!(outcome, Ok(()));
        assert_eq!(completed, 2);
        assert_eq!(reported.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_falls_back_on_timeout() {
        assert_eq!(
            price_or_default("pen", Duration::from_millis(10), Duration::from_millis(50)).await,
            300
        );
        assert_eq!(
            price_or_default("pen", Duration::from_millis(90), Duration::from_millis(50)).await,
            0
        );
    }

    #[tokio::test]
    async fn test_checksum_on_blocking_pool() {
        assert_eq!(checksum(Vec::new()).await, Ok(0));
        assert_eq!(checksum(vec![1, 2]).await, Ok(33));
    }
}
