//! Backpressure: what happens when the consumer is slower than the producer.
//!
//! Run with: cargo run --bin complete_15_flow_backpressure

use playground::log::{self, log};
use playground::{flow, Flow, FlowError, PlaygroundConfig};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Emit `(delay_since_previous, value)` pairs on a schedule.
pub fn scheduled<T>(events: Vec<(Duration, T)>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    flow(move |out| {
        let events = events.clone();
        async move {
            for (delay, value) in events {
                sleep(delay).await;
                out.emit(value).await;
            }
            Ok(())
        }
    })
}

// =============================================================================
// Milestone 1: buffer and conflate
// =============================================================================

pub fn dishes(count: u32, wash_time: Duration) -> Flow<u32> {
    flow(move |out| async move {
        for dish in 1..=count {
            sleep(wash_time).await;
            out.emit(dish).await;
        }
        Ok(())
    })
}

/// Dry every dish and return how long it took.
pub async fn dry_all(dishes: &Flow<u32>, dry_time: Duration) -> Result<(Vec<u32>, Duration), FlowError> {
    let start = Instant::now();
    let mut dried = Vec::new();
    dishes
        .for_each(|dish| {
            dried.push(dish);
            sleep(dry_time)
        })
        .await?;
    Ok((dried, start.elapsed()))
}

pub async fn render_frames(frames: &Flow<u32>, render_time: Duration) -> Result<Vec<u32>, FlowError> {
    let mut rendered = Vec::new();
    frames
        .conflate()
        .for_each(|frame| {
            rendered.push(frame);
            sleep(render_time)
        })
        .await?;
    Ok(rendered)
}

// =============================================================================
// Milestone 2: debounce a search box
// =============================================================================

/// Keystrokes typed at `at` units from the start. A keystroke listed
/// earlier than the one before it fires right after it.
pub fn keystrokes(typed: &[(u64, &str)], unit: Duration) -> Flow<String> {
    let mut clock = 0;
    let events = typed
        .iter()
        .map(|&(at, query)| {
            let units = u32::try_from(at.saturating_sub(clock)).unwrap_or(u32::MAX);
            clock = clock.max(at);
            (unit.saturating_mul(units), query.to_string())
        })
        .collect();
    scheduled(events)
}

pub async fn search_queries(typing: &Flow<String>, quiet: Duration) -> Result<Vec<String>, FlowError> {
    typing
        .filter(|query| !query.trim().is_empty())
        .debounce(quiet)
        .on_each(|query| log(format!("searching for '{query}'")))
        .to_vec()
        .await
}

// =============================================================================
// Milestone 3: sample a ticker, time out a silent feed
// =============================================================================

pub fn stock_ticker(prices: Vec<f64>, every: Duration) -> Flow<f64> {
    scheduled(prices.into_iter().map(|price| (every, price)).collect())
}

pub async fn chart_points(ticker: &Flow<f64>, refresh: Duration) -> Result<Vec<f64>, FlowError> {
    ticker.sample(refresh).to_vec().await
}

pub async fn watch_feed(feed: &Flow<u32>, silence: Duration) -> (Vec<u32>, Option<FlowError>) {
    let mut seen = Vec::new();
    let outcome = feed.timeout(silence).collect(|value| seen.push(value)).await;
    (seen, outcome.err())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    println!("=== buffer ===");
    let sink = dishes(4, config.millis(100));
    let (_, plain) = dry_all(&sink, config.millis(300)).await?;
    log(format!("washer waits for the dryer: {plain:?}"));
    let (_, buffered) = dry_all(&sink.buffer(4), config.millis(300)).await?;
    log(format!("washer fills the rack instead: {buffered:?}"));

    println!("\n=== conflate ===");
    let frames = scheduled((1..=10).map(|frame| (config.millis(20), frame)).collect());
    let rendered = render_frames(&frames, config.millis(70)).await?;
    log(format!("rendered frames: {rendered:?}"));

    println!("\n=== debounce ===");
    let typing = keystrokes(
        &[(0, "r"), (1, "ru"), (2, "rus"), (3, "rust"), (9, "rust a"), (10, "rust async")],
        config.millis(50),
    );
    let queries = search_queries(&typing, config.millis(200)).await?;
    log(format!("queries sent: {queries:?}"));

    println!("\n=== sample ===");
    let ticker = stock_ticker(
        vec![101.0, 101.5, 100.8, 102.2, 103.0, 102.7, 104.1, 104.0],
        config.millis(40),
    );
    let points = chart_points(&ticker, config.millis(100)).await?;
    log(format!("chart points: {points:?}"));

    println!("\n=== timeout ===");
    let feed = scheduled(vec![
        (config.millis(50), 1),
        (config.millis(50), 2),
        (config.millis(500), 3),
    ]);
    let (seen, failure) = watch_feed(&feed, config.millis(200)).await;
    log(format!("seen {seen:?}, then {failure:?}"));

    Ok(())
}
