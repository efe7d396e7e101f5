//! Race prevention: many producers, one owner of the state.
//!
//! Run with: cargo run --bin complete_15_race_prevention

use playground::log::{self, log};
use playground::{coroutine_scope, PlaygroundConfig, TaskError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// =============================================================================
// Milestone 1: The lost update
// =============================================================================

/// Read, suspend, write back. Concurrent callers overwrite each other.
pub async fn racy_increment(counter: &AtomicU64) {
    let seen = counter.load(Ordering::SeqCst);
    tokio::task::yield_now().await;
    counter.store(seen + 1, Ordering::SeqCst);
}

pub async fn racy_total(workers: usize, increments: usize) -> u64 {
    let counter = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                for _ in 0..increments {
                    racy_increment(&counter).await;
                }
            })
        })
        .collect();
    for handle in handles {
        // a worker only fails by panicking, which the demo does not do
        let _ = handle.await;
    }
    counter.load(Ordering::SeqCst)
}

// =============================================================================
// Milestone 2: Counter actor
// =============================================================================

#[derive(Debug)]
enum CounterMessage {
    Increment(u64),
    Get(oneshot::Sender<u64>),
    Shutdown,
}

/// Owns the count; every change arrives as a message on one channel.
struct CounterActor {
    inbox: mpsc::Receiver<CounterMessage>,
    count: u64,
}

impl CounterActor {
    async fn run(mut self) -> u64 {
        while let Some(message) = self.inbox.recv().await {
            match message {
                CounterMessage::Increment(by) => self.count += by,
                CounterMessage::Get(reply_to) => {
                    // the asker may have given up waiting
                    let _ = reply_to.send(self.count);
                }
                CounterMessage::Shutdown => {
                    tracing::debug!(count = self.count, "counter actor shutting down");
                    break;
                }
            }
        }
        self.count
    }
}

/// Cloneable address of a running [`CounterActor`].
#[derive(Clone)]
pub struct CounterHandle {
    sender: mpsc::Sender<CounterMessage>,
}

impl CounterHandle {
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<u64>) {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        let actor = CounterActor { inbox, count: 0 };
        (Self { sender }, tokio::spawn(actor.run()))
    }

    pub async fn increment(&self) -> Result<(), TaskError> {
        self.send(CounterMessage::Increment(1)).await
    }

    pub async fn add(&self, by: u64) -> Result<(), TaskError> {
        self.send(CounterMessage::Increment(by)).await
    }

    pub async fn get(&self) -> Result<u64, TaskError> {
        let (reply_to, reply) = oneshot::channel();
        self.send(CounterMessage::Get(reply_to)).await?;
        reply
            .await
            .map_err(|_| TaskError::failed("counter actor dropped the reply"))
    }

    pub async fn shutdown(&self) -> Result<(), TaskError> {
        self.send(CounterMessage::Shutdown).await
    }

    async fn send(&self, message: CounterMessage) -> Result<(), TaskError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| TaskError::failed("counter actor is gone"))
    }
}

/// `workers` concurrent producers each send `increments` increments.
pub async fn actor_total(workers: usize, increments: usize) -> Result<u64, TaskError> {
    let (counter, actor) = CounterHandle::spawn(64);

    coroutine_scope(|scope| {
        let counter = counter.clone();
        async move {
            for _ in 0..workers {
                let counter = counter.clone();
                scope.launch(async move {
                    for _ in 0..increments {
                        counter.increment().await?;
                    }
                    Ok(())
                });
            }
            Ok(())
        }
    })
    .await?;

    let total = counter.get().await?;
    counter.shutdown().await?;
    let final_count = actor.await?;
    debug_assert_eq!(total, final_count);
    Ok(total)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    let (workers, increments) = (100, 1_000);
    let expected = (workers * increments) as u64;

    println!("=== Shared counter, read-suspend-write ===");
    let racy = racy_total(workers, increments).await;
    log(format!("expected {expected}, got {racy} ({} updates lost)", expected - racy));

    println!("\n=== Counter actor ===");
    let total = actor_total(workers, increments).await?;
    log(format!("expected {expected}, got {total}"));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_actor_loses_no_updates() {
        assert_eq!(actor_total(50, 200).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_actor_total_with_no_workers() {
        assert_eq!(actor_total(0, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_requests_and_replies() {
        let (counter, actor) = CounterHandle::spawn(4);
        counter.add(5).await.unwrap();
        counter.increment().await.unwrap();
        assert_eq!(counter.get().await.unwrap(), 6);

        counter.shutdown().await.unwrap();
        assert_eq!(actor.await.unwrap(), 6);
        assert!(counter.increment().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racy_counter_never_overcounts() {
        assert!(racy_total(8, 100).await <= 800);
    }

    #[tokio::test]
    async fn test_racy_counter_is_exact_without_concurrency() {
        assert_eq!(racy_total(1, 100).await, 100);
    }
}
