//! Distinct-value state cell backed by a tokio [`watch`] channel.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Holds a current value and notifies subscribers when it changes.
///
/// Writing a value equal to the current one notifies nobody. New subscribers
/// receive the current value first. A slow subscriber only sees the latest
/// value, never a backlog.
pub struct StateCell<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn value(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Returns whether subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// Replace the value with `new` only if it still equals `expected`.
    pub fn compare_and_set(&self, expected: &T, new: T) -> bool {
        let mut swapped = false;
        self.sender.send_if_modified(|current| {
            if *current != *expected {
                return false;
            }
            swapped = true;
            if *current == new {
                return false;
            }
            *current = new;
            true
        });
        swapped
    }

    /// Atomic read-modify-write. `transform` may run more than once when
    /// other writers race with this one, so it must be free of side effects.
    pub fn update<F>(&self, transform: F) -> T
    where
        F: Fn(&T) -> T,
    {
        loop {
            let current = self.value();
            let next = transform(&current);
            if self.compare_and_set(&current, next.clone()) {
                return next;
            }
        }
    }

    pub fn subscribe(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.sender.subscribe()).boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_new_subscriber_gets_current_value() {
        let cell = StateCell::new("idle".to_string());
        cell.set("busy".to_string());
        let mut updates = cell.subscribe();
        assert_eq!(updates.next().await.as_deref(), Some("busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_write_emits_once() {
        let cell = StateCell::new(0);
        let mut updates = cell.subscribe();
        assert_eq!(updates.next().await, Some(0));

        assert!(cell.set(1));
        assert!(!cell.set(1));

        assert_eq!(updates.next().await, Some(1));
        assert!(timeout(Duration::from_millis(100), updates.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let cell = StateCell::new(10);
        assert!(!cell.compare_and_set(&9, 11));
        assert_eq!(cell.value(), 10);
        assert!(cell.compare_and_set(&10, 11));
        assert_eq!(cell.value(), 11);
        // Matching expectation with an unchanged value still counts as swapped.
        assert!(cell.compare_and_set(&11, 11));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let cell = StateCell::new(0u64);
        let mut handles = Vec::new();

        for _ in 0..1_000 {
            let cell = cell.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                cell.update(|count| count + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cell.value(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_sees_latest_only() {
        let cell = StateCell::new(0);
        let mut updates = cell.subscribe();
        assert_eq!(updates.next().await, Some(0));

        for i in 1..=5 {
            cell.set(i);
        }
        assert_eq!(updates.next().await, Some(5));
        assert!(timeout(Duration::from_millis(100), updates.next()).await.is_err());
    }
}
