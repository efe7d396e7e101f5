//! Hot broadcast stream backed by a tokio [`broadcast`] channel.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Values emitted while nobody is subscribed are dropped. A subscriber only
/// sees values emitted after it subscribed, unless a replay cache is
/// configured.
pub struct SharedFlow<T> {
    inner: Arc<Mutex<SharedInner<T>>>,
}

struct SharedInner<T> {
    sender: broadcast::Sender<T>,
    replay: VecDeque<T>,
    replay_capacity: usize,
}

impl<T> Clone for SharedFlow<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SharedFlow<T> {
    /// `capacity` bounds how far a subscriber may lag before it starts
    /// skipping values.
    pub fn new(capacity: usize) -> Self {
        Self::with_replay(capacity, 0)
    }

    pub fn with_replay(capacity: usize, replay: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(SharedInner {
                sender,
                replay: VecDeque::with_capacity(replay),
                replay_capacity: replay,
            })),
        }
    }

    /// Deliver `value` to every current subscriber and return how many were
    /// reached. Zero subscribers is not an error.
    pub fn emit(&self, value: T) -> usize {
        let mut inner = self.lock();
        if inner.replay_capacity > 0 {
            if inner.replay.len() == inner.replay_capacity {
                inner.replay.pop_front();
            }
            inner.replay.push_back(value.clone());
        }
        // send only fails when there are no receivers
        inner.sender.send(value).unwrap_or(0)
    }

    /// Stream of the replay cache followed by every value emitted from now on.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let (cached, receiver) = {
            let inner = self.lock();
            (inner.replay.iter().cloned().collect::<Vec<_>>(), inner.sender.subscribe())
        };

        let live = BroadcastStream::new(receiver).filter_map(|item| async move {
            match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "shared flow subscriber lagged");
                    None
                }
            }
        });
        stream::iter(cached).chain(live).boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().sender.receiver_count()
    }

    pub fn replay_cache(&self) -> Vec<T> {
        self.lock().replay.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
