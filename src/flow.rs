//! Cold, restartable streams.
//!
//! A [`Flow`] is a recipe: nothing runs until it is collected, and every
//! collection runs the producer again from the start. The producer hands
//! values over through an [`Emitter`]; `emit` only returns once the consumer
//! asks for the next value, so dropping the consumer stops production right
//! where it is.

use crate::error::{FlowError, TaskError};
use crate::scope::{Job, TaskScope};
use crate::shared::SharedFlow;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

pub type FlowResult<T> = Result<T, FlowError>;

type Factory<T> = dyn Fn() -> BoxStream<'static, FlowResult<T>> + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Milestone 1: Producer side (Emitter + hand-off stream)
// =============================================================================

pub struct Emitter<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Emitter<T> {
    /// Hand `value` to the consumer and suspend until it asks for more.
    pub async fn emit(&self, value: T) {
        *lock(&self.slot) = Some(value);
        HandOff { parked: false }.await
    }

    /// Re-emit everything `source` produces; its failure becomes ours.
    pub async fn emit_all(&self, source: &Flow<T>) -> FlowResult<()>
    where
        T: Send + 'static,
    {
        let mut upstream = source.open();
        while let Some(item) = upstream.next().await {
            self.emit(item?).await;
        }
        Ok(())
    }
}

/// Pending exactly once. The stream below only polls the producer again
/// after the parked value was taken, so the second poll means "consumed".
struct HandOff {
    parked: bool,
}

impl Future for HandOff {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.parked {
            Poll::Ready(())
        } else {
            self.parked = true;
            Poll::Pending
        }
    }
}

struct ProducerStream<T> {
    slot: Arc<Mutex<Option<T>>>,
    producer: Option<BoxFuture<'static, FlowResult<()>>>,
}

impl<T> Stream for ProducerStream<T> {
    type Item = FlowResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(value) = lock(&this.slot).take() {
            return Poll::Ready(Some(Ok(value)));
        }

        let Some(producer) = this.producer.as_mut() else {
            return Poll::Ready(None);
        };

        let polled = producer.as_mut().poll(cx);
        match polled {
            Poll::Ready(result) => {
                this.producer = None;
                match result {
                    Ok(()) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
            Poll::Pending => match lock(&this.slot).take() {
                Some(value) => Poll::Ready(Some(Ok(value))),
                None => Poll::Pending,
            },
        }
    }
}

/// Build a cold flow from a producer. The producer runs once per collection.
///
/// ```ignore
/// let numbers = flow(|out| async move {
///     for i in 1..=3 {
///         out.emit(i).await;
///     }
///     Ok(())
/// });
/// ```
pub fn flow<T, F, Fut>(producer: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    Flow::from_factory(move || {
        let slot = Arc::new(Mutex::new(None));
        let emitter = Emitter { slot: slot.clone() };
        ProducerStream {
            slot,
            producer: Some(Box::pin(producer(emitter))),
        }
        .boxed()
    })
}

// =============================================================================
// Milestone 2: Flow, constructors and terminal operators
// =============================================================================

pub struct Flow<T> {
    factory: Arc<Factory<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, FlowResult<T>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_factory(move || stream::iter(items.clone().into_iter().map(Ok)).boxed())
    }

    pub fn empty() -> Self {
        Self::from_factory(|| stream::empty().boxed())
    }

    pub fn failing(err: FlowError) -> Self {
        Self::from_factory(move || stream::once(future::ready(Err(err.clone()))).boxed())
    }

    /// Start a fresh run of the producer.
    pub fn open(&self) -> BoxStream<'static, FlowResult<T>> {
        (self.factory)()
    }

    pub async fn collect<F>(&self, mut action: F) -> FlowResult<()>
    where
        F: FnMut(T),
    {
        let mut upstream = self.open();
        while let Some(item) = upstream.next().await {
            action(item?);
        }
        Ok(())
    }

    /// Like [`Flow::collect`] with a suspending action; the producer waits
    /// for each action to finish before producing the next value.
    pub async fn for_each<F, Fut>(&self, mut action: F) -> FlowResult<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut upstream = self.open();
        while let Some(item) = upstream.next().await {
            action(item?).await;
        }
        Ok(())
    }

    pub async fn to_vec(&self) -> FlowResult<Vec<T>> {
        let mut values = Vec::new();
        self.collect(|value| values.push(value)).await?;
        Ok(values)
    }

    /// First value, then the producer is cancelled.
    pub async fn first(&self) -> FlowResult<Option<T>> {
        self.open().next().await.transpose()
    }

    pub async fn fold<A, F>(&self, init: A, mut step: F) -> FlowResult<A>
    where
        F: FnMut(A, T) -> A,
    {
        let mut upstream = self.open();
        let mut acc = init;
        while let Some(item) = upstream.next().await {
            acc = step(acc, item?);
        }
        Ok(acc)
    }

    /// Collect this flow inside `scope` and broadcast every value on `target`.
    pub fn share_in(&self, scope: &TaskScope, target: &SharedFlow<T>) -> Job
    where
        T: Clone,
    {
        let upstream = self.clone();
        let target = target.clone();
        scope.launch(async move {
            upstream
                .collect(|value| {
                    target.emit(value);
                })
                .await
                .map_err(TaskError::from)
        })
    }

    // =========================================================================
    // Milestone 3: Element-wise operators
    // =========================================================================

    pub fn map<U, F>(&self, transform: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let transform = Arc::new(transform);
        Flow::from_factory(move || {
            let transform = transform.clone();
            upstream
                .open()
                .map(move |item| item.map(|value| transform(value)))
                .boxed()
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Flow<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        Flow::from_factory(move || {
            let predicate = predicate.clone();
            upstream
                .open()
                .filter(move |item| {
                    let keep = match item {
                        Ok(value) => predicate(value),
                        Err(_) => true,
                    };
                    future::ready(keep)
                })
                .boxed()
        })
    }

    pub fn on_each<F>(&self, action: F) -> Flow<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let action = Arc::new(action);
        Flow::from_factory(move || {
            let action = action.clone();
            upstream
                .open()
                .inspect(move |item| {
                    if let Ok(value) = item {
                        action(value);
                    }
                })
                .boxed()
        })
    }

    /// At most `count` values; the producer is dropped as soon as the last
    /// one is handed over.
    pub fn take(&self, count: usize) -> Flow<T> {
        let upstream = self.clone();
        Flow::from_factory(move || upstream.open().take(count).boxed())
    }

    // =========================================================================
    // Milestone 4: Backpressure (buffer / conflate)
    // =========================================================================

    /// Run the producer in its own task, up to `capacity` values ahead of
    /// the consumer.
    pub fn buffer(&self, capacity: usize) -> Flow<T> {
        let upstream = self.clone();
        flow(move |out| {
            let upstream = upstream.clone();
            async move {
                let (mut rx, _guard) = spawn_upstream(upstream, capacity);
                while let Some(item) = rx.recv().await {
                    out.emit(item?).await;
                }
                Ok(())
            }
        })
    }

    /// Run the producer in its own task; a consumer that falls behind only
    /// sees the most recent value.
    pub fn conflate(&self) -> Flow<T> {
        let upstream = self.clone();
        flow(move |out| {
            let upstream = upstream.clone();
            async move {
                let latest = Arc::new(Latest::new());
                let _guard = spawn_conflating(upstream, latest.clone());
                while let Some(item) = latest.next().await {
                    out.emit(item?).await;
                }
                Ok(())
            }
        })
    }

    // =========================================================================
    // Milestone 5: Time-based operators
    // =========================================================================

    /// Drop values that are followed by another value within `window`. The
    /// last value is emitted when upstream completes.
    pub fn debounce(&self, window: Duration) -> Flow<T> {
        let upstream = self.clone();
        flow(move |out| {
            let upstream = upstream.clone();
            async move {
                let (mut rx, _guard) = spawn_upstream(upstream, 1);
                let mut pending: Option<T> = None;
                let quiet = tokio::time::sleep(window);
                tokio::pin!(quiet);

                loop {
                    tokio::select! {
                        item = rx.recv() => match item {
                            Some(Ok(value)) => {
                                pending = Some(value);
                                quiet.as_mut().reset(Instant::now() + window);
                            }
                            Some(Err(err)) => return Err(err),
                            None => {
                                if let Some(value) = pending.take() {
                                    out.emit(value).await;
                                }
                                return Ok(());
                            }
                        },
                        _ = &mut quiet, if pending.is_some() => {
                            if let Some(value) = pending.take() {
                                out.emit(value).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Emit the most recent value once per `period`, if one arrived since the
    /// previous tick. A value still pending when upstream completes is dropped.
    pub fn sample(&self, period: Duration) -> Flow<T> {
        let upstream = self.clone();
        flow(move |out| {
            let upstream = upstream.clone();
            async move {
                let (mut rx, _guard) = spawn_upstream(upstream, 1);
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut latest: Option<T> = None;

                loop {
                    tokio::select! {
                        item = rx.recv() => match item {
                            Some(Ok(value)) => latest = Some(value),
                            Some(Err(err)) => return Err(err),
                            None => return Ok(()),
                        },
                        _ = ticker.tick() => {
                            if let Some(value) = latest.take() {
                                out.emit(value).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Fail with [`FlowError::Timeout`] when upstream takes longer than
    /// `bound` to produce its next value (or to complete).
    pub fn timeout(&self, bound: Duration) -> Flow<T> {
        let upstream = self.clone();
        flow(move |out| {
            let upstream = upstream.clone();
            async move {
                let mut values = upstream.open();
                loop {
                    match tokio::time::timeout(bound, values.next()).await {
                        Ok(Some(item)) => out.emit(item?).await,
                        Ok(None) => return Ok(()),
                        Err(_) => return Err(FlowError::Timeout(bound)),
                    }
                }
            }
        })
    }

    // =========================================================================
    // Milestone 6: Error handling (catch / retry)
    // =========================================================================

    /// On upstream failure, continue with the flow returned by `handler`.
    /// Values emitted before the failure are kept.
    pub fn catch<F>(&self, handler: F) -> Flow<T>
    where
        F: Fn(&FlowError) -> Flow<T> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let handler = Arc::new(handler);
        flow(move |out| {
            let upstream = upstream.clone();
            let handler = handler.clone();
            async move {
                let mut values = upstream.open();
                while let Some(item) = values.next().await {
                    match item {
                        Ok(value) => out.emit(value).await,
                        Err(err) => {
                            tracing::debug!(error = %err, "flow failed, switching to fallback");
                            drop(values);
                            return out.emit_all(&handler(&err)).await;
                        }
                    }
                }
                Ok(())
            }
        })
    }

    pub fn on_error_return(&self, fallback: T) -> Flow<T>
    where
        T: Clone + Sync,
    {
        self.catch(move |_| Flow::from_iter(vec![fallback.clone()]))
    }

    /// Re-run the whole producer up to `retries` more times after a failure.
    pub fn retry(&self, retries: u32) -> Flow<T> {
        self.retry_when(move |_, attempt| attempt < retries)
    }

    /// Re-run the whole producer while `predicate(error, attempt)` holds;
    /// `attempt` counts the retries already made.
    pub fn retry_when<P>(&self, predicate: P) -> Flow<T>
    where
        P: Fn(&FlowError, u32) -> bool + Send + Sync + 'static,
    {
        self.retrying(predicate, None)
    }

    pub fn retry_with(&self, policy: RetryPolicy) -> Flow<T> {
        let retries = policy.max_retries;
        self.retrying(move |_, attempt| attempt < retries, Some(policy))
    }

    fn retrying<P>(&self, predicate: P, policy: Option<RetryPolicy>) -> Flow<T>
    where
        P: Fn(&FlowError, u32) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        flow(move |out| {
            let upstream = upstream.clone();
            let predicate = predicate.clone();
            let policy = policy.clone();
            async move {
                let mut attempt = 0u32;
                'restart: loop {
                    let mut values = upstream.open();
                    while let Some(item) = values.next().await {
                        match item {
                            Ok(value) => out.emit(value).await,
                            Err(err) if predicate(&err, attempt) => {
                                tracing::debug!(error = %err, attempt, "retrying flow");
                                drop(values);
                                if let Some(policy) = &policy {
                                    tokio::time::sleep(policy.backoff_duration(attempt)).await;
                                }
                                attempt += 1;
                                continue 'restart;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    return Ok(());
                }
            }
        })
    }
}

// =============================================================================
// Helpers: upstream collectors running in their own task
// =============================================================================

fn spawn_upstream<T: Send + 'static>(
    upstream: Flow<T>,
    capacity: usize,
) -> (mpsc::Receiver<FlowResult<T>>, DropGuard) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let token = CancellationToken::new();
    let stop = token.clone();

    tokio::spawn(async move {
        let mut values = upstream.open();
        loop {
            let item = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                item = values.next() => item,
            };
            let Some(item) = item else { break };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    (rx, token.drop_guard())
}

struct Latest<T> {
    state: Mutex<LatestState<T>>,
    notify: Notify,
}

struct LatestState<T> {
    value: Option<FlowResult<T>>,
    done: bool,
}

impl<T> Latest<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(LatestState {
                value: None,
                done: false,
            }),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: FlowResult<T>) {
        lock(&self.state).value = Some(item);
        self.notify.notify_one();
    }

    fn finish(&self) {
        lock(&self.state).done = true;
        self.notify.notify_one();
    }

    async fn next(&self) -> Option<FlowResult<T>> {
        loop {
            {
                let mut state = lock(&self.state);
                if let Some(item) = state.value.take() {
                    return Some(item);
                }
                if state.done {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

fn spawn_conflating<T: Send + 'static>(upstream: Flow<T>, latest: Arc<Latest<T>>) -> DropGuard {
    let token = CancellationToken::new();
    let stop = token.clone();

    tokio::spawn(async move {
        let mut values = upstream.open();
        loop {
            let item = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                item = values.next() => item,
            };
            match item {
                Some(item) => {
                    let failed = item.is_err();
                    latest.push(item);
                    if failed {
                        break;
                    }
                }
                None => break,
            }
        }
        latest.finish();
    });

    token.drop_guard()
}

// =============================================================================
// Retry policy (exponential backoff + optional jitter)
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .initial_backoff
            .saturating_mul(multiplier)
            .min(self.max_backoff);
        if self.jitter {
            let mut rng = rand::thread_rng();
            capped.mul_f64(rng.gen_range(0.9..1.1))
        } else {
            capped
        }
    }
}
