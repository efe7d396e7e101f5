//! Structured task groups.
//!
//! Every task spawned through a [`TaskScope`] runs under a child of the
//! scope's cancellation token and is tracked by the scope (and by every
//! ancestor scope), so `join` cannot return while work is still running.

use crate::deferred::Deferred;
use crate::error::TaskError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type FailureHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// First failure cancels every sibling and is surfaced by `join`.
    FailFast,
    /// Failures stay with the task that produced them.
    Supervised,
}

#[derive(Clone, Copy)]
enum Origin {
    Launch,
    Spawn,
}

// =============================================================================
// Milestone 1: Scope, cancellation tree and task tracking
// =============================================================================

#[derive(Clone)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    mode: ScopeMode,
    token: CancellationToken,
    tracker: TaskTracker,
    first_failure: Mutex<Option<TaskError>>,
    handler: Mutex<Option<FailureHandler>>,
    parent: Option<TaskScope>,
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScope {
    pub fn new() -> Self {
        Self::build(ScopeMode::FailFast, CancellationToken::new(), None)
    }

    pub fn supervised() -> Self {
        Self::build(ScopeMode::Supervised, CancellationToken::new(), None)
    }

    fn build(mode: ScopeMode, token: CancellationToken, parent: Option<TaskScope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                mode,
                token,
                tracker: TaskTracker::new(),
                first_failure: Mutex::new(None),
                handler: Mutex::new(None),
                parent,
            }),
        }
    }

    /// Route failed `launch`es of this scope and of its children to
    /// `handler`, replacing any previous handler. Tasks already running
    /// report to it as well.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        *lock(&self.inner.handler) = Some(Arc::new(handler));
        self
    }

    /// Nested scope with the same mode. Cancelling `self` cancels the child;
    /// a fail-fast child reports its first failure up to a fail-fast parent.
    /// Without a handler of its own the child uses the nearest ancestor's.
    pub fn child(&self) -> TaskScope {
        Self::build(self.inner.mode, self.inner.token.child_token(), Some(self.clone()))
    }

    fn handler(&self) -> Option<FailureHandler> {
        let own = lock(&self.inner.handler).clone();
        own.or_else(|| self.inner.parent.as_ref().and_then(TaskScope::handler))
    }

    pub fn mode(&self) -> ScopeMode {
        self.inner.mode
    }

    /// Idempotent.
    pub fn cancel(&self) {
        if !self.inner.token.is_cancelled() {
            tracing::debug!(mode = ?self.inner.mode, "cancelling scope");
        }
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled. Long-running loops can select on
    /// this to check for cancellation cooperatively.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    pub fn first_failure(&self) -> Option<TaskError> {
        lock(&self.inner.first_failure).clone()
    }

    pub fn active_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Run `body` in a [`TaskScope::child`] of this scope and wait for its
    /// tasks. Cancelling `self` cancels the block, and `self.join()` waits
    /// for the block's tasks too.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> Result<T, TaskError>
    where
        F: FnOnce(TaskScope) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        run_scoped(self.child(), body).await
    }

    // =========================================================================
    // Milestone 2: Spawning work
    // =========================================================================

    /// Fire-and-forget unit of work.
    pub fn launch<F>(&self, work: F) -> Job
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Job {
            inner: self.start(work, Origin::Launch),
        }
    }

    /// Unit of work whose result is read later through the returned handle.
    pub fn spawn<F, T>(&self, work: F) -> Deferred<T>
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        self.start(work, Origin::Spawn)
    }

    fn start<F, T>(&self, work: F, origin: Origin) -> Deferred<T>
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.inner.token.child_token();
        let task_token = token.clone();
        let scope = self.clone();

        let body = async move {
            let outcome = tokio::select! {
                biased;
                _ = task_token.cancelled() => Err(TaskError::Cancelled),
                result = AssertUnwindSafe(work).catch_unwind() => {
                    result.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic))))
                }
            };
            if let Err(err) = &outcome {
                scope.on_failure(err, origin);
            }
            outcome
        };

        let handle = tokio::spawn(self.track(Box::pin(body)));
        Deferred::new(handle, token)
    }

    fn track<T: Send + 'static>(&self, fut: BoxFuture<'static, T>) -> BoxFuture<'static, T> {
        let mut fut = fut;
        let mut scope = Some(self);
        while let Some(current) = scope {
            fut = Box::pin(current.inner.tracker.track_future(fut));
            scope = current.inner.parent.as_ref();
        }
        fut
    }

    fn on_failure(&self, err: &TaskError, origin: Origin) {
        if err.is_cancellation() {
            return;
        }

        if let Origin::Launch = origin {
            match (self.handler(), self.inner.mode) {
                (Some(handler), _) => handler(err),
                (None, ScopeMode::Supervised) => {
                    tracing::error!(error = %err, "unhandled failure in supervised scope")
                }
                (None, ScopeMode::FailFast) => {}
            }
        }

        if self.inner.mode == ScopeMode::FailFast {
            self.record_failure(err);
        }
    }

    fn record_failure(&self, err: &TaskError) {
        {
            let mut first = lock(&self.inner.first_failure);
            if first.is_none() {
                tracing::debug!(error = %err, "first failure, cancelling siblings");
                *first = Some(err.clone());
            }
        }
        self.inner.token.cancel();

        if let Some(parent) = &self.inner.parent {
            if parent.inner.mode == ScopeMode::FailFast {
                parent.record_failure(err);
            }
        }
    }

    // =========================================================================
    // Milestone 3: Joining
    // =========================================================================

    /// Wait for every task started so far, including tasks of child scopes.
    ///
    /// Fail-fast scopes return their first failure; a scope cancelled
    /// without a failure returns `TaskError::Cancelled`.
    pub async fn join(&self) -> Result<(), TaskError> {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();

        if let Some(err) = self.first_failure() {
            return Err(err);
        }
        if self.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// Handle returned by [`TaskScope::launch`].
#[derive(Debug)]
pub struct Job {
    inner: Deferred<()>,
}

impl Job {
    pub async fn join(self) -> Result<(), TaskError> {
        self.inner.await_result().await
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

// =============================================================================
// Milestone 4: Scoped blocks, timeouts and dispatchers
// =============================================================================

/// Run `body` with a fresh fail-fast scope and wait for all of its tasks.
///
/// If a task fails, the body is dropped at its next suspension point and the
/// task's failure is returned.
pub async fn coroutine_scope<F, Fut, T>(body: F) -> Result<T, TaskError>
where
    F: FnOnce(TaskScope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    run_scoped(TaskScope::new(), body).await
}

/// Like [`coroutine_scope`] but task failures do not affect the body or the
/// other tasks.
pub async fn supervisor_scope<F, Fut, T>(body: F) -> Result<T, TaskError>
where
    F: FnOnce(TaskScope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    run_scoped(TaskScope::supervised(), body).await
}

async fn run_scoped<F, Fut, T>(scope: TaskScope, body: F) -> Result<T, TaskError>
where
    F: FnOnce(TaskScope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let token = scope.inner.token.clone();
    // Dropping the block half-way cancels whatever it started.
    let _cancel_on_drop = token.clone().drop_guard();
    let outcome = tokio::select! {
        biased;
        result = body(scope.clone()) => result,
        _ = token.cancelled() => Err(TaskError::Cancelled),
    };

    if outcome.is_err() {
        scope.cancel();
    }
    let joined = scope.join().await;

    match outcome {
        Ok(value) => joined.map(|_| value),
        // A failure inside the body beats the cancellation it caused.
        Err(TaskError::Cancelled) => Err(scope.first_failure().unwrap_or(TaskError::Cancelled)),
        Err(err) => Err(err),
    }
}

pub async fn with_timeout<F, T>(limit: Duration, work: F) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>>,
{
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| TaskError::Timeout(limit))?
}

pub async fn with_timeout_or_none<F>(limit: Duration, work: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::time::timeout(limit, work).await.ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatcher {
    /// Async worker threads; for short, non-blocking work.
    Default,
    /// The blocking pool; for file IO or CPU-heavy closures.
    Blocking,
}

pub async fn run_on<F, T>(dispatcher: Dispatcher, work: F) -> Result<T, TaskError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let value = match dispatcher {
        Dispatcher::Default => tokio::spawn(async move { work() }).await?,
        Dispatcher::Blocking => tokio::task::spawn_blocking(work).await?,
    };
    Ok(value)
}
