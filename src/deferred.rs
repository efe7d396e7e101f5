//! Deferred results: a handle to work that is already running, whose value
//! (or failure) is only observed when it is read.

use crate::error::TaskError;
use futures::future::{join_all, try_join_all};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle returned by [`crate::scope::TaskScope::spawn`].
///
/// A failing task does not raise anything where it was spawned; the failure
/// is returned by [`Deferred::await_result`].
#[derive(Debug)]
pub struct Deferred<T> {
    handle: JoinHandle<Result<T, TaskError>>,
    token: CancellationToken,
}

impl<T> Deferred<T> {
    pub(crate) fn new(handle: JoinHandle<Result<T, TaskError>>, token: CancellationToken) -> Self {
        Self { handle, token }
    }

    /// Suspend until the task finishes and hand back its outcome.
    pub async fn await_result(self) -> Result<T, TaskError> {
        self.handle.await?
    }

    /// Request cancellation; the task stops at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Wait for every deferred result and return the values in operand order.
///
/// Fails as soon as any operand fails and cancels the ones still running.
pub async fn await_all<T>(deferreds: Vec<Deferred<T>>) -> Result<Vec<T>, TaskError> {
    let tokens: Vec<CancellationToken> = deferreds.iter().map(|d| d.token.clone()).collect();

    let result = try_join_all(deferreds.into_iter().map(Deferred::await_result)).await;
    if let Err(err) = &result {
        tracing::debug!(error = %err, pending = tokens.len(), "await_all failed, cancelling the rest");
        for token in &tokens {
            token.cancel();
        }
    }
    result
}

/// Wait for every deferred result, keeping each outcome separately.
pub async fn await_all_settled<T>(deferreds: Vec<Deferred<T>>) -> Vec<Result<T, TaskError>> {
    join_all(deferreds.into_iter().map(Deferred::await_result)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::TaskScope;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn delayed(scope: &TaskScope, ms: u64, value: u32) -> Deferred<u32> {
        scope.spawn(async move {
            sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_all_keeps_operand_order() {
        let scope = TaskScope::new();
        let start = Instant::now();

        let results = await_all(vec![
            delayed(&scope, 100, 1),
            delayed(&scope, 200, 2),
            delayed(&scope, 50, 3),
        ])
        .await
        .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(results, vec![1, 2, 3]);
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_deferred_until_read() {
        let scope = TaskScope::supervised();
        let deferred: Deferred<u32> = scope.spawn(async {
            sleep(Duration::from_millis(10)).await;
            Err(TaskError::failed("bad input"))
        });

        sleep(Duration::from_millis(50)).await;
        assert!(deferred.is_finished());
        assert_eq!(
            deferred.await_result().await,
            Err(TaskError::Failed("bad input".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_all_fails_fast_and_cancels_rest() {
        let scope = TaskScope::supervised();
        let slow_finished = Arc::new(AtomicBool::new(false));
        let flag = slow_finished.clone();

        let slow = scope.spawn(async move {
            sleep(Duration::from_millis(500)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        });
        let failing = scope.spawn(async {
            sleep(Duration::from_millis(20)).await;
            Err::<u32, _>(TaskError::failed("boom"))
        });

        let start = Instant::now();
        let err = await_all(vec![slow, failing]).await.unwrap_err();
        assert_eq!(err, TaskError::Failed("boom".to_string()));
        assert!(start.elapsed() < Duration::from_millis(100));

        sleep(Duration::from_millis(1_000)).await;
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_all_settled_isolates_failures() {
        let scope = TaskScope::supervised();
        let ok = delayed(&scope, 30, 7);
        let bad = scope.spawn(async { Err::<u32, _>(TaskError::failed("nope")) });

        let results = await_all_settled(vec![ok, bad]).await;
        assert_eq!(results[0], Ok(7));
        assert_eq!(results[1], Err(TaskError::Failed("nope".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single_deferred() {
        let scope = TaskScope::new();
        let deferred = delayed(&scope, 1_000, 1);
        deferred.cancel();
        assert!(deferred.is_cancelled());
        assert_eq!(deferred.await_result().await, Err(TaskError::Cancelled));
    }
}
