//! Bounded async worker pool with cancellation and timeouts.
//!
//! Async facade calls are spawned as tokio tasks that must take a permit from
//! a shared semaphore before touching the database, so at most
//! `AsyncOptions::workers` run at once. Each task returns a [`QueryTask`]
//! handle that can be awaited or cancelled. Cancelling (or hitting the
//! timeout) drops the in-flight future, which returns its connection to the
//! pool and rolls back any open transaction.

use crate::config::AsyncOptions;
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Cooperative cancellation signal shared between a caller and its tasks.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for only returns on cancellation
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task overrides.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub timeout: Option<Duration>,
    pub token: Option<CancellationToken>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Handle to a spawned database task.
///
/// Awaiting yields the task's result. Dropping the handle detaches the task
/// without cancelling it.
#[derive(Debug)]
pub struct QueryTask<T> {
    id: Uuid,
    token: CancellationToken,
    handle: JoinHandle<DbResult<T>>,
}

impl<T> QueryTask<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. The task resolves to `DbError::Cancelled`
    /// unless it already finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for QueryTask<T> {
    type Output = DbResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => {
                Poll::Ready(Err(DbError::cancelled("async task aborted")))
            }
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(DbError::internal(format!("Async task panicked: {}", e))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsyncExecutor {
    permits: Arc<Semaphore>,
    workers: usize,
    default_timeout: Option<Duration>,
}

impl AsyncExecutor {
    pub fn new(options: &AsyncOptions) -> Self {
        let workers = options.workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            default_timeout: options.default_timeout(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits not currently held by running tasks.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn spawn<T, Fut>(&self, options: TaskOptions, work: Fut) -> QueryTask<T>
    where
        T: Send + 'static,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = options.token.unwrap_or_default();
        let timeout = options.timeout.or(self.default_timeout);
        let permits = Arc::clone(&self.permits);
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let run = async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| DbError::internal("Async worker pool is closed"))?;
                work.await
            };
            let bounded = async move {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, run)
                        .await
                        .unwrap_or_else(|_| Err(DbError::timeout("async task", limit))),
                    None => run.await,
                }
            };

            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    debug!(task_id = %id, "Async task cancelled");
                    Err(DbError::cancelled("async task"))
                }
                result = bounded => result,
            }
        });

        QueryTask { id, token, handle }
    }
}

impl Default for AsyncExecutor {
    fn default() -> Self {
        Self::new(&AsyncOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_completes() {
        let executor = AsyncExecutor::default();
        let task = executor.spawn(TaskOptions::new(), async { Ok(41 + 1) });
        assert_eq!(task.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancel_drops_work() {
        let executor = AsyncExecutor::default();
        let task = executor.spawn(TaskOptions::new(), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        task.cancel();
        assert!(task.token().is_cancelled());
        assert!(matches!(task.await, Err(DbError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_shared_token_cancels_several_tasks() {
        let executor = AsyncExecutor::default();
        let token = CancellationToken::new();
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        };
        let a = executor.spawn(TaskOptions::new().with_token(token.clone()), slow());
        let b = executor.spawn(TaskOptions::new().with_token(token.clone()), slow());
        token.cancel();
        assert!(a.await.is_err());
        assert!(b.await.is_err());
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = AsyncExecutor::default();
        let task = executor.spawn(
            TaskOptions::new().with_timeout(Duration::from_millis(20)),
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        );
        assert!(matches!(task.await, Err(DbError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let executor = AsyncExecutor::new(&AsyncOptions {
            workers: 1,
            default_timeout_secs: None,
        });
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let first = executor.spawn(TaskOptions::new(), async move {
            let _ = rx.await;
            Ok(1)
        });
        while executor.available() > 0 {
            tokio::task::yield_now().await;
        }
        let second = executor.spawn(
            TaskOptions::new().with_timeout(Duration::from_millis(30)),
            async { Ok(2) },
        );
        // The only permit is held by the first task
        assert!(matches!(second.await, Err(DbError::Timeout { .. })));
        tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(executor.available(), 1);
    }
}
