//! Single-shot boxed futures scheduled onto the executor.

use std::sync::Mutex;

use futures::future::BoxFuture;
use thiserror::Error;

/// Errors produced while driving a [`Task`].
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's future was already taken and run once before.
    #[error("task has already been run")]
    AlreadyRun,
}

/// A boxed, `'static` unit-returning future that can be handed to the
/// executor. Wrapping the future in a `Mutex<Option<_>>` lets a `Task` be
/// shared by reference while guaranteeing the inner future is polled to
/// completion exactly once.
pub struct Task {
    handler: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl Task {
    /// Wraps a future as a single-shot task.
    pub fn new<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            handler: Mutex::new(Some(Box::pin(future))),
        }
    }

    /// Takes the inner future and awaits it to completion. Returns
    /// [`TaskError::AlreadyRun`] if this task was already run.
    pub async fn run_once(&self) -> Result<(), TaskError> {
        let future = self
            .handler
            .lock()
            .expect("task handler mutex poisoned")
            .take()
            .ok_or(TaskError::AlreadyRun)?;
        future.await;
        Ok(())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_the_wrapped_future_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let task = Task::new(async move {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        task.run_once().await.expect("first run succeeds");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let err = task.run_once().await.expect_err("second run rejected");
        assert!(matches!(err, TaskError::AlreadyRun));
    }
}
