//! Scoped background tasks.
//!
//! Every timer-driven loop in this crate runs as a tokio task tied to a
//! [`CancellationToken`]. [`TaskGuard`] owns that pair: stopping it cancels the
//! token and waits for the task, dropping it cancels and aborts.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Owner of a cancellable background task.
#[derive(Debug)]
pub struct TaskGuard {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TaskGuard {
    /// Spawn `task` with a child of `parent`. The task receives its own token
    /// and must return once it is cancelled.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(task(token.clone()));
        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true while the task has not returned.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the task and wait for it to exit. Nothing the task does can land
    /// after this returns.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(task = self.name, ?err, "background task ended abnormally");
            }
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        trace!(task = self.name, "task guard dropped");
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn ticking(counter: Arc<AtomicU32>) -> impl FnOnce(CancellationToken) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        move |token| {
            Box::pin(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let parent = CancellationToken::new();
        let guard = TaskGuard::spawn("ticker", &parent, ticking(counter.clone()));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(guard.is_running());
        guard.stop().await;
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(seen, 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let parent = CancellationToken::new();
        let guard = TaskGuard::spawn("ticker", &parent, ticking(counter.clone()));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        drop(guard);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_reaches_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let parent = CancellationToken::new();
        let guard = TaskGuard::spawn("ticker", &parent, ticking(counter.clone()));
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!guard.is_running());
    }
}
