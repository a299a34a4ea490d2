//! Production implementation of GameContext using Tokio.

use crate::error::EnvError;
use crate::{GameContext, TaskHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> Result<TaskHandle, EnvError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EnvError::context(format!("cannot spawn '{}': {}", name, e)))?;
        let task = handle.spawn(future);
        Ok(TaskHandle::new(name, task.abort_handle()))
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_tokio_context_spawn_and_abort() {
        let ctx = TokioContext::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = ctx
            .spawn("delayed", async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let _ = tx.send(());
            })
            .unwrap();
        assert_eq!(handle.name(), "delayed");

        handle.abort();
        // The sender is dropped with the aborted task, closing the channel.
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_tokio_context_spawn_without_runtime_fails() {
        let ctx = TokioContext::new();
        let result = ctx.spawn("orphan", async {});

        assert!(matches!(result, Err(EnvError::ContextError(_))));
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
