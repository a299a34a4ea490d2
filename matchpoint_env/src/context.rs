//! Core environment context trait for Matchpoint components.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

use crate::error::EnvError;

/// Handle to a task spawned through a [`GameContext`].
///
/// Dropping the handle does NOT cancel the task; call [`TaskHandle::abort`].
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    inner: tokio::task::AbortHandle,
}

impl TaskHandle {
    /// Wraps a tokio abort handle.
    pub fn new(name: impl Into<String>, inner: tokio::task::AbortHandle) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Cancels the task. A task that already finished is unaffected.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Returns true once the task has run to completion or been aborted.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Returns the name the task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The central interface for Environment Interaction.
///
/// This trait abstracts the runtime so that the game engine can run
/// against the wall clock in production and against a virtual clock
/// in the simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`
/// - **Simulation**: `SimContext` - virtual clock, seeded `ChaCha8Rng`
#[async_trait]
pub trait GameContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for envelope timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends the calling task for the given duration.
    ///
    /// Never blocks the thread: other tasks keep running.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns a cancellable handle.
    ///
    /// # Errors
    /// `EnvError::ContextError` when the task cannot be enqueued
    /// (e.g. no runtime is available on the calling thread).
    fn spawn<F>(&self, name: &str, future: F) -> Result<TaskHandle, EnvError>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;

    /// Milliseconds since the UNIX epoch according to `system_time()`.
    fn timestamp_ms(&self) -> u64 {
        self.system_time()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
