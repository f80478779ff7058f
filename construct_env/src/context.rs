//! Core environment context trait for Construct controllers.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for clock and task interaction.
///
/// This trait abstracts the "real world" so that the pulsing scheduler and
/// the batch retry loops can run against the wall clock in production and
/// against a virtual clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` (in `construct_sim`) - virtual clock that
///   advances on `sleep`
///
/// Network I/O is never routed through the context: read deadlines on
/// connections always use the real clock.
#[async_trait]
pub trait ConstructContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for tick boundaries and the pulsing deadline.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Suspends until `deadline` (measured on this context's clock).
    ///
    /// Returns immediately if the deadline already passed.
    async fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now).await;
        }
    }

    /// Spawns a task and returns its join handle.
    ///
    /// The name is attached to the task's tracing span.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}
