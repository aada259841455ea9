//! Core run context trait for the simulation driver.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for time and task control.
///
/// This trait abstracts the "real world" so that the driver loop can run
/// against the wall clock in production and against a virtual clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the process CPU clock
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep`
#[async_trait]
pub trait SimulationContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for the per-interval wall-clock measurements.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the CPU time consumed by this process so far.
    ///
    /// Only differences between two readings are meaningful.
    fn cpu_time(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Used for the units of work that run beside the tick loop
    /// (attack injection, background traffic).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
