//! Simulation context implementing SimulationContext for deterministic testing.

use async_trait::async_trait;
use islnet_env::SimulationContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Simulation context backed by virtual clocks.
///
/// This implements `SimulationContext` using:
/// - A virtual wall clock that only moves on `sleep` or `advance_time`
/// - A virtual CPU clock that only moves on `charge_cpu`
///
/// A full production-length run therefore completes instantly.
pub struct SimContext {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Virtual CPU time consumed (nanoseconds)
    cpu_time_ns: Arc<Mutex<u64>>,

    /// Names of spawned background tasks, in spawn order
    spawned: Arc<Mutex<Vec<String>>>,
}

impl SimContext {
    /// Creates a new SimContext at virtual time zero.
    pub fn new() -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            cpu_time_ns: Arc::new(Mutex::new(0)),
            spawned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time += duration.as_nanos() as u64;
    }

    /// Adds CPU time as if the process had been busy.
    pub fn charge_cpu(&self, duration: Duration) {
        let mut cpu = self.cpu_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *cpu += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of the tasks spawned so far.
    pub fn spawned_tasks(&self) -> Vec<String> {
        self.spawned.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            cpu_time_ns: Arc::clone(&self.cpu_time_ns),
            spawned: Arc::clone(&self.spawned),
        }
    }
}

#[async_trait]
impl SimulationContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn cpu_time(&self) -> Duration {
        Duration::from_nanos(*self.cpu_time_ns.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping advances virtual time, then yields so spawned tasks get to run
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning background task");
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
        tokio::spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new();
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let ctx = SimContext::new();
        ctx.sleep(Duration::from_secs(60)).await;
        ctx.sleep(Duration::from_secs(60)).await;
        assert_eq!(ctx.now(), Duration::from_secs(120));
        assert_eq!(ctx.cpu_time(), Duration::ZERO);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new();
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));
        ctx1.charge_cpu(Duration::from_millis(3));

        // Both should see the same clocks
        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.cpu_time(), Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_spawn_is_recorded() {
        let ctx = SimContext::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        ctx.spawn("attack", async move {
            let _ = tx.send(());
        });

        rx.await.unwrap();
        assert_eq!(ctx.spawned_tasks(), vec!["attack".to_string()]);
    }
}
