//! Simulation driver - the tick loop and its state machine.
//!
//! ```text
//! Initializing ──► Running ──► Draining ──► Stopped
//!                     │            ▲
//!                     └────────────┘  horizon / schedule end / cancel / control failure
//! ```
//!
//! Each interval: reconcile the live links against the schedule, probe the
//! ground station, record metrics, checkpoint every K intervals, sleep one
//! tick. The tick is a fixed sleep, so an interval takes tick + processing.

use islnet_core::{
    AttackInjector, AttackTargets, ConnectivitySchedule, LiveTopology, MetricsRecord,
    MetricsRecorder, Prober, Reconciler, start_background_traffic,
};
use islnet_env::{ControlError, NetworkControl, SimulationContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RunConfig};

/// Lifecycle of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Why the tick loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured interval limit was passed
    HorizonReached,

    /// The schedule has no more intervals
    ScheduleExhausted,

    /// Cancellation was requested
    Cancelled,

    /// Control operations kept failing
    ControlFailure,
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot read the live topology: {0}")]
    Control(#[from] ControlError),

    #[error("Driver has already run")]
    AlreadyRun,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Intervals reconciled, probed and recorded
    pub intervals_completed: u64,

    pub stop_reason: StopReason,

    /// Time from the first interval to draining
    pub total_elapsed: Duration,

    /// Whether the final tables were written
    pub finalized: bool,

    /// Intervals in which at least one control operation failed
    pub incomplete_intervals: u64,
}

/// Runs a schedule against a network.
pub struct SimulationDriver<Ctx: SimulationContext, Net: NetworkControl> {
    ctx: Arc<Ctx>,
    network: Arc<Net>,
    schedule: ConnectivitySchedule,
    config: RunConfig,
    recorder: MetricsRecorder,
    state: DriverState,
}

impl<Ctx: SimulationContext, Net: NetworkControl> SimulationDriver<Ctx, Net> {
    pub fn new(
        ctx: Arc<Ctx>,
        network: Arc<Net>,
        schedule: ConnectivitySchedule,
        config: RunConfig,
    ) -> Self {
        let recorder = MetricsRecorder::new(config.output_dir.clone());
        Self {
            ctx,
            network,
            schedule,
            config,
            recorder,
            state: DriverState::Initializing,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Runs the whole lifecycle.
    ///
    /// `cancel` is checked once at the top of every interval, so a
    /// cancellation takes effect after at most one interval plus one tick.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunReport, DriverError> {
        if self.state != DriverState::Initializing {
            return Err(DriverError::AlreadyRun);
        }

        let mut live = self.initialize().await?;

        self.state = DriverState::Running;
        let started = self.ctx.now();
        let (intervals_completed, incomplete_intervals, stop_reason) =
            self.run_intervals(&mut live, cancel).await;

        self.state = DriverState::Draining;
        let total_elapsed = self.ctx.now().saturating_sub(started);
        info!(
            intervals = intervals_completed,
            reason = ?stop_reason,
            "Simulation done | total duration {:.2}s",
            total_elapsed.as_secs_f64()
        );

        let finalized = match self.recorder.finalize() {
            Ok((metrics, pings)) => {
                info!(metrics = %metrics.display(), pings = %pings.display(), "Wrote final metrics");
                true
            }
            Err(e) => {
                error!("Failed to write final metrics: {}", e);
                false
            }
        };

        self.state = DriverState::Stopped;
        Ok(RunReport {
            intervals_completed,
            stop_reason,
            total_elapsed,
            finalized,
            incomplete_intervals,
        })
    }

    async fn initialize(&mut self) -> Result<LiveTopology, DriverError> {
        let node_count = self.schedule.node_count();
        self.config.validate(node_count)?;

        let live = LiveTopology::from_links(self.network.list_links().await?);
        if !live.is_empty() {
            warn!(links = live.len(), "Live topology is not empty at start, adopting it");
        }

        if let Some(profile) = &self.config.traffic {
            let started = start_background_traffic(
                self.network.as_ref(),
                self.schedule.nodes(),
                self.config.ground_station,
                profile,
            )
            .await;
            if let Err(e) = started {
                warn!("Background traffic not started: {}", e);
            }
        }

        self.start_attack().await;

        if !self.config.warmup.is_zero() {
            info!("Waiting {:.0}s before the first interval", self.config.warmup.as_secs_f64());
            self.ctx.sleep(self.config.warmup).await;
        }

        info!(
            nodes = node_count,
            intervals = self.schedule.interval_count(),
            limit = self.config.interval_limit,
            tick_secs = self.config.tick.as_secs_f64(),
            "Simulation initialized"
        );
        Ok(live)
    }

    /// Resolves the attack targets once and hands the injector to its own task.
    async fn start_attack(&self) {
        let Some(spec) = self.config.attack_spec(self.schedule.node_count()) else {
            return;
        };

        let targets = match AttackTargets::resolve(self.network.as_ref(), spec.attacker, spec.victim).await {
            Ok(targets) => targets,
            Err(e) => {
                error!(kind = %spec.kind, "Cannot resolve attack targets, running without attack: {}", e);
                return;
            }
        };

        info!(
            kind = %spec.kind,
            attacker = %spec.attacker.host_name(),
            victim = %spec.victim.host_name(),
            "{} attack scheduled",
            spec.kind.description()
        );

        let injector = AttackInjector::new(
            spec.kind,
            targets,
            spec.params,
            self.config.attack_command_timeout,
        );
        let network = Arc::clone(&self.network);
        self.ctx.spawn("attack", async move {
            injector.run(network.as_ref()).await;
        });
    }

    async fn run_intervals(
        &mut self,
        live: &mut LiveTopology,
        cancel: &CancellationToken,
    ) -> (u64, u64, StopReason) {
        let mut completed = 0u64;
        let mut incomplete = 0u64;
        let mut consecutive_failures = 0u32;

        for t in 0u64.. {
            if cancel.is_cancelled() {
                info!(interval = t, "Cancellation requested");
                return (completed, incomplete, StopReason::Cancelled);
            }
            if t > self.config.interval_limit {
                return (completed, incomplete, StopReason::HorizonReached);
            }
            let Some(snapshot) = usize::try_from(t).ok().and_then(|i| self.schedule.snapshot(i)) else {
                return (completed, incomplete, StopReason::ScheduleExhausted);
            };

            let wall_start = self.ctx.now();
            let cpu_start = self.ctx.cpu_time();
            let outcome = Reconciler::new(self.network.as_ref()).apply(snapshot, live).await;
            let wall_elapsed = self.ctx.now().saturating_sub(wall_start);
            let cpu_elapsed = self.ctx.cpu_time().saturating_sub(cpu_start);

            if outcome.is_complete() {
                consecutive_failures = 0;
            } else {
                incomplete += 1;
                consecutive_failures += 1;
                warn!(
                    interval = t,
                    failures = outcome.failures.len(),
                    consecutive = consecutive_failures,
                    "Reconciliation incomplete"
                );
            }

            let probe_start = self.ctx.now();
            let pings = Prober::new(self.network.as_ref(), self.config.probe.clone())
                .probe_all(live, self.config.ground_station)
                .await;
            let probe_duration = self.ctx.now().saturating_sub(probe_start);

            let record = MetricsRecord {
                interval: t,
                added: outcome.added.len() as u64,
                removed: outcome.removed.len() as u64,
                wall_elapsed: wall_elapsed.as_secs_f64(),
                cpu_elapsed: cpu_elapsed.as_secs_f64(),
                probe_duration: probe_duration.as_secs_f64(),
            };
            info!(
                "Interval {} | added {} | removed {} | time {:.2}s ({:.2}s cpu) | probes {:.2}s",
                t, record.added, record.removed, record.wall_elapsed, record.cpu_elapsed, record.probe_duration
            );
            if let Err(e) = self.recorder.record(record, pings) {
                warn!("Dropping metrics of interval {}: {}", t, e);
            }
            completed += 1;

            if t % self.config.checkpoint_every == 0 {
                if let Err(e) = self.recorder.checkpoint() {
                    warn!("Checkpoint failed: {}", e);
                }
            }

            if consecutive_failures >= self.config.max_failed_intervals {
                error!(
                    intervals = consecutive_failures,
                    "Control operations keep failing, stopping the run"
                );
                return (completed, incomplete, StopReason::ControlFailure);
            }

            debug!(interval = t, live_links = live.len(), "Sleeping until next interval");
            self.ctx.sleep(self.config.tick).await;
        }

        (completed, incomplete, StopReason::HorizonReached)
    }
}
