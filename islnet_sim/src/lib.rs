//! islnet Simulation Driver
//!
//! Ticks a connectivity schedule through an emulated network, one interval
//! at a time, while probes measure reachability towards a ground station and
//! an optional attack runs beside the loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SimulationDriver                      │
//! │                                                          │
//! │  Schedule[t] ──► Reconciler ──► Prober ──► Recorder      │
//! │                      │            │           │          │
//! │                      ▼            ▼           ▼          │
//! │               NetworkControl (links, host commands)  CSV │
//! │                      ▲                                   │
//! │                      │                                   │
//! │              AttackInjector (own task, host commands)    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use islnet_sim::{RunConfig, SimContext, SimulationDriver};
//! use islnet_env::MemoryNetwork;
//!
//! let schedule = ConnectivitySchedule::load("data/walker_delta_20.npy")?;
//! let network = Arc::new(MemoryNetwork::new(schedule.node_count()));
//! let mut driver = SimulationDriver::new(SimContext::shared(), network, schedule, RunConfig::test_mode());
//! let report = driver.run(&CancellationToken::new()).await?;
//! ```

mod config;
mod context;
mod driver;
mod exporter;

pub use config::{ConfigError, RunConfig};
pub use context::SimContext;
pub use driver::{DriverError, DriverState, RunReport, SimulationDriver, StopReason};
pub use exporter::{ReachabilityFrame, RunExport};
