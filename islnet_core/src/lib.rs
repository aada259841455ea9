//! islnet Core - Time-Varying ISL Topology Engine
//!
//! Keeps an emulated network's switch-to-switch links in step with a
//! precomputed satellite visibility schedule:
//! 1. **Schedule**: per-interval undirected link sets loaded from `.npy` or JSON
//! 2. **Reconciliation**: minimal remove-then-add diff against the live links
//! 3. **Probing**: ping every connected host towards the ground station and
//!    parse the output with a fail-closed grammar
//! 4. **Recording**: per-interval metrics and reachability tables as CSV
//!
//! Attack injection and background traffic run beside the tick loop and
//! only ever issue host commands.

mod npy;

pub mod attack;
pub mod metrics;
pub mod probe;
pub mod schedule;
pub mod topology;
pub mod traffic;

// Re-export key types for convenience
pub use attack::{AttackInjector, AttackKind, AttackParams, AttackReport, AttackSpec, AttackTargets};
pub use metrics::{MetricsRecord, MetricsRecorder, RecorderError};
pub use probe::{parse_ping_output, PingRecord, ProbeConfig, Prober};
pub use schedule::{ConnectivitySchedule, ScheduleError, Snapshot};
pub use topology::{
    reconcile, LiveTopology, ReconciliationOutcome, ReconciliationResult, Reconciler,
};
pub use traffic::{start_background_traffic, TrafficProfile};
