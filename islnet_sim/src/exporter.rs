//! JSON exporter for run summaries.
//!
//! Exports the per-interval metrics and the run outcome as a single JSON
//! document, for plotting alongside the CSV tables.

use islnet_core::{AttackKind, MetricsRecord, MetricsRecorder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::driver::{RunReport, StopReason};

/// Reachability of one interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityFrame {
    pub interval: u64,

    /// Hosts probed
    pub probed: usize,

    /// Hosts that got at least one reply
    pub reachable: usize,

    /// Mean of the average RTTs of reachable hosts (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_rtt_ms: Option<f64>,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Schedule file the run was driven by
    pub schedule: String,

    /// Number of scheduled nodes
    pub nodes: u32,

    pub attack: AttackKind,

    pub stop_reason: StopReason,

    pub intervals_completed: u64,

    pub incomplete_intervals: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    pub finalized: bool,

    /// Per-interval metrics
    pub metrics: Vec<MetricsRecord>,

    /// Per-interval reachability summary
    pub reachability: Vec<ReachabilityFrame>,
}

impl RunExport {
    /// Builds an export from a finished run.
    pub fn new(
        schedule: &str,
        nodes: u32,
        attack: AttackKind,
        report: &RunReport,
        recorder: &MetricsRecorder,
    ) -> Self {
        let reachability = recorder
            .pings()
            .iter()
            .map(|(interval, probes)| {
                let reachable: Vec<f64> = probes
                    .values()
                    .filter(|r| r.received > 0)
                    .map(|r| r.rtt_avg)
                    .collect();
                ReachabilityFrame {
                    interval: *interval,
                    probed: probes.len(),
                    reachable: reachable.len(),
                    mean_rtt_ms: (!reachable.is_empty())
                        .then(|| reachable.iter().sum::<f64>() / reachable.len() as f64),
                }
            })
            .collect();

        Self {
            schedule: schedule.to_string(),
            nodes,
            attack,
            stop_reason: report.stop_reason,
            intervals_completed: report.intervals_completed,
            incomplete_intervals: report.incomplete_intervals,
            duration_sec: report.total_elapsed.as_secs_f64(),
            finalized: report.finalized,
            metrics: recorder.records().to_vec(),
            reachability,
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
