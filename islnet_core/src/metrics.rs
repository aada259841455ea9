//! Per-interval metrics recording and persistence.
//!
//! Two append-only stores are kept in memory: one [`MetricsRecord`] per
//! interval, and the reachability results of that interval. Both are
//! written as CSV:
//! - `tmpmetrics.csv`: periodic checkpoint of the metrics table
//! - `metrics.csv`: final metrics table
//! - `pingmetrics.csv`: one column per interval, one probe cell per row

use islnet_env::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::probe::PingRecord;

pub const CHECKPOINT_FILE: &str = "tmpmetrics.csv";
pub const METRICS_FILE: &str = "metrics.csv";
pub const PING_METRICS_FILE: &str = "pingmetrics.csv";

/// Errors raised by the recorder.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Intervals must be recorded in strictly increasing order
    #[error("Interval {got} recorded after interval {previous}")]
    NonMonotonicInterval { previous: u64, got: u64 },

    /// Output directory could not be prepared
    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Measurements of one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    /// Interval index
    pub interval: u64,

    /// Links that took effect as additions
    pub added: u64,

    /// Links that left the live topology
    pub removed: u64,

    /// Wall-clock seconds spent reconciling
    pub wall_elapsed: f64,

    /// CPU seconds spent reconciling
    pub cpu_elapsed: f64,

    /// Wall-clock seconds spent probing
    pub probe_duration: f64,
}

/// Append-only metrics store with checkpoint/finalize persistence.
#[derive(Debug)]
pub struct MetricsRecorder {
    /// Directory receiving the CSV files
    output_dir: PathBuf,

    /// One record per interval, strictly increasing
    records: Vec<MetricsRecord>,

    /// Reachability results keyed by interval
    pings: BTreeMap<u64, BTreeMap<NodeId, PingRecord>>,
}

impl MetricsRecorder {
    /// Creates an empty recorder writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            records: Vec::new(),
            pings: BTreeMap::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Recorded metrics, in interval order.
    pub fn records(&self) -> &[MetricsRecord] {
        &self.records
    }

    /// Recorded reachability results.
    pub fn pings(&self) -> &BTreeMap<u64, BTreeMap<NodeId, PingRecord>> {
        &self.pings
    }

    /// Appends the results of one interval.
    pub fn record(
        &mut self,
        metrics: MetricsRecord,
        pings: BTreeMap<NodeId, PingRecord>,
    ) -> Result<(), RecorderError> {
        if let Some(last) = self.records.last() {
            if metrics.interval <= last.interval {
                return Err(RecorderError::NonMonotonicInterval {
                    previous: last.interval,
                    got: metrics.interval,
                });
            }
        }

        self.pings.insert(metrics.interval, pings);
        self.records.push(metrics);
        Ok(())
    }

    /// Writes the metrics recorded so far to the checkpoint file.
    ///
    /// In-memory state is left untouched.
    pub fn checkpoint(&self) -> Result<PathBuf, RecorderError> {
        let path = self.prepare(CHECKPOINT_FILE)?;
        self.write_metrics(&path)?;
        debug!(path = %path.display(), rows = self.records.len(), "Checkpointed metrics");
        Ok(path)
    }

    /// Writes the complete metrics and reachability tables.
    pub fn finalize(&self) -> Result<(PathBuf, PathBuf), RecorderError> {
        let metrics_path = self.prepare(METRICS_FILE)?;
        self.write_metrics(&metrics_path)?;

        let pings_path = self.prepare(PING_METRICS_FILE)?;
        self.write_pings(&pings_path)?;

        Ok((metrics_path, pings_path))
    }

    fn prepare(&self, file: &str) -> Result<PathBuf, RecorderError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| RecorderError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        Ok(self.output_dir.join(file))
    }

    fn write_metrics(&self, path: &Path) -> Result<(), RecorderError> {
        let mut writer = csv::Writer::from_path(path)?;
        if self.records.is_empty() {
            writer.write_record([
                "interval",
                "added",
                "removed",
                "wallElapsed",
                "cpuElapsed",
                "probeDuration",
            ])?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|source| RecorderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn write_pings(&self, path: &Path) -> Result<(), RecorderError> {
        let mut writer = csv::Writer::from_path(path)?;

        let columns: Vec<Vec<String>> = self
            .pings
            .values()
            .map(|probes| probes.iter().map(|(node, r)| r.format_cell(*node)).collect())
            .collect();
        let rows = columns.iter().map(Vec::len).max().unwrap_or(0);

        writer.write_record(self.pings.keys().map(|interval| interval.to_string()))?;
        for row in 0..rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|column| column.get(row).map(String::as_str).unwrap_or("")),
            )?;
        }
        writer.flush().map_err(|source| RecorderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(interval: u64, added: u64, removed: u64) -> MetricsRecord {
        MetricsRecord {
            interval,
            added,
            removed,
            wall_elapsed: 0.25,
            cpu_elapsed: 0.125,
            probe_duration: 1.5,
        }
    }

    fn pings(nodes: &[u32]) -> BTreeMap<NodeId, PingRecord> {
        nodes.iter().map(|n| (NodeId(*n), PingRecord::FAILURE)).collect()
    }

    #[test]
    fn test_record_requires_increasing_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = MetricsRecorder::new(dir.path());

        recorder.record(record(0, 2, 0), pings(&[1])).unwrap();
        recorder.record(record(1, 0, 1), pings(&[1])).unwrap();

        let err = recorder.record(record(1, 0, 0), pings(&[])).unwrap_err();
        assert!(matches!(err, RecorderError::NonMonotonicInterval { previous: 1, got: 1 }));
        assert_eq!(recorder.records().len(), 2);
        assert_eq!(recorder.pings().len(), 2);
    }

    #[test]
    fn test_checkpoint_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = MetricsRecorder::new(dir.path().join("out"));
        recorder.record(record(0, 3, 0), pings(&[1, 2])).unwrap();

        let path = recorder.checkpoint().unwrap();
        recorder.record(record(1, 1, 1), pings(&[1])).unwrap();
        recorder.checkpoint().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("interval,added,removed,wallElapsed,cpuElapsed,probeDuration")
        );
        assert_eq!(lines.next(), Some("0,3,0,0.25,0.125,1.5"));
        assert_eq!(lines.next(), Some("1,1,1,0.25,0.125,1.5"));
        assert_eq!(lines.next(), None);
        assert_eq!(recorder.records().len(), 2);
    }

    #[test]
    fn test_finalize_writes_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = MetricsRecorder::new(dir.path());

        recorder.record(record(0, 2, 0), pings(&[1, 2])).unwrap();
        recorder.record(record(1, 0, 2), pings(&[])).unwrap();
        recorder.record(record(2, 1, 0), pings(&[3])).unwrap();

        let (metrics, pings_path) = recorder.finalize().unwrap();

        let metrics = std::fs::read_to_string(metrics).unwrap();
        assert_eq!(metrics.lines().count(), 4);

        let table = std::fs::read_to_string(pings_path).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "0,1,2");
        assert_eq!(lines[1], "\"(h1,1,0,0,0,0,0)\",,\"(h3,1,0,0,0,0,0)\"");
        assert_eq!(lines[2], "\"(h2,1,0,0,0,0,0)\",,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_finalize_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MetricsRecorder::new(dir.path());

        let (metrics, _) = recorder.finalize().unwrap();
        let text = std::fs::read_to_string(metrics).unwrap();
        assert_eq!(text.trim(), "interval,added,removed,wallElapsed,cpuElapsed,probeDuration");
    }

    #[test]
    fn test_unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let recorder = MetricsRecorder::new(blocker.join("nested"));
        assert!(matches!(recorder.checkpoint(), Err(RecorderError::Io { .. })));
    }
}
