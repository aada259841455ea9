//! Connectivity schedule: the precomputed time-indexed ISL visibility graphs.
//!
//! The input is a binary `(N, N, T)` array where slice `[:, :, t]` is the
//! adjacency matrix of interval `t`. A cell is an active link iff it equals 1.

use islnet_env::{Edge, NodeId};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::npy;

/// The undirected graph of active links at one interval.
pub type Snapshot = BTreeSet<Edge>;

/// Errors raised while loading a schedule.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The file could not be read
    #[error("Failed to read schedule {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON schedule did not parse
    #[error("Invalid JSON schedule: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary schedule did not parse
    #[error("Invalid .npy schedule: {0}")]
    Format(String),

    /// The array does not have shape (N, N, T)
    #[error("Invalid schedule shape: {0}")]
    Shape(String),

    /// File extension is neither .npy nor .json
    #[error("Unsupported schedule format: {0}")]
    UnsupportedFormat(String),
}

/// An immutable sequence of per-interval link sets over a fixed node set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySchedule {
    /// Number of nodes (first dimension of the input)
    node_count: u32,

    /// One edge set per interval
    snapshots: Vec<Snapshot>,
}

impl ConnectivitySchedule {
    /// Builds a schedule from a cell accessor over an `(n, n, t)` cube.
    ///
    /// Diagonal cells are ignored and asymmetric cells are merged into
    /// an undirected link.
    pub fn from_fn(
        node_count: usize,
        interval_count: usize,
        cell: impl Fn(usize, usize, usize) -> f64,
    ) -> Result<Self, ScheduleError> {
        if node_count == 0 || interval_count == 0 {
            return Err(ScheduleError::Shape(format!(
                "expected at least one node and one interval, got ({node_count}, {node_count}, {interval_count})"
            )));
        }
        let node_count_u32 = u32::try_from(node_count)
            .map_err(|_| ScheduleError::Shape(format!("{node_count} nodes is too many")))?;

        let mut asymmetric = 0usize;
        let snapshots = (0..interval_count)
            .map(|t| {
                let mut snapshot = Snapshot::new();
                for i in 0..node_count {
                    for j in (i + 1)..node_count {
                        let forward = cell(i, j, t) == 1.0;
                        let backward = cell(j, i, t) == 1.0;
                        if forward != backward {
                            asymmetric += 1;
                        }
                        if forward || backward {
                            if let Some(edge) = Edge::new(i as u32, j as u32) {
                                snapshot.insert(edge);
                            }
                        }
                    }
                }
                snapshot
            })
            .collect();

        if asymmetric > 0 {
            warn!(cells = asymmetric, "Schedule is not symmetric, using the union of both directions");
        }

        Ok(Self {
            node_count: node_count_u32,
            snapshots,
        })
    }

    /// Builds a schedule directly from per-interval edge sets.
    pub fn from_snapshots(node_count: u32, snapshots: Vec<Snapshot>) -> Result<Self, ScheduleError> {
        if node_count == 0 || snapshots.is_empty() {
            return Err(ScheduleError::Shape("empty schedule".to_string()));
        }
        for (t, snapshot) in snapshots.iter().enumerate() {
            if let Some(edge) = snapshot.iter().find(|e| e.high().0 >= node_count) {
                return Err(ScheduleError::Shape(format!(
                    "interval {t} references {edge} outside {node_count} nodes"
                )));
            }
        }
        Ok(Self {
            node_count,
            snapshots,
        })
    }

    /// Loads a schedule, choosing the decoder from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ScheduleError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let schedule = match path.extension().and_then(|e| e.to_str()) {
            Some("npy") => Self::from_npy_bytes(&bytes)?,
            Some("json") => Self::from_json_slice(&bytes)?,
            other => {
                return Err(ScheduleError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        info!(
            path = %path.display(),
            nodes = schedule.node_count,
            intervals = schedule.interval_count(),
            "Loaded connectivity schedule"
        );
        Ok(schedule)
    }

    /// Decodes a NumPy `(N, N, T)` array.
    pub fn from_npy_bytes(bytes: &[u8]) -> Result<Self, ScheduleError> {
        let array = npy::parse_npy(bytes)?;
        match array.shape.as_slice() {
            &[n, m, t] if n == m => {
                Self::from_fn(n, t, |i, j, k| array.get(&[i, j, k]).unwrap_or(0.0))
            }
            shape => Err(ScheduleError::Shape(format!("expected (N, N, T), got {shape:?}"))),
        }
    }

    /// Decodes a dense nested JSON array `[N][N][T]`.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ScheduleError> {
        let cube: Vec<Vec<Vec<f64>>> = serde_json::from_slice(bytes)?;
        let n = cube.len();
        let t = cube.first().and_then(|row| row.first()).map(Vec::len).unwrap_or(0);

        for (i, row) in cube.iter().enumerate() {
            if row.len() != n {
                return Err(ScheduleError::Shape(format!(
                    "row {i} has {} columns, expected {n}",
                    row.len()
                )));
            }
            if let Some(j) = row.iter().position(|series| series.len() != t) {
                return Err(ScheduleError::Shape(format!(
                    "cell ({i}, {j}) has {} intervals, expected {t}",
                    row[j].len()
                )));
            }
        }

        Self::from_fn(n, t, |i, j, k| cube[i][j][k])
    }

    /// Number of nodes in every snapshot.
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Number of intervals in the schedule.
    pub fn interval_count(&self) -> usize {
        self.snapshots.len()
    }

    /// All node ids, in order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count).map(NodeId)
    }

    /// Returns the link set of interval `t`, if it exists.
    pub fn snapshot(&self, t: usize) -> Option<&Snapshot> {
        self.snapshots.get(t)
    }
}
