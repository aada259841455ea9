//! Common types for the islnet environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a satellite node.
///
/// A node is backed by exactly one host and one switch in the substrate.
/// Ids are dense (`0..N`) and fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the raw index.
    pub fn index(&self) -> u32 {
        self.0
    }

    /// Name of the host element (`h{n}`).
    pub fn host_name(&self) -> String {
        format!("h{}", self.0)
    }

    /// Name of the switch element (`s{n}`).
    pub fn switch_name(&self) -> String {
        format!("s{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An undirected inter-satellite link between two distinct nodes.
///
/// The smaller id is always stored first, so `(a, b)` and `(b, a)` compare,
/// hash and order identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    low: NodeId,
    high: NodeId,
}

impl Edge {
    /// Creates a canonical edge. Returns `None` for a self-loop.
    pub fn new(a: impl Into<NodeId>, b: impl Into<NodeId>) -> Option<Self> {
        let (a, b) = (a.into(), b.into());
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The endpoint with the smaller id.
    pub fn low(&self) -> NodeId {
        self.low
    }

    /// The endpoint with the larger id.
    pub fn high(&self) -> NodeId {
        self.high
    }

    /// Both endpoints, smaller id first.
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.low, self.high)
    }

    /// Returns true if `node` is one of the endpoints.
    pub fn touches(&self, node: NodeId) -> bool {
        self.low == node || self.high == node
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}
