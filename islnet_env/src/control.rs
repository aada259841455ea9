//! Network control abstraction over the emulated substrate.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ControlError;
use crate::types::{Edge, NodeId};

/// One end of a switch-to-switch link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceHandle {
    /// Switch that owns the interface
    pub node: NodeId,

    /// Substrate name of the interface (e.g. `s3-s7`)
    pub name: String,
}

impl InterfaceHandle {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self {
            node,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A realized link: the edge plus the two interfaces backing it.
///
/// Handles are owned by the control implementation; engines only keep
/// them around to hand back on removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    /// Canonical edge this link realizes
    pub edge: Edge,

    /// Interface on the lower-id switch
    pub low: InterfaceHandle,

    /// Interface on the higher-id switch
    pub high: InterfaceHandle,
}

impl LinkHandle {
    /// Both interfaces, lower-id switch first.
    pub fn interfaces(&self) -> [&InterfaceHandle; 2] {
        [&self.low, &self.high]
    }
}

/// Abstraction for the operations the engines need from the substrate.
///
/// # Implementations
///
/// - **Production**: `OvsControl` - Open vSwitch bridges + network namespaces
/// - **Simulation**: `MemoryNetwork` - in-memory graph with fault injection
///
/// # Ownership
///
/// Methods take `&self`; implementations use interior mutability. The
/// driver is the only caller that mutates links, the attack injector and
/// traffic generator only run commands on hosts.
#[async_trait]
pub trait NetworkControl: Send + Sync + 'static {
    /// Returns the current switch-to-switch links keyed by edge.
    ///
    /// Host attachment links are never reported.
    async fn list_links(&self) -> Result<BTreeMap<Edge, LinkHandle>, ControlError>;

    /// Creates a link between the switches of `a` and `b`.
    ///
    /// The new interfaces start deactivated.
    async fn add_link(&self, a: NodeId, b: NodeId) -> Result<LinkHandle, ControlError>;

    /// Deletes a link and both of its interfaces.
    async fn delete_link(&self, link: &LinkHandle) -> Result<(), ControlError>;

    /// Brings an interface up and attaches it to its switch.
    async fn activate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError>;

    /// Detaches an interface from its switch and brings it down.
    async fn deactivate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError>;

    /// Returns the address of the host attached to `node`.
    async fn host_address(&self, node: NodeId) -> Result<IpAddr, ControlError>;

    /// Runs a shell command on the host of `node` and returns its output.
    ///
    /// Blocks until the command exits or `timeout` elapses.
    async fn run_on_host(
        &self,
        node: NodeId,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ControlError>;

    /// Starts a long-running shell command on the host of `node` without
    /// waiting for it.
    async fn spawn_on_host(&self, node: NodeId, command: &str) -> Result<(), ControlError>;
}
