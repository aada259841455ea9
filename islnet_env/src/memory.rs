//! In-memory emulated substrate with fault injection.
//!
//! Keeps the link graph and interface state in memory, logs every
//! operation, and answers `ping` from graph reachability so the whole
//! driver loop can run without a kernel-level substrate.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::control::{InterfaceHandle, LinkHandle, NetworkControl};
use crate::error::ControlError;
use crate::types::{Edge, NodeId};

/// A single operation observed by the in-memory substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    ListLinks,
    AddLink(Edge),
    DeleteLink(Edge),
    Activate(String),
    Deactivate(String),
    Run(NodeId, String),
    Spawn(NodeId, String),
}

impl ControlOp {
    /// True for operations that change links or interfaces.
    pub fn mutates_topology(&self) -> bool {
        matches!(
            self,
            ControlOp::AddLink(_) | ControlOp::DeleteLink(_) | ControlOp::Activate(_) | ControlOp::Deactivate(_)
        )
    }
}

struct Inner {
    /// Realized links
    links: BTreeMap<Edge, LinkHandle>,

    /// Interfaces currently up
    up: HashSet<String>,

    /// Edges whose add/delete fail
    failing_edges: HashSet<Edge>,

    /// Interfaces whose activate/deactivate fail
    failing_interfaces: HashSet<String>,

    /// Every link/interface operation fails
    fail_all: bool,

    /// Every host command fails
    fail_hosts: bool,

    /// Scripted outputs overriding the synthetic ping, per source node
    scripted: HashMap<NodeId, String>,

    /// Operation log
    ops: Vec<ControlOp>,

    /// RNG for synthetic round-trip times
    rng: ChaCha8Rng,
}

/// In-memory implementation of [`NetworkControl`].
///
/// Host `n` has address `10.0.0.{n+1}`, matching the usual emulator
/// numbering, so ping targets can be mapped back to nodes.
pub struct MemoryNetwork {
    node_count: u32,
    inner: Mutex<Inner>,
}

impl MemoryNetwork {
    /// Creates an empty substrate with `node_count` nodes.
    pub fn new(node_count: u32) -> Self {
        Self::with_seed(node_count, 42)
    }

    /// Creates an empty substrate with a specific RTT seed.
    pub fn with_seed(node_count: u32, seed: u64) -> Self {
        Self {
            node_count,
            inner: Mutex::new(Inner {
                links: BTreeMap::new(),
                up: HashSet::new(),
                failing_edges: HashSet::new(),
                failing_interfaces: HashSet::new(),
                fail_all: false,
                fail_hosts: false,
                scripted: HashMap::new(),
                ops: Vec::new(),
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_for(edge: Edge) -> LinkHandle {
        let (low, high) = edge.endpoints();
        LinkHandle {
            edge,
            low: InterfaceHandle::new(low, format!("s{}-eth{}", low.0, high.0)),
            high: InterfaceHandle::new(high, format!("s{}-eth{}", high.0, low.0)),
        }
    }

    /// Number of nodes in the substrate.
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Makes add/delete of `edge` fail until healed.
    pub fn fail_edge(&self, edge: Edge) {
        self.inner().failing_edges.insert(edge);
    }

    /// Makes activate/deactivate of the named interface fail until healed.
    pub fn fail_interface(&self, name: &str) {
        self.inner().failing_interfaces.insert(name.to_string());
    }

    /// Makes every link and interface operation fail (or stop failing).
    pub fn set_fail_all(&self, fail: bool) {
        self.inner().fail_all = fail;
    }

    /// Makes every host command fail (or stop failing).
    pub fn set_fail_hosts(&self, fail: bool) {
        self.inner().fail_hosts = fail;
    }

    /// Clears all injected faults.
    pub fn heal_all(&self) {
        let mut inner = self.inner();
        inner.failing_edges.clear();
        inner.failing_interfaces.clear();
        inner.fail_all = false;
        inner.fail_hosts = false;
    }

    /// Replaces the output of every command run on `node` with `output`.
    pub fn script_output(&self, node: NodeId, output: impl Into<String>) {
        self.inner().scripted.insert(node, output.into());
    }

    /// Inserts a link directly, bypassing the operation log (both ends up).
    pub fn seed_link(&self, edge: Edge) {
        let handle = Self::handle_for(edge);
        let mut inner = self.inner();
        inner.up.insert(handle.low.name.clone());
        inner.up.insert(handle.high.name.clone());
        inner.links.insert(edge, handle);
    }

    /// Returns a copy of the operation log.
    pub fn ops(&self) -> Vec<ControlOp> {
        self.inner().ops.clone()
    }

    /// Clears the operation log.
    pub fn clear_ops(&self) {
        self.inner().ops.clear();
    }

    /// Commands issued on hosts (run and spawn), in order.
    pub fn host_commands(&self) -> Vec<(NodeId, String)> {
        self.inner()
            .ops
            .iter()
            .filter_map(|op| match op {
                ControlOp::Run(node, cmd) | ControlOp::Spawn(node, cmd) => Some((*node, cmd.clone())),
                _ => None,
            })
            .collect()
    }

    /// Current link set.
    pub fn edges(&self) -> Vec<Edge> {
        self.inner().links.keys().copied().collect()
    }

    /// Returns true if the named interface is up.
    pub fn is_up(&self, iface: &str) -> bool {
        self.inner().up.contains(iface)
    }

    fn address_of(node: NodeId) -> Option<Ipv4Addr> {
        let host = node.0.checked_add(1)?;
        if host > 254 {
            return None;
        }
        Some(Ipv4Addr::new(10, 0, 0, host as u8))
    }

    fn node_of(addr: &str) -> Option<NodeId> {
        let addr: Ipv4Addr = addr.parse().ok()?;
        let [a, b, c, d] = addr.octets();
        if (a, b, c) != (10, 0, 0) || d == 0 {
            return None;
        }
        Some(NodeId(u32::from(d) - 1))
    }

    fn check_link_faults(inner: &Inner, operation: &str, edge: Option<Edge>) -> Result<(), ControlError> {
        if inner.fail_all {
            return Err(ControlError::failed(operation, "injected substrate failure"));
        }
        if let Some(edge) = edge {
            if inner.failing_edges.contains(&edge) {
                return Err(ControlError::failed(operation, format!("injected failure on {edge}")));
            }
        }
        Ok(())
    }

    fn check_interface_faults(inner: &Inner, operation: &str, iface: &InterfaceHandle) -> Result<(), ControlError> {
        if inner.failing_interfaces.contains(&iface.name) {
            return Err(ControlError::failed(operation, format!("injected failure on {}", iface.name)));
        }
        Ok(())
    }

    /// Hop count between two nodes over links whose interfaces are both up.
    fn hops(inner: &Inner, from: NodeId, to: NodeId) -> Option<u32> {
        if from == to {
            return Some(0);
        }

        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for handle in inner.links.values() {
            if inner.up.contains(&handle.low.name) && inner.up.contains(&handle.high.name) {
                let (a, b) = handle.edge.endpoints();
                adjacency.entry(a).or_default().push(b);
                adjacency.entry(b).or_default().push(a);
            }
        }

        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0u32)]);
        while let Some((node, depth)) = queue.pop_front() {
            for &next in adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                if next == to {
                    return Some(depth + 1);
                }
                if seen.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        None
    }

    /// Emulates `ping -c N ... <addr>` with iputils-style output.
    fn synthetic_ping(inner: &mut Inner, source: NodeId, command: &str) -> String {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let count = tokens
            .windows(2)
            .find(|w| w[0] == "-c")
            .and_then(|w| w[1].parse::<u32>().ok())
            .unwrap_or(1)
            .max(1);
        let target_addr = tokens.last().copied().unwrap_or_default();

        let mut out = format!("PING {target_addr} ({target_addr}) 56(84) bytes of data.\n");
        let hops = Self::node_of(target_addr).and_then(|target| Self::hops(inner, source, target));

        match hops {
            Some(hops) => {
                let base = 0.05 + 0.08 * f64::from(hops);
                let rtts: Vec<f64> = (0..count)
                    .map(|_| base + inner.rng.gen_range(0.0..0.05))
                    .collect();
                for (seq, rtt) in rtts.iter().enumerate() {
                    let _ = writeln!(out, "64 bytes from {target_addr}: icmp_seq={} ttl=64 time={rtt:.3} ms", seq + 1);
                }
                let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
                let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
                let mdev = (rtts.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / rtts.len() as f64).sqrt();

                let _ = writeln!(out, "\n--- {target_addr} ping statistics ---");
                let _ = writeln!(
                    out,
                    "{count} packets transmitted, {count} received, 0% packet loss, time {}ms",
                    (count - 1) * 1000
                );
                let _ = writeln!(out, "rtt min/avg/max/mdev = {min:.3}/{avg:.3}/{max:.3}/{mdev:.3} ms");
            }
            None => {
                let own = Self::address_of(source).map(|a| a.to_string()).unwrap_or_default();
                for seq in 1..=count {
                    let _ = writeln!(out, "From {own} icmp_seq={seq} Destination Host Unreachable");
                }
                let _ = writeln!(out, "\n--- {target_addr} ping statistics ---");
                let _ = writeln!(
                    out,
                    "{count} packets transmitted, 0 received, +{count} errors, 100% packet loss, time {}ms",
                    count * 1000
                );
            }
        }
        out
    }
}

#[async_trait]
impl NetworkControl for MemoryNetwork {
    async fn list_links(&self) -> Result<BTreeMap<Edge, LinkHandle>, ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::ListLinks);
        Self::check_link_faults(&inner, "list_links", None)?;
        Ok(inner.links.clone())
    }

    async fn add_link(&self, a: NodeId, b: NodeId) -> Result<LinkHandle, ControlError> {
        let edge = Edge::new(a, b)
            .ok_or_else(|| ControlError::failed("add_link", format!("self-loop on node {a}")))?;
        let mut inner = self.inner();
        inner.ops.push(ControlOp::AddLink(edge));
        Self::check_link_faults(&inner, "add_link", Some(edge))?;

        if a.0 >= self.node_count || b.0 >= self.node_count {
            return Err(ControlError::failed("add_link", format!("no switch for {edge}")));
        }
        if inner.links.contains_key(&edge) {
            return Err(ControlError::failed("add_link", format!("{edge} already exists")));
        }

        let handle = Self::handle_for(edge);
        inner.links.insert(edge, handle.clone());
        Ok(handle)
    }

    async fn delete_link(&self, link: &LinkHandle) -> Result<(), ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::DeleteLink(link.edge));
        Self::check_link_faults(&inner, "delete_link", Some(link.edge))?;

        // Already gone counts as deleted
        inner.links.remove(&link.edge);
        inner.up.remove(&link.low.name);
        inner.up.remove(&link.high.name);
        Ok(())
    }

    async fn activate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::Activate(iface.name.clone()));
        Self::check_link_faults(&inner, "activate_interface", None)?;
        Self::check_interface_faults(&inner, "activate_interface", iface)?;
        inner.up.insert(iface.name.clone());
        Ok(())
    }

    async fn deactivate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::Deactivate(iface.name.clone()));
        Self::check_link_faults(&inner, "deactivate_interface", None)?;
        Self::check_interface_faults(&inner, "deactivate_interface", iface)?;
        inner.up.remove(&iface.name);
        Ok(())
    }

    async fn host_address(&self, node: NodeId) -> Result<IpAddr, ControlError> {
        Self::address_of(node)
            .map(IpAddr::V4)
            .ok_or_else(|| ControlError::failed("host_address", format!("no address for node {node}")))
    }

    async fn run_on_host(
        &self,
        node: NodeId,
        command: &str,
        _timeout: Duration,
    ) -> Result<String, ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::Run(node, command.to_string()));
        if inner.fail_hosts {
            return Err(ControlError::failed("run_on_host", format!("host {} unavailable", node.host_name())));
        }

        if let Some(output) = inner.scripted.get(&node) {
            return Ok(output.clone());
        }
        if command.trim_start().starts_with("ping ") {
            return Ok(Self::synthetic_ping(&mut inner, node, command));
        }
        Ok(String::new())
    }

    async fn spawn_on_host(&self, node: NodeId, command: &str) -> Result<(), ControlError> {
        let mut inner = self.inner();
        inner.ops.push(ControlOp::Spawn(node, command.to_string()));
        if inner.fail_hosts {
            return Err(ControlError::failed("spawn_on_host", format!("host {} unavailable", node.host_name())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: u32, b: u32) -> Edge {
        Edge::new(a, b).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_delete_links() {
        let net = MemoryNetwork::new(4);

        let handle = net.add_link(NodeId(2), NodeId(1)).await.unwrap();
        assert_eq!(handle.edge, edge(1, 2));
        assert_eq!(net.edges(), vec![edge(1, 2)]);

        // Duplicate add is rejected
        assert!(net.add_link(NodeId(1), NodeId(2)).await.is_err());

        net.delete_link(&handle).await.unwrap();
        assert!(net.edges().is_empty());

        // Deleting an absent link is a no-op
        net.delete_link(&handle).await.unwrap();
        assert!(net.edges().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let net = MemoryNetwork::new(4);
        net.fail_edge(edge(0, 1));

        assert!(net.add_link(NodeId(0), NodeId(1)).await.is_err());
        assert!(net.add_link(NodeId(1), NodeId(2)).await.is_ok());

        net.set_fail_all(true);
        assert!(net.add_link(NodeId(2), NodeId(3)).await.is_err());

        net.heal_all();
        assert!(net.add_link(NodeId(0), NodeId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_interface_fault_injection() {
        let net = MemoryNetwork::new(3);
        let handle = net.add_link(NodeId(1), NodeId(2)).await.unwrap();
        net.fail_interface("s2-eth1");

        assert!(net.activate_interface(&handle.low).await.is_ok());
        assert!(net.activate_interface(&handle.high).await.is_err());
        assert!(net.is_up("s1-eth2") && !net.is_up("s2-eth1"));

        net.heal_all();
        net.activate_interface(&handle.high).await.unwrap();
        assert!(net.is_up("s2-eth1"));
    }

    #[tokio::test]
    async fn test_ping_follows_active_links() {
        let net = MemoryNetwork::new(3);
        let timeout = Duration::from_secs(1);

        // Nothing connected yet
        let out = net.run_on_host(NodeId(2), "ping -c 2 -W 5 10.0.0.1", timeout).await.unwrap();
        assert!(out.contains("Destination Host Unreachable"));
        assert!(out.contains("2 packets transmitted, 0 received"));

        // Links exist but interfaces are down
        let a = net.add_link(NodeId(0), NodeId(1)).await.unwrap();
        let b = net.add_link(NodeId(1), NodeId(2)).await.unwrap();
        let out = net.run_on_host(NodeId(2), "ping -c 2 -W 5 10.0.0.1", timeout).await.unwrap();
        assert!(out.contains("Unreachable"));

        for iface in a.interfaces().into_iter().chain(b.interfaces()) {
            net.activate_interface(iface).await.unwrap();
        }
        let out = net.run_on_host(NodeId(2), "ping -c 2 -W 5 10.0.0.1", timeout).await.unwrap();
        assert!(out.contains("2 packets transmitted, 2 received"));
        assert!(out.contains("rtt min/avg/max/mdev = "));
    }

    #[tokio::test]
    async fn test_scripted_output_and_log() {
        let net = MemoryNetwork::new(2);
        net.script_output(NodeId(1), "garbage");

        let out = net.run_on_host(NodeId(1), "ping -c 2 10.0.0.1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "garbage");

        net.spawn_on_host(NodeId(0), "nc -lk -p 5789").await.unwrap();
        assert_eq!(
            net.host_commands(),
            vec![
                (NodeId(1), "ping -c 2 10.0.0.1".to_string()),
                (NodeId(0), "nc -lk -p 5789".to_string()),
            ]
        );
        assert!(net.ops().iter().all(|op| !op.mutates_topology()));
    }

    #[test]
    fn test_address_mapping() {
        assert_eq!(MemoryNetwork::address_of(NodeId(0)), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(MemoryNetwork::node_of("10.0.0.21"), Some(NodeId(20)));
        assert_eq!(MemoryNetwork::node_of("192.168.0.1"), None);
        assert_eq!(MemoryNetwork::address_of(NodeId(254)), None);
    }
}
