//! Command-backed control over an Open vSwitch + network namespace substrate.
//!
//! The substrate is provisioned beforehand: switch `n` is the OVS bridge
//! `s{n}` and host `n` is the network namespace `h{n}`, addressed as
//! `base + n + 1`. Inter-satellite links are veth pairs named
//! `s{a}-s{b}` / `s{b}-s{a}` that become OVS ports when activated.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::control::{InterfaceHandle, LinkHandle, NetworkControl};
use crate::error::ControlError;
use crate::types::{Edge, NodeId};

/// Settings for [`OvsControl`].
#[derive(Debug, Clone)]
pub struct OvsConfig {
    /// Prefix every command with `sudo`
    pub use_sudo: bool,

    /// Host `n` gets address `address_base + n + 1`
    pub address_base: Ipv4Addr,

    /// Timeout for link/interface commands
    pub command_timeout: Duration,
}

impl Default for OvsConfig {
    fn default() -> Self {
        Self {
            use_sudo: false,
            address_base: Ipv4Addr::new(10, 0, 0, 0),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Control implementation that shells out to `ip` and `ovs-vsctl`.
pub struct OvsControl {
    config: OvsConfig,
}

impl OvsControl {
    pub fn new(config: OvsConfig) -> Self {
        Self { config }
    }

    /// Name of the veth end living on switch `local` and facing `remote`.
    pub fn interface_name(local: NodeId, remote: NodeId) -> String {
        format!("s{}-s{}", local.0, remote.0)
    }

    fn handle_for(edge: Edge) -> LinkHandle {
        let (low, high) = edge.endpoints();
        LinkHandle {
            edge,
            low: InterfaceHandle::new(low, Self::interface_name(low, high)),
            high: InterfaceHandle::new(high, Self::interface_name(high, low)),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = if self.config.use_sudo {
            let mut c = Command::new("sudo");
            c.args(args);
            c
        } else {
            let mut c = Command::new(args[0]);
            c.args(&args[1..]);
            c
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run a command, returning raw output.
    async fn exec(&self, operation: &str, args: &[&str], timeout: Duration) -> Result<Output, ControlError> {
        let mut cmd = self.command(args);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ControlError::failed(operation, format!("{}: {e}", args.join(" ")))),
            Err(_) => Err(ControlError::timeout(operation, timeout)),
        }
    }

    /// Run a command, failing with its stderr if it exits non-zero.
    async fn exec_checked(&self, operation: &str, args: &[&str]) -> Result<String, ControlError> {
        let output = self.exec(operation, args, self.config.command_timeout).await?;
        if !output.status.success() {
            return Err(ControlError::failed(
                operation,
                format!(
                    "command failed: {}\n{}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for OvsControl {
    fn default() -> Self {
        Self::new(OvsConfig::default())
    }
}

/// True if `ip link` stderr reports that the device does not exist.
fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("Cannot find device")
}

/// Parses `ip -o link show type veth` output into inter-switch edges.
///
/// Lines look like `14: s3-s7@s7-s3: <BROADCAST,MULTICAST> mtu 1500 ...`.
/// Names that do not follow the `s{a}-s{b}` convention are ignored.
pub fn parse_veth_links(output: &str) -> Vec<Edge> {
    let mut edges: Vec<Edge> = output
        .lines()
        .filter_map(|line| {
            let name = line.split(": ").nth(1)?;
            let name = name.split('@').next()?;
            let (a, b) = name.strip_prefix('s')?.split_once("-s")?;
            Edge::new(a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)
        })
        .collect();
    edges.sort();
    edges.dedup();
    edges
}

#[async_trait]
impl NetworkControl for OvsControl {
    async fn list_links(&self) -> Result<BTreeMap<Edge, LinkHandle>, ControlError> {
        let stdout = self
            .exec_checked("list_links", &["ip", "-o", "link", "show", "type", "veth"])
            .await?;

        Ok(parse_veth_links(&stdout)
            .into_iter()
            .map(|edge| (edge, Self::handle_for(edge)))
            .collect())
    }

    async fn add_link(&self, a: NodeId, b: NodeId) -> Result<LinkHandle, ControlError> {
        let edge = Edge::new(a, b)
            .ok_or_else(|| ControlError::failed("add_link", format!("self-loop on node {a}")))?;
        let handle = Self::handle_for(edge);

        self.exec_checked(
            "add_link",
            &[
                "ip", "link", "add", &handle.low.name, "type", "veth", "peer", "name", &handle.high.name,
            ],
        )
        .await?;

        debug!(low = %handle.low, high = %handle.high, "created veth pair");
        Ok(handle)
    }

    async fn delete_link(&self, link: &LinkHandle) -> Result<(), ControlError> {
        // Deleting one end removes the peer as well
        let args = ["ip", "link", "del", link.low.name.as_str()];
        let output = self.exec("delete_link", &args, self.config.command_timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !is_missing_device(&stderr) {
                return Err(ControlError::failed(
                    "delete_link",
                    format!("command failed: {}\n{}", args.join(" "), stderr.trim()),
                ));
            }
            debug!(edge = %link.edge, "veth pair already gone");
            return Ok(());
        }
        debug!(edge = %link.edge, "deleted veth pair");
        Ok(())
    }

    async fn activate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError> {
        let bridge = iface.node.switch_name();
        self.exec_checked(
            "activate_interface",
            &["ovs-vsctl", "--may-exist", "add-port", &bridge, &iface.name],
        )
        .await?;
        self.exec_checked("activate_interface", &["ip", "link", "set", &iface.name, "up"])
            .await?;
        debug!(bridge, iface = %iface, "interface attached");
        Ok(())
    }

    async fn deactivate_interface(&self, iface: &InterfaceHandle) -> Result<(), ControlError> {
        let bridge = iface.node.switch_name();
        self.exec_checked(
            "deactivate_interface",
            &["ovs-vsctl", "--if-exists", "del-port", &bridge, &iface.name],
        )
        .await?;
        self.exec_checked("deactivate_interface", &["ip", "link", "set", &iface.name, "down"])
            .await?;
        debug!(bridge, iface = %iface, "interface detached");
        Ok(())
    }

    async fn host_address(&self, node: NodeId) -> Result<IpAddr, ControlError> {
        let base = u32::from(self.config.address_base);
        let addr = base
            .checked_add(node.0)
            .and_then(|v| v.checked_add(1))
            .ok_or_else(|| ControlError::failed("host_address", format!("node {node} outside address range")))?;
        Ok(IpAddr::V4(Ipv4Addr::from(addr)))
    }

    async fn run_on_host(
        &self,
        node: NodeId,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ControlError> {
        let host = node.host_name();
        let output = self
            .exec("run_on_host", &["ip", "netns", "exec", &host, "sh", "-c", command], timeout)
            .await?;

        // Probe tools report failures through their text, so a non-zero exit is not an error
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn spawn_on_host(&self, node: NodeId, command: &str) -> Result<(), ControlError> {
        let host = node.host_name();
        let mut cmd = self.command(&["ip", "netns", "exec", &host, "sh", "-c", command]);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(false);

        cmd.spawn()
            .map_err(|e| ControlError::failed("spawn_on_host", format!("{host}: {e}")))?;
        debug!(host, command, "started detached command");
        Ok(())
    }
}
