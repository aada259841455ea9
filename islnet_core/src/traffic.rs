//! Background bulk traffic towards the ground station.
//!
//! Started once at setup: the ground station runs a TCP sink and every
//! other host runs a detached loop pushing random bundles to it.

use islnet_env::{ControlError, NetworkControl, NodeId};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{info, warn};

/// Shape of the generated load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficProfile {
    /// Sink port on the ground station
    pub port: u16,

    /// Bundles each host sends before stopping
    pub bundles: u32,

    /// `dd` block size of one bundle (e.g. `20M`)
    pub bundle_size: String,

    /// Pause between bundles, in seconds
    pub period_secs: u64,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            port: 5789,
            bundles: 1441,
            bundle_size: "20M".to_string(),
            period_secs: 60,
        }
    }
}

impl TrafficProfile {
    pub fn sink_command(&self) -> String {
        format!("nc -lk -p {} > /dev/null 2>&1", self.port)
    }

    pub fn sender_command(&self, sink: IpAddr) -> String {
        format!(
            "for i in $(seq 1 {}); do dd if=/dev/urandom count=1 bs={} 2>/dev/null | nc -w 5 {} {}; sleep {}; done",
            self.bundles, self.bundle_size, sink, self.port, self.period_secs
        )
    }
}

/// Starts the sink and one sender per non-ground-station node.
///
/// Returns the number of senders started. A sender that fails to start is
/// logged and skipped; failing to start the sink is an error.
pub async fn start_background_traffic<N: NetworkControl + ?Sized>(
    control: &N,
    nodes: impl IntoIterator<Item = NodeId>,
    ground_station: NodeId,
    profile: &TrafficProfile,
) -> Result<usize, ControlError> {
    let sink = control.host_address(ground_station).await?;
    control.spawn_on_host(ground_station, &profile.sink_command()).await?;

    let command = profile.sender_command(sink);
    let mut started = 0;
    for node in nodes.into_iter().filter(|n| *n != ground_station) {
        match control.spawn_on_host(node, &command).await {
            Ok(()) => started += 1,
            Err(e) => warn!(host = %node.host_name(), "Failed to start traffic sender: {}", e),
        }
    }

    info!(senders = started, sink = %sink, port = profile.port, "Background traffic started");
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use islnet_env::{ControlOp, MemoryNetwork};

    #[test]
    fn test_commands() {
        let profile = TrafficProfile::default();
        assert_eq!(profile.sink_command(), "nc -lk -p 5789 > /dev/null 2>&1");

        let sender = profile.sender_command("10.0.0.1".parse().unwrap());
        assert!(sender.starts_with("for i in $(seq 1 1441);"));
        assert!(sender.contains("bs=20M"));
        assert!(sender.contains("nc -w 5 10.0.0.1 5789"));
        assert!(sender.ends_with("sleep 60; done"));
    }

    #[tokio::test]
    async fn test_start_spawns_sink_then_senders() {
        let net = MemoryNetwork::new(4);
        let started = start_background_traffic(
            &net,
            (0..4).map(NodeId),
            NodeId(0),
            &TrafficProfile::default(),
        )
        .await
        .unwrap();

        assert_eq!(started, 3);
        let ops = net.ops();
        assert_eq!(ops.len(), 4);
        assert!(matches!(&ops[0], ControlOp::Spawn(NodeId(0), cmd) if cmd.starts_with("nc -lk")));
        assert!(ops[1..].iter().all(|op| matches!(op, ControlOp::Spawn(n, _) if *n != NodeId(0))));
    }

    #[tokio::test]
    async fn test_sink_failure_is_error() {
        let net = MemoryNetwork::new(3);
        net.set_fail_hosts(true);

        let result =
            start_background_traffic(&net, (0..3).map(NodeId), NodeId(0), &TrafficProfile::default())
                .await;
        assert!(result.is_err());
    }
}
