//! Reachability probing and the ping output grammar.
//!
//! Probe output is free text from an external round-trip-time tool. It is
//! read with a three-stage grammar where the first failing stage decides:
//!
//! 1. an "unreachable" hint anywhere (case-insensitive) -> failure
//! 2. `<sent> packets transmitted, <received> [packets] received` -> else failure
//! 3. `rtt min/avg/max/mdev = <a>/<b>/<c>/<d> ms` -> else failure
//!
//! Nothing in here can panic on arbitrary input; everything degrades to
//! [`PingRecord::FAILURE`].

use islnet_env::{NetworkControl, NodeId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::topology::LiveTopology;

static UNREACHABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)unreachable").expect("valid regex"));
static PACKETS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+)( packets)? received").expect("valid regex")
});
static RTT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rtt min/avg/max/mdev = (\d+\.\d+)/(\d+\.\d+)/(\d+\.\d+)/(\d+\.\d+) ms")
        .expect("valid regex")
});

/// Result of one probe from a host to the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    pub sent: u32,
    pub received: u32,
    pub rtt_min: f64,
    pub rtt_avg: f64,
    pub rtt_max: f64,
    pub rtt_dev: f64,
}

impl PingRecord {
    /// Conservative record used whenever the output cannot be trusted.
    pub const FAILURE: PingRecord = PingRecord {
        sent: 1,
        received: 0,
        rtt_min: 0.0,
        rtt_avg: 0.0,
        rtt_max: 0.0,
        rtt_dev: 0.0,
    };

    pub fn is_failure(&self) -> bool {
        *self == Self::FAILURE
    }

    /// Renders the `(host, sent, received, min, avg, max, dev)` cell.
    pub fn format_cell(&self, node: NodeId) -> String {
        format!(
            "({},{},{},{},{},{},{})",
            node.host_name(),
            self.sent,
            self.received,
            self.rtt_min,
            self.rtt_avg,
            self.rtt_max,
            self.rtt_dev
        )
    }
}

/// Stage 1: an unreachable hint wins over everything else.
fn reports_unreachable(text: &str) -> bool {
    UNREACHABLE_RE.is_match(text)
}

/// Stage 2: transmitted/received counts.
fn packet_counts(text: &str) -> Option<(u32, u32)> {
    let caps = PACKETS_RE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Stage 3: the round-trip summary line.
fn round_trip(text: &str) -> Option<[f64; 4]> {
    let caps = RTT_RE.captures(text)?;
    let mut values = [0.0; 4];
    for (slot, i) in values.iter_mut().zip(1..=4) {
        *slot = caps[i].parse().ok()?;
    }
    Some(values)
}

/// Parses ping output into a [`PingRecord`].
pub fn parse_ping_output(text: &str) -> PingRecord {
    if reports_unreachable(text) {
        return PingRecord::FAILURE;
    }
    let Some((sent, received)) = packet_counts(text) else {
        return PingRecord::FAILURE;
    };
    let Some([rtt_min, rtt_avg, rtt_max, rtt_dev]) = round_trip(text) else {
        return PingRecord::FAILURE;
    };

    PingRecord {
        sent,
        received,
        rtt_min,
        rtt_avg,
        rtt_max,
        rtt_dev,
    }
}

/// Probe command settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests per probe (`-c`)
    pub count: u32,

    /// Per-reply wait (`-W`)
    pub reply_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            count: 2,
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl ProbeConfig {
    /// The probe command line for `target`.
    pub fn command(&self, target: IpAddr) -> String {
        format!("ping -c {} -W {} {}", self.count, self.reply_timeout.as_secs().max(1), target)
    }

    /// Upper bound for a whole probe invocation.
    pub fn deadline(&self) -> Duration {
        self.reply_timeout * self.count.max(1) + Duration::from_secs(1)
    }
}

/// Issues probes through the control interface.
pub struct Prober<'a, N: ?Sized> {
    control: &'a N,
    config: ProbeConfig,
}

impl<'a, N: NetworkControl + ?Sized> Prober<'a, N> {
    pub fn new(control: &'a N, config: ProbeConfig) -> Self {
        Self { control, config }
    }

    /// Probes `target` from `source`.
    pub async fn probe(&self, source: NodeId, target: NodeId) -> PingRecord {
        match self.control.host_address(target).await {
            Ok(addr) => self.probe_address(source, addr).await,
            Err(error) => {
                warn!(%source, %target, %error, "Cannot resolve probe target");
                PingRecord::FAILURE
            }
        }
    }

    async fn probe_address(&self, source: NodeId, target: IpAddr) -> PingRecord {
        let command = self.config.command(target);
        match self.control.run_on_host(source, &command, self.config.deadline()).await {
            Ok(output) => parse_ping_output(&output),
            Err(error) => {
                warn!(%source, %error, "Probe command failed");
                PingRecord::FAILURE
            }
        }
    }

    /// Probes the ground station from every node with an active interface.
    ///
    /// Isolated nodes, nodes whose interfaces failed to come up and the
    /// ground station itself are skipped.
    pub async fn probe_all(
        &self,
        live: &LiveTopology,
        ground_station: NodeId,
    ) -> BTreeMap<NodeId, PingRecord> {
        let sources: Vec<NodeId> = live
            .active_nodes()
            .into_iter()
            .filter(|n| *n != ground_station)
            .collect();

        let target = match self.control.host_address(ground_station).await {
            Ok(addr) => Some(addr),
            Err(error) => {
                warn!(%ground_station, %error, "Cannot resolve ground station address");
                None
            }
        };

        let mut results = BTreeMap::new();
        for source in sources {
            let record = match target {
                Some(addr) => self.probe_address(source, addr).await,
                None => PingRecord::FAILURE,
            };
            results.insert(source, record);
        }

        let cells: Vec<String> = results.iter().map(|(n, r)| r.format_cell(*n)).collect();
        info!(
            "Reachability to ground station ({}) (host, sent, received, rttMin, rttAvg, rttMax, rttDev): {}",
            ground_station.host_name(),
            cells.join(" , ")
        );

        results
    }
}
