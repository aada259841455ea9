//! Attack injection: one fixed command sequence per attack kind.
//!
//! The injector runs once per simulation run, concurrently with the tick
//! loop. It only sees the addresses resolved at setup ([`AttackTargets`])
//! and never the live topology.

use islnet_env::{ControlError, NetworkControl, NodeId};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Attack variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    /// No traffic is injected
    None,

    /// Fixed-size SYN flood from a single source
    SynFlood,

    /// SYN flood with a randomized source address per packet
    SynFlowFlood,

    /// Full-port service/version scan
    PortScan,

    /// ICMP flood to the broadcast address spoofing the victim
    Smurf,
}

/// Attack name that matched no variant.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown attack kind: {0}")]
pub struct UnknownAttack(pub String);

impl AttackKind {
    pub fn all() -> Vec<AttackKind> {
        vec![
            AttackKind::None,
            AttackKind::SynFlood,
            AttackKind::SynFlowFlood,
            AttackKind::PortScan,
            AttackKind::Smurf,
        ]
    }

    /// Numeric code used on the command line.
    pub fn code(&self) -> i64 {
        match self {
            AttackKind::None => 0,
            AttackKind::SynFlood => 1,
            AttackKind::SynFlowFlood => 2,
            AttackKind::PortScan => 3,
            AttackKind::Smurf => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<AttackKind> {
        AttackKind::all().into_iter().find(|kind| kind.code() == code)
    }

    /// Maps a code to a kind, treating unknown codes as [`AttackKind::None`].
    ///
    /// An unknown code is a configuration error; it is logged and the run
    /// continues without an attack.
    pub fn resolve(code: i64) -> AttackKind {
        AttackKind::from_code(code).unwrap_or_else(|| {
            error!(code, "Unknown attack code, running without attack");
            AttackKind::None
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttackKind::None => "none",
            AttackKind::SynFlood => "syn_flood",
            AttackKind::SynFlowFlood => "syn_flow_flood",
            AttackKind::PortScan => "port_scan",
            AttackKind::Smurf => "smurf",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AttackKind::None => "No attack",
            AttackKind::SynFlood => "SYN flood against the victim's HTTP port from one source",
            AttackKind::SynFlowFlood => "SYN flood against the victim's HTTP port from random sources",
            AttackKind::PortScan => "Full port and service scan of the victim",
            AttackKind::Smurf => "ICMP broadcast flood with the victim as spoofed source",
        }
    }
}

impl std::fmt::Display for AttackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackKind {
    type Err = UnknownAttack;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.trim().parse::<i64>() {
            return AttackKind::from_code(code).ok_or_else(|| UnknownAttack(s.to_string()));
        }

        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect();

        AttackKind::all()
            .into_iter()
            .find(|kind| kind.name().replace('_', "") == normalized)
            .ok_or_else(|| UnknownAttack(s.to_string()))
    }
}

/// Tunables shared by all attack kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackParams {
    /// Packets per flood (`hping3 -c`)
    pub packet_count: u32,

    /// Victim service port
    pub port: u16,

    /// Broadcast address used by the smurf attack
    pub broadcast: Ipv4Addr,
}

impl Default for AttackParams {
    fn default() -> Self {
        Self {
            packet_count: 100,
            port: 8000,
            broadcast: Ipv4Addr::new(10, 0, 0, 255),
        }
    }
}

/// The attack selected for a run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSpec {
    pub kind: AttackKind,
    pub attacker: NodeId,
    pub victim: NodeId,
    pub params: AttackParams,
}

/// Attacker and victim with the victim address resolved once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackTargets {
    pub attacker: NodeId,
    pub victim: NodeId,
    pub victim_address: IpAddr,
}

impl AttackTargets {
    pub async fn resolve<N: NetworkControl + ?Sized>(
        control: &N,
        attacker: NodeId,
        victim: NodeId,
    ) -> Result<Self, ControlError> {
        let victim_address = control.host_address(victim).await?;
        Ok(Self {
            attacker,
            victim,
            victim_address,
        })
    }
}

/// One external command of an attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackStep {
    /// Started detached on the host, never awaited
    Spawn { node: NodeId, command: String },

    /// Run to completion (or timeout) on the host
    Run { node: NodeId, command: String },
}

impl AttackStep {
    pub fn node(&self) -> NodeId {
        match self {
            AttackStep::Spawn { node, .. } | AttackStep::Run { node, .. } => *node,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            AttackStep::Spawn { command, .. } | AttackStep::Run { command, .. } => command,
        }
    }
}

/// Returns the command sequence for an attack.
///
/// Every kind except [`AttackKind::None`] first starts an HTTP server on
/// the victim so the flooded port is open.
pub fn plan(kind: AttackKind, targets: &AttackTargets, params: &AttackParams) -> Vec<AttackStep> {
    let victim = targets.victim_address;
    let port = params.port;
    let count = params.packet_count;
    let run = |command: String| AttackStep::Run {
        node: targets.attacker,
        command,
    };

    let attack = match kind {
        AttackKind::None => return Vec::new(),
        AttackKind::SynFlood => vec![
            run(format!("wget http://{victim}:{port}")),
            run(format!("hping3 -c {count} -U -d 120 -S -w 64 -p {port} --flood {victim}")),
        ],
        AttackKind::SynFlowFlood => vec![
            run(format!("wget http://{victim}:{port}")),
            run(format!(
                "hping3 -c {count} -U -d 120 -S -w 64 -p {port} --flood --rand-source {victim}"
            )),
        ],
        AttackKind::PortScan => vec![run(format!("nmap -p0- -A -T4 {victim}"))],
        AttackKind::Smurf => vec![run(format!(
            "hping3 -1 --flood --spoof {victim} {}",
            params.broadcast
        ))],
    };

    let mut steps = vec![AttackStep::Spawn {
        node: targets.victim,
        command: format!("python3 -m http.server {port}"),
    }];
    steps.extend(attack);
    steps
}

/// What an injector run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttackReport {
    /// Commands handed to the substrate
    pub issued: usize,

    /// Commands the substrate rejected or that timed out
    pub failed: usize,
}

/// Issues an attack's command sequence against the substrate.
#[derive(Debug, Clone)]
pub struct AttackInjector {
    kind: AttackKind,
    targets: AttackTargets,
    params: AttackParams,
    command_timeout: Duration,
}

impl AttackInjector {
    pub fn new(
        kind: AttackKind,
        targets: AttackTargets,
        params: AttackParams,
        command_timeout: Duration,
    ) -> Self {
        Self {
            kind,
            targets,
            params,
            command_timeout,
        }
    }

    pub fn kind(&self) -> AttackKind {
        self.kind
    }

    pub fn targets(&self) -> &AttackTargets {
        &self.targets
    }

    /// Runs every step in order. Failures are logged and do not stop the
    /// remaining steps.
    pub async fn run<N: NetworkControl + ?Sized>(&self, control: &N) -> AttackReport {
        let steps = plan(self.kind, &self.targets, &self.params);
        let mut report = AttackReport::default();
        if steps.is_empty() {
            return report;
        }

        info!(
            kind = %self.kind,
            attacker = %self.targets.attacker,
            victim = %self.targets.victim_address,
            "Starting attack"
        );

        for step in &steps {
            report.issued += 1;
            let result = match step {
                AttackStep::Spawn { node, command } => control.spawn_on_host(*node, command).await,
                AttackStep::Run { node, command } => control
                    .run_on_host(*node, command, self.command_timeout)
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = result {
                report.failed += 1;
                warn!(host = %step.node().host_name(), command = step.command(), "Attack command failed: {}", e);
            }
        }

        info!(kind = %self.kind, issued = report.issued, failed = report.failed, "Attack finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use islnet_env::{ControlOp, MemoryNetwork};

    fn targets() -> AttackTargets {
        AttackTargets {
            attacker: NodeId(19),
            victim: NodeId(0),
            victim_address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        }
    }

    #[test]
    fn test_codes_round_trip() {
        for kind in AttackKind::all() {
            assert_eq!(AttackKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(AttackKind::from_code(99), None);
        assert_eq!(AttackKind::resolve(99), AttackKind::None);
        assert_eq!(AttackKind::resolve(-1), AttackKind::None);
        assert_eq!(AttackKind::resolve(4), AttackKind::Smurf);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("syn_flood".parse(), Ok(AttackKind::SynFlood));
        assert_eq!("SYN-FLOW-FLOOD".parse(), Ok(AttackKind::SynFlowFlood));
        assert_eq!("portscan".parse(), Ok(AttackKind::PortScan));
        assert_eq!("3".parse(), Ok(AttackKind::PortScan));
        assert_eq!(
            "teardrop".parse::<AttackKind>(),
            Err(UnknownAttack("teardrop".to_string()))
        );
        assert!("99".parse::<AttackKind>().is_err());
        assert!("-1".parse::<AttackKind>().is_err());
    }

    #[test]
    fn test_every_kind_has_one_plan() {
        let params = AttackParams::default();
        for kind in AttackKind::all() {
            let steps = plan(kind, &targets(), &params);
            if kind == AttackKind::None {
                assert!(steps.is_empty());
                continue;
            }

            // HTTP server on the victim, then the attack from the attacker
            assert_eq!(
                steps[0],
                AttackStep::Spawn {
                    node: NodeId(0),
                    command: "python3 -m http.server 8000".to_string(),
                }
            );
            assert!(steps[1..].iter().all(|s| matches!(s, AttackStep::Run { node: NodeId(19), .. })));
        }
    }

    #[test]
    fn test_command_table() {
        let params = AttackParams::default();

        let syn = plan(AttackKind::SynFlood, &targets(), &params);
        assert_eq!(syn[1].command(), "wget http://10.0.0.1:8000");
        assert_eq!(
            syn[2].command(),
            "hping3 -c 100 -U -d 120 -S -w 64 -p 8000 --flood 10.0.0.1"
        );

        let flow = plan(AttackKind::SynFlowFlood, &targets(), &params);
        assert!(flow[2].command().ends_with("--flood --rand-source 10.0.0.1"));

        let scan = plan(AttackKind::PortScan, &targets(), &params);
        assert_eq!(scan.len(), 2);
        assert_eq!(scan[1].command(), "nmap -p0- -A -T4 10.0.0.1");

        let smurf = plan(AttackKind::Smurf, &targets(), &params);
        assert_eq!(smurf[1].command(), "hping3 -1 --flood --spoof 10.0.0.1 10.0.0.255");
    }

    #[tokio::test]
    async fn test_none_issues_nothing() {
        let net = MemoryNetwork::new(4);
        let injector = AttackInjector::new(
            AttackKind::resolve(99),
            targets(),
            AttackParams::default(),
            Duration::from_secs(1),
        );

        let report = injector.run(&net).await;
        assert_eq!(report, AttackReport::default());
        assert!(net.ops().is_empty());
    }

    #[tokio::test]
    async fn test_injector_runs_plan_without_touching_links() {
        let net = MemoryNetwork::new(20);
        let t = AttackTargets::resolve(&net, NodeId(19), NodeId(0)).await.unwrap();
        assert_eq!(t, targets());

        let injector =
            AttackInjector::new(AttackKind::PortScan, t, AttackParams::default(), Duration::from_secs(1));
        let report = injector.run(&net).await;

        assert_eq!(report, AttackReport { issued: 2, failed: 0 });
        assert!(net.ops().iter().all(|op| !op.mutates_topology()));
        assert!(matches!(net.ops()[0], ControlOp::Spawn(NodeId(0), _)));
        assert!(matches!(net.ops()[1], ControlOp::Run(NodeId(19), _)));
    }

    #[tokio::test]
    async fn test_failed_commands_are_counted() {
        let net = MemoryNetwork::new(20);
        net.set_fail_hosts(true);

        let injector = AttackInjector::new(
            AttackKind::SynFlood,
            targets(),
            AttackParams::default(),
            Duration::from_secs(1),
        );
        let report = injector.run(&net).await;
        assert_eq!(report, AttackReport { issued: 3, failed: 3 });
    }
}
