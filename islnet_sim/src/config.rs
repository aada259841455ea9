//! Run configuration, built once and validated at `Initializing`.

use islnet_core::{AttackKind, AttackParams, AttackSpec, ProbeConfig, TrafficProfile};
use islnet_env::NodeId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid run parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Checkpoint period must be at least 1 interval")]
    ZeroCheckpointPeriod,

    #[error("Failure budget must be at least 1 interval")]
    ZeroFailureBudget,

    #[error("{role} {node} is outside the {node_count} scheduled nodes")]
    NodeOutOfRange {
        role: &'static str,
        node: NodeId,
        node_count: u32,
    },

    #[error("Attacker and victim are both {0}")]
    AttackerIsVictim(NodeId),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Last interval to run (inclusive)
    pub interval_limit: u64,

    /// Sleep between intervals
    pub tick: Duration,

    /// Checkpoint metrics when `interval % checkpoint_every == 0`
    pub checkpoint_every: u64,

    /// Pause after setup before the first interval
    pub warmup: Duration,

    /// Node every probe targets
    pub ground_station: NodeId,

    /// Attack to inject, `None` for a clean run
    pub attack: AttackKind,

    /// Attacking node (default: last node)
    pub attacker: Option<NodeId>,

    /// Attacked node (default: ground station)
    pub victim: Option<NodeId>,

    /// Attack tunables
    pub attack_params: AttackParams,

    /// Timeout for each attack command
    pub attack_command_timeout: Duration,

    /// Probe command settings
    pub probe: ProbeConfig,

    /// Background traffic, if enabled
    pub traffic: Option<TrafficProfile>,

    /// Directory receiving the CSV tables
    pub output_dir: PathBuf,

    /// Consecutive incomplete intervals tolerated before draining
    pub max_failed_intervals: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval_limit: 1440,
            tick: Duration::from_secs(60),
            checkpoint_every: 100,
            warmup: Duration::from_secs(15),
            ground_station: NodeId(0),
            attack: AttackKind::None,
            attacker: None,
            victim: None,
            attack_params: AttackParams::default(),
            attack_command_timeout: Duration::from_secs(600),
            probe: ProbeConfig::default(),
            traffic: None,
            output_dir: PathBuf::from("."),
            max_failed_intervals: 3,
        }
    }
}

impl RunConfig {
    /// Short run for quick iteration.
    pub fn test_mode() -> Self {
        Self {
            interval_limit: 3,
            tick: Duration::from_secs(10),
            checkpoint_every: 3,
            warmup: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Short run with an attack running beside it.
    pub fn attack_mode(kind: AttackKind) -> Self {
        Self {
            interval_limit: 5,
            attack: kind,
            ..Self::test_mode()
        }
    }

    /// Checks the configuration against the scheduled node set.
    pub fn validate(&self, node_count: u32) -> Result<(), ConfigError> {
        if self.checkpoint_every == 0 {
            return Err(ConfigError::ZeroCheckpointPeriod);
        }
        if self.max_failed_intervals == 0 {
            return Err(ConfigError::ZeroFailureBudget);
        }

        let in_range = |role: &'static str, node: NodeId| {
            if node.0 < node_count {
                Ok(())
            } else {
                Err(ConfigError::NodeOutOfRange {
                    role,
                    node,
                    node_count,
                })
            }
        };
        in_range("Ground station", self.ground_station)?;

        if let Some(spec) = self.attack_spec(node_count) {
            in_range("Attacker", spec.attacker)?;
            in_range("Victim", spec.victim)?;
            if spec.attacker == spec.victim {
                return Err(ConfigError::AttackerIsVictim(spec.attacker));
            }
        }
        Ok(())
    }

    /// The attack of this run, with defaults filled in.
    ///
    /// `None` when no attack is configured.
    pub fn attack_spec(&self, node_count: u32) -> Option<AttackSpec> {
        if self.attack == AttackKind::None {
            return None;
        }
        Some(AttackSpec {
            kind: self.attack,
            attacker: self
                .attacker
                .unwrap_or_else(|| NodeId(node_count.saturating_sub(1))),
            victim: self.victim.unwrap_or(self.ground_station),
            params: self.attack_params.clone(),
        })
    }
}
