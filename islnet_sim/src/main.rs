//! islnet Simulator CLI
//!
//! Drive a satellite ISL schedule through an emulated network.

use anyhow::{bail, Context, Result};
use clap::Parser;
use islnet_core::{AttackKind, ConnectivitySchedule, TrafficProfile};
use islnet_env::{MemoryNetwork, NetworkControl, NodeId, OvsConfig, OvsControl, SimulationContext, TokioContext};
use islnet_sim::{RunConfig, RunExport, RunReport, SimContext, SimulationDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// islnet topology simulation CLI
#[derive(Parser, Debug)]
#[command(name = "islnet-sim")]
#[command(about = "Replay a satellite ISL visibility schedule against an emulated network", long_about = None)]
struct Args {
    /// Connectivity schedule, an (N, N, T) array as .npy or .json
    #[arg(long, default_value = "data/walker_delta_20.npy")]
    schedule: PathBuf,

    /// Short test run (3 intervals, 10s ticks); the default without other mode flags
    #[arg(short, long)]
    test: bool,

    /// Run up to this interval with production timing
    #[arg(short, long)]
    interval: Option<u64>,

    /// Full production run (1440 intervals, 60s ticks)
    #[arg(short, long)]
    run: bool,

    /// Attack code: 0 none, 1 syn flood, 2 syn flow flood, 3 port scan, 4 smurf
    #[arg(short, long)]
    attack: Option<i64>,

    /// Override the tick period in seconds
    #[arg(long)]
    tick_secs: Option<f64>,

    /// Override the checkpoint period in intervals
    #[arg(long)]
    checkpoint_every: Option<u64>,

    /// Node every probe targets
    #[arg(long, default_value = "0")]
    ground_station: u32,

    /// Attacking node (default: last node)
    #[arg(long)]
    attacker: Option<u32>,

    /// Attacked node (default: ground station)
    #[arg(long)]
    victim: Option<u32>,

    /// Override the pause before the first interval, in seconds
    #[arg(long)]
    warmup_secs: Option<f64>,

    /// Directory for the CSV tables
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Send background bulk traffic to the ground station
    #[arg(long)]
    traffic: bool,

    /// Use an in-memory network and a virtual clock instead of the emulator
    #[arg(long)]
    dry_run: bool,

    /// Run emulator commands through sudo
    #[arg(long)]
    sudo: bool,

    /// Export a JSON run summary to this file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Picks the preset and applies the overrides.
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = if self.run {
            RunConfig::default()
        } else if let Some(limit) = self.interval {
            RunConfig {
                interval_limit: limit,
                ..RunConfig::default()
            }
        } else if let Some(code) = self.attack {
            RunConfig::attack_mode(AttackKind::resolve(code))
        } else {
            RunConfig::test_mode()
        };

        if let Some(secs) = self.tick_secs {
            config.tick = seconds("--tick-secs", secs)?;
        }
        if let Some(secs) = self.warmup_secs {
            config.warmup = seconds("--warmup-secs", secs)?;
        }
        if let Some(every) = self.checkpoint_every {
            config.checkpoint_every = every;
        }
        config.ground_station = NodeId(self.ground_station);
        config.attacker = self.attacker.map(NodeId);
        config.victim = self.victim.map(NodeId);
        config.output_dir = self.output_dir.clone();
        if self.traffic {
            config.traffic = Some(TrafficProfile::default());
        }
        Ok(config)
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{flag} must be a non-negative number, got {secs}"))
}

async fn drive<Ctx: SimulationContext, Net: NetworkControl>(
    ctx: Arc<Ctx>,
    network: Arc<Net>,
    schedule: ConnectivitySchedule,
    config: RunConfig,
    cancel: &CancellationToken,
    args: &Args,
) -> Result<RunReport> {
    let nodes = schedule.node_count();
    let attack = config.attack;
    let mut driver = SimulationDriver::new(ctx, network, schedule, config);
    let report = driver.run(cancel).await?;

    if let Some(path) = &args.export {
        let export = RunExport::new(
            &args.schedule.display().to_string(),
            nodes,
            attack,
            &report,
            driver.recorder(),
        );
        match export.write_to_file(path) {
            Ok(()) => info!("Exported run summary to {}", path.display()),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("islnet simulator v{}", env!("CARGO_PKG_VERSION"));

    // A bad schedule is fatal before anything touches the network
    let schedule = ConnectivitySchedule::load(&args.schedule)
        .with_context(|| format!("Could not load the ISL schedule {}", args.schedule.display()))?;
    let config = args.run_config()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current interval");
            on_signal.cancel();
        }
    });

    let report = if args.dry_run {
        info!("Dry run on an in-memory network");
        let network = Arc::new(MemoryNetwork::new(schedule.node_count()));
        drive(SimContext::shared(), network, schedule, config, &cancel, &args).await?
    } else {
        let network = Arc::new(OvsControl::new(OvsConfig {
            use_sudo: args.sudo,
            ..OvsConfig::default()
        }));
        drive(TokioContext::shared(), network, schedule, config, &cancel, &args).await?
    };

    info!(
        intervals = report.intervals_completed,
        incomplete = report.incomplete_intervals,
        "Run stopped: {:?}",
        report.stop_reason
    );

    if !report.finalized {
        bail!("Final metrics were not written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(argv: &[&str]) -> RunConfig {
        let mut full = vec!["islnet-sim"];
        full.extend_from_slice(argv);
        Args::parse_from(full).run_config().unwrap()
    }

    #[test]
    fn test_no_flags_is_test_mode() {
        let c = config(&[]);
        assert_eq!(c.interval_limit, 3);
        assert_eq!(c.tick, Duration::from_secs(10));
        assert_eq!(c.attack, AttackKind::None);
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(config(&["-r"]).interval_limit, 1440);

        let c = config(&["-i", "20"]);
        assert_eq!(c.interval_limit, 20);
        assert_eq!(c.tick, Duration::from_secs(60));

        let c = config(&["-a", "1"]);
        assert_eq!(c.interval_limit, 5);
        assert_eq!(c.attack, AttackKind::SynFlood);

        // Unknown codes degrade to a clean attack-mode run
        assert_eq!(config(&["--attack", "99"]).attack, AttackKind::None);
    }

    #[test]
    fn test_overrides() {
        let c = config(&["--tick-secs", "0.5", "--checkpoint-every", "7", "--victim", "4", "--traffic"]);
        assert_eq!(c.tick, Duration::from_millis(500));
        assert_eq!(c.checkpoint_every, 7);
        assert_eq!(c.victim, Some(NodeId(4)));
        assert!(c.traffic.is_some());

        let args = Args::parse_from(["islnet-sim", "--tick-secs", "NaN"]);
        assert!(args.run_config().is_err());
    }
}
