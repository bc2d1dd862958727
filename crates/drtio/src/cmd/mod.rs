use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use drtio_core::{BridgeKind, PhaseModel, TestbenchConfig};

use crate::exit::{config_error, io_error, CliResult};
use crate::output::OutputFormat;

pub mod echo;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring up a simulated link, stream writes and report counters.
    Simulate(SimulateArgs),
    /// Measure echo round trips over a simulated link.
    Echo(EchoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    RecoveredFirst,
    LocalFirst,
    Random,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BridgeArg {
    Elastic,
    Fixed,
}

/// Testbench options shared by the simulation commands. Flags override the
/// values loaded from `--config`.
#[derive(Args, Debug, Default)]
pub struct BenchArgs {
    /// Testbench configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// One-way serial latency in symbols.
    #[arg(long)]
    pub latency: Option<usize>,
    /// Cycles of signal before the receiver reports lock.
    #[arg(long)]
    pub lock_cycles: Option<u32>,
    /// Channel count of both nodes.
    #[arg(long)]
    pub channels: Option<u16>,
    /// Order of the two clock-domain steps within a tick.
    #[arg(long, value_enum)]
    pub phase: Option<PhaseArg>,
    /// Seed for `--phase random`.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Clock-domain bridge implementation.
    #[arg(long, value_enum)]
    pub bridge: Option<BridgeArg>,
    /// Delay in ticks for `--bridge fixed`.
    #[arg(long, default_value_t = 2)]
    pub delay: u64,
    /// Upper bound on any blocking wait, in ticks.
    #[arg(long)]
    pub max_wait: Option<u64>,
}

impl BenchArgs {
    pub fn testbench_config(&self) -> CliResult<TestbenchConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
                serde_json::from_str(&text)
                    .map_err(|err| config_error(&format!("parse {}", path.display()), err))?
            }
            None => TestbenchConfig::default(),
        };

        if let Some(latency) = self.latency {
            config.serial.latency = latency;
        }
        if let Some(lock_cycles) = self.lock_cycles {
            config.serial.lock_cycles = lock_cycles;
        }
        if let Some(channels) = self.channels {
            config.master.channel_count = channels;
            config.satellite.channel_count = channels;
        }
        if let Some(phase) = self.phase {
            config.phase = match phase {
                PhaseArg::RecoveredFirst => PhaseModel::RecoveredFirst,
                PhaseArg::LocalFirst => PhaseModel::LocalFirst,
                PhaseArg::Random => PhaseModel::Random { seed: self.seed },
            };
        }
        if let Some(bridge) = self.bridge {
            config.bridge = match bridge {
                BridgeArg::Elastic => BridgeKind::Elastic,
                BridgeArg::Fixed => BridgeKind::Fixed { delay: self.delay },
            };
        }
        if let Some(max_wait) = self.max_wait {
            config.max_wait = max_wait;
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub bench: BenchArgs,
    /// Output events to stream after link-up.
    #[arg(long, default_value_t = 16)]
    pub writes: u32,
    /// Channel receiving the writes.
    #[arg(long, default_value_t = 0)]
    pub channel: u16,
    /// Extra ticks to run after the last write was queued.
    #[arg(long, default_value_t = 1000)]
    pub ticks: u64,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub bench: BenchArgs,
    /// Number of echo round trips.
    #[arg(long, default_value_t = 10)]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
