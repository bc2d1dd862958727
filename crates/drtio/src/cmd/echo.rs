use drtio_core::Testbench;
use serde::Serialize;
use tracing::debug;

use crate::cmd::EchoArgs;
use crate::exit::{cri_error, node_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize, PartialEq)]
struct EchoReport {
    count: u32,
    rtt_min: u64,
    rtt_max: u64,
    rtt_mean: f64,
    remote_delay: u64,
}

impl EchoReport {
    fn from_rtts(rtts: &[u64]) -> Option<Self> {
        let min = *rtts.iter().min()?;
        let max = *rtts.iter().max()?;
        let sum: u64 = rtts.iter().sum();
        Some(Self {
            count: rtts.len() as u32,
            rtt_min: min,
            rtt_max: max,
            rtt_mean: sum as f64 / rtts.len() as f64,
            remote_delay: min / 2,
        })
    }
}

impl Report for EchoReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("count", self.count.to_string()),
            ("rtt_min", self.rtt_min.to_string()),
            ("rtt_max", self.rtt_max.to_string()),
            ("rtt_mean", format!("{:.2}", self.rtt_mean)),
            ("remote_delay", self.remote_delay.to_string()),
        ]
    }
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }
    let config = args.bench.testbench_config()?;
    let mut tb =
        Testbench::new(&config).map_err(|err| node_error("testbench setup failed", err))?;
    tb.wait_link_ready()
        .map_err(|err| node_error("link training failed", err))?;

    let mut rtts = Vec::with_capacity(args.count as usize);
    for seq in 0..args.count {
        let echo = tb.echo().map_err(|err| cri_error("echo failed", err))?;
        debug!(seq, rtt = echo.rtt, satellite_time = echo.satellite_time, "echo");
        rtts.push(echo.rtt);
    }

    let report = EchoReport::from_rtts(&rtts)
        .ok_or_else(|| CliError::new(crate::exit::INTERNAL, "no echo completed"))?;
    print_report(&report, format);
    Ok(SUCCESS)
}
