use drtio_core::{Cri, CriStatus, SatelliteCounters, Testbench};
use drtio_link::LinkStatsSnapshot;
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::SimulateArgs;
use crate::exit::{cri_error, node_error, CliResult, FAILURE, SUCCESS};
use crate::output::{optional, print_report, OutputFormat, Report};

/// Coarse ticks between link-up and the first scheduled write.
const SCHEDULE_AHEAD: u64 = 100;

#[derive(Serialize)]
struct SimulationReport {
    ticks: u64,
    link_ready_after: u64,
    echo_rtt: u64,
    writes_submitted: u32,
    events_delivered: usize,
    in_order: bool,
    master: CriStatus,
    satellite: SatelliteCounters,
    satellite_link: LinkStatsSnapshot,
}

impl Report for SimulationReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ticks", self.ticks.to_string()),
            ("link_ready_after", self.link_ready_after.to_string()),
            ("echo_rtt", self.echo_rtt.to_string()),
            ("writes_submitted", self.writes_submitted.to_string()),
            ("events_delivered", self.events_delivered.to_string()),
            ("in_order", self.in_order.to_string()),
            ("link", self.master.link.name().to_string()),
            ("commands_sent", self.master.counters.commands_sent.to_string()),
            ("replies", self.master.counters.replies.to_string()),
            ("timeouts", self.master.counters.timeouts.to_string()),
            ("last_rtt", optional(self.master.last_rtt)),
            ("satellite_commands", self.satellite.commands.to_string()),
            ("satellite_errors_sent", self.satellite.errors_sent.to_string()),
            ("rt_frames", self.satellite_link.rt.frames.to_string()),
            ("rt_frame_errors", self.satellite_link.rt.frame_errors.to_string()),
            ("code_errors", self.satellite_link.code_errors.to_string()),
        ]
    }
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.bench.testbench_config()?;
    let timestamps = config.master.timestamps;
    let mut tb =
        Testbench::new(&config).map_err(|err| node_error("testbench setup failed", err))?;

    let link_ready_after = tb
        .wait_link_ready()
        .map_err(|err| node_error("link training failed", err))?;
    info!(ticks = link_ready_after, "link ready");

    let echo = tb.echo().map_err(|err| cri_error("echo failed", err))?;
    tb.master_mut()
        .sync_time()
        .map_err(|err| cri_error("time sync failed", err))?;

    let first = tb.master().now() + SCHEDULE_AHEAD;
    for i in 0..args.writes {
        let timestamp = timestamps.join(first + u64::from(i), 0);
        tb.submit_output(args.channel, timestamp, i)
            .map_err(|err| cri_error("write failed", err))?;
    }
    tb.run(args.ticks)
        .map_err(|err| node_error("simulation failed", err))?;

    let delivered: Vec<u32> =
        std::iter::from_fn(|| tb.satellite_mut().ios_mut().pop_output(args.channel))
            .map(|event| event.data)
            .collect();
    let in_order = delivered.iter().copied().eq(0..delivered.len() as u32);
    let complete = delivered.len() == args.writes as usize;
    if !complete || !in_order {
        warn!(
            delivered = delivered.len(),
            submitted = args.writes,
            in_order,
            "output events lost or reordered"
        );
    }

    let report = SimulationReport {
        ticks: tb.ticks(),
        link_ready_after,
        echo_rtt: echo.rtt,
        writes_submitted: args.writes,
        events_delivered: delivered.len(),
        in_order,
        master: tb.get_status(),
        satellite: tb.satellite().engine().counters(),
        satellite_link: tb.satellite().link_stats().snapshot(),
    };
    print_report(&report, format);

    Ok(if complete && in_order { SUCCESS } else { FAILURE })
}
