//! Flat named register set exposed to host software.

use drtio_link::{LinkState, LinkStats, LinkTx};
use serde::Serialize;

use crate::aux::AuxController;
use crate::controller::{RtController, RtManager};
use crate::packet::ErrorCode;
use crate::satellite::SatelliteEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    /// Writing a non-zero value triggers the register's action.
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Register {
    pub name: String,
    pub access: Access,
    pub value: u64,
}

/// Find a register by name.
pub fn find<'a>(registers: &'a [Register], name: &str) -> Option<&'a Register> {
    registers.iter().find(|r| r.name == name)
}

struct Bank {
    prefix: &'static str,
    out: Vec<Register>,
}

impl Bank {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            out: Vec::new(),
        }
    }

    fn push(&mut self, name: &str, access: Access, value: u64) -> &mut Self {
        self.out.push(Register {
            name: format!("{}_{}", self.prefix, name),
            access,
            value,
        });
        self
    }

    fn ro(&mut self, name: &str, value: u64) -> &mut Self {
        self.push(name, Access::ReadOnly, value)
    }

    fn rw(&mut self, name: &str) -> &mut Self {
        self.push(name, Access::ReadWrite, 0)
    }

    fn finish(&mut self) -> Vec<Register> {
        std::mem::take(&mut self.out)
    }
}

pub(crate) fn link(state: LinkState, tx: &LinkTx) -> Vec<Register> {
    Bank::new("link")
        .ro("state", state.code())
        .ro("frames_discarded", tx.frames_discarded())
        .finish()
}

pub(crate) fn link_stats(stats: &LinkStats) -> Vec<Register> {
    let aux = stats.aux();
    let rt = stats.rt();
    Bank::new("link_stats")
        .ro("aux_frames", aux.frames)
        .ro("aux_frame_errors", aux.frame_errors)
        .ro("rt_frames", rt.frames)
        .ro("rt_frame_errors", rt.frame_errors)
        .ro("code_errors", stats.code_errors())
        .ro("link_drops", stats.link_drops())
        .rw("clear")
        .finish()
}

pub(crate) fn aux(aux: &AuxController) -> Vec<Register> {
    Bank::new("aux")
        .ro("sent", aux.sent())
        .ro("received", aux.received())
        .ro("rx_overflows", aux.rx_overflows())
        .ro("rx_dropped", aux.rx_dropped())
        .finish()
}

pub(crate) fn rt_controller(controller: &RtController) -> Vec<Register> {
    let engine = controller.engine();
    let counters = engine.counters();
    let mut bank = Bank::new("rt_controller");
    bank.rw("reset")
        .rw("reset_phy")
        .ro("state", engine.state().code())
        .ro("channel_count", controller.channel_count().into())
        .ro("queue_len", engine.queue_len() as u64)
        .ro("commands_sent", counters.commands_sent)
        .ro("timeouts", counters.timeouts)
        .ro("unexpected_replies", counters.unexpected_replies)
        .ro("aborted", counters.aborted)
        .ro("last_rtt", engine.last_rtt().unwrap_or(0));
    for code in ErrorCode::ALL {
        bank.ro(
            &format!("error_{}", code.name()),
            counters.satellite_errors.get(code),
        );
    }
    bank.finish()
}

pub(crate) fn rt_manager(manager: &RtManager) -> Vec<Register> {
    Bank::new("rt_manager")
        .rw("request_echo")
        .rw("sync_time")
        .ro("echoes", manager.echoes())
        .ro("echo_failures", manager.echo_failures())
        .ro("last_rtt", manager.last_rtt().unwrap_or(0))
        .ro("min_rtt", manager.min_rtt().unwrap_or(0))
        .ro("remote_delay", manager.remote_delay().unwrap_or(0))
        .finish()
}

pub(crate) fn rt_satellite(engine: &SatelliteEngine) -> Vec<Register> {
    let counters = engine.counters();
    let reset = engine.reset_signals();
    Bank::new("rt_satellite")
        .ro("state", engine.state().code())
        .ro("time", engine.now())
        .ro("rio_reset", reset.rio.into())
        .ro("rio_phy_reset", reset.rio_phy.into())
        .ro("commands", counters.commands)
        .ro("replies", counters.replies)
        .ro("errors_sent", counters.errors_sent)
        .ro("decode_errors", counters.decode_errors)
        .ro("inbound_overflows", counters.inbound_overflows)
        .ro("resets", counters.resets)
        .finish()
}
