use serde::Serialize;
use tracing::debug;

use crate::rx::{RxLane, RxSignals};
use crate::sync::Synced;

/// Counters for one sub-channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    /// Frames that closed with integrity confirmed.
    pub frames: u64,
    /// Frames that closed without it.
    pub frame_errors: u64,
}

#[derive(Debug, Default)]
struct LaneMonitor {
    active: bool,
    stats: LaneStats,
}

impl LaneMonitor {
    fn observe(&mut self, lane: &RxLane) {
        if lane.frame_perm {
            self.stats.frames += 1;
        } else if self.active && !lane.frame {
            self.stats.frame_errors += 1;
        }
        self.active = lane.frame;
    }
}

/// Link error counters, maintained in the local domain.
#[derive(Debug, Default)]
pub struct LinkStats {
    aux: LaneMonitor,
    rt: LaneMonitor,
    code_errors: u64,
    link_drops: u64,
    was_ready: bool,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one cycle of bridged receive signals.
    pub fn observe(&mut self, signals: &Synced<RxSignals>) {
        let signals = signals.get();
        self.aux.observe(&signals.aux);
        self.rt.observe(&signals.rt);
        if signals.code_error {
            self.code_errors += 1;
        }
        let ready = signals.link.is_ready();
        if self.was_ready && !ready {
            self.link_drops += 1;
            debug!(drops = self.link_drops, "link drop counted");
        }
        self.was_ready = ready;
    }

    pub fn aux(&self) -> LaneStats {
        self.aux.stats
    }

    pub fn rt(&self) -> LaneStats {
        self.rt.stats
    }

    pub fn code_errors(&self) -> u64 {
        self.code_errors
    }

    pub fn link_drops(&self) -> u64 {
        self.link_drops
    }

    /// Zero every counter. Tracking of in-flight frames is kept.
    pub fn clear(&mut self) {
        self.aux.stats = LaneStats::default();
        self.rt.stats = LaneStats::default();
        self.code_errors = 0;
        self.link_drops = 0;
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            aux: self.aux(),
            rt: self.rt(),
            code_errors: self.code_errors,
            link_drops: self.link_drops,
        }
    }
}

/// Serializable copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub aux: LaneStats,
    pub rt: LaneStats,
    pub code_errors: u64,
    pub link_drops: u64,
}
