//! Master and satellite nodes: one link layer plus the local-domain
//! components fed from its bridged signals.

use bytes::Bytes;
use drtio_link::{
    ElasticBuffer, FrameAssembler, LinkConfig, LinkLayer, LinkState, LinkStats, RxBridge,
    SubChannel,
};
use drtio_transceiver::Transceiver;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aux::AuxController;
use crate::controller::{CriStatus, RtController, RtManager};
use crate::error::{AuxError, CriError, NodeError, RegisterError, Result};
use crate::ios::{IoEvent, Ios};
use crate::master::{RequestId, DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_REPLY_TIMEOUT};
use crate::registers::{self, Access, Register};
use crate::satellite::{ResetSignals, SatelliteEngine};
use crate::timestamp::TimestampConfig;

/// RTIO channels per node.
pub const DEFAULT_CHANNEL_COUNT: u16 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasterConfig {
    pub link: LinkConfig,
    pub timestamps: TimestampConfig,
    /// Default: 1024.
    pub channel_count: u16,
    /// Default: 64.
    pub queue_depth: usize,
    /// Echo reply timeout in ticks. Default: 1000.
    pub echo_timeout: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            timestamps: TimestampConfig::default(),
            channel_count: DEFAULT_CHANNEL_COUNT,
            queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
            echo_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<()> {
        self.timestamps.validate()?;
        if self.channel_count == 0 {
            return Err(NodeError::InvalidChannelCount(self.channel_count));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SatelliteConfig {
    pub link: LinkConfig,
    pub timestamps: TimestampConfig,
    /// Default: 1024.
    pub channel_count: u16,
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            timestamps: TimestampConfig::default(),
            channel_count: DEFAULT_CHANNEL_COUNT,
        }
    }
}

impl SatelliteConfig {
    pub fn validate(&self) -> Result<()> {
        self.timestamps.validate()?;
        if self.channel_count == 0 {
            return Err(NodeError::InvalidChannelCount(self.channel_count));
        }
        Ok(())
    }
}

fn track_link(role: &'static str, current: &mut LinkState, next: LinkState) -> bool {
    if *current == next {
        return false;
    }
    let dropped = *current == LinkState::Ready;
    if dropped {
        warn!(role, to = next.name(), "link lost, resetting");
    } else {
        info!(role, from = current.name(), to = next.name(), "link state");
    }
    *current = next;
    dropped
}

fn clear_stats_on_write(stats: &mut LinkStats, value: u64) {
    if value != 0 {
        stats.clear();
    }
}

/// Master node.
pub struct DrtioMaster<X, B = ElasticBuffer> {
    link: LinkLayer<X, B>,
    stats: LinkStats,
    rt_rx: FrameAssembler,
    controller: RtController,
    manager: RtManager,
    aux: AuxController,
    link_state: LinkState,
}

impl<X: Transceiver> DrtioMaster<X> {
    pub fn new(transceiver: X, config: MasterConfig) -> Result<Self> {
        Self::with_bridge(transceiver, config, ElasticBuffer::new())
    }
}

impl<X: Transceiver, B: RxBridge> DrtioMaster<X, B> {
    pub fn with_bridge(transceiver: X, config: MasterConfig, bridge: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link: LinkLayer::with_bridge(transceiver, config.link.clone(), bridge)?,
            stats: LinkStats::new(),
            rt_rx: FrameAssembler::new(),
            controller: RtController::new(
                config.channel_count,
                config.queue_depth,
                config.timestamps,
            ),
            manager: RtManager::new(config.echo_timeout),
            aux: AuxController::new(),
            link_state: LinkState::NoLink,
        })
    }

    /// Recovered-domain step.
    pub fn tick_recovered(&mut self) -> Result<()> {
        Ok(self.link.tick_recovered()?)
    }

    /// Local-domain step.
    pub fn tick_local(&mut self) {
        let signals = self.link.receive();
        self.stats.observe(&signals);
        let status = signals.link();
        let state = status.get().state;
        if track_link("master", &mut self.link_state, state) {
            self.rt_rx.reset();
            self.aux.reset();
        }

        self.aux.on_rx(&signals.lane(SubChannel::Aux));
        let reply = self.rt_rx.push(&signals.lane(SubChannel::Rt));
        self.controller
            .tick(state == LinkState::Ready, reply, &mut self.link);
        self.manager.tick(&mut self.controller);
        self.link.transmit(status);
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn link(&self) -> &LinkLayer<X, B> {
        &self.link
    }

    pub fn link_stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn controller(&self) -> &RtController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut RtController {
        &mut self.controller
    }

    pub fn manager(&self) -> &RtManager {
        &self.manager
    }

    /// Master time in ticks.
    pub fn now(&self) -> u64 {
        self.controller.engine().now()
    }

    pub fn request_echo(&mut self) -> std::result::Result<RequestId, CriError> {
        self.manager.request_echo(&mut self.controller)
    }

    pub fn sync_time(&mut self) -> std::result::Result<u64, CriError> {
        self.manager.sync_time(&mut self.controller)
    }

    pub fn aux_send(&mut self, payload: impl Into<Bytes>) -> std::result::Result<(), AuxError> {
        self.aux.send(&mut self.link, payload)
    }

    pub fn aux_receive(&mut self) -> Option<Bytes> {
        self.aux.receive()
    }

    pub fn aux(&self) -> &AuxController {
        &self.aux
    }

    pub fn status(&self) -> CriStatus {
        let engine = self.controller.engine();
        CriStatus {
            link: self.link_state,
            counters: engine.counters(),
            last_rtt: engine.last_rtt(),
            link_stats: self.stats.snapshot(),
        }
    }

    pub fn registers(&self) -> Vec<Register> {
        let mut out = registers::link(self.link_state, self.link.tx());
        out.extend(registers::link_stats(&self.stats));
        out.extend(registers::rt_controller(&self.controller));
        out.extend(registers::rt_manager(&self.manager));
        out.extend(registers::aux(&self.aux));
        out
    }

    /// Write a register. Writing zero to an action register does nothing.
    ///
    /// A failed action is returned as [`RegisterError::Action`].
    pub fn write_register(&mut self, name: &str, value: u64) -> std::result::Result<(), RegisterError> {
        let action = value != 0;
        let outcome = match name {
            "link_stats_clear" => {
                clear_stats_on_write(&mut self.stats, value);
                Ok(())
            }
            "rt_controller_reset" if action => self.controller.reset(false).map(drop),
            "rt_controller_reset_phy" if action => self.controller.reset(true).map(drop),
            "rt_manager_request_echo" if action => self.request_echo().map(drop),
            "rt_manager_sync_time" if action => self.sync_time().map(drop),
            "rt_controller_reset"
            | "rt_controller_reset_phy"
            | "rt_manager_request_echo"
            | "rt_manager_sync_time" => Ok(()),
            _ => return Err(readonly_or_unknown(&self.registers(), name)),
        };
        outcome.map_err(|err| {
            warn!(register = name, %err, "register action failed");
            RegisterError::Action(err)
        })
    }
}

fn readonly_or_unknown(registers: &[Register], name: &str) -> RegisterError {
    match registers::find(registers, name) {
        Some(reg) if reg.access == Access::ReadOnly => RegisterError::ReadOnly(name.to_string()),
        _ => RegisterError::Unknown(name.to_string()),
    }
}

/// Satellite node.
pub struct DrtioSatellite<X, B = ElasticBuffer> {
    link: LinkLayer<X, B>,
    stats: LinkStats,
    rt_rx: FrameAssembler,
    engine: SatelliteEngine,
    ios: Ios,
    aux: AuxController,
    link_state: LinkState,
}

impl<X: Transceiver> DrtioSatellite<X> {
    pub fn new(transceiver: X, config: SatelliteConfig) -> Result<Self> {
        Self::with_bridge(transceiver, config, ElasticBuffer::new())
    }
}

impl<X: Transceiver, B: RxBridge> DrtioSatellite<X, B> {
    pub fn with_bridge(transceiver: X, config: SatelliteConfig, bridge: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link: LinkLayer::with_bridge(transceiver, config.link.clone(), bridge)?,
            stats: LinkStats::new(),
            rt_rx: FrameAssembler::new(),
            engine: SatelliteEngine::new(config.timestamps),
            ios: Ios::new(config.channel_count, config.timestamps),
            aux: AuxController::new(),
            link_state: LinkState::NoLink,
        })
    }

    /// Recovered-domain step.
    pub fn tick_recovered(&mut self) -> Result<()> {
        Ok(self.link.tick_recovered()?)
    }

    /// Local-domain step.
    pub fn tick_local(&mut self) {
        let signals = self.link.receive();
        self.stats.observe(&signals);
        let status = signals.link();
        let state = status.get().state;
        if track_link("satellite", &mut self.link_state, state) {
            self.rt_rx.reset();
            self.aux.reset();
        }

        self.aux.on_rx(&signals.lane(SubChannel::Aux));
        if let Some(frame) = self.rt_rx.push(&signals.lane(SubChannel::Rt)) {
            self.engine.receive_frame(frame);
        }
        self.engine
            .tick(state == LinkState::Ready, &mut self.link, &mut self.ios);
        self.link.transmit(status);
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn link(&self) -> &LinkLayer<X, B> {
        &self.link
    }

    pub fn link_stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn engine(&self) -> &SatelliteEngine {
        &self.engine
    }

    /// Satellite time, coarse units.
    pub fn now(&self) -> u64 {
        self.engine.now()
    }

    pub fn reset_signals(&self) -> ResetSignals {
        self.engine.reset_signals()
    }

    pub fn ios(&self) -> &Ios {
        &self.ios
    }

    /// Physical side of the I/O adapter.
    pub fn ios_mut(&mut self) -> &mut Ios {
        &mut self.ios
    }

    /// Next output event of `channel` whose time has come.
    pub fn pop_due(&mut self, channel: u16) -> Option<IoEvent> {
        self.ios.pop_due(channel, self.engine.now())
    }

    pub fn aux_send(&mut self, payload: impl Into<Bytes>) -> std::result::Result<(), AuxError> {
        self.aux.send(&mut self.link, payload)
    }

    pub fn aux_receive(&mut self) -> Option<Bytes> {
        self.aux.receive()
    }

    pub fn aux(&self) -> &AuxController {
        &self.aux
    }

    pub fn registers(&self) -> Vec<Register> {
        let mut out = registers::link(self.link_state, self.link.tx());
        out.extend(registers::link_stats(&self.stats));
        out.extend(registers::rt_satellite(&self.engine));
        out.extend(registers::aux(&self.aux));
        out
    }

    pub fn write_register(&mut self, name: &str, value: u64) -> std::result::Result<(), RegisterError> {
        match name {
            "link_stats_clear" => {
                clear_stats_on_write(&mut self.stats, value);
                Ok(())
            }
            _ => Err(readonly_or_unknown(&self.registers(), name)),
        }
    }
}
