//! Two-node testbench: a master and a satellite joined by an in-memory
//! serial link, advanced together one tick at a time.

use drtio_link::{BridgeError, BusWord, ElasticBuffer, FixedLatencyBridge, LinkState, RxBridge, Synced};
use drtio_transceiver::{serial_link, LinkControl, SerialConfig, SerialEnd};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::{Cri, CriStatus, EchoResult};
use crate::error::{CriError, NodeError, Result};
use crate::ios::IoEvent;
use crate::master::{Completion, RequestId, Response};
use crate::node::{DrtioMaster, DrtioSatellite, MasterConfig, SatelliteConfig};
use crate::satellite::SatelliteState;

/// Order of the two clock-domain steps within one tick of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseModel {
    #[default]
    RecoveredFirst,
    LocalFirst,
    /// Chosen per node and tick by a seeded generator.
    Random { seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    #[default]
    Elastic,
    Fixed { delay: u64 },
}

/// Bridge selected at runtime.
#[derive(Debug)]
pub enum SimBridge {
    Elastic(ElasticBuffer),
    Fixed(FixedLatencyBridge),
}

impl SimBridge {
    pub fn new(kind: BridgeKind) -> Self {
        match kind {
            BridgeKind::Elastic => SimBridge::Elastic(ElasticBuffer::new()),
            BridgeKind::Fixed { delay } => SimBridge::Fixed(FixedLatencyBridge::new(delay)),
        }
    }
}

impl RxBridge for SimBridge {
    fn write(&mut self, word: BusWord) -> std::result::Result<(), BridgeError> {
        match self {
            SimBridge::Elastic(bridge) => bridge.write(word),
            SimBridge::Fixed(bridge) => bridge.write(word),
        }
    }

    fn read(&mut self) -> Option<Synced<BusWord>> {
        match self {
            SimBridge::Elastic(bridge) => bridge.read(),
            SimBridge::Fixed(bridge) => bridge.read(),
        }
    }

    fn depth(&self) -> usize {
        match self {
            SimBridge::Elastic(bridge) => bridge.depth(),
            SimBridge::Fixed(bridge) => bridge.depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestbenchConfig {
    pub serial: SerialConfig,
    pub master: MasterConfig,
    pub satellite: SatelliteConfig,
    pub phase: PhaseModel,
    pub bridge: BridgeKind,
    /// Upper bound on any blocking wait, in ticks. Default: 10000.
    pub max_wait: u64,
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            master: MasterConfig::default(),
            satellite: SatelliteConfig::default(),
            phase: PhaseModel::default(),
            bridge: BridgeKind::default(),
            max_wait: 10_000,
        }
    }
}

pub type SimMaster = DrtioMaster<SerialEnd, SimBridge>;
pub type SimSatellite = DrtioSatellite<SerialEnd, SimBridge>;

/// Master and satellite on one simulated cable.
///
/// Implements the blocking [`Cri`] by ticking both nodes until each call
/// completes. Every wait is bounded by `max_wait`.
pub struct Testbench {
    master: SimMaster,
    satellite: SimSatellite,
    control: LinkControl,
    phase: PhaseModel,
    rng: StdRng,
    ticks: u64,
    max_wait: u64,
}

impl Testbench {
    pub fn new(config: &TestbenchConfig) -> Result<Self> {
        let (master_end, satellite_end, control) = serial_link(&config.serial)?;
        let master = DrtioMaster::with_bridge(
            master_end,
            config.master.clone(),
            SimBridge::new(config.bridge),
        )?;
        let satellite = DrtioSatellite::with_bridge(
            satellite_end,
            config.satellite.clone(),
            SimBridge::new(config.bridge),
        )?;
        let seed = match config.phase {
            PhaseModel::Random { seed } => seed,
            _ => 0,
        };
        Ok(Self {
            master,
            satellite,
            control,
            phase: config.phase,
            rng: StdRng::seed_from_u64(seed),
            ticks: 0,
            max_wait: config.max_wait,
        })
    }

    fn recovered_first(&mut self) -> bool {
        match self.phase {
            PhaseModel::RecoveredFirst => true,
            PhaseModel::LocalFirst => false,
            PhaseModel::Random { .. } => self.rng.gen_bool(0.5),
        }
    }

    /// Advance both nodes by one tick.
    pub fn tick(&mut self) -> Result<()> {
        if self.recovered_first() {
            self.master.tick_recovered()?;
            self.master.tick_local();
        } else {
            self.master.tick_local();
            self.master.tick_recovered()?;
        }
        if self.recovered_first() {
            self.satellite.tick_recovered()?;
            self.satellite.tick_local();
        } else {
            self.satellite.tick_local();
            self.satellite.tick_recovered()?;
        }
        self.ticks += 1;
        Ok(())
    }

    pub fn run(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Tick until `done` holds, at most `limit` ticks. Returns the ticks spent.
    pub fn wait_for(
        &mut self,
        what: &'static str,
        limit: u64,
        mut done: impl FnMut(&Self) -> bool,
    ) -> Result<u64> {
        for spent in 0..=limit {
            if done(&*self) {
                return Ok(spent);
            }
            if spent < limit {
                self.tick()?;
            }
        }
        Err(NodeError::WaitTimeout { what, ticks: limit })
    }

    /// Tick until both ends consider the link ready.
    pub fn wait_link_ready(&mut self) -> Result<u64> {
        let limit = self.max_wait;
        let spent = self.wait_for("link ready", limit, |tb| {
            tb.master.link_state() == LinkState::Ready
                && tb.satellite.link_state() == LinkState::Ready
                && tb.master.controller().engine().is_link_ready()
                && tb.satellite.engine().state() != SatelliteState::AwaitLink
        })?;
        debug!(ticks = spent, "link ready");
        Ok(spent)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn max_wait(&self) -> u64 {
        self.max_wait
    }

    pub fn master(&self) -> &SimMaster {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut SimMaster {
        &mut self.master
    }

    pub fn satellite(&self) -> &SimSatellite {
        &self.satellite
    }

    pub fn satellite_mut(&mut self) -> &mut SimSatellite {
        &mut self.satellite
    }

    pub fn link_control(&self) -> &LinkControl {
        &self.control
    }

    fn advance(&mut self) -> std::result::Result<(), CriError> {
        match self.tick() {
            Ok(()) => Ok(()),
            Err(NodeError::Bridge(err)) => Err(err.into()),
            Err(_) => Err(CriError::Stalled { ticks: self.ticks }),
        }
    }

    /// Tick until request `id` completes.
    pub fn wait_completion(
        &mut self,
        id: RequestId,
        limit: u64,
    ) -> std::result::Result<Completion, CriError> {
        for _ in 0..=limit {
            if let Some(completion) = self.master.controller_mut().poll(id) {
                return Ok(completion);
            }
            self.advance()?;
        }
        Err(CriError::Stalled { ticks: limit })
    }

    /// Round trip an echo request.
    pub fn echo(&mut self) -> std::result::Result<EchoResult, CriError> {
        let id = self.master.request_echo()?;
        let limit = self.max_wait + self.master.manager().echo_timeout();
        for _ in 0..=limit {
            if let Some(outcome) = self.master.manager().outcome(id) {
                return outcome;
            }
            self.advance()?;
        }
        Err(CriError::Stalled { ticks: limit })
    }

    /// Free output slots of a satellite channel.
    pub fn fifo_space(&mut self, channel: u16, timeout: u64) -> std::result::Result<u16, CriError> {
        let id = self.master.controller_mut().fifo_space(channel, timeout)?;
        let completion = self.wait_completion(id, self.max_wait + timeout)?;
        match completion.result? {
            Response::FifoSpace { space } => Ok(space),
            other => {
                debug!(?other, "fifo space request answered with wrong response");
                Err(CriError::Aborted)
            }
        }
    }

    /// Reset the satellite and wait until it has released the reset.
    pub fn reset(&mut self, phy: bool) -> std::result::Result<(), CriError> {
        let before = self.satellite.engine().counters().resets;
        self.master.controller_mut().reset(phy)?;
        for _ in 0..=self.max_wait {
            let engine = self.satellite.engine();
            if engine.counters().resets > before && engine.state() == SatelliteState::Idle {
                return Ok(());
            }
            self.advance()?;
        }
        Err(CriError::Stalled {
            ticks: self.max_wait,
        })
    }
}

impl Cri for Testbench {
    fn submit_output(
        &mut self,
        channel: u16,
        timestamp: u64,
        data: u32,
    ) -> std::result::Result<(), CriError> {
        for _ in 0..=self.max_wait {
            match self
                .master
                .controller_mut()
                .submit_output(channel, timestamp, data)
            {
                Err(CriError::Busy) => self.advance()?,
                other => return other.map(drop),
            }
        }
        Err(CriError::Stalled {
            ticks: self.max_wait,
        })
    }

    fn request_input(&mut self, channel: u16, timeout: u64) -> std::result::Result<IoEvent, CriError> {
        let id = self.master.controller_mut().request_input(channel, timeout)?;
        let completion = self.wait_completion(id, self.max_wait + timeout)?;
        match completion.result? {
            Response::Input { timestamp, data } => Ok(IoEvent {
                channel,
                timestamp,
                data,
            }),
            other => {
                debug!(?other, "read request answered with wrong response");
                Err(CriError::Aborted)
            }
        }
    }

    fn get_status(&self) -> CriStatus {
        self.master.status()
    }
}
