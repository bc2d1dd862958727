use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransceiverError};
use crate::symbol::Symbol;
use crate::traits::Transceiver;

/// Configuration of an in-memory serial link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    /// One-way latency in symbols. Default: 8.
    pub latency: usize,
    /// Cycles of signal before clock/data recovery reports lock. Default: 16.
    pub lock_cycles: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            latency: 8,
            lock_cycles: 16,
        }
    }
}

impl SerialConfig {
    /// Check the configuration before building a link from it.
    pub fn validate(&self) -> Result<()> {
        if self.latency == 0 {
            return Err(TransceiverError::InvalidLatency(self.latency));
        }
        if self.lock_cycles == 0 {
            return Err(TransceiverError::InvalidLockTime(self.lock_cycles));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Master,
    Satellite,
}

#[derive(Debug)]
struct Lane {
    symbols: VecDeque<Symbol>,
    corrupt: usize,
}

impl Lane {
    fn new(latency: usize) -> Self {
        Self {
            symbols: std::iter::repeat(Symbol::Invalid).take(latency).collect(),
            corrupt: 0,
        }
    }
}

#[derive(Debug)]
struct Wire {
    /// Master to satellite.
    downstream: Lane,
    /// Satellite to master.
    upstream: Lane,
    connected: bool,
}

impl Wire {
    fn outgoing(&mut self, side: Side) -> &mut Lane {
        match side {
            Side::Master => &mut self.downstream,
            Side::Satellite => &mut self.upstream,
        }
    }

    fn incoming(&mut self, side: Side) -> &mut Lane {
        match side {
            Side::Master => &mut self.upstream,
            Side::Satellite => &mut self.downstream,
        }
    }
}

fn lock(wire: &Mutex<Wire>) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One end of an in-memory serial link.
#[derive(Debug)]
pub struct SerialEnd {
    wire: Arc<Mutex<Wire>>,
    side: Side,
    locked_for: u32,
    lock_cycles: u32,
}

impl Transceiver for SerialEnd {
    fn transmit(&mut self, symbol: Symbol) {
        let mut wire = lock(&self.wire);
        let connected = wire.connected;
        let lane = wire.outgoing(self.side);
        let symbol = if !connected {
            Symbol::Invalid
        } else if lane.corrupt > 0 && matches!(symbol, Symbol::Data(_)) {
            lane.corrupt -= 1;
            symbol.corrupted()
        } else {
            symbol
        };
        lane.symbols.push_back(symbol);
    }

    fn receive(&mut self) -> Symbol {
        let mut wire = lock(&self.wire);
        let connected = wire.connected;
        let symbol = wire
            .incoming(self.side)
            .symbols
            .pop_front()
            .unwrap_or(Symbol::Invalid);

        if connected {
            self.locked_for = self.locked_for.saturating_add(1);
            symbol
        } else {
            self.locked_for = 0;
            Symbol::Invalid
        }
    }

    fn rx_ready(&self) -> bool {
        self.locked_for >= self.lock_cycles
    }
}

/// Fault injection handle for an in-memory serial link.
#[derive(Debug, Clone)]
pub struct LinkControl {
    wire: Arc<Mutex<Wire>>,
}

impl LinkControl {
    /// Cut the cable: both ends lose signal and drop `rx_ready`.
    pub fn cut(&self) {
        info!("serial link cut");
        lock(&self.wire).connected = false;
    }

    /// Reconnect the cable. Each end regains `rx_ready` after its lock time.
    pub fn restore(&self) {
        info!("serial link restored");
        lock(&self.wire).connected = true;
    }

    /// Whether the cable is currently connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.wire).connected
    }

    /// Damage the next `count` data symbols sent by the master.
    pub fn corrupt_downstream(&self, count: usize) {
        debug!(count, "corrupting downstream data symbols");
        lock(&self.wire).downstream.corrupt += count;
    }

    /// Damage the next `count` data symbols sent by the satellite.
    pub fn corrupt_upstream(&self, count: usize) {
        debug!(count, "corrupting upstream data symbols");
        lock(&self.wire).upstream.corrupt += count;
    }
}

/// Build a connected full-duplex serial link.
///
/// Returns the master end, the satellite end and a fault injection handle.
pub fn serial_link(config: &SerialConfig) -> Result<(SerialEnd, SerialEnd, LinkControl)> {
    config.validate()?;

    let wire = Arc::new(Mutex::new(Wire {
        downstream: Lane::new(config.latency),
        upstream: Lane::new(config.latency),
        connected: true,
    }));

    let end = |side| SerialEnd {
        wire: Arc::clone(&wire),
        side,
        locked_for: 0,
        lock_cycles: config.lock_cycles,
    };

    let master = end(Side::Master);
    let satellite = end(Side::Satellite);
    Ok((master, satellite, LinkControl { wire }))
}
