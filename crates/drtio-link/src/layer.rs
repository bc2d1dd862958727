use bytes::Bytes;
use drtio_transceiver::Transceiver;
use tracing::trace;

use crate::channel::SubChannel;
use crate::codec::LinkConfig;
use crate::error::{BridgeError, Result};
use crate::rx::{LinkRx, LinkState, LinkStatus, RxSignals};
use crate::sync::{ElasticBuffer, RxBridge, RxBus, Synced};
use crate::tx::LinkTx;

/// Link layer over one transceiver.
///
/// [`tick_recovered`](Self::tick_recovered) belongs to the recovered clock
/// domain; [`receive`](Self::receive) and [`transmit`](Self::transmit) to the
/// local one. The bridge is the only path between them.
pub struct LinkLayer<X, B = ElasticBuffer> {
    transceiver: X,
    rx: LinkRx,
    tx: LinkTx,
    bus: RxBus,
    bridge: B,
    held_link: LinkStatus,
}

impl<X: Transceiver> LinkLayer<X> {
    pub fn new(transceiver: X, config: LinkConfig) -> std::result::Result<Self, BridgeError> {
        Self::with_bridge(transceiver, config, ElasticBuffer::new())
    }
}

impl<X: Transceiver, B: RxBridge> LinkLayer<X, B> {
    pub fn with_bridge(
        transceiver: X,
        config: LinkConfig,
        bridge: B,
    ) -> std::result::Result<Self, BridgeError> {
        Ok(Self {
            transceiver,
            rx: LinkRx::new(config.clone()),
            tx: LinkTx::new(config),
            bus: RxBus::new()?,
            bridge,
            held_link: LinkStatus::default(),
        })
    }

    /// Recovered-domain step: receive one symbol and push the decoded
    /// signals into the bridge.
    pub fn tick_recovered(&mut self) -> std::result::Result<(), BridgeError> {
        let symbol = self.transceiver.receive();
        let rx_ready = self.transceiver.rx_ready();
        let signals = self.rx.tick(symbol, rx_ready);
        self.bridge.write(self.bus.pack(&signals))
    }

    /// Local-domain step: this cycle's receive signals.
    ///
    /// When the bridge has nothing to hand out, the lanes are idle and the
    /// last link status is held.
    pub fn receive(&mut self) -> Synced<RxSignals> {
        match self.bridge.read() {
            Some(word) => {
                let signals = self.bus.unpack(word);
                self.held_link = signals.get().link;
                signals
            }
            None => {
                trace!("bridge empty");
                let held = self.held_link;
                Synced::idle().map(|signals| RxSignals {
                    link: held,
                    ..signals
                })
            }
        }
    }

    /// Local-domain step: send this cycle's symbol.
    pub fn transmit(&mut self, status: Synced<LinkStatus>) {
        let symbol = self.tx.tick(status);
        self.transceiver.transmit(symbol);
    }

    /// Queue a frame on a sub-channel.
    pub fn try_send(&mut self, sub_channel: SubChannel, payload: impl Into<Bytes>) -> Result<()> {
        self.tx.try_send(sub_channel, payload)
    }

    pub fn is_busy(&self, sub_channel: SubChannel) -> bool {
        self.tx.is_busy(sub_channel)
    }

    pub fn tx(&self) -> &LinkTx {
        &self.tx
    }

    /// Receiver state in the recovered domain. Diagnostics only.
    pub fn recovered_state(&self) -> LinkState {
        self.rx.state()
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn transceiver(&self) -> &X {
        &self.transceiver
    }

    pub fn transceiver_mut(&mut self) -> &mut X {
        &mut self.transceiver
    }
}
