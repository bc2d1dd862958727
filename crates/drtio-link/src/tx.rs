use std::collections::VecDeque;

use bytes::Bytes;
use drtio_transceiver::Symbol;
use tracing::{debug, trace, warn};

use crate::channel::{SubChannel, READY, TRAIN};
use crate::codec::{encode_frame, LinkConfig};
use crate::error::{LinkError, Result};
use crate::rx::LinkStatus;
use crate::sync::Synced;

#[derive(Debug, Default)]
struct TxPort {
    pending: Option<Bytes>,
    busy: bool,
    frames_sent: u64,
}

/// Transmit half of the link layer. Runs in the local clock domain.
///
/// Each sub-channel holds at most one frame: a port stays busy from
/// [`LinkTx::try_send`] until the frame's last CRC symbol has gone out. When
/// both ports have a frame waiting, RT goes first.
#[derive(Debug)]
pub struct LinkTx {
    config: LinkConfig,
    aux: TxPort,
    rt: TxPort,
    current: Option<SubChannel>,
    symbols: VecDeque<Symbol>,
    ready: bool,
    discarded: u64,
}

impl LinkTx {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            aux: TxPort::default(),
            rt: TxPort::default(),
            current: None,
            symbols: VecDeque::new(),
            ready: false,
            discarded: 0,
        }
    }

    fn port(&self, sub_channel: SubChannel) -> &TxPort {
        match sub_channel {
            SubChannel::Aux => &self.aux,
            SubChannel::Rt => &self.rt,
        }
    }

    fn port_mut(&mut self, sub_channel: SubChannel) -> &mut TxPort {
        match sub_channel {
            SubChannel::Aux => &mut self.aux,
            SubChannel::Rt => &mut self.rt,
        }
    }

    /// Queue one frame on a sub-channel.
    pub fn try_send(&mut self, sub_channel: SubChannel, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if !self.ready {
            return Err(LinkError::LinkDown);
        }
        let max = self.config.max_payload(sub_channel);
        if payload.len() > max {
            return Err(LinkError::PayloadTooLarge {
                sub_channel,
                size: payload.len(),
                max,
            });
        }
        let port = self.port_mut(sub_channel);
        if port.busy {
            return Err(LinkError::Busy(sub_channel));
        }
        port.pending = Some(payload);
        port.busy = true;
        Ok(())
    }

    /// Whether a frame on this sub-channel has not closed yet.
    pub fn is_busy(&self, sub_channel: SubChannel) -> bool {
        self.port(sub_channel).busy
    }

    /// Whether the transmitter last saw the link as ready.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Frames fully transmitted on a sub-channel.
    pub fn frames_sent(&self, sub_channel: SubChannel) -> u64 {
        self.port(sub_channel).frames_sent
    }

    /// Frames dropped because the link went down before they closed.
    pub fn frames_discarded(&self) -> u64 {
        self.discarded
    }

    /// Produce the symbol for this local cycle.
    pub fn tick(&mut self, status: Synced<LinkStatus>) -> Symbol {
        let status = *status.get();
        if !status.is_ready() {
            if self.ready {
                debug!(state = status.state.name(), "transmitter disabled");
            }
            self.ready = false;
            self.discard();
            return Symbol::Control(if status.aligned { READY } else { TRAIN });
        }
        if !self.ready {
            debug!("transmitter enabled");
            self.ready = true;
        }

        if self.symbols.is_empty() {
            self.start_next();
        }
        let symbol = self.symbols.pop_front().unwrap_or(Symbol::Control(READY));

        // Only the gap idle is left: the frame has closed.
        if self.symbols.len() == 1 {
            if let Some(sub_channel) = self.current.take() {
                let port = self.port_mut(sub_channel);
                port.busy = false;
                port.frames_sent += 1;
            }
        }
        symbol
    }

    fn start_next(&mut self) {
        let next = [SubChannel::Rt, SubChannel::Aux]
            .into_iter()
            .find_map(|sub_channel| {
                self.port_mut(sub_channel)
                    .pending
                    .take()
                    .map(|payload| (sub_channel, payload))
            });
        if let Some((sub_channel, payload)) = next {
            trace!(%sub_channel, len = payload.len(), "frame start");
            encode_frame(sub_channel, &payload, &mut self.symbols);
            self.current = Some(sub_channel);
        }
    }

    fn discard(&mut self) {
        let mut dropped = 0;
        if self.current.take().is_some() {
            dropped += 1;
        }
        self.symbols.clear();
        for port in [&mut self.aux, &mut self.rt] {
            if port.pending.take().is_some() {
                dropped += 1;
            }
            port.busy = false;
        }
        if dropped > 0 {
            warn!(dropped, "discarding frames on link loss");
            self.discarded += dropped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{EOF, SOF_AUX, SOF_RT};
    use crate::rx::LinkState;

    fn ready() -> Synced<LinkStatus> {
        Synced::new(LinkStatus {
            state: LinkState::Ready,
            aligned: true,
        })
    }

    fn enabled() -> LinkTx {
        let mut tx = LinkTx::new(LinkConfig::default());
        assert_eq!(tx.tick(ready()), Symbol::Control(READY));
        tx
    }

    #[test]
    fn idles_reflect_alignment_while_not_ready() {
        let mut tx = LinkTx::new(LinkConfig::default());
        let training = Synced::new(LinkStatus {
            state: LinkState::Training,
            aligned: false,
        });
        assert_eq!(tx.tick(training), Symbol::Control(TRAIN));

        let aligned = Synced::new(LinkStatus {
            state: LinkState::Training,
            aligned: true,
        });
        assert_eq!(tx.tick(aligned), Symbol::Control(READY));
    }

    #[test]
    fn send_rejected_while_link_down() {
        let mut tx = LinkTx::new(LinkConfig::default());
        assert_eq!(
            tx.try_send(SubChannel::Rt, Bytes::from_static(b"x")),
            Err(LinkError::LinkDown)
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut tx = enabled();
        let err = tx.try_send(SubChannel::Rt, vec![0u8; 65]).unwrap_err();
        assert_eq!(
            err,
            LinkError::PayloadTooLarge {
                sub_channel: SubChannel::Rt,
                size: 65,
                max: 64
            }
        );
    }

    #[test]
    fn back_to_back_send_is_busy_until_frame_closes() {
        let mut tx = enabled();
        tx.try_send(SubChannel::Rt, Bytes::from_static(b"ab")).unwrap();
        assert_eq!(
            tx.try_send(SubChannel::Rt, Bytes::from_static(b"cd")),
            Err(LinkError::Busy(SubChannel::Rt))
        );

        // SOF, 2 data, EOF, 3 CRC bytes: still busy.
        for _ in 0..7 {
            tx.tick(ready());
            assert!(tx.is_busy(SubChannel::Rt));
        }
        // Last CRC byte closes the frame.
        assert!(matches!(tx.tick(ready()), Symbol::Data(_)));
        assert!(!tx.is_busy(SubChannel::Rt));
        assert_eq!(tx.frames_sent(SubChannel::Rt), 1);

        tx.try_send(SubChannel::Rt, Bytes::from_static(b"cd")).unwrap();
        assert_eq!(tx.tick(ready()), Symbol::Control(READY));
        assert_eq!(tx.tick(ready()), Symbol::Control(SOF_RT));
    }

    #[test]
    fn rt_has_priority_over_aux() {
        let mut tx = enabled();
        tx.try_send(SubChannel::Aux, Bytes::from_static(b"a")).unwrap();
        tx.try_send(SubChannel::Rt, Bytes::from_static(b"r")).unwrap();

        let wire: Vec<_> = (0..20).map(|_| tx.tick(ready())).collect();
        assert_eq!(wire[0], Symbol::Control(SOF_RT));
        assert_eq!(wire[1], Symbol::Data(b'r'));
        assert_eq!(wire[2], Symbol::Control(EOF));
        assert_eq!(wire[7], Symbol::Control(READY));
        assert_eq!(wire[8], Symbol::Control(SOF_AUX));
        assert!(!tx.is_busy(SubChannel::Aux));
    }

    #[test]
    fn link_loss_discards_frames() {
        let mut tx = enabled();
        tx.try_send(SubChannel::Aux, Bytes::from_static(b"abc")).unwrap();
        tx.try_send(SubChannel::Rt, Bytes::from_static(b"r")).unwrap();
        tx.tick(ready());

        let down = Synced::new(LinkStatus::default());
        assert_eq!(tx.tick(down), Symbol::Control(TRAIN));
        assert_eq!(tx.frames_discarded(), 2);
        assert!(!tx.is_busy(SubChannel::Aux));
        assert!(!tx.is_busy(SubChannel::Rt));
        assert!(!tx.is_ready());
    }
}
