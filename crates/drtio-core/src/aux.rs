//! Auxiliary (control-plane) channel: whole-frame send and a single-slot
//! receive mailbox. No retransmission.

use bytes::Bytes;
use drtio_link::{FrameAssembler, RxLane, SubChannel, Synced};
use tracing::{debug, warn};

use crate::error::AuxError;
use crate::traits::FrameSink;

#[derive(Debug, Default)]
pub struct AuxController {
    assembler: FrameAssembler,
    mailbox: Option<Bytes>,
    sent: u64,
    received: u64,
    rx_overflows: u64,
}

impl AuxController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand one payload to the AUX transmit port.
    pub fn send(&mut self, sink: &mut impl FrameSink, payload: impl Into<Bytes>) -> Result<(), AuxError> {
        let payload = payload.into();
        let len = payload.len();
        sink.try_send(SubChannel::Aux, payload)?;
        self.sent += 1;
        debug!(len, "aux frame accepted");
        Ok(())
    }

    /// Take the received payload, if any.
    pub fn receive(&mut self) -> Option<Bytes> {
        self.mailbox.take()
    }

    /// Feed one cycle of the bridged AUX lane.
    pub fn on_rx(&mut self, lane: &Synced<RxLane>) {
        let Some(payload) = self.assembler.push(lane).map(Synced::into_inner) else {
            return;
        };
        if self.mailbox.is_some() {
            self.rx_overflows += 1;
            warn!(
                len = payload.len(),
                overflows = self.rx_overflows,
                "aux mailbox full, frame dropped"
            );
            return;
        }
        self.received += 1;
        self.mailbox = Some(payload);
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.assembler.reset();
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn rx_overflows(&self) -> u64 {
        self.rx_overflows
    }

    /// Frames dropped by the assembler for failing integrity checks.
    pub fn rx_dropped(&self) -> u64 {
        self.assembler.dropped()
    }
}
