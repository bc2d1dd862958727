use bytes::Bytes;
use drtio_link::{LinkError, LinkLayer, RxBridge, SubChannel};
use drtio_transceiver::Transceiver;

/// Accepts frames for transmission on a sub-channel.
///
/// Engines only see this seam, not the link layer behind it.
pub trait FrameSink {
    fn try_send(&mut self, sub_channel: SubChannel, payload: Bytes) -> Result<(), LinkError>;
}

impl<X: Transceiver, B: RxBridge> FrameSink for LinkLayer<X, B> {
    fn try_send(&mut self, sub_channel: SubChannel, payload: Bytes) -> Result<(), LinkError> {
        LinkLayer::try_send(self, sub_channel, payload)
    }
}
