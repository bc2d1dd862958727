use std::collections::VecDeque;

use bytes::Bytes;
use drtio_transceiver::Symbol;
use serde::{Deserialize, Serialize};

use crate::channel::{SubChannel, EOF, READY};

/// CRC-32 trailer length in symbols.
pub const CRC_LEN: usize = 4;

/// Symbols a frame occupies on top of its payload: SOF + EOF + CRC + gap.
pub const FRAME_OVERHEAD: usize = 2 + CRC_LEN + 1;

/// Default maximum AUX payload: 1 KiB.
pub const DEFAULT_AUX_MAX_PAYLOAD: usize = 1024;

/// Default maximum RT payload. RT packets are at most 15 bytes.
pub const DEFAULT_RT_MAX_PAYLOAD: usize = 64;

/// Default number of consecutive idles needed for receiver alignment.
pub const DEFAULT_TRAINING_SYMBOLS: u32 = 16;

/// A complete frame on one sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The sub-channel this frame belongs to.
    pub sub_channel: SubChannel,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(sub_channel: SubChannel, payload: impl Into<Bytes>) -> Self {
        Self {
            sub_channel,
            payload: payload.into(),
        }
    }

    /// The number of symbols this frame occupies on the wire, gap included.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// CRC over a frame payload.
pub fn frame_crc(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a frame into symbols.
///
/// Wire format:
/// ```text
/// ┌─────────┬─────────────────┬─────┬──────────────┬───────┐
/// │ SOF (K) │ Payload (D...)  │ EOF │ CRC-32 (4D)  │ READY │
/// │ AUX/RT  │                 │ (K) │ LE, payload  │ gap   │
/// └─────────┴─────────────────┴─────┴──────────────┴───────┘
/// ```
pub fn encode_frame(sub_channel: SubChannel, payload: &[u8], dst: &mut VecDeque<Symbol>) {
    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.push_back(Symbol::Control(sub_channel.start_code()));
    dst.extend(payload.iter().map(|&byte| Symbol::Data(byte)));
    dst.push_back(Symbol::Control(EOF));
    dst.extend(frame_crc(payload).to_le_bytes().map(Symbol::Data));
    dst.push_back(Symbol::Control(READY));
}

/// Configuration for the link layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkConfig {
    /// Consecutive idles before the receiver counts as aligned. Default: 16.
    pub training_symbols: u32,
    /// Maximum AUX payload size in bytes. Default: 1 KiB.
    pub aux_max_payload: usize,
    /// Maximum RT payload size in bytes. Default: 64.
    pub rt_max_payload: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            training_symbols: DEFAULT_TRAINING_SYMBOLS,
            aux_max_payload: DEFAULT_AUX_MAX_PAYLOAD,
            rt_max_payload: DEFAULT_RT_MAX_PAYLOAD,
        }
    }
}

impl LinkConfig {
    /// Maximum payload accepted on a sub-channel.
    pub fn max_payload(&self, sub_channel: SubChannel) -> usize {
        match sub_channel {
            SubChannel::Aux => self.aux_max_payload,
            SubChannel::Rt => self.rt_max_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SOF_RT;

    #[test]
    fn encode_layout() {
        let mut wire = VecDeque::new();
        encode_frame(SubChannel::Rt, b"ab", &mut wire);

        let crc = frame_crc(b"ab").to_le_bytes();
        let expected = vec![
            Symbol::Control(SOF_RT),
            Symbol::Data(b'a'),
            Symbol::Data(b'b'),
            Symbol::Control(EOF),
            Symbol::Data(crc[0]),
            Symbol::Data(crc[1]),
            Symbol::Data(crc[2]),
            Symbol::Data(crc[3]),
            Symbol::Control(READY),
        ];
        assert_eq!(wire.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn empty_payload_still_framed() {
        let mut wire = VecDeque::new();
        encode_frame(SubChannel::Aux, b"", &mut wire);
        assert_eq!(wire.len(), FRAME_OVERHEAD);
    }

    #[test]
    fn frame_wire_size() {
        let frame = Frame::new(SubChannel::Aux, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), FRAME_OVERHEAD + 4);
    }

    #[test]
    fn max_payload_per_sub_channel() {
        let config = LinkConfig::default();
        assert_eq!(config.max_payload(SubChannel::Aux), DEFAULT_AUX_MAX_PAYLOAD);
        assert_eq!(config.max_payload(SubChannel::Rt), DEFAULT_RT_MAX_PAYLOAD);
    }
}
