use drtio_link::{BridgeError, LinkError};

use crate::packet::ErrorCode;

/// Errors decoding an RT packet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    /// Zero-length payload.
    #[error("empty packet")]
    Empty,

    /// The type byte is not a known packet type.
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),

    /// Fewer bytes than the packet type requires.
    #[error("truncated packet (type 0x{packet_type:02x}, need {need} bytes, got {got})")]
    Truncated {
        packet_type: u8,
        need: usize,
        got: usize,
    },

    /// More bytes than the packet type carries.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// Error notification with an unknown code.
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
}

/// Errors from the satellite I/O adapter.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IosError {
    #[error("invalid channel {0}")]
    InvalidChannel(u16),

    #[error("output FIFO full on channel {0}")]
    OutputOverflow(u16),

    #[error("input FIFO full on channel {0}")]
    InputOverflow(u16),
}

/// Errors surfaced through the controller interface.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CriError {
    /// The link is not ready, or went down while the request was pending.
    #[error("link down")]
    LinkDown,

    /// No reply within the timeout.
    #[error("reply timeout after {ticks} ticks")]
    ReplyTimeout { ticks: u64 },

    /// Channel outside the configured channel count.
    #[error("invalid channel {0}")]
    InvalidChannel(u16),

    /// Timestamp wider than the configured timestamp width.
    #[error("timestamp {0} out of range")]
    TimestampOutOfRange(u64),

    /// The command queue is full.
    #[error("command queue full")]
    Busy,

    /// An explicit reset cancelled the request.
    #[error("request aborted by reset")]
    Aborted,

    /// The satellite answered the request with an error notification.
    #[error("satellite error {code} on channel {channel}")]
    Satellite { code: ErrorCode, channel: u16 },

    /// A node hit a fatal bridge error while the call was in progress.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// The call did not complete within the testbench's wait bound.
    #[error("no completion after {ticks} ticks")]
    Stalled { ticks: u64 },
}

/// Errors from the auxiliary controller.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuxError {
    /// The previous AUX frame has not been sent yet.
    #[error("aux channel busy")]
    Busy,

    #[error("aux payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("link down")]
    LinkDown,
}

impl From<LinkError> for AuxError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Busy(_) => AuxError::Busy,
            LinkError::LinkDown => AuxError::LinkDown,
            LinkError::PayloadTooLarge { size, max, .. } => AuxError::PayloadTooLarge { size, max },
        }
    }
}

/// Errors writing to the register boundary.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("unknown register: {0}")]
    Unknown(String),

    #[error("register is read-only: {0}")]
    ReadOnly(String),

    /// The action behind a command register failed.
    #[error("register action failed: {0}")]
    Action(#[from] CriError),
}

/// Errors building or running a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Fatal clock-domain bridge error.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Invalid serial link configuration.
    #[error("transceiver error: {0}")]
    Transceiver(#[from] drtio_transceiver::TransceiverError),

    /// Timestamp widths that cannot describe a timestamp.
    #[error("invalid timestamp widths (fine {fine}, full {full})")]
    InvalidTimestampWidth { fine: u32, full: u32 },

    /// A node needs at least one channel.
    #[error("invalid channel count {0}")]
    InvalidChannelCount(u16),

    /// A bounded wait expired.
    #[error("timed out after {ticks} ticks waiting for {what}")]
    WaitTimeout { what: &'static str, ticks: u64 },
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_failure_survives_completion_copy() {
        let err = CriError::from(BridgeError::Overflow { depth: 4 });
        let copy = err.clone();
        assert_eq!(copy, err);
        assert_eq!(
            RegisterError::from(copy).to_string(),
            "register action failed: bridge error: clock-domain bridge overflow (depth 4)"
        );
    }
}
