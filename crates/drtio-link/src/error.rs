use crate::channel::SubChannel;

/// Errors that can occur when handing frames to the link layer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    /// The previous frame on this sub-channel has not closed yet.
    #[error("{0} sub-channel busy (previous frame not closed)")]
    Busy(SubChannel),

    /// The link is not ready.
    #[error("link down")]
    LinkDown,

    /// The payload exceeds the sub-channel's maximum size.
    #[error("{sub_channel} payload too large ({size} bytes, max {max})")]
    PayloadTooLarge {
        sub_channel: SubChannel,
        size: usize,
        max: usize,
    },
}

/// Errors raised by the clock-domain bridge.
///
/// These are configuration errors: a correctly built node never sees them at
/// runtime.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    /// More words were written than the buffer can hold.
    #[error("clock-domain bridge overflow (depth {depth})")]
    Overflow { depth: usize },

    /// The registered signals do not fit one bus word.
    #[error("bus too wide ({width} bits, max {max})")]
    BusTooWide { width: u32, max: u32 },

    /// No signal was registered before finalization.
    #[error("no signals registered on the bus")]
    EmptyBus,
}

pub type Result<T> = std::result::Result<T, LinkError>;
