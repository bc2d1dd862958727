/// Errors that can occur while setting up a transceiver.
#[derive(Debug, thiserror::Error)]
pub enum TransceiverError {
    /// The serial link latency must cover at least one symbol.
    #[error("invalid link latency ({0} symbols, min 1)")]
    InvalidLatency(usize),

    /// The CDR lock time must cover at least one symbol.
    #[error("invalid lock time ({0} cycles, min 1)")]
    InvalidLockTime(u32),
}

pub type Result<T> = std::result::Result<T, TransceiverError>;
