use std::fmt;
use std::io;

use drtio_core::{CriError, NodeError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LINK_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn config_error(context: &str, err: serde_json::Error) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn node_error(context: &str, err: NodeError) -> CliError {
    let code = match err {
        NodeError::WaitTimeout { .. } => TIMEOUT,
        NodeError::Bridge(_) => INTERNAL,
        NodeError::Transceiver(_)
        | NodeError::InvalidTimestampWidth { .. }
        | NodeError::InvalidChannelCount(_) => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn cri_error(context: &str, err: CriError) -> CliError {
    let code = match err {
        CriError::LinkDown => LINK_ERROR,
        CriError::ReplyTimeout { .. } | CriError::Stalled { .. } => TIMEOUT,
        CriError::InvalidChannel(_) | CriError::TimestampOutOfRange(_) => USAGE,
        CriError::Satellite { .. } | CriError::Busy | CriError::Aborted => FAILURE,
        CriError::Bridge(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
