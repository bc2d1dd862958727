//! Sub-channels and the control codes that delimit them on the wire.
//!
//! Control codes follow the 8b/10b K-character assignments.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Idle sent while the receiver is not yet aligned (K28.5).
pub const TRAIN: u8 = 0xBC;

/// Idle sent once the receiver is aligned (K28.1).
pub const READY: u8 = 0x3C;

/// Start of an AUX frame (K27.7).
pub const SOF_AUX: u8 = 0xFB;

/// Start of an RT frame (K28.2).
pub const SOF_RT: u8 = 0x5C;

/// End of frame payload (K29.7). The CRC follows.
pub const EOF: u8 = 0xFD;

/// A logical sub-channel of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubChannel {
    /// Auxiliary control-plane traffic.
    Aux,
    /// Real-time traffic.
    Rt,
}

impl SubChannel {
    /// Control code that opens a frame on this sub-channel.
    pub fn start_code(self) -> u8 {
        match self {
            SubChannel::Aux => SOF_AUX,
            SubChannel::Rt => SOF_RT,
        }
    }

    /// Sub-channel opened by a start-of-frame code.
    pub fn from_start_code(code: u8) -> Option<Self> {
        match code {
            SOF_AUX => Some(SubChannel::Aux),
            SOF_RT => Some(SubChannel::Rt),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            SubChannel::Aux => "AUX",
            SubChannel::Rt => "RT",
        }
    }
}

impl fmt::Display for SubChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true for the two idle codes.
pub fn is_idle(code: u8) -> bool {
    code == TRAIN || code == READY
}
