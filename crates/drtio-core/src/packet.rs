//! RT packet wire codec.
//!
//! First byte is the packet type, fields follow in little endian:
//!
//! ```text
//! master -> satellite                  satellite -> master
//! 0x00 echo request                    0x80 echo reply    ts:u64
//! 0x01 set time      ts:u64            0x81 read reply    ch:u16 ts:u64 data:u32
//! 0x02 reset                           0x82 fifo space    ch:u16 space:u16
//! 0x03 reset phy                       0x83 error         code:u8 ch:u16
//! 0x04 write         ch:u16 ts:u64 data:u32
//! 0x05 read request  ch:u16
//! 0x06 fifo space    ch:u16
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::PacketError;

pub const TYPE_ECHO_REQUEST: u8 = 0x00;
pub const TYPE_SET_TIME: u8 = 0x01;
pub const TYPE_RESET: u8 = 0x02;
pub const TYPE_RESET_PHY: u8 = 0x03;
pub const TYPE_WRITE: u8 = 0x04;
pub const TYPE_READ_REQUEST: u8 = 0x05;
pub const TYPE_FIFO_SPACE_REQUEST: u8 = 0x06;

pub const TYPE_ECHO_REPLY: u8 = 0x80;
pub const TYPE_READ_REPLY: u8 = 0x81;
pub const TYPE_FIFO_SPACE_REPLY: u8 = 0x82;
pub const TYPE_ERROR: u8 = 0x83;

/// Error codes carried by error notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidChannel = 1,
    OutputOverflow = 2,
    UnknownPacket = 3,
    TruncatedPacket = 4,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 4] = [
        ErrorCode::InvalidChannel,
        ErrorCode::OutputOverflow,
        ErrorCode::UnknownPacket,
        ErrorCode::TruncatedPacket,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InvalidChannel => "invalid_channel",
            ErrorCode::OutputOverflow => "output_overflow",
            ErrorCode::UnknownPacket => "unknown_packet",
            ErrorCode::TruncatedPacket => "truncated_packet",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Master to satellite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Echo,
    /// Load the satellite's timestamp counter (coarse units).
    SetTime { timestamp: u64 },
    Reset,
    ResetPhy,
    Write { channel: u16, timestamp: u64, data: u32 },
    ReadRequest { channel: u16 },
    FifoSpaceRequest { channel: u16 },
}

/// Satellite to master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Satellite timestamp counter at the time of the reply (coarse units).
    Echo { timestamp: u64 },
    Read { channel: u16, timestamp: u64, data: u32 },
    FifoSpace { channel: u16, space: u16 },
    Error { code: ErrorCode, channel: u16 },
}

fn body_len(packet_type: u8) -> Option<usize> {
    Some(match packet_type {
        TYPE_ECHO_REQUEST | TYPE_RESET | TYPE_RESET_PHY => 0,
        TYPE_SET_TIME | TYPE_ECHO_REPLY => 8,
        TYPE_WRITE | TYPE_READ_REPLY => 14,
        TYPE_READ_REQUEST | TYPE_FIFO_SPACE_REQUEST => 2,
        TYPE_FIFO_SPACE_REPLY => 4,
        TYPE_ERROR => 3,
        _ => return None,
    })
}

/// Split off the type byte and check the body length.
fn open(mut src: &[u8]) -> Result<(u8, &[u8]), PacketError> {
    if src.is_empty() {
        return Err(PacketError::Empty);
    }
    let packet_type = src.get_u8();
    let need = body_len(packet_type).ok_or(PacketError::UnknownType(packet_type))?;
    if src.len() < need {
        return Err(PacketError::Truncated {
            packet_type,
            need,
            got: src.len(),
        });
    }
    if src.len() > need {
        return Err(PacketError::TrailingBytes(src.len() - need));
    }
    Ok((packet_type, src))
}

impl Command {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(15);
        match *self {
            Command::Echo => buf.put_u8(TYPE_ECHO_REQUEST),
            Command::SetTime { timestamp } => {
                buf.put_u8(TYPE_SET_TIME);
                buf.put_u64_le(timestamp);
            }
            Command::Reset => buf.put_u8(TYPE_RESET),
            Command::ResetPhy => buf.put_u8(TYPE_RESET_PHY),
            Command::Write {
                channel,
                timestamp,
                data,
            } => {
                buf.put_u8(TYPE_WRITE);
                buf.put_u16_le(channel);
                buf.put_u64_le(timestamp);
                buf.put_u32_le(data);
            }
            Command::ReadRequest { channel } => {
                buf.put_u8(TYPE_READ_REQUEST);
                buf.put_u16_le(channel);
            }
            Command::FifoSpaceRequest { channel } => {
                buf.put_u8(TYPE_FIFO_SPACE_REQUEST);
                buf.put_u16_le(channel);
            }
        }
        buf.freeze()
    }

    pub fn decode(src: &[u8]) -> Result<Self, PacketError> {
        let (packet_type, mut body) = open(src)?;
        Ok(match packet_type {
            TYPE_ECHO_REQUEST => Command::Echo,
            TYPE_SET_TIME => Command::SetTime {
                timestamp: body.get_u64_le(),
            },
            TYPE_RESET => Command::Reset,
            TYPE_RESET_PHY => Command::ResetPhy,
            TYPE_WRITE => Command::Write {
                channel: body.get_u16_le(),
                timestamp: body.get_u64_le(),
                data: body.get_u32_le(),
            },
            TYPE_READ_REQUEST => Command::ReadRequest {
                channel: body.get_u16_le(),
            },
            TYPE_FIFO_SPACE_REQUEST => Command::FifoSpaceRequest {
                channel: body.get_u16_le(),
            },
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    /// Whether the satellite answers this command.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Command::Echo | Command::ReadRequest { .. } | Command::FifoSpaceRequest { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Echo => "echo",
            Command::SetTime { .. } => "set_time",
            Command::Reset => "reset",
            Command::ResetPhy => "reset_phy",
            Command::Write { .. } => "write",
            Command::ReadRequest { .. } => "read_request",
            Command::FifoSpaceRequest { .. } => "fifo_space_request",
        }
    }
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(15);
        match *self {
            Reply::Echo { timestamp } => {
                buf.put_u8(TYPE_ECHO_REPLY);
                buf.put_u64_le(timestamp);
            }
            Reply::Read {
                channel,
                timestamp,
                data,
            } => {
                buf.put_u8(TYPE_READ_REPLY);
                buf.put_u16_le(channel);
                buf.put_u64_le(timestamp);
                buf.put_u32_le(data);
            }
            Reply::FifoSpace { channel, space } => {
                buf.put_u8(TYPE_FIFO_SPACE_REPLY);
                buf.put_u16_le(channel);
                buf.put_u16_le(space);
            }
            Reply::Error { code, channel } => {
                buf.put_u8(TYPE_ERROR);
                buf.put_u8(code as u8);
                buf.put_u16_le(channel);
            }
        }
        buf.freeze()
    }

    pub fn decode(src: &[u8]) -> Result<Self, PacketError> {
        let (packet_type, mut body) = open(src)?;
        Ok(match packet_type {
            TYPE_ECHO_REPLY => Reply::Echo {
                timestamp: body.get_u64_le(),
            },
            TYPE_READ_REPLY => Reply::Read {
                channel: body.get_u16_le(),
                timestamp: body.get_u64_le(),
                data: body.get_u32_le(),
            },
            TYPE_FIFO_SPACE_REPLY => Reply::FifoSpace {
                channel: body.get_u16_le(),
                space: body.get_u16_le(),
            },
            TYPE_ERROR => {
                let raw = body.get_u8();
                let code = ErrorCode::from_u8(raw).ok_or(PacketError::UnknownErrorCode(raw))?;
                Reply::Error {
                    code,
                    channel: body.get_u16_le(),
                }
            }
            other => return Err(PacketError::UnknownType(other)),
        })
    }
}

impl From<&PacketError> for ErrorCode {
    fn from(err: &PacketError) -> Self {
        match err {
            PacketError::Truncated { .. } | PacketError::Empty => ErrorCode::TruncatedPacket,
            _ => ErrorCode::UnknownPacket,
        }
    }
}
