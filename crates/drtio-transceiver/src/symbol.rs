use std::fmt;

/// One decoded symbol on the serial line.
///
/// Line coding is the transceiver's concern. Upper layers only distinguish
/// data bytes, control (K) codes and code groups that failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A data byte.
    Data(u8),
    /// A control code.
    Control(u8),
    /// A received code group that does not decode to any symbol.
    Invalid,
}

impl Symbol {
    /// Returns true for control codes.
    pub fn is_control(self) -> bool {
        matches!(self, Symbol::Control(_))
    }

    /// Returns the symbol damaged the way a bit error on the line would damage it.
    ///
    /// Data bytes get their lowest bit flipped, control codes no longer decode.
    pub fn corrupted(self) -> Self {
        match self {
            Symbol::Data(byte) => Symbol::Data(byte ^ 0x01),
            Symbol::Control(_) | Symbol::Invalid => Symbol::Invalid,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Data(byte) => write!(f, "D{byte:02X}"),
            Symbol::Control(code) => write!(f, "K{code:02X}"),
            Symbol::Invalid => f.write_str("INV"),
        }
    }
}
