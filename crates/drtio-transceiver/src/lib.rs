//! Transceiver boundary for the DRTIO link.
//!
//! The physical transceiver (serializer, line coding, clock/data recovery) is a
//! black box. What the rest of the stack sees is:
//! - a stream of fixed-width coded [`Symbol`]s, one per clock cycle in each direction
//! - a `rx_ready` flag that is high while clock/data recovery is locked
//!
//! This is the lowest layer of the stack. [`serial_link`] provides an in-memory
//! full-duplex link with fixed latency and fault injection, used by the
//! testbench and the tests.

pub mod error;
pub mod serial;
pub mod symbol;
pub mod traits;

pub use error::{Result, TransceiverError};
pub use serial::{serial_link, LinkControl, SerialConfig, SerialEnd};
pub use symbol::Symbol;
pub use traits::Transceiver;
