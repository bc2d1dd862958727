//! DRTIO real-time layer.
//!
//! Packet engines for both ends of a link, the satellite's I/O adapter, the
//! master's controller interface (CRI) and the node assemblers that wire them
//! to a [`drtio_link::LinkLayer`]. Everything here runs in the local clock
//! domain and sees the link only through bridged signals.

pub mod aux;
pub mod controller;
pub mod error;
pub mod ios;
pub mod master;
pub mod node;
pub mod packet;
pub mod registers;
pub mod satellite;
pub mod testbench;
pub mod timestamp;
pub mod traits;

pub use aux::AuxController;
pub use controller::{Cri, CriStatus, EchoResult, RtController, RtManager};
pub use error::{AuxError, CriError, IosError, NodeError, PacketError, RegisterError, Result};
pub use ios::{IoEvent, Ios, INPUT_FIFO_DEPTH, OUTPUT_FIFO_DEPTH};
pub use master::{
    Completion, MasterCounters, MasterEngine, MasterState, RequestId, Response,
    DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_REPLY_TIMEOUT,
};
pub use node::{DrtioMaster, DrtioSatellite, MasterConfig, SatelliteConfig, DEFAULT_CHANNEL_COUNT};
pub use packet::{Command, ErrorCode, Reply};
pub use registers::{Access, Register};
pub use satellite::{
    ResetSignals, SatelliteCounters, SatelliteEngine, SatelliteState, INBOUND_FIFO_DEPTH,
    RESET_PULSE_CYCLES,
};
pub use testbench::{BridgeKind, PhaseModel, SimBridge, Testbench, TestbenchConfig};
pub use timestamp::TimestampConfig;
pub use traits::FrameSink;
