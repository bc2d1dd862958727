//! DRTIO link layer.
//!
//! Multiplexes two logical sub-channels over one serial link:
//! - AUX: best-effort control-plane frames
//! - RT: latency-critical real-time packets
//!
//! Every frame on the wire is `SOF`, payload, `EOF`, a 4-byte CRC-32 and at
//! least one idle symbol of gap. Receive-side signals are produced in the
//! recovered clock domain and reach local-domain logic only through an
//! [`RxBridge`], which hands them out wrapped in [`Synced`].

pub mod assembler;
pub mod channel;
pub mod codec;
pub mod error;
pub mod layer;
pub mod rx;
pub mod stats;
pub mod sync;
pub mod tx;

pub use assembler::FrameAssembler;
pub use channel::SubChannel;
pub use codec::{encode_frame, frame_crc, Frame, LinkConfig, CRC_LEN, FRAME_OVERHEAD};
pub use error::{BridgeError, LinkError, Result};
pub use layer::LinkLayer;
pub use rx::{LinkRx, LinkState, LinkStatus, RxLane, RxSignals};
pub use stats::{LaneStats, LinkStats, LinkStatsSnapshot};
pub use sync::{
    BusLayout, BusWord, ElasticBuffer, FixedLatencyBridge, RxBridge, RxBus, SignalHandle,
    Synced, SynchronizerBuilder, DEFAULT_ELASTIC_DEPTH,
};
pub use tx::LinkTx;
