//! Distributed real-time I/O over a single serial link.
//!
//! A master node drives timestamped I/O on a remote satellite node. Both ends
//! are tick-driven state machines, so a whole system can be simulated and
//! tested deterministically.
//!
//! # Crate Structure
//!
//! - [`transceiver`]: symbol-level serial link boundary and its simulation
//! - [`link`]: framing, training, link stats and the clock-domain bridge
//! - [`rt`]: RT engines, satellite I/O, controllers, nodes and the testbench
//!   (behind the `core` feature)

/// Re-export transceiver types.
pub mod transceiver {
    pub use drtio_transceiver::*;
}

/// Re-export link layer types.
pub mod link {
    pub use drtio_link::*;
}

/// Re-export RT engine, node and testbench types (requires `core` feature).
#[cfg(feature = "core")]
pub mod rt {
    pub use drtio_core::*;
}
