use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::rx::RxLane;
use crate::sync::Synced;

/// Collects one lane's bytes into complete frames.
///
/// Bytes are accumulated while `frame` is high and released only when the
/// receiver grants `frame_perm`. A frame that closes without permission is
/// dropped whole.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
    active: bool,
    dropped: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one cycle of lane signals. Returns a payload when a frame is accepted.
    pub fn push(&mut self, lane: &Synced<RxLane>) -> Option<Synced<Bytes>> {
        let lane = lane.get();
        if lane.frame_perm {
            self.active = false;
            trace!(len = self.buf.len(), "frame accepted");
            return Some(Synced::new(self.buf.split().freeze()));
        }
        if self.active && !lane.frame {
            trace!(len = self.buf.len(), "frame dropped");
            self.buf.clear();
            self.dropped += 1;
        }
        if lane.frame && !self.active {
            self.buf.clear();
        }
        if lane.frame {
            if let Some(byte) = lane.data {
                self.buf.extend_from_slice(&[byte]);
            }
        }
        self.active = lane.frame;
        None
    }

    /// Frames that closed without integrity confirmation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget any partially collected frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.active = false;
    }
}
