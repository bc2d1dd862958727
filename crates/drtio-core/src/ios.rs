//! I/O satellite adapter: per-channel event FIFOs between the satellite's
//! packet engine and its physical RTIO channels.

use heapless::spsc::Queue;
use serde::Serialize;
use tracing::debug;

use crate::error::IosError;
use crate::timestamp::TimestampConfig;

/// Output events a channel can hold.
pub const OUTPUT_FIFO_DEPTH: usize = 128;

/// Input events a channel can hold.
pub const INPUT_FIFO_DEPTH: usize = 64;

/// One timestamped I/O event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoEvent {
    pub channel: u16,
    /// Fine units.
    pub timestamp: u64,
    pub data: u32,
}

const OUTPUT_SLOTS: usize = OUTPUT_FIFO_DEPTH + 1;
const INPUT_SLOTS: usize = INPUT_FIFO_DEPTH + 1;

struct ChannelFifos {
    output: Queue<IoEvent, OUTPUT_SLOTS>,
    input: Queue<IoEvent, INPUT_SLOTS>,
}

impl ChannelFifos {
    fn new() -> Self {
        Self {
            output: Queue::new(),
            input: Queue::new(),
        }
    }
}

/// Per-channel output and input FIFOs.
///
/// The packet engine produces output events and consumes input events; the
/// physical side does the opposite. Each queue has one producer and one
/// consumer.
pub struct Ios {
    channels: Vec<ChannelFifos>,
    timestamps: TimestampConfig,
}

impl std::fmt::Debug for Ios {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ios")
            .field("channels", &self.channels.len())
            .field("timestamps", &self.timestamps)
            .finish()
    }
}

impl Ios {
    pub fn new(channel_count: u16, timestamps: TimestampConfig) -> Self {
        Self {
            channels: (0..channel_count).map(|_| ChannelFifos::new()).collect(),
            timestamps,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn fifos(&mut self, channel: u16) -> Result<&mut ChannelFifos, IosError> {
        self.channels
            .get_mut(usize::from(channel))
            .ok_or(IosError::InvalidChannel(channel))
    }

    /// Engine side: queue an output event on its channel.
    pub fn submit(&mut self, event: IoEvent) -> Result<(), IosError> {
        let channel = event.channel;
        self.fifos(channel)?
            .output
            .enqueue(event)
            .map_err(|_| IosError::OutputOverflow(channel))
    }

    /// Engine side: next input event of a channel, if any.
    pub fn poll(&mut self, channel: u16) -> Result<Option<IoEvent>, IosError> {
        Ok(self.fifos(channel)?.input.dequeue())
    }

    /// Free output slots of a channel.
    pub fn fifo_space(&mut self, channel: u16) -> Result<u16, IosError> {
        let fifos = self.fifos(channel)?;
        let free = fifos.output.capacity() - fifos.output.len();
        Ok(u16::try_from(free).unwrap_or(u16::MAX))
    }

    /// Physical side: record an input event.
    pub fn push_input(&mut self, event: IoEvent) -> Result<(), IosError> {
        let channel = event.channel;
        self.fifos(channel)?
            .input
            .enqueue(event)
            .map_err(|_| IosError::InputOverflow(channel))
    }

    /// Physical side: next output event of a channel regardless of its time.
    pub fn pop_output(&mut self, channel: u16) -> Option<IoEvent> {
        self.fifos(channel).ok()?.output.dequeue()
    }

    /// Physical side: next output event of a channel if its coarse time has
    /// arrived at `now` (coarse units).
    pub fn pop_due(&mut self, channel: u16, now: u64) -> Option<IoEvent> {
        let ts = self.timestamps;
        let fifos = self.fifos(channel).ok()?;
        let due = fifos.output.peek().is_some_and(|event| {
            let deadline = ts.join(ts.coarse(event.timestamp), 0);
            ts.is_reached(ts.join(now, 0), deadline)
        });
        if due {
            fifos.output.dequeue()
        } else {
            None
        }
    }

    /// Output events waiting on a channel.
    pub fn pending_output(&self, channel: u16) -> usize {
        self.channels
            .get(usize::from(channel))
            .map_or(0, |fifos| fifos.output.len())
    }

    /// Drop every queued event.
    pub fn reset(&mut self) {
        let mut dropped = 0;
        for fifos in &mut self.channels {
            dropped += fifos.output.len() + fifos.input.len();
            *fifos = ChannelFifos::new();
        }
        if dropped > 0 {
            debug!(dropped, "I/O FIFOs cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: u16, timestamp: u64, data: u32) -> IoEvent {
        IoEvent {
            channel,
            timestamp,
            data,
        }
    }

    #[test]
    fn submit_and_drain_in_order() {
        let mut ios = Ios::new(8, TimestampConfig::default());
        ios.submit(event(3, 10, 1)).unwrap();
        ios.submit(event(3, 20, 2)).unwrap();
        assert_eq!(ios.pending_output(3), 2);
        assert_eq!(ios.pop_output(3), Some(event(3, 10, 1)));
        assert_eq!(ios.pop_output(3), Some(event(3, 20, 2)));
        assert_eq!(ios.pop_output(3), None);
    }

    #[test]
    fn invalid_channel_rejected() {
        let mut ios = Ios::new(4, TimestampConfig::default());
        assert_eq!(ios.submit(event(4, 0, 0)), Err(IosError::InvalidChannel(4)));
        assert_eq!(ios.poll(9), Err(IosError::InvalidChannel(9)));
        assert_eq!(ios.fifo_space(4), Err(IosError::InvalidChannel(4)));
    }

    #[test]
    fn output_fifo_overflow() {
        let mut ios = Ios::new(1, TimestampConfig::default());
        assert_eq!(ios.fifo_space(0), Ok(OUTPUT_FIFO_DEPTH as u16));
        for i in 0..OUTPUT_FIFO_DEPTH as u64 {
            ios.submit(event(0, i, 0)).unwrap();
        }
        assert_eq!(ios.fifo_space(0), Ok(0));
        assert_eq!(ios.submit(event(0, 0, 0)), Err(IosError::OutputOverflow(0)));
    }

    #[test]
    fn input_events_polled() {
        let mut ios = Ios::new(2, TimestampConfig::default());
        assert_eq!(ios.poll(1), Ok(None));
        ios.push_input(event(1, 5, 42)).unwrap();
        assert_eq!(ios.poll(1), Ok(Some(event(1, 5, 42))));
    }

    #[test]
    fn pop_due_waits_for_coarse_time() {
        let ts = TimestampConfig::default();
        let mut ios = Ios::new(1, ts);
        ios.submit(event(0, ts.join(100, 3), 0)).unwrap();
        assert_eq!(ios.pop_due(0, 99), None);
        assert!(ios.pop_due(0, 100).is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let mut ios = Ios::new(2, TimestampConfig::default());
        ios.submit(event(0, 1, 1)).unwrap();
        ios.push_input(event(1, 1, 1)).unwrap();
        ios.reset();
        assert_eq!(ios.pop_output(0), None);
        assert_eq!(ios.poll(1), Ok(None));
    }
}
