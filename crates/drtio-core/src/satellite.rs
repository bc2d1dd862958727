//! Satellite side of the RT packet engine.

use bytes::Bytes;
use drtio_link::{LinkError, SubChannel, Synced};
use heapless::spsc::Queue;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::error::IosError;
use crate::ios::{IoEvent, Ios};
use crate::packet::{Command, ErrorCode, Reply};
use crate::timestamp::TimestampConfig;
use crate::traits::FrameSink;

/// Cycles a reset command holds the RTIO reset asserted.
pub const RESET_PULSE_CYCLES: u32 = 8;

/// Received RT packets waiting to be processed.
pub const INBOUND_FIFO_DEPTH: usize = 16;

const INBOUND_SLOTS: usize = INBOUND_FIFO_DEPTH + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SatelliteState {
    AwaitLink,
    Idle,
    ProcessingCommand,
    SendingReply,
    Reset,
}

impl SatelliteState {
    pub fn code(self) -> u64 {
        match self {
            SatelliteState::AwaitLink => 0,
            SatelliteState::Idle => 1,
            SatelliteState::ProcessingCommand => 2,
            SatelliteState::SendingReply => 3,
            SatelliteState::Reset => 4,
        }
    }
}

/// Reset lines driven into the satellite's RTIO core and PHYs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResetSignals {
    pub rio: bool,
    pub rio_phy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SatelliteCounters {
    pub commands: u64,
    pub replies: u64,
    pub errors_sent: u64,
    pub decode_errors: u64,
    pub inbound_overflows: u64,
    pub resets: u64,
}

#[derive(Debug)]
enum Phase {
    AwaitLink,
    Idle,
    Processing(Command),
    Sending(Reply),
    Reset { remaining: u32, phy: bool },
}

fn error_reply(err: &IosError) -> Reply {
    match *err {
        IosError::InvalidChannel(channel) => Reply::Error {
            code: ErrorCode::InvalidChannel,
            channel,
        },
        IosError::OutputOverflow(channel) | IosError::InputOverflow(channel) => Reply::Error {
            code: ErrorCode::OutputOverflow,
            channel,
        },
    }
}

/// Executes master commands in arrival order against the I/O adapter.
///
/// One step per tick: a command is dequeued, then executed, then its reply
/// (if any) is handed to the RT transmit port, retrying while the port is
/// busy.
pub struct SatelliteEngine {
    phase: Phase,
    inbound: Queue<Bytes, INBOUND_SLOTS>,
    now: u64,
    timestamps: TimestampConfig,
    counters: SatelliteCounters,
}

impl std::fmt::Debug for SatelliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SatelliteEngine")
            .field("phase", &self.phase)
            .field("inbound", &self.inbound.len())
            .field("now", &self.now)
            .finish()
    }
}

impl SatelliteEngine {
    pub fn new(timestamps: TimestampConfig) -> Self {
        Self {
            phase: Phase::AwaitLink,
            inbound: Queue::new(),
            now: 0,
            timestamps,
            counters: SatelliteCounters::default(),
        }
    }

    pub fn state(&self) -> SatelliteState {
        match self.phase {
            Phase::AwaitLink => SatelliteState::AwaitLink,
            Phase::Idle => SatelliteState::Idle,
            Phase::Processing(_) => SatelliteState::ProcessingCommand,
            Phase::Sending(_) => SatelliteState::SendingReply,
            Phase::Reset { .. } => SatelliteState::Reset,
        }
    }

    /// Timestamp counter, coarse units.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn counters(&self) -> SatelliteCounters {
        self.counters
    }

    pub fn reset_signals(&self) -> ResetSignals {
        match self.phase {
            Phase::Reset { phy, .. } => ResetSignals {
                rio: !phy,
                rio_phy: phy,
            },
            _ => ResetSignals::default(),
        }
    }

    /// Queue a received RT frame. Dropped and counted if the FIFO is full.
    pub fn receive_frame(&mut self, frame: Synced<Bytes>) {
        if self.inbound.enqueue(frame.into_inner()).is_err() {
            self.counters.inbound_overflows += 1;
            warn!(
                overflows = self.counters.inbound_overflows,
                "inbound RT FIFO full, packet dropped"
            );
        }
    }

    pub fn tick(&mut self, link_ready: bool, sink: &mut impl FrameSink, ios: &mut Ios) {
        self.now = self.timestamps.coarse(self.timestamps.join(self.now.wrapping_add(1), 0));

        if !link_ready {
            if !matches!(self.phase, Phase::AwaitLink) {
                warn!("link down, resetting satellite engine");
                self.abort(ios);
            }
            return;
        }

        self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitLink => {
                info!("satellite link up");
                Phase::Idle
            }
            Phase::Idle => self.next_command(),
            Phase::Processing(command) => self.execute(command, ios),
            Phase::Sending(reply) => self.send(reply, sink),
            Phase::Reset { remaining, phy } => self.hold_reset(remaining, phy, ios),
        };
    }

    fn abort(&mut self, ios: &mut Ios) {
        let mut dropped = 0;
        while self.inbound.dequeue().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "inbound RT FIFO cleared");
        }
        ios.reset();
        self.phase = Phase::AwaitLink;
    }

    fn next_command(&mut self) -> Phase {
        let Some(frame) = self.inbound.dequeue() else {
            return Phase::Idle;
        };
        match Command::decode(&frame) {
            Ok(command) => {
                self.counters.commands += 1;
                trace!(command = command.name(), "command received");
                Phase::Processing(command)
            }
            Err(err) => {
                self.counters.decode_errors += 1;
                warn!(%err, "undecodable RT packet");
                Phase::Sending(Reply::Error {
                    code: ErrorCode::from(&err),
                    channel: 0,
                })
            }
        }
    }

    fn execute(&mut self, command: Command, ios: &mut Ios) -> Phase {
        match command {
            Command::Echo => Phase::Sending(Reply::Echo {
                timestamp: self.now,
            }),
            Command::SetTime { timestamp } => {
                debug!(timestamp, "timestamp counter loaded");
                self.now = self.timestamps.coarse(self.timestamps.join(timestamp, 0));
                Phase::Idle
            }
            Command::Reset => self.start_reset(false, ios),
            Command::ResetPhy => self.start_reset(true, ios),
            Command::Write {
                channel,
                timestamp,
                data,
            } => match ios.submit(IoEvent {
                channel,
                timestamp,
                data,
            }) {
                Ok(()) => Phase::Idle,
                Err(err) => {
                    debug!(%err, "write rejected");
                    Phase::Sending(error_reply(&err))
                }
            },
            Command::ReadRequest { channel } => match ios.poll(channel) {
                Ok(Some(event)) => Phase::Sending(Reply::Read {
                    channel,
                    timestamp: event.timestamp,
                    data: event.data,
                }),
                Ok(None) => {
                    debug!(channel, "read request with no input event");
                    Phase::Idle
                }
                Err(err) => Phase::Sending(error_reply(&err)),
            },
            Command::FifoSpaceRequest { channel } => match ios.fifo_space(channel) {
                Ok(space) => Phase::Sending(Reply::FifoSpace { channel, space }),
                Err(err) => Phase::Sending(error_reply(&err)),
            },
        }
    }

    fn start_reset(&mut self, phy: bool, ios: &mut Ios) -> Phase {
        info!(phy, "RTIO reset");
        self.counters.resets += 1;
        if !phy {
            ios.reset();
        }
        Phase::Reset {
            remaining: RESET_PULSE_CYCLES,
            phy,
        }
    }

    fn hold_reset(&mut self, remaining: u32, phy: bool, ios: &mut Ios) -> Phase {
        let restart = self
            .inbound
            .peek()
            .and_then(|frame| Command::decode(frame).ok())
            .filter(|command| matches!(command, Command::Reset | Command::ResetPhy));
        if let Some(command) = restart {
            self.inbound.dequeue();
            self.counters.commands += 1;
            debug!("reset received during reset, pulse restarted");
            return self.start_reset(command == Command::ResetPhy, ios);
        }

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            debug!(phy, "RTIO reset released");
            Phase::Idle
        } else {
            Phase::Reset { remaining, phy }
        }
    }

    fn send(&mut self, reply: Reply, sink: &mut impl FrameSink) -> Phase {
        match sink.try_send(SubChannel::Rt, reply.encode()) {
            Ok(()) => {
                self.counters.replies += 1;
                if matches!(reply, Reply::Error { .. }) {
                    self.counters.errors_sent += 1;
                }
                Phase::Idle
            }
            Err(LinkError::Busy(_) | LinkError::LinkDown) => Phase::Sending(reply),
            Err(err) => {
                error!(%err, "reply dropped");
                Phase::Idle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::testing::{synced, RecordingSink};

    struct Rig {
        engine: SatelliteEngine,
        sink: RecordingSink,
        ios: Ios,
    }

    impl Rig {
        fn new() -> Self {
            let mut rig = Self {
                engine: SatelliteEngine::new(TimestampConfig::default()),
                sink: RecordingSink::default(),
                ios: Ios::new(8, TimestampConfig::default()),
            };
            rig.tick();
            assert_eq!(rig.engine.state(), SatelliteState::Idle);
            rig
        }

        fn tick(&mut self) {
            self.engine.tick(true, &mut self.sink, &mut self.ios);
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.tick();
            }
        }

        fn command(&mut self, command: Command) {
            self.engine.receive_frame(synced(command.encode()));
        }

        fn replies(&self) -> Vec<Reply> {
            self.sink
                .sent
                .iter()
                .map(|(sub, bytes)| {
                    assert_eq!(*sub, SubChannel::Rt);
                    Reply::decode(bytes).unwrap()
                })
                .collect()
        }
    }

    #[test]
    fn write_queues_event_without_reply() {
        let mut rig = Rig::new();
        rig.command(Command::Write {
            channel: 3,
            timestamp: 1000,
            data: 0xAB,
        });
        rig.run(4);
        assert_eq!(
            rig.ios.pop_output(3),
            Some(IoEvent {
                channel: 3,
                timestamp: 1000,
                data: 0xAB
            })
        );
        assert_eq!(rig.ios.pop_output(3), None);
        assert!(rig.replies().is_empty());
    }

    #[test]
    fn read_without_input_sends_nothing() {
        let mut rig = Rig::new();
        rig.command(Command::ReadRequest { channel: 5 });
        rig.run(4);
        assert!(rig.replies().is_empty());

        rig.ios
            .push_input(IoEvent {
                channel: 5,
                timestamp: 77,
                data: 9,
            })
            .unwrap();
        rig.command(Command::ReadRequest { channel: 5 });
        rig.run(4);
        assert_eq!(
            rig.replies(),
            [Reply::Read {
                channel: 5,
                timestamp: 77,
                data: 9
            }]
        );
    }

    #[test]
    fn echo_and_set_time() {
        let mut rig = Rig::new();
        rig.command(Command::SetTime { timestamp: 5000 });
        rig.command(Command::Echo);
        rig.run(6);
        match rig.replies().as_slice() {
            [Reply::Echo { timestamp }] => assert!((5000..5010).contains(timestamp)),
            other => panic!("unexpected replies: {other:?}"),
        }
    }

    #[test]
    fn set_time_wraps_to_counter_width() {
        let mut rig = Rig::new();
        rig.command(Command::SetTime {
            timestamp: u64::MAX,
        });
        rig.run(2);
        let max_coarse = TimestampConfig::default().coarse(u64::MAX);
        assert_eq!(rig.engine.now(), max_coarse);
    }

    #[test]
    fn invalid_channel_and_garbage_get_error_notifications() {
        let mut rig = Rig::new();
        rig.command(Command::Write {
            channel: 100,
            timestamp: 0,
            data: 0,
        });
        rig.engine.receive_frame(synced(Bytes::from_static(&[0x42])));
        rig.run(8);
        assert_eq!(
            rig.replies(),
            [
                Reply::Error {
                    code: ErrorCode::InvalidChannel,
                    channel: 100
                },
                Reply::Error {
                    code: ErrorCode::UnknownPacket,
                    channel: 0
                }
            ]
        );
        assert_eq!(rig.engine.counters().decode_errors, 1);
        assert_eq!(rig.engine.counters().errors_sent, 2);
    }

    #[test]
    fn fifo_space_reply() {
        let mut rig = Rig::new();
        rig.command(Command::FifoSpaceRequest { channel: 1 });
        rig.run(4);
        assert_eq!(
            rig.replies(),
            [Reply::FifoSpace {
                channel: 1,
                space: 128
            }]
        );
    }

    #[test]
    fn busy_port_holds_reply() {
        let mut rig = Rig::new();
        rig.sink.busy = true;
        rig.command(Command::Echo);
        rig.run(5);
        assert_eq!(rig.engine.state(), SatelliteState::SendingReply);
        rig.sink.busy = false;
        rig.tick();
        assert_eq!(rig.engine.state(), SatelliteState::Idle);
        assert_eq!(rig.replies().len(), 1);
    }

    #[test]
    fn reset_pulse_lasts_fixed_cycles_and_clears_fifos() {
        let mut rig = Rig::new();
        rig.ios
            .submit(IoEvent {
                channel: 0,
                timestamp: 1,
                data: 1,
            })
            .unwrap();
        rig.command(Command::Reset);
        rig.run(2);
        assert_eq!(rig.engine.state(), SatelliteState::Reset);
        assert_eq!(rig.ios.pop_output(0), None);

        let mut asserted = 0;
        while rig.engine.reset_signals().rio {
            asserted += 1;
            rig.tick();
        }
        assert_eq!(asserted, RESET_PULSE_CYCLES);
        assert_eq!(rig.engine.state(), SatelliteState::Idle);
    }

    #[test]
    fn reset_during_reset_restarts_pulse() {
        let mut rig = Rig::new();
        rig.command(Command::ResetPhy);
        rig.run(5);
        assert!(rig.engine.reset_signals().rio_phy);

        rig.command(Command::ResetPhy);
        rig.tick();
        rig.run(RESET_PULSE_CYCLES as usize - 1);
        assert!(rig.engine.reset_signals().rio_phy);
        rig.tick();
        assert_eq!(rig.engine.state(), SatelliteState::Idle);
    }

    #[test]
    fn inbound_overflow_counted() {
        let mut rig = Rig::new();
        for _ in 0..INBOUND_FIFO_DEPTH + 3 {
            rig.command(Command::Echo);
        }
        assert_eq!(rig.engine.counters().inbound_overflows, 3);
    }

    #[test]
    fn link_down_returns_to_await_link() {
        let mut rig = Rig::new();
        rig.command(Command::Echo);
        rig.command(Command::Echo);
        rig.tick();
        rig.engine.tick(false, &mut rig.sink, &mut rig.ios);
        assert_eq!(rig.engine.state(), SatelliteState::AwaitLink);

        rig.run(6);
        assert!(rig.replies().is_empty());
        assert_eq!(rig.engine.state(), SatelliteState::Idle);
    }
}
