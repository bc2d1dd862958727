//! Master side of the RT packet engine.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use drtio_link::{LinkError, SubChannel, Synced};
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::CriError;
use crate::packet::{Command, ErrorCode, Reply};
use crate::traits::FrameSink;

/// Commands the master can hold before `enqueue` reports `Busy`.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 64;

/// Reply timeout in ticks.
pub const DEFAULT_REPLY_TIMEOUT: u64 = 1000;

const COMPLETION_BACKLOG: usize = 64;

/// Identifies one queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterState {
    Idle,
    AwaitReply,
    Timeout,
}

impl MasterState {
    pub fn code(self) -> u64 {
        match self {
            MasterState::Idle => 0,
            MasterState::AwaitReply => 1,
            MasterState::Timeout => 2,
        }
    }
}

/// Successful answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Echo { satellite_time: u64 },
    Input { timestamp: u64, data: u32 },
    FifoSpace { space: u16 },
}

/// Final outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: RequestId,
    pub command: Command,
    /// Tick the command went out, if it did.
    pub issued_at: Option<u64>,
    pub completed_at: u64,
    pub result: Result<Response, CriError>,
}

impl Completion {
    /// Round-trip time in ticks for answered requests.
    pub fn rtt(&self) -> Option<u64> {
        match (&self.result, self.issued_at) {
            (Ok(_), Some(issued_at)) => Some(self.completed_at - issued_at),
            _ => None,
        }
    }
}

/// Error notifications received, by code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SatelliteErrorCounters {
    pub invalid_channel: u64,
    pub output_overflow: u64,
    pub unknown_packet: u64,
    pub truncated_packet: u64,
}

impl SatelliteErrorCounters {
    fn record(&mut self, code: ErrorCode) {
        match code {
            ErrorCode::InvalidChannel => self.invalid_channel += 1,
            ErrorCode::OutputOverflow => self.output_overflow += 1,
            ErrorCode::UnknownPacket => self.unknown_packet += 1,
            ErrorCode::TruncatedPacket => self.truncated_packet += 1,
        }
    }

    pub fn get(&self, code: ErrorCode) -> u64 {
        match code {
            ErrorCode::InvalidChannel => self.invalid_channel,
            ErrorCode::OutputOverflow => self.output_overflow,
            ErrorCode::UnknownPacket => self.unknown_packet,
            ErrorCode::TruncatedPacket => self.truncated_packet,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MasterCounters {
    pub commands_sent: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub unexpected_replies: u64,
    pub decode_errors: u64,
    pub aborted: u64,
    pub satellite_errors: SatelliteErrorCounters,
}

#[derive(Debug)]
struct Queued {
    id: RequestId,
    command: Command,
    timeout: u64,
}

#[derive(Debug)]
struct Pending {
    id: RequestId,
    command: Command,
    issued_at: u64,
    timeout: u64,
}

#[derive(Debug)]
enum Phase {
    Idle,
    AwaitReply(Pending),
    Timeout,
}

/// Whether `reply` answers the request `command`.
///
/// A well-formed read or fifo-space request can only fail with
/// `InvalidChannel`. Other error codes on the same channel come from writes
/// issued while the request was pending and must not complete it.
fn answers(command: &Command, reply: &Reply) -> bool {
    match (command, reply) {
        (Command::Echo, Reply::Echo { .. }) => true,
        (Command::ReadRequest { channel: want }, Reply::Read { channel, .. })
        | (Command::FifoSpaceRequest { channel: want }, Reply::FifoSpace { channel, .. })
        | (
            Command::ReadRequest { channel: want } | Command::FifoSpaceRequest { channel: want },
            Reply::Error {
                code: ErrorCode::InvalidChannel,
                channel,
            },
        ) => want == channel,
        _ => false,
    }
}

/// Issues commands in order and matches replies to the one request in flight.
///
/// Fire-and-forget commands (write, set time, reset) go out whenever the RT
/// port takes them. A request at the head of the queue waits until no other
/// request is pending, which keeps the command stream ordered.
#[derive(Debug)]
pub struct MasterEngine {
    phase: Phase,
    queue: VecDeque<Queued>,
    depth: usize,
    next_id: u64,
    now: u64,
    link_ready: bool,
    completions: VecDeque<Completion>,
    counters: MasterCounters,
    last_rtt: Option<u64>,
}

impl MasterEngine {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            phase: Phase::Idle,
            queue: VecDeque::with_capacity(queue_depth),
            depth: queue_depth,
            next_id: 0,
            now: 0,
            link_ready: false,
            completions: VecDeque::new(),
            counters: MasterCounters::default(),
            last_rtt: None,
        }
    }

    pub fn state(&self) -> MasterState {
        match self.phase {
            Phase::Idle => MasterState::Idle,
            Phase::AwaitReply(_) => MasterState::AwaitReply,
            Phase::Timeout => MasterState::Timeout,
        }
    }

    /// Ticks since construction.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn counters(&self) -> MasterCounters {
        self.counters
    }

    /// RTT of the last answered request.
    pub fn last_rtt(&self) -> Option<u64> {
        self.last_rtt
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the engine last saw the link as ready.
    pub fn is_link_ready(&self) -> bool {
        self.link_ready
    }

    /// Append a command. Requests complete through [`take_completion`](Self::take_completion).
    pub fn enqueue(&mut self, command: Command, timeout: u64) -> Result<RequestId, CriError> {
        if !self.link_ready {
            return Err(CriError::LinkDown);
        }
        if self.queue.len() >= self.depth {
            return Err(CriError::Busy);
        }
        let id = RequestId(self.next_id);
        self.next_id += 1;
        trace!(%id, command = command.name(), "command queued");
        self.queue.push_back(Queued {
            id,
            command,
            timeout,
        });
        Ok(id)
    }

    pub fn take_completion(&mut self, id: RequestId) -> Option<Completion> {
        let index = self.completions.iter().position(|c| c.id == id)?;
        self.completions.remove(index)
    }

    /// Cancel the pending request and everything queued.
    pub fn abort(&mut self, reason: CriError) {
        let mut aborted = 0;
        if let Phase::AwaitReply(pending) = std::mem::replace(&mut self.phase, Phase::Idle) {
            self.complete(
                pending.id,
                pending.command,
                Some(pending.issued_at),
                Err(reason.clone()),
            );
            aborted += 1;
        }
        let queued: Vec<Queued> = self.queue.drain(..).collect();
        for q in queued {
            if q.command.expects_reply() {
                self.complete(q.id, q.command, None, Err(reason.clone()));
            }
            aborted += 1;
        }
        if aborted > 0 {
            debug!(aborted, %reason, "RT commands aborted");
            self.counters.aborted += aborted;
        }
    }

    pub fn tick(
        &mut self,
        link_ready: bool,
        reply: Option<Synced<Bytes>>,
        sink: &mut impl FrameSink,
    ) {
        self.now += 1;

        if !link_ready {
            if self.link_ready {
                warn!("link down, aborting RT commands");
                self.abort(CriError::LinkDown);
                self.link_ready = false;
            }
            return;
        }
        if !self.link_ready {
            debug!("master link up");
            self.link_ready = true;
        }

        if let Some(frame) = reply {
            self.handle_reply(frame.get());
        }

        self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Timeout => Phase::Idle,
            Phase::AwaitReply(pending) if self.now - pending.issued_at >= pending.timeout => {
                self.counters.timeouts += 1;
                warn!(id = %pending.id, ticks = pending.timeout, "reply timeout");
                self.complete(
                    pending.id,
                    pending.command,
                    Some(pending.issued_at),
                    Err(CriError::ReplyTimeout {
                        ticks: pending.timeout,
                    }),
                );
                Phase::Timeout
            }
            other => other,
        };

        self.issue(sink);
    }

    fn issue(&mut self, sink: &mut impl FrameSink) {
        let Some(head) = self.queue.front() else {
            return;
        };
        let request = head.command.expects_reply();
        if request && !matches!(self.phase, Phase::Idle) {
            return;
        }

        let sent = sink.try_send(SubChannel::Rt, head.command.encode());
        if let Err(LinkError::Busy(_) | LinkError::LinkDown) = sent {
            return;
        }
        let Some(queued) = self.queue.pop_front() else {
            return;
        };
        if let Err(err) = sent {
            error!(%err, command = queued.command.name(), "command dropped");
            if request {
                self.complete(queued.id, queued.command, None, Err(CriError::Aborted));
            }
            return;
        }

        self.counters.commands_sent += 1;
        trace!(id = %queued.id, command = queued.command.name(), "command issued");
        if request {
            self.phase = Phase::AwaitReply(Pending {
                id: queued.id,
                command: queued.command,
                issued_at: self.now,
                timeout: queued.timeout,
            });
        }
    }

    fn handle_reply(&mut self, frame: &[u8]) {
        let reply = match Reply::decode(frame) {
            Ok(reply) => reply,
            Err(err) => {
                self.counters.decode_errors += 1;
                warn!(%err, "undecodable reply");
                return;
            }
        };
        self.counters.replies += 1;
        if let Reply::Error { code, .. } = reply {
            self.counters.satellite_errors.record(code);
        }

        let pending = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitReply(pending) if answers(&pending.command, &reply) => pending,
            other => {
                self.phase = other;
                match reply {
                    Reply::Error { code, channel } => {
                        warn!(%code, channel, "satellite error notification");
                    }
                    _ => {
                        self.counters.unexpected_replies += 1;
                        debug!(?reply, "unexpected reply");
                    }
                }
                return;
            }
        };

        let rtt = self.now - pending.issued_at;
        self.last_rtt = Some(rtt);
        trace!(id = %pending.id, rtt, "reply matched");
        let result = match reply {
            Reply::Echo { timestamp } => Ok(Response::Echo {
                satellite_time: timestamp,
            }),
            Reply::Read {
                timestamp, data, ..
            } => Ok(Response::Input { timestamp, data }),
            Reply::FifoSpace { space, .. } => Ok(Response::FifoSpace { space }),
            Reply::Error {
                code: ErrorCode::InvalidChannel,
                channel,
            } => Err(CriError::InvalidChannel(channel)),
            Reply::Error { code, channel } => Err(CriError::Satellite { code, channel }),
        };
        self.complete(pending.id, pending.command, Some(pending.issued_at), result);
    }

    fn complete(
        &mut self,
        id: RequestId,
        command: Command,
        issued_at: Option<u64>,
        result: Result<Response, CriError>,
    ) {
        if self.completions.len() >= COMPLETION_BACKLOG {
            if let Some(stale) = self.completions.pop_front() {
                warn!(id = %stale.id, "completion never collected, dropped");
            }
        }
        self.completions.push_back(Completion {
            id,
            command,
            issued_at,
            completed_at: self.now,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::testing::{synced, RecordingSink};

    fn engine() -> (MasterEngine, RecordingSink) {
        let mut engine = MasterEngine::new(DEFAULT_COMMAND_QUEUE_DEPTH);
        let mut sink = RecordingSink::default();
        engine.tick(true, None, &mut sink);
        (engine, sink)
    }

    fn sent(sink: &RecordingSink) -> Vec<Command> {
        sink.sent
            .iter()
            .map(|(_, bytes)| Command::decode(bytes).unwrap())
            .collect()
    }

    #[test]
    fn enqueue_requires_link() {
        let mut engine = MasterEngine::new(4);
        assert_eq!(engine.enqueue(Command::Echo, 10), Err(CriError::LinkDown));
    }

    #[test]
    fn full_queue_is_busy() {
        let mut engine = MasterEngine::new(2);
        engine.tick(true, None, &mut RecordingSink::default());
        engine.enqueue(Command::Echo, 10).unwrap();
        engine.enqueue(Command::Echo, 10).unwrap();
        assert_eq!(engine.enqueue(Command::Echo, 10), Err(CriError::Busy));
    }

    #[test]
    fn requests_block_the_queue_head() {
        let (mut engine, mut sink) = engine();
        let echo = engine.enqueue(Command::Echo, 100).unwrap();
        let read = Command::ReadRequest { channel: 1 };
        let write = Command::Write {
            channel: 1,
            timestamp: 8,
            data: 1,
        };
        engine.enqueue(read, 100).unwrap();
        engine.enqueue(write, 100).unwrap();
        engine.tick(true, None, &mut sink);
        engine.tick(true, None, &mut sink);
        assert_eq!(sent(&sink), [Command::Echo]);
        assert_eq!(engine.state(), MasterState::AwaitReply);

        engine.tick(true, Some(synced(Reply::Echo { timestamp: 5 }.encode())), &mut sink);
        assert_eq!(sent(&sink), [Command::Echo, read]);
        let done = engine.take_completion(echo).unwrap();
        assert_eq!(done.result, Ok(Response::Echo { satellite_time: 5 }));
        assert_eq!(done.rtt(), Some(2));

        engine.tick(true, None, &mut sink);
        assert_eq!(sent(&sink), [Command::Echo, read, write]);
    }

    #[test]
    fn writes_go_out_while_awaiting_reply() {
        let (mut engine, mut sink) = engine();
        let write = Command::Write {
            channel: 2,
            timestamp: 0,
            data: 0,
        };
        engine.enqueue(Command::ReadRequest { channel: 1 }, 100).unwrap();
        engine.tick(true, None, &mut sink);
        engine.enqueue(write, 100).unwrap();
        engine.tick(true, None, &mut sink);
        assert_eq!(sent(&sink), [Command::ReadRequest { channel: 1 }, write]);
        assert_eq!(engine.state(), MasterState::AwaitReply);
    }

    #[test]
    fn timeout_fires_after_exact_tick_count() {
        let (mut engine, mut sink) = engine();
        let id = engine.enqueue(Command::ReadRequest { channel: 5 }, 100).unwrap();
        engine.tick(true, None, &mut sink);
        let issued_at = engine.now();

        for _ in 0..99 {
            engine.tick(true, None, &mut sink);
            assert!(engine.take_completion(id).is_none());
        }
        engine.tick(true, None, &mut sink);
        let done = engine.take_completion(id).unwrap();
        assert_eq!(done.result, Err(CriError::ReplyTimeout { ticks: 100 }));
        assert_eq!(done.completed_at - issued_at, 100);
        assert_eq!(engine.state(), MasterState::Timeout);
        assert_eq!(engine.counters().timeouts, 1);

        engine.tick(true, None, &mut sink);
        assert_eq!(engine.state(), MasterState::Idle);
    }

    #[test]
    fn late_reply_is_unexpected() {
        let (mut engine, mut sink) = engine();
        engine.enqueue(Command::Echo, 3).unwrap();
        for _ in 0..6 {
            engine.tick(true, None, &mut sink);
        }
        engine.tick(true, Some(synced(Reply::Echo { timestamp: 1 }.encode())), &mut sink);
        assert_eq!(engine.counters().unexpected_replies, 1);
        assert_eq!(engine.state(), MasterState::Idle);
    }

    #[test]
    fn link_down_aborts_without_timeout() {
        let (mut engine, mut sink) = engine();
        let read = engine.enqueue(Command::ReadRequest { channel: 5 }, 100).unwrap();
        let queued = engine.enqueue(Command::Echo, 100).unwrap();
        engine.tick(true, None, &mut sink);
        assert_eq!(engine.state(), MasterState::AwaitReply);

        engine.tick(false, None, &mut sink);
        assert_eq!(engine.state(), MasterState::Idle);
        assert_eq!(engine.take_completion(read).unwrap().result, Err(CriError::LinkDown));
        assert_eq!(
            engine.take_completion(queued).unwrap().result,
            Err(CriError::LinkDown)
        );
        for _ in 0..200 {
            engine.tick(false, None, &mut sink);
        }
        assert_eq!(engine.counters().timeouts, 0);
        assert_eq!(engine.queue_len(), 0);
    }

    #[test]
    fn error_notification_completes_matching_request() {
        let (mut engine, mut sink) = engine();
        let id = engine.enqueue(Command::FifoSpaceRequest { channel: 9 }, 100).unwrap();
        engine.tick(true, None, &mut sink);
        let notification = Reply::Error {
            code: ErrorCode::InvalidChannel,
            channel: 9,
        };
        engine.tick(true, Some(synced(notification.encode())), &mut sink);
        assert_eq!(
            engine.take_completion(id).unwrap().result,
            Err(CriError::InvalidChannel(9))
        );
        assert_eq!(engine.counters().satellite_errors.invalid_channel, 1);
    }

    #[test]
    fn write_overflow_does_not_answer_pending_read() {
        let (mut engine, mut sink) = engine();
        let read = engine.enqueue(Command::ReadRequest { channel: 3 }, 50).unwrap();
        engine.tick(true, None, &mut sink);
        assert_eq!(engine.state(), MasterState::AwaitReply);

        let overflow = Reply::Error {
            code: ErrorCode::OutputOverflow,
            channel: 3,
        };
        engine.tick(true, Some(synced(overflow.encode())), &mut sink);
        assert_eq!(engine.state(), MasterState::AwaitReply);
        assert!(engine.take_completion(read).is_none());
        assert_eq!(engine.counters().satellite_errors.output_overflow, 1);

        for _ in 0..60 {
            engine.tick(true, None, &mut sink);
        }
        assert_eq!(
            engine.take_completion(read).unwrap().result,
            Err(CriError::ReplyTimeout { ticks: 50 })
        );
    }

    #[test]
    fn unsolicited_error_notification_is_counted() {
        let (mut engine, mut sink) = engine();
        let notification = Reply::Error {
            code: ErrorCode::OutputOverflow,
            channel: 2,
        };
        engine.tick(true, Some(synced(notification.encode())), &mut sink);
        assert_eq!(engine.counters().satellite_errors.output_overflow, 1);
        assert_eq!(engine.counters().unexpected_replies, 0);
    }

    #[test]
    fn busy_port_delays_issue() {
        let (mut engine, mut sink) = engine();
        sink.busy = true;
        engine.enqueue(Command::Echo, 100).unwrap();
        engine.tick(true, None, &mut sink);
        assert_eq!(engine.state(), MasterState::Idle);
        assert_eq!(engine.queue_len(), 1);
        sink.busy = false;
        engine.tick(true, None, &mut sink);
        assert_eq!(engine.state(), MasterState::AwaitReply);
    }
}
