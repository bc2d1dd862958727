//! Master-side controller interface (CRI) and RT manager.

use bytes::Bytes;
use drtio_link::{LinkState, LinkStatsSnapshot, Synced};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CriError;
use crate::ios::IoEvent;
use crate::master::{
    Completion, MasterCounters, MasterEngine, RequestId, Response, DEFAULT_REPLY_TIMEOUT,
};
use crate::packet::Command;
use crate::timestamp::TimestampConfig;
use crate::traits::FrameSink;

/// Host-facing RTIO interface. Calls block until they complete.
pub trait Cri {
    /// Queue a timestamped output event.
    fn submit_output(&mut self, channel: u16, timestamp: u64, data: u32) -> Result<(), CriError>;

    /// Read the next input event of a channel, waiting at most `timeout` ticks
    /// for the reply.
    fn request_input(&mut self, channel: u16, timeout: u64) -> Result<IoEvent, CriError>;

    fn get_status(&self) -> CriStatus;
}

/// Snapshot returned by [`Cri::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct CriStatus {
    pub link: LinkState,
    pub counters: MasterCounters,
    pub last_rtt: Option<u64>,
    pub link_stats: LinkStatsSnapshot,
}

/// Validates host calls and turns them into queued RT commands.
#[derive(Debug)]
pub struct RtController {
    engine: MasterEngine,
    channel_count: u16,
    timestamps: TimestampConfig,
}

impl RtController {
    pub fn new(channel_count: u16, queue_depth: usize, timestamps: TimestampConfig) -> Self {
        Self {
            engine: MasterEngine::new(queue_depth),
            channel_count,
            timestamps,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn engine(&self) -> &MasterEngine {
        &self.engine
    }

    fn check_channel(&self, channel: u16) -> Result<(), CriError> {
        if channel >= self.channel_count {
            return Err(CriError::InvalidChannel(channel));
        }
        Ok(())
    }

    pub fn submit_output(
        &mut self,
        channel: u16,
        timestamp: u64,
        data: u32,
    ) -> Result<RequestId, CriError> {
        self.check_channel(channel)?;
        if !self.timestamps.fits(timestamp) {
            return Err(CriError::TimestampOutOfRange(timestamp));
        }
        self.engine.enqueue(
            Command::Write {
                channel,
                timestamp,
                data,
            },
            0,
        )
    }

    pub fn request_input(&mut self, channel: u16, timeout: u64) -> Result<RequestId, CriError> {
        self.check_channel(channel)?;
        self.engine
            .enqueue(Command::ReadRequest { channel }, timeout)
    }

    /// Ask the satellite for the free output slots of a channel.
    pub fn fifo_space(&mut self, channel: u16, timeout: u64) -> Result<RequestId, CriError> {
        self.check_channel(channel)?;
        self.engine
            .enqueue(Command::FifoSpaceRequest { channel }, timeout)
    }

    /// Abort everything in flight and reset the satellite's RTIO core, or
    /// its PHYs when `phy` is set.
    pub fn reset(&mut self, phy: bool) -> Result<RequestId, CriError> {
        info!(phy, "RTIO reset requested");
        self.engine.abort(CriError::Aborted);
        let command = if phy {
            Command::ResetPhy
        } else {
            Command::Reset
        };
        self.engine.enqueue(command, 0)
    }

    pub fn poll(&mut self, id: RequestId) -> Option<Completion> {
        self.engine.take_completion(id)
    }

    pub fn tick(
        &mut self,
        link_ready: bool,
        reply: Option<Synced<Bytes>>,
        sink: &mut impl FrameSink,
    ) {
        self.engine.tick(link_ready, reply, sink);
    }

    fn enqueue(&mut self, command: Command, timeout: u64) -> Result<RequestId, CriError> {
        self.engine.enqueue(command, timeout)
    }
}

/// Outcome of an echo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EchoResult {
    /// Round-trip time in ticks.
    pub rtt: u64,
    /// Satellite timestamp counter when it answered.
    pub satellite_time: u64,
}

/// Link supervision on top of the controller: echo round trips and time
/// synchronization.
#[derive(Debug)]
pub struct RtManager {
    echo_timeout: u64,
    pending_echo: Option<RequestId>,
    last_outcome: Option<(RequestId, Result<EchoResult, CriError>)>,
    last_rtt: Option<u64>,
    min_rtt: Option<u64>,
    echoes: u64,
    echo_failures: u64,
}

impl Default for RtManager {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_TIMEOUT)
    }
}

impl RtManager {
    pub fn new(echo_timeout: u64) -> Self {
        Self {
            echo_timeout,
            pending_echo: None,
            last_outcome: None,
            last_rtt: None,
            min_rtt: None,
            echoes: 0,
            echo_failures: 0,
        }
    }

    pub fn request_echo(&mut self, controller: &mut RtController) -> Result<RequestId, CriError> {
        if self.pending_echo.is_some() {
            return Err(CriError::Busy);
        }
        let id = controller.enqueue(Command::Echo, self.echo_timeout)?;
        self.pending_echo = Some(id);
        Ok(id)
    }

    /// Collect a finished echo. Call once per local tick.
    pub fn tick(&mut self, controller: &mut RtController) {
        let Some(id) = self.pending_echo else {
            return;
        };
        let Some(completion) = controller.poll(id) else {
            return;
        };
        self.pending_echo = None;

        let outcome = match (completion.result.clone(), completion.rtt()) {
            (Ok(Response::Echo { satellite_time }), Some(rtt)) => {
                self.echoes += 1;
                self.last_rtt = Some(rtt);
                self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));
                debug!(rtt, satellite_time, "echo");
                Ok(EchoResult {
                    rtt,
                    satellite_time,
                })
            }
            (Err(err), _) => {
                self.echo_failures += 1;
                debug!(%err, "echo failed");
                Err(err)
            }
            (Ok(other), _) => {
                self.echo_failures += 1;
                debug!(?other, "echo completed with wrong response");
                Err(CriError::Aborted)
            }
        };
        self.last_outcome = Some((id, outcome));
    }

    /// Outcome of echo `id`, once it has been collected.
    pub fn outcome(&self, id: RequestId) -> Option<Result<EchoResult, CriError>> {
        match &self.last_outcome {
            Some((done, outcome)) if *done == id => Some(outcome.clone()),
            _ => None,
        }
    }

    pub fn echo_timeout(&self) -> u64 {
        self.echo_timeout
    }

    pub fn is_echo_pending(&self) -> bool {
        self.pending_echo.is_some()
    }

    pub fn last_rtt(&self) -> Option<u64> {
        self.last_rtt
    }

    pub fn min_rtt(&self) -> Option<u64> {
        self.min_rtt
    }

    pub fn echoes(&self) -> u64 {
        self.echoes
    }

    pub fn echo_failures(&self) -> u64 {
        self.echo_failures
    }

    /// One-way delay estimate: half the best round trip.
    pub fn remote_delay(&self) -> Option<u64> {
        self.min_rtt.map(|rtt| rtt / 2)
    }

    /// Load the satellite's timestamp counter with the master's time plus the
    /// one-way delay, so both counters agree once the command lands.
    pub fn sync_time(&mut self, controller: &mut RtController) -> Result<u64, CriError> {
        let timestamp = controller.engine().now() + self.remote_delay().unwrap_or(0);
        controller.enqueue(Command::SetTime { timestamp }, 0)?;
        info!(timestamp, "satellite time sync queued");
        Ok(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Reply;
    use crate::traits::testing::{synced, RecordingSink};

    fn controller() -> (RtController, RecordingSink) {
        let mut controller = RtController::new(16, 8, TimestampConfig::default());
        let mut sink = RecordingSink::default();
        controller.tick(true, None, &mut sink);
        (controller, sink)
    }

    #[test]
    fn rejects_invalid_channel_and_timestamp() {
        let (mut controller, _) = controller();
        assert_eq!(
            controller.submit_output(16, 0, 0),
            Err(CriError::InvalidChannel(16))
        );
        assert_eq!(
            controller.request_input(100, 10),
            Err(CriError::InvalidChannel(100))
        );
        assert_eq!(
            controller.submit_output(1, 1 << 63, 0),
            Err(CriError::TimestampOutOfRange(1 << 63))
        );
        assert!(controller.submit_output(15, (1 << 63) - 1, 0).is_ok());
    }

    #[test]
    fn reset_aborts_queued_requests() {
        let (mut controller, _) = controller();
        let read = controller.request_input(1, 10).unwrap();
        controller.reset(false).unwrap();
        assert_eq!(controller.poll(read).unwrap().result, Err(CriError::Aborted));
        assert_eq!(controller.engine().queue_len(), 1);
    }

    #[test]
    fn echo_statistics() {
        let (mut controller, mut sink) = controller();
        let mut manager = RtManager::new(50);

        let id = manager.request_echo(&mut controller).unwrap();
        assert_eq!(manager.request_echo(&mut controller), Err(CriError::Busy));
        controller.tick(true, None, &mut sink);
        for _ in 0..9 {
            controller.tick(true, None, &mut sink);
        }
        controller.tick(true, Some(synced(Reply::Echo { timestamp: 77 }.encode())), &mut sink);
        manager.tick(&mut controller);

        assert_eq!(
            manager.outcome(id),
            Some(Ok(EchoResult {
                rtt: 10,
                satellite_time: 77
            }))
        );
        assert_eq!(manager.min_rtt(), Some(10));
        assert_eq!(manager.remote_delay(), Some(5));
        assert!(!manager.is_echo_pending());

        let timestamp = manager.sync_time(&mut controller).unwrap();
        assert_eq!(timestamp, controller.engine().now() + 5);
    }

    #[test]
    fn echo_timeout_recorded_as_failure() {
        let (mut controller, mut sink) = controller();
        let mut manager = RtManager::new(5);
        let id = manager.request_echo(&mut controller).unwrap();
        for _ in 0..10 {
            controller.tick(true, None, &mut sink);
            manager.tick(&mut controller);
        }
        assert_eq!(
            manager.outcome(id),
            Some(Err(CriError::ReplyTimeout { ticks: 5 }))
        );
        assert_eq!(manager.echo_failures(), 1);
    }
}
