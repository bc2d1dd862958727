use crc32fast::Hasher;
use drtio_transceiver::Symbol;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{is_idle, SubChannel, EOF, READY, TRAIN};
use crate::codec::{LinkConfig, CRC_LEN};

/// State of the link as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// No signal (`rx_ready` low).
    #[default]
    NoLink,
    /// Signal present, alignment handshake in progress.
    Training,
    /// Both ends aligned, frames flow.
    Ready,
}

impl LinkState {
    /// Numeric encoding used on the bridge bus and in registers.
    pub fn code(self) -> u64 {
        match self {
            LinkState::NoLink => 0,
            LinkState::Training => 1,
            LinkState::Ready => 2,
        }
    }

    /// Inverse of [`LinkState::code`]. Unknown codes map to `NoLink`.
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => LinkState::Training,
            2 => LinkState::Ready,
            _ => LinkState::NoLink,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            LinkState::NoLink => "no-link",
            LinkState::Training => "training",
            LinkState::Ready => "ready",
        }
    }
}

/// Link state plus the receiver's alignment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub state: LinkState,
    /// The receiver has seen enough consecutive idles; the transmitter
    /// advertises it by sending `READY` idles.
    pub aligned: bool,
}

impl LinkStatus {
    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }
}

/// Per-cycle receive signals of one sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxLane {
    /// High from the start-of-frame cycle through the last CRC cycle.
    pub frame: bool,
    /// High on the cycle after a frame closed, iff its integrity was confirmed.
    pub frame_perm: bool,
    /// Payload byte received this cycle.
    pub data: Option<u8>,
}

/// Everything the receiver produces in one recovered-clock cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxSignals {
    pub link: LinkStatus,
    /// An undecodable code group was received.
    pub code_error: bool,
    pub aux: RxLane,
    pub rt: RxLane,
}

impl RxSignals {
    /// Signals of one sub-channel.
    pub fn lane(&self, sub_channel: SubChannel) -> RxLane {
        match sub_channel {
            SubChannel::Aux => self.aux,
            SubChannel::Rt => self.rt,
        }
    }

    fn lane_mut(&mut self, sub_channel: SubChannel) -> &mut RxLane {
        match sub_channel {
            SubChannel::Aux => &mut self.aux,
            SubChannel::Rt => &mut self.rt,
        }
    }
}

#[derive(Debug)]
enum Decoder {
    Hunt,
    Payload {
        sub_channel: SubChannel,
        hasher: Hasher,
        len: usize,
        bad: bool,
    },
    Crc {
        sub_channel: SubChannel,
        expected: u32,
        received: [u8; CRC_LEN],
        count: usize,
        bad: bool,
    },
}

impl Decoder {
    fn active(&self) -> Option<SubChannel> {
        match self {
            Decoder::Hunt => None,
            Decoder::Payload { sub_channel, .. } | Decoder::Crc { sub_channel, .. } => {
                Some(*sub_channel)
            }
        }
    }

    fn mark_bad(&mut self) {
        match self {
            Decoder::Hunt => {}
            Decoder::Payload { bad, .. } | Decoder::Crc { bad, .. } => *bad = true,
        }
    }
}

/// Receive half of the link layer. Runs in the recovered clock domain.
///
/// Handles the alignment handshake and splits the symbol stream into the AUX
/// and RT lanes. Frame integrity is reported one cycle after the last CRC
/// symbol through `frame_perm`.
#[derive(Debug)]
pub struct LinkRx {
    config: LinkConfig,
    state: LinkState,
    aligned: bool,
    idle_run: u32,
    decoder: Decoder,
    closing: Option<SubChannel>,
    verdict: Option<(SubChannel, bool)>,
}

impl LinkRx {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: LinkState::NoLink,
            aligned: false,
            idle_run: 0,
            decoder: Decoder::Hunt,
            closing: None,
            verdict: None,
        }
    }

    /// Current receiver state (recovered domain).
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Process one received symbol.
    pub fn tick(&mut self, symbol: Symbol, rx_ready: bool) -> RxSignals {
        let mut out = RxSignals::default();

        let verdict = self.verdict.take();
        if let Some((sub_channel, ok)) = verdict {
            out.lane_mut(sub_channel).frame_perm = ok;
        }

        if !rx_ready {
            if self.state != LinkState::NoLink {
                warn!("rx_ready lost");
            }
            self.restart(LinkState::NoLink);
        } else {
            if self.state == LinkState::NoLink {
                debug!("rx_ready asserted, training");
                self.state = LinkState::Training;
            }
            if self.state == LinkState::Ready {
                self.decode(symbol, &mut out);
            } else {
                self.train(symbol);
            }
        }

        if let Some(sub_channel) = self.decoder.active() {
            out.lane_mut(sub_channel).frame = true;
        }
        if let Some(sub_channel) = self.closing.take() {
            out.lane_mut(sub_channel).frame = true;
        }
        if let Some((sub_channel, _)) = verdict {
            out.lane_mut(sub_channel).frame = false;
        }

        out.link = LinkStatus {
            state: self.state,
            aligned: self.aligned,
        };
        out
    }

    fn restart(&mut self, state: LinkState) {
        if let Some(sub_channel) = self.decoder.active() {
            debug!(%sub_channel, "frame truncated by link loss");
        }
        self.state = state;
        self.aligned = false;
        self.idle_run = 0;
        self.decoder = Decoder::Hunt;
    }

    fn train(&mut self, symbol: Symbol) {
        match symbol {
            Symbol::Control(code) if is_idle(code) => {
                if self.aligned && code == READY {
                    info!("link ready");
                    self.state = LinkState::Ready;
                    return;
                }
                self.idle_run = self.idle_run.saturating_add(1);
                if !self.aligned && self.idle_run >= self.config.training_symbols {
                    debug!(idles = self.idle_run, "receiver aligned");
                    self.aligned = true;
                }
            }
            _ => {
                self.idle_run = 0;
                self.aligned = false;
            }
        }
    }

    fn abort(&mut self, reason: &'static str) {
        if let Some(sub_channel) = self.decoder.active() {
            debug!(%sub_channel, reason, "frame aborted");
        }
        self.decoder = Decoder::Hunt;
    }

    fn decode(&mut self, symbol: Symbol, out: &mut RxSignals) {
        match symbol {
            Symbol::Invalid => {
                out.code_error = true;
                self.decoder.mark_bad();
            }
            Symbol::Control(TRAIN) => {
                warn!("peer lost alignment, retraining");
                self.restart(LinkState::Training);
            }
            Symbol::Control(READY) => {
                if self.decoder.active().is_some() {
                    self.abort("idle inside frame");
                }
            }
            Symbol::Control(EOF) => match std::mem::replace(&mut self.decoder, Decoder::Hunt) {
                Decoder::Payload {
                    sub_channel,
                    hasher,
                    bad,
                    ..
                } => {
                    self.decoder = Decoder::Crc {
                        sub_channel,
                        expected: hasher.finalize(),
                        received: [0; CRC_LEN],
                        count: 0,
                        bad,
                    };
                }
                Decoder::Crc { sub_channel, .. } => {
                    debug!(%sub_channel, "frame aborted: EOF inside CRC");
                }
                Decoder::Hunt => debug!("stray EOF"),
            },
            Symbol::Control(code) => match SubChannel::from_start_code(code) {
                Some(_) if self.decoder.active().is_some() => {
                    self.abort("start of frame inside frame");
                }
                Some(sub_channel) => {
                    self.decoder = Decoder::Payload {
                        sub_channel,
                        hasher: Hasher::new(),
                        len: 0,
                        bad: false,
                    };
                }
                None => {
                    out.code_error = true;
                    self.decoder.mark_bad();
                }
            },
            Symbol::Data(byte) => self.decode_data(byte, out),
        }
    }

    fn decode_data(&mut self, byte: u8, out: &mut RxSignals) {
        let mut closed = None;
        match &mut self.decoder {
            Decoder::Hunt => {}
            Decoder::Payload {
                sub_channel,
                hasher,
                len,
                bad,
            } => {
                *len += 1;
                if *len > self.config.max_payload(*sub_channel) {
                    *bad = true;
                } else {
                    hasher.update(&[byte]);
                    out.lane_mut(*sub_channel).data = Some(byte);
                }
            }
            Decoder::Crc {
                sub_channel,
                expected,
                received,
                count,
                bad,
            } => {
                received[*count] = byte;
                *count += 1;
                if *count == CRC_LEN {
                    let ok = !*bad && u32::from_le_bytes(*received) == *expected;
                    closed = Some((*sub_channel, ok));
                }
            }
        }

        if let Some((sub_channel, ok)) = closed {
            if !ok {
                debug!(%sub_channel, "frame failed integrity check");
            }
            self.decoder = Decoder::Hunt;
            self.closing = Some(sub_channel);
            self.verdict = Some((sub_channel, ok));
        }
    }
}
