//! Clock-domain bridge between the recovered and local domains.
//!
//! The receiver packs its per-cycle signals into one [`BusWord`] and writes it
//! on the recovered side; the local side reads words back in order. Every
//! value read on the local side is wrapped in [`Synced`], which only this
//! crate can construct, so local-domain logic cannot consume recovered-domain
//! signals without going through a bridge.

use std::collections::VecDeque;

use heapless::spsc::{Consumer, Producer, Queue};
use tracing::{error, trace, warn};

use crate::channel::SubChannel;
use crate::error::BridgeError;
use crate::rx::{LinkState, LinkStatus, RxLane, RxSignals};

/// One bridge transfer: all synchronized signals of one cycle.
pub type BusWord = u64;

/// Widest bus a bridge can carry.
pub const MAX_BUS_WIDTH: u32 = BusWord::BITS;

/// Default elastic buffer depth in words.
pub const DEFAULT_ELASTIC_DEPTH: usize = 4;

const ELASTIC_SLOTS: usize = DEFAULT_ELASTIC_DEPTH + 1;
const PRIME_LEVEL: usize = DEFAULT_ELASTIC_DEPTH / 2;

/// A value that has crossed into the local clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synced<T>(T);

impl<T> Synced<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(value)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Derive a value that stays in the local domain.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Synced<U> {
        Synced(f(self.0))
    }
}

impl Synced<RxSignals> {
    /// Signals seen before anything crossed: no link, no frames.
    pub(crate) fn idle() -> Self {
        Self(RxSignals::default())
    }

    pub fn link(&self) -> Synced<LinkStatus> {
        Synced(self.0.link)
    }

    pub fn lane(&self, sub_channel: SubChannel) -> Synced<RxLane> {
        Synced(self.0.lane(sub_channel))
    }
}

/// Bit range of one signal inside a [`BusWord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalHandle {
    offset: u32,
    width: u32,
}

impl SignalHandle {
    fn mask(&self) -> BusWord {
        if self.width >= BusWord::BITS {
            BusWord::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Write `value` into this signal's bits. Excess high bits are discarded.
    pub fn pack(&self, word: &mut BusWord, value: BusWord) {
        let mask = self.mask();
        *word = (*word & !(mask << self.offset)) | ((value & mask) << self.offset);
    }

    pub fn unpack(&self, word: BusWord) -> BusWord {
        (word >> self.offset) & self.mask()
    }

    fn flag(&self, word: BusWord) -> bool {
        self.unpack(word) != 0
    }
}

/// Registers signals on a bus, one bit range each.
#[derive(Debug, Default)]
pub struct SynchronizerBuilder {
    width: u32,
    signals: usize,
}

impl SynchronizerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal that must cross domains. Returns its bit range.
    pub fn resync(&mut self, width: u32) -> SignalHandle {
        let handle = SignalHandle {
            offset: self.width,
            width,
        };
        self.width = self.width.saturating_add(width);
        self.signals += 1;
        handle
    }

    /// Fix the layout. Fails if nothing was registered or the bus is too wide.
    pub fn finalize(self) -> Result<BusLayout, BridgeError> {
        if self.signals == 0 || self.width == 0 {
            return Err(BridgeError::EmptyBus);
        }
        if self.width > MAX_BUS_WIDTH {
            return Err(BridgeError::BusTooWide {
                width: self.width,
                max: MAX_BUS_WIDTH,
            });
        }
        Ok(BusLayout {
            width: self.width,
            signals: self.signals,
        })
    }
}

/// A finalized bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusLayout {
    pub width: u32,
    pub signals: usize,
}

#[derive(Debug, Clone, Copy)]
struct LaneHandles {
    frame: SignalHandle,
    frame_perm: SignalHandle,
    stb: SignalHandle,
    data: SignalHandle,
}

impl LaneHandles {
    fn register(builder: &mut SynchronizerBuilder) -> Self {
        Self {
            frame: builder.resync(1),
            frame_perm: builder.resync(1),
            stb: builder.resync(1),
            data: builder.resync(8),
        }
    }

    fn pack(&self, word: &mut BusWord, lane: &RxLane) {
        self.frame.pack(word, lane.frame.into());
        self.frame_perm.pack(word, lane.frame_perm.into());
        self.stb.pack(word, lane.data.is_some().into());
        self.data.pack(word, lane.data.unwrap_or(0).into());
    }

    fn unpack(&self, word: BusWord) -> RxLane {
        RxLane {
            frame: self.frame.flag(word),
            frame_perm: self.frame_perm.flag(word),
            data: self
                .stb
                .flag(word)
                .then(|| self.data.unpack(word) as u8),
        }
    }
}

/// Bus layout of the receiver's per-cycle signals.
#[derive(Debug, Clone, Copy)]
pub struct RxBus {
    link_state: SignalHandle,
    aligned: SignalHandle,
    code_error: SignalHandle,
    aux: LaneHandles,
    rt: LaneHandles,
    layout: BusLayout,
}

impl RxBus {
    pub fn new() -> Result<Self, BridgeError> {
        let mut builder = SynchronizerBuilder::new();
        let link_state = builder.resync(2);
        let aligned = builder.resync(1);
        let code_error = builder.resync(1);
        let aux = LaneHandles::register(&mut builder);
        let rt = LaneHandles::register(&mut builder);
        let layout = builder.finalize()?;
        Ok(Self {
            link_state,
            aligned,
            code_error,
            aux,
            rt,
            layout,
        })
    }

    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    pub fn pack(&self, signals: &RxSignals) -> BusWord {
        let mut word = 0;
        self.link_state.pack(&mut word, signals.link.state.code());
        self.aligned.pack(&mut word, signals.link.aligned.into());
        self.code_error.pack(&mut word, signals.code_error.into());
        self.aux.pack(&mut word, &signals.aux);
        self.rt.pack(&mut word, &signals.rt);
        word
    }

    pub fn unpack(&self, word: Synced<BusWord>) -> Synced<RxSignals> {
        word.map(|word| RxSignals {
            link: LinkStatus {
                state: LinkState::from_code(self.link_state.unpack(word)),
                aligned: self.aligned.flag(word),
            },
            code_error: self.code_error.flag(word),
            aux: self.aux.unpack(word),
            rt: self.rt.unpack(word),
        })
    }
}

/// Transfers bus words from the recovered domain to the local domain.
///
/// Words come out in write order, each exactly once.
pub trait RxBridge {
    /// Recovered side: enqueue this cycle's word.
    fn write(&mut self, word: BusWord) -> Result<(), BridgeError>;

    /// Local side: the next word, or `None` if nothing is available this cycle.
    fn read(&mut self) -> Option<Synced<BusWord>>;

    /// Words the bridge can hold.
    fn depth(&self) -> usize;
}

fn primed_read(
    primed: &mut bool,
    len: usize,
    dequeue: impl FnOnce() -> Option<BusWord>,
) -> Option<Synced<BusWord>> {
    if !*primed {
        if len < PRIME_LEVEL {
            return None;
        }
        trace!(len, "elastic buffer primed");
        *primed = true;
    }
    match dequeue() {
        Some(word) => Some(Synced::new(word)),
        None => {
            warn!("elastic buffer underrun, re-priming");
            *primed = false;
            None
        }
    }
}

fn overflow() -> BridgeError {
    error!(depth = DEFAULT_ELASTIC_DEPTH, "elastic buffer overflow");
    BridgeError::Overflow {
        depth: DEFAULT_ELASTIC_DEPTH,
    }
}

/// Elastic buffer absorbing phase drift between the two domains.
///
/// Reading starts once the buffer is half full and restarts the same way after
/// an underrun, so short-term drift in either direction is absorbed.
#[derive(Debug)]
pub struct ElasticBuffer {
    queue: Queue<BusWord, ELASTIC_SLOTS>,
    primed: bool,
}

impl ElasticBuffer {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(),
            primed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Split into a writer for the recovered domain and a reader for the
    /// local domain, for running the two sides on separate threads.
    pub fn split(&mut self) -> (BridgeWriter<'_>, BridgeReader<'_>) {
        let (producer, consumer) = self.queue.split();
        (
            BridgeWriter { producer },
            BridgeReader {
                consumer,
                primed: false,
            },
        )
    }
}

impl Default for ElasticBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RxBridge for ElasticBuffer {
    fn write(&mut self, word: BusWord) -> Result<(), BridgeError> {
        self.queue.enqueue(word).map_err(|_| overflow())
    }

    fn read(&mut self) -> Option<Synced<BusWord>> {
        let len = self.queue.len();
        primed_read(&mut self.primed, len, || self.queue.dequeue())
    }

    fn depth(&self) -> usize {
        DEFAULT_ELASTIC_DEPTH
    }
}

/// Recovered-domain half of a split [`ElasticBuffer`].
pub struct BridgeWriter<'a> {
    producer: Producer<'a, BusWord, ELASTIC_SLOTS>,
}

impl BridgeWriter<'_> {
    pub fn write(&mut self, word: BusWord) -> Result<(), BridgeError> {
        self.producer.enqueue(word).map_err(|_| overflow())
    }
}

/// Local-domain half of a split [`ElasticBuffer`].
pub struct BridgeReader<'a> {
    consumer: Consumer<'a, BusWord, ELASTIC_SLOTS>,
    primed: bool,
}

impl BridgeReader<'_> {
    pub fn read(&mut self) -> Option<Synced<BusWord>> {
        let len = self.consumer.len();
        primed_read(&mut self.primed, len, || self.consumer.dequeue())
    }
}

/// Bridge with a constant, phase-independent latency.
///
/// The n-th word written is released on the local side's `n + delay`-th
/// read. For `delay >= 1` the latency does not depend on whether the
/// recovered or the local step of a cycle runs first.
#[derive(Debug)]
pub struct FixedLatencyBridge {
    line: VecDeque<(u64, BusWord)>,
    delay: u64,
    writes: u64,
    reads: u64,
}

impl FixedLatencyBridge {
    pub fn new(delay: u64) -> Self {
        Self {
            line: VecDeque::new(),
            delay,
            writes: 0,
            reads: 0,
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }
}

impl RxBridge for FixedLatencyBridge {
    fn write(&mut self, word: BusWord) -> Result<(), BridgeError> {
        let depth = self.depth();
        if self.line.len() >= depth {
            error!(depth, "fixed-latency bridge overflow");
            return Err(BridgeError::Overflow { depth });
        }
        self.line.push_back((self.writes, word));
        self.writes += 1;
        Ok(())
    }

    fn read(&mut self) -> Option<Synced<BusWord>> {
        let now = self.reads;
        self.reads += 1;
        match self.line.front() {
            Some(&(seq, _)) if seq + self.delay <= now => {
                self.line.pop_front().map(|(_, word)| Synced::new(word))
            }
            _ => None,
        }
    }

    fn depth(&self) -> usize {
        usize::try_from(self.delay + 2).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn handles_pack_disjoint_ranges() {
        let mut builder = SynchronizerBuilder::new();
        let a = builder.resync(3);
        let b = builder.resync(5);
        builder.finalize().unwrap();

        let mut word = 0;
        a.pack(&mut word, 0b101);
        b.pack(&mut word, 0b11111);
        assert_eq!(a.unpack(word), 0b101);
        assert_eq!(b.unpack(word), 0b11111);

        a.pack(&mut word, 0xFF);
        assert_eq!(a.unpack(word), 0b111);
        assert_eq!(b.unpack(word), 0b11111);
    }

    #[test]
    fn full_width_signal() {
        let mut builder = SynchronizerBuilder::new();
        let h = builder.resync(64);
        builder.finalize().unwrap();
        let mut word = 0;
        h.pack(&mut word, u64::MAX);
        assert_eq!(h.unpack(word), u64::MAX);
    }

    #[test]
    fn empty_and_oversized_buses_rejected() {
        assert_eq!(
            SynchronizerBuilder::new().finalize(),
            Err(BridgeError::EmptyBus)
        );

        let mut builder = SynchronizerBuilder::new();
        builder.resync(40);
        builder.resync(30);
        assert_eq!(
            builder.finalize(),
            Err(BridgeError::BusTooWide { width: 70, max: 64 })
        );
    }

    #[test]
    fn rx_bus_carries_all_signals() {
        let bus = RxBus::new().unwrap();
        assert_eq!(bus.layout().width, 26);

        let signals = RxSignals {
            link: LinkStatus {
                state: LinkState::Ready,
                aligned: true,
            },
            code_error: true,
            aux: RxLane {
                frame: true,
                frame_perm: false,
                data: Some(0),
            },
            rt: RxLane {
                frame: false,
                frame_perm: true,
                data: None,
            },
        };
        let word = bus.pack(&signals);
        assert_eq!(*bus.unpack(Synced::new(word)).get(), signals);
    }

    #[test]
    fn elastic_buffer_primes_before_first_read() {
        let mut buffer = ElasticBuffer::new();
        assert_eq!(buffer.read(), None);
        buffer.write(1).unwrap();
        assert_eq!(buffer.read(), None);
        buffer.write(2).unwrap();
        assert_eq!(buffer.read().map(Synced::into_inner), Some(1));
        assert_eq!(buffer.read().map(Synced::into_inner), Some(2));
        assert_eq!(buffer.read(), None);
    }

    #[test]
    fn elastic_buffer_overflow_is_an_error() {
        let mut buffer = ElasticBuffer::new();
        for word in 0..DEFAULT_ELASTIC_DEPTH as u64 {
            buffer.write(word).unwrap();
        }
        assert_eq!(
            buffer.write(99),
            Err(BridgeError::Overflow {
                depth: DEFAULT_ELASTIC_DEPTH
            })
        );
    }

    #[test]
    fn fixed_latency_is_phase_independent() {
        // Recovered step first.
        let mut bridge = FixedLatencyBridge::new(2);
        let mut seen = Vec::new();
        for cycle in 0..6u64 {
            bridge.write(cycle).unwrap();
            seen.push(bridge.read().map(Synced::into_inner));
        }
        assert_eq!(seen, [None, None, Some(0), Some(1), Some(2), Some(3)]);

        // Local step first.
        let mut bridge = FixedLatencyBridge::new(2);
        let mut seen = Vec::new();
        for cycle in 0..6u64 {
            seen.push(bridge.read().map(Synced::into_inner));
            bridge.write(cycle).unwrap();
        }
        assert_eq!(seen, [None, None, Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn split_halves_transfer_across_threads() {
        let mut buffer = ElasticBuffer::new();
        let (mut writer, mut reader) = buffer.split();
        let total = 1000u64;

        let received = std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut next = 0;
                while next < total + PRIME_LEVEL as u64 {
                    if writer.write(next).is_ok() {
                        next += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            });

            let mut received = Vec::with_capacity(total as usize);
            while (received.len() as u64) < total {
                match reader.read() {
                    Some(word) => received.push(word.into_inner()),
                    None => std::thread::yield_now(),
                }
            }
            received
        });

        assert_eq!(received, (0..total).collect::<Vec<_>>());
    }

    proptest! {
        /// Any interleaving of writes and reads that never overflows
        /// delivers every word once, in order.
        #[test]
        fn elastic_buffer_preserves_order(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut buffer = ElasticBuffer::new();
            let mut next = 0u64;
            let mut out = Vec::new();
            for write in ops {
                if write && buffer.len() < DEFAULT_ELASTIC_DEPTH {
                    buffer.write(next).unwrap();
                    next += 1;
                } else if let Some(word) = buffer.read() {
                    out.push(word.into_inner());
                }
            }
            while let Some(word) = buffer.read() {
                out.push(word.into_inner());
            }
            prop_assert!(out.iter().copied().eq(0..out.len() as u64));
            prop_assert!(out.len() as u64 <= next);
        }

        #[test]
        fn fixed_latency_delivers_every_word_once(delay in 0u64..8, count in 1u64..64) {
            let mut bridge = FixedLatencyBridge::new(delay);
            let mut out = Vec::new();
            for word in 0..count {
                bridge.write(word).unwrap();
                if let Some(word) = bridge.read() {
                    out.push(word.into_inner());
                }
            }
            for _ in 0..=delay {
                if let Some(word) = bridge.read() {
                    out.push(word.into_inner());
                }
            }
            prop_assert_eq!(out, (0..count).collect::<Vec<_>>());
        }
    }
}
