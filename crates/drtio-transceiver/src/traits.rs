use crate::symbol::Symbol;

/// A serial transceiver as seen from the link layer.
///
/// `transmit` is driven by the local clock, `receive` and `rx_ready` by the
/// clock recovered from the incoming stream. Exactly one symbol moves in each
/// direction per cycle of the respective clock.
pub trait Transceiver {
    /// Hand one symbol to the serializer.
    fn transmit(&mut self, symbol: Symbol);

    /// Take the next deserialized symbol.
    ///
    /// Returns [`Symbol::Invalid`] while there is no signal.
    fn receive(&mut self) -> Symbol;

    /// True while clock/data recovery is locked to the incoming stream.
    fn rx_ready(&self) -> bool;
}

impl<T: Transceiver + ?Sized> Transceiver for Box<T> {
    fn transmit(&mut self, symbol: Symbol) {
        (**self).transmit(symbol)
    }

    fn receive(&mut self) -> Symbol {
        (**self).receive()
    }

    fn rx_ready(&self) -> bool {
        (**self).rx_ready()
    }
}
