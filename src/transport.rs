//! Half-duplex serial transport abstraction.
//!
//! The receive interrupt is the single producer of a [`RxQueue`]; the
//! protocol engine is its single consumer, reached through [`SerialPort`].
//!
//! ```
//! use rgbw_sequencer::transport::{RxQueue, SerialPort, SerialTx, Transport};
//!
//! struct Uart;
//! impl SerialTx for Uart {
//!     fn write(&mut self, _bytes: &[u8]) {}
//! }
//!
//! let mut queue: RxQueue = RxQueue::new();
//! let (mut producer, mut consumer) = queue.split();
//!
//! // Interrupt side.
//! producer.enqueue(b':').unwrap();
//!
//! // Foreground side.
//! let mut port = SerialPort::new(move || consumer.dequeue(), Uart);
//! assert!(port.char_ready());
//! assert_eq!(port.read_char(), Some(b':'));
//! ```

/// Size of the receive ring buffer.
pub const RX_BUFFER_LEN: usize = 256;

/// Single-producer/single-consumer receive ring buffer.
pub type RxQueue = heapless::spsc::Queue<u8, RX_BUFFER_LEN>;

/// Trait for a character-oriented, half-duplex link.
pub trait Transport {
    /// Returns true if a received character is waiting.
    fn char_ready(&mut self) -> bool;

    /// Takes the next received character, if any.
    fn read_char(&mut self) -> Option<u8>;

    /// Sends `bytes`. Reception is suppressed while transmitting.
    fn write(&mut self, bytes: &[u8]);

    /// Blocks until everything written has left the wire.
    fn flush(&mut self) {}

    /// Drops every character received so far.
    fn discard_input(&mut self) {
        while self.read_char().is_some() {}
    }
}

/// Trait for the transmit side of a serial port.
///
/// Implementations switch the line driver to transmit and back; see
/// [`Transport::write`].
pub trait SerialTx {
    /// Sends `bytes`.
    fn write(&mut self, bytes: &[u8]);

    /// Blocks until the last byte has been sent and the driver is back in receive.
    fn flush(&mut self) {}
}

/// [`Transport`] built from the consumer end of a receive queue and a transmitter.
///
/// `R` yields the next received byte; it is normally a closure wrapping
/// `heapless::spsc::Consumer::dequeue`.
pub struct SerialPort<R, W> {
    rx: R,
    tx: W,
    pending: Option<u8>,
}

impl<R, W> SerialPort<R, W>
where
    R: FnMut() -> Option<u8>,
    W: SerialTx,
{
    /// Creates a port from a receive source and a transmitter.
    pub fn new(rx: R, tx: W) -> Self {
        Self {
            rx,
            tx,
            pending: None,
        }
    }

    /// Returns a reference to the transmitter.
    pub fn tx(&self) -> &W {
        &self.tx
    }
}

impl<R, W> Transport for SerialPort<R, W>
where
    R: FnMut() -> Option<u8>,
    W: SerialTx,
{
    fn char_ready(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = (self.rx)();
        }
        self.pending.is_some()
    }

    fn read_char(&mut self) -> Option<u8> {
        self.pending.take().or_else(|| (self.rx)())
    }

    fn write(&mut self, bytes: &[u8]) {
        self.tx.write(bytes);
    }

    fn flush(&mut self) {
        self.tx.flush();
    }
}
