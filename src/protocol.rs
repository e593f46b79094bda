//! SBUS: the ASCII-hex request/reply protocol spoken on the shared serial bus.
//!
//! A request is framed as
//!
//! ```text
//! :IDCCAAAA<payload>KK\r\n
//! ```
//!
//! where `ID` is the target device address, `CC` the [`Command`] code,
//! `AAAA` a 16-bit address field, `<payload>` command-specific hex pairs and
//! `KK` a checksum that is ignored. Every accepted request gets exactly one
//! reply echoing `:IDCCAAAA`, followed by the result (or `0xEF00 | CC` on
//! failure) and a `00\r\n` trailer. Requests for other devices are skipped.
//!
//! For example `:FF60FFFF00\r\n` asks every device for its configuration and
//! a controller with factory settings answers
//! `:FF60FFFF01050501680000003DFF000000\r\n`.

use core::marker::PhantomData;

use heapless::Vec;

use crate::command::{Command, ERROR_FLAG};
use crate::config::{BROADCAST_ADDRESS, Parameter};
use crate::sequencer::{ControlError, ReportValue, RgbwOutput, Sequencer};
use crate::storage::Storage;
use crate::time::{TimeDuration, TimeInstant, TimeSource};
use crate::transport::Transport;
use crate::types::{Levels, SEGMENT_LEN};

/// Maximum wait for each expected character, in milliseconds.
pub const TIMEOUT_MS: u64 = 500;

/// Character opening every message.
pub const START: u8 = b':';

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Largest payload accepted by the write commands, in bytes.
pub const MAX_PAYLOAD: usize = 256;

/// Largest sequence image sent in a read reply; keeps the size byte exact.
///
/// Longer sequences are cut at the last whole segment that fits.
pub const MAX_WIRE_SEQUENCE: usize = 255 - 255 % SEGMENT_LEN;

/// Value echoed for fields that could not be decoded.
const UNRESOLVED: u16 = 0xFFFF;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Reasons a request field could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldError {
    /// No character arrived within [`TIMEOUT_MS`].
    Timeout,

    /// A non-hex character appeared inside a field.
    Malformed,

    /// The payload is longer than [`MAX_PAYLOAD`].
    Overflow,
}

impl core::fmt::Display for FieldError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FieldError::Timeout => write!(f, "no character within {} ms", TIMEOUT_MS),
            FieldError::Malformed => write!(f, "invalid hex digit"),
            FieldError::Overflow => write!(f, "payload longer than {} bytes", MAX_PAYLOAD),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FieldError {}

/// Why a command produced an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The request itself could not be decoded.
    Field(FieldError),

    /// The controller rejected the operation.
    Control(ControlError),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::Field(err) => write!(f, "bad request: {}", err),
            CommandError::Control(err) => write!(f, "rejected: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CommandError {}

impl From<FieldError> for CommandError {
    fn from(err: FieldError) -> Self {
        CommandError::Field(err)
    }
}

impl From<ControlError> for CommandError {
    fn from(err: ControlError) -> Self {
        CommandError::Control(err)
    }
}

/// What a call to [`SbusEngine::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    /// No character was waiting.
    Idle,
    /// The line was not for this device, or was not a request; it was skipped.
    Ignored,
    /// A reply was sent for `command`; `ok` is false for an error reply.
    Replied {
        /// Raw command code from the request.
        command: u8,
        /// Whether the command succeeded.
        ok: bool,
    },
}

fn from_hex(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

fn to_hex(byte: u8) -> [u8; 2] {
    [
        HEX_DIGITS[usize::from(byte >> 4)],
        HEX_DIGITS[usize::from(byte & 0x0F)],
    ]
}

fn both(a: Result<u16, FieldError>, b: Result<u16, FieldError>) -> Result<(u16, u16), CommandError> {
    Ok((a?, b?))
}

/// Protocol engine bound to one transport.
///
/// Call [`poll`](Self::poll) from the foreground loop. A poll that finds a
/// start character processes the whole request and sends the whole reply
/// before returning, so requests are handled strictly one at a time.
///
/// # Type Parameters
/// * `'t` - Lifetime of the time source reference
/// * `I` - Time instant type
/// * `P` - Transport implementation type
/// * `T` - Time source implementation type
pub struct SbusEngine<'t, I: TimeInstant, P: Transport, T: TimeSource<I>> {
    transport: P,
    time_source: &'t T,
    line_closed: bool,
    _instant: PhantomData<I>,
}

impl<'t, I: TimeInstant, P: Transport, T: TimeSource<I>> SbusEngine<'t, I, P, T> {
    /// Creates an engine reading from and replying on `transport`.
    pub fn new(transport: P, time_source: &'t T) -> Self {
        Self {
            transport,
            time_source,
            line_closed: false,
            _instant: PhantomData,
        }
    }

    /// Returns a reference to the transport.
    pub fn transport(&self) -> &P {
        &self.transport
    }

    /// Returns a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut P {
        &mut self.transport
    }

    /// Handles at most one request.
    pub fn poll<E, N, O>(&mut self, sequencer: &mut Sequencer<E, N, O>) -> Poll
    where
        E: Storage,
        N: Storage,
        O: RgbwOutput,
    {
        if !self.transport.char_ready() {
            return Poll::Idle;
        }
        self.line_closed = false;

        let Ok(first) = self.get_char() else {
            return Poll::Idle;
        };
        if first != START {
            self.drain_line();
            return Poll::Ignored;
        }

        let device = match self.get_byte() {
            Ok(id) if id == BROADCAST_ADDRESS || id == sequencer.config().device_address => id,
            Ok(id) => {
                trace!("request for device {=u8} skipped", id);
                self.drain_line();
                return Poll::Ignored;
            }
            // Without a readable id the request cannot be attributed to this
            // device, so answering could collide with the addressed one.
            Err(_) => {
                self.drain_line();
                return Poll::Ignored;
            }
        };

        let code = self.get_byte();
        let address = code.and_then(|_| self.get_word());

        let (command, ok) = match code {
            Ok(code) => match Command::try_from(code) {
                Ok(command) => (code, self.execute(sequencer, device, command, address)),
                Err(unknown) => {
                    debug!("unknown command {=u8}", unknown);
                    self.drain_line();
                    self.send_prefix(device, unknown, address.unwrap_or(UNRESOLVED));
                    (unknown, true)
                }
            },
            Err(err) => {
                warn!("command code unreadable: {}", err);
                self.drain_line();
                let [_, code] = UNRESOLVED.to_be_bytes();
                self.send_prefix(device, code, UNRESOLVED);
                self.send_word(ERROR_FLAG | u16::from(code));
                (code, false)
            }
        };

        self.end_of_message();
        self.transport.flush();
        self.transport.discard_input();
        Poll::Replied { command, ok }
    }

    fn execute<E, N, O>(
        &mut self,
        sequencer: &mut Sequencer<E, N, O>,
        device: u8,
        command: Command,
        address: Result<u16, FieldError>,
    ) -> bool
    where
        E: Storage,
        N: Storage,
        O: RgbwOutput,
    {
        debug!("command {} at {=u16}", command, address.unwrap_or(UNRESOLVED));
        match command {
            Command::ReadSequences => {
                let length = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                match both(address, length) {
                    Ok((start, length)) => {
                        self.send_word(length);
                        self.send_sequences(sequencer, start, length);
                        true
                    }
                    Err(err) => self.respond(command, Err(err)),
                }
            }
            Command::WriteSequences => {
                let payload = address.and_then(|_| self.read_payload());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = match (address, payload) {
                    (Ok(address), Ok(payload)) => sequencer
                        .write_segments(address, &payload)
                        .map_err(CommandError::from),
                    (Err(err), _) | (_, Err(err)) => Err(err.into()),
                };
                self.respond(command, outcome)
            }
            Command::RunSequences => {
                let length = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = both(address, length).and_then(|(start, length)| {
                    Ok(sequencer.run_range(start, length)?)
                });
                self.respond(command, outcome)
            }
            Command::EraseSequences => {
                let end = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = both(address, end)
                    .and_then(|(start, end)| Ok(sequencer.erase_range(start, end)?));
                self.respond(command, outcome)
            }
            Command::Configure => {
                let value = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = both(address, value)
                    .and_then(|(address, value)| Ok(sequencer.configure(address, value)?));
                self.respond(command, outcome)
            }
            Command::Report => {
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                match address {
                    Ok(UNRESOLVED) => {
                        for parameter in Parameter::ALL {
                            let value = sequencer.report(parameter);
                            self.send_value(value);
                        }
                        true
                    }
                    Ok(address) => {
                        if let Ok(parameter) = Parameter::try_from(address) {
                            let value = sequencer.report(parameter);
                            self.send_value(value);
                        }
                        true
                    }
                    Err(err) => self.respond(command, Err(err.into())),
                }
            }
            Command::ReadMacros => {
                let length = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                match both(address, length) {
                    Ok((address, length)) => {
                        let count = sequencer.macro_count();
                        let length = if address == UNRESOLVED { count } else { length };
                        if length > count {
                            self.send_word(command.error_word());
                            return false;
                        }
                        self.send_word(length);
                        for index in 0..length {
                            let ordinal = sequencer.read_macro(index);
                            self.send_word(ordinal);
                        }
                        true
                    }
                    Err(err) => self.respond(command, Err(err)),
                }
            }
            Command::WriteMacros => {
                let payload = address.and_then(|_| self.read_payload());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = match (address, payload) {
                    (Ok(address), Ok(payload)) => sequencer
                        .write_macros(address, &payload)
                        .map_err(CommandError::from),
                    (Err(err), _) | (_, Err(err)) => Err(err.into()),
                };
                self.respond(command, outcome)
            }
            Command::Display => {
                let length = address.and_then(|_| self.get_word());
                self.drain_line();
                self.send_prefix(device, command as u8, address.unwrap_or(UNRESOLVED));
                let outcome = both(address, length).map(|(high, low)| {
                    let [red, green] = high.to_be_bytes();
                    let [blue, white] = low.to_be_bytes();
                    sequencer.override_output(Levels::new(red, green, blue, white));
                    low
                });
                self.respond(command, outcome)
            }
        }
    }

    fn send_sequences<E, N, O>(&mut self, sequencer: &mut Sequencer<E, N, O>, start: u16, length: u16)
    where
        E: Storage,
        N: Storage,
        O: RgbwOutput,
    {
        let mut image = [0u8; MAX_WIRE_SEQUENCE];
        let mut ordinal = start;
        for _ in 0..length {
            let size = sequencer.sequences().copy_to_buffer(ordinal, &mut image);
            if size == 0 {
                break;
            }
            let stored = sequencer.sequences().sequence_len(ordinal).unwrap_or(size);
            if stored > size {
                warn!(
                    "sequence {=u16} cut to {=usize} of {=usize} bytes",
                    ordinal,
                    size,
                    stored
                );
            }
            // MAX_WIRE_SEQUENCE fits in a byte.
            self.send_byte(size as u8);
            for &byte in &image[..size] {
                self.send_byte(byte);
            }
            match ordinal.checked_add(1) {
                Some(next) => ordinal = next,
                None => break,
            }
        }
    }

    /// Sends the result word, or the error word for `command`. Returns true on success.
    fn respond(&mut self, command: Command, outcome: Result<u16, CommandError>) -> bool {
        match outcome {
            Ok(word) => {
                self.send_word(word);
                true
            }
            Err(err) => {
                warn!("command {} failed: {}", command, err);
                self.send_word(command.error_word());
                false
            }
        }
    }

    /// Waits up to [`TIMEOUT_MS`] for the next character.
    ///
    /// Seeing LF, or timing out, closes the current line.
    fn get_char(&mut self) -> Result<u8, FieldError> {
        let started = self.time_source.now();
        loop {
            if self.transport.char_ready() {
                if let Some(ch) = self.transport.read_char() {
                    if ch == LF {
                        self.line_closed = true;
                    }
                    return Ok(ch);
                }
            }
            let waited = self.time_source.now().duration_since(started);
            if waited.as_millis() >= TIMEOUT_MS {
                trace!("receive timeout");
                self.line_closed = true;
                return Err(FieldError::Timeout);
            }
        }
    }

    fn get_nibble(&mut self) -> Result<u8, FieldError> {
        let ch = self.get_char()?;
        from_hex(ch).ok_or(FieldError::Malformed)
    }

    fn get_byte(&mut self) -> Result<u8, FieldError> {
        let high = self.get_nibble()?;
        let low = self.get_nibble()?;
        Ok(high << 4 | low)
    }

    fn get_word(&mut self) -> Result<u16, FieldError> {
        let high = self.get_byte()?;
        let low = self.get_byte()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Reads hex pairs up to the end of the line and strips the checksum byte.
    fn read_payload(&mut self) -> Result<Vec<u8, MAX_PAYLOAD>, FieldError> {
        let mut bytes: Vec<u8, { MAX_PAYLOAD + 1 }> = Vec::new();
        let mut overflow = false;
        loop {
            let ch = self.get_char()?;
            match ch {
                CR => continue,
                LF => break,
                _ => {}
            }
            let high = from_hex(ch).ok_or(FieldError::Malformed)?;
            let low = self.get_nibble()?;
            if bytes.push(high << 4 | low).is_err() {
                overflow = true;
            }
        }
        if overflow {
            return Err(FieldError::Overflow);
        }

        // The last pair is the checksum.
        bytes.pop().ok_or(FieldError::Malformed)?;
        Vec::from_slice(&bytes).map_err(|_| FieldError::Overflow)
    }

    /// Skips the rest of the current line, including the checksum and CR LF.
    fn drain_line(&mut self) {
        while !self.line_closed {
            let _ = self.get_char();
        }
    }

    fn send_byte(&mut self, byte: u8) {
        self.transport.write(&to_hex(byte));
    }

    fn send_word(&mut self, word: u16) {
        let [high, low] = word.to_be_bytes();
        self.send_byte(high);
        self.send_byte(low);
    }

    fn send_value(&mut self, value: ReportValue) {
        match value {
            ReportValue::Byte(byte) => self.send_byte(byte),
            ReportValue::Word(word) => self.send_word(word),
        }
    }

    fn send_prefix(&mut self, device: u8, command: u8, address: u16) {
        self.transport.write(&[START]);
        self.send_byte(device);
        self.send_byte(command);
        self.send_word(address);
    }

    fn end_of_message(&mut self) {
        self.transport.write(b"00\r\n");
    }
}
