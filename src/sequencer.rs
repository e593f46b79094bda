//! Playback control loop for a four-channel output.
//!
//! Provides [`Sequencer`], which owns the sequence store, the internal
//! configuration area, the macro table and the output, and plays stored
//! sequences one segment at a time. It is also the target the protocol
//! engine dispatches remote commands into. Defines the [`RgbwOutput`] trait
//! for the PWM hardware.

use heapless::Deque;

use crate::colors::{BLUE, GREEN, OFF, RED, WHITE};
use crate::config::{Config, ConfigError, PLAY_MACROS, Parameter};
use crate::macro_store::{END_MACRO, MAX_MACROS, MacroError, MacroStore};
use crate::sequence::{Lookup, SequenceStore, StoreError};
use crate::storage::Storage;
use crate::types::{Levels, Ordinal, SEGMENT_LEN, Segment};

/// Address value that asks the write command to start a new sequence.
pub const NEW_SEQUENCE: u16 = 0xFFFF;

/// Indicator steps that can be queued ahead of playback.
const INDICATOR_QUEUE_LEN: usize = 16;

/// Trait for abstracting the four-channel PWM output.
///
/// Fade times are in 10 ms units and hold times in 50 ms units.
pub trait RgbwOutput {
    /// Sets all four channels immediately.
    fn set(&mut self, levels: Levels);

    /// Fades from the current levels to `levels` over `fade`, then holds for `hold`.
    ///
    /// Returns immediately; [`is_busy`](Self::is_busy) reports completion.
    fn ramp(&mut self, levels: Levels, fade: u8, hold: u8);

    /// Returns true while a ramp is fading or holding.
    fn is_busy(&self) -> bool;
}

/// Debounced pushbutton events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    /// Button 1 pressed.
    NextPressed,
    /// Button 2 pressed.
    SelectPressed,
    /// Button 2 held down.
    SelectHeld,
}

/// What the sequencer is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    /// Playing stored sequences, or macros, in the configured range.
    Playing,
    /// Outputs are held by a remote override.
    Override,
    /// Recording macros from pushbutton input; `candidate` loops on the output.
    Defining {
        /// Sequence that would be recorded next.
        candidate: Ordinal,
    },
}

/// Result of one [`Sequencer::service`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceTiming {
    /// The output is still fading or holding. Service again later.
    Busy,
    /// A new step was handed to the output.
    Started,
    /// Nothing was started (override, daylight, or a sequence just ended).
    Idle,
}

/// Value of a reported parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportValue {
    /// Single byte parameter.
    Byte(u8),
    /// Word parameter.
    Word(u16),
}

/// Errors returned by remote control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlError {
    /// The payload does not have the expected shape.
    MalformedPayload,

    /// A sequence named by the command does not exist.
    SequenceNotFound(Ordinal),

    /// The sequence store rejected the operation.
    Store(StoreError),

    /// The macro table rejected the operation.
    Macro(MacroError),

    /// The configuration rejected the operation.
    Config(ConfigError),
}

impl core::fmt::Display for ControlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ControlError::MalformedPayload => write!(f, "malformed payload"),
            ControlError::SequenceNotFound(ordinal) => {
                write!(f, "sequence {} does not exist", ordinal)
            }
            ControlError::Store(err) => write!(f, "store error: {}", err),
            ControlError::Macro(err) => write!(f, "macro error: {}", err),
            ControlError::Config(err) => write!(f, "configuration error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ControlError {}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        ControlError::Store(err)
    }
}

impl From<MacroError> for ControlError {
    fn from(err: MacroError) -> Self {
        ControlError::Macro(err)
    }
}

impl From<ConfigError> for ControlError {
    fn from(err: ConfigError) -> Self {
        ControlError::Config(err)
    }
}

/// Controls a four-channel output from stored sequences.
///
/// Service it from the foreground loop; each call hands at most one step to
/// the output and never blocks on the fade.
///
/// # Type Parameters
/// * `E` - External device holding the sequence store
/// * `N` - Internal area holding the configuration block and macro table
/// * `O` - Output implementation
pub struct Sequencer<E: Storage, N: Storage, O: RgbwOutput> {
    store: SequenceStore<E>,
    nv: N,
    config: Config,
    macros: MacroStore,
    output: O,
    state: SequencerState,
    previous_start: Ordinal,
    play_macros: bool,
    active: Ordinal,
    min: Ordinal,
    max: Ordinal,
    next_segment: Option<(Ordinal, usize)>,
    dark: bool,
    indicators: Deque<Segment, INDICATOR_QUEUE_LEN>,
}

impl<E: Storage, N: Storage, O: RgbwOutput> Sequencer<E, N, O> {
    /// Opens both storage areas, turns the output off and selects the playback mode.
    pub fn new(external: E, mut nv: N, mut output: O) -> Self {
        output.set(OFF);
        let config = Config::load(&mut nv);
        let macros = MacroStore::load(&mut nv);

        let mut sequencer = Self {
            store: SequenceStore::new(external),
            nv,
            config,
            macros,
            output,
            state: SequencerState::Playing,
            previous_start: 0,
            play_macros: false,
            active: 0,
            min: 0,
            max: 0,
            next_segment: None,
            dark: false,
            indicators: Deque::new(),
        };
        sequencer.init_mode();
        sequencer
    }

    /// Selects playback from the start-sequence pointer.
    ///
    /// [`PLAY_MACROS`] plays the macro table from the top, or the stored
    /// sequences from 0 when the table is empty. Otherwise the run starts at
    /// the stored start sequence (or 0 if it no longer exists) and covers at
    /// most the configured total, clamped to the stored sequences.
    pub fn init_mode(&mut self) {
        let start = self.config.start_sequence;
        let use_macros = start == PLAY_MACROS && !self.macros.is_empty();
        if start == PLAY_MACROS && !use_macros {
            warn!("macro playback selected with an empty table");
        }
        if use_macros {
            self.play_macros = true;
            self.active = 0;
            self.max = self.macros.count().saturating_sub(1);
        } else {
            self.play_macros = false;
            let stored = self.store.count();
            let limit = self.config.total_sequences;
            let found = matches!(self.store.find(start), Lookup::Found(_));
            self.active = if found && limit != 0 { start } else { 0 };
            let total = stored.min(limit);
            self.max = self
                .active
                .saturating_add(total.saturating_sub(1))
                .min(stored.saturating_sub(1));
        }
        self.min = self.active;
        self.next_segment = None;
        info!(
            "playback {=u16}..={=u16}, macros: {=bool}",
            self.min,
            self.max,
            self.play_macros
        );
    }

    /// Advances playback by at most one step.
    ///
    /// `is_night` comes from the day/night sensor; it is ignored while night
    /// sensing is disabled, in which case the lights are always on.
    pub fn service(&mut self, is_night: bool) -> ServiceTiming {
        if self.output.is_busy() {
            return ServiceTiming::Busy;
        }

        if let Some(step) = self.indicators.pop_front() {
            self.output.ramp(step.levels, step.fade, step.hold);
            return ServiceTiming::Started;
        }

        match self.state {
            SequencerState::Override => ServiceTiming::Idle,
            SequencerState::Defining { candidate } => self.play_step(candidate),
            SequencerState::Playing => {
                if self.config.enabled && !is_night {
                    if !self.dark {
                        self.output.ramp(OFF, 1, 0);
                        self.dark = true;
                        self.next_segment = None;
                        return ServiceTiming::Started;
                    }
                    return ServiceTiming::Idle;
                }
                self.dark = false;
                let ordinal = self.playing_ordinal();
                self.play_step(ordinal)
            }
        }
    }

    /// Sequence that `active` refers to, through the macro table when playing macros.
    fn playing_ordinal(&mut self) -> Ordinal {
        if self.play_macros {
            self.macros.read(&mut self.nv, self.active)
        } else {
            self.active
        }
    }

    fn play_step(&mut self, ordinal: Ordinal) -> ServiceTiming {
        let index = match self.next_segment {
            Some((playing, index)) if playing == ordinal => index,
            _ => 0,
        };

        match self.store.segment(ordinal, index) {
            Some(segment) => {
                trace!("sequence {=u16} segment {=usize}", ordinal, index);
                self.output.ramp(segment.levels, segment.fade, segment.hold);
                self.next_segment = Some((ordinal, index + 1));
                ServiceTiming::Started
            }
            None => {
                if index == 0 {
                    warn!("sequence {=u16} not found", ordinal);
                    self.indicate_error();
                }
                self.next_segment = None;
                self.sequence_finished();
                ServiceTiming::Idle
            }
        }
    }

    fn sequence_finished(&mut self) {
        if self.state == SequencerState::Playing {
            self.active = if self.active < self.max {
                self.active + 1
            } else {
                self.min
            };
        }
    }

    /// Handles a debounced pushbutton event.
    ///
    /// Any event aborts the segment being played. While playing, button 2
    /// enters macro definition. While defining, button 1 cycles the
    /// candidate, button 2 records it and holding button 2 finishes.
    pub fn handle_button(&mut self, event: ButtonEvent) {
        self.output.set(OFF);
        self.next_segment = None;

        match self.state {
            SequencerState::Playing | SequencerState::Override => {
                self.sequence_finished();
                if event == ButtonEvent::SelectPressed {
                    self.begin_definition();
                }
            }
            SequencerState::Defining { candidate } => match event {
                ButtonEvent::NextPressed => {
                    let next = candidate.saturating_add(1);
                    let candidate = if next >= self.store.count() { 0 } else { next };
                    self.state = SequencerState::Defining { candidate };
                }
                ButtonEvent::SelectPressed => match self.macros.add(&mut self.nv, candidate) {
                    Ok(()) => {
                        debug!("macro {=u16} -> sequence {=u16}", self.macros.count(), candidate);
                        self.indicate_confirm();
                    }
                    Err(_) => self.indicate_error(),
                },
                ButtonEvent::SelectHeld => self.finish_definition(),
            },
        }
    }

    fn begin_definition(&mut self) {
        info!("macro definition started");
        self.indicate_confirm();
        self.previous_start = match self.config.start_sequence {
            PLAY_MACROS => 0,
            start => start,
        };
        self.state = SequencerState::Defining { candidate: 0 };
    }

    fn finish_definition(&mut self) {
        let start = if self.macros.is_empty() {
            self.previous_start
        } else {
            PLAY_MACROS
        };
        if self
            .config
            .set(&mut self.nv, Parameter::StartSequence, start)
            .is_err()
        {
            self.indicate_error();
        }
        info!("macro definition finished, {=u16} macros", self.macros.count());
        self.indicate_confirm();
        self.indicate_confirm();
        self.state = SequencerState::Playing;
        self.init_mode();
    }

    fn indicate(&mut self, steps: &[Segment]) {
        for step in steps {
            // A full queue drops the indication; playback is unaffected.
            let _ = self.indicators.push_back(*step);
        }
    }

    /// Queues a short blue confirmation flash.
    pub fn indicate_confirm(&mut self) {
        self.indicate(&[Segment::new(0, 10, BLUE), Segment::new(0, 5, OFF)]);
    }

    /// Queues a long red error flash.
    pub fn indicate_error(&mut self) {
        self.indicate(&[Segment::new(0, 40, RED), Segment::new(0, 5, OFF)]);
    }

    /// Queues `version` blue flashes followed by a channel test.
    pub fn show_version(&mut self, version: u8) {
        for _ in 0..version {
            self.indicate(&[Segment::new(0, 5, BLUE), Segment::new(0, 20, OFF)]);
        }
        self.indicate(&[
            Segment::new(0, 5, RED),
            Segment::new(0, 5, WHITE),
            Segment::new(0, 5, GREEN),
            Segment::new(0, 5, BLUE),
            Segment::new(0, 5, OFF),
        ]);
    }

    /// Appends `(fade, hold, R, G, B, W)` tuples from `payload` to sequence `address`.
    ///
    /// [`NEW_SEQUENCE`] starts a new sequence; later tuples extend it. Returns
    /// the number of bytes consumed.
    pub fn write_segments(&mut self, address: u16, payload: &[u8]) -> Result<u16, ControlError> {
        if payload.is_empty() || payload.len() % SEGMENT_LEN != 0 {
            return Err(ControlError::MalformedPayload);
        }
        let len = u16::try_from(payload.len()).map_err(|_| ControlError::MalformedPayload)?;
        let target = if address == NEW_SEQUENCE {
            Ordinal::MAX
        } else {
            address
        };
        self.store.append_all(target, Segment::parse_all(payload))?;
        Ok(len)
    }

    /// Plays sequences `start..start + length` from now on and persists the range.
    pub fn run_range(&mut self, start: Ordinal, length: u16) -> Result<u16, ControlError> {
        let end = length
            .checked_sub(1)
            .and_then(|span| start.checked_add(span))
            .ok_or(ControlError::SequenceNotFound(start))?;
        for ordinal in [start, end] {
            if !matches!(self.store.find(ordinal), Lookup::Found(_)) {
                return Err(ControlError::SequenceNotFound(ordinal));
            }
        }

        self.config.set(&mut self.nv, Parameter::StartSequence, start)?;
        self.config.set(&mut self.nv, Parameter::TotalSequences, length)?;
        self.play_macros = false;
        self.min = start;
        self.max = end;
        self.active = start;
        self.next_segment = None;
        self.state = SequencerState::Playing;
        Ok(length)
    }

    /// Deletes sequences `start..=end`.
    pub fn erase_range(&mut self, start: Ordinal, end: Ordinal) -> Result<u16, ControlError> {
        self.store.delete_range(start, end)?;
        self.next_segment = None;
        Ok(end)
    }

    /// Updates the parameter at `address` and returns the new value.
    pub fn configure(&mut self, address: u16, value: u16) -> Result<u16, ControlError> {
        let parameter = Parameter::try_from(address)?;
        self.config.set(&mut self.nv, parameter, value)?;
        Ok(value)
    }

    /// Current value of `parameter`.
    pub fn report(&mut self, parameter: Parameter) -> ReportValue {
        match self.config.get(parameter) {
            Some(value) if parameter.is_word() => ReportValue::Word(value),
            Some(value) => ReportValue::Byte(value.to_be_bytes()[1]),
            None => ReportValue::Word(self.store.count()),
        }
    }

    /// Stores the big-endian words in `payload` as macros and switches to macro playback.
    ///
    /// Address 0 replaces the table, [`END_MACRO`] appends to it. Returns the
    /// number of bytes consumed. Replacing with an empty payload is rejected
    /// and leaves the table untouched.
    pub fn write_macros(&mut self, address: u16, payload: &[u8]) -> Result<u16, ControlError> {
        if payload.len() % 2 != 0 || (address == 0 && payload.is_empty()) {
            return Err(ControlError::MalformedPayload);
        }
        let len = u16::try_from(payload.len()).map_err(|_| ControlError::MalformedPayload)?;
        let base = match address {
            0 => 0,
            END_MACRO => self.macros.count(),
            _ => return Err(ControlError::MalformedPayload),
        };
        if usize::from(base) + payload.len() / 2 > usize::from(MAX_MACROS) {
            return Err(MacroError::CapacityExceeded.into());
        }

        let words = || {
            payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        };
        if words().any(|word| word == END_MACRO) {
            return Err(MacroError::ReservedValue.into());
        }

        if address == 0 {
            self.macros.clear(&mut self.nv);
        }
        for word in words() {
            self.macros.add(&mut self.nv, word)?;
        }

        if !payload.is_empty() {
            self.config.set(&mut self.nv, Parameter::StartSequence, PLAY_MACROS)?;
            self.state = SequencerState::Playing;
            self.init_mode();
        }
        Ok(len)
    }

    /// Number of macros.
    pub fn macro_count(&self) -> u16 {
        self.macros.count()
    }

    /// Sequence referenced by macro `index`, or [`END_MACRO`].
    pub fn read_macro(&mut self, index: u16) -> Ordinal {
        self.macros.read(&mut self.nv, index)
    }

    /// Holds the outputs at `levels` until a run command resumes playback.
    pub fn override_output(&mut self, levels: Levels) {
        self.output.set(levels);
        self.next_segment = None;
        self.state = SequencerState::Override;
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Sequence currently selected for playback (a macro index when playing macros).
    pub fn active(&self) -> Ordinal {
        self.active
    }

    /// First and last entries of the playback range.
    pub fn range(&self) -> (Ordinal, Ordinal) {
        (self.min, self.max)
    }

    /// Returns true when playback walks the macro table.
    pub fn is_playing_macros(&self) -> bool {
        self.play_macros
    }

    /// Current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The sequence store.
    pub fn sequences(&mut self) -> &mut SequenceStore<E> {
        &mut self.store
    }

    /// The output.
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Mutable access to the output.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// The internal configuration area.
    pub fn nv(&self) -> &N {
        &self.nv
    }
}
