//! Shared test infrastructure for rgbw-sequencer integration tests

#![allow(dead_code)] // Items used across multiple test files; Rust analyzes per-file

use std::collections::VecDeque;

use rgbw_sequencer::{
    Config, Levels, RgbwOutput, Segment, Sequencer, Storage, TimeDuration, TimeInstant,
    TimeSource, Transport,
};

// ============================================================================
// Mock Time Types
// ============================================================================

/// Mock duration type for testing (wraps milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestDuration(pub u64);

impl TimeDuration for TestDuration {
    fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Mock instant type for testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestInstant(pub u64);

impl TimeInstant for TestInstant {
    type Duration = TestDuration;

    fn duration_since(&self, earlier: Self) -> Self::Duration {
        TestDuration(self.0 - earlier.0)
    }
}

// ============================================================================
// Mock Time Source
// ============================================================================

/// Mock time source that moves forward by one millisecond on every read,
/// so a receive timeout expires after a bounded number of polls.
pub struct MockTimeSource {
    current_time: core::cell::Cell<TestInstant>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self {
            current_time: core::cell::Cell::new(TestInstant(0)),
        }
    }

    pub fn elapsed(&self) -> u64 {
        self.current_time.get().0
    }
}

impl TimeSource<TestInstant> for MockTimeSource {
    fn now(&self) -> TestInstant {
        let current = self.current_time.get();
        self.current_time.set(TestInstant(current.0 + 1));
        current
    }
}

// ============================================================================
// Mock Storage
// ============================================================================

/// RAM-backed storage with a page size and a log of every write.
pub struct MockStorage {
    pub data: Vec<u8>,
    pub page_size: usize,
    pub present: bool,
    pub writes: Vec<(usize, usize)>,
}

impl MockStorage {
    /// Erased device (all 0xFF) of `capacity` bytes.
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            data: vec![0xFF; capacity],
            page_size,
            present: true,
            writes: Vec::new(),
        }
    }

    /// Device that fails the presence check.
    pub fn absent(capacity: usize) -> Self {
        Self {
            present: false,
            ..Self::new(capacity, 64)
        }
    }

    /// Formatted internal area with factory defaults.
    pub fn internal() -> Self {
        let mut nv = Self::new(256, 16);
        Config::format(&mut nv);
        nv.writes.clear();
        nv
    }

    /// Returns true if any logged write crossed a page boundary.
    pub fn crossed_page(&self) -> bool {
        self.writes
            .iter()
            .any(|&(address, len)| len > 0 && address / self.page_size != (address + len - 1) / self.page_size)
    }
}

impl Storage for MockStorage {
    fn read(&mut self, address: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data[address..address + buf.len()]);
    }

    fn write(&mut self, address: usize, data: &[u8]) {
        self.writes.push((address, data.len()));
        self.data[address..address + data.len()].copy_from_slice(data);
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn present(&mut self) -> bool {
        self.present
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// Transport fed from a script of received bytes that records everything sent.
pub struct ScriptedTransport {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub flushes: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
            flushes: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        self.input.extend(line.bytes());
    }

    /// Takes everything sent so far as a string.
    pub fn take_output(&mut self) -> String {
        String::from_utf8(std::mem::take(&mut self.output)).expect("replies are ASCII")
    }
}

impl Transport for ScriptedTransport {
    fn char_ready(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn read_char(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

// ============================================================================
// Mock Output
// ============================================================================

/// A recorded output call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCall {
    Set(Levels),
    Ramp(Segment),
}

/// Output that records every call. `busy` is controlled by the test.
pub struct MockOutput {
    pub calls: Vec<OutputCall>,
    pub busy: bool,
}

impl MockOutput {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            busy: false,
        }
    }

    /// The ramps issued so far, as segments.
    pub fn ramps(&self) -> Vec<Segment> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                OutputCall::Ramp(segment) => Some(*segment),
                OutputCall::Set(_) => None,
            })
            .collect()
    }

    pub fn last_set(&self) -> Option<Levels> {
        self.calls.iter().rev().find_map(|call| match call {
            OutputCall::Set(levels) => Some(*levels),
            OutputCall::Ramp(_) => None,
        })
    }
}

impl RgbwOutput for MockOutput {
    fn set(&mut self, levels: Levels) {
        self.calls.push(OutputCall::Set(levels));
    }

    fn ramp(&mut self, levels: Levels, fade: u8, hold: u8) {
        self.calls.push(OutputCall::Ramp(Segment::new(fade, hold, levels)));
    }

    fn is_busy(&self) -> bool {
        self.busy
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub type TestSequencer = Sequencer<MockStorage, MockStorage, MockOutput>;

/// Segment with the given timing and a single level on every channel.
pub fn seg(fade: u8, hold: u8, r: u8, g: u8, b: u8, w: u8) -> Segment {
    Segment::new(fade, hold, Levels::new(r, g, b, w))
}

/// External device of 1 KiB with 32-byte pages.
pub fn external() -> MockStorage {
    MockStorage::new(1024, 32)
}

/// Sequencer over a fresh external device, a formatted internal area and a
/// recording output, with `sequences` written to the store first.
pub fn sequencer_with(sequences: &[&[Segment]]) -> TestSequencer {
    let mut sequencer = Sequencer::new(external(), MockStorage::internal(), MockOutput::new());
    for sequence in sequences {
        let mut target = u16::MAX;
        for segment in *sequence {
            target = sequencer
                .sequences()
                .append_to(target, *segment)
                .expect("append fits");
        }
    }
    sequencer.init_mode();
    sequencer
}
