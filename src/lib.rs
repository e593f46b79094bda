#![cfg_attr(not(feature = "std"), no_std)]
#![doc = include_str!("../README.md")]

//! # Core Concepts
//!
//! - **`SequenceStore`**: Packed, sentinel-terminated list of lighting sequences on a byte-addressable device
//! - **`Segment`**: One stored step: fade rate, hold time and four channel levels
//! - **`Levels`**: Red, green, blue (as `Srgb<u8>`) and white intensities
//! - **`MacroStore`**: Ordered list of sequence ordinals played in place of a plain range
//! - **`Config`**: Persisted configuration block addressed by `Parameter`
//! - **`Sequencer`**: Plays sequences on an `RgbwOutput` and executes remote operations
//! - **`SbusEngine`**: Parses SBUS requests from a `Transport` and writes the replies
//! - **`Storage`**: Trait to implement for your EEPROM/FRAM driver
//! - **`RgbwOutput`**: Trait to implement for your PWM hardware
//! - **`TimeSource`**: Trait to implement for your timing system
//!
//! Sequences are addressed by ordinal, their position in physical scan
//! order. Erasing a sequence renumbers every sequence after it.

// Must stay first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub use palette::Srgb;

pub mod colors;
pub mod command;
pub mod config;
pub mod macro_store;
pub mod protocol;
pub mod sequence;
pub mod sequencer;
pub mod storage;
pub mod time;
pub mod transport;
pub mod types;

pub use command::Command;
pub use config::{BROADCAST_ADDRESS, Config, ConfigError, PLAY_MACROS, Parameter};
pub use macro_store::{END_MACRO, MAX_MACROS, MacroError, MacroStore};
pub use protocol::{CommandError, FieldError, Poll, SbusEngine};
pub use sequence::{Lookup, SequenceStore, StoreError};
pub use sequencer::{
    ButtonEvent, ControlError, ReportValue, RgbwOutput, Sequencer, SequencerState, ServiceTiming,
};
pub use storage::Storage;
pub use time::{TimeDuration, TimeInstant, TimeSource};
pub use transport::{RxQueue, SerialPort, SerialTx, Transport};
pub use types::{Levels, Ordinal, SEGMENT_LEN, SENTINEL, Segment};
