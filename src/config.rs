//! Persisted configuration block.
//!
//! The block sits at the start of the internal non-volatile area, ahead of
//! the macro table. Each [`Parameter`] is addressed on the wire by its byte
//! offset in the block.

use crate::macro_store::{END_MACRO, MACRO_TABLE_ADDRESS};
use crate::storage::Storage;
use crate::types::Ordinal;

/// Start-sequence value that selects macro playback.
pub const PLAY_MACROS: u16 = 0xFFFF;

/// Device address every controller answers to.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// A named configuration parameter, identified by its offset in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parameter {
    /// Night sensing on/off (1 byte).
    Enabled,
    /// Minutes to wait after dawn before switching off (1 byte).
    OffDelay,
    /// Minutes to wait after dusk before switching on (1 byte).
    OnDelay,
    /// Total on time in minutes (2 bytes).
    Duration,
    /// First sequence to play at power-up, or [`PLAY_MACROS`] (2 bytes).
    StartSequence,
    /// Number of sequences to play (2 bytes).
    TotalSequences,
    /// Protocol address (1 byte).
    DeviceAddress,
    /// Number of stored sequences. Report-only, not part of the block.
    DefinedSequences,
}

impl Parameter {
    /// Every parameter in report order.
    pub const ALL: [Parameter; 8] = [
        Parameter::Enabled,
        Parameter::OffDelay,
        Parameter::OnDelay,
        Parameter::Duration,
        Parameter::StartSequence,
        Parameter::TotalSequences,
        Parameter::DeviceAddress,
        Parameter::DefinedSequences,
    ];

    /// Offset of the parameter in the configuration block.
    pub const fn address(self) -> u16 {
        match self {
            Parameter::Enabled => 0,
            Parameter::OffDelay => 1,
            Parameter::OnDelay => 2,
            Parameter::Duration => 3,
            Parameter::StartSequence => 5,
            Parameter::TotalSequences => 7,
            Parameter::DeviceAddress => 9,
            Parameter::DefinedSequences => 10,
        }
    }

    /// Returns true for parameters reported as a word rather than a byte.
    pub const fn is_word(self) -> bool {
        matches!(
            self,
            Parameter::Duration
                | Parameter::StartSequence
                | Parameter::TotalSequences
                | Parameter::DefinedSequences
        )
    }
}

impl TryFrom<u16> for Parameter {
    type Error = ConfigError;

    fn try_from(address: u16) -> Result<Self, Self::Error> {
        Parameter::ALL
            .into_iter()
            .find(|parameter| parameter.address() == address)
            .ok_or(ConfigError::UnknownParameter(address))
    }
}

/// Errors returned by configuration updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No parameter lives at this address.
    UnknownParameter(u16),

    /// The parameter can be reported but not configured.
    ReadOnly(Parameter),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::UnknownParameter(address) => {
                write!(f, "no configuration parameter at address {:#06X}", address)
            }
            ConfigError::ReadOnly(parameter) => {
                write!(f, "parameter {:?} is read-only", parameter)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// In-memory copy of the configuration block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Night sensing enabled. When disabled the lights are always on.
    pub enabled: bool,
    /// Off delay in minutes.
    pub off_delay: u8,
    /// On delay in minutes.
    pub on_delay: u8,
    /// On time in minutes.
    pub duration: u16,
    /// First sequence to play, or [`PLAY_MACROS`].
    pub start_sequence: Ordinal,
    /// Number of sequences to play.
    pub total_sequences: u16,
    /// Protocol address.
    pub device_address: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            off_delay: 5,
            on_delay: 5,
            duration: 360,
            start_sequence: 0,
            total_sequences: 61,
            device_address: BROADCAST_ADDRESS,
        }
    }
}

impl Config {
    /// Reads the block from the internal area.
    pub fn load<N: Storage>(nv: &mut N) -> Self {
        Self {
            enabled: nv.read_byte(usize::from(Parameter::Enabled.address())) != 0,
            off_delay: nv.read_byte(usize::from(Parameter::OffDelay.address())),
            on_delay: nv.read_byte(usize::from(Parameter::OnDelay.address())),
            duration: nv.read_word(usize::from(Parameter::Duration.address())),
            start_sequence: nv.read_word(usize::from(Parameter::StartSequence.address())),
            total_sequences: nv.read_word(usize::from(Parameter::TotalSequences.address())),
            device_address: nv.read_byte(usize::from(Parameter::DeviceAddress.address())),
        }
    }

    /// Writes factory defaults and an empty macro table to the internal area.
    pub fn format<N: Storage>(nv: &mut N) -> Self {
        let config = Config::default();
        for parameter in Parameter::ALL {
            // DefinedSequences is the only parameter outside the block.
            let _ = config.persist(nv, parameter);
        }
        nv.write_word(MACRO_TABLE_ADDRESS, END_MACRO);
        info!("configuration reset to defaults");
        config
    }

    /// Returns the stored value of a block parameter.
    ///
    /// [`Parameter::DefinedSequences`] is not part of the block and reads as `None`.
    pub fn get(&self, parameter: Parameter) -> Option<u16> {
        let value = match parameter {
            Parameter::Enabled => u16::from(self.enabled),
            Parameter::OffDelay => u16::from(self.off_delay),
            Parameter::OnDelay => u16::from(self.on_delay),
            Parameter::Duration => self.duration,
            Parameter::StartSequence => self.start_sequence,
            Parameter::TotalSequences => self.total_sequences,
            Parameter::DeviceAddress => u16::from(self.device_address),
            Parameter::DefinedSequences => return None,
        };
        Some(value)
    }

    /// Updates a parameter and persists it. Byte parameters keep the low byte of `value`.
    pub fn set<N: Storage>(
        &mut self,
        nv: &mut N,
        parameter: Parameter,
        value: u16,
    ) -> Result<(), ConfigError> {
        let [_, low] = value.to_be_bytes();
        match parameter {
            Parameter::Enabled => self.enabled = value != 0,
            Parameter::OffDelay => self.off_delay = low,
            Parameter::OnDelay => self.on_delay = low,
            Parameter::Duration => self.duration = value,
            Parameter::StartSequence => self.start_sequence = value,
            Parameter::TotalSequences => self.total_sequences = value,
            Parameter::DeviceAddress => self.device_address = low,
            Parameter::DefinedSequences => return Err(ConfigError::ReadOnly(parameter)),
        }
        self.persist(nv, parameter)?;
        debug!("parameter {} set to {=u16}", parameter, value);
        Ok(())
    }

    fn persist<N: Storage>(&self, nv: &mut N, parameter: Parameter) -> Result<(), ConfigError> {
        let value = self.get(parameter).ok_or(ConfigError::ReadOnly(parameter))?;
        let address = usize::from(parameter.address());
        if parameter.is_word() {
            nv.write_word(address, value);
        } else {
            nv.write_byte(address, value.to_be_bytes()[1]);
        }
        Ok(())
    }
}
