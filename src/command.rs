//! SBUS command codes.

/// Pattern OR'd into the command code to form an error reply word.
pub const ERROR_FLAG: u16 = 0xEF00;

/// Commands understood by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Read `length` sequences starting at `address`.
    ReadSequences = 0x10,
    /// Append segment tuples to sequence `address`.
    WriteSequences = 0x20,
    /// Play `length` sequences starting at `address`.
    RunSequences = 0x30,
    /// Erase sequences `address..=length`.
    EraseSequences = 0x40,
    /// Set the parameter at `address`.
    Configure = 0x50,
    /// Report the parameter at `address`, or all of them.
    Report = 0x60,
    /// Read macros.
    ReadMacros = 0x70,
    /// Write macros.
    WriteMacros = 0x80,
    /// Drive the outputs directly from the address and length words.
    Display = 0x90,
}

impl Command {
    /// The reply word sent when this command fails.
    pub const fn error_word(self) -> u16 {
        ERROR_FLAG | self as u16
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x10 => Command::ReadSequences,
            0x20 => Command::WriteSequences,
            0x30 => Command::RunSequences,
            0x40 => Command::EraseSequences,
            0x50 => Command::Configure,
            0x60 => Command::Report,
            0x70 => Command::ReadMacros,
            0x80 => Command::WriteMacros,
            0x90 => Command::Display,
            other => return Err(other),
        })
    }
}
