//! Macro table: a short list of sequence ordinals kept in the internal area.
//!
//! Macros let an operator curate and reorder playback without moving any
//! sequence data. The table is a run of big-endian words starting at
//! [`MACRO_TABLE_ADDRESS`], terminated by [`END_MACRO`].

use crate::storage::Storage;
use crate::types::Ordinal;

/// Offset of the macro table in the internal area.
pub const MACRO_TABLE_ADDRESS: usize = 0x10;

/// Maximum number of macros.
pub const MAX_MACROS: u16 = 100;

/// Terminator word, also returned when reading past the last macro.
pub const END_MACRO: u16 = 0xFFFF;

/// Errors returned by macro table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacroError {
    /// The table already holds [`MAX_MACROS`] entries.
    CapacityExceeded,

    /// The value collides with the table terminator.
    ReservedValue,
}

impl core::fmt::Display for MacroError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MacroError::CapacityExceeded => {
                write!(f, "macro table is full ({} entries)", MAX_MACROS)
            }
            MacroError::ReservedValue => {
                write!(f, "0xFFFF is reserved as the macro table terminator")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MacroError {}

fn slot(index: u16) -> usize {
    MACRO_TABLE_ADDRESS + usize::from(index) * 2
}

/// Cached view of the macro table.
///
/// The entry count is derived once by [`load`](Self::load) and then kept up
/// to date by this type; macros are only ever appended or cleared, never
/// shifted, so the cached count cannot go stale. The table itself lives in
/// the internal area, which is passed to each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroStore {
    count: u16,
}

impl MacroStore {
    /// Counts the macros stored in `nv`.
    pub fn load<N: Storage>(nv: &mut N) -> Self {
        let mut count = 0;
        while count < MAX_MACROS && nv.read_word(slot(count)) != END_MACRO {
            count += 1;
        }
        debug!("{=u16} macros defined", count);
        Self { count }
    }

    /// Number of macros.
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Returns true if no macros are defined.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a macro pointing at `sequence` and rewrites the terminator after it.
    pub fn add<N: Storage>(&mut self, nv: &mut N, sequence: Ordinal) -> Result<(), MacroError> {
        if sequence == END_MACRO {
            return Err(MacroError::ReservedValue);
        }
        if self.count >= MAX_MACROS {
            return Err(MacroError::CapacityExceeded);
        }
        nv.write_word(slot(self.count), sequence);
        nv.write_word(slot(self.count + 1), END_MACRO);
        self.count += 1;
        Ok(())
    }

    /// Returns the ordinal stored in macro `index`, or [`END_MACRO`] past the end.
    pub fn read<N: Storage>(&self, nv: &mut N, index: u16) -> Ordinal {
        if index < self.count {
            nv.read_word(slot(index))
        } else {
            END_MACRO
        }
    }

    /// Empties the table.
    pub fn clear<N: Storage>(&mut self, nv: &mut N) {
        nv.write_word(MACRO_TABLE_ADDRESS, END_MACRO);
        self.count = 0;
    }
}
