//! Fixed output levels used for status indication.

use crate::types::Levels;

/// All channels off.
pub const OFF: Levels = Levels::new(0, 0, 0, 0);

/// Full red.
pub const RED: Levels = Levels::new(255, 0, 0, 0);

/// Full green.
pub const GREEN: Levels = Levels::new(0, 255, 0, 0);

/// Full blue.
pub const BLUE: Levels = Levels::new(0, 0, 255, 0);

/// Full white channel.
pub const WHITE: Levels = Levels::new(0, 0, 0, 255);
