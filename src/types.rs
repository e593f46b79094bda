//! Core record types shared by the store, the protocol and the player.

use palette::Srgb;

/// Byte value marking the end of a sequence. Two in a row mark the end of the store.
pub const SENTINEL: u8 = 0xFF;

/// Size of one stored [`Segment`] in bytes.
pub const SEGMENT_LEN: usize = 6;

/// Zero-based position of a sequence in physical scan order.
pub type Ordinal = u16;

/// Intensities for the four output channels.
///
/// The red, green and blue channels are carried as an 8-bit `Srgb` so the
/// colour can be handed to `palette` directly; white travels alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    /// Red, green and blue intensities.
    pub color: Srgb<u8>,

    /// White channel intensity.
    pub white: u8,
}

impl Levels {
    /// Creates levels from the four raw channel values.
    #[inline]
    pub const fn new(red: u8, green: u8, blue: u8, white: u8) -> Self {
        Self {
            color: Srgb::new(red, green, blue),
            white,
        }
    }

    /// Returns the intensity of `channel` (0 = red, 1 = green, 2 = blue, 3 = white).
    ///
    /// Channels above 3 read as zero.
    pub fn channel(&self, channel: usize) -> u8 {
        match channel {
            0 => self.color.red,
            1 => self.color.green,
            2 => self.color.blue,
            3 => self.white,
            _ => 0,
        }
    }

    /// Returns the channels in wire order `[R, G, B, W]`.
    pub fn to_array(&self) -> [u8; 4] {
        [self.color.red, self.color.green, self.color.blue, self.white]
    }
}

impl From<[u8; 4]> for Levels {
    fn from(rgbw: [u8; 4]) -> Self {
        Levels::new(rgbw[0], rgbw[1], rgbw[2], rgbw[3])
    }
}

/// One fade/hold step of a lighting sequence.
///
/// Stored as six bytes: fade, hold, R, G, B, W. A fade of 255 collides with
/// [`SENTINEL`] and can never be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Fade rate, in 10 ms units. Valid range is 0-254.
    pub fade: u8,

    /// Hold time, in 50 ms units.
    pub hold: u8,

    /// Target intensities.
    pub levels: Levels,
}

impl Segment {
    /// Creates a new segment.
    #[inline]
    pub const fn new(fade: u8, hold: u8, levels: Levels) -> Self {
        Self { fade, hold, levels }
    }

    /// Decodes a segment from its stored form.
    pub fn from_bytes(bytes: &[u8; SEGMENT_LEN]) -> Self {
        Self {
            fade: bytes[0],
            hold: bytes[1],
            levels: Levels::new(bytes[2], bytes[3], bytes[4], bytes[5]),
        }
    }

    /// Encodes the segment in its stored form.
    pub fn to_bytes(&self) -> [u8; SEGMENT_LEN] {
        let [r, g, b, w] = self.levels.to_array();
        [self.fade, self.hold, r, g, b, w]
    }

    /// Iterates over the whole segments in a raw sequence image.
    ///
    /// Trailing bytes that do not fill a segment are ignored.
    pub fn parse_all(bytes: &[u8]) -> impl Iterator<Item = Segment> + '_ {
        bytes.chunks_exact(SEGMENT_LEN).map(|chunk| {
            let mut raw = [0u8; SEGMENT_LEN];
            raw.copy_from_slice(chunk);
            Segment::from_bytes(&raw)
        })
    }
}
