//! Packed, sentinel-delimited sequence store.
//!
//! Sequences are laid out back to back from address 0, each one a run of
//! six-byte [`Segment`]s followed by a single [`SENTINEL`] byte. A second
//! sentinel directly after the last sequence terminates the store. There is
//! no index: an ordinal is resolved by walking the store from address 0.
//!
//! ```text
//!  seq 0                 seq 1
//! [f h r g b w][f h r g b w] FF [f h r g b w] FF FF
//! ```
//!
//! The last two bytes of the device hold a magic marker used to detect a
//! device that has never been formatted.

use crate::storage::{Storage, write_paged};
use crate::types::{Ordinal, SEGMENT_LEN, SENTINEL, Segment};

/// Marker stored in the last two bytes of an initialized device.
pub const MAGIC: [u8; 2] = [0x55, 0xAA];

/// Appends are refused once the used area comes within this many bytes of capacity.
pub const SAFETY_MARGIN: usize = 256;

/// Largest staging buffer used when shifting bytes.
const STAGING_LEN: usize = 64;

/// Result of resolving an ordinal to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lookup {
    /// The sequence exists and starts at this address.
    Found(usize),

    /// The ordinal lies beyond the last stored sequence.
    AtLastSequence,

    /// The store is empty.
    NoSequences,
}

/// Errors returned by mutating store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The device failed its presence check at startup.
    DeviceAbsent,

    /// The store is within [`SAFETY_MARGIN`] bytes of the device capacity.
    CapacityExceeded,

    /// A fade of 255 collides with the end-of-sequence marker.
    ReservedFade,

    /// The end of a range lies before its start.
    InvalidRange,

    /// The first sequence of a range does not exist.
    NotFound,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::DeviceAbsent => write!(f, "storage device not present"),
            StoreError::CapacityExceeded => write!(f, "sequence store is full"),
            StoreError::ReservedFade => {
                write!(f, "fade rate 255 is reserved as the end-of-sequence marker")
            }
            StoreError::InvalidRange => write!(f, "range end lies before range start"),
            StoreError::NotFound => write!(f, "sequence does not exist"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

/// Position of the last real sequence, recorded by [`SequenceStore::find`].
#[derive(Debug, Clone, Copy, Default)]
struct LastSequence {
    ordinal: Ordinal,
    address: usize,
}

/// Variable-length sequence records kept in a byte-addressable device.
///
/// Besides lookups and mutations the store keeps an "active" cursor that
/// points at one segment of one sequence, used by playback through
/// [`advance`](Self::advance) and the `current_*` accessors.
pub struct SequenceStore<S: Storage> {
    device: S,
    present: bool,
    active_ordinal: Ordinal,
    active_address: usize,
    last: LastSequence,
}

impl<S: Storage> SequenceStore<S> {
    /// Opens the store on `device`.
    ///
    /// Checks that the device responds and that the magic marker is set. A
    /// device without the marker is reset to an empty store and marked. A
    /// device that fails the check is never written; every mutating
    /// operation then returns [`StoreError::DeviceAbsent`].
    pub fn new(mut device: S) -> Self {
        let present = device.present() && device.capacity() > MAGIC.len();
        let mut store = Self {
            device,
            present,
            active_ordinal: 0,
            active_address: 0,
            last: LastSequence::default(),
        };

        if !store.present {
            warn!("sequence storage not present");
            return store;
        }

        let magic_address = store.limit();
        let mut magic = [0u8; 2];
        store.device.read(magic_address, &mut magic);
        if magic != MAGIC {
            info!("sequence storage unformatted, resetting");
            store.write_terminator(0);
            write_paged(&mut store.device, magic_address, &MAGIC);
        }
        store
    }

    /// Returns true if the device passed the presence check at startup.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Releases the underlying device.
    pub fn into_inner(self) -> S {
        self.device
    }

    /// First address past the usable area; the magic marker lives here.
    fn limit(&self) -> usize {
        self.device.capacity().saturating_sub(MAGIC.len())
    }

    /// Reads a byte of the store. Anything outside the usable area reads as a sentinel.
    fn byte_at(&mut self, address: usize) -> u8 {
        if !self.present || address >= self.limit() {
            return SENTINEL;
        }
        self.device.read_byte(address)
    }

    /// Walks from a sequence's first segment to its terminating sentinel.
    ///
    /// A sequence missing its terminator ends at the usable limit.
    fn skip_to_end(&mut self, mut address: usize) -> usize {
        let limit = self.limit();
        while address < limit && self.byte_at(address) != SENTINEL {
            address += SEGMENT_LEN;
        }
        address.min(limit)
    }

    /// Writes the canonical empty-store marker at `address`.
    fn write_terminator(&mut self, address: usize) {
        write_paged(&mut self.device, address, &[SENTINEL, SENTINEL]);
    }

    /// Resolves `ordinal` by walking the store from address 0.
    ///
    /// On [`Lookup::Found`] the sequence becomes active. On
    /// [`Lookup::AtLastSequence`] the position of the last real sequence is
    /// recorded for use by [`append_to`](Self::append_to).
    pub fn find(&mut self, ordinal: Ordinal) -> Lookup {
        if self.byte_at(0) == SENTINEL {
            self.last = LastSequence::default();
            return Lookup::NoSequences;
        }

        let mut address = 0;
        for seq in 0..ordinal {
            let end = self.skip_to_end(address);
            if self.byte_at(end + 1) == SENTINEL {
                self.last = LastSequence {
                    ordinal: seq,
                    address,
                };
                return Lookup::AtLastSequence;
            }
            address = end + 1;
        }

        self.active_ordinal = ordinal;
        self.active_address = address;
        Lookup::Found(address)
    }

    /// Copies the segments of `ordinal` (without its terminator) into `out`.
    ///
    /// Returns the number of bytes copied, 0 if the sequence does not exist.
    /// A sequence longer than `out` is cut at the last whole segment that fits.
    pub fn copy_to_buffer(&mut self, ordinal: Ordinal, out: &mut [u8]) -> usize {
        let Lookup::Found(start) = self.find(ordinal) else {
            return 0;
        };
        let end = self.skip_to_end(start);
        let len = (end - start).min(out.len());
        let len = len - len % SEGMENT_LEN;
        self.device.read(start, &mut out[..len]);
        len
    }

    /// Size in bytes of sequence `ordinal` without its terminator, if it exists.
    pub fn sequence_len(&mut self, ordinal: Ordinal) -> Option<usize> {
        let Lookup::Found(start) = self.find(ordinal) else {
            return None;
        };
        let end = self.skip_to_end(start);
        Some(end - start)
    }

    /// Returns the most recently located sequence.
    pub fn active_ordinal(&self) -> Ordinal {
        self.active_ordinal
    }

    /// Moves the active cursor to the next segment.
    ///
    /// At the end of the active sequence the cursor either rewinds to the
    /// start of the same sequence (`repeat`) or moves on to the next one.
    /// Returns false only when there is no next sequence.
    pub fn advance(&mut self, repeat: bool) -> bool {
        let next = self.active_address + SEGMENT_LEN;
        if self.byte_at(next) != SENTINEL {
            self.active_address = next;
            return true;
        }

        if repeat {
            self.find(self.active_ordinal);
        } else {
            if self.byte_at(next + 1) == SENTINEL {
                return false;
            }
            self.active_address = next + 1;
            self.active_ordinal = self.active_ordinal.wrapping_add(1);
        }
        true
    }

    /// Intensity of `channel` (0-3: R, G, B, W) in the segment under the cursor.
    pub fn current_intensity(&mut self, channel: usize) -> u8 {
        self.byte_at(self.active_address + 2 + channel.min(3))
    }

    /// Hold time of the segment under the cursor.
    pub fn current_hold(&mut self) -> u8 {
        self.byte_at(self.active_address + 1)
    }

    /// Fade rate of the segment under the cursor.
    pub fn current_fade(&mut self) -> u8 {
        self.byte_at(self.active_address)
    }

    /// The whole segment under the cursor.
    pub fn current_segment(&mut self) -> Segment {
        let levels = [0, 1, 2, 3].map(|ch| self.current_intensity(ch));
        Segment::new(self.current_fade(), self.current_hold(), levels.into())
    }

    /// Returns segment `index` of sequence `ordinal`, leaving it under the cursor.
    pub fn segment(&mut self, ordinal: Ordinal, index: usize) -> Option<Segment> {
        if !matches!(self.find(ordinal), Lookup::Found(_)) {
            return None;
        }
        for _ in 0..index {
            if !self.advance(false) || self.active_ordinal != ordinal {
                return None;
            }
        }
        Some(self.current_segment())
    }

    /// Number of stored sequences.
    pub fn count(&mut self) -> Ordinal {
        match self.find(Ordinal::MAX) {
            Lookup::NoSequences => 0,
            Lookup::Found(_) => Ordinal::MAX,
            Lookup::AtLastSequence => self.last.ordinal + 1,
        }
    }

    /// Address of the sentinel terminating the last sequence, if any.
    fn tail(&mut self) -> Option<usize> {
        match self.find(Ordinal::MAX) {
            Lookup::NoSequences => None,
            _ => {
                let last = self.last.address;
                Some(self.skip_to_end(last))
            }
        }
    }

    /// Fails if growing the used area to `used_end` would eat into the safety margin.
    fn check_room(&self, used_end: usize) -> Result<(), StoreError> {
        if used_end > self.device.capacity().saturating_sub(SAFETY_MARGIN) {
            warn!("sequence store full at {=usize}", used_end);
            return Err(StoreError::CapacityExceeded);
        }
        Ok(())
    }

    /// Appends one segment to sequence `ordinal`.
    ///
    /// An ordinal beyond the last stored sequence creates a new sequence at
    /// the tail. Every byte after the insertion point is shifted one segment
    /// to the right. Returns the ordinal of the sequence that received the
    /// segment.
    pub fn append_to(&mut self, ordinal: Ordinal, segment: Segment) -> Result<Ordinal, StoreError> {
        if !self.present {
            return Err(StoreError::DeviceAbsent);
        }
        if segment.fade == SENTINEL {
            return Err(StoreError::ReservedFade);
        }
        let bytes = segment.to_bytes();

        match self.find(ordinal) {
            Lookup::Found(start) => {
                let insert = self.skip_to_end(start);
                let tail = self.tail().unwrap_or(insert);
                let used_end = tail + 2;
                self.check_room(used_end + SEGMENT_LEN)?;

                self.move_bytes(insert, insert + SEGMENT_LEN, used_end - insert);
                write_paged(&mut self.device, insert, &bytes);
                debug!("appended segment to sequence {=u16}", ordinal);
                Ok(ordinal)
            }
            Lookup::AtLastSequence => {
                let last = self.last;
                let start = self.skip_to_end(last.address) + 1;
                self.check_room(start + SEGMENT_LEN + 2)?;

                self.write_terminator(start + SEGMENT_LEN);
                write_paged(&mut self.device, start, &bytes);
                let created = last.ordinal + 1;
                debug!("created sequence {=u16}", created);
                Ok(created)
            }
            Lookup::NoSequences => {
                self.check_room(SEGMENT_LEN + 2)?;

                self.write_terminator(SEGMENT_LEN);
                write_paged(&mut self.device, 0, &bytes);
                debug!("created sequence 0");
                Ok(0)
            }
        }
    }

    /// Appends several segments to `ordinal`, pinning later segments to the
    /// sequence that received the first one.
    ///
    /// Stops at the first failure and returns it.
    pub fn append_all(
        &mut self,
        ordinal: Ordinal,
        segments: impl IntoIterator<Item = Segment>,
    ) -> Result<Ordinal, StoreError> {
        let mut target = ordinal;
        for segment in segments {
            target = self.append_to(target, segment)?;
        }
        Ok(target)
    }

    /// Removes every sequence in `start..=end`.
    ///
    /// Sequences after the range are shifted left over it. When the range
    /// reaches the last sequence the store is truncated at `start` instead.
    pub fn delete_range(&mut self, start: Ordinal, end: Ordinal) -> Result<(), StoreError> {
        if !self.present {
            return Err(StoreError::DeviceAbsent);
        }
        if end < start {
            return Err(StoreError::InvalidRange);
        }
        let Lookup::Found(start_address) = self.find(start) else {
            return Err(StoreError::NotFound);
        };

        if let Lookup::Found(end_address) = self.find(end) {
            let end_sentinel = self.skip_to_end(end_address);
            let tail = self.tail().unwrap_or(end_sentinel);
            if tail > end_sentinel {
                let used_end = (tail + 2).min(self.limit());
                self.move_bytes(end_sentinel + 1, start_address, used_end - end_sentinel - 1);
                self.reset_cursor();
                debug!("deleted sequences {=u16}..={=u16}", start, end);
                return Ok(());
            }
        }

        if start_address == 0 {
            self.write_terminator(0);
        } else {
            write_paged(&mut self.device, start_address, &[SENTINEL]);
        }
        self.reset_cursor();
        debug!("truncated store at sequence {=u16}", start);
        Ok(())
    }

    /// Resets the store to the canonical empty state.
    pub fn delete_all(&mut self) -> Result<(), StoreError> {
        if !self.present {
            return Err(StoreError::DeviceAbsent);
        }
        self.write_terminator(0);
        self.reset_cursor();
        info!("all sequences erased");
        Ok(())
    }

    fn reset_cursor(&mut self) {
        self.active_ordinal = 0;
        self.active_address = 0;
    }

    /// Relocates `[src, src + len)` to `[dst, dst + len)`; the ranges may overlap.
    ///
    /// Copies go through a page-sized staging buffer in chunks that never
    /// cross a destination page. When shifting right the chunks are taken
    /// from the top down, otherwise from the bottom up, so no source byte is
    /// overwritten before it has been copied.
    fn move_bytes(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 || src == dst {
            return;
        }
        let page = self.device.page_size().max(1);
        let mut staging = [0u8; STAGING_LEN];
        let max_chunk = page.min(STAGING_LEN);

        if dst < src {
            let mut done = 0;
            while done < len {
                let to = dst + done;
                let n = (len - done).min(max_chunk).min(page - to % page);
                self.device.read(src + done, &mut staging[..n]);
                self.device.write(to, &staging[..n]);
                done += n;
            }
        } else {
            let mut remaining = len;
            while remaining > 0 {
                let to_end = dst + remaining;
                let in_page = match to_end % page {
                    0 => page,
                    offset => offset,
                };
                let n = remaining.min(max_chunk).min(in_page);
                remaining -= n;
                self.device.read(src + remaining, &mut staging[..n]);
                self.device.write(dst + remaining, &staging[..n]);
            }
        }
    }
}
