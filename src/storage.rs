//! Byte-addressable non-volatile storage abstraction.

/// Trait for abstracting a byte-addressable non-volatile memory device.
///
/// Implement this for your EEPROM or FRAM driver. The same trait covers the
/// large external device holding the sequences and the small internal area
/// holding the configuration block and macro table.
///
/// Device errors are the driver's concern: these methods cannot fail. A
/// driver that loses contact with its device should report it through
/// [`present`](Storage::present).
pub trait Storage {
    /// Fills `buf` with the bytes starting at `address`.
    fn read(&mut self, address: usize, buf: &mut [u8]);

    /// Writes `data` starting at `address` and returns once the device has settled.
    ///
    /// Callers never pass a range that crosses a page boundary.
    fn write(&mut self, address: usize, data: &[u8]);

    /// Total size of the device in bytes.
    fn capacity(&self) -> usize;

    /// Write page granularity in bytes. Must be a power of two.
    fn page_size(&self) -> usize;

    /// Checks that the device responds.
    fn present(&mut self) -> bool;

    /// Reads a single byte.
    fn read_byte(&mut self, address: usize) -> u8 {
        let mut byte = [0u8; 1];
        self.read(address, &mut byte);
        byte[0]
    }

    /// Writes a single byte.
    fn write_byte(&mut self, address: usize, value: u8) {
        self.write(address, &[value]);
    }

    /// Reads a big-endian word.
    fn read_word(&mut self, address: usize) -> u16 {
        let mut word = [0u8; 2];
        self.read(address, &mut word);
        u16::from_be_bytes(word)
    }

    /// Writes a big-endian word.
    ///
    /// The two bytes are written separately so a word straddling a page
    /// boundary is still page-safe.
    fn write_word(&mut self, address: usize, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.write_byte(address, high);
        self.write_byte(address + 1, low);
    }
}

/// Writes `data` at `address`, splitting it so no single device write crosses a page.
pub(crate) fn write_paged<S: Storage + ?Sized>(storage: &mut S, mut address: usize, mut data: &[u8]) {
    let page = storage.page_size().max(1);
    while !data.is_empty() {
        let room = page - (address % page);
        let len = room.min(data.len());
        storage.write(address, &data[..len]);
        address += len;
        data = &data[len..];
    }
}
