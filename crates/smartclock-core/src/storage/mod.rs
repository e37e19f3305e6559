//! Persistent byte region abstraction.
//!
//! Settings and both boot counters share one small emulated EEPROM: reads and
//! writes go to a RAM image, `commit` pushes that image to the medium.

mod mem;

pub use mem::{MemoryEeprom, MemoryEepromError};

/// Size of the emulated EEPROM image in bytes.
pub const REGION_SIZE: usize = 512;
/// Value of a never-written byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Buffered persistent storage.
pub trait Eeprom {
    type Error: core::fmt::Debug;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), Self::Error>;

    /// Stages `data` at `offset`. Nothing reaches the medium before `commit`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;

    /// Persists every staged write. Returns once the medium holds the image.
    fn commit(&mut self) -> Result<(), Self::Error>;
}

/// Reads a little-endian `u16` tag at `offset`.
pub(crate) fn read_magic<E: Eeprom>(eeprom: &mut E, offset: usize) -> Result<u16, E::Error> {
    let mut raw = [0u8; 2];
    eeprom.read(offset, &mut raw)?;
    Ok(u16::from_le_bytes(raw))
}
