use super::{ERASED_BYTE, Eeprom, REGION_SIZE};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryEepromError {
    OutOfBounds,
}

/// RAM-only EEPROM. Used when no flash backend is available and as the
/// storage double in tests.
///
/// Keeps the staged image and the committed image apart so a lost commit can
/// be simulated with [`MemoryEeprom::drop_uncommitted`].
#[derive(Debug, Clone)]
pub struct MemoryEeprom<const N: usize = REGION_SIZE> {
    staged: [u8; N],
    committed: [u8; N],
    commits: u32,
}

impl<const N: usize> MemoryEeprom<N> {
    /// Blank medium, every byte erased.
    pub const fn new() -> Self {
        Self {
            staged: [ERASED_BYTE; N],
            committed: [ERASED_BYTE; N],
            commits: 0,
        }
    }

    /// Medium preloaded with `image` (already committed).
    pub fn with_image(image: [u8; N]) -> Self {
        Self {
            staged: image,
            committed: image,
            commits: 0,
        }
    }

    pub fn committed(&self) -> &[u8; N] {
        &self.committed
    }

    pub const fn commit_count(&self) -> u32 {
        self.commits
    }

    /// Discards staged writes, as a reset between `write` and `commit` would.
    pub fn drop_uncommitted(&mut self) {
        self.staged = self.committed;
    }

    fn range(offset: usize, len: usize) -> Result<core::ops::Range<usize>, MemoryEepromError> {
        let end = offset
            .checked_add(len)
            .ok_or(MemoryEepromError::OutOfBounds)?;
        if end > N {
            return Err(MemoryEepromError::OutOfBounds);
        }
        Ok(offset..end)
    }
}

impl<const N: usize> Default for MemoryEeprom<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Eeprom for MemoryEeprom<N> {
    type Error = MemoryEepromError;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, out.len())?;
        out.copy_from_slice(&self.staged[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, data.len())?;
        self.staged[range].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        self.committed = self.staged;
        self.commits = self.commits.saturating_add(1);
        Ok(())
    }
}
