use log::error;
use smartclock_core::storage::{ERASED_BYTE, Eeprom, MemoryEeprom, MemoryEepromError, REGION_SIZE};

use super::FlashLayout;
use super::raw_flash::{FlashError, RawFlash};

/// RAM image of the settings/counter region, written back one sector per
/// commit.
#[derive(Debug)]
pub struct FlashEeprom {
    flash: RawFlash,
    sector_addr: u32,
    image: [u8; REGION_SIZE],
    dirty: bool,
}

impl FlashEeprom {
    pub fn new(layout: &FlashLayout) -> Result<Self, FlashError> {
        let mut flash = RawFlash::new()?;
        let mut image = [ERASED_BYTE; REGION_SIZE];
        flash.read_bytes(layout.eeprom_addr, &mut image)?;

        Ok(Self {
            flash,
            sector_addr: layout.eeprom_addr,
            image,
            dirty: false,
        })
    }

    fn span(offset: usize, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let end = offset.checked_add(len).ok_or(FlashError::OutOfBounds)?;
        if end > REGION_SIZE {
            return Err(FlashError::OutOfBounds);
        }
        Ok(offset..end)
    }
}

impl Eeprom for FlashEeprom {
    type Error = FlashError;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), Self::Error> {
        let span = Self::span(offset, out.len())?;
        out.copy_from_slice(&self.image[span]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        let span = Self::span(offset, data.len())?;
        if self.image[span.clone()] != *data {
            self.image[span].copy_from_slice(data);
            self.dirty = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        if !self.dirty {
            return Ok(());
        }
        self.flash.erase_sector(self.sector_addr)?;
        self.flash.write_erased_bytes(self.sector_addr, &self.image)?;
        self.dirty = false;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SettingsEepromError {
    Flash(FlashError),
    Volatile(MemoryEepromError),
}

/// Settings storage the firmware boots with. Falls back to RAM when the
/// flash region cannot be opened, so the device still runs on defaults.
#[derive(Debug)]
pub enum SettingsEeprom {
    Flash(FlashEeprom),
    Volatile(MemoryEeprom),
}

impl SettingsEeprom {
    pub fn open(layout: Option<&FlashLayout>) -> Self {
        let opened = match layout {
            Some(layout) => FlashEeprom::new(layout),
            None => Err(FlashError::DataPartitionMissing),
        };
        match opened {
            Ok(eeprom) => Self::Flash(eeprom),
            Err(err) => {
                error!("eeprom: flash unavailable ({:?}); settings will not persist", err);
                Self::Volatile(MemoryEeprom::new())
            }
        }
    }

    pub fn is_volatile(&self) -> bool {
        matches!(self, Self::Volatile(_))
    }
}

impl Eeprom for SettingsEeprom {
    type Error = SettingsEepromError;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), Self::Error> {
        match self {
            Self::Flash(eeprom) => eeprom.read(offset, out).map_err(SettingsEepromError::Flash),
            Self::Volatile(eeprom) => eeprom
                .read(offset, out)
                .map_err(SettingsEepromError::Volatile),
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        match self {
            Self::Flash(eeprom) => eeprom.write(offset, data).map_err(SettingsEepromError::Flash),
            Self::Volatile(eeprom) => eeprom
                .write(offset, data)
                .map_err(SettingsEepromError::Volatile),
        }
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Flash(eeprom) => eeprom.commit().map_err(SettingsEepromError::Flash),
            Self::Volatile(eeprom) => eeprom.commit().map_err(SettingsEepromError::Volatile),
        }
    }
}
