use log::info;
use smartclock_core::files::{FileStore, IMAGE_HEADER_LEN, ImageHeader, StorageUsage};

use super::FlashLayout;
use super::raw_flash::{FLASH_SECTOR_SIZE, FlashError, RawFlash};

/// Image area below the settings sectors. Each image starts on a sector
/// boundary with an [`ImageHeader`]; a sector counts as used once its first
/// word is programmed.
#[derive(Debug)]
pub struct FlashFileArea {
    flash: Option<RawFlash>,
    start: u32,
    len: u32,
}

impl FlashFileArea {
    pub fn new(layout: &FlashLayout) -> Result<Self, FlashError> {
        Ok(Self {
            flash: Some(RawFlash::new()?),
            start: layout.files_addr,
            len: layout.files_len,
        })
    }

    /// Zero-sized area used when the data partition is missing.
    pub fn detached() -> Self {
        Self {
            flash: None,
            start: 0,
            len: 0,
        }
    }

    fn end(&self) -> u32 {
        self.start + self.len
    }

    fn sectors(&self) -> impl Iterator<Item = u32> + use<> {
        (self.start..self.end()).step_by(FLASH_SECTOR_SIZE as usize)
    }

    fn used_sectors(&mut self) -> Result<u32, FlashError> {
        let sectors = self.sectors();
        let Some(flash) = self.flash.as_mut() else {
            return Ok(0);
        };
        let mut used = 0;
        for sector in sectors {
            if !flash.sector_looks_erased(sector)? {
                used += 1;
            }
        }
        Ok(used)
    }
}

fn read_header(flash: &mut RawFlash, sector: u32) -> Result<Option<ImageHeader>, FlashError> {
    let mut raw = [0u8; IMAGE_HEADER_LEN];
    flash.read_bytes(sector, &mut raw)?;
    Ok(ImageHeader::decode(&raw))
}

impl FileStore for FlashFileArea {
    type Error = FlashError;

    /// Erases every used sector; returns how many image headers were wiped.
    fn clear_images(&mut self) -> Result<u32, Self::Error> {
        let sectors = self.sectors();
        let flash = self.flash.as_mut().ok_or(FlashError::DataPartitionMissing)?;
        let mut cleared = 0;
        for sector in sectors {
            if flash.sector_looks_erased(sector)? {
                continue;
            }
            if read_header(flash, sector)?.is_some() {
                cleared += 1;
            }
            flash.erase_sector(sector)?;
        }
        Ok(cleared)
    }

    fn delete(&mut self, path: &str) -> Result<bool, Self::Error> {
        let end = self.end();
        let flash = self.flash.as_mut().ok_or(FlashError::DataPartitionMissing)?;

        let mut sector = self.start;
        while sector < end {
            let Some(header) = read_header(flash, sector)? else {
                sector += FLASH_SECTOR_SIZE;
                continue;
            };
            let span = header.sectors(FLASH_SECTOR_SIZE).max(1) * FLASH_SECTOR_SIZE;
            let image_end = sector.saturating_add(span).min(end);

            if header.path.as_str() == path {
                for addr in (sector..image_end).step_by(FLASH_SECTOR_SIZE as usize) {
                    flash.erase_sector(addr)?;
                }
                info!("files: deleted {} ({} bytes)", path, header.len);
                return Ok(true);
            }
            sector = image_end;
        }
        Ok(false)
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        info!("files: formatting {} bytes at {:#x}", self.len, self.start);
        let sectors = self.sectors();
        let flash = self.flash.as_mut().ok_or(FlashError::DataPartitionMissing)?;
        for sector in sectors {
            flash.erase_sector(sector)?;
        }
        Ok(())
    }

    fn usage(&mut self) -> Result<StorageUsage, Self::Error> {
        Ok(StorageUsage {
            total_bytes: self.len,
            used_bytes: self.used_sectors()? * FLASH_SECTOR_SIZE,
        })
    }
}
