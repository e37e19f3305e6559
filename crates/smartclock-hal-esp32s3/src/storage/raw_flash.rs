use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::info;

pub const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;
/// EEPROM sector, credential sector and at least one file sector.
const MIN_PARTITION_SECTORS: u32 = 3;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashError {
    PartitionTable,
    DataPartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    OutOfBounds,
    Unaligned,
}

fn rom_result(rc: i32) -> Result<(), FlashError> {
    if rc == ESP_ROM_SPIFLASH_RESULT_OK {
        Ok(())
    } else {
        Err(FlashError::FlashOpFailed(rc))
    }
}

/// ROM-routine access to the SPI flash, word at a time.
#[derive(Debug)]
pub(crate) struct RawFlash;

impl RawFlash {
    pub(crate) fn new() -> Result<Self, FlashError> {
        rom_result(unsafe { esp_rom_spiflash_unlock() })?;
        Ok(Self)
    }

    pub(crate) fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashError::Unaligned);
        }

        rom_result(unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) })
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashError> {
        let mut word = u32::MAX;
        rom_result(unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) })?;
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError> {
        rom_result(unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) })
    }

    /// Reads any byte range; the ROM routine itself only takes aligned words.
    pub(crate) fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
        let start = addr & !0b11;
        let end = addr
            .checked_add(out.len() as u32)
            .ok_or(FlashError::OutOfBounds)?;

        for word_addr in (start..end).step_by(4) {
            let bytes = self.read_word(word_addr)?.to_le_bytes();
            for (i, byte) in bytes.iter().enumerate() {
                let at = word_addr + i as u32;
                if at >= addr && at < end {
                    out[(at - addr) as usize] = *byte;
                }
            }
        }
        Ok(())
    }

    /// Programs bytes into an erased region. Padding in partial words stays 0xFF.
    pub(crate) fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = addr & !0b11;
        let end = addr
            .checked_add(data.len() as u32)
            .ok_or(FlashError::OutOfBounds)?;

        for word_addr in (start..end).step_by(4) {
            let mut bytes = [0xFFu8; 4];
            for (i, slot) in bytes.iter_mut().enumerate() {
                let at = word_addr + i as u32;
                if at >= addr && at < end {
                    *slot = data[(at - addr) as usize];
                }
            }
            self.write_word(word_addr, u32::from_le_bytes(bytes))?;
        }
        Ok(())
    }

    /// True when the first word of the sector was never programmed.
    pub(crate) fn sector_looks_erased(&mut self, sector_addr: u32) -> Result<bool, FlashError> {
        Ok(self.read_word(sector_addr)? == u32::MAX)
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashError::Unaligned)
    }
}

/// Sector addresses of the three stores.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FlashLayout {
    pub eeprom_addr: u32,
    pub credentials_addr: u32,
    pub files_addr: u32,
    pub files_len: u32,
}

impl FlashLayout {
    /// Picks the first writable data partition of undefined subtype (falling
    /// back to NVS) and splits it.
    pub fn discover() -> Result<Self, FlashError> {
        let mut flash = RawFlash::new()?;
        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashError::PartitionTable)?;

        let mut undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;
        for entry in table.iter() {
            if entry.is_read_only() {
                continue;
            }
            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) if fallback_nvs.is_none() => {
                    fallback_nvs = Some((entry.offset(), entry.len()));
                }
                _ => {}
            }
        }

        let (offset, len) = undefined
            .or(fallback_nvs)
            .ok_or(FlashError::DataPartitionMissing)?;
        let layout = Self::split(offset, len)?;
        info!(
            "flash: partition at {:#x} len={} files={}",
            offset, len, layout.files_len
        );
        Ok(layout)
    }

    fn split(offset: u32, len: u32) -> Result<Self, FlashError> {
        let len = len - len % FLASH_SECTOR_SIZE;
        if len < MIN_PARTITION_SECTORS * FLASH_SECTOR_SIZE {
            return Err(FlashError::PartitionTooSmall);
        }

        let end = offset + len;
        Ok(Self {
            eeprom_addr: end - FLASH_SECTOR_SIZE,
            credentials_addr: end - 2 * FLASH_SECTOR_SIZE,
            files_addr: offset,
            files_len: len - 2 * FLASH_SECTOR_SIZE,
        })
    }
}
