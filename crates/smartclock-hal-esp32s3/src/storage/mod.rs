//! Flash-backed stores carved out of one data partition.
//!
//! Layout from the end of the partition: the last sector holds the emulated
//! EEPROM, the one before it the saved network, everything below is the file
//! area.

mod credentials;
mod eeprom;
mod file_area;
mod raw_flash;

pub use credentials::FlashCredentialStore;
pub use eeprom::{FlashEeprom, SettingsEeprom, SettingsEepromError};
pub use file_area::FlashFileArea;
pub use raw_flash::{FLASH_SECTOR_SIZE, FlashError, FlashLayout};
