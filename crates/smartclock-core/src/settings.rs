//! Persisted user settings: a versioned record guarded by a CRC32.

use crc::{CRC_32_ISO_HDLC, Crc};
use heapless::String;
use log::{info, warn};

use crate::storage::{Eeprom, read_magic};

/// Bump whenever the record layout changes; older layouts then load as absent.
pub const SCHEMA_VERSION: u16 = 2;
pub const SETTINGS_MAGIC: u16 = 0xCAFE;
pub const SETTINGS_ADDR: usize = 0;
/// Encoded record length, CRC included.
pub const RECORD_LEN: usize = 77;
/// Magic tag plus record.
pub const SETTINGS_REGION_LEN: usize = MAGIC_LEN + RECORD_LEN;

pub const IMAGE_PATH_FIELD_BYTES: usize = 64;
/// Longest storable path; one byte of the field is kept for the terminator.
pub const IMAGE_PATH_CAPACITY: usize = IMAGE_PATH_FIELD_BYTES - 1;

pub const DEFAULT_BRIGHTNESS: u8 = 70;
pub const DEFAULT_THEME: u8 = 0;
/// CET.
pub const DEFAULT_GMT_OFFSET_SECS: i32 = 3_600;
pub const MAX_BRIGHTNESS: u8 = 100;
pub const MAX_THEME: u8 = 10;
pub const MIN_GMT_OFFSET_SECS: i32 = -12 * 3_600;
pub const MAX_GMT_OFFSET_SECS: i32 = 14 * 3_600;

const MAGIC_LEN: usize = 2;

// Field offsets inside the encoded record.
const VERSION_AT: usize = 0;
const BRIGHTNESS_AT: usize = 2;
const THEME_AT: usize = 3;
const PATH_AT: usize = 4;
const GMT_AT: usize = PATH_AT + IMAGE_PATH_FIELD_BYTES;
const VALID_AT: usize = GMT_AT + 4;
const CRC_AT: usize = VALID_AT + 1;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub type ImagePath = String<IMAGE_PATH_CAPACITY>;

/// User-tunable settings that survive reboot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettingsRecord {
    pub version: u16,
    pub brightness: u8,
    pub theme: u8,
    pub last_image_path: ImagePath,
    pub gmt_offset_secs: i32,
    pub valid: bool,
    pub crc: u32,
}

/// Reason a stored record was treated as absent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SettingsFault {
    Unreadable,
    MissingMagic { found: u16 },
    SchemaMismatch { found: u16 },
    CrcMismatch { stored: u32, computed: u32 },
    OutOfRange,
    InvalidPath,
}

/// Setter input that cannot be stored.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SettingsError {
    ThemeOutOfRange,
    GmtOffsetOutOfRange,
    PathTooLong,
    PathContainsNul,
}

impl SettingsRecord {
    /// Factory defaults with a matching CRC.
    pub fn reset() -> Self {
        let mut record = Self {
            version: SCHEMA_VERSION,
            brightness: DEFAULT_BRIGHTNESS,
            theme: DEFAULT_THEME,
            last_image_path: ImagePath::new(),
            gmt_offset_secs: DEFAULT_GMT_OFFSET_SECS,
            valid: true,
            crc: 0,
        };
        record.seal();
        record
    }

    /// CRC32 over every field preceding `crc`.
    pub fn compute_crc(&self) -> u32 {
        let raw = self.encode();
        CRC32.checksum(&raw[..CRC_AT])
    }

    pub fn crc_matches(&self) -> bool {
        self.crc == self.compute_crc()
    }

    /// Recomputes `crc` after a mutation.
    pub fn seal(&mut self) {
        self.crc = self.compute_crc();
    }

    pub fn is_in_range(&self) -> bool {
        self.valid
            && self.brightness <= MAX_BRIGHTNESS
            && self.theme <= MAX_THEME
            && (MIN_GMT_OFFSET_SECS..=MAX_GMT_OFFSET_SECS).contains(&self.gmt_offset_secs)
    }

    /// Clamps to `0..=100` and returns the stored value.
    pub fn set_brightness(&mut self, percent: i32) -> u8 {
        self.brightness = percent.clamp(0, MAX_BRIGHTNESS as i32) as u8;
        self.seal();
        self.brightness
    }

    pub fn set_theme(&mut self, theme: i32) -> Result<(), SettingsError> {
        if !(0..=MAX_THEME as i32).contains(&theme) {
            return Err(SettingsError::ThemeOutOfRange);
        }
        self.theme = theme as u8;
        self.seal();
        Ok(())
    }

    pub fn set_last_image_path(&mut self, path: &str) -> Result<(), SettingsError> {
        if path.contains('\0') {
            return Err(SettingsError::PathContainsNul);
        }
        let mut next = ImagePath::new();
        next.push_str(path)
            .map_err(|_| SettingsError::PathTooLong)?;
        self.last_image_path = next;
        self.seal();
        Ok(())
    }

    pub fn set_gmt_offset(&mut self, offset_secs: i32) -> Result<(), SettingsError> {
        if !(MIN_GMT_OFFSET_SECS..=MAX_GMT_OFFSET_SECS).contains(&offset_secs) {
            return Err(SettingsError::GmtOffsetOutOfRange);
        }
        self.gmt_offset_secs = offset_secs;
        self.seal();
        Ok(())
    }

    /// Fixed little-endian layout; the stored `crc` is written as-is.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[VERSION_AT..VERSION_AT + 2].copy_from_slice(&self.version.to_le_bytes());
        buf[BRIGHTNESS_AT] = self.brightness;
        buf[THEME_AT] = self.theme;
        let path = self.last_image_path.as_bytes();
        buf[PATH_AT..PATH_AT + path.len()].copy_from_slice(path);
        buf[GMT_AT..GMT_AT + 4].copy_from_slice(&self.gmt_offset_secs.to_le_bytes());
        buf[VALID_AT] = self.valid as u8;
        buf[CRC_AT..CRC_AT + 4].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Parses and validates a stored record.
    pub fn decode(raw: &[u8; RECORD_LEN]) -> Result<Self, SettingsFault> {
        let version = u16::from_le_bytes([raw[VERSION_AT], raw[VERSION_AT + 1]]);
        if version != SCHEMA_VERSION {
            return Err(SettingsFault::SchemaMismatch { found: version });
        }

        let stored = u32::from_le_bytes([
            raw[CRC_AT],
            raw[CRC_AT + 1],
            raw[CRC_AT + 2],
            raw[CRC_AT + 3],
        ]);
        let computed = CRC32.checksum(&raw[..CRC_AT]);
        if stored != computed {
            return Err(SettingsFault::CrcMismatch { stored, computed });
        }

        let valid = match raw[VALID_AT] {
            0 => false,
            1 => true,
            _ => return Err(SettingsFault::OutOfRange),
        };

        let path_field = &raw[PATH_AT..GMT_AT];
        let path_len = path_field
            .iter()
            .position(|b| *b == 0)
            .ok_or(SettingsFault::InvalidPath)?;
        let path =
            core::str::from_utf8(&path_field[..path_len]).map_err(|_| SettingsFault::InvalidPath)?;
        let mut last_image_path = ImagePath::new();
        last_image_path
            .push_str(path)
            .map_err(|_| SettingsFault::InvalidPath)?;

        let record = Self {
            version,
            brightness: raw[BRIGHTNESS_AT],
            theme: raw[THEME_AT],
            last_image_path,
            gmt_offset_secs: i32::from_le_bytes([
                raw[GMT_AT],
                raw[GMT_AT + 1],
                raw[GMT_AT + 2],
                raw[GMT_AT + 3],
            ]),
            valid,
            crc: stored,
        };

        if !record.is_in_range() {
            return Err(SettingsFault::OutOfRange);
        }

        Ok(record)
    }
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self::reset()
    }
}

/// Settings view over the shared EEPROM region.
pub struct SettingsStore<'a, E> {
    eeprom: &'a mut E,
}

impl<'a, E> SettingsStore<'a, E>
where
    E: Eeprom,
{
    pub fn new(eeprom: &'a mut E) -> Self {
        Self { eeprom }
    }

    /// Reads the stored record without repairing anything.
    pub fn read(&mut self) -> Result<SettingsRecord, SettingsFault> {
        let magic =
            read_magic(self.eeprom, SETTINGS_ADDR).map_err(|_| SettingsFault::Unreadable)?;
        if magic != SETTINGS_MAGIC {
            return Err(SettingsFault::MissingMagic { found: magic });
        }

        let mut raw = [0u8; RECORD_LEN];
        self.eeprom
            .read(SETTINGS_ADDR + MAGIC_LEN, &mut raw)
            .map_err(|_| SettingsFault::Unreadable)?;
        SettingsRecord::decode(&raw)
    }

    /// Always yields a valid record. Anything that fails validation is
    /// replaced by persisted defaults.
    pub fn load(&mut self) -> SettingsRecord {
        match self.read() {
            Ok(record) => {
                info!(
                    "settings: loaded brightness={} theme={} gmt_offset={}",
                    record.brightness, record.theme, record.gmt_offset_secs
                );
                record
            }
            Err(fault) => {
                warn!("settings: stored record rejected ({:?}); restoring defaults", fault);
                let mut defaults = SettingsRecord::reset();
                if let Err(err) = self.save(&mut defaults) {
                    warn!("settings: persisting defaults failed: {:?}", err);
                }
                defaults
            }
        }
    }

    /// Stamps the schema version, reseals and commits in one buffered write.
    ///
    /// A failed commit leaves the staged region as it was before the call, so
    /// a later commit by another writer cannot persist the rejected record.
    pub fn save(&mut self, record: &mut SettingsRecord) -> Result<(), E::Error> {
        record.version = SCHEMA_VERSION;
        record.seal();

        let mut buf = [0u8; SETTINGS_REGION_LEN];
        buf[..MAGIC_LEN].copy_from_slice(&SETTINGS_MAGIC.to_le_bytes());
        buf[MAGIC_LEN..].copy_from_slice(&record.encode());

        let mut previous = [0u8; SETTINGS_REGION_LEN];
        self.eeprom.read(SETTINGS_ADDR, &mut previous)?;
        self.eeprom.write(SETTINGS_ADDR, &buf)?;

        if let Err(err) = self.eeprom.commit() {
            if let Err(restage) = self.eeprom.write(SETTINGS_ADDR, &previous) {
                warn!("settings: unstaging rejected record failed: {:?}", restage);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Overwrites the stored record with factory defaults.
    pub fn restore_defaults(&mut self) -> Result<SettingsRecord, E::Error> {
        let mut defaults = SettingsRecord::reset();
        self.save(&mut defaults)?;
        Ok(defaults)
    }
}
