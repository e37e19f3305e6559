use crc::{CRC_32_ISO_HDLC, Crc};
use log::warn;
use smartclock_core::connectivity::{
    CredentialStore, MAX_PASSWORD_BYTES, MAX_SSID_BYTES, WifiCredentials,
};

use super::FlashLayout;
use super::raw_flash::{FlashError, RawFlash};

const CREDENTIALS_MAGIC: u32 = 0x3157_4353; // "SCW1"
const SSID_AT: usize = 6;
const PASSWORD_AT: usize = SSID_AT + MAX_SSID_BYTES;
const CRC_AT: usize = PASSWORD_AT + MAX_PASSWORD_BYTES;
const RECORD_LEN: usize = CRC_AT + 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Saved network in its own flash sector.
///
/// `[magic u32][ssid len u8][password len u8][ssid][password][crc32]`
#[derive(Debug)]
pub struct FlashCredentialStore {
    flash: Option<RawFlash>,
    sector_addr: u32,
}

impl FlashCredentialStore {
    pub fn new(layout: &FlashLayout) -> Result<Self, FlashError> {
        Ok(Self {
            flash: Some(RawFlash::new()?),
            sector_addr: layout.credentials_addr,
        })
    }

    /// Store without a backing partition: nothing loads, every write fails.
    pub fn detached() -> Self {
        Self {
            flash: None,
            sector_addr: 0,
        }
    }

    fn flash(&mut self) -> Result<&mut RawFlash, FlashError> {
        self.flash.as_mut().ok_or(FlashError::DataPartitionMissing)
    }
}

impl CredentialStore for FlashCredentialStore {
    type Error = FlashError;

    fn load(&mut self) -> Option<WifiCredentials> {
        let mut buf = [0u8; RECORD_LEN];
        let addr = self.sector_addr;
        let flash = self.flash.as_mut()?;
        if let Err(err) = flash.read_bytes(addr, &mut buf) {
            warn!("wifi: reading saved network failed: {:?}", err);
            return None;
        }
        decode(&buf)
    }

    fn save(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        let buf = encode(credentials);
        let addr = self.sector_addr;
        let flash = self.flash()?;
        flash.erase_sector(addr)?;
        flash.write_erased_bytes(addr, &buf)
    }

    fn erase(&mut self) -> Result<(), Self::Error> {
        let addr = self.sector_addr;
        self.flash()?.erase_sector(addr)
    }
}

fn encode(credentials: &WifiCredentials) -> [u8; RECORD_LEN] {
    let ssid = credentials.ssid.as_bytes();
    let password = credentials.password.as_bytes();

    let mut buf = [0u8; RECORD_LEN];
    buf[0..4].copy_from_slice(&CREDENTIALS_MAGIC.to_le_bytes());
    buf[4] = ssid.len() as u8;
    buf[5] = password.len() as u8;
    buf[SSID_AT..SSID_AT + ssid.len()].copy_from_slice(ssid);
    buf[PASSWORD_AT..PASSWORD_AT + password.len()].copy_from_slice(password);
    let crc = CRC32.checksum(&buf[..CRC_AT]);
    buf[CRC_AT..].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn decode(buf: &[u8; RECORD_LEN]) -> Option<WifiCredentials> {
    if u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) != CREDENTIALS_MAGIC {
        return None;
    }

    let stored = u32::from_le_bytes([buf[CRC_AT], buf[CRC_AT + 1], buf[CRC_AT + 2], buf[CRC_AT + 3]]);
    if CRC32.checksum(&buf[..CRC_AT]) != stored {
        warn!("wifi: saved network failed its checksum; ignoring");
        return None;
    }

    let ssid_len = usize::from(buf[4]).min(MAX_SSID_BYTES);
    let password_len = usize::from(buf[5]).min(MAX_PASSWORD_BYTES);
    let ssid = core::str::from_utf8(&buf[SSID_AT..SSID_AT + ssid_len]).ok()?;
    let password = core::str::from_utf8(&buf[PASSWORD_AT..PASSWORD_AT + password_len]).ok()?;

    match WifiCredentials::new(ssid, password) {
        Ok(credentials) => Some(credentials),
        Err(err) => {
            warn!("wifi: saved network rejected: {:?}", err);
            None
        }
    }
}
