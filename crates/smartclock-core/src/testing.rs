//! Hand-written collaborators shared by the unit tests.

use core::net::Ipv4Addr;

use crate::connectivity::{
    CredentialStore, LinkStatus, RandomSource, ScanEntry, ScanResults, WifiCredentials, WifiRadio,
};
use crate::files::{FileStore, StorageUsage};
use crate::storage::{Eeprom, MemoryEeprom};

pub(crate) const STATION_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 40);
pub(crate) const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct RadioFault;

#[derive(Default)]
pub(crate) struct ScriptedRadio {
    pub connects: u32,
    /// Connect attempts numbered at or above this one associate.
    pub succeed_from: Option<u32>,
    pub associated: bool,
    pub attempting: bool,
    pub reject_immediately: bool,
    pub disconnects: u32,
    pub ap_running: bool,
    pub ap_starts: u32,
    pub ap_failures_left: u32,
    pub ap_stops: u32,
    pub power_cycles: u32,
    pub visible: StdVisible,
}

pub(crate) type StdVisible = std::vec::Vec<(&'static str, i8, bool)>;

impl ScriptedRadio {
    pub fn drop_link(&mut self) {
        self.associated = false;
        self.attempting = false;
    }
}

impl WifiRadio for ScriptedRadio {
    type Error = RadioFault;

    fn begin_connect(&mut self, _credentials: &WifiCredentials) -> Result<(), Self::Error> {
        self.connects += 1;
        self.attempting = true;
        self.associated = self.succeed_from.is_some_and(|from| self.connects >= from);
        Ok(())
    }

    fn link_status(&mut self) -> LinkStatus {
        if self.associated {
            LinkStatus::Up(STATION_IP)
        } else if self.attempting && self.reject_immediately {
            LinkStatus::Failed
        } else if self.attempting {
            LinkStatus::Connecting
        } else {
            LinkStatus::Down
        }
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.drop_link();
    }

    fn start_access_point(
        &mut self,
        _ssid: &str,
        _password: &str,
    ) -> Result<Ipv4Addr, Self::Error> {
        self.ap_starts += 1;
        if self.ap_failures_left > 0 {
            self.ap_failures_left -= 1;
            return Err(RadioFault);
        }
        self.ap_running = true;
        Ok(AP_IP)
    }

    fn stop_access_point(&mut self) {
        self.ap_stops += 1;
        self.ap_running = false;
    }

    fn power_cycle(&mut self) -> Result<(), Self::Error> {
        self.power_cycles += 1;
        Ok(())
    }

    fn scan(&mut self, out: &mut ScanResults) -> Result<(), Self::Error> {
        out.clear();
        for (ssid, signal_dbm, is_open) in &self.visible {
            let mut name = crate::connectivity::Ssid::new();
            let _ = name.push_str(ssid);
            let _ = out.push(ScanEntry {
                ssid: name,
                signal_dbm: *signal_dbm,
                is_open: *is_open,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCredentials {
    pub stored: Option<WifiCredentials>,
    pub saves: u32,
}

impl CredentialStore for FakeCredentials {
    type Error = core::convert::Infallible;

    fn load(&mut self) -> Option<WifiCredentials> {
        self.stored.clone()
    }

    fn save(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        self.saves += 1;
        self.stored = Some(credentials.clone());
        Ok(())
    }

    fn erase(&mut self) -> Result<(), Self::Error> {
        self.stored = None;
        Ok(())
    }
}

pub(crate) struct FixedRng(pub u32);

impl RandomSource for FixedRng {
    fn next_u32(&mut self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct FilesFault;

pub(crate) const IMAGE_BYTES: u32 = 4_096;

pub(crate) struct FakeFiles {
    pub images: std::vec::Vec<&'static str>,
    pub formatted: bool,
    pub broken: bool,
}

impl Default for FakeFiles {
    fn default() -> Self {
        Self {
            images: vec!["/image/cat.jpg", "/image/dog.jpg", "/image/sea.jpg"],
            formatted: false,
            broken: false,
        }
    }
}

impl FileStore for FakeFiles {
    type Error = FilesFault;

    fn clear_images(&mut self) -> Result<u32, Self::Error> {
        if self.broken {
            return Err(FilesFault);
        }
        Ok(core::mem::take(&mut self.images).len() as u32)
    }

    fn delete(&mut self, path: &str) -> Result<bool, Self::Error> {
        if self.broken {
            return Err(FilesFault);
        }
        let before = self.images.len();
        self.images.retain(|image| *image != path);
        Ok(self.images.len() != before)
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(FilesFault);
        }
        self.images.clear();
        self.formatted = true;
        Ok(())
    }

    fn usage(&mut self) -> Result<StorageUsage, Self::Error> {
        if self.broken {
            return Err(FilesFault);
        }
        Ok(StorageUsage {
            total_bytes: 1_048_576,
            used_bytes: self.images.len() as u32 * IMAGE_BYTES,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum StorageFault {
    Memory(crate::storage::MemoryEepromError),
    CommitRejected,
}

/// RAM EEPROM whose next `failing_commits` commits are refused.
#[derive(Default)]
pub(crate) struct FlakyEeprom {
    pub inner: MemoryEeprom,
    pub failing_commits: u32,
}

impl Eeprom for FlakyEeprom {
    type Error = StorageFault;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), Self::Error> {
        self.inner.read(offset, out).map_err(StorageFault::Memory)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        self.inner.write(offset, data).map_err(StorageFault::Memory)
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(StorageFault::CommitRejected);
        }
        self.inner.commit().map_err(StorageFault::Memory)
    }
}
