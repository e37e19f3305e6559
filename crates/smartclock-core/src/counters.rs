//! Boot-failure and power-cycle counters.
//!
//! Both live right after the settings region in the shared EEPROM, each behind
//! its own magic tag. A missing tag reads as a zero count.

use log::{info, warn};

use crate::settings::{SETTINGS_ADDR, SETTINGS_REGION_LEN};
use crate::storage::{Eeprom, read_magic};

pub const BOOT_COUNTER_MAGIC: u16 = 0xB007;
pub const POWER_CYCLE_MAGIC: u16 = 0x5C01;

pub const BOOT_FAILURE_THRESHOLD: u8 = 5;
pub const POWER_CYCLE_THRESHOLD: u8 = 5;
/// Continuous uptime after which a boot no longer counts as a power cycle.
pub const POWER_CYCLE_GRACE_MS: u64 = 10_000;

/// `[magic u16][fail_count u8][last_boot_timestamp u32]`
pub const BOOT_COUNTER_ADDR: usize = SETTINGS_ADDR + SETTINGS_REGION_LEN;
pub const BOOT_COUNTER_LEN: usize = 7;
/// `[magic u16][cycle_count u8]`
pub const POWER_CYCLE_ADDR: usize = BOOT_COUNTER_ADDR + BOOT_COUNTER_LEN;
pub const POWER_CYCLE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BootFailureRecord {
    pub fail_count: u8,
    /// Seconds, stamped at the last successful boot.
    pub last_boot_timestamp: u32,
}

/// Counter operations over the shared EEPROM.
pub struct BootCounters<'a, E> {
    eeprom: &'a mut E,
}

impl<'a, E> BootCounters<'a, E>
where
    E: Eeprom,
{
    pub fn new(eeprom: &'a mut E) -> Self {
        Self { eeprom }
    }

    pub fn boot_failure(&mut self) -> Result<BootFailureRecord, E::Error> {
        if read_magic(self.eeprom, BOOT_COUNTER_ADDR)? != BOOT_COUNTER_MAGIC {
            return Ok(BootFailureRecord::default());
        }

        let mut raw = [0u8; BOOT_COUNTER_LEN - 2];
        self.eeprom.read(BOOT_COUNTER_ADDR + 2, &mut raw)?;
        Ok(BootFailureRecord {
            fail_count: raw[0],
            last_boot_timestamp: u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]),
        })
    }

    /// Counts one more unconfirmed boot and returns the new count.
    pub fn increment_boot_failure(&mut self) -> Result<u8, E::Error> {
        let mut record = self.boot_failure()?;
        record.fail_count = record.fail_count.saturating_add(1);
        self.write_boot_failure(record)?;
        info!("boot: failure count now {}", record.fail_count);
        Ok(record.fail_count)
    }

    /// Unreadable storage never forces a reset.
    pub fn check_boot_failure_threshold(&mut self) -> bool {
        match self.boot_failure() {
            Ok(record) => record.fail_count >= BOOT_FAILURE_THRESHOLD,
            Err(err) => {
                warn!("boot: failure counter unreadable: {:?}", err);
                false
            }
        }
    }

    /// Boot success checkpoint.
    pub fn reset_boot_failure(&mut self, timestamp: u32) -> Result<(), E::Error> {
        self.write_boot_failure(BootFailureRecord {
            fail_count: 0,
            last_boot_timestamp: timestamp,
        })
    }

    pub fn power_cycles(&mut self) -> Result<u8, E::Error> {
        if read_magic(self.eeprom, POWER_CYCLE_ADDR)? != POWER_CYCLE_MAGIC {
            return Ok(0);
        }

        let mut raw = [0u8; 1];
        self.eeprom.read(POWER_CYCLE_ADDR + 2, &mut raw)?;
        Ok(raw[0])
    }

    pub fn increment_power_cycle(&mut self) -> Result<u8, E::Error> {
        let count = self.power_cycles()?.saturating_add(1);
        self.write_power_cycles(count)?;
        info!("boot: power cycle count now {}", count);
        Ok(count)
    }

    pub fn check_power_cycle_threshold(&mut self) -> bool {
        match self.power_cycles() {
            Ok(count) => count >= POWER_CYCLE_THRESHOLD,
            Err(err) => {
                warn!("boot: power cycle counter unreadable: {:?}", err);
                false
            }
        }
    }

    pub fn reset_power_cycle(&mut self) -> Result<(), E::Error> {
        self.write_power_cycles(0)
    }

    fn write_boot_failure(&mut self, record: BootFailureRecord) -> Result<(), E::Error> {
        let mut buf = [0u8; BOOT_COUNTER_LEN];
        buf[..2].copy_from_slice(&BOOT_COUNTER_MAGIC.to_le_bytes());
        buf[2] = record.fail_count;
        buf[3..].copy_from_slice(&record.last_boot_timestamp.to_le_bytes());
        self.eeprom.write(BOOT_COUNTER_ADDR, &buf)?;
        self.eeprom.commit()
    }

    fn write_power_cycles(&mut self, count: u8) -> Result<(), E::Error> {
        let mut buf = [0u8; POWER_CYCLE_LEN];
        buf[..2].copy_from_slice(&POWER_CYCLE_MAGIC.to_le_bytes());
        buf[2] = count;
        self.eeprom.write(POWER_CYCLE_ADDR, &buf)?;
        self.eeprom.commit()
    }
}

/// Clears the power-cycle counter once the device has stayed up long enough.
#[derive(Debug, Clone, Copy)]
pub struct PowerCycleGrace {
    boot_ms: u64,
    cleared: bool,
}

impl PowerCycleGrace {
    pub const fn new(boot_ms: u64) -> Self {
        Self {
            boot_ms,
            cleared: false,
        }
    }

    pub const fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Returns `true` on the call that clears the counter. A failed write is
    /// logged and not retried.
    pub fn poll<E: Eeprom>(&mut self, now_ms: u64, eeprom: &mut E) -> bool {
        if self.cleared || now_ms.saturating_sub(self.boot_ms) < POWER_CYCLE_GRACE_MS {
            return false;
        }

        self.cleared = true;
        match BootCounters::new(eeprom).reset_power_cycle() {
            Ok(()) => {
                info!("boot: stable for {} ms; power cycle counter cleared", POWER_CYCLE_GRACE_MS);
            }
            Err(err) => warn!("boot: clearing power cycle counter failed: {:?}", err),
        }
        true
    }
}
