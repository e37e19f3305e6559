//! Factory and emergency reset sequences.
//!
//! Both end in a restart, which the caller performs once the returned report
//! has been logged.

use log::{info, warn};

use crate::connectivity::CredentialStore;
use crate::counters::BootCounters;
use crate::files::FileStore;
use crate::settings::SettingsStore;
use crate::storage::Eeprom;

/// Failed reset step, named for the log.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResetStepError(pub &'static str);

/// Everything a factory reset wipes.
pub trait ResetTarget {
    type Eeprom: Eeprom;

    fn eeprom(&mut self) -> &mut Self::Eeprom;
    fn disconnect_network(&mut self);
    fn erase_network_credentials(&mut self) -> Result<(), ResetStepError>;
    fn format_file_storage(&mut self) -> Result<(), ResetStepError>;
}

/// The persistent stores on their own, for a reset decided at boot before
/// the radio and display exist.
pub struct StoreResetTarget<'a, E, C, F> {
    pub eeprom: &'a mut E,
    pub credentials: &'a mut C,
    pub files: &'a mut F,
}

impl<E, C, F> ResetTarget for StoreResetTarget<'_, E, C, F>
where
    E: Eeprom,
    C: CredentialStore,
    F: FileStore,
{
    type Eeprom = E;

    fn eeprom(&mut self) -> &mut E {
        self.eeprom
    }

    fn disconnect_network(&mut self) {}

    fn erase_network_credentials(&mut self) -> Result<(), ResetStepError> {
        erase_credentials(self.credentials)
    }

    fn format_file_storage(&mut self) -> Result<(), ResetStepError> {
        format_files(self.files)
    }
}

pub(crate) fn erase_credentials<C: CredentialStore>(
    credentials: &mut C,
) -> Result<(), ResetStepError> {
    credentials.erase().map_err(|err| {
        warn!("reset: credential erase failed: {:?}", err);
        ResetStepError("network credentials")
    })
}

pub(crate) fn format_files<F: FileStore>(files: &mut F) -> Result<(), ResetStepError> {
    files.format().map_err(|err| {
        warn!("reset: file storage format failed: {:?}", err);
        ResetStepError("file storage format")
    })
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResetKind {
    Factory,
    Emergency,
}

#[must_use = "a reset must be followed by a restart"]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResetReport {
    pub kind: ResetKind,
    pub credentials_erased: bool,
    pub settings_restored: bool,
    pub boot_counter_cleared: bool,
    pub power_cycles_cleared: bool,
    pub files_formatted: bool,
}

impl ResetReport {
    const fn empty(kind: ResetKind) -> Self {
        Self {
            kind,
            credentials_erased: false,
            settings_restored: false,
            boot_counter_cleared: false,
            power_cycles_cleared: false,
            files_formatted: false,
        }
    }

    /// Every step this kind of reset covers succeeded.
    pub fn is_complete(&self) -> bool {
        let common = self.settings_restored && self.boot_counter_cleared;
        match self.kind {
            ResetKind::Factory => {
                common && self.credentials_erased && self.power_cycles_cleared && self.files_formatted
            }
            ResetKind::Emergency => common,
        }
    }
}

/// Wipes network credentials, settings, both counters and file storage, in
/// that order. Each step runs regardless of earlier failures.
pub fn perform_factory_reset<T: ResetTarget>(target: &mut T) -> ResetReport {
    let mut report = ResetReport::empty(ResetKind::Factory);
    info!("reset: factory reset started");

    info!("reset: clearing network credentials");
    target.disconnect_network();
    report.credentials_erased = step(target.erase_network_credentials());
    info!("reset: network credentials step done");

    report.settings_restored = restore_settings(target.eeprom());

    info!("reset: clearing boot counters");
    let mut counters = BootCounters::new(target.eeprom());
    report.boot_counter_cleared = logged("boot counter", counters.reset_boot_failure(0));
    report.power_cycles_cleared = logged("power cycle counter", counters.reset_power_cycle());

    info!("reset: formatting file storage");
    report.files_formatted = step(target.format_file_storage());
    info!("reset: file storage step done");

    info!("reset: factory reset finished complete={}", report.is_complete());
    report
}

/// Restores settings and clears the boot counter. Network credentials, the
/// power-cycle counter and files are left alone.
pub fn perform_emergency_reset<E: Eeprom>(eeprom: &mut E) -> ResetReport {
    let mut report = ResetReport::empty(ResetKind::Emergency);
    info!("reset: emergency reset started");

    report.settings_restored = restore_settings(eeprom);

    info!("reset: clearing boot counter");
    report.boot_counter_cleared =
        logged("boot counter", BootCounters::new(eeprom).reset_boot_failure(0));

    info!("reset: emergency reset finished complete={}", report.is_complete());
    report
}

fn restore_settings<E: Eeprom>(eeprom: &mut E) -> bool {
    info!("reset: restoring default settings");
    logged(
        "settings",
        SettingsStore::new(eeprom).restore_defaults().map(|_| ()),
    )
}

fn step(result: Result<(), ResetStepError>) -> bool {
    match result {
        Ok(()) => true,
        Err(ResetStepError(what)) => {
            warn!("reset: {} failed; continuing", what);
            false
        }
    }
}

fn logged<Err: core::fmt::Debug>(what: &str, result: Result<(), Err>) -> bool {
    match result {
        Ok(()) => {
            info!("reset: {} cleared", what);
            true
        }
        Err(err) => {
            warn!("reset: {} failed: {:?}; continuing", what, err);
            false
        }
    }
}
