//! Ordered boot-time checks.

use log::{error, warn};

use crate::counters::BootCounters;
use crate::storage::Eeprom;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootDecision {
    Continue { boot_failures: u8, power_cycles: u8 },
    /// Rapid power cycling: full wipe, then restart.
    FactoryReset,
    /// Repeated unconfirmed boots: settings and boot counter only, then restart.
    EmergencyReset,
}

/// Counts this boot in both counters, then checks the power-cycle threshold
/// before the boot-failure threshold.
pub fn begin_boot<E: Eeprom>(eeprom: &mut E) -> BootDecision {
    let mut counters = BootCounters::new(eeprom);

    let boot_failures = counters.increment_boot_failure().unwrap_or_else(|err| {
        warn!("boot: recording boot attempt failed: {:?}", err);
        0
    });
    let power_cycles = counters.increment_power_cycle().unwrap_or_else(|err| {
        warn!("boot: recording power cycle failed: {:?}", err);
        0
    });

    if counters.check_power_cycle_threshold() {
        error!("boot: {} rapid power cycles; factory reset", power_cycles);
        return BootDecision::FactoryReset;
    }

    if counters.check_boot_failure_threshold() {
        error!("boot: {} unconfirmed boots; emergency reset", boot_failures);
        return BootDecision::EmergencyReset;
    }

    BootDecision::Continue {
        boot_failures,
        power_cycles,
    }
}
