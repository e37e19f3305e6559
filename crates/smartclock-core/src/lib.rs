#![cfg_attr(not(test), no_std)]

//! Board-independent core of the SmartClock firmware: persisted settings,
//! boot counters, the connectivity state machine and recovery orchestration.

pub mod boot;
pub mod button;
pub mod clock;
pub mod connectivity;
pub mod control;
pub mod counters;
pub mod device;
pub mod display;
pub mod files;
pub mod log_ring;
pub mod reset;
pub mod settings;
pub mod storage;

#[cfg(test)]
mod testing;
