#![no_std]

//! ESP32-S3 board adapters for the SmartClock core.

extern crate alloc;

pub mod input;
pub mod network;
pub mod platform;
pub mod storage;
