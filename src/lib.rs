//! PMS7003 particulate-matter sensor support.
//!
//! [`sensors`] turns the sensor's 32-byte UART frames into validated
//! concentration readings and keeps the latest one in a shared store.
//! [`capability`] serves dust-level requests from that store and
//! [`watchdog`] feeds the external hardware watchdog while readings stay
//! fresh.
#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
mod fmt;

pub mod capability;
pub mod config;
pub mod sensors;
pub mod watchdog;
