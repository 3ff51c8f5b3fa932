//! Polled I2C master for register-addressed sensors, with a register backend for the STM32F4
//! I2C peripheral and implementations of the embedded-hal i2c traits.
#![cfg_attr(not(test), no_std)]
#![forbid(missing_docs)]

mod fmt;

/// Transaction engine driving the bus through flag-gated steps.
pub mod i2c;
/// Register-level interface the engine drives.
pub mod registers;
/// Register backend for the STM32F4 I2C peripheral.
#[cfg(feature = "stm32f4")]
pub mod stm32f4;

#[cfg(test)]
mod fake;

pub use i2c::{Config, Error, I2C};
pub use registers::{BusRegisters, Flag};
