// Licensed under the Apache-2.0 license

//! SPI bus master for the BCM2836.
//!
//! Provides clock-divider, chip-select, and clock-mode configuration,
//! manual transfer bracketing, and polled byte and slice transfers. An
//! [`embedded_hal::spi::SpiDevice`] implementation wraps the manual
//! bracketing for HAL consumers.

pub mod bcm2836;
pub mod common;

pub use bcm2836::{SpiController, SPI_OFFSET, SPI_SIZE};
pub use common::{ChipSelect, SpiError, SpiMode};
