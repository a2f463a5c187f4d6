// Licensed under the Apache-2.0 license

//! BSC (I2C) bus master for the BCM2836.
//!
//! Provides clock-divider and slave-address configuration plus three
//! polling transaction primitives: register read, raw read, and raw write.

pub mod bcm2836;
pub mod common;

pub use bcm2836::{I2cController, I2C1_OFFSET, I2C_SIZE};
pub use common::I2cError;
