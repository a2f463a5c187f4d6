// Licensed under the Apache-2.0 license

//! Shared I2C types and defaults.

/// Errors reported by the I2C bus master.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    /// No device acknowledged the address.
    NoResponse,
    /// The addressed device held the clock low past the bus clock-timeout
    /// register.
    ClockTimeout,
    /// The software deadline elapsed before the awaited status flag
    /// appeared.
    HardwareTimeout,
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        match self {
            I2cError::NoResponse => embedded_hal::i2c::ErrorKind::NoAcknowledge(
                embedded_hal::i2c::NoAcknowledgeSource::Unknown,
            ),
            I2cError::ClockTimeout | I2cError::HardwareTimeout => {
                embedded_hal::i2c::ErrorKind::Other
            }
        }
    }
}

/// Default software timeout for awaited status flags, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;
