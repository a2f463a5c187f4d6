// Licensed under the Apache-2.0 license

//! Shared SPI types and defaults.

/// Errors reported by the SPI bus master.
///
/// SPI has no acknowledgment concept, so a missed deadline is the only
/// failure the hardware can surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiError {
    /// The software deadline elapsed before the awaited status flag
    /// appeared.
    HardwareTimeout,
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

/// Chip-select line asserted for transfers, as the 2-bit CS field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ChipSelect {
    Chip0 = 0b00,
    Chip1 = 0b01,
}

/// Clock phase and polarity convention, as the CPHA/CPOL field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SpiMode {
    /// Clock rests low, transition in the middle of the data bit.
    Mode0 = 0b0000,
    /// Clock rests low, transition at the beginning of the data bit.
    Mode1 = 0b0100,
    /// Clock rests high, transition in the middle of the data bit.
    Mode2 = 0b1000,
    /// Clock rests high, transition at the beginning of the data bit.
    Mode3 = 0b1100,
}

/// Default software timeout for awaited status flags, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;
