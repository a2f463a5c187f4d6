// Licensed under the Apache-2.0 license

//! GPIO pin controller.
//!
//! Owns the GPIO register block and multiplexes pins between input, output,
//! and the six alternate functions. The bus drivers use it to place their
//! pins into the electrical role the peripheral needs before any transfer.
//!
//! The set/clear registers are write-only event registers: writing a one
//! performs the action, writing a zero does nothing, and the register never
//! reflects pin state. Levels are read from the separate level bank.

use crate::mmio::{MapError, MemoryMap, RegisterIo, BCM2836_IO_MEM_START};

/// Physical offset of the GPIO register block.
pub const GPIO_OFFSET: usize = 0x0020_0000;
/// GPIO register block size.
pub const GPIO_SIZE: usize = 0x3C;

const GPIO_GPFSEL0: usize = 0x00;
const GPIO_GPSET0: usize = 0x1C;
const GPIO_GPCLR0: usize = 0x28;
const GPIO_GPLEV0: usize = 0x34;

/// Pin indices are taken modulo this count for register addressing.
const PIN_COUNT: u32 = 53;

/// Electrical role of a pin, as the 3-bit function-select encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PinMode {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Owns the mapped GPIO block.
pub struct GpioController<R: RegisterIo> {
    regs: R,
}

impl<R: RegisterIo> GpioController<R> {
    /// Maps the GPIO register block.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::IoMapFailed`] if the block cannot be mapped.
    pub fn init<M>(mapper: &mut M) -> Result<Self, MapError>
    where
        M: MemoryMap<Region = R>,
    {
        let regs = mapper.map(BCM2836_IO_MEM_START + GPIO_OFFSET, GPIO_SIZE)?;
        Ok(Self { regs })
    }

    /// Releases the register block.
    pub fn teardown(self) {}

    /// Multiplexes `pin` into `mode`.
    ///
    /// The existing 3-bit function field is cleared before the new mode is
    /// written, so exactly one mode occupies the field afterwards. The
    /// logical meaning of an out-of-range pin index is the caller's
    /// contract; addressing wraps modulo the pin count.
    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) {
        let reg = GPIO_GPFSEL0 + ((((pin % PIN_COUNT) / 10) as usize) << 2);
        let shift = (pin % 10) * 3;
        self.regs.clear_flags32(reg, 0b111 << shift);
        self.regs.set_flags32(reg, (mode as u32) << shift);
    }

    /// Drives `pin` low.
    pub fn set_pin_low(&mut self, pin: u32) {
        let reg = GPIO_GPCLR0 + ((((pin % PIN_COUNT) >> 5) as usize) << 2);
        self.regs.set_flags32(reg, 1 << (pin % 32));
    }

    /// Drives `pin` high.
    pub fn set_pin_high(&mut self, pin: u32) {
        let reg = GPIO_GPSET0 + ((((pin % PIN_COUNT) >> 5) as usize) << 2);
        self.regs.set_flags32(reg, 1 << (pin % 32));
    }

    /// Reads the level of `pin`.
    #[must_use]
    pub fn get_pin_level(&self, pin: u32) -> bool {
        let reg = GPIO_GPLEV0 + ((((pin % PIN_COUNT) >> 5) as usize) << 2);
        self.regs.get_flags32(reg, 1 << (pin % 32)) != 0
    }
}
