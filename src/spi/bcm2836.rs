// Licensed under the Apache-2.0 license

//! Register-level driver for the BCM2836 SPI0 controller.
//!
//! The transfer-active flag doubles as the hardware chip-select bracket:
//! [`SpiController::begin_transfer`] asserts it (flushing both FIFOs) and
//! [`SpiController::end_transfer`] releases it. Between the two, byte
//! transfers poll the FIFO status flags under a per-call software deadline.

use crate::common::{Logger, NoOpLogger};
use crate::gpio::{GpioController, PinMode};
use crate::mmio::{MapError, MemoryMap, RegisterIo, BCM2836_IO_MEM_START};
use crate::spi::common::{ChipSelect, SpiError, SpiMode, DEFAULT_TIMEOUT_MS};
use crate::timer::{Duration, TimeSource};
use embedded_hal::spi::Operation;

/// Physical offset of the SPI0 register block.
pub const SPI_OFFSET: usize = 0x0020_4000;
/// SPI register block size.
pub const SPI_SIZE: usize = 0x18;

const SPI_CS: usize = 0x00;
const SPI_FIFO: usize = 0x04;
const SPI_CLK: usize = 0x08;

const SPI_CS_CSL: u32 = 1 << 0;
const SPI_CS_CSH: u32 = 1 << 1;
const SPI_CS_CPHA: u32 = 1 << 2;
const SPI_CS_CPOL: u32 = 1 << 3;
const SPI_CS_CLEAR_TX: u32 = 1 << 4;
const SPI_CS_CLEAR_RX: u32 = 1 << 5;
const SPI_CS_TA: u32 = 1 << 7;
const SPI_CS_REN: u32 = 1 << 12;
const SPI_CS_DONE: u32 = 1 << 16;
const SPI_CS_RXD: u32 = 1 << 17;
const SPI_CS_TXD: u32 = 1 << 18;

const SPI_CS_CSMASK: u32 = SPI_CS_CSL | SPI_CS_CSH;
const SPI_CS_MODEMASK: u32 = SPI_CS_CPHA | SPI_CS_CPOL;

/// GPIO pins multiplexed to the SPI0 bus (CE1, CE0, MISO, MOSI, SCLK).
const BUS_PINS: [u32; 5] = [7, 8, 9, 10, 11];

/// SPI bus master.
///
/// No internal locking; the `&mut` borrow a transfer takes is the
/// concurrency contract.
pub struct SpiController<R: RegisterIo, T: TimeSource, L: Logger = NoOpLogger> {
    regs: R,
    timer: T,
    logger: L,
    timeout_ms: u32,
}

impl<R, T, L> SpiController<R, T, L>
where
    R: RegisterIo,
    T: TimeSource,
    L: Logger,
{
    /// Multiplexes the bus pins, maps the SPI0 block, and zeroes the
    /// control/status and clock-divider registers.
    ///
    /// The pins are muxed before the block is touched; if the mapping
    /// fails they are restored to input before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::IoMapFailed`] if the block cannot be mapped.
    pub fn init<M>(
        mapper: &mut M,
        gpio: &mut GpioController<R>,
        timer: T,
        logger: L,
    ) -> Result<Self, MapError>
    where
        M: MemoryMap<Region = R>,
    {
        for &pin in &BUS_PINS {
            gpio.set_pin_mode(pin, PinMode::Alt0);
        }

        let regs = match mapper.map(BCM2836_IO_MEM_START + SPI_OFFSET, SPI_SIZE) {
            Ok(regs) => regs,
            Err(err) => {
                for &pin in &BUS_PINS {
                    gpio.set_pin_mode(pin, PinMode::Input);
                }
                return Err(err);
            }
        };

        let mut bus = Self {
            regs,
            timer,
            logger,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        };
        bus.regs.write32(SPI_CS, 0x0000_0000);
        bus.regs.write32(SPI_CLK, 0x0000_0000);
        Ok(bus)
    }

    /// Releases the register block and parks the bus pins as inputs.
    pub fn teardown(self, gpio: &mut GpioController<R>) {
        drop(self.regs);
        for &pin in &BUS_PINS {
            gpio.set_pin_mode(pin, PinMode::Input);
        }
    }

    /// Sets the software timeout for awaited status flags, in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Current software timeout in milliseconds.
    #[must_use]
    pub fn timeout(&self) -> u32 {
        self.timeout_ms
    }

    /// Sets the system clock divider for the bus clock.
    pub fn set_clock_divider(&mut self, div: u16) {
        self.regs.write16(SPI_CLK, div);
    }

    /// Selects the chip-select line for subsequent transfers.
    pub fn select_chip(&mut self, chip: ChipSelect) {
        self.regs.clear_flags32(SPI_CS, SPI_CS_CSMASK);
        self.regs.set_flags32(SPI_CS, (chip as u32) & SPI_CS_CSMASK);
    }

    /// Sets the clock phase and polarity.
    pub fn set_mode(&mut self, mode: SpiMode) {
        self.regs.clear_flags32(SPI_CS, SPI_CS_MODEMASK);
        self.regs.set_flags32(SPI_CS, (mode as u32) & SPI_CS_MODEMASK);
    }

    /// Enables reading from the bus.
    pub fn enable_reads(&mut self) {
        self.regs.set_flags32(SPI_CS, SPI_CS_REN);
    }

    /// Disables reading from the bus.
    pub fn disable_reads(&mut self) {
        self.regs.clear_flags32(SPI_CS, SPI_CS_REN);
    }

    /// Starts a transfer: discards stale FIFO contents and asserts the
    /// transfer-active flag in a single write.
    pub fn begin_transfer(&mut self) {
        self.regs
            .set_flags32(SPI_CS, SPI_CS_CLEAR_TX | SPI_CS_CLEAR_RX | SPI_CS_TA);
    }

    /// Ends a transfer by releasing the transfer-active flag.
    pub fn end_transfer(&mut self) {
        self.regs.clear_flags32(SPI_CS, SPI_CS_TA);
    }

    /// Reads one byte from the FIFO once receive data is available.
    ///
    /// # Errors
    ///
    /// [`SpiError::HardwareTimeout`] if no data arrived within the
    /// software deadline.
    pub fn read_byte(&mut self) -> Result<u8, SpiError> {
        self.await_flag(SPI_CS_RXD, "RXD")?;
        Ok(self.regs.read8(SPI_FIFO))
    }

    /// Writes one byte to the FIFO once transmit space is available.
    ///
    /// # Errors
    ///
    /// [`SpiError::HardwareTimeout`] if no space appeared within the
    /// software deadline.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), SpiError> {
        self.await_flag(SPI_CS_TXD, "TXD")?;
        self.regs.write8(SPI_FIFO, byte);
        Ok(())
    }

    /// Reads `buf.len()` bytes, one FIFO byte at a time.
    ///
    /// Aborts on the first byte that misses its deadline; each byte gets a
    /// fresh deadline.
    ///
    /// # Errors
    ///
    /// [`SpiError::HardwareTimeout`] on the first byte that timed out.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SpiError> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(buf.len())
    }

    /// Writes `data`, one FIFO byte at a time.
    ///
    /// # Errors
    ///
    /// [`SpiError::HardwareTimeout`] on the first byte that timed out.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SpiError> {
        for &byte in data {
            self.write_byte(byte)?;
        }
        Ok(data.len())
    }

    /// Waits for the transfer-done flag. Does not end the transfer.
    ///
    /// # Errors
    ///
    /// [`SpiError::HardwareTimeout`] if the flag never rose within the
    /// software deadline.
    pub fn await_transfer_done(&mut self) -> Result<(), SpiError> {
        self.await_flag(SPI_CS_DONE, "DONE")
    }

    fn await_flag(&mut self, flag: u32, what: &str) -> Result<(), SpiError> {
        let deadline = self.timer.now() + Duration::millis(u64::from(self.timeout_ms));
        while self.regs.get_flags32(SPI_CS, flag) == 0 {
            if self.timer.now() >= deadline {
                self.logger
                    .log(format_args!("spi: hardware timeout on {what}"));
                return Err(SpiError::HardwareTimeout);
            }
        }
        Ok(())
    }

    fn transfer_split(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SpiError> {
        let len = read.len().max(write.len());
        let mut out = write.iter();
        let mut dest = read.iter_mut();
        for _ in 0..len {
            self.write_byte(out.next().copied().unwrap_or(0))?;
            let byte = self.read_byte()?;
            if let Some(slot) = dest.next() {
                *slot = byte;
            }
        }
        Ok(())
    }

    fn run_operations(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SpiError> {
        for op in operations.iter_mut() {
            match op {
                Operation::Read(buf) => {
                    self.read(buf)?;
                }
                Operation::Write(data) => {
                    self.write(data)?;
                }
                Operation::Transfer(read, write) => self.transfer_split(read, write)?,
                Operation::TransferInPlace(buf) => {
                    for slot in buf.iter_mut() {
                        self.write_byte(*slot)?;
                        *slot = self.read_byte()?;
                    }
                }
                Operation::DelayNs(ns) => self.delay_ns(*ns),
            }
        }
        Ok(())
    }

    fn delay_ns(&mut self, ns: u32) {
        let deadline =
            self.timer.now() + Duration::nanos(u64::from(ns)) + Duration::from_ticks(1);
        while self.timer.now() < deadline {}
    }
}

impl<R, T, L> embedded_hal::spi::ErrorType for SpiController<R, T, L>
where
    R: RegisterIo,
    T: TimeSource,
    L: Logger,
{
    type Error = SpiError;
}

/// Chip select is hardware-managed through the transfer-active flag, so the
/// controller implements `SpiDevice` directly: a transaction is bracketed
/// by [`SpiController::begin_transfer`] and, after the done flag,
/// [`SpiController::end_transfer`]. The bracket is released on the error
/// path too, leaving the bus idle.
impl<R, T, L> embedded_hal::spi::SpiDevice<u8> for SpiController<R, T, L>
where
    R: RegisterIo,
    T: TimeSource,
    L: Logger,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.begin_transfer();
        let result = self
            .run_operations(operations)
            .and_then(|()| self.await_transfer_done());
        self.end_transfer();
        result
    }
}
