// Licensed under the Apache-2.0 license

//! Register-level driver for the BCM2836 BSC1 controller.
//!
//! Every transfer is a synchronous polling state machine: the control
//! register starts the transaction, the status register is busy-polled for
//! the transfer-active, FIFO, and done flags, and a software deadline
//! bounds each wait. The bus enable flag is cleared on every exit path so
//! the controller is left idle after success and failure alike.

use crate::common::{Logger, NoOpLogger};
use crate::gpio::{GpioController, PinMode};
use crate::i2c::common::{I2cError, DEFAULT_TIMEOUT_MS};
use crate::mmio::{MapError, MemoryMap, RegisterIo, BCM2836_IO_MEM_START};
use crate::timer::{Duration, TimeSource};

/// Physical offset of the BSC1 register block.
pub const I2C1_OFFSET: usize = 0x0080_4000;
/// BSC register block size.
pub const I2C_SIZE: usize = 0x20;

const I2C_C: usize = 0x00;
const I2C_S: usize = 0x04;
const I2C_DLEN: usize = 0x08;
const I2C_A: usize = 0x0C;
const I2C_FIFO: usize = 0x10;
const I2C_DIV: usize = 0x14;
const I2C_DEL: usize = 0x18;
const I2C_CLKT: usize = 0x1C;

const I2C_C_READ: u32 = 1 << 0;
const I2C_C_CLEARL: u32 = 1 << 4;
const I2C_C_CLEARH: u32 = 1 << 5;
const I2C_C_ST: u32 = 1 << 7;
const I2C_C_EN: u32 = 1 << 15;

const I2C_S_TA: u32 = 1 << 0;
const I2C_S_DONE: u32 = 1 << 1;
const I2C_S_TXD: u32 = 1 << 4;
const I2C_S_RXD: u32 = 1 << 5;
const I2C_S_ERR: u32 = 1 << 8;
const I2C_S_CLKT: u32 = 1 << 9;

const I2C_DEL_REDL_OFF: u32 = 0;
const I2C_DEL_FEDL_OFF: u32 = 16;

/// GPIO pins multiplexed to the BSC1 bus (SDA, SCL).
const BUS_PINS: [u32; 2] = [2, 3];

/// BSC (I2C) bus master.
///
/// The controller provides no internal locking; the single `&mut` borrow a
/// transfer takes is the concurrency contract, so at most one transaction
/// is in flight per bus.
pub struct I2cController<R: RegisterIo, T: TimeSource, L: Logger = NoOpLogger> {
    regs: R,
    timer: T,
    logger: L,
    timeout_ms: u32,
}

impl<R, T, L> I2cController<R, T, L>
where
    R: RegisterIo,
    T: TimeSource,
    L: Logger,
{
    /// Multiplexes the bus pins, maps the BSC1 block, and programs the
    /// defaults: bus disabled, divider 0x5DC, data delays 0x30/0x30, clock
    /// timeout 0x40.
    ///
    /// The pins are muxed before the block is touched; if the mapping
    /// fails they are restored to input before the error is returned, so a
    /// failed init leaves nothing reconfigured.
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

        let regs = match mapper.map(BCM2836_IO_MEM_START + I2C1_OFFSET, I2C_SIZE) {
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
        bus.regs.write32(I2C_C, 0x0000_0000);
        bus.regs.write32(I2C_DIV, 0x0000_05DC);
        bus.regs.write32(I2C_DEL, 0x0030_0030);
        bus.regs.write32(I2C_CLKT, 0x0000_0040);
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

    /// Programs the bus clock divider and the derived data-delay register.
    ///
    /// The falling and rising edge delays track the divider (`div >> 4`
    /// and `div >> 2`, floored at one) so the data setup margins stay
    /// valid across divider changes.
    pub fn set_clock_divider(&mut self, div: u16) {
        self.regs.write16(I2C_DIV, div);

        let fedl = u32::from((div >> 4).max(1));
        let redl = u32::from((div >> 2).max(1));
        self.regs
            .write32(I2C_DEL, (fedl << I2C_DEL_FEDL_OFF) | (redl << I2C_DEL_REDL_OFF));
    }

    /// Sets the 7-bit slave address for subsequent transfers.
    pub fn set_address(&mut self, addr: u8) {
        self.regs.write8(I2C_A, addr & 0x7F);
    }

    /// Reads up to `buf.len()` bytes of device register `reg`.
    ///
    /// Two-phase transaction: a one-byte write of the register id, then a
    /// read of the payload. Returns the number of bytes actually read,
    /// which is short of `buf.len()` if the hardware finished the transfer
    /// early. On error the transfer is aborted and the buffer contents
    /// beyond the bytes already copied are unspecified.
    ///
    /// # Errors
    ///
    /// [`I2cError::NoResponse`] if the hardware error flag rises,
    /// [`I2cError::ClockTimeout`] if the slave stretched the clock past the
    /// bus clock-timeout register, [`I2cError::HardwareTimeout`] if an
    /// awaited flag never appeared within the software deadline.
    pub fn read_register(&mut self, reg: u8, buf: &mut [u8]) -> Result<usize, I2cError> {
        let result = self.read_register_inner(reg, buf);
        self.regs.clear_flags32(I2C_C, I2C_C_EN);
        result
    }

    fn read_register_inner(&mut self, reg: u8, buf: &mut [u8]) -> Result<usize, I2cError> {
        self.start_transaction();

        // One-byte write transfer carrying the register id.
        self.regs.write16(I2C_DLEN, 1);
        self.regs.clear_flags32(I2C_C, I2C_C_READ);
        self.regs.set_flags32(I2C_C, I2C_C_ST);
        self.await_flags(I2C_S, I2C_S_TA)?;
        self.await_flags(I2C_S, I2C_S_TXD)?;
        self.regs.write8(I2C_FIFO, reg);
        self.await_flags(I2C_S, I2C_S_DONE)?;

        // Read transfer for the register payload.
        self.regs.write16(I2C_DLEN, buf.len() as u16);
        self.regs.set_flags32(I2C_C, I2C_C_ST | I2C_C_READ);
        self.await_flags(I2C_S, I2C_S_TA)?;
        self.drain_rx(buf)
    }

    /// Reads up to `buf.len()` bytes as a direct read transaction.
    ///
    /// Returns the number of bytes actually read; see
    /// [`read_register`](Self::read_register) for the error behavior.
    ///
    /// # Errors
    ///
    /// Same as [`read_register`](Self::read_register).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, I2cError> {
        let result = self.read_inner(buf);
        self.regs.clear_flags32(I2C_C, I2C_C_EN);
        result
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize, I2cError> {
        self.start_transaction();

        self.regs.write16(I2C_DLEN, buf.len() as u16);
        self.regs.set_flags32(I2C_C, I2C_C_ST | I2C_C_READ);
        self.await_flags(I2C_S, I2C_S_TA)?;
        self.drain_rx(buf)
    }

    /// Writes `data`, returning the number of bytes the bus accepted.
    ///
    /// The count is short of `data.len()` if the hardware signalled done
    /// early.
    ///
    /// # Errors
    ///
    /// Same as [`read_register`](Self::read_register).
    pub fn write(&mut self, data: &[u8]) -> Result<usize, I2cError> {
        let result = self.write_inner(data);
        self.regs.clear_flags32(I2C_C, I2C_C_EN);
        result
    }

    fn write_inner(&mut self, data: &[u8]) -> Result<usize, I2cError> {
        self.start_transaction();

        self.regs.write16(I2C_DLEN, data.len() as u16);
        self.regs.set_flags32(I2C_C, I2C_C_ST);
        self.await_flags(I2C_S, I2C_S_TA)?;

        let mut count = 0;
        for &byte in data {
            if self.regs.get_flags32(I2C_S, I2C_S_DONE) != 0 {
                break;
            }
            self.await_flags(I2C_S, I2C_S_TXD)?;
            self.regs.write8(I2C_FIFO, byte);
            count += 1;
        }
        Ok(count)
    }

    /// Resets latched status, flushes the FIFO, and enables the bus.
    fn start_transaction(&mut self) {
        self.regs
            .set_flags32(I2C_S, I2C_S_DONE | I2C_S_ERR | I2C_S_CLKT);
        self.regs
            .set_flags32(I2C_C, I2C_C_CLEARL | I2C_C_CLEARH | I2C_C_EN);
    }

    fn drain_rx(&mut self, buf: &mut [u8]) -> Result<usize, I2cError> {
        let mut count = 0;
        for slot in buf.iter_mut() {
            if self.regs.get_flags32(I2C_S, I2C_S_DONE) != 0 {
                break;
            }
            self.await_flags(I2C_S, I2C_S_RXD)?;
            *slot = self.regs.read8(I2C_FIFO);
            count += 1;
        }
        Ok(count)
    }

    /// Polls `reg` until one of `flags` rises.
    ///
    /// Each iteration checks, in priority order, the hardware error flag,
    /// the clock-stretch timeout flag, and the software deadline. The
    /// deadline is computed once on entry.
    fn await_flags(&mut self, reg: usize, flags: u32) -> Result<(), I2cError> {
        let deadline = self.timer.now() + Duration::millis(u64::from(self.timeout_ms));
        while self.regs.get_flags32(reg, flags) == 0 {
            if self.regs.get_flags32(I2C_S, I2C_S_ERR) != 0 {
                self.logger
                    .log(format_args!("i2c: no response from addressed device"));
                return Err(I2cError::NoResponse);
            }
            if self.regs.get_flags32(I2C_S, I2C_S_CLKT) != 0 {
                self.logger.log(format_args!("i2c: clock stretch timeout"));
                return Err(I2cError::ClockTimeout);
            }
            if self.timer.now() >= deadline {
                self.logger
                    .log(format_args!("i2c: hardware timeout awaiting status"));
                return Err(I2cError::HardwareTimeout);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fsel_field, MockClock, MockMap, RecordingLogger, SharedRegion};
    use hex_literal::hex;

    const ALL: u32 = 0xFFFF_FFFF;
    const I2C1_PHYS: usize = BCM2836_IO_MEM_START + I2C1_OFFSET;

    fn controller(
        region: &SharedRegion,
        clock: &MockClock,
    ) -> I2cController<SharedRegion, MockClock, RecordingLogger> {
        I2cController {
            regs: region.clone(),
            timer: clock.clone(),
            logger: RecordingLogger::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    #[test]
    fn test_init_muxes_pins_and_programs_defaults() {
        let mut mapper = MockMap::new();
        let gpio_region = SharedRegion::new_gpio();
        mapper.insert(BCM2836_IO_MEM_START + crate::gpio::GPIO_OFFSET, gpio_region.clone());
        let i2c_region = SharedRegion::new();
        mapper.insert(I2C1_PHYS, i2c_region.clone());

        let mut gpio = GpioController::init(&mut mapper).unwrap();
        let i2c = I2cController::init(&mut mapper, &mut gpio, MockClock::new(1), NoOpLogger)
            .unwrap();

        assert_eq!(fsel_field(&gpio_region, 2), PinMode::Alt0 as u32);
        assert_eq!(fsel_field(&gpio_region, 3), PinMode::Alt0 as u32);
        assert_eq!(
            i2c_region.writes(),
            vec![
                (I2C_C, 0x0000_0000),
                (I2C_DIV, 0x0000_05DC),
                (I2C_DEL, 0x0030_0030),
                (I2C_CLKT, 0x0000_0040),
            ]
        );

        i2c.teardown(&mut gpio);
        assert_eq!(fsel_field(&gpio_region, 2), PinMode::Input as u32);
        assert_eq!(fsel_field(&gpio_region, 3), PinMode::Input as u32);
    }

    #[test]
    fn test_init_map_failure_restores_pins() {
        let mut mapper = MockMap::new();
        let gpio_region = SharedRegion::new_gpio();
        mapper.insert(BCM2836_IO_MEM_START + crate::gpio::GPIO_OFFSET, gpio_region.clone());
        mapper.fail_at(I2C1_PHYS);

        let mut gpio = GpioController::init(&mut mapper).unwrap();
        let err = I2cController::init(&mut mapper, &mut gpio, MockClock::new(1), NoOpLogger)
            .err();

        assert_eq!(err, Some(MapError::IoMapFailed));
        assert_eq!(fsel_field(&gpio_region, 2), PinMode::Input as u32);
        assert_eq!(fsel_field(&gpio_region, 3), PinMode::Input as u32);
    }

    #[test]
    fn test_set_clock_divider_derives_delays() {
        let region = SharedRegion::new();
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        // Small dividers hit the floor on both delay fields.
        for div in [0u16, 1, 2, 3] {
            i2c.set_clock_divider(div);
            assert_eq!(region.mem(I2C_DEL), 0x0001_0001, "div={div}");
        }

        i2c.set_clock_divider(0x40);
        assert_eq!(region.mem(I2C_DEL), (0x4 << 16) | 0x10);

        i2c.set_clock_divider(0xFFFF);
        assert_eq!(region.mem(I2C_DEL), (0x0FFF << 16) | 0x3FFF);
        assert_eq!(region.writes_to(I2C_DIV).last(), Some(&0xFFFF));
    }

    #[test]
    fn test_set_address_masks_to_seven_bits() {
        let region = SharedRegion::new();
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        i2c.set_address(0xAB);
        assert_eq!(region.writes_to(I2C_A), vec![0x2B]);
    }

    #[test]
    fn test_write_happy_path() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |_| I2C_S_TA | I2C_S_TXD);
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        let data = hex!("DE AD BE");
        assert_eq!(i2c.write(&data), Ok(3));

        assert_eq!(region.writes_to(I2C_FIFO), vec![0xDE, 0xAD, 0xBE]);
        assert_eq!(region.writes_to(I2C_DLEN), vec![3]);
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_write_stops_on_early_done() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| match n {
            0 => 0,
            1 => I2C_S_TA,
            2 => 0,
            3 => I2C_S_TXD,
            _ => I2C_S_DONE,
        });
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        assert_eq!(i2c.write(&hex!("11 22 33")), Ok(1));
        assert_eq!(region.writes_to(I2C_FIFO), vec![0x11]);
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_write_times_out_after_deadline() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |_| 0);
        let clock = MockClock::new(1_000);
        let mut i2c = controller(&region, &clock);

        assert_eq!(i2c.write(&[0x55]), Err(I2cError::HardwareTimeout));

        // The loop gave up roughly at the configured 1000 ms deadline.
        assert!((1_000_000..=1_010_000).contains(&clock.elapsed_us()));
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_error_flag_aborts_without_waiting() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| if n >= 2 { I2C_S_ERR } else { 0 });
        let clock = MockClock::new(1_000);
        let mut i2c = controller(&region, &clock);

        let mut buf = [0u8; 4];
        assert_eq!(i2c.read(&mut buf), Err(I2cError::NoResponse));
        assert!(clock.elapsed_us() < 10_000);
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_clock_stretch_flag_reports_clock_timeout() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| if n >= 3 { I2C_S_CLKT } else { 0 });
        let clock = MockClock::new(1_000);
        let mut i2c = controller(&region, &clock);

        let mut buf = [0u8; 1];
        assert_eq!(i2c.read(&mut buf), Err(I2cError::ClockTimeout));
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_read_happy_path() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| match n {
            0 => 0,
            1 => I2C_S_TA,
            n if n % 2 == 1 => I2C_S_RXD,
            _ => 0,
        });
        region.set_status(I2C_FIFO, ALL, |n| [0xAA, 0xBB, 0xCC][n as usize]);
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        let mut buf = [0u8; 3];
        assert_eq!(i2c.read(&mut buf), Ok(3));
        assert_eq!(buf, hex!("AA BB CC"));
        assert!(region
            .writes_to(I2C_C)
            .iter()
            .any(|v| v & (I2C_C_ST | I2C_C_READ) == (I2C_C_ST | I2C_C_READ)));
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_read_returns_short_count_on_early_done() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| match n {
            0 => 0,
            1 => I2C_S_TA,
            2 => 0,
            3 => I2C_S_RXD,
            _ => I2C_S_DONE,
        });
        region.set_status(I2C_FIFO, ALL, |_| 0x42);
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        let mut buf = [0u8; 3];
        assert_eq!(i2c.read(&mut buf), Ok(1));
        assert_eq!(buf[0], 0x42);
    }

    #[test]
    fn test_read_register_runs_two_phases() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| match n {
            0 => 0,
            1 => I2C_S_TA,
            2 => I2C_S_TXD,
            3 => I2C_S_DONE,
            4 => I2C_S_TA,
            5 | 7 => 0,
            6 | 8 => I2C_S_RXD,
            _ => 0,
        });
        region.set_status(I2C_FIFO, ALL, |n| [0x12, 0x34][n as usize]);
        let clock = MockClock::new(1);
        let mut i2c = controller(&region, &clock);

        let mut buf = [0u8; 2];
        assert_eq!(i2c.read_register(0x0F, &mut buf), Ok(2));
        assert_eq!(buf, hex!("12 34"));

        // Phase one wrote the register id as a one-byte transfer, phase two
        // restarted with the payload length and the read flag.
        assert_eq!(region.writes_to(I2C_DLEN), vec![1, 2]);
        assert_eq!(region.writes_to(I2C_FIFO), vec![0x0F]);
        assert!(region
            .writes_to(I2C_C)
            .iter()
            .any(|v| v & (I2C_C_ST | I2C_C_READ) == (I2C_C_ST | I2C_C_READ)));
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_read_register_aborts_when_first_phase_times_out() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |_| 0);
        let clock = MockClock::new(1_000);
        let mut i2c = controller(&region, &clock);
        i2c.set_timeout(10);

        let mut buf = [0u8; 2];
        assert_eq!(i2c.read_register(0x0F, &mut buf), Err(I2cError::HardwareTimeout));
        assert!(clock.elapsed_us() < 50_000);
        assert_eq!(region.writes_to(I2C_FIFO), Vec::<u32>::new());
        assert_eq!(region.mem(I2C_C) & I2C_C_EN, 0);
    }

    #[test]
    fn test_timeout_is_tunable() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |_| 0);
        let clock = MockClock::new(1_000);
        let mut i2c = controller(&region, &clock);

        i2c.set_timeout(10);
        assert_eq!(i2c.timeout(), 10);
        assert_eq!(i2c.write(&[0x00]), Err(I2cError::HardwareTimeout));
        assert!(clock.elapsed_us() < 50_000);
    }

    #[test]
    fn test_error_paths_are_logged() {
        let region = SharedRegion::new();
        region.set_status(I2C_S, ALL, |n| if n >= 2 { I2C_S_ERR } else { 0 });
        let clock = MockClock::new(1);
        let logger = RecordingLogger::new();
        let mut i2c = I2cController {
            regs: region.clone(),
            timer: clock.clone(),
            logger: logger.clone(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        };

        let mut buf = [0u8; 1];
        assert_eq!(i2c.read(&mut buf), Err(I2cError::NoResponse));
        assert!(logger.lines().iter().any(|l| l.contains("no response")));
    }
}
