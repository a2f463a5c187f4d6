// Licensed under the Apache-2.0 license

//! Bring-up and teardown sequencing for the whole peripheral stack.

use crate::common::Logger;
use crate::gpio::GpioController;
use crate::i2c::I2cController;
use crate::mmio::{MapError, MemoryMap, RegisterIo};
use crate::spi::SpiController;
use crate::timer::TimeSource;

/// The initialized peripheral stack.
///
/// Bring-up order is pin controller, SPI, then I2C; teardown runs in
/// reverse. A failed bring-up tears down whatever was already initialized
/// before reporting the first error, so no pins or register blocks are
/// left claimed.
pub struct Peripherals<R: RegisterIo, T: TimeSource, L: Logger> {
    pub gpio: GpioController<R>,
    pub spi: SpiController<R, T, L>,
    pub i2c: I2cController<R, T, L>,
}

impl<R, T, L> Peripherals<R, T, L>
where
    R: RegisterIo,
    T: TimeSource + Clone,
    L: Logger + Clone,
{
    /// Brings up the full stack.
    ///
    /// # Errors
    ///
    /// Propagates the first [`MapError`] from a component init.
    pub fn init<M>(mapper: &mut M, timer: T, logger: L) -> Result<Self, MapError>
    where
        M: MemoryMap<Region = R>,
    {
        let mut gpio = GpioController::init(mapper)?;

        let spi = match SpiController::init(mapper, &mut gpio, timer.clone(), logger.clone()) {
            Ok(spi) => spi,
            Err(err) => {
                gpio.teardown();
                return Err(err);
            }
        };

        let i2c = match I2cController::init(mapper, &mut gpio, timer, logger) {
            Ok(i2c) => i2c,
            Err(err) => {
                spi.teardown(&mut gpio);
                gpio.teardown();
                return Err(err);
            }
        };

        Ok(Self { gpio, spi, i2c })
    }

    /// Tears the stack down in reverse bring-up order.
    pub fn shutdown(self) {
        let Self { mut gpio, spi, i2c } = self;
        i2c.teardown(&mut gpio);
        spi.teardown(&mut gpio);
        gpio.teardown();
    }
}
