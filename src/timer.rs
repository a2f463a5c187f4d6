// Licensed under the Apache-2.0 license

//! Monotonic time for transfer deadlines.
//!
//! The bus controllers compute one deadline per awaited condition and
//! compare it against [`TimeSource::now`] on every poll iteration. The
//! hardware implementation reads the SoC's free-running 1 MHz system timer;
//! tests substitute a deterministic clock.

use crate::mmio::MapError;
use core::ptr::read_volatile;

/// One tick per microsecond, the system timer's native rate.
pub type Instant = fugit::TimerInstantU64<1_000_000>;
/// Duration in the same timebase as [`Instant`].
pub type Duration = fugit::TimerDurationU64<1_000_000>;

/// Source of monotonic time for await-loop deadlines.
pub trait TimeSource {
    /// Current instant. Must never go backwards.
    fn now(&self) -> Instant;
}

/// Physical offset of the system timer block.
pub const ST_OFFSET: usize = 0x0000_3000;
/// System timer register block size.
pub const ST_SIZE: usize = 0x1C;

const ST_CLO: usize = 0x04;
const ST_CHI: usize = 0x08;

/// The BCM2836 free-running system timer.
///
/// The counter is read-only shared hardware, so the handle is `Copy` and a
/// single timer serves every bus controller.
#[derive(Copy, Clone, Debug)]
pub struct SystemTimer {
    base: *const u8,
}

impl SystemTimer {
    /// Wraps the system timer block mapped at `base`.
    ///
    /// Fails with [`MapError::IoMapFailed`] if `base` is null.
    ///
    /// # Safety
    ///
    /// `base` must address the mapped system timer register block.
    pub unsafe fn new(base: usize) -> Result<Self, MapError> {
        if base == 0 {
            return Err(MapError::IoMapFailed);
        }
        Ok(Self {
            base: base as *const u8,
        })
    }

    fn counter(&self) -> u64 {
        // CHI and CLO cannot be read atomically; re-read CHI to detect a
        // carry between the two loads.
        loop {
            let hi = unsafe { read_volatile(self.base.add(ST_CHI).cast::<u32>()) };
            let lo = unsafe { read_volatile(self.base.add(ST_CLO).cast::<u32>()) };
            let check = unsafe { read_volatile(self.base.add(ST_CHI).cast::<u32>()) };
            if hi == check {
                return (u64::from(hi) << 32) | u64::from(lo);
            }
        }
    }
}

impl TimeSource for SystemTimer {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.counter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(4))]
    struct TimerBlock([u32; 7]);

    #[test]
    fn test_system_timer_combines_counter_halves() {
        let block = TimerBlock([0, 0x8000_0001, 0x0000_0002, 0, 0, 0, 0]);
        let timer = unsafe { SystemTimer::new(core::ptr::addr_of!(block) as usize) }.unwrap();

        assert_eq!(timer.now(), Instant::from_ticks(0x0000_0002_8000_0001));
    }

    #[test]
    fn test_system_timer_null_base_fails() {
        assert_eq!(
            unsafe { SystemTimer::new(0) }.unwrap_err(),
            MapError::IoMapFailed
        );
    }

    #[test]
    fn test_deadline_arithmetic() {
        let start = Instant::from_ticks(0);
        assert_eq!(start + Duration::millis(5), Instant::from_ticks(5_000));
    }
}
