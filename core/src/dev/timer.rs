//! Timer and real-time clock devices.

use std::cell::Cell;

use log::trace;
use mipsim_arch::mem::{Error, Memory, Result};
use mipsim_arch::{Block, Byte, Shared, Word};

use crate::parts::pic::{Irq, Line};

/// Millisecond counter shared between the clock devices and the syscall
/// layer.
pub type Clock = Shared<u64>;

/// Interval timer.
///
/// | Offset | Name     | Description                          |
/// |:------:|----------|--------------------------------------|
/// | `+0`   | Ticks    | Cycles elapsed since reset           |
/// | `+4`   | Interval | Cycles between interrupts (0 = off)  |
///
/// Driven by the simulation cycle rather than wall time: each [`cycle`]
/// advances one tick, and every elapsed interval raises an interrupt.
///
/// [`cycle`]: Block::cycle
#[derive(Debug)]
pub struct Timer {
    /// Interrupt line.
    int: Line,
    /// Elapsed ticks.
    ticks: u32,
    /// Interrupt interval in ticks.
    interval: u32,
}

impl Timer {
    /// Constructs a new `Timer`.
    #[must_use]
    pub fn new(int: Line) -> Self {
        Self {
            int,
            ticks: 0,
            interval: 0,
        }
    }

    /// Programs the interrupt interval; zero disables interrupts.
    pub fn set_interval_ms(&mut self, interval: u32) {
        self.interval = interval;
    }

    /// Gets the elapsed tick count.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}

impl Block for Timer {
    fn cycle(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        if self.interval != 0 && self.ticks % self.interval == 0 {
            trace!("timer deadline elapsed at tick {}", self.ticks);
            self.int.raise(Irq::Timer);
        }
    }

    fn reset(&mut self) {
        self.ticks = 0;
        self.interval = 0;
    }
}

impl Memory for Timer {
    fn read(&self, addr: Word) -> Result<Byte> {
        let word = match addr {
            0..=3 => self.ticks,
            4..=7 => self.interval,
            _ => return Err(Error::Range),
        };
        Ok(word.to_le_bytes()[(addr % 4) as usize])
    }

    fn write(&mut self, addr: Word, data: Byte) -> Result<()> {
        match addr {
            0..=3 => Err(Error::Misuse),
            4..=7 => {
                let mut bytes = self.interval.to_le_bytes();
                bytes[(addr % 4) as usize] = data;
                self.interval = u32::from_le_bytes(bytes);
                Ok(())
            }
            _ => Err(Error::Range),
        }
    }
}

/// Real-time clock.
///
/// Two read-only registers forming a 64-bit millisecond value: low word at
/// `+0`, high word at `+4`. The value comes from the shared simulation
/// [`Clock`], not the host.
#[derive(Debug)]
pub struct Rtc {
    /// Millisecond source.
    clock: Clock,
    /// Latched value, captured when the low word's first byte is read.
    latch: Cell<u64>,
}

impl Rtc {
    /// Constructs a new `Rtc` over the shared clock.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            latch: Cell::new(0),
        }
    }
}

impl Memory for Rtc {
    fn read(&self, addr: Word) -> Result<Byte> {
        // Latch the full value on the first byte so a two-word read is
        // coherent.
        if addr == 0 {
            self.latch.set(*self.clock.borrow());
        }
        match addr {
            0..=7 => Ok(self.latch.get().to_le_bytes()[addr as usize]),
            _ => Err(Error::Range),
        }
    }

    fn write(&mut self, _: Word, _: Byte) -> Result<()> {
        Err(Error::Misuse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::pic::{Pic, Request};

    #[test]
    fn timer_fires_on_interval() {
        let mut pic = Pic::new(0x8000_0180);
        let mut timer = Timer::new(pic.line());
        timer.set_interval_ms(3);
        for _ in 0..6 {
            timer.cycle();
        }
        assert!(matches!(pic.pop(), Some(Request::Device { irq: Irq::Timer })));
        assert!(matches!(pic.pop(), Some(Request::Device { irq: Irq::Timer })));
        assert_eq!(pic.pop(), None);
    }

    #[test]
    fn timer_interval_is_writable() {
        let pic = Pic::new(0x8000_0180);
        let mut timer = Timer::new(pic.line());
        timer.write(4, 10).unwrap();
        assert_eq!(timer.interval, 10);
        assert!(matches!(timer.write(0, 1), Err(Error::Misuse)));
    }

    #[test]
    fn rtc_reads_latched_value() {
        let clock = Clock::new(0x1_0000_0001);
        let rtc = Rtc::new(clock.clone());
        assert_eq!(rtc.read(0), Ok(1));
        *clock.borrow_mut() = 99;
        // Remaining bytes come from the latch.
        assert_eq!(rtc.read(4), Ok(1));
        assert!(matches!(rtc.read(8), Err(Error::Range)));
    }
}
