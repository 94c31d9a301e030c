//! Display transmitter.

use std::fmt::{self, Debug};

use log::trace;
use mipsim_arch::mem::{Error, Memory, Result};
use mipsim_arch::{Block, Byte, Word};

use super::terminal::Sink;
use crate::parts::pic::{Irq, Line};

/// Control register interrupt-enable bit.
const IE: Byte = 0b10;

/// Two-register transmitter, memory-mapped UART style.
///
/// | Offset | Name    | Description                      |
/// |:------:|---------|----------------------------------|
/// | `+0`   | Control | READY (bit 0), IE (bit 1)        |
/// | `+4`   | Data    | Transmit character when READY    |
///
/// Writing data clears READY for the configured transmit delay; once the
/// delay elapses READY re-asserts and, with IE set, an interrupt fires.
pub struct Display {
    /// Interrupt line.
    int: Line,
    /// Transmit delay in cycles.
    delay: u32,
    /// Cycles remaining in the current transmission.
    busy: u32,
    /// Interrupt enable.
    ie: bool,
    /// Transmitted characters.
    sent: Vec<Byte>,
    /// Character sink.
    sink: Option<Sink>,
}

impl Display {
    /// Constructs a new `Display` with the given transmit delay in cycles.
    #[must_use]
    pub fn new(int: Line, delay: u32) -> Self {
        Self {
            int,
            delay,
            busy: 0,
            ie: false,
            sent: Vec::new(),
            sink: None,
        }
    }

    /// Attaches the character sink, invoked once per transmitted character.
    pub fn attach(&mut self, sink: Sink) {
        self.sink = Some(sink);
    }

    /// Checks whether the transmitter is ready.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.busy == 0
    }

    /// Gets the transmitted characters.
    #[must_use]
    pub fn sent(&self) -> &[Byte] {
        &self.sent
    }
}

impl Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("busy", &self.busy)
            .field("ie", &self.ie)
            .field("sent", &self.sent.len())
            .finish_non_exhaustive()
    }
}

impl Block for Display {
    fn ready(&self) -> bool {
        self.busy > 0
    }

    fn cycle(&mut self) {
        if self.busy == 0 {
            return;
        }
        self.busy -= 1;
        if self.busy == 0 {
            trace!("display transmit complete");
            if self.ie {
                self.int.raise(Irq::Display);
            }
        }
    }

    fn reset(&mut self) {
        self.busy = 0;
        self.ie = false;
        self.sent.clear();
    }
}

impl Memory for Display {
    fn read(&self, addr: Word) -> Result<Byte> {
        match addr {
            0 => Ok(Byte::from(self.ready()) | (Byte::from(self.ie) << 1)),
            1..=3 => Ok(0),
            4 => Ok(self.sent.last().copied().unwrap_or(0)),
            5..=7 => Ok(0),
            _ => Err(Error::Range),
        }
    }

    fn write(&mut self, addr: Word, data: Byte) -> Result<()> {
        match addr {
            0 => {
                // READY is read-only; only IE is writable.
                self.ie = data & IE != 0;
                Ok(())
            }
            1..=3 => Ok(()),
            4 => {
                if !self.ready() {
                    return Err(Error::Busy);
                }
                self.sent.push(data);
                if let Some(sink) = &mut self.sink {
                    sink(data);
                }
                self.busy = self.delay.max(1);
                Ok(())
            }
            5..=7 => Ok(()),
            _ => Err(Error::Range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::pic::{Pic, Request};

    fn setup(delay: u32) -> (Pic, Display) {
        let pic = Pic::new(0x8000_0180);
        let display = Display::new(pic.line(), delay);
        (pic, display)
    }

    #[test]
    fn transmit_clears_and_restores_ready() {
        let (_pic, mut display) = setup(2);
        assert_eq!(display.read(0).unwrap() & 1, 1);
        display.write(4, b'x').unwrap();
        assert_eq!(display.read(0).unwrap() & 1, 0);
        display.cycle();
        display.cycle();
        assert_eq!(display.read(0).unwrap() & 1, 1);
        assert_eq!(display.sent(), b"x");
    }

    #[test]
    fn write_while_busy_fails() {
        let (_pic, mut display) = setup(4);
        display.write(4, b'a').unwrap();
        assert!(matches!(display.write(4, b'b'), Err(Error::Busy)));
    }

    #[test]
    fn interrupt_fires_with_ie() {
        let (mut pic, mut display) = setup(1);
        display.write(0, IE).unwrap();
        display.write(4, b'x').unwrap();
        display.cycle();
        assert!(matches!(
            pic.pop(),
            Some(Request::Device { irq: Irq::Display })
        ));
    }
}
