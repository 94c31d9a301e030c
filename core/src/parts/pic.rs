//! Interrupt handling.
//!
//! A single FIFO of pending requests: syscalls raised by the executor,
//! architectural exceptions, and device interrupts. Devices hold a cloned
//! [`Line`] onto the queue, so raising never requires a back-reference to
//! the controller itself.

use std::collections::VecDeque;
use std::fmt::Display;

use log::trace;
use mipsim_arch::{Shared, Word};
use thiserror::Error;

/// Offset of the exception handler entry within the kernel text segment.
pub const HANDLER_OFFSET: Word = 0x180;

/// An architectural exception.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Exception {
    /// Signed overflow in `add`, `addi`, or `sub`.
    #[error("arithmetic overflow at {pc:#010x}")]
    ArithmeticOverflow {
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// Misaligned halfword or word access.
    #[error("address error at {pc:#010x}: misaligned access to {addr:#010x}")]
    AddressError {
        /// Faulting data address.
        addr: Word,
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// Unmapped or read-only address.
    #[error("bus error at {pc:#010x}: access to {addr:#010x}")]
    BusError {
        /// Faulting data address.
        addr: Word,
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// Device refused the access.
    #[error("device not ready at {pc:#010x}: access to {addr:#010x}")]
    DeviceNotReady {
        /// Faulting device address.
        addr: Word,
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// Undecodable instruction word.
    #[error("illegal instruction {word:#010x} at {pc:#010x}")]
    IllegalInstruction {
        /// The offending word.
        word: Word,
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// Division by zero outside the integer unit.
    #[error("divide by zero at {pc:#010x}")]
    DivideByZero {
        /// PC of the faulting instruction.
        pc: Word,
    },
    /// `break` instruction.
    #[error("breakpoint trap {code} at {pc:#010x}")]
    Breakpoint {
        /// The instruction's code field.
        code: u32,
        /// PC of the trapping instruction.
        pc: Word,
    },
}

impl Exception {
    /// Returns the PC at which the exception was raised.
    #[must_use]
    pub fn pc(&self) -> Word {
        match *self {
            Self::ArithmeticOverflow { pc }
            | Self::AddressError { pc, .. }
            | Self::BusError { pc, .. }
            | Self::DeviceNotReady { pc, .. }
            | Self::IllegalInstruction { pc, .. }
            | Self::DivideByZero { pc }
            | Self::Breakpoint { pc, .. } => pc,
        }
    }
}

/// Interrupt-capable device sources.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Irq {
    /// Display transmitter became ready.
    Display,
    /// Keyboard enqueued input.
    Keyboard,
    /// Timer deadline elapsed.
    Timer,
}

impl Display for Irq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Display => "display",
            Self::Keyboard => "keyboard",
            Self::Timer => "timer",
        })
    }
}

/// A pending interrupt request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Request {
    /// `syscall` executed.
    Syscall {
        /// Service code from `$v0`.
        code: u32,
        /// PC of the `syscall` instruction.
        pc: Word,
    },
    /// An architectural exception.
    Exception(Exception),
    /// A device raised its line.
    Device {
        /// Originating device.
        irq: Irq,
    },
}

/// Programmable interrupt controller.
#[derive(Debug)]
pub struct Pic {
    /// Pending request queue, shared with device lines.
    queue: Shared<VecDeque<Request>>,
    /// Exception handler entry point.
    handler: Word,
    /// Whether kernel text was loaded at the handler address.
    installed: bool,
    /// Saved context PC from the most recent handler dispatch.
    pub epc: Option<Word>,
}

impl Pic {
    /// Constructs a new `Pic` with its handler at the given address.
    #[must_use]
    pub fn new(handler: Word) -> Self {
        Self {
            queue: Shared::new(VecDeque::new()),
            handler,
            installed: false,
            epc: None,
        }
    }

    /// Gets a raise-only handle onto the pending queue.
    #[must_use]
    pub fn line(&self) -> Line {
        Line(self.queue.clone())
    }

    /// Gets the exception handler address.
    #[must_use]
    pub fn handler(&self) -> Word {
        self.handler
    }

    /// Marks whether a handler is installed at the handler address.
    pub fn install(&mut self, installed: bool) {
        self.installed = installed;
    }

    /// Checks whether a handler is installed.
    #[must_use]
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Enqueues a syscall request.
    pub fn request_syscall_interrupt(&mut self, code: u32, pc: Word) {
        trace!("syscall {code} requested at {pc:#010x}");
        self.queue.borrow_mut().push_back(Request::Syscall { code, pc });
    }

    /// Enqueues an exception.
    pub fn raise(&mut self, exception: Exception) {
        trace!("exception raised: {exception}");
        self.queue.borrow_mut().push_back(Request::Exception(exception));
    }

    /// Checks whether any request is pending.
    #[must_use]
    pub fn pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Dequeues the oldest pending request.
    pub fn pop(&mut self) -> Option<Request> {
        self.queue.borrow_mut().pop_front()
    }

    /// Drops all pending requests and saved context.
    pub fn clear(&mut self) {
        self.queue.borrow_mut().clear();
        self.epc = None;
    }
}

/// Raise-only handle for devices.
///
/// Holds the queue, not the controller, so device ownership stays acyclic.
#[derive(Clone, Debug)]
pub struct Line(Shared<VecDeque<Request>>);

impl Line {
    /// Raises a device interrupt.
    pub fn raise(&self, irq: Irq) {
        trace!("interrupt requested: {irq}");
        self.0.borrow_mut().push_back(Request::Device { irq });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let mut pic = Pic::new(0x8000_0180);
        pic.request_syscall_interrupt(1, 0x0040_0000);
        pic.raise(Exception::DivideByZero { pc: 0x0040_0004 });
        assert!(pic.pending());
        assert!(matches!(pic.pop(), Some(Request::Syscall { code: 1, .. })));
        assert!(matches!(pic.pop(), Some(Request::Exception(_))));
        assert_eq!(pic.pop(), None);
    }

    #[test]
    fn line_reaches_queue() {
        let mut pic = Pic::new(0x8000_0180);
        let line = pic.line();
        line.raise(Irq::Timer);
        assert!(matches!(
            pic.pop(),
            Some(Request::Device { irq: Irq::Timer })
        ));
    }

    #[test]
    fn clear_drops_requests() {
        let mut pic = Pic::new(0x8000_0180);
        pic.line().raise(Irq::Keyboard);
        pic.epc = Some(4);
        pic.clear();
        assert!(!pic.pending());
        assert_eq!(pic.epc, None);
    }
}
