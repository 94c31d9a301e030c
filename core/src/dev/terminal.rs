//! Terminal output device.

use std::fmt::{self, Debug};

use mipsim_arch::mem::{Error, Memory, Result};
use mipsim_arch::{Byte, Word};

/// Character sink callback.
pub type Sink = Box<dyn FnMut(Byte)>;

/// Terminal device.
///
/// Absorbs characters written to offset 0, forwarding each to the attached
/// sink. The full output is also kept in a log for test inspection.
#[derive(Default)]
pub struct Terminal {
    /// Character sink.
    sink: Option<Sink>,
    /// Everything ever written.
    log: Vec<Byte>,
}

impl Terminal {
    /// Constructs a new `Terminal`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the character sink.
    pub fn attach(&mut self, sink: Sink) {
        self.sink = Some(sink);
    }

    /// Absorbs one character.
    pub fn put(&mut self, ch: Byte) {
        self.log.push(ch);
        if let Some(sink) = &mut self.sink {
            sink(ch);
        }
    }

    /// Gets the output log as raw bytes.
    #[must_use]
    pub fn log(&self) -> &[Byte] {
        &self.log
    }

    /// Gets the output log as text, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.log).into_owned()
    }

    /// Clears the output log.
    pub fn clear(&mut self) {
        self.log.clear();
    }
}

impl Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("log", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl Memory for Terminal {
    fn read(&self, _: Word) -> Result<Byte> {
        // Write-only port.
        Ok(0)
    }

    fn write(&mut self, addr: Word, data: Byte) -> Result<()> {
        if addr != 0 {
            return Err(Error::Range);
        }
        self.put(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn put_logs_and_forwards() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut terminal = Terminal::new();
        let sink = seen.clone();
        terminal.attach(Box::new(move |ch| sink.borrow_mut().push(ch)));
        terminal.write(0, b'h').unwrap();
        terminal.write(0, b'i').unwrap();
        assert_eq!(terminal.text(), "hi");
        assert_eq!(*seen.borrow(), vec![b'h', b'i']);
    }

    #[test]
    fn write_off_port_fails() {
        let mut terminal = Terminal::new();
        assert!(matches!(terminal.write(1, 0), Err(Error::Range)));
    }
}
