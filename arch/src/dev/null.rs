use crate::mem::{Memory, Result};
use crate::{Byte, Word};

/// Null device.
///
/// # Usage
///
/// The `Null` device ignores all writes, and always yields the same value when
/// read. This can be useful to allow memory accesses to an unmapped region of
/// memory without raising a bus error.
#[derive(Debug, Default)]
pub struct Null(Byte);

impl Null {
    /// Constructs a new `Null` device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an instance of `Null` that yields the specified value when
    /// performing a read.
    #[must_use]
    pub fn with(value: Byte) -> Self {
        Self(value)
    }
}

impl Memory for Null {
    fn read(&self, _: Word) -> Result<Byte> {
        Ok(self.0)
    }

    fn write(&mut self, _: Word, _: Byte) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_works() {
        let null = Null::with(0xaa);
        assert!((0..0x100).map(|it| null.read(it)).all(|it| it == Ok(0xaa)));
    }

    #[test]
    fn memory_write_ignored() {
        let mut null = Null::new();
        (0..0x100).for_each(|it| null.write(it, 0xaa).unwrap());
        assert!((0..0x100).map(|it| null.read(it)).all(|it| it == Ok(0)));
    }
}
