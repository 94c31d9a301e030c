use std::fmt::Debug;
use std::ops::RangeInclusive;

use self::imp::Map;
use super::Device;
use crate::mem::{Error, Memory, Result};
use crate::{Byte, Word};

mod imp;

/// Mappable address range.
type Range = RangeInclusive<Word>;

/// Databus.
///
/// The [bus] is used to model data transfer via memory-mapped I/O requests.
///
/// [bus]: https://en.wikipedia.org/wiki/Bus_(computing)
#[derive(Debug, Default)]
pub struct Bus {
    /// Memory map.
    mmap: Map,
}

impl Bus {
    /// Constructs a new, empty `Bus`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the bus, removing all devices.
    pub fn clear(&mut self) {
        self.mmap.clear();
    }

    /// Maps a device to the provided range.
    pub fn map(&mut self, range: Range, dev: Device) {
        self.mmap.map(range, dev);
    }

    /// Unmaps and returns a device.
    ///
    /// Returns `false` if the device is not mapped.
    pub fn unmap(&mut self, dev: &Device) -> bool {
        self.mmap.unmap(dev)
    }

    /// Checks whether any device is mapped at the given address.
    #[must_use]
    pub fn mapped(&self, addr: Word) -> bool {
        self.mmap.select(addr).next().is_some()
    }

    /// Gets an iterator over the mapped ranges of the bus.
    pub fn ranges(&self) -> impl Iterator<Item = Range> + '_ {
        self.mmap.iter().map(|it| it.range.clone())
    }
}

impl<const N: usize> From<[(Range, Device); N]> for Bus {
    fn from(arr: [(Range, Device); N]) -> Self {
        let mut this = Self::default();
        for (range, dev) in arr {
            this.map(range, dev);
        }
        this
    }
}

impl Memory for Bus {
    fn read(&self, addr: Word) -> Result<Byte> {
        // Dispatch to the nearest-base device; its error propagates as-is.
        let it = self.mmap.select(addr).next().ok_or(Error::Range)?;
        it.entry
            .try_borrow()
            .map_err(|_| Error::Busy)?
            .read(addr - it.base())
    }

    fn write(&mut self, addr: Word, data: Byte) -> Result<()> {
        let it = self.mmap.select(addr).next().ok_or(Error::Range)?;
        it.entry
            .try_borrow_mut()
            .map_err(|_| Error::Busy)?
            .write(addr - it.base(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Ram;
    use crate::Shared;

    fn setup() -> Bus {
        Bus::from([
            (0x000..=0x0ff, Shared::dev(Ram::from([0; 0x100]))),
            (0x100..=0x1ff, Shared::dev(Ram::from([1; 0x100]))),
            (0x200..=0x2ff, Shared::dev(Ram::from([2; 0x100]))),
        ])
    }

    #[test]
    fn new_works() {
        let bus = Bus::new();
        assert_eq!(bus.ranges().count(), 0);
    }

    #[test]
    fn clear_works() {
        let mut bus = setup();
        bus.clear();
        assert_eq!(bus.ranges().count(), 0);
    }

    #[test]
    fn map_works() {
        let bus = setup();
        assert!((0x000..=0x0ff).map(|it| bus.read(it)).all(|it| it == Ok(0)));
        assert!((0x100..=0x1ff).map(|it| bus.read(it)).all(|it| it == Ok(1)));
        assert!((0x200..=0x2ff).map(|it| bus.read(it)).all(|it| it == Ok(2)));
    }

    #[test]
    fn unmap_works() {
        let mut bus = Bus::new();
        let dev = Shared::dev(Ram::from([0; 0x100]));
        bus.map(0x000..=0x0ff, dev.clone());
        assert!(bus.unmap(&dev));
        assert!(bus.read(0).is_err());
    }

    #[test]
    fn memory_read_unmapped_fails() {
        let bus = setup();
        assert!(matches!(bus.read(0x300), Err(Error::Range)));
    }

    #[test]
    fn memory_write_mapped_works() {
        let mut bus = setup();
        (0x000..0x300).for_each(|it| bus.write(it, 4).unwrap());
        (0x000..0x300).for_each(|it| assert_eq!(bus.read(it), Ok(4)));
    }

    #[test]
    fn map_overlapping_prefers_later_base() {
        // A wide backing device with a narrow register overlaid on top.
        let bus = Bus::from([
            (0x000..=0xfff, Shared::dev(Ram::from([0xaa; 0x1000]))),
            (0x800..=0x803, Shared::dev(Ram::from([0x55; 4]))),
        ]);
        assert_eq!(bus.read(0x7ff), Ok(0xaa));
        assert_eq!(bus.read(0x800), Ok(0x55));
        assert_eq!(bus.read(0x803), Ok(0x55));
        assert_eq!(bus.read(0x804), Ok(0xaa));
    }
}
