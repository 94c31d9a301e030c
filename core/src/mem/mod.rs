//! Memory hierarchy.
//!
//! A sparse page-backed byte store fronted by optional write-through caches,
//! with the high MMIO range dispatched to devices over the architecture
//! [bus](Bus). Word and halfword accesses are little-endian by default and
//! fault on misalignment.

use std::collections::BTreeMap;

use log::warn;
use mipsim_arch::mem::{self as amem, Memory as _};
use mipsim_arch::mio::{Bus, Device};
use mipsim_arch::{Byte, Half, Word};
use thiserror::Error;

mod cache;

pub use self::cache::Cache;

/// Backing page size in bytes.
const PAGE: usize = 0x1000;

/// Address-space regions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Region {
    /// User instructions (read-only to stores).
    Text,
    /// User data, heap, and stack.
    Data,
    /// Kernel instructions.
    Ktext,
    /// Kernel data.
    Kdata,
    /// Memory-mapped devices.
    Mmio,
}

/// Address-space configuration.
#[derive(Clone, Debug)]
pub struct MemoryMap {
    /// Text segment base.
    pub text_base: Word,
    /// Data segment base.
    pub data_base: Word,
    /// Heap base (grows upward).
    pub heap_base: Word,
    /// Initial stack pointer (stack grows downward).
    pub stack_base: Word,
    /// Kernel text segment base.
    pub ktext_base: Word,
    /// Kernel data segment base.
    pub kdata_base: Word,
    /// Memory-mapped I/O base.
    pub mmio_base: Word,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            text_base: 0x0040_0000,
            data_base: 0x1001_0000,
            heap_base: 0x1004_0000,
            stack_base: 0x7fff_effc,
            ktext_base: 0x8000_0000,
            kdata_base: 0x9000_0000,
            mmio_base: 0xffff_0000,
        }
    }
}

impl MemoryMap {
    /// Classifies an address into its region.
    ///
    /// Returns `None` for addresses below the text segment.
    #[must_use]
    pub fn region(&self, addr: Word) -> Option<Region> {
        Some(if addr >= self.mmio_base {
            Region::Mmio
        } else if addr >= self.kdata_base {
            Region::Kdata
        } else if addr >= self.ktext_base {
            Region::Ktext
        } else if addr >= 0x1000_0000 {
            Region::Data
        } else if addr >= self.text_base {
            Region::Text
        } else {
            return None;
        })
    }
}

/// Simulated memory.
///
/// Owns the RAM page map and the MMIO device bus. CPU-initiated accesses go
/// through the read/write methods and honor region policy; the loader uses
/// [`Memory::write_bytes`], which bypasses policy but not the region map.
#[derive(Debug, Default)]
pub struct Memory {
    /// Address-space configuration.
    map: MemoryMap,
    /// Resident RAM pages, keyed by page base address.
    pages: BTreeMap<Word, Box<[Byte; PAGE]>>,
    /// MMIO device bus.
    bus: Bus,
    /// Instruction cache.
    pub icache: Option<Cache>,
    /// Data cache.
    pub dcache: Option<Cache>,
}

impl Memory {
    /// Constructs a new `Memory` over the given map.
    #[must_use]
    pub fn new(map: MemoryMap) -> Self {
        Self {
            map,
            ..Self::default()
        }
    }

    /// Gets the memory's address-space configuration.
    #[must_use]
    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    /// Maps a device over an MMIO range.
    ///
    /// # Errors
    ///
    /// Errors if the range lies outside MMIO or overlaps a mapped device.
    pub fn map_device(&mut self, start: Word, end: Word, dev: Device) -> Result<()> {
        if start > end || start < self.map.mmio_base {
            return Err(Error::Map { start, end });
        }
        let overlaps = self
            .bus
            .ranges()
            .any(|range| start <= *range.end() && end >= *range.start());
        if overlaps {
            return Err(Error::Map { start, end });
        }
        self.bus.map(start..=end, dev);
        Ok(())
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Errors on unmapped addresses and device faults.
    pub fn read_byte(&self, addr: Word) -> Result<Byte> {
        if self.map.region(addr) == Some(Region::Mmio) {
            return self.bus.read(addr).map_err(|err| convert(err, addr));
        }
        self.map.region(addr).ok_or(Error::Bus { addr })?;
        Ok(self.peek(addr))
    }

    /// Writes one byte.
    ///
    /// # Errors
    ///
    /// Errors on unmapped or read-only addresses and device faults.
    pub fn write_byte(&mut self, addr: Word, data: Byte) -> Result<()> {
        match self.map.region(addr) {
            Some(Region::Mmio) => self.bus.write(addr, data).map_err(|err| convert(err, addr)),
            Some(Region::Text | Region::Ktext) => Err(Error::Bus { addr }),
            Some(_) => {
                self.poke(addr, data);
                Ok(())
            }
            None => Err(Error::Bus { addr }),
        }
    }

    /// Reads an aligned halfword.
    ///
    /// # Errors
    ///
    /// Errors on misalignment, unmapped addresses, and device faults.
    pub fn read_half(&mut self, addr: Word) -> Result<Half> {
        self.aligned(addr, 2)?;
        self.touch_data(addr);
        let lo = self.read_byte(addr)?;
        let hi = self.read_byte(addr + 1)?;
        Ok(Half::from_le_bytes([lo, hi]))
    }

    /// Writes an aligned halfword.
    ///
    /// # Errors
    ///
    /// Errors on misalignment, unmapped or read-only addresses, and device
    /// faults.
    pub fn write_half(&mut self, addr: Word, data: Half) -> Result<()> {
        self.aligned(addr, 2)?;
        self.touch_data(addr);
        let [lo, hi] = data.to_le_bytes();
        self.write_byte(addr, lo)?;
        self.write_byte(addr + 1, hi)
    }

    /// Reads an aligned word.
    ///
    /// # Errors
    ///
    /// Errors on misalignment, unmapped addresses, and device faults.
    pub fn read_word(&mut self, addr: Word) -> Result<Word> {
        self.aligned(addr, 4)?;
        self.touch_data(addr);
        self.word_at(addr)
    }

    /// Writes an aligned word.
    ///
    /// # Errors
    ///
    /// Errors on misalignment, unmapped or read-only addresses, and device
    /// faults.
    pub fn write_word(&mut self, addr: Word, data: Word) -> Result<()> {
        self.aligned(addr, 4)?;
        self.touch_data(addr);
        let bytes = data.to_le_bytes();
        for (idx, byte) in bytes.into_iter().enumerate() {
            self.write_byte(addr + idx as Word, byte)?;
        }
        Ok(())
    }

    /// Fetches an instruction word, accounting to the instruction cache.
    ///
    /// # Errors
    ///
    /// Errors on misalignment and unmapped addresses.
    pub fn fetch_word(&mut self, addr: Word) -> Result<Word> {
        self.aligned(addr, 4)?;
        if self.map.region(addr) != Some(Region::Mmio) {
            if let Some(cache) = &mut self.icache {
                cache.access(addr);
            }
        }
        self.word_at(addr)
    }

    fn word_at(&self, addr: Word) -> Result<Word> {
        if self.map.region(addr) == Some(Region::Mmio) {
            let mut bytes = [0; 4];
            for (idx, byte) in bytes.iter_mut().enumerate() {
                *byte = self
                    .bus
                    .read(addr + idx as Word)
                    .map_err(|err| convert(err, addr))?;
            }
            return Ok(Word::from_le_bytes(bytes));
        }
        self.map.region(addr).ok_or(Error::Bus { addr })?;
        Ok(Word::from_le_bytes([
            self.peek(addr),
            self.peek(addr + 1),
            self.peek(addr + 2),
            self.peek(addr + 3),
        ]))
    }

    /// Writes raw bytes without region policy.
    ///
    /// This is the loader's path: text segments are writable here and the
    /// caches are left untouched.
    ///
    /// # Errors
    ///
    /// Errors when the range crosses into MMIO or unmapped space.
    pub fn write_bytes(&mut self, addr: Word, bytes: &[Byte]) -> Result<()> {
        for (idx, &byte) in bytes.iter().enumerate() {
            let addr = addr + idx as Word;
            match self.map.region(addr) {
                Some(Region::Mmio) | None => return Err(Error::Bus { addr }),
                Some(_) => self.poke(addr, byte),
            }
        }
        Ok(())
    }

    /// Gets an iterator over resident pages as `(base, bytes)` entries.
    pub fn entries(&self) -> impl Iterator<Item = (Word, &[Byte])> {
        self.pages.iter().map(|(&base, page)| (base, &page[..]))
    }

    /// Releases all pages and detaches nothing: devices keep their state.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.flush_caches();
    }

    /// Invalidates every cache line.
    pub fn flush_caches(&mut self) {
        if let Some(cache) = &mut self.icache {
            cache.invalidate();
        }
        if let Some(cache) = &mut self.dcache {
            cache.invalidate();
        }
    }

    /// Computes a 64-bit FNV-1a digest over resident pages.
    ///
    /// Cheap enough to publish with every runtime snapshot.
    #[must_use]
    pub fn digest(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = OFFSET;
        for (base, page) in self.entries() {
            for byte in base.to_le_bytes() {
                hash = (hash ^ u64::from(byte)).wrapping_mul(PRIME);
            }
            for &byte in page {
                hash = (hash ^ u64::from(byte)).wrapping_mul(PRIME);
            }
        }
        hash
    }

    fn aligned(&self, addr: Word, size: Word) -> Result<()> {
        if addr % size != 0 {
            warn!("misaligned {size}-byte access at {addr:#010x}");
            return Err(Error::Misaligned { addr, size });
        }
        Ok(())
    }

    fn touch_data(&mut self, addr: Word) {
        // MMIO bypasses the cache model.
        if self.map.region(addr) != Some(Region::Mmio) {
            if let Some(cache) = &mut self.dcache {
                cache.access(addr);
            }
        }
    }

    fn peek(&self, addr: Word) -> Byte {
        let base = addr & !(PAGE as Word - 1);
        self.pages
            .get(&base)
            .map_or(0, |page| page[(addr - base) as usize])
    }

    fn poke(&mut self, addr: Word, data: Byte) {
        let base = addr & !(PAGE as Word - 1);
        let page = self
            .pages
            .entry(base)
            .or_insert_with(|| Box::new([0; PAGE]));
        page[(addr - base) as usize] = data;
    }
}

fn convert(err: amem::Error, addr: Word) -> Error {
    match err {
        amem::Error::Busy => Error::NotReady { addr },
        amem::Error::Disabled | amem::Error::Misuse | amem::Error::Range => Error::Bus { addr },
    }
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error caused by a [memory](Memory) access.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// Misaligned halfword or word access.
    #[error("address error: misaligned {size}-byte access at {addr:#010x}")]
    Misaligned {
        /// Faulting address.
        addr: Word,
        /// Access width in bytes.
        size: Word,
    },
    /// Unmapped or read-only address.
    #[error("bus error at {addr:#010x}")]
    Bus {
        /// Faulting address.
        addr: Word,
    },
    /// Device exists but refused the access.
    #[error("device not ready at {addr:#010x}")]
    NotReady {
        /// Faulting address.
        addr: Word,
    },
    /// Device range cannot be mapped.
    #[error("device range {start:#010x}..={end:#010x} not mappable")]
    Map {
        /// Range start.
        start: Word,
        /// Range end (inclusive).
        end: Word,
    },
}

#[cfg(test)]
mod tests {
    use mipsim_arch::mem::Ram;
    use mipsim_arch::Shared;

    use super::*;

    fn setup() -> Memory {
        Memory::new(MemoryMap::default())
    }

    #[test]
    fn word_round_trip_works() {
        let mut mem = setup();
        mem.write_word(0x1001_0000, 0x1122_3344).unwrap();
        assert_eq!(mem.read_word(0x1001_0000), Ok(0x1122_3344));
        // Little-endian byte order.
        assert_eq!(mem.read_byte(0x1001_0000), Ok(0x44));
        assert_eq!(mem.read_half(0x1001_0000), Ok(0x3344));
    }

    #[test]
    fn misaligned_access_fails() {
        let mut mem = setup();
        assert!(matches!(
            mem.read_word(0x1001_0002),
            Err(Error::Misaligned { size: 4, .. })
        ));
        assert!(matches!(
            mem.write_half(0x1001_0001, 0),
            Err(Error::Misaligned { size: 2, .. })
        ));
    }

    #[test]
    fn unmapped_address_fails() {
        let mut mem = setup();
        assert!(matches!(mem.read_byte(0x0000_0010), Err(Error::Bus { .. })));
        assert!(matches!(
            mem.write_word(0x0000_0010, 1),
            Err(Error::Bus { .. })
        ));
    }

    #[test]
    fn text_region_rejects_stores() {
        let mut mem = setup();
        assert!(matches!(
            mem.write_word(0x0040_0000, 1),
            Err(Error::Bus { .. })
        ));
        // The loader path still lands.
        mem.write_bytes(0x0040_0000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read_word(0x0040_0000), Ok(0x0403_0201));
    }

    #[test]
    fn mmio_dispatches_to_device() {
        let mut mem = setup();
        let dev = Shared::new(Ram::from([0u8; 16]));
        mem.map_device(0xffff_0000, 0xffff_000f, Shared::dev(dev.clone()))
            .unwrap();
        mem.write_byte(0xffff_0004, 0xaa).unwrap();
        assert_eq!(mem.read_byte(0xffff_0004), Ok(0xaa));
        assert_eq!(dev.borrow().read(4), Ok(0xaa));
    }

    #[test]
    fn device_overlap_fails() {
        let mut mem = setup();
        mem.map_device(0xffff_0000, 0xffff_000f, Shared::dev(Ram::from([0u8; 16])))
            .unwrap();
        let err = mem
            .map_device(0xffff_0008, 0xffff_0017, Shared::dev(Ram::from([0u8; 16])))
            .unwrap_err();
        assert!(matches!(err, Error::Map { .. }));
    }

    #[test]
    fn device_outside_mmio_fails() {
        let mut mem = setup();
        let err = mem
            .map_device(0x1001_0000, 0x1001_000f, Shared::dev(Ram::from([0u8; 16])))
            .unwrap_err();
        assert!(matches!(err, Error::Map { .. }));
    }

    #[test]
    fn caches_count_hits_and_misses() {
        let mut mem = setup();
        mem.dcache = Some(Cache::direct(64, 16));
        mem.write_word(0x1001_0000, 7).unwrap();
        mem.read_word(0x1001_0000).unwrap();
        mem.read_word(0x1001_0004).unwrap();
        let cache = mem.dcache.as_ref().unwrap();
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn digest_changes_with_contents() {
        let mut mem = setup();
        let before = mem.digest();
        mem.write_word(0x1001_0000, 7).unwrap();
        assert_ne!(mem.digest(), before);
    }

    #[test]
    fn reset_clears_pages() {
        let mut mem = setup();
        mem.write_word(0x1001_0000, 7).unwrap();
        mem.reset();
        assert_eq!(mem.read_word(0x1001_0000), Ok(0));
        assert_eq!(mem.entries().count(), 0);
    }
}
