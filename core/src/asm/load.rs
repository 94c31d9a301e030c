//! Program loading.

use indexmap::IndexMap;
use log::debug;
use mipsim_arch::Word;
use thiserror::Error;

use super::image::BinaryImage;
use crate::mem::{self, Memory};
use crate::parts::cpu::MachineState;

/// Placement report produced by a successful load.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgramLayout {
    /// Text segment base.
    pub text_base: Word,
    /// Data segment base.
    pub data_base: Word,
    /// Kernel text segment base.
    pub ktext_base: Word,
    /// Kernel data segment base.
    pub kdata_base: Word,
    /// Initial program counter.
    pub entry: Word,
    /// Defined symbols.
    pub symbols: IndexMap<String, Word>,
}

/// Program loader.
///
/// Writes an image's segments into memory and initializes `$gp`, `$sp`, and
/// the PC. Relocation is the linker's job; the loader only accepts fully
/// resolved images.
#[derive(Debug)]
pub struct Loader {
    /// Clear memory before loading.
    pub clear: bool,
}

impl Default for Loader {
    fn default() -> Self {
        Self { clear: true }
    }
}

impl Loader {
    /// Constructs a new `Loader` with default behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an image.
    ///
    /// # Errors
    ///
    /// Errors on unresolved relocations and segments that fall outside
    /// their configured regions.
    pub fn load(
        &self,
        image: &BinaryImage,
        mem: &mut Memory,
        state: &mut MachineState,
    ) -> Result<ProgramLayout> {
        if let Some(reloc) = image.relocations.first() {
            return Err(Error::Unresolved(reloc.symbol.clone()));
        }
        if self.clear {
            mem.reset();
        }
        // Code segments: instruction words land little-endian, matching the
        // fetch path.
        for (base, words) in [(image.text_base, &image.text), (image.ktext_base, &image.ktext)] {
            for (idx, &word) in words.iter().enumerate() {
                mem.write_bytes(base + 4 * idx as Word, &word.to_le_bytes())?;
            }
        }
        // Data segments: bytes land exactly as assembled.
        for (base, bytes) in [(image.data_base, &image.data), (image.kdata_base, &image.kdata)] {
            if !bytes.is_empty() {
                mem.write_bytes(base, bytes)?;
            }
        }
        // Conventional register setup.
        state.reset();
        state.set_reg(28, image.data_base.wrapping_add(0x8000));
        state.set_reg(29, mem.map().stack_base);
        state.pc = image.text_base;
        debug!(
            "loaded {} text word(s), {} data byte(s); entry {:#010x}",
            image.text.len(),
            image.data.len(),
            state.pc
        );
        Ok(ProgramLayout {
            text_base: image.text_base,
            data_base: image.data_base,
            ktext_base: image.ktext_base,
            kdata_base: image.kdata_base,
            entry: image.text_base,
            symbols: image.symbols.clone(),
        })
    }
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error caused while [loading](Loader::load).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The image still carries relocations.
    #[error("unresolved relocation against `{0}`")]
    Unresolved(String),
    /// A segment does not fit its region.
    #[error(transparent)]
    Memory(#[from] mem::Error),
}

#[cfg(test)]
mod tests {
    use super::super::Assembler;
    use super::*;
    use crate::mem::MemoryMap;

    fn load(src: &str) -> (Memory, MachineState, ProgramLayout) {
        let image = Assembler::default().assemble("test.s", src).unwrap();
        let mut mem = Memory::new(MemoryMap::default());
        let mut state = MachineState::new();
        let layout = Loader::new().load(&image, &mut mem, &mut state).unwrap();
        (mem, state, layout)
    }

    #[test]
    fn load_places_segments_and_registers() {
        let (mut mem, state, layout) = load(".data\nx: .word 0x11223344\n.text\nmain: nop\n");
        assert_eq!(mem.read_word(0x1001_0000), Ok(0x1122_3344));
        assert_eq!(mem.fetch_word(0x0040_0000), Ok(0));
        assert_eq!(state.pc, 0x0040_0000);
        assert_eq!(state.reg(28), 0x1001_8000);
        assert_eq!(state.reg(29), 0x7fff_effc);
        assert_eq!(layout.entry, 0x0040_0000);
        assert_eq!(layout.symbols.get("x"), Some(&0x1001_0000));
    }

    #[test]
    fn load_rejects_unresolved_relocations() {
        let image = Assembler::default()
            .assemble("test.s", ".extern missing 4\nmain: jal missing\n")
            .unwrap();
        let mut mem = Memory::new(MemoryMap::default());
        let mut state = MachineState::new();
        assert_eq!(
            Loader::new().load(&image, &mut mem, &mut state),
            Err(Error::Unresolved("missing".to_owned()))
        );
    }

    #[test]
    fn load_clears_previous_contents() {
        let (mut mem, ..) = load(".data\n.word 1\n");
        mem.write_word(0x1004_0000, 99).unwrap();
        let image = Assembler::default()
            .assemble("test.s", ".data\n.word 2\n")
            .unwrap();
        let mut state = MachineState::new();
        Loader::new().load(&image, &mut mem, &mut state).unwrap();
        assert_eq!(mem.read_word(0x1004_0000), Ok(0));
        assert_eq!(mem.read_word(0x1001_0000), Ok(2));
    }
}
