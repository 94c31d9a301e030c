//! Assembled program images.

use indexmap::IndexMap;
use mipsim_arch::{Byte, Word};

/// Program segment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    /// User instructions.
    Text,
    /// Initialized user data.
    Data,
    /// Kernel instructions.
    Ktext,
    /// Kernel data.
    Kdata,
}

impl Segment {
    /// Returns the segment's directive spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Text => ".text",
            Self::Data => ".data",
            Self::Ktext => ".ktext",
            Self::Kdata => ".kdata",
        }
    }

    /// Checks whether the segment holds instructions.
    #[must_use]
    pub fn is_code(self) -> bool {
        matches!(self, Self::Text | Self::Ktext)
    }
}

/// Table entry for a defined or external symbol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Symbol {
    /// Symbol name.
    pub name: String,
    /// Absolute address.
    ///
    /// Zero for external symbols awaiting link-time resolution.
    pub address: Word,
    /// Owning segment, or `None` for externals.
    pub segment: Option<Segment>,
}

/// Relocation arithmetic form.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelocKind {
    /// Full 32-bit address.
    Mips32,
    /// 26-bit jump target (address >> 2).
    Mips26,
    /// 16-bit PC-relative branch offset.
    MipsPc16,
    /// High 16 bits, adjusted for a sign-extending low pair.
    MipsHi16,
    /// Low 16 bits.
    MipsLo16,
}

/// Link-time fixup for one word of a segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Relocation {
    /// Segment containing the word to patch.
    pub segment: Segment,
    /// Byte offset of the word within its segment.
    pub offset: Word,
    /// Symbol whose address is patched in.
    pub symbol: String,
    /// Arithmetic form of the patch.
    pub kind: RelocKind,
    /// Constant added to the symbol address.
    pub addend: i32,
}

/// Mapping from an emitted item back to the source that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceLoc {
    /// Segment the item was emitted into.
    pub segment: Segment,
    /// Item index within the segment (instruction index for code segments).
    pub index: usize,
    /// Absolute address of the item.
    pub address: Word,
    /// Originating file name.
    pub file: String,
    /// Originating line number (1-indexed).
    pub line: usize,
}

/// An assembled program.
///
/// Immutable output of the assembler; input to the linker and loader. Code
/// segments are kept as instruction words, data segments as raw bytes.
#[derive(Clone, Debug, Default)]
pub struct BinaryImage {
    /// Base address of the text segment.
    pub text_base: Word,
    /// Base address of the data segment.
    pub data_base: Word,
    /// Base address of the kernel text segment.
    pub ktext_base: Word,
    /// Base address of the kernel data segment.
    pub kdata_base: Word,
    /// Text segment instruction words.
    pub text: Vec<Word>,
    /// Kernel text segment instruction words.
    pub ktext: Vec<Word>,
    /// Data segment bytes.
    pub data: Vec<Byte>,
    /// Kernel data segment bytes.
    pub kdata: Vec<Byte>,
    /// Name to address lookup for defined symbols.
    pub symbols: IndexMap<String, Word>,
    /// Ordered symbol table, externals included.
    pub symbol_table: Vec<Symbol>,
    /// Outstanding link-time fixups.
    pub relocations: Vec<Relocation>,
    /// Byte order of the image.
    pub little_endian: bool,
    /// Source mapping for emitted items.
    pub source_map: Vec<SourceLoc>,
}

impl BinaryImage {
    /// Returns the base address of the given segment.
    #[must_use]
    pub fn base(&self, seg: Segment) -> Word {
        match seg {
            Segment::Text => self.text_base,
            Segment::Data => self.data_base,
            Segment::Ktext => self.ktext_base,
            Segment::Kdata => self.kdata_base,
        }
    }

    /// Returns the byte length of the given segment.
    #[must_use]
    pub fn len(&self, seg: Segment) -> Word {
        match seg {
            Segment::Text => 4 * self.text.len() as Word,
            Segment::Data => self.data.len() as Word,
            Segment::Ktext => 4 * self.ktext.len() as Word,
            Segment::Kdata => self.kdata.len() as Word,
        }
    }

    /// Checks whether the image contains no emitted code or data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.ktext.is_empty()
            && self.data.is_empty()
            && self.kdata.is_empty()
    }

    /// Looks up a defined symbol's address.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<Word> {
        self.symbols.get(name).copied()
    }

    /// Finds the source location mapped to an address, if any.
    #[must_use]
    pub fn find_source(&self, address: Word) -> Option<&SourceLoc> {
        self.source_map.iter().find(|it| it.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_name_works() {
        assert_eq!(Segment::Text.name(), ".text");
        assert_eq!(Segment::Kdata.name(), ".kdata");
    }

    #[test]
    fn base_and_len_work() {
        let image = BinaryImage {
            text_base: 0x0040_0000,
            text: vec![0; 3],
            data_base: 0x1001_0000,
            data: vec![0; 5],
            ..BinaryImage::default()
        };
        assert_eq!(image.base(Segment::Text), 0x0040_0000);
        assert_eq!(image.len(Segment::Text), 12);
        assert_eq!(image.len(Segment::Data), 5);
    }
}
