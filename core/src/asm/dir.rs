//! Assembler directives.

use super::image::Segment;

/// A recognized assembler directive.
///
/// Preprocessor directives (`.include`, `.eqv`, `.macro`, `.end_macro`) are
/// consumed before the layout pass and never appear here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Directive {
    /// Switch to a code or data segment.
    Segment(Segment),
    /// Emit 32-bit words.
    Word,
    /// Emit 16-bit halfwords.
    Half,
    /// Emit bytes.
    Byte,
    /// Emit 32-bit IEEE-754 values.
    Float,
    /// Emit 64-bit IEEE-754 values.
    Double,
    /// Emit string bytes without a terminator.
    Ascii,
    /// Emit string bytes with a NUL terminator.
    Asciiz,
    /// Reserve zeroed bytes.
    Space,
    /// Align the cursor to a power of two.
    Align,
    /// Mark symbols as global.
    Globl,
    /// Declare an external symbol.
    Extern,
}

impl Directive {
    /// Resolves a directive name (without the leading dot).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "text" => Self::Segment(Segment::Text),
            "data" => Self::Segment(Segment::Data),
            "ktext" => Self::Segment(Segment::Ktext),
            "kdata" => Self::Segment(Segment::Kdata),
            "word" => Self::Word,
            "half" => Self::Half,
            "byte" => Self::Byte,
            "float" => Self::Float,
            "double" => Self::Double,
            "ascii" => Self::Ascii,
            "asciiz" => Self::Asciiz,
            "space" => Self::Space,
            "align" => Self::Align,
            "globl" | "global" => Self::Globl,
            "extern" => Self::Extern,
            _ => return None,
        })
    }

    /// Returns the natural alignment of emitted items, in bytes.
    #[must_use]
    pub fn natural_align(self) -> u32 {
        match self {
            Self::Half => 2,
            Self::Word | Self::Float => 4,
            Self::Double => 8,
            _ => 1,
        }
    }

    /// Returns the size of one emitted item, in bytes.
    ///
    /// String and reservation directives size by content instead.
    #[must_use]
    pub fn item_size(self) -> u32 {
        match self {
            Self::Byte | Self::Ascii | Self::Asciiz | Self::Space => 1,
            Self::Half => 2,
            Self::Word | Self::Float => 4,
            Self::Double => 8,
            _ => 0,
        }
    }

    /// Checks whether the directive emits into a data segment.
    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(
            self,
            Self::Word
                | Self::Half
                | Self::Byte
                | Self::Float
                | Self::Double
                | Self::Ascii
                | Self::Asciiz
                | Self::Space
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_works() {
        assert_eq!(Directive::from_name("text"), Some(Directive::Segment(Segment::Text)));
        assert_eq!(Directive::from_name("word"), Some(Directive::Word));
        assert_eq!(Directive::from_name("bogus"), None);
    }

    #[test]
    fn natural_align_works() {
        assert_eq!(Directive::Byte.natural_align(), 1);
        assert_eq!(Directive::Half.natural_align(), 2);
        assert_eq!(Directive::Word.natural_align(), 4);
        assert_eq!(Directive::Double.natural_align(), 8);
    }
}
