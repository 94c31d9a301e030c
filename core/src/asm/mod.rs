//! Two-pass macro-aware assembler.
//!
//! Assembly happens in stages: the [preprocessor](pre) strips comments,
//! resolves `.include`, and expands `.eqv` aliases and `.macro` bodies; the
//! layout pass places labels and advances segment cursors; the emission pass
//! expands [pseudo-instructions](pseudo), [encodes](enc) real instructions,
//! and materializes data directives into a [`BinaryImage`].

use std::collections::HashMap;
use std::fmt::Display;

use thiserror::Error;

mod dir;
mod enc;
mod image;
mod lex;
mod pass;
mod pre;
mod pseudo;

pub mod link;
pub mod load;

pub use self::image::{BinaryImage, RelocKind, Relocation, Segment, SourceLoc, Symbol};
pub use self::lex::{gpr, gpr_name};
pub use self::load::{Loader, ProgramLayout};

/// Assembler configuration.
#[derive(Clone, Debug)]
pub struct Options {
    /// Accept and expand pseudo-instructions.
    pub pseudo: bool,
    /// Model the branch delay slot.
    ///
    /// When enabled, pseudo-branch expansions pad their delay slots with a
    /// `nop`.
    pub delayed_branching: bool,
    /// Emit little-endian images.
    pub little_endian: bool,
    /// Base address of the text segment.
    pub text_base: u32,
    /// Base address of the data segment.
    pub data_base: u32,
    /// Base address of the kernel text segment.
    pub ktext_base: u32,
    /// Base address of the kernel data segment.
    pub kdata_base: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pseudo: true,
            delayed_branching: false,
            little_endian: true,
            text_base: 0x0040_0000,
            data_base: 0x1001_0000,
            ktext_base: 0x8000_0000,
            kdata_base: 0x9000_0000,
        }
    }
}

/// MIPS assembler.
///
/// Owns its pseudo-instruction table; the shipped table can be replaced at
/// runtime with [`Assembler::reload_pseudo_ops`].
#[derive(Debug)]
pub struct Assembler {
    /// Configuration.
    opts: Options,
    /// Pseudo-instruction expansion templates.
    pseudo: pseudo::Table,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Assembler {
    /// Constructs a new `Assembler` with the given options and the shipped
    /// pseudo-instruction table.
    ///
    /// # Panics
    ///
    /// Cannot panic: the shipped table is verified by test.
    #[must_use]
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            pseudo: pseudo::Table::shipped().expect("shipped pseudo-op table is well-formed"),
        }
    }

    /// Gets the assembler's configuration.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Replaces the pseudo-instruction table from table-file source text.
    ///
    /// # Errors
    ///
    /// Errors if the table text is malformed; the previous table is retained.
    pub fn reload_pseudo_ops(&mut self, text: &str) -> Result<(), Error> {
        self.pseudo = pseudo::Table::parse(text).map_err(|cause| Error {
            phase: Phase::Preprocess,
            file: "<pseudo-ops>".to_owned(),
            line: 0,
            column: 0,
            cause,
        })?;
        Ok(())
    }

    /// Assembles a single source string into an image.
    ///
    /// # Errors
    ///
    /// Errors with the failing file, line, and column on any assembly fault.
    pub fn assemble(&self, file: &str, source: &str) -> Result<BinaryImage, Error> {
        self.assemble_with(file, source, &HashMap::new())
    }

    /// Assembles a source string, resolving `.include` against a virtual
    /// file map.
    ///
    /// # Errors
    ///
    /// Errors with the failing file, line, and column on any assembly fault.
    pub fn assemble_with(
        &self,
        file: &str,
        source: &str,
        includes: &HashMap<String, String>,
    ) -> Result<BinaryImage, Error> {
        let lines = pre::process(file, source, includes)?;
        pass::run(&self.opts, &self.pseudo, &lines)
    }
}

/// Assembly stage at which an error occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Comment stripping, includes, aliases, macros.
    Preprocess,
    /// Label placement and segment layout.
    Layout,
    /// Instruction encoding and data emission.
    Emit,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Preprocess => "preprocess",
            Self::Layout => "layout",
            Self::Emit => "emit",
        })
    }
}

/// An error produced while assembling, with its source position.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{file}:{line}:{column}: {cause}")]
pub struct Error {
    /// Assembly stage that failed.
    pub phase: Phase,
    /// Source file name.
    pub file: String,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
    /// Underlying cause.
    pub cause: Cause,
}

/// The underlying cause of an [assembly error](Error).
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Cause {
    /// Unrecognized character.
    #[error("unrecognized character: `{0}`")]
    BadToken(char),
    /// Unknown register name.
    #[error("unknown register: `{0}`")]
    BadRegister(String),
    /// Unknown escape sequence.
    #[error("unknown escape sequence: `\\{0}`")]
    BadEscape(char),
    /// Malformed numeric literal.
    #[error("malformed number: `{0}`")]
    BadNumber(String),
    /// String literal missing its closing quote.
    #[error("unclosed string literal")]
    UnclosedString,
    /// Unknown instruction mnemonic.
    #[error("unknown mnemonic: `{0}`")]
    UnknownMnemonic(String),
    /// Unknown assembler directive.
    #[error("unknown directive: `.{0}`")]
    UnknownDirective(String),
    /// Wrong number of operands for a mnemonic or directive.
    #[error("expected {expected} operand(s), found {found}")]
    OperandCount {
        /// Operands required.
        expected: usize,
        /// Operands supplied.
        found: usize,
    },
    /// Operand of the wrong kind.
    #[error("expected {expected} operand")]
    OperandType {
        /// Description of the required operand.
        expected: &'static str,
    },
    /// Immediate outside the encodable range.
    #[error("immediate out of range: {0}")]
    ImmediateRange(i64),
    /// Branch target outside the signed 16-bit offset range.
    #[error("branch target out of range: offset {0}")]
    BranchRange(i64),
    /// Reference to a symbol that is never defined.
    #[error("undefined symbol: `{0}`")]
    UndefinedSymbol(String),
    /// Label defined more than once.
    #[error("duplicate label: `{0}`")]
    DuplicateLabel(String),
    /// Invalid alignment exponent.
    #[error("bad alignment: {0}")]
    BadAlignment(u32),
    /// Segment origin below the configured base or misaligned.
    #[error("segment origin not addressable: {0:#x}")]
    BadOrigin(i64),
    /// Statement not permitted in the current segment.
    #[error("{0} not permitted in this segment")]
    WrongSegment(&'static str),
    /// `.include` chain revisits a file.
    #[error("include cycle through `{0}`")]
    IncludeCycle(String),
    /// `.include` target not found in the provided file map.
    #[error("include not found: `{0}`")]
    IncludeMissing(String),
    /// `.macro` without a matching `.end_macro`.
    #[error("unterminated macro definition")]
    UnterminatedMacro,
    /// Macro expansion nested too deeply.
    #[error("macro expansion exceeds depth limit")]
    MacroDepth,
    /// Malformed macro definition or call.
    #[error("malformed macro: {0}")]
    BadMacro(String),
    /// `.eqv` alias expands through itself.
    #[error("recursive `.eqv` alias: `{0}`")]
    RecursiveEqv(String),
    /// Malformed pseudo-instruction table entry.
    #[error("malformed pseudo-op table entry: {0}")]
    BadPseudoTable(String),
    /// Unrecognized template placeholder.
    #[error("unrecognized template placeholder: `{0}`")]
    BadPlaceholder(String),
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(src: &str) -> BinaryImage {
        Assembler::default().assemble("test.s", src).unwrap()
    }

    #[test]
    fn assemble_minimal_works() {
        let image = assemble(".text\nmain: addi $t0, $zero, 7\n");
        assert_eq!(image.text, vec![0x2008_0007]);
        assert_eq!(image.symbol("main"), Some(0x0040_0000));
    }

    #[test]
    fn assemble_data_words_work() {
        let image = assemble(".data\nx: .word 0x11223344\ny: .byte 1, 2\n");
        assert_eq!(image.data, vec![0x44, 0x33, 0x22, 0x11, 1, 2]);
        assert_eq!(image.symbol("x"), Some(0x1001_0000));
        assert_eq!(image.symbol("y"), Some(0x1001_0004));
    }

    #[test]
    fn assemble_natural_alignment_pads() {
        let image = assemble(".data\n.byte 1\nw: .word 2\n");
        assert_eq!(image.data, vec![1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(image.symbol("w"), Some(0x1001_0004));
    }

    #[test]
    fn assemble_align_directive_works() {
        let image = assemble(".data\n.byte 1\n.align 3\nd: .byte 2\n");
        assert_eq!(image.symbol("d"), Some(0x1001_0008));
    }

    #[test]
    fn assemble_align_zero_disables_auto() {
        let image = assemble(".data\n.align 0\n.byte 1\nw: .word 2\n");
        assert_eq!(image.symbol("w"), Some(0x1001_0001));
        assert_eq!(image.data, vec![1, 2, 0, 0, 0]);
    }

    #[test]
    fn assemble_backward_branch_works() {
        let image = assemble(
            "main: addi $t0, $zero, 3\nloop: addi $t0, $t0, -1\nbne $t0, $zero, loop\n",
        );
        assert_eq!(image.text[2], 0x1500_fffe);
    }

    #[test]
    fn assemble_li_la_pseudo_works() {
        let image = assemble(".data\nmsg: .asciiz \"hi\"\n.text\nla $a0, msg\nli $v0, 4\n");
        assert_eq!(image.text, vec![0x3c01_1001, 0x2424_0000, 0x2402_0004]);
        assert_eq!(image.data, vec![b'h', b'i', 0]);
    }

    #[test]
    fn assemble_strings_escape_and_terminate() {
        let image = assemble(".data\n.ascii \"ab\"\n.asciiz \"c\\n\"\n");
        assert_eq!(image.data, vec![b'a', b'b', b'c', b'\n', 0]);
    }

    #[test]
    fn assemble_duplicate_label_fails() {
        let err = Assembler::default()
            .assemble("test.s", "a: nop\na: nop\n")
            .unwrap_err();
        assert!(matches!(err.cause, Cause::DuplicateLabel(_)));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn assemble_undefined_symbol_fails() {
        let err = Assembler::default()
            .assemble("test.s", "j nowhere\n")
            .unwrap_err();
        assert!(matches!(err.cause, Cause::UndefinedSymbol(_)));
        assert_eq!(err.phase, Phase::Emit);
    }

    #[test]
    fn assemble_unknown_mnemonic_fails() {
        let err = Assembler::default()
            .assemble("test.s", "frobnicate $t0\n")
            .unwrap_err();
        assert!(matches!(err.cause, Cause::UnknownMnemonic(_)));
        assert_eq!(err.phase, Phase::Layout);
    }

    #[test]
    fn assemble_without_pseudo_rejects_li() {
        let asm = Assembler::new(Options {
            pseudo: false,
            ..Options::default()
        });
        let err = asm.assemble("test.s", "li $t0, 1\n").unwrap_err();
        assert!(matches!(err.cause, Cause::UnknownMnemonic(_)));
    }

    #[test]
    fn assemble_source_map_records_lines() {
        let image = assemble("nop\nnop\naddi $t0, $zero, 1\n");
        assert_eq!(image.source_map.len(), 3);
        assert_eq!(image.source_map[2].line, 3);
        assert_eq!(image.source_map[2].address, 0x0040_0008);
    }

    #[test]
    fn assemble_extern_reference_emits_reloc() {
        let image = assemble(".extern buffer 4\n.text\nla $t0, buffer\n");
        assert_eq!(image.relocations.len(), 2);
        assert_eq!(image.relocations[0].kind, RelocKind::MipsHi16);
        assert_eq!(image.relocations[1].kind, RelocKind::MipsLo16);
        assert_eq!(image.relocations[1].offset, 4);
    }

    #[test]
    fn assemble_ktext_segment_works() {
        let image = assemble(".ktext\nhandler: nop\n");
        assert_eq!(image.ktext, vec![0]);
        assert_eq!(image.symbol("handler"), Some(0x8000_0000));
    }

    #[test]
    fn assemble_delayed_branching_pads_pseudo_branch() {
        let asm = Assembler::new(Options {
            delayed_branching: true,
            ..Options::default()
        });
        let image = asm
            .assemble("test.s", "main: b main\n")
            .unwrap();
        assert_eq!(image.text.len(), 2);
        assert_eq!(image.text[1], 0x0000_0000);
    }

    #[test]
    fn reload_pseudo_ops_replaces_table() {
        let mut asm = Assembler::default();
        asm.reload_pseudo_ops("clear $t1\taddu RG1, $zero, $zero\t# zero a register\n")
            .unwrap();
        let image = asm.assemble("test.s", "clear $t0\n").unwrap();
        assert_eq!(image.text, vec![0x0000_4021]);
        // The old table is gone.
        assert!(asm.assemble("test.s", "li $t0, 1\n").is_err());
    }
}
