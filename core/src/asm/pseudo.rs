//! Pseudo-instruction expansion.
//!
//! Pseudo-instructions are expanded against a template table in the
//! `PseudoOps.txt` format (see `pseudo_ops.txt` for the shipped default).
//! Each template is a single real instruction whose operands may reference
//! the source operands through named placeholders.

use indexmap::IndexMap;

use super::enc::Arg;
use super::image::{RelocKind, Symbol};
use super::lex::gpr_name;
use super::Cause;

/// The table text compiled into the assembler.
const SHIPPED: &str = include_str!("pseudo_ops.txt");

/// Pseudo-instruction template table.
#[derive(Debug)]
pub struct Table {
    /// Entries in file order.
    entries: Vec<Entry>,
}

impl Table {
    /// Parses the shipped default table.
    ///
    /// # Errors
    ///
    /// Errors if the embedded table text is malformed.
    pub fn shipped() -> Result<Self, Cause> {
        Self::parse(SHIPPED)
    }

    /// Parses a table from `PseudoOps.txt`-format text.
    ///
    /// # Errors
    ///
    /// Errors on malformed entries or unrecognized placeholders.
    pub fn parse(text: &str) -> Result<Self, Cause> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            entries.push(Entry::parse(line)?);
        }
        Ok(Self { entries })
    }

    /// Finds the first entry whose signature matches the given operands.
    #[must_use]
    pub fn lookup(&self, mnemonic: &str, args: &[Arg]) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|it| it.mnemonic == mnemonic && it.matches(args))
    }

    /// Checks whether any entry exists for a mnemonic, regardless of
    /// operands.
    #[must_use]
    pub fn defines(&self, mnemonic: &str) -> bool {
        self.entries.iter().any(|it| it.mnemonic == mnemonic)
    }
}

/// Operand signature element, derived from an entry's example operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Sig {
    /// Any general-purpose register.
    Reg,
    /// Any floating-point register.
    FReg,
    /// Immediate representable as signed 16-bit.
    ImmS16,
    /// Immediate representable as unsigned 16-bit.
    ImmU16,
    /// Any 32-bit immediate.
    Imm32,
    /// Symbol reference.
    Label,
    /// Register-relative address.
    OffBase,
}

impl Sig {
    fn from_example(example: &str) -> Result<Self, Cause> {
        let example = example.trim();
        Ok(if example.contains('(') {
            Self::OffBase
        } else if example.starts_with("$f") {
            Self::FReg
        } else if example.starts_with('$') {
            Self::Reg
        } else if let Ok(value) = example.parse::<i64>() {
            if (-0x8000..=0x7fff).contains(&value) {
                Self::ImmS16
            } else if (0x8000..=0xffff).contains(&value) {
                Self::ImmU16
            } else {
                Self::Imm32
            }
        } else if example
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.')
        {
            Self::Label
        } else {
            return Err(Cause::BadPseudoTable(example.to_owned()));
        })
    }

    fn accepts(self, arg: &Arg) -> bool {
        match self {
            Self::Reg => matches!(arg, Arg::Reg(_)),
            Self::FReg => matches!(arg, Arg::FReg(_)),
            Self::ImmS16 => matches!(arg, Arg::Imm(value) if (-0x8000..=0x7fff).contains(value)),
            Self::ImmU16 => matches!(arg, Arg::Imm(value) if (0..=0xffff).contains(value)),
            Self::Imm32 => matches!(arg, Arg::Imm(_)),
            Self::Label => matches!(arg, Arg::Sym(..)),
            Self::OffBase => matches!(arg, Arg::OffBase(..)),
        }
    }
}

/// One pseudo-instruction entry: signature plus expansion templates.
#[derive(Debug)]
pub struct Entry {
    /// Pseudo mnemonic.
    mnemonic: String,
    /// Operand signature.
    signature: Vec<Sig>,
    /// Expansion templates, one real instruction each.
    templates: Vec<Template>,
    /// Compact alternative templates, retained but not auto-selected.
    #[allow(unused)]
    compact: Vec<Template>,
}

impl Entry {
    fn parse(line: &str) -> Result<Self, Cause> {
        let mut fields = line.split('\t').map(str::trim);
        let head = fields
            .next()
            .filter(|it| !it.is_empty())
            .ok_or_else(|| Cause::BadPseudoTable(line.to_owned()))?;
        // Head field: mnemonic followed by example operands.
        let (mnemonic, examples) = head.split_once(char::is_whitespace).unwrap_or((head, ""));
        let mut signature = Vec::new();
        for example in examples.split(',') {
            let example = example.trim();
            if example.is_empty() {
                continue;
            }
            signature.push(Sig::from_example(example)?);
        }
        // Remaining fields: templates, then an optional trailing comment.
        let mut templates = Vec::new();
        let mut compact = Vec::new();
        let mut in_compact = false;
        for field in fields {
            if field.starts_with('#') {
                break;
            }
            if field == "COMPACT" {
                in_compact = true;
                continue;
            }
            let template = Template::parse(field)?;
            if in_compact {
                compact.push(template);
            } else {
                templates.push(template);
            }
        }
        if templates.is_empty() {
            return Err(Cause::BadPseudoTable(line.to_owned()));
        }
        Ok(Self {
            mnemonic: mnemonic.to_owned(),
            signature,
            templates,
            compact,
        })
    }

    fn matches(&self, args: &[Arg]) -> bool {
        args.len() == self.signature.len()
            && self.signature.iter().zip(args).all(|(sig, arg)| sig.accepts(arg))
    }

    /// Number of real instructions this entry expands to.
    #[must_use]
    pub fn len(&self, delayed_branching: bool) -> usize {
        self.templates
            .iter()
            .filter(|it| !it.is_dbnop() || delayed_branching)
            .count()
    }

    /// Expands the entry against concrete operands.
    ///
    /// # Errors
    ///
    /// Errors if a placeholder references an operand of the wrong kind or an
    /// undefined symbol.
    pub fn expand(
        &self,
        args: &[Arg],
        symbols: &IndexMap<String, Symbol>,
        delayed_branching: bool,
    ) -> Result<Vec<Expansion>, Cause> {
        let mut out = Vec::new();
        for template in &self.templates {
            if template.is_dbnop() {
                if delayed_branching {
                    out.push(Expansion {
                        text: "nop".to_owned(),
                        reloc: None,
                    });
                }
                continue;
            }
            out.push(template.expand(args, symbols, delayed_branching)?);
        }
        Ok(out)
    }
}

/// One line of an assembled expansion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Expansion {
    /// Real-instruction source text.
    pub text: String,
    /// Relocation to attach to the emitted word, for external symbols.
    pub reloc: Option<(RelocKind, String, i32)>,
}

/// A tokenized template.
#[derive(Debug)]
struct Template(Vec<Piece>);

/// Template fragment: literal text or a placeholder.
#[derive(Debug)]
enum Piece {
    Lit(String),
    Ph(Ph),
}

/// A recognized placeholder.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Ph {
    /// `RGn` / `OPn`: operand n, verbatim.
    Op(usize),
    /// `NRn`: the register following operand n's register.
    NextReg(usize),
    /// `LLn` / `LHn` and variants: halves of a label address.
    LabelHalf {
        n: usize,
        high: bool,
        unsigned: bool,
        addend: i64,
    },
    /// `VLn` / `VHn` and variants: halves of a literal value.
    ValueHalf {
        n: usize,
        high: bool,
        unsigned: bool,
        addend: i64,
    },
    /// `LAB`: the label operand, verbatim.
    Lab,
    /// `S32n`: 32 minus value operand n.
    Sub32(usize),
    /// `BROFFnm`: a literal branch offset selected by the delayed-branching
    /// setting.
    BrOff { normal: i64, delayed: i64 },
    /// `DBNOP`: a delay-slot nop line.
    Dbnop,
}

impl Template {
    fn parse(text: &str) -> Result<Self, Cause> {
        let mut pieces = Vec::new();
        let bytes = text.as_bytes();
        let mut idx = 0;
        while idx < bytes.len() {
            let ch = bytes[idx];
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                let start = idx;
                while idx < bytes.len()
                    && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_' || bytes[idx] == b'.')
                {
                    idx += 1;
                }
                let word = &text[start..idx];
                match Ph::parse(word)? {
                    Some(ph) => pieces.push(Piece::Ph(ph)),
                    None => pieces.push(Piece::Lit(word.to_owned())),
                }
            } else {
                pieces.push(Piece::Lit(char::from(ch).to_string()));
                idx += 1;
            }
        }
        Ok(Self(pieces))
    }

    fn is_dbnop(&self) -> bool {
        self.0
            .iter()
            .any(|it| matches!(it, Piece::Ph(Ph::Dbnop)))
    }

    fn expand(
        &self,
        args: &[Arg],
        symbols: &IndexMap<String, Symbol>,
        delayed_branching: bool,
    ) -> Result<Expansion, Cause> {
        let mut text = String::new();
        let mut reloc = None;
        for piece in &self.0 {
            match piece {
                Piece::Lit(lit) => text.push_str(lit),
                Piece::Ph(ph) => ph.substitute(args, symbols, delayed_branching, &mut text, &mut reloc)?,
            }
        }
        Ok(Expansion { text, reloc })
    }
}

impl Ph {
    /// Recognizes a placeholder word; `Ok(None)` means a plain literal.
    fn parse(word: &str) -> Result<Option<Self>, Cause> {
        let malformed = || Cause::BadPlaceholder(word.to_owned());
        if word == "DBNOP" {
            return Ok(Some(Self::Dbnop));
        }
        if word == "LAB" {
            return Ok(Some(Self::Lab));
        }
        if let Some(rest) = word.strip_prefix("BROFF") {
            let digits: Vec<i64> = rest
                .chars()
                .map(|ch| ch.to_digit(10).map(i64::from))
                .collect::<Option<_>>()
                .ok_or_else(malformed)?;
            let [normal, delayed] = digits[..] else {
                return Err(malformed());
            };
            return Ok(Some(Self::BrOff { normal, delayed }));
        }
        if let Some(rest) = word.strip_prefix("S32") {
            let n = rest.parse().map_err(|_| malformed())?;
            return Ok(Some(Self::Sub32(n)));
        }
        for (prefix, next) in [("RG", false), ("OP", false), ("NR", true)] {
            if let Some(rest) = word.strip_prefix(prefix) {
                if let Ok(n) = rest.parse() {
                    return Ok(Some(if next { Self::NextReg(n) } else { Self::Op(n) }));
                }
                if prefix == "OP" {
                    // Not a placeholder; could be a literal like `OPT`.
                    continue;
                }
                return Err(malformed());
            }
        }
        for (prefix, label, high) in [
            ("LL", true, false),
            ("LH", true, true),
            ("VL", false, false),
            ("VH", false, true),
        ] {
            let Some(rest) = word.strip_prefix(prefix) else {
                continue;
            };
            let mut chars = rest.chars().peekable();
            let n = chars
                .next()
                .and_then(|ch| ch.to_digit(10))
                .ok_or_else(malformed)? as usize;
            let unsigned = chars.peek() == Some(&'U') && {
                chars.next();
                true
            };
            let addend = match chars.next() {
                None => 0,
                Some(sign @ ('P' | 'M')) => {
                    let digits: String = chars.by_ref().collect();
                    let value: i64 = digits.parse().map_err(|_| malformed())?;
                    if sign == 'M' {
                        -value
                    } else {
                        value
                    }
                }
                Some(_) => return Err(malformed()),
            };
            if chars.next().is_some() {
                return Err(malformed());
            }
            return Ok(Some(if label {
                Self::LabelHalf {
                    n,
                    high,
                    unsigned,
                    addend,
                }
            } else {
                Self::ValueHalf {
                    n,
                    high,
                    unsigned,
                    addend,
                }
            }));
        }
        Ok(None)
    }

    fn substitute(
        &self,
        args: &[Arg],
        symbols: &IndexMap<String, Symbol>,
        delayed_branching: bool,
        text: &mut String,
        reloc: &mut Option<(RelocKind, String, i32)>,
    ) -> Result<(), Cause> {
        use std::fmt::Write as _;
        let arg = |n: usize| {
            args.get(n.wrapping_sub(1))
                .ok_or(Cause::OperandCount {
                    expected: n,
                    found: args.len(),
                })
        };
        match self {
            Self::Op(n) => write!(text, "{}", format_arg(arg(*n)?)).ok(),
            Self::NextReg(n) => match arg(*n)? {
                Arg::Reg(idx) => write!(text, "${}", gpr_name(idx + 1)).ok(),
                Arg::FReg(idx) => write!(text, "$f{}", idx + 1).ok(),
                _ => return Err(Cause::OperandType { expected: "register" }),
            },
            Self::LabelHalf {
                n,
                high,
                unsigned,
                addend,
            } => {
                let Arg::Sym(name, sym_addend) = arg(*n)? else {
                    return Err(Cause::OperandType { expected: "label" });
                };
                let addend = addend + sym_addend;
                let Some(sym) = symbols.get(name) else {
                    return Err(Cause::UndefinedSymbol(name.clone()));
                };
                if sym.segment.is_none() {
                    // External: emit zero now, patch at link time.
                    let kind = if *high {
                        RelocKind::MipsHi16
                    } else {
                        RelocKind::MipsLo16
                    };
                    *reloc = Some((kind, name.clone(), addend as i32));
                    write!(text, "0").ok()
                } else {
                    let value = sym.address.wrapping_add(addend as u32);
                    write!(text, "{}", half(value, *high, *unsigned)).ok()
                }
            }
            Self::ValueHalf {
                n,
                high,
                unsigned,
                addend,
            } => {
                let Arg::Imm(value) = arg(*n)? else {
                    return Err(Cause::OperandType { expected: "immediate" });
                };
                let value = (*value + addend) as u32;
                write!(text, "{}", half(value, *high, *unsigned)).ok()
            }
            Self::Lab => {
                let lab = args
                    .iter()
                    .find_map(|it| match it {
                        Arg::Sym(name, addend) => Some(format_sym(name, *addend)),
                        _ => None,
                    })
                    .ok_or(Cause::OperandType { expected: "label" })?;
                write!(text, "{lab}").ok()
            }
            Self::Sub32(n) => {
                let Arg::Imm(value) = arg(*n)? else {
                    return Err(Cause::OperandType { expected: "immediate" });
                };
                write!(text, "{}", 32 - value).ok()
            }
            Self::BrOff { normal, delayed } => {
                let off = if delayed_branching { *delayed } else { *normal };
                write!(text, "{off}").ok()
            }
            Self::Dbnop => None,
        };
        Ok(())
    }
}

/// Computes the printable 16-bit half of a 32-bit value.
///
/// The adjusted high half adds `0x8000` first, so pairing it with a
/// sign-extended low half reconstructs the original value exactly.
fn half(value: u32, high: bool, unsigned: bool) -> i64 {
    if high {
        let value = if unsigned {
            value >> 16
        } else {
            value.wrapping_add(0x8000) >> 16
        };
        i64::from(value & 0xffff)
    } else if unsigned {
        i64::from(value & 0xffff)
    } else {
        i64::from((value & 0xffff) as u16 as i16)
    }
}

fn format_arg(arg: &Arg) -> String {
    match arg {
        Arg::Reg(idx) => format!("${}", gpr_name(*idx)),
        Arg::FReg(idx) => format!("$f{idx}"),
        Arg::Imm(value) => value.to_string(),
        Arg::Sym(name, addend) => format_sym(name, *addend),
        Arg::OffBase(off, base) => format!("{off}(${})", gpr_name(*base)),
    }
}

fn format_sym(name: &str, addend: i64) -> String {
    match addend {
        0 => name.to_owned(),
        addend if addend < 0 => format!("{name}-{}", -addend),
        addend => format!("{name}+{addend}"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::image::Segment;
    use super::*;

    fn table() -> Table {
        Table::shipped().unwrap()
    }

    fn symbols() -> IndexMap<String, Symbol> {
        let mut map = IndexMap::new();
        map.insert(
            "x".to_owned(),
            Symbol {
                name: "x".to_owned(),
                address: 0x1001_0004,
                segment: Some(Segment::Data),
            },
        );
        map.insert(
            "ext".to_owned(),
            Symbol {
                name: "ext".to_owned(),
                address: 0,
                segment: None,
            },
        );
        map
    }

    fn texts(out: &[Expansion]) -> Vec<&str> {
        out.iter().map(|it| it.text.as_str()).collect()
    }

    #[test]
    fn shipped_table_parses() {
        assert!(table().defines("li"));
        assert!(table().defines("bgeu"));
        assert!(!table().defines("addiu"));
    }

    #[test]
    fn li_selects_by_magnitude() {
        let table = table();
        let small = [Arg::Reg(9), Arg::Imm(-100)];
        let entry = table.lookup("li", &small).unwrap();
        assert_eq!(entry.len(false), 1);
        let out = entry.expand(&small, &symbols(), false).unwrap();
        assert_eq!(texts(&out), vec!["addiu $t1, $zero, -100"]);

        let large = [Arg::Reg(9), Arg::Imm(0x0001_0001)];
        let entry = table.lookup("li", &large).unwrap();
        assert_eq!(entry.len(false), 2);
        let out = entry.expand(&large, &symbols(), false).unwrap();
        assert_eq!(texts(&out), vec!["lui $at, 1", "ori $t1, $at, 1"]);
    }

    #[test]
    fn la_expands_address_halves() {
        let table = table();
        let args = [Arg::Reg(8), Arg::Sym("x".into(), 0)];
        let out = table
            .lookup("la", &args)
            .unwrap()
            .expand(&args, &symbols(), false)
            .unwrap();
        assert_eq!(texts(&out), vec!["lui $at, 4097", "addiu $t0, $at, 4"]);
    }

    #[test]
    fn lw_label_uses_adjusted_high() {
        // Address 0x1001_8000 has a low half that sign-extends negative, so
        // the adjusted high half compensates.
        let mut symbols = symbols();
        symbols.insert(
            "far".to_owned(),
            Symbol {
                name: "far".to_owned(),
                address: 0x1001_8000,
                segment: Some(Segment::Data),
            },
        );
        let table = table();
        let args = [Arg::Reg(8), Arg::Sym("far".into(), 0)];
        let out = table
            .lookup("lw", &args)
            .unwrap()
            .expand(&args, &symbols, false)
            .unwrap();
        assert_eq!(texts(&out), vec!["lui $at, 4098", "lw $t0, -32768($at)"]);
    }

    #[test]
    fn extern_label_attaches_reloc() {
        let table = table();
        let args = [Arg::Reg(8), Arg::Sym("ext".into(), 0)];
        let out = table
            .lookup("la", &args)
            .unwrap()
            .expand(&args, &symbols(), false)
            .unwrap();
        assert_eq!(out[0].reloc, Some((RelocKind::MipsHi16, "ext".to_owned(), 0)));
        assert_eq!(out[1].reloc, Some((RelocKind::MipsLo16, "ext".to_owned(), 0)));
    }

    #[test]
    fn branch_pseudo_pads_delay_slot() {
        let table = table();
        let args = [Arg::Reg(8), Arg::Sym("x".into(), 0)];
        let entry = table.lookup("beqz", &args).unwrap();
        assert_eq!(entry.len(false), 1);
        assert_eq!(entry.len(true), 2);
        let out = entry.expand(&args, &symbols(), true).unwrap();
        assert_eq!(texts(&out), vec!["beq $t0, $zero, x", "nop"]);
    }

    #[test]
    fn reload_rejects_bad_placeholder() {
        let err = Table::parse("foo $t1\tadd RG1, RGX, $zero").unwrap_err();
        assert!(matches!(err, Cause::BadPlaceholder(_)));
    }
}
