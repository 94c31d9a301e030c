//! Instruction encoding.
//!
//! Real (non-pseudo) instructions are encoded from the MIPS-I table below:
//! R-type (`op=0, rs, rt, rd, shamt, funct`), I-type (`op, rs, rt, imm16`),
//! and J-type (`op, target26`), plus the coprocessor-1 forms.

use indexmap::IndexMap;

use super::image::{RelocKind, Symbol};
use super::lex::{Kind as Tok, Token};
use super::Cause;

/// A parsed instruction operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// General-purpose register.
    Reg(u8),
    /// Floating-point register.
    FReg(u8),
    /// Integer immediate.
    Imm(i64),
    /// Symbol reference with a constant addend.
    Sym(String, i64),
    /// Register-relative address: `offset(base)`.
    OffBase(i64, u8),
}

impl Arg {
    /// Short description used in operand-type diagnostics.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Reg(_) => "register",
            Self::FReg(_) => "floating-point register",
            Self::Imm(_) => "immediate",
            Self::Sym(..) => "symbol",
            Self::OffBase(..) => "offset(base)",
        }
    }
}

/// Parses the comma-separated operand list following a mnemonic.
///
/// # Errors
///
/// Errors with the failing column on unparsable operand forms.
pub fn parse_args(toks: &[Token]) -> Result<Vec<Arg>, (usize, Cause)> {
    let mut args = Vec::new();
    let mut iter = toks.iter().peekable();
    if iter.peek().is_none() {
        return Ok(args);
    }
    loop {
        args.push(parse_arg(&mut iter)?);
        match iter.next() {
            None => break,
            Some(tok) if tok.kind == Tok::Comma => (),
            Some(tok) => {
                return Err((tok.col, Cause::OperandType { expected: "separator" }));
            }
        }
    }
    Ok(args)
}

fn parse_arg(
    iter: &mut std::iter::Peekable<std::slice::Iter<'_, Token>>,
) -> Result<Arg, (usize, Cause)> {
    let Some(tok) = iter.next() else {
        return Err((0, Cause::OperandType { expected: "operand" }));
    };
    let col = tok.col;
    match &tok.kind {
        Tok::Reg(idx) => Ok(Arg::Reg(*idx)),
        Tok::FReg(idx) => Ok(Arg::FReg(*idx)),
        Tok::Plus | Tok::Minus => {
            let sign = if tok.kind == Tok::Minus { -1 } else { 1 };
            match iter.next().map(|it| &it.kind) {
                Some(Tok::Int(value)) => finish_numeric(sign * value, iter),
                _ => Err((col, Cause::OperandType { expected: "immediate" })),
            }
        }
        Tok::Int(value) => finish_numeric(*value, iter),
        Tok::LParen => {
            // Bare `(base)` is an implicit zero offset.
            finish_base(0, iter, col)
        }
        Tok::Ident(name) => {
            let mut addend = 0_i64;
            while let Some(sign) = iter.peek().and_then(|it| match it.kind {
                Tok::Plus => Some(1),
                Tok::Minus => Some(-1),
                _ => None,
            }) {
                iter.next();
                match iter.next().map(|it| &it.kind) {
                    Some(Tok::Int(value)) => addend += sign * value,
                    _ => return Err((col, Cause::OperandType { expected: "addend" })),
                }
            }
            Ok(Arg::Sym(name.clone(), addend))
        }
        _ => Err((col, Cause::OperandType { expected: "operand" })),
    }
}

fn finish_numeric(
    value: i64,
    iter: &mut std::iter::Peekable<std::slice::Iter<'_, Token>>,
) -> Result<Arg, (usize, Cause)> {
    if iter.peek().map(|it| &it.kind) == Some(&Tok::LParen) {
        let col = iter.next().map_or(0, |it| it.col);
        finish_base(value, iter, col)
    } else {
        Ok(Arg::Imm(value))
    }
}

fn finish_base(
    offset: i64,
    iter: &mut std::iter::Peekable<std::slice::Iter<'_, Token>>,
    col: usize,
) -> Result<Arg, (usize, Cause)> {
    let base = match iter.next().map(|it| &it.kind) {
        Some(Tok::Reg(idx)) => *idx,
        _ => return Err((col, Cause::OperandType { expected: "base register" })),
    };
    match iter.next().map(|it| &it.kind) {
        Some(Tok::RParen) => Ok(Arg::OffBase(offset, base)),
        _ => Err((col, Cause::OperandType { expected: "closing parenthesis" })),
    }
}

/// Coprocessor-1 number format field values.
mod fmt {
    pub const S: u8 = 0x10;
    pub const D: u8 = 0x11;
    pub const W: u8 = 0x14;
}

/// Encoding shape of a real instruction.
#[derive(Clone, Copy, Debug)]
enum Kind {
    /// `sll $0, $0, 0`
    Nop,
    /// `rd, rs, rt` with `op=0`.
    ArithR(u8),
    /// `rd, rt, shamt` with `op=0`.
    Shift(u8),
    /// `rd, rt, rs` with `op=0`.
    ShiftV(u8),
    /// `rt, rs, imm`.
    ArithI { op: u8, signed: bool },
    /// `rt, imm`.
    Lui,
    /// `rt, offset(base)`.
    LoadStore(u8),
    /// `rs, rt, target`.
    BranchCmp(u8),
    /// `rs, target` with a fixed `rt` field.
    BranchZ { op: u8, rt: u8 },
    /// `target26`.
    Jump(u8),
    /// `rs`.
    Jr,
    /// `rs` or `rd, rs`.
    Jalr,
    /// `rs, rt` with `op=0`.
    MulDiv(u8),
    /// `rd` (HI/LO reads).
    MoveFrom(u8),
    /// `rs` (HI/LO writes).
    MoveTo(u8),
    /// `syscall`.
    Syscall,
    /// `break [code]`.
    Break,
    /// `fd, fs, ft`.
    FpArith { fmt: u8, funct: u8 },
    /// `fd, fs` (moves, negation, conversions).
    FpUnary {
        fmt: u8,
        funct: u8,
        fd_double: bool,
        fs_double: bool,
    },
    /// `fs, ft` (compares writing the condition flag).
    FpCmp { fmt: u8, funct: u8 },
    /// `target` (branch on condition flag).
    FpBranch { tf: bool },
    /// `rt, fs` (GPR <-> FPR transfers).
    FpMove { to: bool },
    /// `ft, offset(base)`.
    FpLoadStore { op: u8, double: bool },
}

/// Resolves a mnemonic against the real-instruction table.
#[rustfmt::skip]
fn spec(mnemonic: &str) -> Option<Kind> {
    Some(match mnemonic {
        "nop"     => Kind::Nop,
        // Integer ALU, register form.
        "add"     => Kind::ArithR(0x20),
        "addu"    => Kind::ArithR(0x21),
        "sub"     => Kind::ArithR(0x22),
        "subu"    => Kind::ArithR(0x23),
        "and"     => Kind::ArithR(0x24),
        "or"      => Kind::ArithR(0x25),
        "xor"     => Kind::ArithR(0x26),
        "nor"     => Kind::ArithR(0x27),
        "slt"     => Kind::ArithR(0x2a),
        "sltu"    => Kind::ArithR(0x2b),
        // Shifts.
        "sll"     => Kind::Shift(0x00),
        "srl"     => Kind::Shift(0x02),
        "sra"     => Kind::Shift(0x03),
        "sllv"    => Kind::ShiftV(0x04),
        "srlv"    => Kind::ShiftV(0x06),
        "srav"    => Kind::ShiftV(0x07),
        // Integer ALU, immediate form.
        "addi"    => Kind::ArithI { op: 0x08, signed: true },
        "addiu"   => Kind::ArithI { op: 0x09, signed: true },
        "slti"    => Kind::ArithI { op: 0x0a, signed: true },
        "sltiu"   => Kind::ArithI { op: 0x0b, signed: true },
        "andi"    => Kind::ArithI { op: 0x0c, signed: false },
        "ori"     => Kind::ArithI { op: 0x0d, signed: false },
        "xori"    => Kind::ArithI { op: 0x0e, signed: false },
        "lui"     => Kind::Lui,
        // Control transfer.
        "beq"     => Kind::BranchCmp(0x04),
        "bne"     => Kind::BranchCmp(0x05),
        "blez"    => Kind::BranchZ { op: 0x06, rt: 0 },
        "bgtz"    => Kind::BranchZ { op: 0x07, rt: 0 },
        "bltz"    => Kind::BranchZ { op: 0x01, rt: 0 },
        "bgez"    => Kind::BranchZ { op: 0x01, rt: 1 },
        "j"       => Kind::Jump(0x02),
        "jal"     => Kind::Jump(0x03),
        "jr"      => Kind::Jr,
        "jalr"    => Kind::Jalr,
        // Loads and stores.
        "lb"      => Kind::LoadStore(0x20),
        "lh"      => Kind::LoadStore(0x21),
        "lw"      => Kind::LoadStore(0x23),
        "lbu"     => Kind::LoadStore(0x24),
        "lhu"     => Kind::LoadStore(0x25),
        "sb"      => Kind::LoadStore(0x28),
        "sh"      => Kind::LoadStore(0x29),
        "sw"      => Kind::LoadStore(0x2b),
        // Multiply and divide.
        "mult"    => Kind::MulDiv(0x18),
        "multu"   => Kind::MulDiv(0x19),
        "div"     => Kind::MulDiv(0x1a),
        "divu"    => Kind::MulDiv(0x1b),
        "mfhi"    => Kind::MoveFrom(0x10),
        "mflo"    => Kind::MoveFrom(0x12),
        "mthi"    => Kind::MoveTo(0x11),
        "mtlo"    => Kind::MoveTo(0x13),
        // System.
        "syscall" => Kind::Syscall,
        "break"   => Kind::Break,
        // Coprocessor 1 arithmetic.
        "add.s"   => Kind::FpArith { fmt: fmt::S, funct: 0x00 },
        "sub.s"   => Kind::FpArith { fmt: fmt::S, funct: 0x01 },
        "mul.s"   => Kind::FpArith { fmt: fmt::S, funct: 0x02 },
        "div.s"   => Kind::FpArith { fmt: fmt::S, funct: 0x03 },
        "add.d"   => Kind::FpArith { fmt: fmt::D, funct: 0x00 },
        "sub.d"   => Kind::FpArith { fmt: fmt::D, funct: 0x01 },
        "mul.d"   => Kind::FpArith { fmt: fmt::D, funct: 0x02 },
        "div.d"   => Kind::FpArith { fmt: fmt::D, funct: 0x03 },
        // Coprocessor 1 unary and conversions.
        "abs.s"   => Kind::FpUnary { fmt: fmt::S, funct: 0x05, fd_double: false, fs_double: false },
        "abs.d"   => Kind::FpUnary { fmt: fmt::D, funct: 0x05, fd_double: true,  fs_double: true },
        "mov.s"   => Kind::FpUnary { fmt: fmt::S, funct: 0x06, fd_double: false, fs_double: false },
        "mov.d"   => Kind::FpUnary { fmt: fmt::D, funct: 0x06, fd_double: true,  fs_double: true },
        "neg.s"   => Kind::FpUnary { fmt: fmt::S, funct: 0x07, fd_double: false, fs_double: false },
        "neg.d"   => Kind::FpUnary { fmt: fmt::D, funct: 0x07, fd_double: true,  fs_double: true },
        "sqrt.s"  => Kind::FpUnary { fmt: fmt::S, funct: 0x04, fd_double: false, fs_double: false },
        "sqrt.d"  => Kind::FpUnary { fmt: fmt::D, funct: 0x04, fd_double: true,  fs_double: true },
        "cvt.s.d" => Kind::FpUnary { fmt: fmt::D, funct: 0x20, fd_double: false, fs_double: true },
        "cvt.s.w" => Kind::FpUnary { fmt: fmt::W, funct: 0x20, fd_double: false, fs_double: false },
        "cvt.d.s" => Kind::FpUnary { fmt: fmt::S, funct: 0x21, fd_double: true,  fs_double: false },
        "cvt.d.w" => Kind::FpUnary { fmt: fmt::W, funct: 0x21, fd_double: true,  fs_double: false },
        "cvt.w.s" => Kind::FpUnary { fmt: fmt::S, funct: 0x24, fd_double: false, fs_double: false },
        "cvt.w.d" => Kind::FpUnary { fmt: fmt::D, funct: 0x24, fd_double: false, fs_double: true },
        // Coprocessor 1 compares and branches.
        "c.eq.s"  => Kind::FpCmp { fmt: fmt::S, funct: 0x32 },
        "c.lt.s"  => Kind::FpCmp { fmt: fmt::S, funct: 0x3c },
        "c.le.s"  => Kind::FpCmp { fmt: fmt::S, funct: 0x3e },
        "c.eq.d"  => Kind::FpCmp { fmt: fmt::D, funct: 0x32 },
        "c.lt.d"  => Kind::FpCmp { fmt: fmt::D, funct: 0x3c },
        "c.le.d"  => Kind::FpCmp { fmt: fmt::D, funct: 0x3e },
        "bc1t"    => Kind::FpBranch { tf: true },
        "bc1f"    => Kind::FpBranch { tf: false },
        // Coprocessor 1 transfers.
        "mfc1"    => Kind::FpMove { to: false },
        "mtc1"    => Kind::FpMove { to: true },
        "lwc1"    => Kind::FpLoadStore { op: 0x31, double: false },
        "ldc1"    => Kind::FpLoadStore { op: 0x35, double: true },
        "swc1"    => Kind::FpLoadStore { op: 0x39, double: false },
        "sdc1"    => Kind::FpLoadStore { op: 0x3d, double: true },
        _ => return None,
    })
}

/// Checks whether a mnemonic names a real (non-pseudo) instruction.
#[must_use]
pub fn is_real(mnemonic: &str) -> bool {
    spec(mnemonic).is_some()
}

/// Encoding context: the instruction's own address and the symbol table.
#[derive(Debug)]
pub struct Ctx<'a> {
    /// Address of the instruction being encoded.
    pub pc: u32,
    /// Symbol table built by the layout pass.
    pub symbols: &'a IndexMap<String, Symbol>,
}

impl Ctx<'_> {
    fn resolve(&self, name: &str) -> Result<&Symbol, Cause> {
        self.symbols
            .get(name)
            .ok_or_else(|| Cause::UndefinedSymbol(name.to_owned()))
    }
}

/// An encoded instruction word with an optional link-time fixup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Encoded {
    /// Instruction word.
    pub word: u32,
    /// Relocation against an external symbol, if one was referenced.
    pub reloc: Option<(RelocKind, String, i32)>,
}

impl Encoded {
    fn plain(word: u32) -> Self {
        Self { word, reloc: None }
    }
}

/// Encodes a real instruction.
///
/// # Errors
///
/// Errors on unknown mnemonics, operand mismatches, out-of-range immediates
/// or branch targets, and undefined symbols.
pub fn encode(mnemonic: &str, args: &[Arg], ctx: &Ctx) -> Result<Encoded, Cause> {
    let kind = spec(mnemonic).ok_or_else(|| Cause::UnknownMnemonic(mnemonic.to_owned()))?;
    match kind {
        Kind::Nop => {
            arity(args, 0)?;
            Ok(Encoded::plain(0x0000_0000))
        }
        Kind::ArithR(funct) => {
            arity(args, 3)?;
            let (rd, rs, rt) = (reg(&args[0])?, reg(&args[1])?, reg(&args[2])?);
            Ok(Encoded::plain(r(rs, rt, rd, 0, funct)))
        }
        Kind::Shift(funct) => {
            arity(args, 3)?;
            let (rd, rt) = (reg(&args[0])?, reg(&args[1])?);
            let shamt = imm_range(&args[2], 0, 31)? as u8;
            Ok(Encoded::plain(r(0, rt, rd, shamt, funct)))
        }
        Kind::ShiftV(funct) => {
            arity(args, 3)?;
            let (rd, rt, rs) = (reg(&args[0])?, reg(&args[1])?, reg(&args[2])?);
            Ok(Encoded::plain(r(rs, rt, rd, 0, funct)))
        }
        Kind::ArithI { op, signed } => {
            arity(args, 3)?;
            let (rt, rs) = (reg(&args[0])?, reg(&args[1])?);
            let imm = imm16(&args[2], signed)?;
            Ok(Encoded::plain(i(op, rs, rt, imm)))
        }
        Kind::Lui => {
            arity(args, 2)?;
            let rt = reg(&args[0])?;
            let imm = imm16(&args[1], false)?;
            Ok(Encoded::plain(i(0x0f, 0, rt, imm)))
        }
        Kind::LoadStore(op) => {
            arity(args, 2)?;
            let rt = reg(&args[0])?;
            let (off, base) = off_base(&args[1])?;
            Ok(Encoded::plain(i(op, base, rt, signed16(off)?)))
        }
        Kind::BranchCmp(op) => {
            arity(args, 3)?;
            let (rs, rt) = (reg(&args[0])?, reg(&args[1])?);
            branch(op, rs, rt, &args[2], ctx)
        }
        Kind::BranchZ { op, rt } => {
            arity(args, 2)?;
            let rs = reg(&args[0])?;
            branch(op, rs, rt, &args[1], ctx)
        }
        Kind::Jump(op) => {
            arity(args, 1)?;
            match &args[0] {
                Arg::Sym(name, addend) => {
                    let sym = ctx.resolve(name)?;
                    if sym.segment.is_none() {
                        return Ok(Encoded {
                            word: j(op, 0),
                            reloc: Some((RelocKind::Mips26, name.clone(), *addend as i32)),
                        });
                    }
                    let target = sym.address.wrapping_add(*addend as u32);
                    Ok(Encoded::plain(j(op, (target >> 2) & 0x03ff_ffff)))
                }
                Arg::Imm(addr) => Ok(Encoded::plain(j(op, ((*addr as u32) >> 2) & 0x03ff_ffff))),
                arg => Err(expected("jump target", arg)),
            }
        }
        Kind::Jr => {
            arity(args, 1)?;
            Ok(Encoded::plain(r(reg(&args[0])?, 0, 0, 0, 0x08)))
        }
        Kind::Jalr => {
            // `jalr rs` defaults the link register to `$ra`.
            let (rd, rs) = match args {
                [rs] => (31, reg(rs)?),
                [rd, rs] => (reg(rd)?, reg(rs)?),
                _ => {
                    return Err(Cause::OperandCount {
                        expected: 2,
                        found: args.len(),
                    })
                }
            };
            Ok(Encoded::plain(r(rs, 0, rd, 0, 0x09)))
        }
        Kind::MulDiv(funct) => {
            arity(args, 2)?;
            Ok(Encoded::plain(r(reg(&args[0])?, reg(&args[1])?, 0, 0, funct)))
        }
        Kind::MoveFrom(funct) => {
            arity(args, 1)?;
            Ok(Encoded::plain(r(0, 0, reg(&args[0])?, 0, funct)))
        }
        Kind::MoveTo(funct) => {
            arity(args, 1)?;
            Ok(Encoded::plain(r(reg(&args[0])?, 0, 0, 0, funct)))
        }
        Kind::Syscall => {
            arity(args, 0)?;
            Ok(Encoded::plain(0x0000_000c))
        }
        Kind::Break => {
            let code = match args {
                [] => 0,
                [arg] => imm_range(arg, 0, 0x000f_ffff)? as u32,
                _ => {
                    return Err(Cause::OperandCount {
                        expected: 1,
                        found: args.len(),
                    })
                }
            };
            Ok(Encoded::plain((code << 6) | 0x0d))
        }
        Kind::FpArith { fmt, funct } => {
            arity(args, 3)?;
            let double = fmt == fmt::D;
            let fd = freg(&args[0], double)?;
            let fs = freg(&args[1], double)?;
            let ft = freg(&args[2], double)?;
            Ok(Encoded::plain(cop1(fmt, ft, fs, fd, funct)))
        }
        Kind::FpUnary {
            fmt,
            funct,
            fd_double,
            fs_double,
        } => {
            arity(args, 2)?;
            let fd = freg(&args[0], fd_double)?;
            let fs = freg(&args[1], fs_double)?;
            Ok(Encoded::plain(cop1(fmt, 0, fs, fd, funct)))
        }
        Kind::FpCmp { fmt, funct } => {
            arity(args, 2)?;
            let double = fmt == fmt::D;
            let fs = freg(&args[0], double)?;
            let ft = freg(&args[1], double)?;
            Ok(Encoded::plain(cop1(fmt, ft, fs, 0, funct)))
        }
        Kind::FpBranch { tf } => {
            arity(args, 1)?;
            branch(0x11, 0x08, u8::from(tf), &args[0], ctx)
        }
        Kind::FpMove { to } => {
            arity(args, 2)?;
            let rt = reg(&args[0])?;
            let fs = freg(&args[1], false)?;
            let rs = if to { 0x04 } else { 0x00 };
            Ok(Encoded::plain(cop1(rs, rt, fs, 0, 0)))
        }
        Kind::FpLoadStore { op, double } => {
            arity(args, 2)?;
            let ft = freg(&args[0], double)?;
            let (off, base) = off_base(&args[1])?;
            Ok(Encoded::plain(i(op, base, ft, signed16(off)?)))
        }
    }
}

/// Checks whether an operand list is plausibly accepted by a real mnemonic.
///
/// Used to arbitrate between a real instruction and a pseudo-instruction
/// sharing the mnemonic (`div $t0, $t1` vs `div $t0, $t1, $t2`).
#[must_use]
pub fn accepts(mnemonic: &str, args: &[Arg]) -> bool {
    let Some(kind) = spec(mnemonic) else {
        return false;
    };
    match kind {
        Kind::Nop | Kind::Syscall => args.is_empty(),
        Kind::Break => args.len() <= 1,
        Kind::ArithR(_) | Kind::ShiftV(_) => {
            args.len() == 3 && args.iter().all(|it| matches!(it, Arg::Reg(_)))
        }
        Kind::Shift(_) => matches!(args, [Arg::Reg(_), Arg::Reg(_), Arg::Imm(_)]),
        Kind::ArithI { .. } => matches!(args, [Arg::Reg(_), Arg::Reg(_), Arg::Imm(_)]),
        Kind::Lui => matches!(args, [Arg::Reg(_), Arg::Imm(_)]),
        Kind::LoadStore(_) => matches!(args, [Arg::Reg(_), Arg::OffBase(..)]),
        Kind::BranchCmp(_) => {
            matches!(args, [Arg::Reg(_), Arg::Reg(_), Arg::Sym(..) | Arg::Imm(_)])
        }
        Kind::BranchZ { .. } => matches!(args, [Arg::Reg(_), Arg::Sym(..) | Arg::Imm(_)]),
        Kind::Jump(_) => matches!(args, [Arg::Sym(..) | Arg::Imm(_)]),
        Kind::Jr | Kind::MoveTo(_) | Kind::MoveFrom(_) => matches!(args, [Arg::Reg(_)]),
        Kind::Jalr => {
            matches!(args, [Arg::Reg(_)] | [Arg::Reg(_), Arg::Reg(_)])
        }
        Kind::MulDiv(_) => matches!(args, [Arg::Reg(_), Arg::Reg(_)]),
        Kind::FpArith { .. } => {
            args.len() == 3 && args.iter().all(|it| matches!(it, Arg::FReg(_)))
        }
        Kind::FpUnary { .. } | Kind::FpCmp { .. } => {
            args.len() == 2 && args.iter().all(|it| matches!(it, Arg::FReg(_)))
        }
        Kind::FpBranch { .. } => matches!(args, [Arg::Sym(..) | Arg::Imm(_)]),
        Kind::FpMove { .. } => matches!(args, [Arg::Reg(_), Arg::FReg(_)]),
        Kind::FpLoadStore { .. } => matches!(args, [Arg::FReg(_), Arg::OffBase(..)]),
    }
}

fn branch(op: u8, rs: u8, rt: u8, target: &Arg, ctx: &Ctx) -> Result<Encoded, Cause> {
    match target {
        Arg::Sym(name, addend) => {
            let sym = ctx.resolve(name)?;
            if sym.segment.is_none() {
                return Ok(Encoded {
                    word: i(op, rs, rt, 0),
                    reloc: Some((RelocKind::MipsPc16, name.clone(), *addend as i32)),
                });
            }
            let target = i64::from(sym.address) + addend;
            let offset = (target - i64::from(ctx.pc) - 4) >> 2;
            Ok(Encoded::plain(i(op, rs, rt, signed16(offset)?)))
        }
        // A bare immediate is a raw instruction-count offset.
        Arg::Imm(offset) => Ok(Encoded::plain(i(op, rs, rt, signed16(*offset)?))),
        arg => Err(expected("branch target", arg)),
    }
}

fn arity(args: &[Arg], expected: usize) -> Result<(), Cause> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Cause::OperandCount {
            expected,
            found: args.len(),
        })
    }
}

fn expected(expected: &'static str, _found: &Arg) -> Cause {
    Cause::OperandType { expected }
}

fn reg(arg: &Arg) -> Result<u8, Cause> {
    match arg {
        Arg::Reg(idx) => Ok(*idx),
        arg => Err(expected("register", arg)),
    }
}

fn freg(arg: &Arg, double: bool) -> Result<u8, Cause> {
    match arg {
        Arg::FReg(idx) if double && idx % 2 != 0 => {
            Err(expected("even floating-point register", arg))
        }
        Arg::FReg(idx) => Ok(*idx),
        arg => Err(expected("floating-point register", arg)),
    }
}

fn off_base(arg: &Arg) -> Result<(i64, u8), Cause> {
    match arg {
        Arg::OffBase(off, base) => Ok((*off, *base)),
        arg => Err(expected("offset(base)", arg)),
    }
}

fn imm_range(arg: &Arg, lo: i64, hi: i64) -> Result<i64, Cause> {
    match arg {
        Arg::Imm(value) if (lo..=hi).contains(value) => Ok(*value),
        Arg::Imm(value) => Err(Cause::ImmediateRange(*value)),
        arg => Err(expected("immediate", arg)),
    }
}

fn imm16(arg: &Arg, signed: bool) -> Result<u16, Cause> {
    let value = match arg {
        Arg::Imm(value) => *value,
        arg => return Err(expected("immediate", arg)),
    };
    // Signed contexts also admit 16-bit patterns written as unsigned.
    let ok = if signed {
        (-0x8000..=0xffff).contains(&value)
    } else {
        (0..=0xffff).contains(&value)
    };
    if !ok {
        return Err(Cause::ImmediateRange(value));
    }
    Ok(value as u16)
}

fn signed16(value: i64) -> Result<u16, Cause> {
    if !(-0x8000..=0x7fff).contains(&value) {
        return Err(Cause::BranchRange(value));
    }
    Ok(value as u16)
}

fn r(rs: u8, rt: u8, rd: u8, shamt: u8, funct: u8) -> u32 {
    (u32::from(rs) << 21)
        | (u32::from(rt) << 16)
        | (u32::from(rd) << 11)
        | (u32::from(shamt) << 6)
        | u32::from(funct)
}

fn i(op: u8, rs: u8, rt: u8, imm: u16) -> u32 {
    (u32::from(op) << 26) | (u32::from(rs) << 21) | (u32::from(rt) << 16) | u32::from(imm)
}

fn j(op: u8, target: u32) -> u32 {
    (u32::from(op) << 26) | (target & 0x03ff_ffff)
}

fn cop1(rs: u8, rt: u8, fs: u8, fd: u8, funct: u8) -> u32 {
    (0x11 << 26)
        | (u32::from(rs) << 21)
        | (u32::from(rt) << 16)
        | (u32::from(fs) << 11)
        | (u32::from(fd) << 6)
        | u32::from(funct)
}

#[cfg(test)]
mod tests {
    use super::super::image::Segment;
    use super::*;

    fn ctx(symbols: &IndexMap<String, Symbol>) -> Ctx {
        Ctx {
            pc: 0x0040_0000,
            symbols,
        }
    }

    fn enc(mnemonic: &str, args: &[Arg]) -> u32 {
        let symbols = IndexMap::new();
        encode(mnemonic, args, &ctx(&symbols)).unwrap().word
    }

    #[test]
    fn encode_arith_r_works() {
        // add $t2, $t0, $t1
        assert_eq!(enc("add", &[Arg::Reg(10), Arg::Reg(8), Arg::Reg(9)]), 0x0109_5020);
    }

    #[test]
    fn encode_arith_i_works() {
        // addi $t0, $zero, 7
        assert_eq!(enc("addi", &[Arg::Reg(8), Arg::Reg(0), Arg::Imm(7)]), 0x2008_0007);
        // addi $t0, $zero, -1
        assert_eq!(enc("addi", &[Arg::Reg(8), Arg::Reg(0), Arg::Imm(-1)]), 0x2008_ffff);
    }

    #[test]
    fn encode_load_store_works() {
        // lw $t0, 4($sp)
        assert_eq!(enc("lw", &[Arg::Reg(8), Arg::OffBase(4, 29)]), 0x8fa8_0004);
        // sw $t0, -8($fp)
        assert_eq!(enc("sw", &[Arg::Reg(8), Arg::OffBase(-8, 30)]), 0xafc8_fff8);
    }

    #[test]
    fn encode_jump_works() {
        let mut symbols = IndexMap::new();
        symbols.insert(
            "main".to_owned(),
            Symbol {
                name: "main".to_owned(),
                address: 0x0040_0000,
                segment: Some(Segment::Text),
            },
        );
        let out = encode("j", &[Arg::Sym("main".into(), 0)], &ctx(&symbols)).unwrap();
        assert_eq!(out.word, 0x0810_0000);
    }

    #[test]
    fn encode_branch_offset_works() {
        let mut symbols = IndexMap::new();
        symbols.insert(
            "loop".to_owned(),
            Symbol {
                name: "loop".to_owned(),
                address: 0x0040_0000,
                segment: Some(Segment::Text),
            },
        );
        // Branch at 0x00400008 back to 0x00400000: offset -3.
        let out = encode(
            "bne",
            &[Arg::Reg(8), Arg::Reg(0), Arg::Sym("loop".into(), 0)],
            &Ctx {
                pc: 0x0040_0008,
                symbols: &symbols,
            },
        )
        .unwrap();
        assert_eq!(out.word, 0x1500_fffd);
    }

    #[test]
    fn encode_branch_range_fails() {
        let mut symbols = IndexMap::new();
        symbols.insert(
            "far".to_owned(),
            Symbol {
                name: "far".to_owned(),
                address: 0x0044_0000,
                segment: Some(Segment::Text),
            },
        );
        let err = encode(
            "beq",
            &[Arg::Reg(0), Arg::Reg(0), Arg::Sym("far".into(), 0)],
            &ctx(&symbols),
        )
        .unwrap_err();
        assert!(matches!(err, Cause::BranchRange(_)));
    }

    #[test]
    fn encode_extern_jump_emits_reloc() {
        let mut symbols = IndexMap::new();
        symbols.insert(
            "libfn".to_owned(),
            Symbol {
                name: "libfn".to_owned(),
                address: 0,
                segment: None,
            },
        );
        let out = encode("jal", &[Arg::Sym("libfn".into(), 0)], &ctx(&symbols)).unwrap();
        assert_eq!(out.word, 0x0c00_0000);
        assert_eq!(out.reloc, Some((RelocKind::Mips26, "libfn".to_owned(), 0)));
    }

    #[test]
    fn encode_immediate_range_fails() {
        let err = encode(
            "addi",
            &[Arg::Reg(8), Arg::Reg(0), Arg::Imm(0x1_0000)],
            &ctx(&IndexMap::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Cause::ImmediateRange(_)));
    }

    #[test]
    fn encode_syscall_works() {
        assert_eq!(enc("syscall", &[]), 0x0000_000c);
        assert_eq!(enc("nop", &[]), 0x0000_0000);
    }

    #[test]
    fn encode_fp_arith_works() {
        // add.s $f0, $f1, $f2
        assert_eq!(
            enc("add.s", &[Arg::FReg(0), Arg::FReg(1), Arg::FReg(2)]),
            0x4602_0800
        );
        // add.d rejects odd registers.
        let err = encode(
            "add.d",
            &[Arg::FReg(1), Arg::FReg(2), Arg::FReg(4)],
            &ctx(&IndexMap::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Cause::OperandType { .. }));
    }

    #[test]
    fn encode_mfc1_works() {
        // mfc1 $t0, $f2
        assert_eq!(enc("mfc1", &[Arg::Reg(8), Arg::FReg(2)]), 0x4408_1000);
    }

    #[test]
    fn parse_args_works() {
        let toks = super::super::lex::scan("$t0, -4($sp)").unwrap();
        assert_eq!(
            parse_args(&toks).unwrap(),
            vec![Arg::Reg(8), Arg::OffBase(-4, 29)]
        );
        let toks = super::super::lex::scan("x + 4").unwrap();
        assert_eq!(parse_args(&toks).unwrap(), vec![Arg::Sym("x".into(), 4)]);
    }
}
