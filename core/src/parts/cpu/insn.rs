//! Instruction set architecture.
//!
//! The decoder turns a 32-bit word into a tagged [`Instruction`]; the
//! executor dispatches on the tag in a single match. [`Display`] renders
//! canonical syntax that the assembler accepts back verbatim.

use std::fmt::Display;

use mipsim_arch::Word;
use thiserror::Error;

use crate::asm::gpr_name;

/// Integer ALU operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AluOp {
    /// Signed addition, trapping on overflow.
    Add,
    /// Wrapping addition.
    Addu,
    /// Signed subtraction, trapping on overflow.
    Sub,
    /// Wrapping subtraction.
    Subu,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NOR.
    Nor,
    /// Signed set-on-less-than.
    Slt,
    /// Unsigned set-on-less-than.
    Sltu,
    /// Left shift by immediate.
    Sll,
    /// Logical right shift by immediate.
    Srl,
    /// Arithmetic right shift by immediate.
    Sra,
    /// Left shift by register.
    Sllv,
    /// Logical right shift by register.
    Srlv,
    /// Arithmetic right shift by register.
    Srav,
    /// Load upper immediate.
    Lui,
}

/// Branch comparison condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cond {
    /// `rs == rt`
    Eq,
    /// `rs != rt`
    Ne,
    /// `rs <= 0`
    Lez,
    /// `rs > 0`
    Gtz,
    /// `rs < 0`
    Ltz,
    /// `rs >= 0`
    Gez,
}

/// Memory access width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Width {
    /// One byte.
    Byte,
    /// Two bytes.
    Half,
    /// Four bytes.
    Word,
}

/// Multiply/divide unit operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MulOp {
    /// Signed multiply into HI/LO.
    Mult,
    /// Unsigned multiply into HI/LO.
    Multu,
    /// Signed divide into LO (quotient) and HI (remainder).
    Div,
    /// Unsigned divide into LO and HI.
    Divu,
}

/// HI/LO register transfers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HiLoOp {
    /// `rd <- HI`
    Mfhi,
    /// `rd <- LO`
    Mflo,
    /// `HI <- rs`
    Mthi,
    /// `LO <- rs`
    Mtlo,
}

/// Coprocessor-1 number format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fmt {
    /// Single precision.
    Single,
    /// Double precision.
    Double,
    /// 32-bit fixed point.
    Word,
}

impl Fmt {
    fn suffix(self) -> &'static str {
        match self {
            Self::Single => "s",
            Self::Double => "d",
            Self::Word => "w",
        }
    }
}

/// Coprocessor-1 arithmetic operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FpOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
}

/// Coprocessor-1 unary operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FpUnOp {
    /// Absolute value.
    Abs,
    /// Register move.
    Mov,
    /// Negation.
    Neg,
    /// Square root.
    Sqrt,
    /// Conversion into the given destination format.
    Cvt(Fmt),
}

/// Coprocessor-1 compare condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FpCond {
    /// Equal.
    Eq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
}

/// A decoded instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction {
    /// `sll $zero, $zero, 0` and friends.
    Nop,
    /// Three-register ALU operation.
    AluR {
        /// Operation.
        op: AluOp,
        /// Destination.
        rd: u8,
        /// First source.
        rs: u8,
        /// Second source.
        rt: u8,
        /// Shift amount for immediate shifts.
        shamt: u8,
    },
    /// Immediate ALU operation.
    AluI {
        /// Operation.
        op: AluOp,
        /// Destination.
        rt: u8,
        /// Source.
        rs: u8,
        /// Raw 16-bit immediate.
        imm: u16,
    },
    /// Memory load.
    Load {
        /// Access width.
        width: Width,
        /// Sign-extend the loaded value.
        signed: bool,
        /// Destination.
        rt: u8,
        /// Base register.
        base: u8,
        /// Signed byte offset.
        offset: i16,
    },
    /// Memory store.
    Store {
        /// Access width.
        width: Width,
        /// Source.
        rt: u8,
        /// Base register.
        base: u8,
        /// Signed byte offset.
        offset: i16,
    },
    /// Conditional branch.
    Branch {
        /// Condition.
        cond: Cond,
        /// First comparand.
        rs: u8,
        /// Second comparand (zero-compare branches ignore it).
        rt: u8,
        /// Signed instruction-count offset from the delay slot.
        offset: i16,
    },
    /// Absolute jump.
    Jump {
        /// Write the return address into `$ra`.
        link: bool,
        /// 26-bit word target.
        target: u32,
    },
    /// Register-indirect jump.
    JumpReg {
        /// Link register for `jalr` (`$ra` by convention, 0 for `jr`).
        rd: u8,
        /// Target register.
        rs: u8,
        /// Write the return address.
        link: bool,
    },
    /// Multiply/divide unit operation.
    MulDiv {
        /// Operation.
        op: MulOp,
        /// First operand.
        rs: u8,
        /// Second operand.
        rt: u8,
    },
    /// HI/LO transfer.
    HiLo {
        /// Operation.
        op: HiLoOp,
        /// GPR side of the transfer.
        reg: u8,
    },
    /// Coprocessor-1 arithmetic.
    FpArith {
        /// Operation.
        op: FpOp,
        /// Operand format.
        fmt: Fmt,
        /// Destination.
        fd: u8,
        /// First source.
        fs: u8,
        /// Second source.
        ft: u8,
    },
    /// Coprocessor-1 unary operation or conversion.
    FpUnary {
        /// Operation.
        op: FpUnOp,
        /// Source format.
        fmt: Fmt,
        /// Destination.
        fd: u8,
        /// Source.
        fs: u8,
    },
    /// Coprocessor-1 compare, writing the condition flag.
    FpCompare {
        /// Condition.
        cond: FpCond,
        /// Operand format.
        fmt: Fmt,
        /// First comparand.
        fs: u8,
        /// Second comparand.
        ft: u8,
    },
    /// Branch on the coprocessor-1 condition flag.
    FpBranch {
        /// Branch when the flag equals this value.
        on: bool,
        /// Signed instruction-count offset.
        offset: i16,
    },
    /// GPR/FPR transfer.
    FpMove {
        /// Direction: `true` for `mtc1`.
        to: bool,
        /// GPR side.
        rt: u8,
        /// FPR side.
        fs: u8,
    },
    /// Coprocessor-1 load.
    FpLoad {
        /// 64-bit access.
        double: bool,
        /// Destination FPR.
        ft: u8,
        /// Base register.
        base: u8,
        /// Signed byte offset.
        offset: i16,
    },
    /// Coprocessor-1 store.
    FpStore {
        /// 64-bit access.
        double: bool,
        /// Source FPR.
        ft: u8,
        /// Base register.
        base: u8,
        /// Signed byte offset.
        offset: i16,
    },
    /// Environment call.
    Syscall,
    /// Breakpoint trap with its code field.
    Break {
        /// 20-bit code field.
        code: u32,
    },
}

/// Decodes a 32-bit instruction word.
///
/// # Errors
///
/// Errors on encodings outside the supported MIPS-I subset.
#[allow(clippy::too_many_lines)]
pub fn decode(word: Word) -> Result<Instruction> {
    let op = (word >> 26) as u8;
    let rs = ((word >> 21) & 0x1f) as u8;
    let rt = ((word >> 16) & 0x1f) as u8;
    let rd = ((word >> 11) & 0x1f) as u8;
    let shamt = ((word >> 6) & 0x1f) as u8;
    let funct = (word & 0x3f) as u8;
    let imm = (word & 0xffff) as u16;
    let offset = imm as i16;

    let insn = match op {
        0x00 => match funct {
            _ if word == 0 => Instruction::Nop,
            0x00 => alu_r(AluOp::Sll, rd, 0, rt, shamt),
            0x02 => alu_r(AluOp::Srl, rd, 0, rt, shamt),
            0x03 => alu_r(AluOp::Sra, rd, 0, rt, shamt),
            0x04 => alu_r(AluOp::Sllv, rd, rs, rt, 0),
            0x06 => alu_r(AluOp::Srlv, rd, rs, rt, 0),
            0x07 => alu_r(AluOp::Srav, rd, rs, rt, 0),
            0x08 => Instruction::JumpReg {
                rd: 0,
                rs,
                link: false,
            },
            0x09 => Instruction::JumpReg { rd, rs, link: true },
            0x0c => Instruction::Syscall,
            0x0d => Instruction::Break { code: word >> 6 },
            0x10 => Instruction::HiLo {
                op: HiLoOp::Mfhi,
                reg: rd,
            },
            0x11 => Instruction::HiLo {
                op: HiLoOp::Mthi,
                reg: rs,
            },
            0x12 => Instruction::HiLo {
                op: HiLoOp::Mflo,
                reg: rd,
            },
            0x13 => Instruction::HiLo {
                op: HiLoOp::Mtlo,
                reg: rs,
            },
            0x18 => mul_div(MulOp::Mult, rs, rt),
            0x19 => mul_div(MulOp::Multu, rs, rt),
            0x1a => mul_div(MulOp::Div, rs, rt),
            0x1b => mul_div(MulOp::Divu, rs, rt),
            0x20 => alu_r(AluOp::Add, rd, rs, rt, 0),
            0x21 => alu_r(AluOp::Addu, rd, rs, rt, 0),
            0x22 => alu_r(AluOp::Sub, rd, rs, rt, 0),
            0x23 => alu_r(AluOp::Subu, rd, rs, rt, 0),
            0x24 => alu_r(AluOp::And, rd, rs, rt, 0),
            0x25 => alu_r(AluOp::Or, rd, rs, rt, 0),
            0x26 => alu_r(AluOp::Xor, rd, rs, rt, 0),
            0x27 => alu_r(AluOp::Nor, rd, rs, rt, 0),
            0x2a => alu_r(AluOp::Slt, rd, rs, rt, 0),
            0x2b => alu_r(AluOp::Sltu, rd, rs, rt, 0),
            _ => return Err(Error::Illegal { word }),
        },
        0x01 => match rt {
            0 => branch(Cond::Ltz, rs, 0, offset),
            1 => branch(Cond::Gez, rs, 0, offset),
            _ => return Err(Error::Illegal { word }),
        },
        0x02 => Instruction::Jump {
            link: false,
            target: word & 0x03ff_ffff,
        },
        0x03 => Instruction::Jump {
            link: true,
            target: word & 0x03ff_ffff,
        },
        0x04 => branch(Cond::Eq, rs, rt, offset),
        0x05 => branch(Cond::Ne, rs, rt, offset),
        0x06 => branch(Cond::Lez, rs, 0, offset),
        0x07 => branch(Cond::Gtz, rs, 0, offset),
        0x08 => alu_i(AluOp::Add, rt, rs, imm),
        0x09 => alu_i(AluOp::Addu, rt, rs, imm),
        0x0a => alu_i(AluOp::Slt, rt, rs, imm),
        0x0b => alu_i(AluOp::Sltu, rt, rs, imm),
        0x0c => alu_i(AluOp::And, rt, rs, imm),
        0x0d => alu_i(AluOp::Or, rt, rs, imm),
        0x0e => alu_i(AluOp::Xor, rt, rs, imm),
        0x0f => alu_i(AluOp::Lui, rt, 0, imm),
        0x11 => decode_cop1(word, rs, rt, rd, funct, offset)?,
        0x20 => load(Width::Byte, true, rt, rs, offset),
        0x21 => load(Width::Half, true, rt, rs, offset),
        0x23 => load(Width::Word, true, rt, rs, offset),
        0x24 => load(Width::Byte, false, rt, rs, offset),
        0x25 => load(Width::Half, false, rt, rs, offset),
        0x28 => store(Width::Byte, rt, rs, offset),
        0x29 => store(Width::Half, rt, rs, offset),
        0x2b => store(Width::Word, rt, rs, offset),
        0x31 => Instruction::FpLoad {
            double: false,
            ft: rt,
            base: rs,
            offset,
        },
        0x35 => Instruction::FpLoad {
            double: true,
            ft: rt,
            base: rs,
            offset,
        },
        0x39 => Instruction::FpStore {
            double: false,
            ft: rt,
            base: rs,
            offset,
        },
        0x3d => Instruction::FpStore {
            double: true,
            ft: rt,
            base: rs,
            offset,
        },
        _ => return Err(Error::Illegal { word }),
    };
    Ok(insn)
}

fn decode_cop1(word: Word, rs: u8, rt: u8, rd: u8, funct: u8, offset: i16) -> Result<Instruction> {
    let fmt = match rs {
        0x00 => {
            return Ok(Instruction::FpMove {
                to: false,
                rt,
                fs: rd,
            })
        }
        0x04 => {
            return Ok(Instruction::FpMove {
                to: true,
                rt,
                fs: rd,
            })
        }
        0x08 => {
            return Ok(Instruction::FpBranch {
                on: rt & 1 != 0,
                offset,
            })
        }
        0x10 => Fmt::Single,
        0x11 => Fmt::Double,
        0x14 => Fmt::Word,
        _ => return Err(Error::Illegal { word }),
    };
    // The word format only participates in conversions.
    if fmt == Fmt::Word && !matches!(funct, 0x20 | 0x21) {
        return Err(Error::Illegal { word });
    }
    let (fd, fs, ft) = (((word >> 6) & 0x1f) as u8, rd, rt);
    let insn = match funct {
        0x00 => fp_arith(FpOp::Add, fmt, fd, fs, ft),
        0x01 => fp_arith(FpOp::Sub, fmt, fd, fs, ft),
        0x02 => fp_arith(FpOp::Mul, fmt, fd, fs, ft),
        0x03 => fp_arith(FpOp::Div, fmt, fd, fs, ft),
        0x04 => fp_unary(FpUnOp::Sqrt, fmt, fd, fs),
        0x05 => fp_unary(FpUnOp::Abs, fmt, fd, fs),
        0x06 => fp_unary(FpUnOp::Mov, fmt, fd, fs),
        0x07 => fp_unary(FpUnOp::Neg, fmt, fd, fs),
        0x20 => fp_unary(FpUnOp::Cvt(Fmt::Single), fmt, fd, fs),
        0x21 => fp_unary(FpUnOp::Cvt(Fmt::Double), fmt, fd, fs),
        0x24 => fp_unary(FpUnOp::Cvt(Fmt::Word), fmt, fd, fs),
        0x32 => fp_compare(FpCond::Eq, fmt, fs, ft),
        0x3c => fp_compare(FpCond::Lt, fmt, fs, ft),
        0x3e => fp_compare(FpCond::Le, fmt, fs, ft),
        _ => return Err(Error::Illegal { word }),
    };
    Ok(insn)
}

fn alu_r(op: AluOp, rd: u8, rs: u8, rt: u8, shamt: u8) -> Instruction {
    Instruction::AluR {
        op,
        rd,
        rs,
        rt,
        shamt,
    }
}

fn alu_i(op: AluOp, rt: u8, rs: u8, imm: u16) -> Instruction {
    Instruction::AluI { op, rt, rs, imm }
}

fn load(width: Width, signed: bool, rt: u8, base: u8, offset: i16) -> Instruction {
    Instruction::Load {
        width,
        signed,
        rt,
        base,
        offset,
    }
}

fn store(width: Width, rt: u8, base: u8, offset: i16) -> Instruction {
    Instruction::Store {
        width,
        rt,
        base,
        offset,
    }
}

fn branch(cond: Cond, rs: u8, rt: u8, offset: i16) -> Instruction {
    Instruction::Branch {
        cond,
        rs,
        rt,
        offset,
    }
}

fn mul_div(op: MulOp, rs: u8, rt: u8) -> Instruction {
    Instruction::MulDiv { op, rs, rt }
}

fn fp_arith(op: FpOp, fmt: Fmt, fd: u8, fs: u8, ft: u8) -> Instruction {
    Instruction::FpArith { op, fmt, fd, fs, ft }
}

fn fp_unary(op: FpUnOp, fmt: Fmt, fd: u8, fs: u8) -> Instruction {
    Instruction::FpUnary { op, fmt, fd, fs }
}

fn fp_compare(cond: FpCond, fmt: Fmt, fs: u8, ft: u8) -> Instruction {
    Instruction::FpCompare { cond, fmt, fs, ft }
}

impl Instruction {
    /// Returns the instruction's mnemonic.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::AluR { op, .. } => match op {
                AluOp::Add => "add",
                AluOp::Addu => "addu",
                AluOp::Sub => "sub",
                AluOp::Subu => "subu",
                AluOp::And => "and",
                AluOp::Or => "or",
                AluOp::Xor => "xor",
                AluOp::Nor => "nor",
                AluOp::Slt => "slt",
                AluOp::Sltu => "sltu",
                AluOp::Sll => "sll",
                AluOp::Srl => "srl",
                AluOp::Sra => "sra",
                AluOp::Sllv => "sllv",
                AluOp::Srlv => "srlv",
                AluOp::Srav => "srav",
                AluOp::Lui => "lui",
            },
            Self::AluI { op, .. } => match op {
                AluOp::Add => "addi",
                AluOp::Addu => "addiu",
                AluOp::Slt => "slti",
                AluOp::Sltu => "sltiu",
                AluOp::And => "andi",
                AluOp::Or => "ori",
                AluOp::Xor => "xori",
                AluOp::Lui => "lui",
                _ => "addi",
            },
            Self::Load { width, signed, .. } => match (width, signed) {
                (Width::Byte, true) => "lb",
                (Width::Byte, false) => "lbu",
                (Width::Half, true) => "lh",
                (Width::Half, false) => "lhu",
                (Width::Word, _) => "lw",
            },
            Self::Store { width, .. } => match width {
                Width::Byte => "sb",
                Width::Half => "sh",
                Width::Word => "sw",
            },
            Self::Branch { cond, .. } => match cond {
                Cond::Eq => "beq",
                Cond::Ne => "bne",
                Cond::Lez => "blez",
                Cond::Gtz => "bgtz",
                Cond::Ltz => "bltz",
                Cond::Gez => "bgez",
            },
            Self::Jump { link: false, .. } => "j",
            Self::Jump { link: true, .. } => "jal",
            Self::JumpReg { link: false, .. } => "jr",
            Self::JumpReg { link: true, .. } => "jalr",
            Self::MulDiv { op, .. } => match op {
                MulOp::Mult => "mult",
                MulOp::Multu => "multu",
                MulOp::Div => "div",
                MulOp::Divu => "divu",
            },
            Self::HiLo { op, .. } => match op {
                HiLoOp::Mfhi => "mfhi",
                HiLoOp::Mflo => "mflo",
                HiLoOp::Mthi => "mthi",
                HiLoOp::Mtlo => "mtlo",
            },
            Self::FpArith { op, fmt, .. } => match (op, fmt) {
                (FpOp::Add, Fmt::Single) => "add.s",
                (FpOp::Sub, Fmt::Single) => "sub.s",
                (FpOp::Mul, Fmt::Single) => "mul.s",
                (FpOp::Div, Fmt::Single) => "div.s",
                (FpOp::Add, _) => "add.d",
                (FpOp::Sub, _) => "sub.d",
                (FpOp::Mul, _) => "mul.d",
                (FpOp::Div, _) => "div.d",
            },
            Self::FpUnary { op, fmt, .. } => match (op, fmt) {
                (FpUnOp::Abs, Fmt::Single) => "abs.s",
                (FpUnOp::Abs, _) => "abs.d",
                (FpUnOp::Mov, Fmt::Single) => "mov.s",
                (FpUnOp::Mov, _) => "mov.d",
                (FpUnOp::Neg, Fmt::Single) => "neg.s",
                (FpUnOp::Neg, _) => "neg.d",
                (FpUnOp::Sqrt, Fmt::Single) => "sqrt.s",
                (FpUnOp::Sqrt, _) => "sqrt.d",
                (FpUnOp::Cvt(Fmt::Single), Fmt::Double) => "cvt.s.d",
                (FpUnOp::Cvt(Fmt::Single), _) => "cvt.s.w",
                (FpUnOp::Cvt(Fmt::Double), Fmt::Single) => "cvt.d.s",
                (FpUnOp::Cvt(Fmt::Double), _) => "cvt.d.w",
                (FpUnOp::Cvt(Fmt::Word), Fmt::Single) => "cvt.w.s",
                (FpUnOp::Cvt(Fmt::Word), _) => "cvt.w.d",
            },
            Self::FpCompare { cond, fmt, .. } => match (cond, fmt) {
                (FpCond::Eq, Fmt::Single) => "c.eq.s",
                (FpCond::Lt, Fmt::Single) => "c.lt.s",
                (FpCond::Le, Fmt::Single) => "c.le.s",
                (FpCond::Eq, _) => "c.eq.d",
                (FpCond::Lt, _) => "c.lt.d",
                (FpCond::Le, _) => "c.le.d",
            },
            Self::FpBranch { on: true, .. } => "bc1t",
            Self::FpBranch { on: false, .. } => "bc1f",
            Self::FpMove { to: true, .. } => "mtc1",
            Self::FpMove { to: false, .. } => "mfc1",
            Self::FpLoad { double: false, .. } => "lwc1",
            Self::FpLoad { double: true, .. } => "ldc1",
            Self::FpStore { double: false, .. } => "swc1",
            Self::FpStore { double: true, .. } => "sdc1",
            Self::Syscall => "syscall",
            Self::Break { .. } => "break",
        }
    }

    /// Checks whether the instruction reads memory.
    #[must_use]
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::FpLoad { .. })
    }

    /// Checks whether the instruction writes memory.
    #[must_use]
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::FpStore { .. })
    }

    /// Checks whether the instruction is a branch or jump.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. } | Self::Jump { .. } | Self::JumpReg { .. } | Self::FpBranch { .. }
        )
    }

    /// General-purpose registers read by the instruction.
    #[must_use]
    pub fn reads(&self) -> (Option<u8>, Option<u8>) {
        match *self {
            Self::AluR { op, rs, rt, .. } => match op {
                AluOp::Sll | AluOp::Srl | AluOp::Sra => (Some(rt), None),
                _ => (Some(rs), Some(rt)),
            },
            Self::AluI { rs, .. } => (Some(rs), None),
            Self::Load { base, .. } | Self::FpLoad { base, .. } => (Some(base), None),
            Self::Store { rt, base, .. } => (Some(base), Some(rt)),
            Self::FpStore { base, .. } => (Some(base), None),
            Self::Branch { cond, rs, rt, .. } => match cond {
                Cond::Eq | Cond::Ne => (Some(rs), Some(rt)),
                _ => (Some(rs), None),
            },
            Self::JumpReg { rs, .. } => (Some(rs), None),
            Self::MulDiv { rs, rt, .. } => (Some(rs), Some(rt)),
            Self::HiLo { op: HiLoOp::Mthi | HiLoOp::Mtlo, reg } => (Some(reg), None),
            Self::FpMove { to: true, rt, .. } => (Some(rt), None),
            // Syscalls read their argument registers through the handler.
            _ => (None, None),
        }
    }

    /// General-purpose register written by the instruction, if any.
    #[must_use]
    pub fn writes(&self) -> Option<u8> {
        match *self {
            Self::AluR { rd, .. } => Some(rd),
            Self::AluI { rt, .. } => Some(rt),
            Self::Load { rt, .. } => Some(rt),
            Self::Jump { link: true, .. } => Some(31),
            Self::JumpReg { link: true, rd, .. } => Some(rd),
            Self::HiLo { op: HiLoOp::Mfhi | HiLoOp::Mflo, reg } => Some(reg),
            Self::FpMove { to: false, rt, .. } => Some(rt),
            _ => None,
        }
    }
}

impl Display for Instruction {
    #[allow(clippy::too_many_lines)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.mnemonic();
        match *self {
            Self::Nop | Self::Syscall => write!(f, "{m}"),
            Self::Break { code: 0 } => write!(f, "{m}"),
            Self::Break { code } => write!(f, "{m} {code}"),
            Self::AluR { op, rd, rs, rt, shamt } => match op {
                AluOp::Sll | AluOp::Srl | AluOp::Sra => {
                    write!(f, "{m} ${}, ${}, {shamt}", gpr_name(rd), gpr_name(rt))
                }
                AluOp::Sllv | AluOp::Srlv | AluOp::Srav => {
                    write!(f, "{m} ${}, ${}, ${}", gpr_name(rd), gpr_name(rt), gpr_name(rs))
                }
                _ => write!(f, "{m} ${}, ${}, ${}", gpr_name(rd), gpr_name(rs), gpr_name(rt)),
            },
            Self::AluI { op, rt, rs, imm } => match op {
                AluOp::Lui => write!(f, "{m} ${}, {imm}", gpr_name(rt)),
                AluOp::And | AluOp::Or | AluOp::Xor => {
                    write!(f, "{m} ${}, ${}, {imm}", gpr_name(rt), gpr_name(rs))
                }
                _ => write!(f, "{m} ${}, ${}, {}", gpr_name(rt), gpr_name(rs), imm as i16),
            },
            Self::Load { rt, base, offset, .. } | Self::Store { rt, base, offset, .. } => {
                write!(f, "{m} ${}, {offset}(${})", gpr_name(rt), gpr_name(base))
            }
            Self::Branch { cond, rs, rt, offset } => match cond {
                Cond::Eq | Cond::Ne => {
                    write!(f, "{m} ${}, ${}, {offset}", gpr_name(rs), gpr_name(rt))
                }
                _ => write!(f, "{m} ${}, {offset}", gpr_name(rs)),
            },
            Self::Jump { target, .. } => write!(f, "{m} {:#x}", target << 2),
            Self::JumpReg { rd, rs, link } => {
                if link && rd != 31 {
                    write!(f, "{m} ${}, ${}", gpr_name(rd), gpr_name(rs))
                } else {
                    write!(f, "{m} ${}", gpr_name(rs))
                }
            }
            Self::MulDiv { rs, rt, .. } => {
                write!(f, "{m} ${}, ${}", gpr_name(rs), gpr_name(rt))
            }
            Self::HiLo { reg, .. } => write!(f, "{m} ${}", gpr_name(reg)),
            Self::FpArith { fd, fs, ft, .. } => write!(f, "{m} $f{fd}, $f{fs}, $f{ft}"),
            Self::FpUnary { fd, fs, .. } => write!(f, "{m} $f{fd}, $f{fs}"),
            Self::FpCompare { fs, ft, .. } => write!(f, "{m} $f{fs}, $f{ft}"),
            Self::FpBranch { offset, .. } => write!(f, "{m} {offset}"),
            Self::FpMove { rt, fs, .. } => write!(f, "{m} ${}, $f{fs}", gpr_name(rt)),
            Self::FpLoad { ft, base, offset, .. } | Self::FpStore { ft, base, offset, .. } => {
                write!(f, "{m} $f{ft}, {offset}(${})", gpr_name(base))
            }
        }
    }
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error caused by [decoding](decode).
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// Unsupported or malformed encoding.
    #[error("illegal instruction: {word:#010x}")]
    Illegal {
        /// The offending word.
        word: Word,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_alu_works() {
        // add $t2, $t0, $t1
        assert_eq!(
            decode(0x0109_5020).unwrap(),
            Instruction::AluR {
                op: AluOp::Add,
                rd: 10,
                rs: 8,
                rt: 9,
                shamt: 0
            }
        );
    }

    #[test]
    fn decode_nop_works() {
        assert_eq!(decode(0).unwrap(), Instruction::Nop);
    }

    #[test]
    fn decode_load_works() {
        // lw $t0, 4($sp)
        assert_eq!(
            decode(0x8fa8_0004).unwrap(),
            Instruction::Load {
                width: Width::Word,
                signed: true,
                rt: 8,
                base: 29,
                offset: 4
            }
        );
    }

    #[test]
    fn decode_illegal_fails() {
        assert!(matches!(decode(0xffff_ffff), Err(Error::Illegal { .. })));
    }

    #[test]
    fn display_round_trips_through_assembler() {
        use crate::asm::Assembler;

        let words = [
            0x2008_0007, // addi $t0, $zero, 7
            0x0109_5020, // add $t2, $t0, $t1
            0x8fa8_0004, // lw $t0, 4($sp)
            0xafc8_fff8, // sw $t0, -8($fp)
            0x1500_fffd, // bne $t0, $zero, -3
            0x0810_0000, // j 0x400000
            0x0000_000c, // syscall
            0x3c01_1001, // lui $at, 4097
            0x0008_4880, // sll $t1, $t0, 2
            0x4602_0800, // add.s $f0, $f1, $f2
        ];
        let asm = Assembler::default();
        for word in words {
            let text = decode(word).unwrap().to_string();
            let image = asm.assemble("rt.s", &text).unwrap();
            assert_eq!(image.text, vec![word], "{text}");
        }
    }

    #[test]
    fn reads_and_writes_work() {
        let insn = decode(0x0109_5020).unwrap(); // add $t2, $t0, $t1
        assert_eq!(insn.reads(), (Some(8), Some(9)));
        assert_eq!(insn.writes(), Some(10));

        let insn = decode(0x8fa8_0004).unwrap(); // lw $t0, 4($sp)
        assert_eq!(insn.reads(), (Some(29), None));
        assert_eq!(insn.writes(), Some(8));
        assert!(insn.is_load());
    }
}
