//! Five-stage pipeline.
//!
//! The classic IF/ID/EX/MEM/WB organization with four named latches. Every
//! [`step`](Pipeline::step) advances one cycle: writeback first, fetch
//! last, so an instruction committed this cycle is visible to this cycle's
//! decode. Branches resolve in EX and flush the two younger slots; traps
//! drain the pipeline and retire alone; faults are queued on the interrupt
//! controller and squash the faulting slot.

use log::trace;
use mipsim_arch::Word;

use super::cpu::insn::{AluOp, Cond, Fmt, FpCond, FpOp, FpUnOp, HiLoOp, Instruction, MulOp, Width};
use super::cpu::MachineState;
use super::pic::{Exception, Pic};
use crate::mem::{self, Memory};

mod hazard;

/// A pipeline latch.
///
/// `insn == None` marks a bubble; a bubble never retires a writeback.
#[derive(Clone, Copy, Debug, Default)]
pub struct Latch {
    /// Decoded instruction, or `None` for a bubble.
    pub insn: Option<Instruction>,
    /// Instruction address.
    pub pc: Word,
    /// Raw instruction word.
    pub word: Word,
    /// First source register index.
    pub rs: u8,
    /// Second source register index.
    pub rt: u8,
    /// First operand value as read at decode.
    pub val_rs: Word,
    /// Second operand value as read at decode.
    pub val_rt: Word,
    /// Sign-extended immediate.
    pub imm: i32,
    /// ALU result or effective address.
    pub alu: Word,
    /// Effective memory address.
    pub addr: Word,
    /// Store data, captured with forwarding at EX.
    pub store_value: Word,
    /// Writeback target register.
    pub wb_reg: Option<u8>,
    /// Writeback value.
    pub wb_value: Word,
}

impl Latch {
    /// Checks whether the latch holds a bubble.
    #[must_use]
    pub fn is_bubble(&self) -> bool {
        self.insn.is_none()
    }

    /// Checks whether the latch retires no register write.
    #[must_use]
    pub fn no_writeback(&self) -> bool {
        self.wb_reg.is_none()
    }
}

/// Performance counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    /// Cycles elapsed.
    pub cycle_count: u64,
    /// Instructions retired at WB.
    pub instruction_count: u64,
    /// Cycles the front of the pipeline was held.
    pub stall_count: u64,
    /// Bubbles that reached WB.
    pub bubble_count: u64,
    /// Latches converted to bubbles by flushes.
    pub flush_count: u64,
    /// Stalls caused by load-use hazards.
    pub load_use_stalls: u64,
    /// Stalls caused by structural contention or trap serialization.
    pub structural_stalls: u64,
}

impl Counters {
    /// Cycles per retired instruction.
    #[must_use]
    pub fn cpi(&self) -> f64 {
        if self.instruction_count == 0 {
            return 0.0;
        }
        self.cycle_count as f64 / self.instruction_count as f64
    }

    /// Fraction of cycles wasted on bubbles.
    #[must_use]
    pub fn bubble_rate(&self) -> f64 {
        if self.cycle_count == 0 {
            return 0.0;
        }
        self.bubble_count as f64 / self.cycle_count as f64
    }
}

/// The pipeline.
#[derive(Debug, Default)]
pub struct Pipeline {
    /// Fetch/decode latch.
    pub if_id: Latch,
    /// Decode/execute latch.
    pub id_ex: Latch,
    /// Execute/memory latch.
    pub ex_mem: Latch,
    /// Memory/writeback latch.
    pub mem_wb: Latch,
    /// Performance counters.
    pub counters: Counters,
    /// Forward in-flight results into EX.
    pub forwarding: bool,
    /// Model a single shared memory port for IF and MEM.
    pub single_memory_port: bool,
}

impl Pipeline {
    /// Constructs a new `Pipeline` with forwarding enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            forwarding: true,
            ..Self::default()
        }
    }

    /// Drops all in-flight work.
    pub fn flush_all(&mut self) {
        for latch in [&mut self.if_id, &mut self.id_ex, &mut self.ex_mem, &mut self.mem_wb] {
            if !latch.is_bubble() {
                self.counters.flush_count += 1;
            }
            *latch = Latch::default();
        }
    }

    /// Checks whether any latch holds an instruction.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        ![&self.if_id, &self.id_ex, &self.ex_mem, &self.mem_wb]
            .iter()
            .all(|latch| latch.is_bubble())
    }

    /// Resets latches and counters.
    pub fn reset(&mut self) {
        let (forwarding, port) = (self.forwarding, self.single_memory_port);
        *self = Self {
            forwarding,
            single_memory_port: port,
            ..Self::default()
        };
    }

    /// Advances the pipeline one cycle.
    ///
    /// Exceptions and trap requests land on `pic`; when any request is
    /// pending at the end of the cycle the in-flight stages are flushed and
    /// fetch is suppressed so the controller can dispatch before the next
    /// cycle.
    #[allow(clippy::too_many_lines)]
    pub fn step(&mut self, state: &mut MachineState, mem: &mut Memory, pic: &mut Pic) {
        self.counters.cycle_count += 1;

        // Hazards are judged against start-of-cycle latches.
        let decision = hazard::detect(
            &self.if_id,
            &self.id_ex,
            &self.ex_mem,
            &self.mem_wb,
            self.forwarding,
        );

        // Trap retirement: the pipeline was drained behind it, so it
        // retires alone and execution resumes past it after service.
        if let Some(insn @ (Instruction::Syscall | Instruction::Break { .. })) = self.mem_wb.insn {
            let pc = self.mem_wb.pc;
            self.counters.instruction_count += 1;
            self.mem_wb = Latch::default();
            match insn {
                Instruction::Syscall => pic.request_syscall_interrupt(state.reg(2), pc),
                Instruction::Break { code } => pic.raise(Exception::Breakpoint { code, pc }),
                _ => unreachable!(),
            }
            self.flush_all();
            state.pc = pc.wrapping_add(4);
            return;
        }

        // WB: commit the oldest instruction.
        if self.mem_wb.is_bubble() {
            self.counters.bubble_count += 1;
        } else {
            self.counters.instruction_count += 1;
            if let Some(reg) = self.mem_wb.wb_reg {
                trace!(
                    "wb {:#010x}: ${} <- {:#010x}",
                    self.mem_wb.pc,
                    reg,
                    self.mem_wb.wb_value
                );
                state.set_reg(reg, self.mem_wb.wb_value);
            }
        }

        // MEM: perform the data access.
        let mut faulted = false;
        let mut mem_busy = false;
        self.mem_wb = {
            let mut latch = self.ex_mem;
            if let Some(insn) = latch.insn {
                mem_busy = insn.is_load() || insn.is_store();
                if let Err(exception) = run_mem(&mut latch, &insn, state, mem) {
                    pic.raise(exception);
                    latch = Latch::default();
                    faulted = true;
                }
            }
            latch
        };

        // EX: compute, with operands chosen by the forwarding unit.
        if faulted {
            // Squash the younger work-in-progress behind the fault.
            self.ex_mem = Latch::default();
        } else {
            let fwd = self.forwarding.then_some(&self.mem_wb);
            let mut redirect = None;
            self.ex_mem = {
                let mut latch = self.id_ex;
                if let Some(insn) = latch.insn {
                    match run_ex(&mut latch, &insn, state, fwd, &mut redirect) {
                        Ok(()) => (),
                        Err(exception) => {
                            pic.raise(exception);
                            latch = Latch::default();
                            faulted = true;
                        }
                    }
                }
                latch
            };

            if let Some(target) = redirect {
                // Taken branch: squash the two wrong-path slots behind EX.
                self.flush_front();
                self.id_ex = Latch::default();
                state.pc = target;
                return;
            }
        }

        if faulted {
            self.id_ex = Latch::default();
            self.if_id = Latch::default();
            return;
        }

        // ID: decode into ID/EX, or insert a bubble on a stall.
        if decision.stall {
            self.counters.stall_count += 1;
            if decision.load_use {
                self.counters.load_use_stalls += 1;
            }
            if decision.serialize {
                self.counters.structural_stalls += 1;
            }
            self.id_ex = Latch::default();
        } else {
            self.id_ex = {
                let mut latch = self.if_id;
                if let Some(insn) = &latch.insn {
                    let (rs, rt) = insn.reads();
                    latch.rs = rs.unwrap_or(0);
                    latch.rt = rt.unwrap_or(0);
                    latch.val_rs = state.reg(latch.rs);
                    latch.val_rt = state.reg(latch.rt);
                    latch.imm = (latch.word & 0xffff) as u16 as i16 as i32;
                    latch.wb_reg = insn.writes().filter(|&reg| reg != 0);
                }
                latch
            };
            self.if_id = Latch::default();
        }

        // IF: fetch the next word, unless held.
        let hold = decision.stall
            || (self.single_memory_port && mem_busy && {
                self.counters.stall_count += 1;
                self.counters.structural_stalls += 1;
                true
            });
        if !hold {
            match mem.fetch_word(state.pc) {
                Ok(word) => {
                    match super::cpu::insn::decode(word) {
                        Ok(insn) => {
                            self.if_id = Latch {
                                insn: Some(insn),
                                pc: state.pc,
                                word,
                                ..Latch::default()
                            };
                        }
                        Err(_) => {
                            pic.raise(Exception::IllegalInstruction {
                                word,
                                pc: state.pc,
                            });
                        }
                    }
                    state.pc = state.pc.wrapping_add(4);
                }
                Err(err) => {
                    pic.raise(fetch_fault(&err, state.pc));
                }
            }
        }

        // A pending request preempts everything younger than its cause.
        if pic.pending() {
            self.flush_all();
        }
    }

    /// Flushes the front latch only.
    fn flush_front(&mut self) {
        if !self.if_id.is_bubble() {
            self.counters.flush_count += 1;
        }
        if !self.id_ex.is_bubble() {
            self.counters.flush_count += 1;
        }
        self.if_id = Latch::default();
    }
}

/// Executes the EX stage for one latch.
fn run_ex(
    latch: &mut Latch,
    insn: &Instruction,
    state: &mut MachineState,
    fwd: Option<&Latch>,
    redirect: &mut Option<Word>,
) -> Result<(), Exception> {
    let pc = latch.pc;
    // Forwarding priority: the instruction one ahead (now in MEM/WB) wins;
    // anything older committed at WB earlier this cycle.
    let operand = |reg: u8| -> Word {
        if reg == 0 {
            return 0;
        }
        if let Some(fwd) = fwd {
            if fwd.wb_reg == Some(reg) {
                return fwd.wb_value;
            }
        }
        state.reg(reg)
    };
    match *insn {
        Instruction::Nop | Instruction::Syscall | Instruction::Break { .. } => (),
        Instruction::AluR { op, rs, rt, shamt, .. } => {
            let (a, b) = (operand(rs), operand(rt));
            latch.alu = alu(op, a, b, shamt).ok_or(Exception::ArithmeticOverflow { pc })?;
            latch.wb_value = latch.alu;
        }
        Instruction::AluI { op, rs, .. } => {
            let a = operand(rs);
            let imm = latch.imm;
            let word = latch.word;
            latch.alu = match op {
                AluOp::Add => (a as i32)
                    .checked_add(imm)
                    .ok_or(Exception::ArithmeticOverflow { pc })? as Word,
                AluOp::Addu => a.wrapping_add(imm as Word),
                AluOp::Slt => Word::from((a as i32) < imm),
                AluOp::Sltu => Word::from(a < imm as Word),
                AluOp::And => a & (word & 0xffff),
                AluOp::Or => a | (word & 0xffff),
                AluOp::Xor => a ^ (word & 0xffff),
                AluOp::Lui => (word & 0xffff) << 16,
                _ => 0,
            };
            latch.wb_value = latch.alu;
        }
        Instruction::Load { base, .. } => {
            latch.addr = operand(base).wrapping_add(latch.imm as Word);
            latch.alu = latch.addr;
        }
        Instruction::FpLoad { base, .. } => {
            latch.addr = operand(base).wrapping_add(latch.imm as Word);
        }
        Instruction::Store { rt, base, .. } => {
            latch.addr = operand(base).wrapping_add(latch.imm as Word);
            latch.store_value = operand(rt);
        }
        Instruction::FpStore { ft, base, double, .. } => {
            latch.addr = operand(base).wrapping_add(latch.imm as Word);
            latch.store_value = state.fpr(if double { ft & !1 } else { ft });
        }
        Instruction::Branch { cond, rs, rt, offset } => {
            let a = operand(rs);
            let taken = match cond {
                Cond::Eq => a == operand(rt),
                Cond::Ne => a != operand(rt),
                Cond::Lez => (a as i32) <= 0,
                Cond::Gtz => (a as i32) > 0,
                Cond::Ltz => (a as i32) < 0,
                Cond::Gez => (a as i32) >= 0,
            };
            if taken {
                *redirect = Some(
                    pc.wrapping_add(4)
                        .wrapping_add((i32::from(offset) << 2) as Word),
                );
            }
        }
        Instruction::FpBranch { on, offset } => {
            if state.fp_cond == on {
                *redirect = Some(
                    pc.wrapping_add(4)
                        .wrapping_add((i32::from(offset) << 2) as Word),
                );
            }
        }
        Instruction::Jump { link, target } => {
            if link {
                latch.wb_value = pc.wrapping_add(4);
            }
            *redirect = Some((pc.wrapping_add(4) & 0xf000_0000) | (target << 2));
        }
        Instruction::JumpReg { rs, link, .. } => {
            let target = operand(rs);
            if link {
                latch.wb_value = pc.wrapping_add(4);
            }
            *redirect = Some(target);
        }
        Instruction::MulDiv { op, rs, rt } => {
            let (a, b) = (operand(rs), operand(rt));
            match op {
                MulOp::Mult => {
                    let product = i64::from(a as i32) * i64::from(b as i32);
                    state.lo = product as Word;
                    state.hi = (product >> 32) as Word;
                }
                MulOp::Multu => {
                    let product = u64::from(a) * u64::from(b);
                    state.lo = product as Word;
                    state.hi = (product >> 32) as Word;
                }
                MulOp::Div if b != 0 => {
                    state.lo = (a as i32).wrapping_div(b as i32) as Word;
                    state.hi = (a as i32).wrapping_rem(b as i32) as Word;
                }
                MulOp::Divu if b != 0 => {
                    state.lo = a / b;
                    state.hi = a % b;
                }
                MulOp::Div | MulOp::Divu => (),
            }
        }
        Instruction::HiLo { op, reg } => match op {
            HiLoOp::Mfhi => latch.wb_value = state.hi,
            HiLoOp::Mflo => latch.wb_value = state.lo,
            HiLoOp::Mthi => state.hi = operand(reg),
            HiLoOp::Mtlo => state.lo = operand(reg),
        },
        Instruction::FpArith { op, fmt, fd, fs, ft } => match fmt {
            Fmt::Double => {
                let (a, b) = (state.fpr_double(fs), state.fpr_double(ft));
                state.set_fpr_double(fd, fp_arith(op, a, b));
            }
            _ => {
                let (a, b) = (f64::from(state.fpr_single(fs)), f64::from(state.fpr_single(ft)));
                state.set_fpr_single(fd, fp_arith(op, a, b) as f32);
            }
        },
        Instruction::FpUnary { op, fmt, fd, fs } => {
            fp_unary(op, fmt, fd, fs, state);
        }
        Instruction::FpCompare { cond, fmt, fs, ft } => {
            let ordering = match fmt {
                Fmt::Double => state.fpr_double(fs).partial_cmp(&state.fpr_double(ft)),
                _ => state.fpr_single(fs).partial_cmp(&state.fpr_single(ft)),
            };
            state.fp_cond = ordering.is_some_and(|ordering| match cond {
                FpCond::Eq => ordering.is_eq(),
                FpCond::Lt => ordering.is_lt(),
                FpCond::Le => ordering.is_le(),
            });
        }
        Instruction::FpMove { to, rt, fs } => {
            if to {
                state.set_fpr(fs, operand(rt));
            } else {
                latch.wb_value = state.fpr(fs);
            }
        }
    }
    Ok(())
}

fn alu(op: AluOp, a: Word, b: Word, shamt: u8) -> Option<Word> {
    Some(match op {
        AluOp::Add => (a as i32).checked_add(b as i32)? as Word,
        AluOp::Addu => a.wrapping_add(b),
        AluOp::Sub => (a as i32).checked_sub(b as i32)? as Word,
        AluOp::Subu => a.wrapping_sub(b),
        AluOp::And => a & b,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::Nor => !(a | b),
        AluOp::Slt => Word::from((a as i32) < (b as i32)),
        AluOp::Sltu => Word::from(a < b),
        AluOp::Sll => b << shamt,
        AluOp::Srl => b >> shamt,
        AluOp::Sra => ((b as i32) >> shamt) as Word,
        AluOp::Sllv => b << (a & 0x1f),
        AluOp::Srlv => b >> (a & 0x1f),
        AluOp::Srav => ((b as i32) >> (a & 0x1f)) as Word,
        AluOp::Lui => b << 16,
    })
}

fn fp_arith(op: FpOp, a: f64, b: f64) -> f64 {
    match op {
        FpOp::Add => a + b,
        FpOp::Sub => a - b,
        FpOp::Mul => a * b,
        FpOp::Div => a / b,
    }
}

fn fp_unary(op: FpUnOp, fmt: Fmt, fd: u8, fs: u8, state: &mut MachineState) {
    // Shares semantics with the single-cycle executor by construction.
    let insn = Instruction::FpUnary { op, fmt, fd, fs };
    let mut scratch = Memory::default();
    let _ = super::cpu::execute(&insn, state, &mut scratch, false);
}

/// Executes the MEM stage for one latch.
fn run_mem(
    latch: &mut Latch,
    insn: &Instruction,
    state: &mut MachineState,
    mem: &mut Memory,
) -> Result<(), Exception> {
    let pc = latch.pc;
    let fault = |err: mem::Error| -> Exception {
        match err {
            mem::Error::Misaligned { addr, .. } => Exception::AddressError { addr, pc },
            mem::Error::NotReady { addr } => Exception::DeviceNotReady { addr, pc },
            mem::Error::Bus { addr } | mem::Error::Map { start: addr, .. } => {
                Exception::BusError { addr, pc }
            }
        }
    };
    match *insn {
        Instruction::Load { width, signed, .. } => {
            let addr = latch.addr;
            latch.wb_value = match width {
                Width::Byte => {
                    let byte = mem.read_byte(addr).map_err(fault)?;
                    if signed {
                        byte as i8 as i32 as Word
                    } else {
                        Word::from(byte)
                    }
                }
                Width::Half => {
                    let half = mem.read_half(addr).map_err(fault)?;
                    if signed {
                        half as i16 as i32 as Word
                    } else {
                        Word::from(half)
                    }
                }
                Width::Word => mem.read_word(addr).map_err(fault)?,
            };
        }
        Instruction::Store { width, .. } => {
            let addr = latch.addr;
            let value = latch.store_value;
            match width {
                Width::Byte => mem.write_byte(addr, value as u8),
                Width::Half => mem.write_half(addr, value as u16),
                Width::Word => mem.write_word(addr, value),
            }
            .map_err(fault)?;
        }
        Instruction::FpLoad { double, ft, .. } => {
            let low = mem.read_word(latch.addr).map_err(fault)?;
            if double {
                let high = mem.read_word(latch.addr + 4).map_err(fault)?;
                state.set_fpr(ft & !1, low);
                state.set_fpr((ft & !1) + 1, high);
            } else {
                state.set_fpr(ft, low);
            }
        }
        Instruction::FpStore { double, ft, .. } => {
            mem.write_word(latch.addr, latch.store_value).map_err(fault)?;
            if double {
                mem.write_word(latch.addr + 4, state.fpr((ft & !1) + 1))
                    .map_err(fault)?;
            }
        }
        _ => (),
    }
    Ok(())
}

fn fetch_fault(err: &mem::Error, pc: Word) -> Exception {
    match *err {
        mem::Error::Misaligned { addr, .. } => Exception::AddressError { addr, pc },
        mem::Error::NotReady { addr } => Exception::DeviceNotReady { addr, pc },
        mem::Error::Bus { addr } | mem::Error::Map { start: addr, .. } => {
            Exception::BusError { addr, pc }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Assembler;
    use crate::mem::MemoryMap;
    use crate::parts::pic::Request;

    fn load(src: &str) -> (Pipeline, MachineState, Memory, Pic) {
        let image = Assembler::default().assemble("test.s", src).unwrap();
        let mut mem = Memory::new(MemoryMap::default());
        for (idx, &word) in image.text.iter().enumerate() {
            let addr = image.text_base + 4 * idx as Word;
            mem.write_bytes(addr, &word.to_le_bytes()).unwrap();
        }
        for (idx, &byte) in image.data.iter().enumerate() {
            mem.write_bytes(image.data_base + idx as Word, &[byte]).unwrap();
        }
        let mut state = MachineState::new();
        state.pc = image.text_base;
        (Pipeline::new(), state, mem, Pic::new(0x8000_0180))
    }

    fn run(src: &str, cycles: u64) -> (Pipeline, MachineState, Memory, Pic) {
        let (mut pipe, mut state, mut mem, mut pic) = load(src);
        for _ in 0..cycles {
            pipe.step(&mut state, &mut mem, &mut pic);
            if pic.pending() || state.terminated {
                break;
            }
        }
        (pipe, state, mem, pic)
    }

    #[test]
    fn straight_line_retires_in_order() {
        let (pipe, state, ..) = run(
            "addi $t0, $zero, 1\naddi $t1, $zero, 2\naddi $t2, $zero, 3\n",
            8,
        );
        assert_eq!(state.reg(8), 1);
        assert_eq!(state.reg(9), 2);
        assert_eq!(state.reg(10), 3);
        // The third add retires on cycle 7; cycle 8 retires a trailing nop
        // fetched off the end of the program.
        assert!(pipe.counters.instruction_count >= 3);
        assert!(pipe.counters.instruction_count <= pipe.counters.cycle_count);
    }

    #[test]
    fn forwarding_resolves_raw_dependency() {
        let (pipe, state, ..) = run(
            "addi $t0, $zero, 5\nadd $t1, $t0, $t0\nadd $t2, $t1, $t0\n",
            8,
        );
        assert_eq!(state.reg(9), 10);
        assert_eq!(state.reg(10), 15);
        assert_eq!(pipe.counters.stall_count, 0);
    }

    #[test]
    fn load_use_inserts_one_bubble() {
        let (pipe, state, ..) = run(
            ".data\nx: .word 41\n.text\nlui $at, 4097\nlw $t0, 0($at)\naddi $t1, $t0, 1\n",
            10,
        );
        assert_eq!(state.reg(9), 42);
        assert_eq!(pipe.counters.load_use_stalls, 1);
    }

    #[test]
    fn without_forwarding_state_matches() {
        let src = "addi $t0, $zero, 5\nadd $t1, $t0, $t0\nadd $t2, $t1, $t0\n";
        let (with, state_fwd, ..) = run(src, 20);
        let (mut pipe, mut state, mut mem, mut pic) = load(src);
        pipe.forwarding = false;
        for _ in 0..20 {
            pipe.step(&mut state, &mut mem, &mut pic);
        }
        assert_eq!(state.reg(9), state_fwd.reg(9));
        assert_eq!(state.reg(10), state_fwd.reg(10));
        assert!(pipe.counters.stall_count > with.counters.stall_count);
    }

    #[test]
    fn taken_branch_flushes_wrong_path() {
        let (pipe, state, ..) = run(
            "addi $t0, $zero, 1\nbne $t0, $zero, skip\naddi $t1, $zero, 9\nskip: addi $t2, $zero, 2\n",
            12,
        );
        assert_eq!(state.reg(9), 0);
        assert_eq!(state.reg(10), 2);
        assert!(pipe.counters.flush_count >= 1);
    }

    #[test]
    fn loop_counts_down() {
        let (_, state, ..) = run(
            "addi $t0, $zero, 3\nloop: addi $t0, $t0, -1\nbne $t0, $zero, loop\n",
            40,
        );
        assert_eq!(state.reg(8), 0);
    }

    #[test]
    fn overflow_reaches_controller_and_flushes() {
        let (pipe, _, _, mut pic) = run(
            "lui $t0, 32767\nori $t0, $t0, 65535\naddi $t0, $t0, 1\n",
            16,
        );
        // 0x7fffffff + 1 overflows.
        assert!(matches!(
            pic.pop(),
            Some(Request::Exception(Exception::ArithmeticOverflow { .. }))
        ));
        // Everything younger than the fault was squashed; the older `ori`
        // may still be completing in MEM/WB.
        assert!(pipe.ex_mem.is_bubble());
        assert!(pipe.id_ex.is_bubble());
        assert!(pipe.if_id.is_bubble());
    }

    #[test]
    fn syscall_drains_and_requests() {
        let (pipe, state, _, mut pic) = run(
            "addi $v0, $zero, 10\nsyscall\naddi $t0, $zero, 7\n",
            16,
        );
        assert!(matches!(
            pic.pop(),
            Some(Request::Syscall { code: 10, .. })
        ));
        // The wrong-path instruction after the trap never retired.
        assert_eq!(state.reg(8), 0);
        assert!(pipe.counters.structural_stalls > 0);
    }

    #[test]
    fn bubbles_and_instructions_bound_cycles() {
        let (pipe, ..) = run(
            ".data\nx: .word 1\n.text\nlui $at, 4097\nlw $t0, 0($at)\naddi $t1, $t0, 1\n",
            10,
        );
        let c = pipe.counters;
        assert!(c.bubble_count + c.instruction_count <= c.cycle_count);
    }
}
