//! Hazard detection.

use super::Latch;
use crate::parts::cpu::insn::Instruction;

/// Stall decision for the front of the pipeline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Decision {
    /// Hold IF/ID and insert a bubble into ID/EX.
    pub stall: bool,
    /// The stall is a load-use hazard.
    pub load_use: bool,
    /// The stall serializes a trap (`syscall`/`break`) against in-flight
    /// work.
    pub serialize: bool,
}

/// Decides whether the decode stage must stall this cycle.
///
/// Inspects start-of-cycle latches: a load-use hazard exists when ID/EX
/// carries a load whose target is read by the instruction in IF/ID. With
/// forwarding disabled, any RAW dependency on an uncommitted writer stalls.
/// Traps drain the pipeline before and while they are in flight.
pub fn detect(
    if_id: &Latch,
    id_ex: &Latch,
    ex_mem: &Latch,
    mem_wb: &Latch,
    forwarding: bool,
) -> Decision {
    let downstream = [id_ex, ex_mem, mem_wb];
    // Traps serialize: nothing enters while one is in flight, and a trap
    // itself waits for older instructions to drain.
    let trap_in_flight = downstream
        .iter()
        .any(|latch| matches!(latch.insn, Some(Instruction::Syscall | Instruction::Break { .. })));
    let trap_waiting = matches!(
        if_id.insn,
        Some(Instruction::Syscall | Instruction::Break { .. })
    ) && downstream.iter().any(|latch| !latch.is_bubble());
    if trap_in_flight || trap_waiting {
        return Decision {
            stall: true,
            load_use: false,
            serialize: true,
        };
    }

    let Some(insn) = &if_id.insn else {
        return Decision::default();
    };
    let (a, b) = insn.reads();
    let reads = |target: u8| target != 0 && (a == Some(target) || b == Some(target));

    if forwarding {
        // Only a load's value is unavailable to forward in time.
        let load_use = id_ex.insn.as_ref().is_some_and(Instruction::is_load)
            && id_ex.wb_reg.is_some_and(reads);
        Decision {
            stall: load_use,
            load_use,
            serialize: false,
        }
    } else {
        // Without forwarding, wait out every uncommitted writer.
        let raw = [id_ex, ex_mem]
            .iter()
            .any(|latch| latch.wb_reg.is_some_and(reads));
        Decision {
            stall: raw,
            load_use: false,
            serialize: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::cpu::insn::decode;

    fn latch(word: u32) -> Latch {
        let insn = decode(word).unwrap();
        Latch {
            wb_reg: insn.writes().filter(|&reg| reg != 0),
            insn: Some(insn),
            ..Latch::default()
        }
    }

    #[test]
    fn load_use_stalls_with_forwarding() {
        let load = latch(0x8d28_0000); // lw $t0, 0($t1)
        let user = latch(0x0108_5020); // add $t2, $t0, $t0
        let out = detect(&user, &load, &Latch::default(), &Latch::default(), true);
        assert!(out.stall);
        assert!(out.load_use);
    }

    #[test]
    fn alu_dependency_forwards_without_stall() {
        let producer = latch(0x2008_0007); // addi $t0, $zero, 7
        let consumer = latch(0x0108_5020); // add $t2, $t0, $t0
        let out = detect(&consumer, &producer, &Latch::default(), &Latch::default(), true);
        assert!(!out.stall);
    }

    #[test]
    fn raw_stalls_without_forwarding() {
        let producer = latch(0x2008_0007); // addi $t0, $zero, 7
        let consumer = latch(0x0108_5020); // add $t2, $t0, $t0
        let out = detect(&consumer, &producer, &Latch::default(), &Latch::default(), false);
        assert!(out.stall);
        let out = detect(&consumer, &Latch::default(), &producer, &Latch::default(), false);
        assert!(out.stall);
        // A writer already in MEM/WB commits before decode reads.
        let out = detect(&consumer, &Latch::default(), &Latch::default(), &producer, false);
        assert!(!out.stall);
    }

    #[test]
    fn trap_waits_for_drain() {
        let trap = latch(0x0000_000c); // syscall
        let older = latch(0x2008_0007); // addi $t0, $zero, 7
        let out = detect(&trap, &older, &Latch::default(), &Latch::default(), true);
        assert!(out.stall);
        assert!(out.serialize);
        let out = detect(&trap, &Latch::default(), &Latch::default(), &Latch::default(), true);
        assert!(!out.stall);
    }

    #[test]
    fn register_zero_never_hazards() {
        let producer = latch(0x0000_0020); // add $zero, $zero, $zero
        let consumer = latch(0x0108_5020); // add $t2, $t0, $t0
        let out = detect(&consumer, &producer, &Latch::default(), &Latch::default(), false);
        assert!(!out.stall);
    }
}
