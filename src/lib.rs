//! # mipsim
//!
//! A MIPS-I teaching simulator: a macro-aware two-pass assembler with
//! pseudo-instruction expansion, a linker and loader, a modeled memory
//! hierarchy with memory-mapped devices, a single-cycle executor and a
//! classic five-stage pipeline, and debugger engines for breakpoints and
//! watches.
//!
//! This crate re-exports the member crates; most users want the
//! [`Simulator`] façade:
//!
//! ```
//! use mipsim::prelude::*;
//!
//! let mut sim = Simulator::new();
//! let image = sim.assemble("li $v0, 10\nsyscall\n").unwrap();
//! sim.load(image).unwrap();
//! assert_eq!(sim.run(Some(1_000)), Status::Terminated);
//! ```

#![warn(clippy::pedantic)]

pub use mipsim_arch as arch;
pub use mipsim_core as core;

pub use crate::core::asm::{Assembler, BinaryImage};
pub use crate::core::sim::{Mode, RuntimeSnapshot, Simulator, Status};

/// Common imports for driving the simulator.
pub mod prelude {
    pub use crate::core::asm::{Assembler, BinaryImage, Options as AsmOptions};
    pub use crate::core::dbg::{BreakpointEngine, Rule, WatchEngine};
    pub use crate::core::sim::{Mode, RuntimeSnapshot, Simulator, Status};
}
