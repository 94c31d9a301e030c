//! System call services.
//!
//! A MARS-compatible subset dispatched on the code in `$v0`: console I/O
//! through the [terminal](Terminal) and an input queue, files through the
//! virtual [file store](Files), the random suite through the same generator
//! as the random-stream device, and time through the shared simulation
//! clock. Dialog services degrade to console I/O when running headless.

use std::collections::VecDeque;

use log::debug;
use mipsim_arch::{Byte, Shared, Word};
use thiserror::Error;

use super::cpu::MachineState;
use crate::dev::{Files, RandomStream, Terminal};
use crate::mem::{self, Memory};

/// Simulation clock alias, shared with [`Rtc`](crate::dev::Rtc).
pub type Clock = Shared<u64>;

/// Register numbers used by the syscall ABI.
mod reg {
    pub const V0: u8 = 2;
    pub const V1: u8 = 3;
    pub const A0: u8 = 4;
    pub const A1: u8 = 5;
    pub const A2: u8 = 6;
}

/// Syscall dispatcher.
#[derive(Debug)]
pub struct Syscalls {
    /// Console output.
    terminal: Shared<Terminal>,
    /// Virtual file store.
    files: Shared<Files>,
    /// Random generator, shared with the random-stream device.
    random: Shared<RandomStream>,
    /// Millisecond clock, shared with the RTC device.
    clock: Clock,
    /// Console input queue.
    input: VecDeque<Byte>,
    /// Next `sbrk` allocation address.
    heap: Word,
}

impl Syscalls {
    /// Constructs a new `Syscalls` over its collaborators.
    #[must_use]
    pub fn new(
        terminal: Shared<Terminal>,
        files: Shared<Files>,
        random: Shared<RandomStream>,
        clock: Clock,
        heap_base: Word,
    ) -> Self {
        Self {
            terminal,
            files,
            random,
            clock,
            input: VecDeque::new(),
            heap: heap_base,
        }
    }

    /// Appends text to the console input queue.
    pub fn feed_input(&mut self, text: &str) {
        self.input.extend(text.bytes());
    }

    /// Resets the heap cursor and drops queued input.
    pub fn reset(&mut self, heap_base: Word) {
        self.heap = heap_base;
        self.input.clear();
    }

    /// Dispatches one service request.
    ///
    /// # Errors
    ///
    /// Errors on unknown codes, bad arguments, and memory faults while
    /// transferring strings or buffers.
    #[allow(clippy::too_many_lines)]
    pub fn dispatch(
        &mut self,
        state: &mut MachineState,
        mem: &mut Memory,
        code: u32,
    ) -> Result<()> {
        debug!("syscall {code}");
        match code {
            // print_int
            1 => self.print(&(state.reg(reg::A0) as i32).to_string()),
            // print_float
            2 => self.print(&format_float(f64::from(state.fpr_single(12)))),
            // print_double
            3 => self.print(&format_float(state.fpr_double(12))),
            // print_string
            4 => {
                let text = self.read_cstr(mem, state.reg(reg::A0))?;
                self.print(&text);
            }
            // read_int
            5 => {
                let value = self.read_line().trim().parse::<i64>().unwrap_or(0);
                state.set_reg(reg::V0, value as Word);
            }
            // read_float
            6 => {
                let value = self.read_line().trim().parse::<f32>().unwrap_or(0.0);
                state.set_fpr_single(0, value);
            }
            // read_double
            7 => {
                let value = self.read_line().trim().parse::<f64>().unwrap_or(0.0);
                state.set_fpr_double(0, value);
            }
            // read_string
            8 => {
                let buffer = state.reg(reg::A0);
                let max = state.reg(reg::A1) as usize;
                self.read_into(mem, buffer, max)?;
            }
            // sbrk
            9 => {
                let size = (state.reg(reg::A0) + 3) & !3;
                state.set_reg(reg::V0, self.heap);
                self.heap = self.heap.wrapping_add(size);
            }
            // exit
            10 => {
                state.terminated = true;
                state.exit_code = Some(0);
            }
            // print_char
            11 => self.terminal.borrow_mut().put(state.reg(reg::A0) as Byte),
            // read_char
            12 => {
                let byte = self.input.pop_front().unwrap_or(0);
                state.set_reg(reg::V0, Word::from(byte));
            }
            // open
            13 => {
                let name = self.read_cstr(mem, state.reg(reg::A0))?;
                let fd = self
                    .files
                    .borrow_mut()
                    .open(&name, state.reg(reg::A1));
                state.set_reg(reg::V0, fd.map_or(-1_i32 as Word, |fd| fd));
            }
            // read
            14 => {
                let fd = state.reg(reg::A0);
                let buffer = state.reg(reg::A1);
                let len = state.reg(reg::A2) as usize;
                match self.files.borrow_mut().read(fd, len) {
                    Some(bytes) => {
                        for (idx, &byte) in bytes.iter().enumerate() {
                            mem.write_byte(buffer + idx as Word, byte)?;
                        }
                        state.set_reg(reg::V0, bytes.len() as Word);
                    }
                    None => state.set_reg(reg::V0, -1_i32 as Word),
                }
            }
            // write
            15 => {
                let fd = state.reg(reg::A0);
                let buffer = state.reg(reg::A1);
                let len = state.reg(reg::A2);
                let mut bytes = Vec::with_capacity(len as usize);
                for idx in 0..len {
                    bytes.push(mem.read_byte(buffer + idx)?);
                }
                let wrote = self.files.borrow_mut().write(fd, &bytes);
                state.set_reg(reg::V0, wrote.map_or(-1_i32 as Word, |n| n as Word));
            }
            // close
            16 => {
                self.files.borrow_mut().close(state.reg(reg::A0));
            }
            // exit2
            17 => {
                state.terminated = true;
                state.exit_code = Some(state.reg(reg::A0) as i32);
            }
            // time
            30 => {
                let ms = *self.clock.borrow();
                state.set_reg(reg::A0, ms as Word);
                state.set_reg(reg::A1, (ms >> 32) as Word);
            }
            // MIDI out: accepted, nothing to play headless.
            31 | 33 => (),
            // sleep: advances the simulation clock, no wall-clock wait.
            32 => {
                *self.clock.borrow_mut() += u64::from(state.reg(reg::A0));
            }
            // print_int_hex
            34 => self.print(&format!("{:#010x}", state.reg(reg::A0))),
            // print_int_binary
            35 => self.print(&format!("{:#034b}", state.reg(reg::A0))),
            // print_int_unsigned
            36 => self.print(&state.reg(reg::A0).to_string()),
            // set_seed
            40 => {
                self.random
                    .borrow_mut()
                    .seed(state.reg(reg::A0), state.reg(reg::A1));
            }
            // random_int
            41 => {
                let value = self.random.borrow().next(state.reg(reg::A0));
                state.set_reg(reg::A0, value);
            }
            // random_int_range
            42 => {
                let bound = state.reg(reg::A1);
                if bound == 0 {
                    return Err(Error::BadArgument { code });
                }
                let value = self.random.borrow().next(state.reg(reg::A0));
                state.set_reg(reg::A0, value % bound);
            }
            // random_float
            43 => {
                let value = self.random.borrow().next(state.reg(reg::A0));
                state.set_fpr_single(0, unit_float(value) as f32);
            }
            // random_double
            44 => {
                let value = self.random.borrow().next(state.reg(reg::A0));
                state.set_fpr_double(0, unit_float(value));
            }
            // confirm dialog: headless default is "yes".
            50 => state.set_reg(reg::A0, 0),
            // input dialogs: served from the console input queue.
            51 => {
                let line = self.read_line();
                match line.trim().parse::<i64>() {
                    Ok(value) => {
                        state.set_reg(reg::A0, value as Word);
                        state.set_reg(reg::A1, 0);
                    }
                    Err(_) => state.set_reg(reg::A1, -1_i32 as Word),
                }
            }
            52 => {
                let line = self.read_line();
                match line.trim().parse::<f32>() {
                    Ok(value) => {
                        state.set_fpr_single(0, value);
                        state.set_reg(reg::A1, 0);
                    }
                    Err(_) => state.set_reg(reg::A1, -1_i32 as Word),
                }
            }
            53 => {
                let line = self.read_line();
                match line.trim().parse::<f64>() {
                    Ok(value) => {
                        state.set_fpr_double(0, value);
                        state.set_reg(reg::A1, 0);
                    }
                    Err(_) => state.set_reg(reg::A1, -1_i32 as Word),
                }
            }
            54 => {
                let buffer = state.reg(reg::A0);
                let max = state.reg(reg::A1) as usize;
                self.read_into(mem, buffer, max)?;
                state.set_reg(reg::A1, 0);
            }
            // message dialogs: routed to the terminal.
            55 | 58 | 59 => {
                let text = self.read_cstr(mem, state.reg(reg::A0))?;
                self.print(&text);
                self.print("\n");
            }
            56 => {
                let text = self.read_cstr(mem, state.reg(reg::A0))?;
                self.print(&text);
                self.print(&(state.reg(reg::A1) as i32).to_string());
                self.print("\n");
            }
            57 => {
                let text = self.read_cstr(mem, state.reg(reg::A0))?;
                let more = self.read_cstr(mem, state.reg(reg::A1))?;
                self.print(&text);
                self.print(&more);
                self.print("\n");
            }
            _ => return Err(Error::BadCode(code)),
        }
        Ok(())
    }

    fn print(&mut self, text: &str) {
        let mut terminal = self.terminal.borrow_mut();
        for byte in text.bytes() {
            terminal.put(byte);
        }
    }

    /// Takes one line (newline excluded) from the input queue.
    fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        while let Some(byte) = self.input.pop_front() {
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        String::from_utf8_lossy(&line).into_owned()
    }

    /// Reads a NUL-terminated string out of simulated memory.
    fn read_cstr(&self, mem: &mut Memory, mut addr: Word) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = mem.read_byte(addr)?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            addr = addr.wrapping_add(1);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a line into a buffer of `max` bytes, always NUL-terminated.
    fn read_into(&mut self, mem: &mut Memory, buffer: Word, max: usize) -> Result<()> {
        if max == 0 {
            return Ok(());
        }
        let line = self.read_line();
        let bytes = line.as_bytes();
        let take = bytes.len().min(max - 1);
        for (idx, &byte) in bytes[..take].iter().enumerate() {
            mem.write_byte(buffer + idx as Word, byte)?;
        }
        mem.write_byte(buffer + take as Word, 0)?;
        Ok(())
    }
}

/// Formats a float the way the console services print them.
fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Maps generator output onto `[0, 1)`.
fn unit_float(value: u32) -> f64 {
    f64::from(value) / (f64::from(u32::MAX) + 1.0)
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error caused by a [syscall](Syscalls::dispatch).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// Unknown service code.
    #[error("bad syscall code: {0}")]
    BadCode(u32),
    /// Argument outside the service's domain.
    #[error("bad argument to syscall {code}")]
    BadArgument {
        /// Service code.
        code: u32,
    },
    /// Memory fault while transferring data.
    #[error(transparent)]
    Memory(#[from] mem::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemoryMap;

    fn setup() -> (Syscalls, MachineState, Memory, Shared<Terminal>) {
        let terminal = Shared::new(Terminal::new());
        let sys = Syscalls::new(
            terminal.clone(),
            Shared::new(Files::new()),
            Shared::new(RandomStream::new()),
            Clock::new(0),
            0x1004_0000,
        );
        let mut state = MachineState::new();
        state.pc = 0x0040_0000;
        (sys, state, Memory::new(MemoryMap::default()), terminal)
    }

    #[test]
    fn print_int_writes_terminal() {
        let (mut sys, mut state, mut mem, terminal) = setup();
        state.set_reg(reg::A0, -42_i32 as Word);
        sys.dispatch(&mut state, &mut mem, 1).unwrap();
        assert_eq!(terminal.borrow().text(), "-42");
    }

    #[test]
    fn print_string_reads_memory() {
        let (mut sys, mut state, mut mem, terminal) = setup();
        mem.write_bytes(0x1001_0000, b"hi\0").unwrap();
        state.set_reg(reg::A0, 0x1001_0000);
        sys.dispatch(&mut state, &mut mem, 4).unwrap();
        assert_eq!(terminal.borrow().text(), "hi");
    }

    #[test]
    fn read_int_parses_input() {
        let (mut sys, mut state, mut mem, _) = setup();
        sys.feed_input("123\n456\n");
        sys.dispatch(&mut state, &mut mem, 5).unwrap();
        assert_eq!(state.reg(reg::V0), 123);
        sys.dispatch(&mut state, &mut mem, 5).unwrap();
        assert_eq!(state.reg(reg::V0), 456);
    }

    #[test]
    fn read_string_bounds_and_terminates() {
        let (mut sys, mut state, mut mem, _) = setup();
        sys.feed_input("abcdef\n");
        state.set_reg(reg::A0, 0x1001_0000);
        state.set_reg(reg::A1, 4);
        sys.dispatch(&mut state, &mut mem, 8).unwrap();
        assert_eq!(mem.read_byte(0x1001_0000), Ok(b'a'));
        assert_eq!(mem.read_byte(0x1001_0002), Ok(b'c'));
        assert_eq!(mem.read_byte(0x1001_0003), Ok(0));
    }

    #[test]
    fn sbrk_advances_heap() {
        let (mut sys, mut state, mut mem, _) = setup();
        state.set_reg(reg::A0, 10);
        sys.dispatch(&mut state, &mut mem, 9).unwrap();
        assert_eq!(state.reg(reg::V0), 0x1004_0000);
        sys.dispatch(&mut state, &mut mem, 9).unwrap();
        assert_eq!(state.reg(reg::V0), 0x1004_000c);
    }

    #[test]
    fn exit_terminates() {
        let (mut sys, mut state, mut mem, _) = setup();
        sys.dispatch(&mut state, &mut mem, 10).unwrap();
        assert!(state.terminated);
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn exit2_records_code() {
        let (mut sys, mut state, mut mem, _) = setup();
        state.set_reg(reg::A0, 3);
        sys.dispatch(&mut state, &mut mem, 17).unwrap();
        assert_eq!(state.exit_code, Some(3));
    }

    #[test]
    fn file_round_trip_works() {
        let (mut sys, mut state, mut mem, _) = setup();
        // open "out" for write
        mem.write_bytes(0x1001_0000, b"out\0").unwrap();
        mem.write_bytes(0x1001_0010, b"data").unwrap();
        state.set_reg(reg::A0, 0x1001_0000);
        state.set_reg(reg::A1, 1);
        sys.dispatch(&mut state, &mut mem, 13).unwrap();
        let fd = state.reg(reg::V0);
        assert_eq!(fd, 3);
        // write 4 bytes
        state.set_reg(reg::A0, fd);
        state.set_reg(reg::A1, 0x1001_0010);
        state.set_reg(reg::A2, 4);
        sys.dispatch(&mut state, &mut mem, 15).unwrap();
        assert_eq!(state.reg(reg::V0), 4);
        // close
        state.set_reg(reg::A0, fd);
        sys.dispatch(&mut state, &mut mem, 16).unwrap();
        assert_eq!(sys.files.borrow().get("out"), Some(&b"data"[..]));
    }

    #[test]
    fn time_and_sleep_use_simulated_clock() {
        let (mut sys, mut state, mut mem, _) = setup();
        state.set_reg(reg::A0, 250);
        sys.dispatch(&mut state, &mut mem, 32).unwrap();
        sys.dispatch(&mut state, &mut mem, 30).unwrap();
        assert_eq!(state.reg(reg::A0), 250);
        assert_eq!(state.reg(reg::A1), 0);
    }

    #[test]
    fn random_range_is_bounded() {
        let (mut sys, mut state, mut mem, _) = setup();
        state.set_reg(reg::A0, 0);
        state.set_reg(reg::A1, 10);
        sys.dispatch(&mut state, &mut mem, 42).unwrap();
        assert!(state.reg(reg::A0) < 10);
        // Zero bound is rejected.
        state.set_reg(reg::A1, 0);
        assert_eq!(
            sys.dispatch(&mut state, &mut mem, 42),
            Err(Error::BadArgument { code: 42 })
        );
    }

    #[test]
    fn bad_code_fails() {
        let (mut sys, mut state, mut mem, _) = setup();
        assert_eq!(
            sys.dispatch(&mut state, &mut mem, 999),
            Err(Error::BadCode(999))
        );
    }
}
