//! Simulator façade.
//!
//! [`Simulator`] composes the memory hierarchy, devices, processor,
//! pipeline, interrupt controller, syscall table, and debugger engines, and
//! exposes the step/run/halt/resume surface. A [`RuntimeSnapshot`] is
//! published to subscribers after every step.

use indexmap::IndexMap;
use log::warn;
use mipsim_arch::{Block as _, Shared, Word};
use thiserror::Error;

use crate::asm::{self, Assembler, BinaryImage, Loader, ProgramLayout, Segment};
use crate::dbg::{BreakpointEngine, WatchEngine};
use crate::dev::{self, Audio, Bitmap, Display, Files, Keyboard, RandomStream, SevenSegment,
                 Terminal, Timer};
use crate::dev::Rtc;
use crate::mem::{Cache, Memory, MemoryMap};
use crate::parts::cpu::{self, insn, MachineState, Outcome};
use crate::parts::pic::{Exception, Pic, Request, HANDLER_OFFSET};
use crate::parts::pipe::{Counters, Pipeline};
use crate::parts::sys::{Clock, Syscalls};

mod snap;

pub use self::snap::{RuntimeSnapshot, Status, Subject};

/// Execution mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    /// Five-stage pipeline.
    #[default]
    Pipeline,
    /// Single-cycle execution.
    Sequential,
}

/// Display transmit delay in cycles.
const TX_DELAY: u32 = 4;

/// Bitmap display geometry.
const BITMAP_DIM: (u32, u32) = (64, 64);

/// The simulator.
#[derive(Debug)]
pub struct Simulator {
    // Front end
    asm: Assembler,
    // Machine
    state: MachineState,
    mem: Memory,
    pipe: Pipeline,
    pic: Pic,
    sys: Syscalls,
    // Devices
    terminal: Shared<Terminal>,
    display: Shared<Display>,
    keyboard: Shared<Keyboard>,
    bitmap: Shared<Bitmap>,
    timer: Shared<Timer>,
    files: Shared<Files>,
    random: Shared<RandomStream>,
    sevenseg: Shared<SevenSegment>,
    audio: Shared<Audio>,
    clock: Clock,
    // Debugger
    breakpoints: BreakpointEngine,
    watches: WatchEngine,
    // Execution state
    mode: Mode,
    delayed_branching: bool,
    status: Status,
    halted: bool,
    error: Option<String>,
    retired: u64,
    seq: Counters,
    symbols: IndexMap<String, Word>,
    lines: IndexMap<Word, u32>,
    image: Option<BinaryImage>,
    resumed_from: Option<Word>,
    // Observers
    subject: Subject,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Constructs a fully wired `Simulator`.
    ///
    /// # Panics
    ///
    /// Cannot panic: the standard device map is verified by test.
    #[must_use]
    pub fn new() -> Self {
        let mut mem = Memory::new(MemoryMap::default());
        let heap_base = mem.map().heap_base;
        let pic = Pic::new(mem.map().ktext_base + HANDLER_OFFSET);
        let clock = Clock::new(0);

        let terminal = Shared::new(Terminal::new());
        let display = Shared::new(Display::new(pic.line(), TX_DELAY));
        let keyboard = Shared::new(Keyboard::new(pic.line()));
        let bitmap = Shared::new(Bitmap::new(BITMAP_DIM.0, BITMAP_DIM.1));
        let timer = Shared::new(Timer::new(pic.line()));
        let rtc = Shared::new(Rtc::new(clock.clone()));
        let files = Shared::new(Files::new());
        let random = Shared::new(RandomStream::new());
        let sevenseg = Shared::new(SevenSegment::new());
        let audio = Shared::new(Audio::new());

        let mappings: [((Word, Word), mipsim_arch::mio::Device); 9] = [
            (dev::map::DISPLAY, display.clone().into()),
            (dev::map::KEYBOARD, keyboard.clone().into()),
            (dev::map::TERMINAL, terminal.clone().into()),
            (dev::map::SEVEN_SEGMENT, sevenseg.clone().into()),
            (dev::map::TIMER, timer.clone().into()),
            (dev::map::RTC, rtc.into()),
            (dev::map::AUDIO, audio.clone().into()),
            (dev::map::RANDOM, random.clone().into()),
            (dev::map::BITMAP, bitmap.clone().into()),
        ];
        for ((start, end), device) in mappings {
            mem.map_device(start, end, device)
                .expect("standard device map is well-formed");
        }

        let sys = Syscalls::new(
            terminal.clone(),
            files.clone(),
            random.clone(),
            clock.clone(),
            heap_base,
        );

        Self {
            asm: Assembler::default(),
            state: MachineState::new(),
            mem,
            pipe: Pipeline::new(),
            pic,
            sys,
            terminal,
            display,
            keyboard,
            bitmap,
            timer,
            files,
            random,
            sevenseg,
            audio,
            clock,
            breakpoints: BreakpointEngine::new(),
            watches: WatchEngine::new(),
            mode: Mode::default(),
            delayed_branching: false,
            status: Status::Running,
            halted: false,
            error: None,
            retired: 0,
            seq: Counters::default(),
            symbols: IndexMap::new(),
            lines: IndexMap::new(),
            image: None,
            resumed_from: None,
            subject: Subject::default(),
        }
    }

    /// Assembles one source string.
    ///
    /// # Errors
    ///
    /// Errors with file, line, and column on assembly faults.
    pub fn assemble(&self, source: &str) -> asm::Result<BinaryImage> {
        self.asm.assemble("main.s", source)
    }

    /// Assembles several tagged source strings and links them.
    ///
    /// # Errors
    ///
    /// Errors on assembly or link faults.
    pub fn assemble_files(&self, files: &[(&str, &str)]) -> Result<BinaryImage, Error> {
        let mut images = Vec::with_capacity(files.len());
        for (name, source) in files {
            images.push(self.asm.assemble(name, source)?);
        }
        Ok(asm::link::link(&images)?)
    }

    /// Gets the assembler, for configuration and pseudo-op reloads.
    pub fn assembler_mut(&mut self) -> &mut Assembler {
        &mut self.asm
    }

    /// Loads an assembled image, clearing the debugger engines.
    ///
    /// # Errors
    ///
    /// Errors when the image does not fit the configured regions.
    pub fn load(&mut self, image: BinaryImage) -> Result<ProgramLayout, asm::load::Error> {
        let layout = Loader::new().load(&image, &mut self.mem, &mut self.state)?;
        // A loaded kernel text segment provides the exception handler.
        self.pic.clear();
        self.pic.install(!image.ktext.is_empty());
        // Per-program state.
        self.breakpoints.clear();
        self.watches.clear();
        self.pipe.reset();
        self.seq = Counters::default();
        self.retired = 0;
        self.status = Status::Running;
        self.halted = false;
        self.error = None;
        self.resumed_from = None;
        self.sys.reset(self.mem.map().heap_base);
        self.symbols = layout.symbols.clone();
        self.lines = image
            .source_map
            .iter()
            .filter(|loc| loc.segment == Segment::Text)
            .map(|loc| (loc.address, loc.line as u32))
            .collect();
        self.image = Some(image);
        self.publish();
        Ok(layout)
    }

    /// Sets the execution mode, dropping in-flight pipeline work.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            self.pipe.flush_all();
        }
    }

    /// Gets the execution mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Enables or disables delayed branching for sequential execution.
    pub fn set_delayed_branching(&mut self, enabled: bool) {
        self.delayed_branching = enabled;
    }

    /// Enables or disables pipeline forwarding.
    pub fn set_forwarding(&mut self, enabled: bool) {
        self.pipe.forwarding = enabled;
    }

    /// Installs default instruction and data caches.
    pub fn enable_caches(&mut self) {
        self.mem.icache = Some(Cache::direct(128, 16));
        self.mem.dcache = Some(Cache::set_associative(128, 2, 16));
    }

    /// Requests a pause; takes effect at the top of the next step.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Clears a pause or breakpoint stop.
    pub fn resume(&mut self) {
        self.halted = false;
        if self.status != Status::Terminated {
            self.status = Status::Running;
        }
    }

    /// Gets the architectural state.
    #[must_use]
    pub fn get_state(&self) -> &MachineState {
        &self.state
    }

    /// Gets the memory hierarchy.
    pub fn get_memory(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Gets the performance counters for the active mode.
    #[must_use]
    pub fn get_performance_counters(&self) -> Counters {
        match self.mode {
            Mode::Pipeline => self.pipe.counters,
            Mode::Sequential => self.seq,
        }
    }

    /// Gets the fatal error recorded at termination, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Gets the loaded program's symbols.
    #[must_use]
    pub fn symbols(&self) -> &IndexMap<String, Word> {
        &self.symbols
    }

    /// Gets the breakpoint engine.
    pub fn breakpoints_mut(&mut self) -> &mut BreakpointEngine {
        &mut self.breakpoints
    }

    /// Gets the watch engine.
    pub fn watches_mut(&mut self) -> &mut WatchEngine {
        &mut self.watches
    }

    /// Gets the terminal device.
    #[must_use]
    pub fn terminal(&self) -> &Shared<Terminal> {
        &self.terminal
    }

    /// Gets the display device.
    #[must_use]
    pub fn display(&self) -> &Shared<Display> {
        &self.display
    }

    /// Gets the keyboard device.
    #[must_use]
    pub fn keyboard(&self) -> &Shared<Keyboard> {
        &self.keyboard
    }

    /// Gets the bitmap display device.
    #[must_use]
    pub fn bitmap(&self) -> &Shared<Bitmap> {
        &self.bitmap
    }

    /// Gets the interval timer device.
    #[must_use]
    pub fn timer(&self) -> &Shared<Timer> {
        &self.timer
    }

    /// Gets the seven-segment display device.
    #[must_use]
    pub fn seven_segment(&self) -> &Shared<SevenSegment> {
        &self.sevenseg
    }

    /// Gets the audio device.
    #[must_use]
    pub fn audio(&self) -> &Shared<Audio> {
        &self.audio
    }

    /// Gets the random-stream device.
    #[must_use]
    pub fn random(&self) -> &Shared<RandomStream> {
        &self.random
    }

    /// Gets the virtual file store.
    #[must_use]
    pub fn files(&self) -> &Shared<Files> {
        &self.files
    }

    /// Gets the loaded image, if any.
    #[must_use]
    pub fn image(&self) -> Option<&BinaryImage> {
        self.image.as_ref()
    }

    /// Queues console input for the read syscalls.
    pub fn feed_input(&mut self, text: &str) {
        self.sys.feed_input(text);
    }

    /// Subscribes to runtime snapshots; returns an unsubscribe handle.
    pub fn subscribe(&mut self, callback: Box<dyn FnMut(&RuntimeSnapshot)>) -> usize {
        self.subject.subscribe(callback)
    }

    /// Removes a snapshot subscriber.
    pub fn unsubscribe(&mut self, handle: usize) -> bool {
        self.subject.unsubscribe(handle)
    }

    /// Executes one step.
    ///
    /// The indivisible unit of execution: one pipeline cycle or one
    /// sequential instruction, followed by interrupt service and snapshot
    /// publication.
    pub fn step(&mut self) -> Status {
        if self.state.terminated {
            self.status = Status::Terminated;
            return self.status;
        }
        if self.halted {
            self.status = Status::Halted;
            self.publish();
            return self.status;
        }

        // Breakpoints surface before any work is committed. A stop is
        // sticky for the address it fired at, so the next step resumes past
        // it instead of re-triggering.
        if self.resumed_from.take() != Some(self.state.pc) {
            let line = self.lines.get(&self.state.pc).copied();
            if let Some(_hit) =
                self.breakpoints
                    .check_for_hit(self.state.pc, self.retired, line, Some(&self.state))
            {
                self.status = Status::Breakpoint;
                self.resumed_from = Some(self.state.pc);
                self.publish();
                return self.status;
            }
        }

        // Watches: record, step, compare.
        let mut error = self
            .watches
            .snapshot(&self.state, &mut self.mem, &self.symbols)
            .err()
            .map(|err| err.to_string());

        match self.mode {
            Mode::Pipeline => {
                self.pipe
                    .step(&mut self.state, &mut self.mem, &mut self.pic);
                self.retired = self.pipe.counters.instruction_count;
            }
            Mode::Sequential => self.sequential_step(),
        }
        self.cycle_devices();
        self.service();

        let changes = match self.watches.diff(&self.state, &mut self.mem, &self.symbols) {
            Ok(changes) => changes,
            Err(err) => {
                error.get_or_insert_with(|| err.to_string());
                Vec::new()
            }
        };

        self.status = if self.state.terminated {
            Status::Terminated
        } else {
            Status::Running
        };
        if let Some(error) = error {
            warn!("watch evaluation failed: {error}");
            self.error.get_or_insert(error);
        }
        self.publish_with(changes);
        self.status
    }

    /// Runs steps until the program stops or the cycle bound is hit.
    ///
    /// Returns [`Status::Running`] exactly when the bound was exhausted.
    pub fn run(&mut self, max_cycles: Option<u64>) -> Status {
        let mut cycles = 0_u64;
        loop {
            if max_cycles.is_some_and(|max| cycles >= max) {
                return self.status;
            }
            match self.step() {
                Status::Running => cycles += 1,
                status => return status,
            }
        }
    }

    /// Executes one instruction in sequential mode.
    fn sequential_step(&mut self) {
        self.seq.cycle_count += 1;
        let pc = self.state.pc;
        let word = match self.mem.fetch_word(pc) {
            Ok(word) => word,
            Err(err) => {
                self.pic.raise(fetch_fault(&err, pc));
                return;
            }
        };
        let insn = match insn::decode(word) {
            Ok(insn) => insn,
            Err(_) => {
                self.pic.raise(Exception::IllegalInstruction { word, pc });
                return;
            }
        };
        self.seq.instruction_count += 1;
        self.retired = self.seq.instruction_count;
        match cpu::execute(&insn, &mut self.state, &mut self.mem, self.delayed_branching) {
            Ok(Outcome::Next) => self.state.pc = pc.wrapping_add(4),
            Ok(Outcome::Jump(target)) => {
                if self.delayed_branching {
                    self.delay_slot(pc.wrapping_add(4));
                }
                self.state.pc = target;
            }
            Ok(Outcome::Syscall { code }) => {
                self.state.pc = pc.wrapping_add(4);
                self.pic.request_syscall_interrupt(code, pc);
            }
            Ok(Outcome::Break { code }) => {
                self.state.pc = pc.wrapping_add(4);
                self.pic.raise(Exception::Breakpoint { code, pc });
            }
            Err(exception) => self.pic.raise(exception),
        }
    }

    /// Executes the branch delay slot.
    fn delay_slot(&mut self, slot: Word) {
        let Ok(word) = self.mem.fetch_word(slot) else {
            self.pic.raise(Exception::BusError { addr: slot, pc: slot });
            return;
        };
        let Ok(insn) = insn::decode(word) else {
            self.pic.raise(Exception::IllegalInstruction { word, pc: slot });
            return;
        };
        self.seq.instruction_count += 1;
        let saved = self.state.pc;
        self.state.pc = slot;
        let result = cpu::execute(&insn, &mut self.state, &mut self.mem, self.delayed_branching);
        self.state.pc = saved;
        match result {
            // A control transfer in the delay slot is unpredictable on real
            // silicon; the slot's target simply wins here.
            Ok(Outcome::Next | Outcome::Jump(_)) => (),
            Ok(Outcome::Syscall { code }) => self.pic.request_syscall_interrupt(code, slot),
            Ok(Outcome::Break { code }) => {
                self.pic.raise(Exception::Breakpoint { code, pc: slot });
            }
            Err(exception) => self.pic.raise(exception),
        }
    }

    /// Advances cycle-driven devices and the simulation clock.
    fn cycle_devices(&mut self) {
        self.display.cycle();
        self.timer.cycle();
        *self.clock.borrow_mut() += 1;
    }

    /// Drains the interrupt controller.
    fn service(&mut self) {
        while let Some(request) = self.pic.pop() {
            match request {
                Request::Syscall { code, .. } => {
                    if let Err(err) = self.sys.dispatch(&mut self.state, &mut self.mem, code) {
                        self.fatal(&format!("{err} at pc {:#010x}", self.state.pc));
                    }
                }
                Request::Exception(exception) => {
                    if self.pic.installed() {
                        self.pic.epc = Some(exception.pc());
                        self.state.pc = self.pic.handler();
                        self.pipe.flush_all();
                    } else {
                        let message = self.describe(exception);
                        self.fatal(&message);
                    }
                }
                Request::Device { irq } => {
                    if self.pic.installed() {
                        self.pic.epc = Some(self.state.pc);
                        self.state.pc = self.pic.handler();
                        self.pipe.flush_all();
                    } else {
                        warn!("unserviced {irq} interrupt dropped");
                    }
                }
            }
        }
    }

    /// Renders an exception message with its PC and decoded mnemonic.
    fn describe(&mut self, exception: Exception) -> String {
        let pc = exception.pc();
        let mnemonic = self
            .mem
            .fetch_word(pc)
            .ok()
            .and_then(|word| insn::decode(word).ok())
            .map(|insn| insn.mnemonic());
        match mnemonic {
            Some(mnemonic) => format!("{exception} (`{mnemonic}`)"),
            None => exception.to_string(),
        }
    }

    fn fatal(&mut self, message: &str) {
        warn!("fatal: {message}");
        self.state.terminated = true;
        self.error.get_or_insert_with(|| message.to_owned());
    }

    fn publish(&mut self) {
        self.publish_with(Vec::new());
    }

    fn publish_with(&mut self, changes: Vec<crate::dbg::WatchEvent>) {
        let snapshot = RuntimeSnapshot {
            status: self.status,
            pc: self.state.pc,
            registers: self.state.registers(),
            memory_digest: self.mem.digest(),
            watch_values: self
                .watches
                .values(&self.state, &mut self.mem, &self.symbols),
            watch_changes: changes,
            error: self.error.clone(),
        };
        self.subject.publish(&snapshot);
    }
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error from the assemble-and-link front end.
#[derive(Debug, Error)]
pub enum Error {
    /// Assembly failed.
    #[error(transparent)]
    Assembly(#[from] asm::Error),
    /// Linking failed.
    #[error(transparent)]
    Link(#[from] asm::link::Error),
}

fn fetch_fault(err: &crate::mem::Error, pc: Word) -> Exception {
    match *err {
        crate::mem::Error::Misaligned { addr, .. } => Exception::AddressError { addr, pc },
        crate::mem::Error::NotReady { addr } => Exception::DeviceNotReady { addr, pc },
        crate::mem::Error::Bus { addr } | crate::mem::Error::Map { start: addr, .. } => {
            Exception::BusError { addr, pc }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbg::Rule;

    fn boot(src: &str) -> Simulator {
        let mut sim = Simulator::new();
        let image = sim.assemble(src).unwrap();
        sim.load(image).unwrap();
        sim
    }

    const EXIT: &str = "li $v0, 10\nsyscall\n";

    #[test]
    fn run_terminates_on_exit() {
        let mut sim = boot(&format!("li $t0, 3\n{EXIT}"));
        assert_eq!(sim.run(Some(1000)), Status::Terminated);
        assert_eq!(sim.get_state().reg(8), 3);
        assert_eq!(sim.get_state().exit_code, Some(0));
        assert!(sim.error().is_none());
    }

    #[test]
    fn sequential_and_pipeline_agree() {
        let src = "li $t0, 10\nloop: addi $t1, $t1, 2\naddi $t0, $t0, -1\nbne $t0, $zero, loop\nli $v0, 10\nsyscall\n";
        let mut seq = boot(src);
        seq.set_mode(Mode::Sequential);
        assert_eq!(seq.run(Some(10_000)), Status::Terminated);
        let mut pipe = boot(src);
        assert_eq!(pipe.run(Some(10_000)), Status::Terminated);
        assert_eq!(seq.get_state().reg(9), 20);
        assert_eq!(pipe.get_state().reg(9), 20);
        assert_eq!(
            seq.get_state().registers(),
            pipe.get_state().registers()
        );
    }

    #[test]
    fn print_int_reaches_terminal() {
        let mut sim = boot(&format!("li $a0, 42\nli $v0, 1\nsyscall\n{EXIT}"));
        sim.run(Some(1000));
        assert_eq!(sim.terminal().borrow().text(), "42");
    }

    #[test]
    fn breakpoint_stops_before_commit_and_resumes() {
        let mut sim = boot(&format!("addi $t0, $zero, 1\naddi $t0, $t0, 1\naddi $t0, $t0, 1\n{EXIT}"));
        sim.breakpoints_mut().add_address(0x0040_0000, Rule::default());
        assert_eq!(sim.step(), Status::Breakpoint);
        assert_eq!(sim.get_state().reg(8), 0);
        sim.resume();
        assert_eq!(sim.run(Some(1000)), Status::Terminated);
        assert_eq!(sim.get_state().reg(8), 3);
    }

    #[test]
    fn watch_reports_register_change() {
        let mut sim = boot(&format!("addi $t0, $zero, 7\n{EXIT}"));
        sim.set_mode(Mode::Sequential);
        sim.watches_mut().watch_register("t0").unwrap();
        let events = Shared::new(Vec::new());
        let sink = events.clone();
        sim.subscribe(Box::new(move |snap: &RuntimeSnapshot| {
            sink.borrow_mut().extend(snap.watch_changes.clone());
        }));
        sim.run(Some(100));
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier, "t0");
        assert_eq!((events[0].old, events[0].new), (0, 7));
    }

    #[test]
    fn overflow_without_handler_is_fatal() {
        let mut sim = boot(&format!(
            "lui $t0, 32767\nori $t0, $t0, 65535\naddi $t0, $t0, 1\n{EXIT}"
        ));
        assert_eq!(sim.run(Some(1000)), Status::Terminated);
        let error = sim.error().unwrap();
        assert!(error.contains("overflow"));
        assert!(error.contains("0x00400008"));
        assert!(error.contains("addi"));
    }

    #[test]
    fn ktext_handler_catches_exception() {
        let src = "lui $t0, 32767\nori $t0, $t0, 65535\naddi $t0, $t0, 1\n.ktext 0x80000180\nli $v0, 10\nsyscall\n";
        let mut sim = boot(src);
        assert_eq!(sim.run(Some(1000)), Status::Terminated);
        // The handler ran the exit service; no fatal error recorded.
        assert!(sim.error().is_none());
    }

    #[test]
    fn halt_pauses_run() {
        let mut sim = boot(&format!("loop: j loop\n{EXIT}"));
        sim.halt();
        assert_eq!(sim.step(), Status::Halted);
        sim.resume();
        assert_eq!(sim.run(Some(10)), Status::Running);
    }

    #[test]
    fn max_cycles_bounds_run() {
        let mut sim = boot("loop: j loop\n");
        assert_eq!(sim.run(Some(25)), Status::Running);
    }

    #[test]
    fn load_clears_debugger_engines() {
        let mut sim = boot(&format!("nop\n{EXIT}"));
        sim.breakpoints_mut().add_address(0x0040_0000, Rule::default());
        let image = sim.assemble(&format!("nop\n{EXIT}")).unwrap();
        sim.load(image).unwrap();
        assert!(sim.breakpoints_mut().is_empty());
        assert_eq!(sim.run(Some(100)), Status::Terminated);
    }

    #[test]
    fn snapshots_publish_each_step() {
        let mut sim = boot(&format!("nop\nnop\n{EXIT}"));
        let count = Shared::new(0_usize);
        let sink = count.clone();
        sim.subscribe(Box::new(move |_| *sink.borrow_mut() += 1));
        sim.step();
        sim.step();
        assert_eq!(*count.borrow(), 2);
    }
}
