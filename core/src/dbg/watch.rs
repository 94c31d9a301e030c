//! Watches.

use indexmap::IndexMap;
use mipsim_arch::Word;

use super::expr::{self, Expr};
use crate::asm::gpr;
use crate::mem::Memory;
use crate::parts::cpu::MachineState;

/// What a watch observes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// A general-purpose register.
    Register,
    /// A memory word.
    Memory,
    /// An arbitrary expression.
    Expression,
}

/// A change observed across one step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchEvent {
    /// Watch kind.
    pub kind: Kind,
    /// Watch identifier as registered.
    pub identifier: String,
    /// Value before the step.
    pub old: Word,
    /// Value after the step.
    pub new: Word,
}

#[derive(Debug)]
enum Target {
    Register(u8),
    Memory(Word),
    Expression(Expr),
}

#[derive(Debug)]
struct Watch {
    kind: Kind,
    identifier: String,
    target: Target,
    last: Option<Word>,
}

/// Watch table.
///
/// Snapshot current values before a step with [`snapshot`], then collect
/// [`WatchEvent`]s for anything that changed with [`diff`].
///
/// [`snapshot`]: WatchEngine::snapshot
/// [`diff`]: WatchEngine::diff
#[derive(Debug, Default)]
pub struct WatchEngine {
    watches: Vec<Watch>,
}

impl WatchEngine {
    /// Constructs a new, empty `WatchEngine`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches a register by name (`t0`) or number (`8`).
    ///
    /// # Errors
    ///
    /// Errors on unknown register names.
    pub fn watch_register(&mut self, name: &str) -> Result<(), expr::Error> {
        let name = name.trim_start_matches('$');
        let reg = name
            .parse::<u8>()
            .ok()
            .filter(|&idx| idx < 32)
            .or_else(|| gpr(name))
            .ok_or_else(|| expr::Error::BadRegister(name.to_owned()))?;
        self.watches.push(Watch {
            kind: Kind::Register,
            identifier: name.to_owned(),
            target: Target::Register(reg),
            last: None,
        });
        Ok(())
    }

    /// Watches the word at an address.
    pub fn watch_memory(&mut self, addr: Word) {
        self.watches.push(Watch {
            kind: Kind::Memory,
            identifier: format!("{addr:#010x}"),
            target: Target::Memory(addr),
            last: None,
        });
    }

    /// Watches an expression.
    ///
    /// # Errors
    ///
    /// Errors when the expression does not parse.
    pub fn watch_expression(&mut self, text: &str) -> Result<(), expr::Error> {
        let parsed = expr::parse(text)?;
        self.watches.push(Watch {
            kind: Kind::Expression,
            identifier: text.to_owned(),
            target: Target::Expression(parsed),
            last: None,
        });
        Ok(())
    }

    /// Removes every watch.
    pub fn clear(&mut self) {
        self.watches.clear();
    }

    /// Checks whether no watches are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Records the current value of every watch.
    ///
    /// # Errors
    ///
    /// Errors when an expression watch fails to evaluate.
    pub fn snapshot(
        &mut self,
        state: &MachineState,
        mem: &mut Memory,
        symbols: &IndexMap<String, Word>,
    ) -> Result<(), expr::Error> {
        for watch in &mut self.watches {
            watch.last = Some(read(&watch.target, state, mem, symbols)?);
        }
        Ok(())
    }

    /// Compares current values against the last snapshot.
    ///
    /// Changed watches produce events and their snapshots advance.
    ///
    /// # Errors
    ///
    /// Errors when an expression watch fails to evaluate.
    pub fn diff(
        &mut self,
        state: &MachineState,
        mem: &mut Memory,
        symbols: &IndexMap<String, Word>,
    ) -> Result<Vec<WatchEvent>, expr::Error> {
        let mut events = Vec::new();
        for watch in &mut self.watches {
            let new = read(&watch.target, state, mem, symbols)?;
            if let Some(old) = watch.last {
                if old != new {
                    events.push(WatchEvent {
                        kind: watch.kind,
                        identifier: watch.identifier.clone(),
                        old,
                        new,
                    });
                }
            }
            watch.last = Some(new);
        }
        Ok(events)
    }

    /// Reads the current value of every watch without touching snapshots.
    ///
    /// Evaluation failures surface as `None` for that watch.
    pub fn values(
        &self,
        state: &MachineState,
        mem: &mut Memory,
        symbols: &IndexMap<String, Word>,
    ) -> Vec<(String, Option<Word>)> {
        self.watches
            .iter()
            .map(|watch| {
                let value = read(&watch.target, state, mem, symbols).ok();
                (watch.identifier.clone(), value)
            })
            .collect()
    }
}

fn read(
    target: &Target,
    state: &MachineState,
    mem: &mut Memory,
    symbols: &IndexMap<String, Word>,
) -> Result<Word, expr::Error> {
    match target {
        Target::Register(idx) => Ok(state.reg(*idx)),
        Target::Memory(addr) => Ok(mem.read_word(*addr)?),
        Target::Expression(parsed) => expr::eval(parsed, state, mem, symbols),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemoryMap;

    fn setup() -> (WatchEngine, MachineState, Memory, IndexMap<String, Word>) {
        (
            WatchEngine::new(),
            MachineState::new(),
            Memory::new(MemoryMap::default()),
            IndexMap::new(),
        )
    }

    #[test]
    fn register_change_is_reported() {
        let (mut engine, mut state, mut mem, symbols) = setup();
        engine.watch_register("t0").unwrap();
        engine.snapshot(&state, &mut mem, &symbols).unwrap();
        state.set_reg(8, 7);
        let events = engine.diff(&state, &mut mem, &symbols).unwrap();
        assert_eq!(
            events,
            vec![WatchEvent {
                kind: Kind::Register,
                identifier: "t0".to_owned(),
                old: 0,
                new: 7,
            }]
        );
    }

    #[test]
    fn unchanged_watch_stays_quiet() {
        let (mut engine, state, mut mem, symbols) = setup();
        engine.watch_register("t0").unwrap();
        engine.snapshot(&state, &mut mem, &symbols).unwrap();
        assert!(engine.diff(&state, &mut mem, &symbols).unwrap().is_empty());
    }

    #[test]
    fn memory_watch_sees_stores() {
        let (mut engine, state, mut mem, symbols) = setup();
        engine.watch_memory(0x1001_0000);
        engine.snapshot(&state, &mut mem, &symbols).unwrap();
        mem.write_word(0x1001_0000, 5).unwrap();
        let events = engine.diff(&state, &mut mem, &symbols).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Kind::Memory);
        assert_eq!(events[0].new, 5);
    }

    #[test]
    fn expression_watch_tracks_derived_value() {
        let (mut engine, mut state, mut mem, symbols) = setup();
        engine.watch_expression("$t0 * 2 + 1").unwrap();
        engine.snapshot(&state, &mut mem, &symbols).unwrap();
        state.set_reg(8, 10);
        let events = engine.diff(&state, &mut mem, &symbols).unwrap();
        assert_eq!(events[0].new, 21);
    }

    #[test]
    fn unknown_symbol_surfaces_on_evaluation() {
        let (mut engine, state, mut mem, symbols) = setup();
        engine.watch_expression("missing").unwrap();
        assert!(matches!(
            engine.snapshot(&state, &mut mem, &symbols),
            Err(expr::Error::UnknownSymbol(_))
        ));
    }
}
