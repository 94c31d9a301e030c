//! Breakpoints.

use indexmap::IndexMap;
use mipsim_arch::Word;

use crate::parts::cpu::MachineState;

/// What a breakpoint rule targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// An absolute instruction address.
    Address,
    /// A retired-instruction ordinal.
    Instruction,
    /// A source line number.
    Line,
}

/// A conditional guard: the rule matches only when the register holds the
/// value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Condition {
    /// Register index.
    pub reg: u8,
    /// Required value.
    pub value: Word,
}

impl Condition {
    fn holds(&self, state: &MachineState) -> bool {
        state.reg(self.reg) == self.value
    }
}

/// A breakpoint rule; the target lives in the owning table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rule {
    /// Remove the rule after its first hit.
    pub once: bool,
    /// Optional guard.
    pub condition: Option<Condition>,
}

/// A matched breakpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hit {
    /// Which table matched.
    pub kind: Kind,
    /// The matched target value.
    pub value: u64,
}

/// Breakpoint tables: by address, by instruction ordinal, by source line.
///
/// Multiple rules may share a target; they are evaluated in insertion
/// order.
#[derive(Debug, Default)]
pub struct BreakpointEngine {
    /// Rules keyed by instruction address.
    by_addr: IndexMap<Word, Vec<Rule>>,
    /// Rules keyed by retired-instruction ordinal.
    by_index: IndexMap<u64, Vec<Rule>>,
    /// Rules keyed by source line.
    by_line: IndexMap<u32, Vec<Rule>>,
}

impl BreakpointEngine {
    /// Constructs a new, empty `BreakpointEngine`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule at an instruction address.
    pub fn add_address(&mut self, addr: Word, rule: Rule) {
        self.by_addr.entry(addr).or_default().push(rule);
    }

    /// Adds a rule at a retired-instruction ordinal.
    pub fn add_instruction(&mut self, index: u64, rule: Rule) {
        self.by_index.entry(index).or_default().push(rule);
    }

    /// Adds a rule at a source line.
    pub fn add_line(&mut self, line: u32, rule: Rule) {
        self.by_line.entry(line).or_default().push(rule);
    }

    /// Adds an address rule by label, resolved against a symbol table.
    ///
    /// Returns whether the label resolved.
    pub fn add_label(&mut self, name: &str, symbols: &IndexMap<String, Word>, rule: Rule) -> bool {
        match symbols.get(name) {
            Some(&addr) => {
                self.add_address(addr, rule);
                true
            }
            None => false,
        }
    }

    /// Removes every rule.
    pub fn clear(&mut self) {
        self.by_addr.clear();
        self.by_index.clear();
        self.by_line.clear();
    }

    /// Checks whether no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty() && self.by_index.is_empty() && self.by_line.is_empty()
    }

    /// Counts registered rules across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        fn count<K>(table: &IndexMap<K, Vec<Rule>>) -> usize {
            table.values().map(Vec::len).sum::<usize>()
        }
        count(&self.by_addr) + count(&self.by_index) + count(&self.by_line)
    }

    /// Evaluates the tables against the next instruction to issue.
    ///
    /// Rules are checked in insertion order; an unconditional rule matches
    /// trivially, a conditional one only when its guard holds. One-shot
    /// rules are removed on hit.
    pub fn check_for_hit(
        &mut self,
        pc: Word,
        index: u64,
        line: Option<u32>,
        state: Option<&MachineState>,
    ) -> Option<Hit> {
        if let Some(hit) = check(&mut self.by_addr, pc, state) {
            return Some(Hit {
                kind: Kind::Address,
                value: hit,
            });
        }
        if let Some(hit) = check(&mut self.by_index, index, state) {
            return Some(Hit {
                kind: Kind::Instruction,
                value: hit,
            });
        }
        if let Some(line) = line {
            if let Some(hit) = check(&mut self.by_line, line, state) {
                return Some(Hit {
                    kind: Kind::Line,
                    value: hit,
                });
            }
        }
        None
    }
}

fn check<K>(table: &mut IndexMap<K, Vec<Rule>>, key: K, state: Option<&MachineState>) -> Option<u64>
where
    K: Copy + Eq + std::hash::Hash + Into<u64>,
{
    let rules = table.get_mut(&key)?;
    let pos = rules.iter().position(|rule| match &rule.condition {
        None => true,
        Some(condition) => state.is_some_and(|state| condition.holds(state)),
    })?;
    if rules[pos].once {
        rules.remove(pos);
        if rules.is_empty() {
            table.shift_remove(&key);
        }
    }
    Some(key.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_rule_hits() {
        let mut engine = BreakpointEngine::new();
        engine.add_address(0x0040_0004, Rule::default());
        assert_eq!(engine.check_for_hit(0x0040_0000, 0, None, None), None);
        let hit = engine.check_for_hit(0x0040_0004, 1, None, None).unwrap();
        assert_eq!(hit.kind, Kind::Address);
        assert_eq!(hit.value, 0x0040_0004);
        // Persistent rules keep matching.
        assert!(engine.check_for_hit(0x0040_0004, 2, None, None).is_some());
    }

    #[test]
    fn one_shot_rule_is_removed() {
        let mut engine = BreakpointEngine::new();
        engine.add_address(
            0x0040_0000,
            Rule {
                once: true,
                condition: None,
            },
        );
        assert!(engine.check_for_hit(0x0040_0000, 0, None, None).is_some());
        assert!(engine.check_for_hit(0x0040_0000, 1, None, None).is_none());
        assert!(engine.is_empty());
    }

    #[test]
    fn condition_gates_the_hit() {
        let mut engine = BreakpointEngine::new();
        engine.add_address(
            0x0040_0000,
            Rule {
                once: false,
                condition: Some(Condition { reg: 8, value: 3 }),
            },
        );
        let mut state = MachineState::new();
        state.set_reg(8, 2);
        assert!(engine
            .check_for_hit(0x0040_0000, 0, None, Some(&state))
            .is_none());
        state.set_reg(8, 3);
        assert!(engine
            .check_for_hit(0x0040_0000, 1, None, Some(&state))
            .is_some());
    }

    #[test]
    fn instruction_and_line_tables_work() {
        let mut engine = BreakpointEngine::new();
        engine.add_instruction(5, Rule::default());
        engine.add_line(12, Rule::default());
        assert!(engine.check_for_hit(0, 5, None, None).is_some());
        let hit = engine.check_for_hit(0, 6, Some(12), None).unwrap();
        assert_eq!(hit.kind, Kind::Line);
    }

    #[test]
    fn rules_share_a_target() {
        let mut engine = BreakpointEngine::new();
        engine.add_address(
            0x0040_0000,
            Rule {
                once: false,
                condition: Some(Condition { reg: 8, value: 1 }),
            },
        );
        engine.add_address(0x0040_0000, Rule::default());
        assert_eq!(engine.len(), 2);
        // The second, unconditional rule matches when the first does not.
        let state = MachineState::new();
        assert!(engine
            .check_for_hit(0x0040_0000, 0, None, Some(&state))
            .is_some());
    }
}
