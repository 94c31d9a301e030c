//! Cache models.

use mipsim_arch::Word;

/// A write-through cache.
///
/// Backing RAM stays authoritative on every write, so the model only tracks
/// tags: hits and misses are observable, contents are not duplicated.
#[derive(Clone, Debug)]
pub struct Cache {
    /// Tag storage, most-recently-used first within each set.
    sets: Vec<Vec<Word>>,
    /// Associativity (tags per set).
    assoc: usize,
    /// Log2 of the line size in bytes.
    line_bits: u32,
    /// Hit counter.
    hits: u64,
    /// Miss counter.
    misses: u64,
}

impl Cache {
    /// Constructs a direct-mapped cache with the given geometry.
    ///
    /// `lines` and `line_size` round up to powers of two.
    #[must_use]
    pub fn direct(lines: usize, line_size: u32) -> Self {
        Self::set_associative(lines, 1, line_size)
    }

    /// Constructs a set-associative cache with the given geometry.
    #[must_use]
    pub fn set_associative(lines: usize, assoc: usize, line_size: u32) -> Self {
        let assoc = assoc.max(1);
        let sets = (lines.max(1) / assoc).next_power_of_two();
        Self {
            sets: vec![Vec::with_capacity(assoc); sets],
            assoc,
            line_bits: line_size.max(4).next_power_of_two().trailing_zeros(),
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up an address, filling the line on a miss.
    ///
    /// Returns whether the access hit.
    pub fn access(&mut self, addr: Word) -> bool {
        let line = addr >> self.line_bits;
        let set = (line as usize) & (self.sets.len() - 1);
        let ways = &mut self.sets[set];
        if let Some(pos) = ways.iter().position(|&tag| tag == line) {
            // Refresh recency.
            let tag = ways.remove(pos);
            ways.insert(0, tag);
            self.hits += 1;
            return true;
        }
        if ways.len() == self.assoc {
            ways.pop();
        }
        ways.insert(0, line);
        self.misses += 1;
        false
    }

    /// Invalidates every line.
    pub fn invalidate(&mut self) {
        for ways in &mut self.sets {
            ways.clear();
        }
    }

    /// Gets the hit count.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Gets the miss count.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_access_hits() {
        let mut cache = Cache::direct(64, 16);
        assert!(!cache.access(0x1000));
        assert!(cache.access(0x1000));
        assert!(cache.access(0x100c));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn direct_mapped_conflict_evicts() {
        // Two addresses one set apart by exactly the cache span conflict.
        let mut cache = Cache::direct(4, 16);
        assert!(!cache.access(0x0000));
        assert!(!cache.access(0x0040));
        assert!(!cache.access(0x0000));
    }

    #[test]
    fn set_associative_retains_both_ways() {
        let mut cache = Cache::set_associative(4, 2, 16);
        assert!(!cache.access(0x0000));
        assert!(!cache.access(0x0020));
        assert!(cache.access(0x0000));
        assert!(cache.access(0x0020));
    }

    #[test]
    fn invalidate_works() {
        let mut cache = Cache::direct(4, 16);
        cache.access(0x0000);
        cache.invalidate();
        assert!(!cache.access(0x0000));
    }
}
