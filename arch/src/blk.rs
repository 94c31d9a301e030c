use crate::Shared;

/// Logical simulation block.
pub trait Block {
    /// Check if the block is enabled.
    ///
    /// # Note
    ///
    /// When disabled, this indicates that the block has no work to perform.
    fn ready(&self) -> bool {
        true
    }

    /// Simulates a single cycle of the block.
    fn cycle(&mut self) {}

    /// Performs a reset on the block.
    ///
    /// Afterwards, the block should behave as if it has just been initialized
    /// to its powered-on state.
    fn reset(&mut self) {}
}

impl<B: Block> Block for Shared<B> {
    fn ready(&self) -> bool {
        self.borrow().ready()
    }

    fn cycle(&mut self) {
        self.borrow_mut().cycle();
    }

    fn reset(&mut self) {
        self.borrow_mut().reset();
    }
}
