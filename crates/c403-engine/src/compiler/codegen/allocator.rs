//! Working and index register allocation
//!
//! Registers are handed out in ascending order and must come back in
//! reverse order: a register can only drop to a zero reference count when it
//! is the most recently allocated one in its class. Expression evaluation
//! naturally frees temporaries LIFO, so a cursor per class is enough.

use crate::compiler::bytecode::{Register, INDEX_REGISTER_COUNT, WORKING_REGISTER_COUNT};

/// Reference counts and next-free cursor for one register class
#[derive(Debug, Clone, Copy)]
struct Bank<const N: usize> {
    counts: [u32; N],
    next: usize,
}

impl<const N: usize> Bank<N> {
    const fn new() -> Self {
        Self { counts: [0; N], next: 0 }
    }

    fn take(&mut self) -> Option<usize> {
        if self.next >= N {
            return None;
        }
        let slot = self.next;
        assert_eq!(self.counts[slot], 0, "free register still referenced");
        self.counts[slot] = 1;
        self.next += 1;
        Some(slot)
    }

    fn reference(&mut self, slot: usize) {
        assert!(slot < self.next, "referencing a register that was never allocated");
        self.counts[slot] += 1;
    }

    fn dereference(&mut self, slot: usize) {
        assert!(self.counts[slot] > 0, "register reference count underflow");
        self.counts[slot] -= 1;
        if self.counts[slot] == 0 {
            assert_eq!(slot + 1, self.next, "register freed out of LIFO order");
            self.next -= 1;
        }
    }

    fn reset(&mut self) {
        self.counts = [0; N];
        self.next = 0;
    }
}

/// LIFO allocator for RT0-RT7 and IX0-IX3
#[derive(Debug, Clone)]
pub struct RegisterAllocator {
    working: Bank<WORKING_REGISTER_COUNT>,
    index: Bank<INDEX_REGISTER_COUNT>,
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self {
            working: Bank::new(),
            index: Bank::new(),
        }
    }

    /// Next free working register, with a reference count of one
    pub fn next_working(&mut self) -> Option<Register> {
        self.working.take().and_then(Register::working)
    }

    /// Next free index register, with a reference count of one
    pub fn next_index(&mut self) -> Option<Register> {
        self.index.take().and_then(Register::index)
    }

    /// Add a reference to an allocated register. No-op for other registers.
    pub fn reference(&mut self, register: Register) {
        match register.class_slot() {
            Some(slot) if register.is_working() => self.working.reference(slot),
            Some(slot) => self.index.reference(slot),
            None => {}
        }
    }

    /// Drop a reference, freeing the register when it reaches zero.
    /// No-op for registers the allocator does not manage.
    ///
    /// # Panics
    ///
    /// On reference count underflow, or when a register other than the most
    /// recently allocated one in its class is freed.
    pub fn dereference(&mut self, register: Register) {
        match register.class_slot() {
            Some(slot) if register.is_working() => self.working.dereference(slot),
            Some(slot) => self.index.dereference(slot),
            None => {}
        }
    }

    /// Current reference count of a managed register
    pub fn reference_count(&self, register: Register) -> u32 {
        match register.class_slot() {
            Some(slot) if register.is_working() => self.working.counts[slot],
            Some(slot) => self.index.counts[slot],
            None => 0,
        }
    }

    /// Number of working registers in use
    pub fn working_in_use(&self) -> usize {
        self.working.next
    }

    /// Number of index registers in use
    pub fn index_in_use(&self) -> usize {
        self.index.next
    }

    /// Reset both classes at a statement boundary.
    ///
    /// At most one register per class may still be live (the value of an
    /// expression statement that nothing consumed).
    pub fn free_all(&mut self) {
        assert!(self.working.next <= 1, "working registers leaked across a statement");
        assert!(self.index.next <= 1, "index registers leaked across a statement");
        self.working.reset();
        self.index.reset();
    }
}
