//! Runtime register sets
//!
//! One slot per real register (RIP through RT7). A call checkpoints the
//! whole set; the pseudo registers RFN and INV have no slot.

use super::{VmError, VmResult};
use crate::compiler::bytecode::{Register, REGISTER_SLOT_COUNT};

/// The register values of one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSet {
    slots: [u32; REGISTER_SLOT_COUNT],
}

impl RegisterSet {
    /// All registers zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a register slot
    #[inline]
    pub fn get(&self, register: Register) -> VmResult<u32> {
        self.slots
            .get(register as usize)
            .copied()
            .ok_or(VmError::NoRegisterSlot(register))
    }

    /// Write a register slot
    #[inline]
    pub fn set(&mut self, register: Register, value: u32) -> VmResult<()> {
        match self.slots.get_mut(register as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::NoRegisterSlot(register)),
        }
    }

    #[inline]
    pub fn rip(&self) -> u32 {
        self.slots[Register::Rip as usize]
    }

    #[inline]
    pub fn set_rip(&mut self, value: u32) {
        self.slots[Register::Rip as usize] = value;
    }

    #[inline]
    pub fn rsb(&self) -> u32 {
        self.slots[Register::Rsb as usize]
    }

    #[inline]
    pub fn set_rsb(&mut self, value: u32) {
        self.slots[Register::Rsb as usize] = value;
    }

    pub fn rst(&self) -> u32 {
        self.slots[Register::Rst as usize]
    }

    pub fn set_rst(&mut self, value: u32) {
        self.slots[Register::Rst as usize] = value;
    }

    pub fn rrv(&self) -> u32 {
        self.slots[Register::Rrv as usize]
    }

    pub fn set_rrv(&mut self, value: u32) {
        self.slots[Register::Rrv as usize] = value;
    }

    pub fn rgd(&self) -> u32 {
        self.slots[Register::Rgd as usize]
    }

    /// Raw slot values in register id order
    pub fn slots(&self) -> &[u32; REGISTER_SLOT_COUNT] {
        &self.slots
    }
}
