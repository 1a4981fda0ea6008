//! Instruction executor
//!
//! One [`Executor`] runs one VM thread: it fetches the instruction at RIP,
//! dispatches on the instruction shape and either falls through to the next
//! instruction or lets the handler set RIP. The shape handlers live in the
//! submodules.
//!
//! # Operand resolution
//!
//! Every handler reads and writes `register + offset` operands the same way:
//!
//! ```text
//! RGD            global data at byte `offset` (the register value is ignored)
//! RST RSB IXn    memory at `register value + offset`
//! RCT            the offset itself (read only)
//! other          the register slot
//! ```

mod arithmetic;
mod control_flow;
mod stack;

use super::console::Console;
use super::loader::LoadedProgram;
use super::memory::{AddressSpace, Slot, ThreadStack};
use super::register_set::RegisterSet;
use super::thread::{ThreadExit, ThreadSeed, VmOptions};
use super::{VmError, VmResult};
use crate::compiler::bytecode::{Instruction, Operands, RegOperand, Register, STACK_ALIGNMENT};
use std::sync::Arc;

/// Bytes per stack slot
const WORD: u32 = STACK_ALIGNMENT;

/// Bytes per instruction
const INSTRUCTION_SIZE: u32 = Instruction::SIZE as u32;

/// Outcome of a single instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep executing
    Continue,
    /// The outermost activation returned
    Exit(ThreadExit),
}

/// Execution state of one VM thread
#[derive(Debug)]
pub struct Executor {
    program: Arc<LoadedProgram>,
    console: Arc<Console>,
    space: AddressSpace,
    /// Active register set
    registers: RegisterSet,
    /// Register sets checkpointed by CALLNORM, innermost last
    saved: Vec<RegisterSet>,
    stack: ThreadStack,
    max_call_depth: usize,
    executed: u64,
    id: usize,
}

impl Executor {
    /// Prepare a thread: a fresh private stack, RST and RSB at the stack
    /// top, the mini-stack (if any) copied below the top and RIP at the jump
    /// address. Other registers come from the seed.
    pub fn new(
        program: Arc<LoadedProgram>,
        console: Arc<Console>,
        options: &VmOptions,
        seed: ThreadSeed,
        id: usize,
    ) -> VmResult<Self> {
        let space = AddressSpace::new(program.header());
        let mut stack = ThreadStack::new(space.stack_size() as usize);
        let mut registers = seed.registers;
        registers.set_rip(seed.jump_address);
        registers.set_rst(space.stack_top());
        registers.set_rsb(space.stack_top());

        if let Some(mini_stack) = &seed.mini_stack {
            stack.seed_top(mini_stack)?;
            registers.set_rsb(space.stack_top().wrapping_sub(mini_stack.len() as u32));
        }

        Ok(Self {
            program,
            console,
            space,
            registers,
            saved: Vec::new(),
            stack,
            max_call_depth: options.max_call_depth,
            executed: 0,
            id,
        })
    }

    /// Active register set
    pub fn registers(&self) -> &RegisterSet {
        &self.registers
    }

    /// Number of checkpointed register sets
    pub fn call_depth(&self) -> usize {
        self.saved.len()
    }

    /// Instructions executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn program(&self) -> &LoadedProgram {
        &self.program
    }

    /// Run until the outermost activation returns
    pub fn run(&mut self) -> VmResult<ThreadExit> {
        loop {
            if let Step::Exit(exit) = self.step()? {
                return Ok(exit);
            }
        }
    }

    /// Execute the instruction at RIP
    pub fn step(&mut self) -> VmResult<Step> {
        let address = self.registers.rip();
        let instr = self
            .program
            .fetch(address)
            .ok_or(VmError::CodeOutOfBounds(address))?;
        let opcode = instr.opcode().ok_or(VmError::InvalidOpcode {
            address,
            bits: instr.opcode_bits(),
        })?;
        let operands = instr
            .operands()
            .map_err(|source| VmError::InvalidInstruction { address, source })?;

        self.executed += 1;
        tracing::trace!(thread = self.id, address, "{}", instr);

        match operands {
            Operands::Arithmetic(ops) => self.exec_arithmetic(opcode, ops)?,
            Operands::Indirect(ops) => self.exec_indirect(opcode, ops)?,
            Operands::Store(ops) => self.exec_store(opcode, ops)?,
            // Jumps and returns set RIP themselves
            Operands::Jump(ops) => {
                self.exec_jump(opcode, ops)?;
                return Ok(Step::Continue);
            }
            Operands::Return(cleanup) => return self.exec_return(cleanup),
            Operands::Stack(operand) => self.exec_stack(opcode, operand)?,
            Operands::Io(count) => self.exec_io(opcode, count)?,
        }

        self.registers.set_rip(address.wrapping_add(INSTRUCTION_SIZE));
        Ok(Step::Continue)
    }

    // ===== Operand resolution =====

    fn address(&self, register: Register, offset: i32) -> VmResult<i64> {
        Ok(self.registers.get(register)? as i64 + offset as i64)
    }

    /// Load the word at a virtual address
    fn load(&self, address: i64) -> VmResult<u32> {
        match self.space.map(address)? {
            Slot::Stack(byte) => self.stack.load(byte),
            Slot::Global(offset) => self.program.global().load(offset as i64),
        }
    }

    /// Store a word at a virtual address
    fn store(&mut self, address: i64, value: u32) -> VmResult<()> {
        match self.space.map(address)? {
            Slot::Stack(byte) => self.stack.store(byte, value),
            Slot::Global(offset) => self.program.global().store(offset as i64, value),
        }
    }

    /// Value of a `register + offset` operand
    #[inline]
    fn read(&self, operand: RegOperand) -> VmResult<u32> {
        match operand.register {
            Register::Rgd => self.program.global().load(operand.offset as i64),
            Register::Rct => Ok(operand.offset as u32),
            r if r.is_index() => self.load(self.address(r, operand.offset)?),
            r => self.registers.get(r),
        }
    }

    /// Write through a `register + offset` operand
    #[inline]
    fn write(&mut self, operand: RegOperand, value: u32) -> VmResult<()> {
        match operand.register {
            Register::Rgd => self.program.global().store(operand.offset as i64, value),
            Register::Rct => Err(VmError::ConstantWrite),
            r if r.is_index() => {
                let address = self.address(r, operand.offset)?;
                self.store(address, value)
            }
            r => self.registers.set(r, value),
        }
    }
}
