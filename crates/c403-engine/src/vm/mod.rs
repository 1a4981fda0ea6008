//! C403 virtual machine
//!
//! This module provides the runtime side of the toolchain:
//! - Program loading and global data setup
//! - Per-thread register sets and private stacks
//! - The instruction executor
//! - Thread seeding and the console used by PRINT and READ

pub mod console;
pub mod executor;
pub mod loader;
pub mod memory;
pub mod register_set;
pub mod thread;

pub use console::{CapturedOutput, Console};
pub use executor::{Executor, Step};
pub use loader::{LoadError, LoadedProgram};
pub use memory::{AddressSpace, GlobalData, Slot, ThreadStack};
pub use register_set::RegisterSet;
pub use thread::{ThreadExit, ThreadSeed, Vm, VmOptions};

use crate::compiler::bytecode::{DecodeError, Opcode, Register};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Opcode bits that name no opcode
    #[error("Invalid opcode {bits} at {address:#07X}")]
    InvalidOpcode {
        /// Address of the instruction
        address: u32,
        /// Raw opcode field
        bits: u8,
    },

    /// Instruction whose operands do not decode
    #[error("Invalid instruction at {address:#07X}: {source}")]
    InvalidInstruction {
        /// Address of the instruction
        address: u32,
        /// Decoder failure
        source: DecodeError,
    },

    /// RIP left the code section
    #[error("Instruction pointer {0:#07X} is outside the code section")]
    CodeOutOfBounds(u32),

    /// Indirect opcode other than RCOPYD
    #[error("Only RCOPYD indirect instructions are supported, found {0}")]
    UnsupportedIndirect(Opcode),

    /// Opcode with no defined behavior
    #[error("{0} is not implemented")]
    NotImplemented(Opcode),

    /// Jump target based on something other than RIP or RCT
    #[error("Jump target register must be RIP or RCT, found {0}")]
    UnsupportedJumpRegister(Register),

    /// CALLPLLS / CALLPLLA reached execution
    #[error("Parallel calls are not supported ({0})")]
    ParallelCallUnsupported(Opcode),

    /// A location based on RCT used as a destination
    #[error("Cannot write to the constant register")]
    ConstantWrite,

    /// A pseudo register used as a runtime operand
    #[error("Register {0} has no runtime slot")]
    NoRegisterSlot(Register),

    /// Access outside the thread stack or global data
    #[error("Memory access out of bounds at {0:#X}")]
    MemoryOutOfBounds(i64),

    /// Global data access not on a word boundary
    #[error("Misaligned global data access at offset {0}")]
    MisalignedAccess(i64),

    /// Integer division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// The save stack of a thread is full
    #[error("Call depth exceeded ({0})")]
    CallDepthExceeded(usize),

    /// Console read or write failure
    #[error("Console error: {0}")]
    Console(#[from] std::io::Error),

    /// READ got a line that is not an integer
    #[error("Invalid input: {0:?}")]
    InvalidInput(String),

    /// READ hit end of input
    #[error("Unexpected end of input")]
    EndOfInput,

    /// The native thread could not be created
    #[error("Failed to spawn VM thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// A VM thread panicked
    #[error("VM thread panicked")]
    ThreadPanicked,

    /// Program load failure
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
