//! C403 bytecode definitions
//!
//! This module provides the instruction set, register ids, the packed
//! instruction word and the on-disk program container shared by the code
//! generator and the virtual machine.

pub mod constants;
pub mod instruction;
pub mod opcode;
pub mod program;
pub mod register;

pub use constants::{
    CODE_ALIGNMENT, CODE_START, DATA_START, HEADER_SIZE, MAGIC, STACK_ALIGNMENT, STACK_TOP,
    VERSION_MAJOR, VERSION_MINOR,
};
pub use instruction::{
    disassemble, ArithOperands, CodeBuffer, DecodeError, EncodeError, IndirectOffset,
    IndirectOperands, Instruction, JumpOperands, Operands, RegOperand, StoreOperands,
};
pub use opcode::{InstrShape, Opcode};
pub use program::{
    FunctionSymbol, Program, ProgramError, ProgramHeader, ProgramReader, ProgramResult,
    ProgramWriter,
};
pub use register::{Register, INDEX_REGISTER_COUNT, REGISTER_SLOT_COUNT, WORKING_REGISTER_COUNT};
