//! C403 compiler back end
//!
//! The bytecode model shared with the VM, plus the code generator that a
//! parser drives to produce programs.

pub mod bytecode;
pub mod codegen;
pub mod error;

pub use bytecode::{Instruction, Opcode, Program, ProgramHeader, Register};
pub use codegen::{DataType, Generator, Operator};
pub use error::{CollectingSink, CompileError, CompileResult, ErrorSink};
