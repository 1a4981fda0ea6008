//! C403 toolchain engine
//!
//! This crate provides the C403 toolchain core:
//! - **Bytecode**: opcodes, registers, the 64-bit instruction word and the
//!   program container (`compiler::bytecode`)
//! - **Code generator**: register allocation, scopes and the construct-level
//!   generator driven by a parser (`compiler::codegen`)
//! - **VM**: program loading, threads and the instruction executor (`vm`)
//!
//! # Example
//!
//! ```rust,ignore
//! use c403_engine::{Console, Generator, LoadedProgram, Vm, DataType};
//!
//! let mut gen = Generator::new();
//! gen.program_start_stage0()?;
//! gen.begin_function("main", DataType::Int32)?;
//! gen.declare_parameter("argc", DataType::Int32)?;
//! gen.function_header_stage0()?;
//! gen.function_header_stage1();
//! gen.push_constant(42);
//! gen.return_statement()?;
//! gen.function_trailer()?;
//! gen.program_start_stage1()?;
//!
//! let program = LoadedProgram::load(gen.program())?;
//! let exit = Vm::new(program, Console::stdio()).run()?;
//! assert_eq!(exit.return_value, 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Compiler module: bytecode model and code generation
pub mod compiler;

/// VM module: loader, threads and executor
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{
    CollectingSink, CompileError, CompileResult, DataType, ErrorSink, Generator, Instruction,
    Opcode, Operator, Program, ProgramHeader, Register,
};

pub use vm::{
    Console, LoadError, LoadedProgram, ThreadExit, ThreadSeed, Vm, VmError, VmOptions, VmResult,
};
